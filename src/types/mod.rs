//! Shared types for the subsidy platform

mod error;

pub use error::{PlatformError, Result};
