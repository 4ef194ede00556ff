//! Append-only audit trail: writer, review workflow, and read-side queries

pub mod query;
pub mod writer;

pub use query::{AuditFilter, AuditQuery, AuditStatistics};
pub use writer::{AuditLogger, NewAuditEvent};
