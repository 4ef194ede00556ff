//! Blockchain client wrapper
//!
//! Opaque bridge to the subsidy contract plus pure format/unit utilities.

pub mod abi;
pub mod client;
pub mod util;

pub use client::{ChainClient, ChainConfig, TxOutcome};
pub use util::{ether_to_wei, is_address, is_tx_hash, verify_oracle_signature, wei_to_ether};
