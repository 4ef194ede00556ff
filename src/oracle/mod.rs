//! Oracle aggregation service
//!
//! Weighted consensus over external attestation providers. The result is
//! advisory input for the human verifier; the milestone verify transition
//! does not gate on it.

pub mod aggregator;
pub mod provider;

pub use aggregator::{
    aggregate_readings, assess, Assessment, OracleAggregate, OracleService, ProviderFailure,
    ProviderReading, TargetCheck,
};
pub use provider::{default_providers, parse_provider_spec, OracleProvider};
