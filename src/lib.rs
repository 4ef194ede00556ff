//! Green hydrogen subsidy platform
//!
//! REST API for tracking hydrogen-production subsidy programmes:
//! projects, their milestone lifecycle, oracle-assisted verification,
//! on-chain subsidy release, and a tamper-evident audit trail.

pub mod audit;
pub mod auth;
pub mod chain;
pub mod config;
pub mod db;
pub mod notify;
pub mod oracle;
pub mod routes;
pub mod server;
pub mod types;
pub mod workflow;
