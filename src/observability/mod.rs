//! Observability
//!
//! Submission audit trail and metrics for operational visibility.

pub mod audit;
pub mod metrics;
