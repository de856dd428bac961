//! Admission safeguards that sit in front of the sandbox

pub mod rate_limit;
