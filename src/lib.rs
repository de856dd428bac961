//! querybox: admission control and sandboxed execution of learner SQL
//!
//! Learners submit free-form SQL against per-assignment PostgreSQL schemas.
//! Every submission passes a static admission check, runs read-only on a
//! pooled connection under engine-enforced limits, and is graded against the
//! assignment's expected output.
//!
//! # Architecture
//!
//! ## Admission ([`admission`])
//! - [`admission::lexer`]: Quote-aware comment stripping and statement splitting
//! - [`admission::validator`]: Single-statement, SELECT-only, keyword blocklist
//!
//! ## Execution ([`exec`])
//! - [`exec::backend`]: Backend and session seam, failure taxonomy
//! - [`exec::postgres`]: sqlx-backed pool and read-only sessions
//! - [`exec::runner`]: Limits, client guard and release policy per execution
//! - [`exec::sanitize`]: Engine message sanitization
//!
//! ## Verdict ([`verdict`])
//! - [`verdict::normalize`]: Column-ordered, JSON-safe results
//! - [`verdict::comparator`]: Expected output descriptors and grading
//! - [`verdict::verdict`]: Outcome classification
//!
//! ## Core ([`core`](crate::core))
//! - [`core::engine`]: Submission engine
//! - [`core::assignments`]: Assignment store seam and in-memory catalog
//! - [`core::types`]: Shared result types
//!
//! ## Safety ([`safety`])
//! - [`safety::rate_limit`]: Per-user fixed-window rate limiting
//!
//! ## Observability ([`observability`])
//! - [`observability::audit`]: Submission recorders and audit log
//! - [`observability::metrics`]: Prometheus metrics export
//!
//! ## Configuration ([`config`])
//! - [`config::types`]: Configuration types and crate error
//! - [`config::loader`]: File and environment loading
//! - [`config::validator`]: Startup validation
//!
//! # Design Principles
//!
//! 1. **Engine as enforcer** - Timeouts, memory and read-only mode are set on
//!    the database session, not approximated by the client
//! 2. **No state leaks** - A session is reset before reuse or discarded
//! 3. **Fail closed** - Anything the admission check cannot scan is rejected
//! 4. **Sanitized errors** - Learners see engine messages, never infrastructure

// Admission
pub mod admission;

// Execution
pub mod exec;

// Submission core
pub mod core;

// Verdict
pub mod verdict;

// Safety
pub mod safety;

// Observability
pub mod observability;

// Configuration
pub mod config;

// Utilities
pub mod utils;

// CLI entrypoint wiring for the querybox binary.
pub mod cli;

// Re-export commonly used types for convenience
pub use config::types::*;
pub use crate::core::engine::{SubmissionEngine, SubmissionError, SubmissionRequest};
