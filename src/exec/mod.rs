//! Sandboxed execution
//!
//! The backend seam, the PostgreSQL implementation, and the runner that
//! applies limits and release policy around each admitted query.

pub mod backend;
pub mod postgres;
pub mod runner;
pub mod sanitize;
