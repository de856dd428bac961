//! Submission core.
//!
//! Shared result types, the assignment store seam, and the engine that ties
//! admission, execution and grading together.

pub mod assignments;
pub mod engine;
pub mod types;
