//! Configuration
//!
//! Engine settings, limits, loading, and startup validation.

pub mod loader;
pub mod types;
pub mod validator;
