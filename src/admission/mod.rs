//! Query admission
//!
//! Static checks deciding whether learner SQL may reach the sandbox at all.

pub mod lexer;
pub mod validator;

pub use validator::{AdmittedQuery, QueryValidator, Rejection, ValidationVerdict};
