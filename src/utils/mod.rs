//! Utilities

pub mod json_schema;
