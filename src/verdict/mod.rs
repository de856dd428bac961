//! Result normalization, correctness comparison and outcome classification

pub mod comparator;
pub mod normalize;
pub mod verdict;
