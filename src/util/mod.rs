//! Shared encoding and comparison helpers.

pub mod coding;
pub mod comparator;
