//! User key orderings.

use std::cmp::Ordering;

/// An ordering over user keys.
///
/// The name is written to the first manifest record, and recovery refuses a
/// manifest written under a differently named ordering.
pub trait Comparator: Send + Sync {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;

    /// Stable identifier of the ordering. Must be non-empty.
    fn name(&self) -> &str;
}

/// Lexicographic byte ordering.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytewiseComparator;

impl BytewiseComparator {
    pub fn new() -> Self {
        Self
    }
}

impl Comparator for BytewiseComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }

    fn name(&self) -> &str {
        "leveldb.BytewiseComparator"
    }
}

/// The inverse of another ordering, named after it.
#[derive(Debug, Clone)]
pub struct ReverseComparator<C: Comparator> {
    inner: C,
    name: String,
}

impl<C: Comparator> ReverseComparator<C> {
    pub fn new(inner: C) -> Self {
        let name = format!("{}.reversed", inner.name());
        Self { inner, name }
    }
}

impl<C: Comparator> Comparator for ReverseComparator<C> {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        self.inner.compare(b, a)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
