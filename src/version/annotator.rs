//! Annotators computed over level B-trees.

use crate::version::btree::Annotator;
use crate::version::file_metadata::FileMetadata;

/// Whether any file in the level contains range keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct HasRangeKeysAnnotator;

impl Annotator for HasRangeKeysAnnotator {
    type Value = bool;

    fn zero(&self) -> bool {
        false
    }

    fn accumulate(&self, f: &FileMetadata, dst: bool) -> (bool, bool) {
        (dst || f.has_range_keys, true)
    }

    fn merge(&self, src: &bool, dst: bool) -> bool {
        *src || dst
    }
}

/// Number of files in the level marked for compaction.
///
/// The mark can be set on a published file, so whoever sets it must call
/// `invalidate_annotation` for this annotator on the file's level.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkedForCompactionAnnotator;

impl Annotator for MarkedForCompactionAnnotator {
    type Value = usize;

    fn zero(&self) -> usize {
        0
    }

    fn accumulate(&self, f: &FileMetadata, dst: usize) -> (usize, bool) {
        (dst + usize::from(f.marked_for_compaction()), true)
    }

    fn merge(&self, src: &usize, dst: usize) -> usize {
        src + dst
    }
}
