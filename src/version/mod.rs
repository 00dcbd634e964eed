//! Versioned record of the sstables that make up the LSM tree.
//!
//! The version system provides:
//! - **FileMetadata**: Information about each sstable, physical or virtual
//! - **BTree**: Copy-on-write ordered set of files, one per level
//! - **LevelMetadata**: A level's tree plus cached sizes, with bounded slices
//!   and filtering iterators over it
//! - **L0Sublevels**: L0 files arranged into non-overlapping sublevels
//! - **Version**: Immutable snapshot of all files organized by level
//! - **VersionEdit**: Delta to apply to a Version, and its record encoding
//! - **BulkVersionEdit**: Several edits folded together and applied at once
//! - **VersionSet**: Owns the current Version and the list of live ones
//!
//! # LSM-Tree File Organization
//!
//! ```text
//! Level 0:  [SST-1] [SST-2] [SST-3]  (overlapping keys, ordered by seqnum)
//! Level 1:  [SST-4][SST-5][SST-6]    (non-overlapping, sorted by key)
//! Level 2:  [SST-7][SST-8][SST-9][SST-10]  (non-overlapping, sorted)
//! ...
//! ```
//!
//! # Recovery
//!
//! On startup the caller hands [`VersionSet::recover`] every manifest record
//! in order. The edits are folded into one [`BulkVersionEdit`] and applied to
//! an empty version, which becomes current.

mod annotator;
mod btree;
mod bulk_edit;
mod file_metadata;
mod l0_sublevels;
mod level_metadata;
#[allow(clippy::module_inception)]
mod version;
mod version_edit;
mod version_set;

use std::fmt;

pub use annotator::{HasRangeKeysAnnotator, MarkedForCompactionAnnotator};
pub use btree::Annotator;
pub use bulk_edit::{accumulate_incomplete_and_apply_single_ve, BulkVersionEdit, ZombieTables};
pub use file_metadata::{
    sort_by_seq_num, sort_by_smallest, CompactionState, FileBacking, FileMetadata, KeyType,
    TableInfo,
};
pub use l0_sublevels::L0Sublevels;
pub use level_metadata::{key_range, LevelFile, LevelIterator, LevelMetadata, LevelSlice};
pub use version::{check_ordering, DeletedFn, Version, VersionList, VersionStats};
pub use version_edit::{DeletedFileEntry, NewFileEntry, VersionEdit};
pub use version_set::{VersionRef, VersionSet};

/// Whether expensive consistency checks run. Always on in debug builds.
pub(crate) const INVARIANTS: bool = cfg!(any(debug_assertions, feature = "invariants"));

/// Tag values for encoding VersionEdit fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditTag {
    /// Comparator name.
    Comparator,
    /// Minimum unflushed log number.
    LogNumber,
    /// Next file number.
    NextFileNumber,
    /// Last sequence number.
    LastSequence,
    /// Compaction pointer for a level. Decoded and ignored.
    CompactPointer,
    /// Deleted file (level, file number).
    DeletedFile,
    /// New file with only key bounds.
    NewFile,
    /// Previous log number. Obsolete.
    PrevLogNumber,
    /// New file with seqnum bounds.
    NewFile2,
    /// New file with a path id.
    NewFile3,
    /// New file with custom fields.
    NewFile4,
    /// New file with separate point and range key bounds.
    NewFile5,
    /// Backing table created for virtual sstables.
    CreatedBackingTable,
    /// Backing table no longer referenced.
    RemovedBackingTable,
    /// Column family tags, never supported.
    ColumnFamily,
    ColumnFamilyAdd,
    ColumnFamilyDrop,
    MaxColumnFamily,
}

impl EditTag {
    /// Create from a decoded tag.
    pub fn from_u64(v: u64) -> Option<Self> {
        let tag = match v {
            1 => EditTag::Comparator,
            2 => EditTag::LogNumber,
            3 => EditTag::NextFileNumber,
            4 => EditTag::LastSequence,
            5 => EditTag::CompactPointer,
            6 => EditTag::DeletedFile,
            7 => EditTag::NewFile,
            9 => EditTag::PrevLogNumber,
            100 => EditTag::NewFile2,
            102 => EditTag::NewFile3,
            103 => EditTag::NewFile4,
            104 => EditTag::NewFile5,
            105 => EditTag::CreatedBackingTable,
            106 => EditTag::RemovedBackingTable,
            200 => EditTag::ColumnFamily,
            201 => EditTag::ColumnFamilyAdd,
            202 => EditTag::ColumnFamilyDrop,
            203 => EditTag::MaxColumnFamily,
            _ => return None,
        };
        Some(tag)
    }

    /// Convert to the encoded tag.
    pub fn to_u64(self) -> u64 {
        match self {
            EditTag::Comparator => 1,
            EditTag::LogNumber => 2,
            EditTag::NextFileNumber => 3,
            EditTag::LastSequence => 4,
            EditTag::CompactPointer => 5,
            EditTag::DeletedFile => 6,
            EditTag::NewFile => 7,
            EditTag::PrevLogNumber => 9,
            EditTag::NewFile2 => 100,
            EditTag::NewFile3 => 102,
            EditTag::NewFile4 => 103,
            EditTag::NewFile5 => 104,
            EditTag::CreatedBackingTable => 105,
            EditTag::RemovedBackingTable => 106,
            EditTag::ColumnFamily => 200,
            EditTag::ColumnFamilyAdd => 201,
            EditTag::ColumnFamilyDrop => 202,
            EditTag::MaxColumnFamily => 203,
        }
    }
}

/// Tags of the custom fields that follow a new-file-4 or new-file-5 record.
pub(crate) mod custom_tag {
    pub const TERMINATE: u64 = 1;
    pub const NEEDS_COMPACTION: u64 = 2;
    pub const CREATION_TIME: u64 = 6;
    /// Set on tags a reader must understand to decode the record.
    pub const NON_SAFE_IGNORE_MASK: u64 = 1 << 6;
    pub const PATH_ID: u64 = 65;
    pub const VIRTUAL: u64 = 66;
}

/// A level, or a sublevel of L0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    /// One of the seven levels.
    Level(usize),
    /// A sublevel within L0.
    L0Sublevel(usize),
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Level(l) => write!(f, "L{}", l),
            Level::L0Sublevel(s) => write!(f, "L0.{}", s),
        }
    }
}
