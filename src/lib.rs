//! # lsm-manifest
//!
//! The catalogue of sstables behind an LSM-tree storage engine.
//!
//! ## Features
//!
//! - **Copy-on-write levels**: Each level is a persistent B-tree; cloning a
//!   version shares every node until one side mutates it
//! - **Virtual sstables**: Files may share a backing object, which becomes
//!   obsolete once no version references any table it backs
//! - **L0 sublevels**: Overlapping L0 files arranged into flat sublevels
//! - **Version edits**: A compact tagged record format, with bulk replay
//! - **Version set**: Atomic installation of new versions, with reference
//!   counted access to older ones
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use lsm_manifest::{FileMetadata, ManifestOptions, VersionEdit, VersionSet};
//!
//! let vs = VersionSet::new(ManifestOptions::default())?;
//!
//! // Record a flushed file
//! let mut meta = FileMetadata::new(vs.new_file_num(), 4096).with_seq_nums(1, 10);
//! meta.extend_point_key_bounds(cmp, smallest, largest);
//! meta.init_physical_backing();
//! let mut ve = VersionEdit::new();
//! ve.add_file(0, Arc::new(meta));
//! vs.log_and_apply(&mut ve)?;
//!
//! // Pin the current version while reading
//! let v = vs.current();
//! let overlapping = v.overlaps(0, cmp, b"a", b"m", false)?;
//!
//! // Rebuild after a restart
//! let vs = VersionSet::recover(ManifestOptions::default(), records)?;
//! ```

// Public modules
pub mod error;
pub mod options;
pub mod types;
pub mod util;
pub mod version;

// Re-export main types for convenience
pub use error::{Error, Result};
pub use options::{ManifestOptions, NUM_LEVELS};
pub use types::{default_format_key, DiskFileNum, FileNum, FormatKey, InternalKey, KeyKind};
pub use util::comparator::{BytewiseComparator, Comparator};

// Versions
pub use version::{
    BulkVersionEdit, FileBacking, FileMetadata, KeyType, Level, LevelIterator, LevelMetadata,
    LevelSlice, Version, VersionEdit, VersionList, VersionRef, VersionSet,
};
