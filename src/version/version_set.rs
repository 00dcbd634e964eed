//! VersionSet - Manages current Version with atomic updates.
//!
//! The VersionSet is responsible for:
//! - Tracking the current Version and every version still referenced
//! - Applying VersionEdits atomically, one at a time
//! - Managing file number allocation
//! - Tracking sequence and log numbers
//! - Keeping the encoded manifest records, and rebuilding state from them
//! - Tracking backings that only older versions still reference

use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::options::ManifestOptions;
use crate::types::{DiskFileNum, FileNum};

use super::bulk_edit::{accumulate_incomplete_and_apply_single_ve, BulkVersionEdit, ZombieTables};
use super::file_metadata::FileBacking;
use super::version::{DeletedFn, Version, VersionList};
use super::version_edit::VersionEdit;

/// A counted reference to a [`Version`]. The version's files stay live until
/// every reference is dropped.
pub struct VersionRef {
    version: Arc<Version>,
}

impl VersionRef {
    fn new(version: Arc<Version>) -> Self {
        version.add_ref();
        Self { version }
    }

    /// The shared version. Holding only the `Arc` keeps the memory alive but
    /// not the version's files.
    pub fn arc(&self) -> &Arc<Version> {
        &self.version
    }
}

impl Deref for VersionRef {
    type Target = Version;

    fn deref(&self) -> &Version {
        &self.version
    }
}

impl Clone for VersionRef {
    fn clone(&self) -> Self {
        Self::new(self.version.clone())
    }
}

impl Drop for VersionRef {
    fn drop(&mut self) {
        self.version.release_ref();
    }
}

impl fmt::Debug for VersionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.version, f)
    }
}

/// State only touched while installing an edit.
struct State {
    /// Backings of virtual sstables in the latest version.
    backing_state: HashMap<DiskFileNum, Arc<FileBacking>>,
    zombie_tables: ZombieTables,
    /// Encoded manifest records, oldest first.
    manifest: Vec<Bytes>,
}

/// Manages the set of versions and file metadata.
///
/// The VersionSet tracks:
/// - Current Version (immutable snapshot of active files)
/// - Live versions, oldest first
/// - Next file number for allocation
/// - Last sequence number and minimum unflushed log number
/// - Backings that became obsolete once their last version was released
pub struct VersionSet {
    opts: ManifestOptions,
    /// Serializes edits, and orders them with taking references to the
    /// current version.
    state: Mutex<State>,
    /// Current version (atomically swappable). Holds one reference.
    current: ArcSwap<Version>,
    versions: VersionList,
    /// Filled by versions as their last reference is released.
    obsolete: Arc<Mutex<Vec<Arc<FileBacking>>>>,
    next_file_num: AtomicU64,
    last_seq_num: AtomicU64,
    min_unflushed_log_num: AtomicU64,
}

impl VersionSet {
    /// Create a VersionSet for a new, empty database. The first manifest
    /// record names the comparer.
    pub fn new(opts: ManifestOptions) -> Result<Self> {
        opts.validate()?;
        let mut ve = VersionEdit::new();
        ve.comparer_name = opts.comparer.name().to_string();
        ve.next_file_num = FileNum(1);
        let record = ve.encode()?;

        let empty = Version::new(&opts);
        let mut vs = Self::with_version(opts, empty, HashMap::new(), 1, 0, 0);
        vs.state.get_mut().manifest.push(record);
        Ok(vs)
    }

    /// Rebuild a VersionSet from manifest records.
    ///
    /// Every record is folded into one bulk edit, which is applied to an
    /// empty version.
    pub fn recover<I, R>(opts: ManifestOptions, records: I) -> Result<Self>
    where
        I: IntoIterator<Item = R>,
        R: AsRef<[u8]>,
    {
        opts.validate()?;
        let mut bve = BulkVersionEdit::for_replay();
        let mut manifest = Vec::new();
        let mut next_file_num = 0u64;
        let mut last_seq_num = 0u64;
        let mut min_unflushed_log_num = 0u64;

        for (i, record) in records.into_iter().enumerate() {
            let record = record.as_ref();
            let ve = VersionEdit::decode(record).map_err(|e| e.with_context(format!("record {}", i)))?;
            if !ve.comparer_name.is_empty() && ve.comparer_name != opts.comparer.name() {
                return Err(Error::invalid_argument(format!(
                    "manifest comparer {} does not match {}",
                    ve.comparer_name,
                    opts.comparer.name()
                )));
            }
            if ve.min_unflushed_log_num.0 != 0 {
                min_unflushed_log_num = ve.min_unflushed_log_num.0;
            }
            if ve.next_file_num.0 != 0 {
                next_file_num = ve.next_file_num.0;
            }
            if ve.last_seq_num != 0 {
                last_seq_num = ve.last_seq_num;
            }
            for nf in &ve.new_files {
                next_file_num = next_file_num.max(nf.meta.file_num.0 + 1);
            }
            bve.accumulate(&ve)?;
            manifest.push(Bytes::copy_from_slice(record));
        }

        let v = bve.apply(None, &opts, None)?;
        let mut backing_state = bve.added_file_backing.clone();
        for dfn in &bve.removed_file_backing {
            if backing_state.remove(dfn).is_none() {
                warn!(backing = %dfn, "removed backing was never created");
            }
        }
        debug!(
            records = manifest.len(),
            next_file_num, last_seq_num, "recovered version set"
        );

        let mut vs = Self::with_version(
            opts,
            v,
            backing_state,
            next_file_num.max(1),
            last_seq_num,
            min_unflushed_log_num,
        );
        vs.state.get_mut().manifest = manifest;
        Ok(vs)
    }

    fn with_version(
        opts: ManifestOptions,
        mut v: Version,
        backing_state: HashMap<DiskFileNum, Arc<FileBacking>>,
        next_file_num: u64,
        last_seq_num: u64,
        min_unflushed_log_num: u64,
    ) -> Self {
        let obsolete = Arc::new(Mutex::new(Vec::new()));
        v.set_deleted_callback(deleted_fn(&obsolete));
        let v = Arc::new(v);
        v.add_ref();
        let versions = VersionList::new();
        versions.push_back(&v);
        Self {
            opts,
            state: Mutex::new(State {
                backing_state,
                zombie_tables: ZombieTables::new(),
                manifest: Vec::new(),
            }),
            current: ArcSwap::new(v),
            versions,
            obsolete,
            next_file_num: AtomicU64::new(next_file_num),
            last_seq_num: AtomicU64::new(last_seq_num),
            min_unflushed_log_num: AtomicU64::new(min_unflushed_log_num),
        }
    }

    pub fn options(&self) -> &ManifestOptions {
        &self.opts
    }

    /// Get a reference to the current version.
    pub fn current(&self) -> VersionRef {
        let _state = self.state.lock();
        VersionRef::new(self.current.load_full())
    }

    /// Log a VersionEdit and apply it to create a new Version, which becomes
    /// current.
    ///
    /// The edit's next file number is filled in, as are its last sequence
    /// number when unset and the backings it leaves unreferenced. On error
    /// nothing changes.
    pub fn log_and_apply(&self, ve: &mut VersionEdit) -> Result<()> {
        let mut state = self.state.lock();

        let min_unflushed = self.min_unflushed_log_num.load(Ordering::Acquire);
        if ve.min_unflushed_log_num.0 != 0 && ve.min_unflushed_log_num.0 < min_unflushed {
            return Err(Error::invalid_argument(format!(
                "inconsistent min unflushed log number {} < {}",
                ve.min_unflushed_log_num.0, min_unflushed
            )));
        }
        let last_seq = self.last_seq_num.load(Ordering::Acquire);
        if ve.last_seq_num == 0 {
            ve.last_seq_num = last_seq;
        } else if ve.last_seq_num < last_seq {
            return Err(Error::invalid_argument(format!(
                "inconsistent last sequence number {} < {}",
                ve.last_seq_num, last_seq
            )));
        }
        ve.next_file_num = FileNum(self.next_file_num.load(Ordering::Acquire));
        // Fail before applying if the new files cannot be recorded.
        ve.encode()?;

        let curr = self.current.load_full();
        let (mut v, zombies) = accumulate_incomplete_and_apply_single_ve(
            ve,
            Some(&curr),
            &self.opts,
            &mut state.backing_state,
        )?;
        let record = ve.encode()?;

        state.manifest.push(record);
        state.zombie_tables.extend(zombies);
        if ve.min_unflushed_log_num.0 != 0 {
            self.min_unflushed_log_num
                .store(ve.min_unflushed_log_num.0, Ordering::Release);
        }
        self.last_seq_num.store(ve.last_seq_num, Ordering::Release);

        v.set_deleted_callback(deleted_fn(&self.obsolete));
        let v = Arc::new(v);
        v.add_ref();
        self.versions.push_back(&v);
        let old = self.current.swap(v);
        old.release_ref();
        debug!(
            added = ve.new_files.len(),
            deleted = ve.deleted_files.len(),
            removed_backings = ve.removed_backing_tables.len(),
            "installed version"
        );
        Ok(())
    }

    /// Take the backings no version references any more. Their files may be
    /// deleted.
    pub fn take_obsolete_tables(&self) -> Vec<Arc<FileBacking>> {
        let mut state = self.state.lock();
        let obsolete = std::mem::take(&mut *self.obsolete.lock());
        for backing in &obsolete {
            if state.zombie_tables.remove(&backing.disk_file_num).is_none() {
                warn!(backing = %backing.disk_file_num, "obsolete backing was not a zombie");
            }
        }
        obsolete
    }

    /// Backings unreferenced by the current version but possibly still used
    /// by older versions, with their sizes.
    pub fn zombie_tables(&self) -> ZombieTables {
        self.state.lock().zombie_tables.clone()
    }

    /// Allocate a file number.
    pub fn new_file_num(&self) -> FileNum {
        FileNum(self.next_file_num.fetch_add(1, Ordering::AcqRel))
    }

    /// Next file number without allocating it.
    pub fn next_file_num(&self) -> FileNum {
        FileNum(self.next_file_num.load(Ordering::Acquire))
    }

    pub fn last_seq_num(&self) -> u64 {
        self.last_seq_num.load(Ordering::Acquire)
    }

    pub fn min_unflushed_log_num(&self) -> FileNum {
        FileNum(self.min_unflushed_log_num.load(Ordering::Acquire))
    }

    /// The encoded manifest records, oldest first.
    pub fn manifest_records(&self) -> Vec<Bytes> {
        self.state.lock().manifest.clone()
    }

    /// Every live version, oldest first.
    pub fn versions(&self) -> Vec<Arc<Version>> {
        self.versions.versions()
    }
}

impl Drop for VersionSet {
    fn drop(&mut self) {
        self.current.load().release_ref();
    }
}

impl fmt::Debug for VersionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VersionSet")
            .field("next_file_num", &self.next_file_num())
            .field("last_seq_num", &self.last_seq_num())
            .field("versions", &self.versions)
            .finish()
    }
}

fn deleted_fn(obsolete: &Arc<Mutex<Vec<Arc<FileBacking>>>>) -> DeletedFn {
    let obsolete = Arc::downgrade(obsolete);
    Box::new(move |backings| {
        if backings.is_empty() {
            return;
        }
        if let Some(obsolete) = obsolete.upgrade() {
            obsolete.lock().extend(backings);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{InternalKey, KeyKind};
    use crate::util::comparator::{BytewiseComparator, Comparator, ReverseComparator};
    use crate::version::FileMetadata;

    fn file(vs: &VersionSet, smallest: &'static str, largest: &'static str, seq: u64) -> Arc<FileMetadata> {
        let num = vs.new_file_num();
        let mut m = FileMetadata::new(num, 1000).with_seq_nums(seq, seq);
        m.extend_point_key_bounds(
            &BytewiseComparator::new(),
            InternalKey::new(smallest, seq, KeyKind::Set),
            InternalKey::new(largest, seq, KeyKind::Set),
        );
        m.init_physical_backing();
        Arc::new(m)
    }

    #[test]
    fn test_new_version_set() {
        let vs = VersionSet::new(ManifestOptions::default()).unwrap();
        let v = vs.current();
        assert_eq!(v.refs(), 2);
        assert!(v.level(0).empty());
        assert_eq!(vs.versions().len(), 1);
        assert_eq!(vs.manifest_records().len(), 1);
        assert_eq!(vs.new_file_num(), FileNum(1));
        assert_eq!(vs.new_file_num(), FileNum(2));
    }

    #[test]
    fn test_log_and_apply() {
        let vs = VersionSet::new(ManifestOptions::default()).unwrap();
        let f1 = file(&vs, "a", "c", 5);
        let mut ve = VersionEdit::new();
        ve.last_seq_num = 5;
        ve.add_file(0, f1.clone());
        vs.log_and_apply(&mut ve).unwrap();

        assert_eq!(ve.next_file_num, FileNum(2));
        assert_eq!(vs.last_seq_num(), 5);
        assert_eq!(vs.current().level(0).len(), 1);
        // The previous version had no references left.
        assert_eq!(vs.versions().len(), 1);
        assert_eq!(vs.manifest_records().len(), 2);

        let mut stale = VersionEdit::new();
        stale.last_seq_num = 3;
        assert!(matches!(
            vs.log_and_apply(&mut stale),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_old_version_pins_files() {
        let vs = VersionSet::new(ManifestOptions::default()).unwrap();
        let f1 = file(&vs, "a", "c", 1);
        let mut ve = VersionEdit::new();
        ve.add_file(1, f1.clone());
        vs.log_and_apply(&mut ve).unwrap();

        let pinned = vs.current();
        let mut ve = VersionEdit::new();
        ve.delete_file(1, f1.clone());
        vs.log_and_apply(&mut ve).unwrap();

        assert_eq!(vs.versions().len(), 2);
        assert_eq!(vs.zombie_tables().get(&DiskFileNum(1)), Some(&1000));
        assert!(vs.take_obsolete_tables().is_empty());
        assert_eq!(pinned.level(1).len(), 1);

        drop(pinned);
        assert_eq!(vs.versions().len(), 1);
        let obsolete = vs.take_obsolete_tables();
        assert_eq!(obsolete.len(), 1);
        assert_eq!(obsolete[0].disk_file_num, DiskFileNum(1));
        assert!(vs.zombie_tables().is_empty());
        assert_eq!(f1.refs(), 0);
    }

    #[test]
    fn test_failed_apply_changes_nothing() {
        let vs = VersionSet::new(ManifestOptions::default()).unwrap();
        let mut ve = VersionEdit::new();
        ve.add_file(2, file(&vs, "a", "e", 1));
        vs.log_and_apply(&mut ve).unwrap();
        let before = vs.current().debug_string(vs.options().format_key);

        let mut ve = VersionEdit::new();
        ve.add_file(2, file(&vs, "d", "g", 2));
        assert!(vs.log_and_apply(&mut ve).is_err());
        assert_eq!(vs.current().debug_string(vs.options().format_key), before);
        assert_eq!(vs.manifest_records().len(), 2);
    }

    #[test]
    fn test_recover_from_records() {
        let vs = VersionSet::new(ManifestOptions::default()).unwrap();
        let f1 = file(&vs, "a", "c", 1);
        let f2 = file(&vs, "b", "d", 2);
        let f3 = file(&vs, "m", "p", 3);
        let mut ve = VersionEdit::new();
        ve.add_file(0, f1.clone());
        ve.add_file(0, f2);
        vs.log_and_apply(&mut ve).unwrap();
        let mut ve = VersionEdit::new();
        ve.delete_file(0, f1);
        ve.add_file(3, f3);
        ve.min_unflushed_log_num = FileNum(7);
        vs.log_and_apply(&mut ve).unwrap();

        let recovered =
            VersionSet::recover(ManifestOptions::default(), vs.manifest_records()).unwrap();
        let format = vs.options().format_key;
        assert_eq!(
            recovered.current().debug_string(format),
            vs.current().debug_string(format)
        );
        assert_eq!(recovered.next_file_num(), vs.next_file_num());
        assert_eq!(recovered.last_seq_num(), vs.last_seq_num());
        assert_eq!(recovered.min_unflushed_log_num(), FileNum(7));
    }

    #[test]
    fn test_recover_comparer_mismatch() {
        let vs = VersionSet::new(ManifestOptions::default()).unwrap();
        let reverse: Arc<dyn Comparator> =
            Arc::new(ReverseComparator::new(BytewiseComparator::new()));
        let opts = ManifestOptions::default().comparer(reverse);
        let err = VersionSet::recover(opts, vs.manifest_records()).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_recover_corrupt_record() {
        let err = VersionSet::recover(ManifestOptions::default(), [vec![8u8]]).unwrap_err();
        assert!(err.is_corruption());
        assert!(err.to_string().contains("record 0"), "{}", err);
    }
}
