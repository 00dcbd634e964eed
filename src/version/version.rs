//! Version - immutable snapshot of the LSM tree's sstables.

use std::cmp::Ordering;
use std::fmt;
use std::sync::atomic::{AtomicI32, Ordering as AtomicOrdering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::{Error, Result};
use crate::options::{ManifestOptions, NUM_LEVELS};
use crate::types::{default_format_key, FormatKey};
use crate::util::comparator::Comparator;
use crate::version::file_metadata::{FileBacking, FileMetadata};
use crate::version::l0_sublevels::{describe_sublevels, L0Sublevels};
use crate::version::level_metadata::{overlaps, LevelIterator, LevelMetadata, LevelSlice};
use crate::version::Level;

/// Called with the backings that became obsolete when a version's last
/// reference is released.
pub type DeletedFn = Box<dyn Fn(Vec<Arc<FileBacking>>) + Send + Sync>;

/// Aggregates carried from version to version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VersionStats {
    /// Number of files in the version marked for compaction.
    pub marked_for_compaction: usize,
}

/// An immutable snapshot of all sstables at a point in time.
///
/// L0 files may overlap and are ordered by sequence number; they are also
/// organized into non-overlapping sublevels. Files at L1 and below are
/// ordered by key and never overlap within a level.
///
/// Versions are reference-counted independently of the `Arc` that holds
/// them: a version stays in its [`VersionList`] until its last reference is
/// released, at which point its files are released and the deleted callback
/// learns which backings became obsolete.
pub struct Version {
    refs: AtomicI32,

    /// Only kept for the newest version in a list.
    pub(crate) l0_sublevels: Mutex<Option<Arc<L0Sublevels>>>,
    pub(crate) l0_sublevel_files: Vec<LevelSlice>,

    pub(crate) levels: [LevelMetadata; NUM_LEVELS],

    /// The files of `levels` that contain range keys.
    pub(crate) range_key_levels: [LevelMetadata; NUM_LEVELS],

    pub(crate) stats: VersionStats,

    deleted: Option<DeletedFn>,

    link: Mutex<Option<ListLink>>,
}

impl Version {
    /// An empty version.
    pub fn new(opts: &ManifestOptions) -> Self {
        let cmp = &opts.comparer;
        Self::with_levels(
            std::array::from_fn(|l| LevelMetadata::new(cmp, l)),
            std::array::from_fn(|l| LevelMetadata::new(cmp, l)),
        )
    }

    pub(crate) fn with_levels(
        levels: [LevelMetadata; NUM_LEVELS],
        range_key_levels: [LevelMetadata; NUM_LEVELS],
    ) -> Self {
        Self {
            refs: AtomicI32::new(0),
            l0_sublevels: Mutex::new(None),
            l0_sublevel_files: Vec::new(),
            levels,
            range_key_levels,
            stats: VersionStats::default(),
            deleted: None,
            link: Mutex::new(None),
        }
    }

    /// Build a version holding `files`, inserted into each level in exactly
    /// the given order. The files are not checked for ordering, which lets
    /// tests construct inconsistent versions.
    pub fn new_with_files(
        opts: &ManifestOptions,
        files: [Vec<Arc<FileMetadata>>; NUM_LEVELS],
    ) -> Result<Self> {
        let cmp = &opts.comparer;
        let mut levels: Vec<LevelMetadata> = Vec::with_capacity(NUM_LEVELS);
        for (l, level_files) in files.iter().enumerate() {
            match LevelMetadata::from_files_in_order(cmp, l, level_files) {
                Ok(lm) => levels.push(lm),
                Err(e) => {
                    for lm in levels.iter_mut() {
                        lm.release();
                    }
                    return Err(e);
                }
            }
        }
        let levels: [LevelMetadata; NUM_LEVELS] = match levels.try_into() {
            Ok(levels) => levels,
            Err(_) => unreachable!("one LevelMetadata per level"),
        };
        let mut v = Self::with_levels(levels, std::array::from_fn(|l| LevelMetadata::new(cmp, l)));
        for (l, level_files) in files.iter().enumerate() {
            for f in level_files.iter().filter(|f| f.has_range_keys) {
                v.range_key_levels[l].insert(f.clone())?;
            }
        }
        v.init_l0_sublevels(cmp.clone(), opts.format_key, opts.flush_split_bytes)?;
        Ok(v)
    }

    /// Install the callback run when the last reference is released.
    pub fn set_deleted_callback(&mut self, deleted: DeletedFn) {
        self.deleted = Some(deleted);
    }

    /// Current reference count.
    pub fn refs(&self) -> i32 {
        self.refs.load(AtomicOrdering::Acquire)
    }

    /// Take a reference.
    pub fn add_ref(&self) {
        self.refs.fetch_add(1, AtomicOrdering::AcqRel);
    }

    /// Drop a reference. Dropping the last one removes the version from its
    /// list, releases its files, and runs the deleted callback.
    ///
    /// # Panics
    ///
    /// Panics if the count goes negative.
    pub fn release_ref(&self) {
        let remaining = self.refs.fetch_sub(1, AtomicOrdering::AcqRel) - 1;
        if remaining < 0 {
            panic!("version refcount went negative: {}", remaining);
        }
        if remaining > 0 {
            return;
        }
        let link = self.link.lock().take();
        // Drop the list's handle only after the list lock is released.
        let _unlinked = link.and_then(|link| link.unlink());
        let obsolete = self.unref_files();
        debug!(obsolete = obsolete.len(), "released version");
        if let Some(deleted) = &self.deleted {
            deleted(obsolete);
        }
    }

    fn unref_files(&self) -> Vec<Arc<FileBacking>> {
        let mut obsolete = Vec::new();
        for lm in self.levels.iter().chain(self.range_key_levels.iter()) {
            obsolete.extend(lm.release_shared());
        }
        obsolete
    }

    /// The files of `level`.
    pub fn level(&self, level: usize) -> &LevelMetadata {
        &self.levels[level]
    }

    /// The files of `level` that contain range keys.
    pub fn range_key_level(&self, level: usize) -> &LevelMetadata {
        &self.range_key_levels[level]
    }

    /// The L0 sublevel organization, available while this is the newest
    /// version of its list.
    pub fn l0_sublevels(&self) -> Option<Arc<L0Sublevels>> {
        self.l0_sublevels.lock().clone()
    }

    /// L0 files by sublevel, oldest sublevel first. Kept for the life of the
    /// version.
    pub fn l0_sublevel_files(&self) -> &[LevelSlice] {
        &self.l0_sublevel_files
    }

    pub fn stats(&self) -> VersionStats {
        self.stats
    }

    /// The next newer version in the list.
    pub fn next(&self) -> Option<Arc<Version>> {
        self.neighbor(|link| link.next)
    }

    /// The next older version in the list.
    pub fn prev(&self) -> Option<Arc<Version>> {
        self.neighbor(|link| link.prev)
    }

    fn neighbor(&self, pick: impl Fn(&Slot) -> usize) -> Option<Arc<Version>> {
        let link = self.link.lock();
        let link = link.as_ref()?;
        let state = link.list.upgrade()?;
        let state = state.lock();
        let slot = pick(&state.slots[link.slot]);
        state.slots[slot].version.clone()
    }

    /// Organize L0 into sublevels.
    pub fn init_l0_sublevels(
        &mut self,
        cmp: Arc<dyn Comparator>,
        format_key: FormatKey,
        flush_split_bytes: i64,
    ) -> Result<()> {
        let sublevels = L0Sublevels::new(&self.levels[0], cmp, format_key, flush_split_bytes)?;
        self.set_l0_sublevels(Arc::new(sublevels));
        Ok(())
    }

    pub(crate) fn set_l0_sublevels(&mut self, sublevels: Arc<L0Sublevels>) {
        self.l0_sublevel_files = sublevels.levels.clone();
        *self.l0_sublevels.get_mut() = Some(sublevels);
    }

    /// Whether this exact file is in `level`.
    pub fn contains(&self, level: usize, cmp: &dyn Comparator, m: &Arc<FileMetadata>) -> bool {
        let mut iter = self.levels[level].iter();
        if level > 0 {
            iter = overlaps(
                &iter,
                cmp,
                &m.smallest.user_key,
                &m.largest.user_key,
                m.largest.is_exclusive_sentinel(),
            )
            .iter();
        }
        let mut cur = iter.first();
        while let Some(f) = cur {
            if Arc::ptr_eq(&f, m) {
                return true;
            }
            cur = iter.next();
        }
        false
    }

    /// Files of `level` whose user key range intersects `[start, end]`, or
    /// `[start, end)` when `exclusive_end` is set.
    ///
    /// L0 files may overlap each other, so for L0 the range is widened to
    /// cover every file selected so far until it stops growing. The result
    /// keeps the level's ordering. Fails with a key collision if two of the
    /// chosen L0 files share a seqnum ordering slot.
    pub fn overlaps(
        &self,
        level: usize,
        cmp: &dyn Comparator,
        start: &[u8],
        end: &[u8],
        exclusive_end: bool,
    ) -> Result<LevelSlice> {
        if level != 0 {
            return Ok(overlaps(&self.levels[level].iter(), cmp, start, end, exclusive_end));
        }

        let files = self.levels[0].slice().files();
        let mut selected = vec![false; files.len()];
        let mut start = Bytes::copy_from_slice(start);
        let mut end = Bytes::copy_from_slice(end);
        let mut exclusive_end = exclusive_end;
        loop {
            let mut restart = false;
            for (i, meta) in files.iter().enumerate() {
                if selected[i] || !meta.overlaps(cmp, &start, &end, exclusive_end) {
                    continue;
                }
                selected[i] = true;

                // Widen immediately for the files still to be checked; the
                // restart rechecks the ones already passed over.
                if cmp.compare(&meta.smallest.user_key, &start) == Ordering::Less {
                    start = meta.smallest.user_key.clone();
                    restart = true;
                }
                match cmp.compare(&meta.largest.user_key, &end) {
                    Ordering::Greater => {
                        end = meta.largest.user_key.clone();
                        exclusive_end = meta.largest.is_exclusive_sentinel();
                        restart = true;
                    }
                    Ordering::Equal if exclusive_end && !meta.largest.is_exclusive_sentinel() => {
                        exclusive_end = false;
                        restart = true;
                    }
                    _ => {}
                }
            }
            if !restart {
                break;
            }
        }

        let chosen: Vec<Arc<FileMetadata>> = files
            .into_iter()
            .zip(selected)
            .filter_map(|(f, s)| s.then_some(f))
            .collect();
        LevelSlice::seq_sorted(&chosen)
    }

    /// Check every sublevel and level for ordering violations.
    pub fn check_ordering(&self, cmp: &dyn Comparator, format: FormatKey) -> Result<()> {
        for (sublevel, slice) in self.l0_sublevel_files.iter().enumerate().rev() {
            check_ordering(cmp, format, Level::L0Sublevel(sublevel), slice.iter())
                .map_err(|e| self.annotate(e, format))?;
        }
        for (level, lm) in self.levels.iter().enumerate() {
            check_ordering(cmp, format, Level::Level(level), lm.iter())
                .map_err(|e| self.annotate(e, format))?;
        }
        Ok(())
    }

    fn annotate(&self, err: Error, format: FormatKey) -> Error {
        match err {
            Error::Corruption(msg) => {
                Error::Corruption(format!("{}\n{}", msg, self.debug_string(format)))
            }
            other => other,
        }
    }

    /// Check that every file has a live backing that can hold it.
    pub fn validate_backings(&self) -> Result<()> {
        for (level, lm) in self.levels.iter().enumerate() {
            let mut iter = lm.iter();
            let mut cur = iter.first();
            while let Some(f) = cur {
                let Some(backing) = f.backing() else {
                    return Err(Error::corruption(format!(
                        "L{}.{} has no backing",
                        level, f.file_num
                    )));
                };
                if backing.refs() <= 0 {
                    return Err(Error::corruption(format!(
                        "L{}.{} backing {} has no references",
                        level, f.file_num, backing.disk_file_num
                    )));
                }
                if f.is_virtual && f.size > backing.size {
                    return Err(Error::corruption(format!(
                        "L{}.{} virtual size {} exceeds backing {} size {}",
                        level, f.file_num, f.size, backing.disk_file_num, backing.size
                    )));
                }
                cur = iter.next();
            }
        }
        Ok(())
    }

    fn to_string_with(&self, format: FormatKey, verbose: bool) -> String {
        let mut buf = String::new();
        if !self.l0_sublevel_files.is_empty() {
            buf.push_str(&describe_sublevels(format, verbose, &self.l0_sublevel_files));
        }
        for (level, lm) in self.levels.iter().enumerate().skip(1) {
            if lm.empty() {
                continue;
            }
            buf.push_str(&format!("{}:\n", level));
            lm.slice().each(|f| {
                buf.push_str(&format!("  {}\n", f.debug_string(format, verbose)));
            });
        }
        buf
    }

    /// Like `Display`, but including sequence numbers and typed bounds.
    pub fn debug_string(&self, format: FormatKey) -> String {
        self.to_string_with(format, true)
    }

    /// Parse the output of [`Version::debug_string`]. L0 files are listed from
    /// the newest sublevel down, so they are reversed back into age order.
    pub fn parse_debug(opts: &ManifestOptions, s: &str) -> Result<Version> {
        let mut level = 0;
        let mut files: [Vec<Arc<FileMetadata>>; NUM_LEVELS] = Default::default();
        for line in s.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let header = line
                .strip_suffix(':')
                .map(|h| h.strip_prefix("0.").map_or(h, |_| "0"));
            match header.and_then(|h| h.parse::<usize>().ok()) {
                Some(l) if l < NUM_LEVELS => level = l,
                Some(l) => {
                    return Err(Error::invalid_argument(format!("level {} out of range", l)))
                }
                None => files[level].push(Arc::new(FileMetadata::parse_debug(line)?)),
            }
        }
        files[0].reverse();
        Version::new_with_files(opts, files)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_with(default_format_key, false))
    }
}

impl fmt::Debug for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Version")
            .field("refs", &self.refs())
            .field("levels", &self.levels)
            .finish()
    }
}

/// Check that `files` are ordered as `level` requires.
///
/// L0 files (and L0 as a whole) must be in sequence number order. Several
/// files with a largest sequence number of zero may tie; such files come
/// from flushes that were assigned no sequence numbers. Every other level
/// must hold valid files with strictly increasing, non-overlapping key
/// ranges.
pub fn check_ordering(
    cmp: &dyn Comparator,
    format: FormatKey,
    level: Level,
    mut files: LevelIterator,
) -> Result<()> {
    let mut prev: Option<Arc<FileMetadata>> = None;
    let mut cur = files.first();
    if level == Level::Level(0) {
        while let Some(f) = cur {
            if let Some(p) = &prev {
                let zero_seq_tie = p.largest_seq_num == 0 && f.largest_seq_num == 0;
                if !zero_seq_tie && !p.less_seq_num(&f) {
                    return Err(Error::corruption(format!(
                        "L0 files {} and {} are not properly ordered: <#{}-#{}> vs <#{}-#{}>",
                        p.file_num,
                        f.file_num,
                        p.smallest_seq_num,
                        p.largest_seq_num,
                        f.smallest_seq_num,
                        f.largest_seq_num
                    )));
                }
            }
            prev = Some(f);
            cur = files.next();
        }
        return Ok(());
    }

    while let Some(f) = cur {
        f.validate(cmp, format)
            .map_err(|e| e.with_context(level.to_string()))?;
        if let Some(p) = &prev {
            if p.cmp_smallest_key(&f, cmp) != Ordering::Less {
                return Err(Error::corruption(format!(
                    "{} files {} and {} are not properly ordered: [{}-{}] vs [{}-{}]",
                    level,
                    p.file_num,
                    f.file_num,
                    p.smallest.pretty(format),
                    p.largest.pretty(format),
                    f.smallest.pretty(format),
                    f.largest.pretty(format)
                )));
            }
            if crate::types::InternalKey::compare(cmp, &p.largest, &f.smallest) != Ordering::Less {
                return Err(Error::corruption(format!(
                    "{} files {} and {} have overlapping ranges: [{}-{}] vs [{}-{}]",
                    level,
                    p.file_num,
                    f.file_num,
                    p.smallest.pretty(format),
                    p.largest.pretty(format),
                    f.smallest.pretty(format),
                    f.largest.pretty(format)
                )));
            }
        }
        prev = Some(f);
        cur = files.next();
    }
    Ok(())
}

struct Slot {
    prev: usize,
    next: usize,
    version: Option<Arc<Version>>,
}

struct ListState {
    /// `slots[0]` is the sentinel; the ring runs oldest to newest from it.
    slots: Vec<Slot>,
    free: Vec<usize>,
}

struct ListLink {
    list: Weak<Mutex<ListState>>,
    slot: usize,
}

impl ListLink {
    /// Remove the slot from its ring, returning the list's handle on the
    /// version so the caller can drop it outside the lock.
    fn unlink(self) -> Option<Arc<Version>> {
        let state = self.list.upgrade()?;
        let mut state = state.lock();
        state.unlink(self.slot)
    }
}

impl ListState {
    fn unlink(&mut self, slot: usize) -> Option<Arc<Version>> {
        let (prev, next) = (self.slots[slot].prev, self.slots[slot].next);
        self.slots[prev].next = next;
        self.slots[next].prev = prev;
        self.free.push(slot);
        self.slots[slot].version.take()
    }
}

/// The live versions of a database, oldest first.
///
/// Cloning the handle shares the list.
#[derive(Clone)]
pub struct VersionList {
    state: Arc<Mutex<ListState>>,
}

impl Default for VersionList {
    fn default() -> Self {
        Self::new()
    }
}

impl VersionList {
    pub fn new() -> Self {
        let root = Slot {
            prev: 0,
            next: 0,
            version: None,
        };
        Self {
            state: Arc::new(Mutex::new(ListState {
                slots: vec![root],
                free: Vec::new(),
            })),
        }
    }

    pub fn empty(&self) -> bool {
        self.state.lock().slots[0].next == 0
    }

    /// The oldest version.
    pub fn front(&self) -> Option<Arc<Version>> {
        let state = self.state.lock();
        state.slots[state.slots[0].next].version.clone()
    }

    /// The newest version.
    pub fn back(&self) -> Option<Arc<Version>> {
        let state = self.state.lock();
        state.slots[state.slots[0].prev].version.clone()
    }

    /// Every version, oldest first.
    pub fn versions(&self) -> Vec<Arc<Version>> {
        let state = self.state.lock();
        let mut out = Vec::new();
        let mut i = state.slots[0].next;
        while i != 0 {
            if let Some(v) = &state.slots[i].version {
                out.push(v.clone());
            }
            i = state.slots[i].next;
        }
        out
    }

    /// Append `v` as the newest version. The previous newest version drops
    /// its L0 sublevel organization, which only the newest version needs.
    ///
    /// # Panics
    ///
    /// Panics if `v` is already in a list.
    pub fn push_back(&self, v: &Arc<Version>) {
        let mut link = v.link.lock();
        if link.is_some() {
            panic!("version list is inconsistent");
        }
        let mut state = self.state.lock();
        let last = state.slots[0].prev;
        let entry = Slot {
            prev: last,
            next: 0,
            version: Some(v.clone()),
        };
        let slot = match state.free.pop() {
            Some(i) => {
                state.slots[i] = entry;
                i
            }
            None => {
                state.slots.push(entry);
                state.slots.len() - 1
            }
        };
        state.slots[last].next = slot;
        state.slots[0].prev = slot;
        if let Some(prev) = &state.slots[last].version {
            prev.l0_sublevels.lock().take();
        }
        *link = Some(ListLink {
            list: Arc::downgrade(&self.state),
            slot,
        });
    }

    /// Remove `v` from the list.
    ///
    /// # Panics
    ///
    /// Panics if `v` is not in this list.
    pub fn remove(&self, v: &Version) {
        let link = v.link.lock().take();
        let unlinked = match link {
            Some(link)
                if link
                    .list
                    .upgrade()
                    .map_or(false, |l| Arc::ptr_eq(&l, &self.state)) =>
            {
                if link.slot == 0 {
                    panic!("cannot remove version list root node");
                }
                self.state.lock().unlink(link.slot)
            }
            _ => panic!("version list is inconsistent"),
        };
        drop(unlinked);
    }
}

impl fmt::Debug for VersionList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.versions().iter().map(|v| v.refs())).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FileNum, InternalKey, KeyKind};
    use crate::util::comparator::BytewiseComparator;
    use std::sync::atomic::AtomicUsize;

    fn file(num: u64, smallest: &'static str, largest: &'static str, seq: u64) -> Arc<FileMetadata> {
        let mut m = FileMetadata::new(FileNum(num), 10).with_seq_nums(seq, seq);
        m.extend_point_key_bounds(
            &BytewiseComparator::new(),
            InternalKey::new(smallest, seq, KeyKind::Set),
            InternalKey::new(largest, seq, KeyKind::Set),
        );
        m.init_physical_backing();
        Arc::new(m)
    }

    fn version_with(level: usize, files: Vec<Arc<FileMetadata>>) -> Version {
        let mut all: [Vec<Arc<FileMetadata>>; NUM_LEVELS] = Default::default();
        all[level] = files;
        Version::new_with_files(&ManifestOptions::default(), all).unwrap()
    }

    #[test]
    fn test_overlaps_l1() {
        let v = version_with(
            1,
            vec![file(1, "a", "c", 1), file(2, "d", "f", 2), file(3, "g", "i", 3)],
        );
        let c = BytewiseComparator::new();
        let nums = |s: LevelSlice| s.files().iter().map(|f| f.file_num.0).collect::<Vec<_>>();
        assert_eq!(nums(v.overlaps(1, &c, b"b", b"e", false).unwrap()), vec![1, 2]);
        assert_eq!(nums(v.overlaps(1, &c, b"c", b"d", true).unwrap()), vec![1]);
        assert_eq!(nums(v.overlaps(1, &c, b"j", b"k", false).unwrap()), Vec::<u64>::new());
    }

    #[test]
    fn test_overlaps_l0_expands() {
        let v = version_with(
            0,
            vec![
                file(1, "a", "c", 1),
                file(2, "b", "e", 2),
                file(3, "e", "g", 3),
                file(4, "x", "z", 4),
            ],
        );
        let c = BytewiseComparator::new();
        let slice = v.overlaps(0, &c, b"a", b"a", false).unwrap();
        let nums: Vec<u64> = slice.files().iter().map(|f| f.file_num.0).collect();
        // a hits 1; 1 widens to c, which hits 2; 2 widens to e, which hits 3.
        assert_eq!(nums, vec![1, 2, 3]);
        // The overlap set holds no references of its own.
        assert_eq!(v.level(0).slice().files()[0].refs(), 1);
    }

    #[test]
    fn test_overlaps_l0_collision_is_an_error() {
        let v = version_with(0, vec![file(1, "a", "c", 1), file(2, "b", "e", 2)]);
        let c = BytewiseComparator::new();
        let slice = v.overlaps(0, &c, b"d", b"d", false).unwrap();
        assert_eq!(slice.len(), 1);
        assert_eq!(v.overlaps(0, &c, b"x", b"z", false).unwrap().len(), 0);

        // The overlap set is built with the same seqnum ordering, and a
        // collision there surfaces as an error rather than a panic.
        let dup = file(1, "a", "c", 1);
        let err = LevelSlice::seq_sorted(&[dup.clone(), dup]).unwrap_err();
        assert_eq!(err, Error::KeyCollision { a: FileNum(1), b: FileNum(1) });
        assert_eq!(v.level(0).size(), 20);
    }

    #[test]
    fn test_contains() {
        let files = vec![file(1, "a", "c", 1), file(2, "d", "f", 2)];
        let v = version_with(2, files.clone());
        let c = BytewiseComparator::new();
        assert!(v.contains(2, &c, &files[1]));
        assert!(!v.contains(2, &c, &file(2, "d", "f", 2)));
        assert!(!v.contains(3, &c, &files[1]));
    }

    #[test]
    fn test_check_ordering_l1_overlap() {
        let v = version_with(1, vec![file(1, "a", "d", 1), file(2, "c", "f", 2)]);
        let err = v
            .check_ordering(&BytewiseComparator::new(), default_format_key)
            .unwrap_err();
        assert!(
            err.to_string().contains("L1 files 000001 and 000002 have overlapping ranges"),
            "{}",
            err
        );
    }

    #[test]
    fn test_check_ordering_l1_unsorted() {
        let v = version_with(1, vec![file(2, "d", "f", 2), file(1, "a", "b", 1)]);
        let err = v
            .check_ordering(&BytewiseComparator::new(), default_format_key)
            .unwrap_err();
        assert!(err.to_string().contains("not properly ordered"), "{}", err);
    }

    #[test]
    fn test_check_ordering_l0() {
        let ok = version_with(0, vec![file(1, "a", "z", 1), file(2, "a", "z", 2)]);
        assert!(ok
            .check_ordering(&BytewiseComparator::new(), default_format_key)
            .is_ok());

        let zero_ties = version_with(0, vec![file(1, "a", "b", 0), file(2, "c", "d", 0)]);
        assert!(zero_ties
            .check_ordering(&BytewiseComparator::new(), default_format_key)
            .is_ok());

        let files = vec![file(2, "a", "b", 5), file(1, "c", "d", 3)];
        let err = check_ordering(
            &BytewiseComparator::new(),
            default_format_key,
            Level::Level(0),
            LevelSlice::specific_order(&files).unwrap().iter(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("L0 files 000002 and 000001"), "{}", err);
    }

    #[test]
    fn test_debug_string_round_trip() {
        let opts = ManifestOptions::default();
        let v = Version::parse_debug(
            &opts,
            "0.1:\n  000003:[b#5,SET-d#5,SET]\n0.0:\n  000002:[a#4,SET-c#4,SET]\n\
             2:\n  000004:[m#1,SET-p#1,SET]\n",
        )
        .unwrap();
        assert_eq!(v.level(0).len(), 2);
        assert_eq!(v.l0_sublevel_files().len(), 2);
        assert_eq!(
            v.to_string(),
            "0.1:\n  000003:[b#5,SET-d#5,SET]\n0.0:\n  000002:[a#4,SET-c#4,SET]\n\
             2:\n  000004:[m#1,SET-p#1,SET]\n"
        );
        let again = Version::parse_debug(&opts, &v.debug_string(default_format_key)).unwrap();
        assert_eq!(again.debug_string(default_format_key), v.debug_string(default_format_key));
    }

    #[test]
    fn test_release_runs_deleted_callback() {
        let files = vec![file(1, "a", "b", 1), file(2, "c", "d", 2)];
        let mut v = version_with(1, files.clone());
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        v.set_deleted_callback(Box::new(move |obsolete| {
            counter.fetch_add(obsolete.len(), AtomicOrdering::SeqCst);
        }));
        let v = Arc::new(v);
        let list = VersionList::new();
        v.add_ref();
        list.push_back(&v);
        v.add_ref();
        v.release_ref();
        assert_eq!(seen.load(AtomicOrdering::SeqCst), 0);
        v.release_ref();
        assert_eq!(seen.load(AtomicOrdering::SeqCst), 2);
        assert!(list.empty());
        assert!(files.iter().all(|f| f.refs() == 0));
    }

    #[test]
    #[should_panic(expected = "refcount went negative")]
    fn test_double_release_panics() {
        let v = Version::new(&ManifestOptions::default());
        v.add_ref();
        v.release_ref();
        v.release_ref();
    }

    #[test]
    fn test_version_list() {
        let opts = ManifestOptions::default();
        let list = VersionList::new();
        assert!(list.empty());
        assert!(list.front().is_none());

        let mut v1 = Version::new(&opts);
        v1.init_l0_sublevels(opts.comparer.clone(), opts.format_key, 0)
            .unwrap();
        let v1 = Arc::new(v1);
        let v2 = Arc::new(Version::new(&opts));
        let v3 = Arc::new(Version::new(&opts));
        list.push_back(&v1);
        assert!(v1.l0_sublevels().is_some());
        list.push_back(&v2);
        // Only the newest version keeps its sublevels.
        assert!(v1.l0_sublevels().is_none());
        list.push_back(&v3);

        assert!(Arc::ptr_eq(&list.front().unwrap(), &v1));
        assert!(Arc::ptr_eq(&list.back().unwrap(), &v3));
        assert!(Arc::ptr_eq(&v1.next().unwrap(), &v2));
        assert!(Arc::ptr_eq(&v3.prev().unwrap(), &v2));
        assert!(v3.next().is_none());

        list.remove(&v2);
        assert!(Arc::ptr_eq(&v1.next().unwrap(), &v3));
        assert_eq!(list.versions().len(), 2);

        // Freed slots are reused.
        let v4 = Arc::new(Version::new(&opts));
        list.push_back(&v4);
        assert!(Arc::ptr_eq(&list.back().unwrap(), &v4));
        assert!(Arc::ptr_eq(&v3.next().unwrap(), &v4));
    }

    #[test]
    #[should_panic(expected = "version list is inconsistent")]
    fn test_push_back_twice_panics() {
        let list = VersionList::new();
        let v = Arc::new(Version::new(&ManifestOptions::default()));
        list.push_back(&v);
        list.push_back(&v);
    }

    #[test]
    #[should_panic(expected = "version list is inconsistent")]
    fn test_remove_from_foreign_list_panics() {
        let a = VersionList::new();
        let b = VersionList::new();
        let v = Arc::new(Version::new(&ManifestOptions::default()));
        a.push_back(&v);
        b.remove(&v);
    }

    #[test]
    fn test_validate_backings() {
        let v = version_with(3, vec![file(1, "a", "b", 1)]);
        assert!(v.validate_backings().is_ok());
    }
}
