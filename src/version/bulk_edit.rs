//! BulkVersionEdit - several edits folded together and applied at once.
//!
//! Replay accumulates every record of a manifest into one bulk edit and
//! applies it to an empty version. Installing a single edit accumulates just
//! that edit and applies it to the current version.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::options::{ManifestOptions, NUM_LEVELS};
use crate::types::{DiskFileNum, FileNum, InternalKey};
use crate::version::file_metadata::{FileBacking, FileMetadata};
use crate::version::l0_sublevels::L0Sublevels;
use crate::version::level_metadata::{overlaps, LevelMetadata};
use crate::version::version::{check_ordering, Version};
use crate::version::version_edit::VersionEdit;
use crate::version::{Level, INVARIANTS};

/// Backings no longer referenced by the latest version, with their sizes.
/// Older versions may still use them.
pub type ZombieTables = HashMap<DiskFileNum, u64>;

/// The files added and deleted by a sequence of edits.
///
/// No file is added to, or removed from, a level more than once, and a
/// file removed from a level must have been added to it earlier. A file may
/// be deleted from one level and added to another in the same edit.
#[derive(Debug, Default)]
pub struct BulkVersionEdit {
    pub added: [HashMap<FileNum, Arc<FileMetadata>>; NUM_LEVELS],
    pub deleted: [HashMap<FileNum, Arc<FileMetadata>>; NUM_LEVELS],

    /// Backings created by the accumulated edits, used to attach decoded
    /// virtual sstables to their backing.
    pub added_file_backing: HashMap<DiskFileNum, Arc<FileBacking>>,
    pub removed_file_backing: Vec<DiskFileNum>,

    /// Every added file by number. Decoded deletions carry only a file
    /// number, so replay must track this to resolve them.
    pub added_by_file_num: Option<HashMap<FileNum, Arc<FileMetadata>>>,

    /// Net change in the number of files marked for compaction.
    pub marked_for_compaction_count_diff: i64,
}

impl BulkVersionEdit {
    /// A bulk edit for in-memory edits, whose deletions carry metadata.
    pub fn new() -> Self {
        Self::default()
    }

    /// A bulk edit for replaying decoded manifest records.
    pub fn for_replay() -> Self {
        Self {
            added_by_file_num: Some(HashMap::new()),
            ..Self::default()
        }
    }

    /// Fold `ve` into the bulk edit.
    ///
    /// A file added and then deleted from the same level cancels out. A file
    /// deleted from a level it was not added to by these edits stays in
    /// `deleted`, since applying the bulk edit must drop it from the base
    /// version.
    pub fn accumulate(&mut self, ve: &VersionEdit) -> Result<()> {
        for (entry, meta) in &ve.deleted_files {
            let m = match meta {
                Some(m) => m.clone(),
                None => {
                    let by_num = self.added_by_file_num.as_ref().ok_or_else(|| {
                        Error::invalid_argument(format!(
                            "deleted file L{}.{}'s metadata is absent and added files are not tracked",
                            entry.level, entry.file_num
                        ))
                    })?;
                    by_num.get(&entry.file_num).cloned().ok_or_else(|| {
                        Error::corruption(format!(
                            "file deleted L{}.{} before it was inserted",
                            entry.level, entry.file_num
                        ))
                    })?
                }
            };
            if m.marked_for_compaction() {
                self.marked_for_compaction_count_diff -= 1;
            }
            if self.added[entry.level].remove(&entry.file_num).is_none() {
                self.deleted[entry.level].insert(entry.file_num, m);
            }
        }

        // Backings first: the new files below may need them.
        for backing in &ve.created_backing_tables {
            if self.added_file_backing.contains_key(&backing.disk_file_num) {
                return Err(Error::corruption(format!(
                    "duplicate file backing {}",
                    backing.disk_file_num
                )));
            }
            self.added_file_backing
                .insert(backing.disk_file_num, backing.clone());
        }

        for nf in &ve.new_files {
            let meta = &nf.meta;
            if self.deleted[nf.level].contains_key(&meta.file_num) {
                return Err(Error::corruption(format!(
                    "file deleted L{}.{} before it was inserted",
                    nf.level, meta.file_num
                )));
            }
            if meta.backing().is_none() {
                if !meta.is_virtual {
                    return Err(Error::invalid_argument(format!(
                        "added file L{}.{} has no backing",
                        nf.level, meta.file_num
                    )));
                }
                let backing = nf
                    .backing_file_num
                    .and_then(|dfn| self.added_file_backing.get(&dfn))
                    .ok_or_else(|| {
                        Error::corruption(format!(
                            "backing of virtual sstable L{}.{} was never created",
                            nf.level, meta.file_num
                        ))
                    })?;
                meta.set_backing(backing.clone());
            }

            self.added[nf.level].insert(meta.file_num, meta.clone());
            if let Some(by_num) = &mut self.added_by_file_num {
                by_num.insert(meta.file_num, meta.clone());
            }
            if meta.marked_for_compaction() {
                self.marked_for_compaction_count_diff += 1;
            }
        }

        // A backing is removed in exactly one edit.
        self.removed_file_backing
            .extend(ve.removed_backing_tables.iter().copied());
        Ok(())
    }

    /// Apply the bulk edit to `curr` (an empty version when `None`),
    /// producing a new version.
    ///
    /// When `zombies` is given it is updated with the backings the new
    /// version no longer references. Either the whole edit applies or none
    /// of it does: on error the partially built version is released and
    /// reference counts are restored.
    pub fn apply(
        &self,
        curr: Option<&Version>,
        opts: &ManifestOptions,
        zombies: Option<&mut ZombieTables>,
    ) -> Result<Version> {
        let cmp = &opts.comparer;
        let marked = curr.map_or(0, |c| c.stats.marked_for_compaction as i64)
            + self.marked_for_compaction_count_diff;
        if marked < 0 {
            return Err(Error::corruption(
                "version marked for compaction count negative",
            ));
        }

        let mut levels: [LevelMetadata; NUM_LEVELS] = std::array::from_fn(|l| match curr {
            Some(c) => c.levels[l].clone(),
            None => LevelMetadata::new(cmp, l),
        });
        let mut range_key_levels: [LevelMetadata; NUM_LEVELS] =
            std::array::from_fn(|l| match curr {
                Some(c) => c.range_key_levels[l].clone(),
                None => LevelMetadata::new(cmp, l),
            });

        let mut undo = Undo::default();
        match self.apply_levels(curr, opts, &mut levels, &mut range_key_levels, &mut undo) {
            Ok(l0_sublevels) => {
                if let Some(zombies) = zombies {
                    undo.commit_zombies(zombies);
                }
                let mut v = Version::with_levels(levels, range_key_levels);
                v.stats.marked_for_compaction = marked as usize;
                v.set_l0_sublevels(l0_sublevels);
                Ok(v)
            }
            Err(e) => {
                warn!(error = %e, "aborted version edit");
                undo.revert();
                for lm in levels.iter_mut().chain(range_key_levels.iter_mut()) {
                    lm.release();
                }
                Err(e)
            }
        }
    }

    fn apply_levels(
        &self,
        curr: Option<&Version>,
        opts: &ManifestOptions,
        levels: &mut [LevelMetadata; NUM_LEVELS],
        range_key_levels: &mut [LevelMetadata; NUM_LEVELS],
        undo: &mut Undo,
    ) -> Result<Arc<L0Sublevels>> {
        let cmp = &opts.comparer;
        let rebuild_l0 = |l0: &LevelMetadata| {
            L0Sublevels::new(l0, cmp.clone(), opts.format_key, opts.flush_split_bytes)
                .map_err(|e| e.with_context("internal error"))
        };
        let mut l0_sublevels = None;

        for level in 0..NUM_LEVELS {
            let added_map = &self.added[level];
            let deleted_map = &self.deleted[level];
            if added_map.is_empty() && deleted_map.is_empty() {
                if level == 0 {
                    l0_sublevels = Some(match curr.and_then(Version::l0_sublevels) {
                        Some(s) => s,
                        None => Arc::new(rebuild_l0(&levels[0])?),
                    });
                }
                continue;
            }

            if levels[level].len() + added_map.len() == 0 {
                return Err(Error::corruption(format!(
                    "internal error: no current or added files but have deleted files: {}",
                    deleted_map.len()
                )));
            }

            let mut deleted: Vec<&Arc<FileMetadata>> = deleted_map.values().collect();
            deleted.sort_by_key(|f| f.file_num);
            for f in deleted {
                // The level was cloned from a version that still holds the
                // file, so removal never drops its last reference.
                match levels[level].remove(f) {
                    None => {
                        return Err(Error::corruption(format!(
                            "file L{}.{} not present in level",
                            level, f.file_num
                        )))
                    }
                    Some(true) => {
                        return Err(Error::corruption(format!(
                            "internal error: file L{}.{} obsolete during B-Tree removal",
                            level, f.file_num
                        )))
                    }
                    Some(false) => {}
                }
                if f.has_range_keys && range_key_levels[level].remove(f) != Some(false) {
                    return Err(Error::corruption(format!(
                        "internal error: file L{}.{} missing or obsolete during range-key B-Tree removal",
                        level, f.file_num
                    )));
                }
                if f.latest_refs() <= 0 {
                    return Err(Error::corruption(format!(
                        "internal error: incorrect latest reference count for file L{}.{}",
                        level, f.file_num
                    )));
                }
                undo.latest_unrefs.push(f.clone());
                if f.release_latest_ref() == 0 {
                    if let Some(b) = f.backing() {
                        undo.zombies.push(ZombieOp::Add(b.disk_file_num, b.size));
                    }
                }
            }

            // File number order keeps error output deterministic.
            let mut added: Vec<&Arc<FileMetadata>> = added_map.values().collect();
            added.sort_by_key(|f| f.file_num);
            let mut smallest: Option<&Arc<FileMetadata>> = None;
            let mut largest: Option<&Arc<FileMetadata>> = None;
            for &f in &added {
                f.set_allowed_seeks(opts.allowed_seeks(f.size));
                levels[level].insert(f.clone())?;
                f.add_latest_ref();
                undo.latest_refs.push(f.clone());
                if f.has_range_keys {
                    range_key_levels[level].insert(f.clone())?;
                }
                if let Some(b) = f.backing() {
                    undo.zombies.push(ZombieOp::Remove(b.disk_file_num));
                }

                if smallest.map_or(true, |s| {
                    InternalKey::compare(cmp.as_ref(), &s.smallest, &f.smallest) == Ordering::Greater
                }) {
                    smallest = Some(f);
                }
                if largest.map_or(true, |l| {
                    InternalKey::compare(cmp.as_ref(), &l.largest, &f.largest) == Ordering::Less
                }) {
                    largest = Some(f);
                }
            }

            if level == 0 {
                let sublevels = match curr.and_then(Version::l0_sublevels) {
                    // Flushes and ingests only add newer files, so the
                    // previous organization can usually be extended.
                    Some(prev) if deleted_map.is_empty() => {
                        let files: Vec<Arc<FileMetadata>> =
                            added.iter().map(|f| Arc::clone(f)).collect();
                        match prev.add_l0_files(&files, opts.flush_split_bytes) {
                            Ok(s) => {
                                if INVARIANTS {
                                    match L0Sublevels::new(
                                        &levels[0],
                                        cmp.clone(),
                                        opts.format_key,
                                        opts.flush_split_bytes,
                                    ) {
                                        Ok(full) => s.cross_check(&full),
                                        Err(e) => panic!("error when regenerating sublevels: {}", e),
                                    }
                                }
                                s
                            }
                            Err(Error::InvalidL0SublevelsOpt) => {
                                debug!(added = files.len(), "rebuilding L0 sublevels");
                                rebuild_l0(&levels[0])?
                            }
                            Err(e) => return Err(e.with_context("internal error")),
                        }
                    }
                    _ => rebuild_l0(&levels[0])?,
                };
                l0_sublevels = Some(Arc::new(sublevels));
                check_ordering(cmp.as_ref(), opts.format_key, Level::Level(0), levels[0].iter())?;
                continue;
            }

            // Check the edited span along with one neighbour on each side.
            if let (Some(sm), Some(la)) = (smallest, largest) {
                let overlap = overlaps(
                    &levels[level].iter(),
                    cmp.as_ref(),
                    &sm.smallest.user_key,
                    &la.largest.user_key,
                    la.largest.is_exclusive_sentinel(),
                );
                let check = overlap.reslice(|start, end| {
                    if start.prev().is_none() {
                        start.next();
                    }
                    if end.next().is_none() {
                        end.prev();
                    }
                });
                check_ordering(cmp.as_ref(), opts.format_key, Level::Level(level), check.iter())?;
            }
        }

        l0_sublevels.ok_or_else(|| Error::internal("L0 sublevels were not initialized"))
    }
}

/// Accumulate the single edit `ve` and apply it to `curr`.
///
/// Compactions cannot know which backings their edit leaves unreferenced,
/// so `ve` arrives without removed backings and this fills them in: every
/// zombie that `backing_state` tracks (the backings created for virtual
/// sstables and still in use) becomes a removed backing of `ve`.
///
/// # Panics
///
/// Panics if `ve` already lists removed backings.
pub fn accumulate_incomplete_and_apply_single_ve(
    ve: &mut VersionEdit,
    curr: Option<&Version>,
    opts: &ManifestOptions,
    backing_state: &mut HashMap<DiskFileNum, Arc<FileBacking>>,
) -> Result<(Version, ZombieTables)> {
    if !ve.removed_backing_tables.is_empty() {
        panic!("invalid incomplete version edit");
    }
    let mut b = BulkVersionEdit::new();
    b.accumulate(ve)?;
    let mut zombies = ZombieTables::new();
    let v = b.apply(curr, opts, Some(&mut zombies))?;

    for backing in b.added_file_backing.values() {
        backing_state.insert(backing.disk_file_num, backing.clone());
    }
    let mut removed: Vec<DiskFileNum> = zombies
        .keys()
        .copied()
        .filter(|dfn| backing_state.remove(dfn).is_some())
        .collect();
    removed.sort();
    ve.removed_backing_tables = removed;

    Ok((v, zombies))
}

enum ZombieOp {
    Add(DiskFileNum, u64),
    Remove(DiskFileNum),
}

/// Side effects of an apply that live outside the new version.
#[derive(Default)]
struct Undo {
    latest_refs: Vec<Arc<FileMetadata>>,
    latest_unrefs: Vec<Arc<FileMetadata>>,
    zombies: Vec<ZombieOp>,
}

impl Undo {
    fn commit_zombies(self, zombies: &mut ZombieTables) {
        for op in self.zombies {
            match op {
                ZombieOp::Add(dfn, size) => {
                    zombies.insert(dfn, size);
                }
                ZombieOp::Remove(dfn) => {
                    zombies.remove(&dfn);
                }
            }
        }
    }

    fn revert(self) {
        for f in self.latest_refs {
            f.release_latest_ref();
        }
        for f in self.latest_unrefs {
            f.add_latest_ref();
        }
    }
}
