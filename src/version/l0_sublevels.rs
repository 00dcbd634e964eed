//! Organization of L0 into non-overlapping sublevels.
//!
//! L0 files may overlap one another. Sublevels restore a leveled view: every
//! file is placed one sublevel above the highest sublevel holding an older
//! file it overlaps, so within a sublevel no two files overlap, and a newer
//! overlapping file always sits in a higher sublevel.
//!
//! ```text
//! L0.2:          [f-----h]
//! L0.1:     [c------g]
//! L0.0:  [a----d]        [i--k]
//! ```
//!
//! Placement is the plain rule above and nothing more: files are visited in
//! seqnum order and each goes one sublevel above the highest overlapping
//! sublevel. No interval structure is kept, so there is no per-interval
//! compaction picking state. Flush split keys are the smallest keys at which
//! the size accumulated by walking the files in smallest-key order reaches
//! the configured split size.
//!
//! A file's sublevel depends only on older files, so appending newer files
//! (a flush or an ingest) never moves existing files. That lets
//! [`L0Sublevels::add_l0_files`] extend a previous organization instead of
//! rebuilding it.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::types::{FileNum, FormatKey};
use crate::util::comparator::Comparator;
use crate::version::file_metadata::{sort_by_seq_num, FileMetadata};
use crate::version::level_metadata::{LevelMetadata, LevelSlice};

/// L0 files grouped into sublevels. Sublevel 0 holds the oldest data.
pub struct L0Sublevels {
    /// One key-ordered slice per sublevel, oldest first.
    pub levels: Vec<LevelSlice>,
    level_files: Vec<Vec<Arc<FileMetadata>>>,
    /// Every L0 file in sequence number order.
    files: Vec<Arc<FileMetadata>>,
    sublevel_of: HashMap<FileNum, usize>,
    flush_split_user_keys: Vec<Bytes>,
    cmp: Arc<dyn Comparator>,
    format_key: FormatKey,
}

impl L0Sublevels {
    /// Organize the files of `level` (which must be L0) into sublevels.
    pub fn new(
        level: &LevelMetadata,
        cmp: Arc<dyn Comparator>,
        format_key: FormatKey,
        flush_split_bytes: i64,
    ) -> Result<Self> {
        let mut s = Self {
            levels: Vec::new(),
            level_files: Vec::new(),
            files: Vec::with_capacity(level.len()),
            sublevel_of: HashMap::with_capacity(level.len()),
            flush_split_user_keys: Vec::new(),
            cmp,
            format_key,
        };
        let mut files = level.slice().files();
        sort_by_seq_num(&mut files);
        for f in files {
            s.place(f)?;
        }
        s.finish(flush_split_bytes)?;
        Ok(s)
    }

    /// Extend this organization with `files`, which must all be newer than
    /// every file already present. Returns
    /// [`Error::InvalidL0SublevelsOpt`] when that does not hold and a full
    /// rebuild is required.
    pub fn add_l0_files(&self, files: &[Arc<FileMetadata>], flush_split_bytes: i64) -> Result<Self> {
        let mut added = files.to_vec();
        sort_by_seq_num(&mut added);
        if let (Some(newest), Some(first)) = (self.files.last(), added.first()) {
            if !newest.less_seq_num(first) {
                return Err(Error::InvalidL0SublevelsOpt);
            }
        }

        let mut s = Self {
            levels: Vec::new(),
            level_files: self.level_files.clone(),
            files: self.files.clone(),
            sublevel_of: self.sublevel_of.clone(),
            flush_split_user_keys: Vec::new(),
            cmp: self.cmp.clone(),
            format_key: self.format_key,
        };
        for f in added {
            s.place(f)?;
        }
        s.finish(flush_split_bytes)?;
        Ok(s)
    }

    /// Put `f` one sublevel above the highest sublevel it overlaps. Files
    /// must arrive in sequence number order.
    fn place(&mut self, f: Arc<FileMetadata>) -> Result<()> {
        if let Some(prev) = self.files.last() {
            if f.cmp_seq_num(prev) != Ordering::Greater {
                return Err(Error::corruption(format!(
                    "L0 files {} and {} are not properly ordered",
                    prev.file_num, f.file_num
                )));
            }
        }
        let mut sublevel = 0;
        for (i, level) in self.level_files.iter().enumerate().rev() {
            if overlapping_index(self.cmp.as_ref(), level, &f).is_some() {
                sublevel = i + 1;
                break;
            }
        }
        if sublevel == self.level_files.len() {
            self.level_files.push(Vec::new());
        }
        let level = &mut self.level_files[sublevel];
        let cmp = self.cmp.as_ref();
        let pos = level.partition_point(|g| g.cmp_smallest_key(&f, cmp) == Ordering::Less);
        level.insert(pos, f.clone());
        self.sublevel_of.insert(f.file_num, sublevel);
        self.files.push(f);
        Ok(())
    }

    fn finish(&mut self, flush_split_bytes: i64) -> Result<()> {
        self.levels = self
            .level_files
            .iter()
            .map(|files| LevelSlice::key_sorted(&self.cmp, files))
            .collect::<Result<_>>()?;
        self.flush_split_user_keys = self.compute_flush_split_keys(flush_split_bytes);
        Ok(())
    }

    fn compute_flush_split_keys(&self, flush_split_bytes: i64) -> Vec<Bytes> {
        let mut keys = Vec::new();
        if flush_split_bytes <= 0 || self.files.is_empty() {
            return keys;
        }
        let cmp = self.cmp.as_ref();
        let mut by_key: Vec<&Arc<FileMetadata>> = self.files.iter().collect();
        by_key.sort_by(|a, b| cmp.compare(&a.smallest.user_key, &b.smallest.user_key));

        let mut cumulative: u64 = 0;
        for f in by_key {
            if cumulative >= flush_split_bytes as u64 {
                let key = &f.smallest.user_key;
                let distinct = keys
                    .last()
                    .map_or(true, |last: &Bytes| cmp.compare(last, key) == Ordering::Less);
                if distinct {
                    keys.push(key.clone());
                    cumulative = 0;
                }
            }
            cumulative += f.size;
        }
        keys
    }

    /// Number of sublevels.
    pub fn num_sublevels(&self) -> usize {
        self.levels.len()
    }

    /// Sublevel holding the file with `file_num`, if it is in L0.
    pub fn sublevel(&self, file_num: FileNum) -> Option<usize> {
        self.sublevel_of.get(&file_num).copied()
    }

    /// The largest number of L0 files any single user key may have to be
    /// read from.
    pub fn read_amplification(&self) -> usize {
        let cmp = self.cmp.as_ref();
        let mut points: Vec<&Bytes> = self
            .files
            .iter()
            .flat_map(|f| [&f.smallest.user_key, &f.largest.user_key])
            .collect();
        points.sort_by(|a, b| cmp.compare(&a[..], &b[..]));
        points.dedup_by(|a, b| cmp.compare(&a[..], &b[..]) == Ordering::Equal);

        points
            .into_iter()
            .map(|k| {
                self.files
                    .iter()
                    .filter(|f| f.overlaps(cmp, k, k, false))
                    .count()
            })
            .max()
            .unwrap_or(0)
    }

    /// User keys at which a flush should split its output so each L0 file
    /// covers roughly `flush_split_bytes` of existing L0 data.
    pub fn flush_split_keys(&self) -> &[Bytes] {
        &self.flush_split_user_keys
    }

    /// Sublevels from newest to oldest, one file per line.
    pub fn describe(&self, verbose: bool) -> String {
        describe_sublevels(self.format_key, verbose, &self.levels)
    }

    /// Panic if `other` organizes the same files differently. Used to check
    /// incremental updates against full rebuilds.
    pub(crate) fn cross_check(&self, other: &L0Sublevels) {
        if self.sublevel_of != other.sublevel_of {
            panic!(
                "incremental L0 sublevel organization differs from full rebuild:\n{}\nvs\n{}",
                self.describe(false),
                other.describe(false)
            );
        }
        if self.flush_split_user_keys != other.flush_split_user_keys {
            panic!(
                "incremental L0 flush split keys differ from full rebuild: {:?} vs {:?}",
                self.flush_split_user_keys, other.flush_split_user_keys
            );
        }
    }
}

/// Render sublevels from newest to oldest, as `0.N:` headers followed by
/// indented files.
pub(crate) fn describe_sublevels(format: FormatKey, verbose: bool, sublevels: &[LevelSlice]) -> String {
    let mut buf = String::new();
    for (sublevel, slice) in sublevels.iter().enumerate().rev() {
        let _ = writeln!(buf, "0.{}:", sublevel);
        slice.each(|f| {
            let _ = writeln!(buf, "  {}", f.debug_string(format, verbose));
        });
    }
    buf
}

/// Index of a file in the key-ordered, non-overlapping `level` that
/// overlaps `f`.
fn overlapping_index(cmp: &dyn Comparator, level: &[Arc<FileMetadata>], f: &FileMetadata) -> Option<usize> {
    let start = &f.smallest.user_key;
    let end = &f.largest.user_key;
    let exclusive_end = f.largest.is_exclusive_sentinel();
    // First file that does not end before `start`.
    let i = level.partition_point(|g| {
        let c = cmp.compare(&g.largest.user_key, start);
        c == Ordering::Less || (c == Ordering::Equal && g.largest.is_exclusive_sentinel())
    });
    let g = level.get(i)?;
    g.overlaps(cmp, start, end, exclusive_end).then_some(i)
}
