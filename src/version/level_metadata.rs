//! Per-level file sets and the views used to walk them.
//!
//! A [`LevelMetadata`] wraps one B-tree. A [`LevelSlice`] is an immutable,
//! optionally bounded view of such a tree, and a [`LevelIterator`] walks a
//! slice, optionally skipping files that lack a given [`KeyType`].
//!
//! Bounds are inclusive and expressed as positions in the underlying tree.
//! A bounded view behaves exactly like an unbounded view of a tree holding
//! only the files inside the bounds.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::types::InternalKey;
use crate::util::comparator::Comparator;
use crate::version::btree::{cmp_iter, Annotator, BTree, BTreeCmp, Iter};
use crate::version::file_metadata::{FileBacking, FileMetadata, KeyType};
use crate::version::INVARIANTS;

/// The files of one level.
pub struct LevelMetadata {
    level: usize,
    total_size: u64,
    num_virtual: u64,
    virtual_size: u64,
    tree: BTree,
}

impl LevelMetadata {
    /// An empty level ordered the way `level` requires.
    pub(crate) fn new(cmp: &Arc<dyn Comparator>, level: usize) -> Self {
        let tree_cmp = if level == 0 {
            BTreeCmp::SeqNum
        } else {
            BTreeCmp::SmallestKey(cmp.clone())
        };
        Self::with_tree(level, BTree::new(tree_cmp))
    }

    fn with_tree(level: usize, tree: BTree) -> Self {
        Self {
            level,
            total_size: 0,
            num_virtual: 0,
            virtual_size: 0,
            tree,
        }
    }

    /// Build a level from `files`.
    pub(crate) fn from_files(
        cmp: &Arc<dyn Comparator>,
        level: usize,
        files: &[Arc<FileMetadata>],
    ) -> Result<Self> {
        let mut lm = Self::new(cmp, level);
        for f in files {
            if let Err(e) = lm.insert(f.clone()) {
                lm.release();
                return Err(e);
            }
        }
        Ok(lm)
    }

    /// Build a level holding `files` in exactly the given order, then switch
    /// to the level's usual ordering. Used to construct levels that violate
    /// ordering invariants.
    pub(crate) fn from_files_in_order(
        cmp: &Arc<dyn Comparator>,
        level: usize,
        files: &[Arc<FileMetadata>],
    ) -> Result<Self> {
        let mut lm = Self::with_tree(level, BTree::new(BTreeCmp::specific_order(files)));
        for f in files {
            if let Err(e) = lm.insert(f.clone()) {
                lm.release();
                return Err(e);
            }
        }
        let usual = Self::new(cmp, level);
        lm.tree.set_cmp(usual.tree.cmp().clone());
        Ok(lm)
    }

    /// Release the level's references to its files, returning the backings
    /// that became obsolete.
    pub(crate) fn release(&mut self) -> Vec<Arc<FileBacking>> {
        self.tree.release()
    }

    pub(crate) fn release_shared(&self) -> Vec<Arc<FileBacking>> {
        self.tree.release_shared()
    }

    pub(crate) fn insert(&mut self, f: Arc<FileMetadata>) -> Result<()> {
        let (size, is_virtual) = (f.size, f.is_virtual);
        self.tree.insert(f)?;
        self.total_size += size;
        if is_virtual {
            self.num_virtual += 1;
            self.virtual_size += size;
        }
        Ok(())
    }

    /// Remove `f`. Returns `None` if the level does not hold it, else
    /// whether that released the file's last reference.
    pub(crate) fn remove(&mut self, f: &FileMetadata) -> Option<bool> {
        let obsolete = self.tree.delete(f)?;
        self.total_size -= f.size;
        if f.is_virtual {
            self.num_virtual -= 1;
            self.virtual_size -= f.size;
        }
        Some(obsolete)
    }

    pub fn level(&self) -> usize {
        self.level
    }

    /// Whether the level has no files.
    pub fn empty(&self) -> bool {
        self.tree.count() == 0
    }

    /// Number of files in the level.
    pub fn len(&self) -> usize {
        self.tree.count()
    }

    /// Total size of the files in the level.
    pub fn size(&self) -> u64 {
        self.total_size
    }

    /// Number of virtual sstables in the level.
    pub fn num_virtual(&self) -> u64 {
        self.num_virtual
    }

    /// Total size of the virtual sstables in the level.
    pub fn virtual_size(&self) -> u64 {
        self.virtual_size
    }

    /// An unpositioned iterator over the level.
    pub fn iter(&self) -> LevelIterator {
        LevelIterator::unbounded(self.tree.iter())
    }

    /// A slice holding every file in the level.
    pub fn slice(&self) -> LevelSlice {
        LevelSlice::new(self.tree.iter())
    }

    /// Locate `m` within the level by identity. Returns `None` if this exact
    /// metadata is not in the level.
    pub fn find(&self, cmp: &dyn Comparator, m: &Arc<FileMetadata>) -> Option<LevelFile> {
        let mut iter = self.iter();
        if self.level != 0 {
            // Key-ordered levels can narrow the scan to the overlapping files.
            let o = overlaps(
                &iter,
                cmp,
                &m.smallest.user_key,
                &m.largest.user_key,
                m.largest.is_exclusive_sentinel(),
            );
            iter = o.iter();
        }
        let mut f = iter.first();
        while let Some(cur) = f {
            if Arc::ptr_eq(&cur, m) {
                return iter.take();
            }
            f = iter.next();
        }
        None
    }

    /// The annotator's value for the level, and whether it was cacheable.
    pub fn annotation<A: Annotator>(&self, annotator: &A) -> (A::Value, bool) {
        self.tree.annotation(annotator)
    }

    /// Discard cached values of `annotator` throughout the level.
    pub fn invalidate_annotation<A: Annotator>(&self, annotator: &A) {
        self.tree.invalidate_annotation(annotator)
    }

    pub(crate) fn tree(&self) -> &BTree {
        &self.tree
    }
}

impl Clone for LevelMetadata {
    /// O(1). The clone holds its own reference on the tree and must be
    /// released independently.
    fn clone(&self) -> Self {
        Self {
            level: self.level,
            total_size: self.total_size,
            num_virtual: self.num_virtual,
            virtual_size: self.virtual_size,
            tree: self.tree.clone(),
        }
    }
}

impl fmt::Debug for LevelMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LevelMetadata")
            .field("level", &self.level)
            .field("files", &self.len())
            .field("size", &self.total_size)
            .field("num_virtual", &self.num_virtual)
            .finish()
    }
}

/// A file located within a level, together with a slice holding only it.
#[derive(Clone)]
pub struct LevelFile {
    pub file: Arc<FileMetadata>,
    slice: LevelSlice,
}

impl LevelFile {
    /// A slice containing only this file, bounded within its level.
    pub fn slice(&self) -> LevelSlice {
        self.slice.clone()
    }
}

impl std::ops::Deref for LevelFile {
    type Target = FileMetadata;

    fn deref(&self) -> &FileMetadata {
        &self.file
    }
}

/// An immutable, possibly bounded, view of a level's files.
#[derive(Clone)]
pub struct LevelSlice {
    iter: Iter,
    length: usize,
    // Inclusive bounds. When set, both come from the same tree as `iter`.
    start: Option<Iter>,
    end: Option<Iter>,
}

impl LevelSlice {
    pub(crate) fn new(iter: Iter) -> Self {
        let s = Self {
            length: iter.tree_count(),
            iter,
            start: None,
            end: None,
        };
        s.verify_invariants();
        s
    }

    pub(crate) fn new_bounded(iter: Iter, start: Iter, end: Iter) -> Self {
        let mut length = 0;
        if iter.valid() {
            let mut l = end.count_left() - start.count_left();
            // The end bound is inclusive.
            if end.valid() {
                l += 1;
            }
            // Inclusive bounds of an empty slice may leave end before start.
            length = l.max(0) as usize;
        }
        let s = Self {
            iter,
            length,
            start: Some(start),
            end: Some(end),
        };
        s.verify_invariants();
        s
    }

    /// A slice over `files`, ordered by sequence number.
    pub fn seq_sorted(files: &[Arc<FileMetadata>]) -> Result<Self> {
        Self::from_files(BTreeCmp::SeqNum, files)
    }

    /// A slice over `files`, ordered by smallest key.
    pub fn key_sorted(cmp: &Arc<dyn Comparator>, files: &[Arc<FileMetadata>]) -> Result<Self> {
        Self::from_files(BTreeCmp::SmallestKey(cmp.clone()), files)
    }

    /// A slice over `files` in exactly the given order.
    pub fn specific_order(files: &[Arc<FileMetadata>]) -> Result<Self> {
        Self::from_files(BTreeCmp::specific_order(files), files)
    }

    fn from_files(cmp: BTreeCmp, files: &[Arc<FileMetadata>]) -> Result<Self> {
        let mut tree = BTree::new(cmp);
        for f in files {
            if let Err(e) = tree.insert(f.clone()) {
                tree.release();
                return Err(e);
            }
        }
        let slice = Self::new(tree.iter());
        // The slice's iterator keeps the nodes alive. The tree only needs to
        // give back the file references it took.
        tree.release();
        Ok(slice)
    }

    fn verify_invariants(&self) {
        if INVARIANTS {
            let mut it = self.iter();
            let mut length = 0;
            let mut f = it.first();
            while f.is_some() {
                length += 1;
                f = it.next();
            }
            if length != self.length {
                panic!(
                    "LevelSlice {} has length {} but contains {} files",
                    self, self.length, length
                );
            }
        }
    }

    /// Call `f` on every file in the slice, in order.
    pub fn each<F: FnMut(&Arc<FileMetadata>)>(&self, mut f: F) {
        let mut it = self.iter();
        let mut cur = it.first();
        while let Some(m) = cur {
            f(&m);
            cur = it.next();
        }
    }

    /// The files of the slice, in order.
    pub fn files(&self) -> Vec<Arc<FileMetadata>> {
        let mut out = Vec::with_capacity(self.length);
        self.each(|f| out.push(f.clone()));
        out
    }

    pub fn empty(&self) -> bool {
        empty_with_bounds(&self.iter, self.start.as_ref(), self.end.as_ref())
    }

    /// An unpositioned iterator over the slice.
    pub fn iter(&self) -> LevelIterator {
        LevelIterator {
            iter: self.iter.clone(),
            start: self.start.clone(),
            end: self.end.clone(),
            filter: KeyType::PointAndRange,
        }
    }

    pub fn len(&self) -> usize {
        self.length
    }

    /// Total size of the files in the slice.
    pub fn size_sum(&self) -> u64 {
        let mut sum = 0;
        self.each(|f| sum += f.size);
        sum
    }

    /// Number of virtual sstables in the slice.
    pub fn num_virtual(&self) -> u64 {
        let mut n = 0;
        self.each(|f| n += u64::from(f.is_virtual));
        n
    }

    /// Total size of the virtual sstables in the slice.
    pub fn virtual_size_sum(&self) -> u64 {
        let mut sum = 0;
        self.each(|f| {
            if f.is_virtual {
                sum += f.size
            }
        });
        sum
    }

    /// Derive a new slice of the same tree. `f` receives iterators positioned
    /// at the current bounds (first and last file when unbounded) and moves
    /// them; the new slice spans their final positions, inclusive.
    pub fn reslice<F: FnOnce(&mut LevelIterator, &mut LevelIterator)>(&self, f: F) -> LevelSlice {
        if self.iter.is_empty_tree() {
            return self.clone();
        }
        let mut start = LevelIterator::unbounded(match &self.start {
            Some(s) => s.clone(),
            None => {
                let mut it = self.iter.clone();
                it.first();
                it
            }
        });
        let mut end = LevelIterator::unbounded(match &self.end {
            Some(e) => e.clone(),
            None => {
                let mut it = self.iter.clone();
                it.last();
                it
            }
        });
        f(&mut start, &mut end);
        LevelSlice::new_bounded(start.iter.clone(), start.iter, end.iter)
    }
}

impl fmt::Display for LevelSlice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} files:", self.length)?;
        let mut it = self.iter();
        let mut cur = it.first();
        while let Some(m) = cur {
            write!(f, " {}", m)?;
            cur = it.next();
        }
        Ok(())
    }
}

impl fmt::Debug for LevelSlice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

fn empty_with_bounds(iter: &Iter, start: Option<&Iter>, end: Option<&Iter>) -> bool {
    if iter.is_empty_tree() {
        return true;
    }
    // An end bound before the start bound describes an empty slice.
    matches!((start, end), (Some(s), Some(e)) if cmp_iter(e, s) == Ordering::Less)
}

/// Iterator over a level or a slice of one.
///
/// Positioning methods return the file at the new position, or `None` once
/// the iterator leaves its bounds.
#[derive(Clone)]
pub struct LevelIterator {
    iter: Iter,
    start: Option<Iter>,
    end: Option<Iter>,
    filter: KeyType,
}

impl LevelIterator {
    fn unbounded(iter: Iter) -> Self {
        Self {
            iter,
            start: None,
            end: None,
            filter: KeyType::PointAndRange,
        }
    }

    /// A copy of the iterator that only returns files containing keys of
    /// `key_type`.
    pub fn filter(&self, key_type: KeyType) -> LevelIterator {
        let mut it = self.clone();
        it.filter = key_type;
        it
    }

    fn empty(&self) -> bool {
        empty_with_bounds(&self.iter, self.start.as_ref(), self.end.as_ref())
    }

    fn current(&self) -> Option<Arc<FileMetadata>> {
        self.iter.valid().then(|| self.iter.cur().clone())
    }

    fn past_end(&self) -> bool {
        matches!(&self.end, Some(e) if cmp_iter(&self.iter, e) == Ordering::Greater)
    }

    fn before_start(&self) -> bool {
        matches!(&self.start, Some(s) if cmp_iter(&self.iter, s) == Ordering::Less)
    }

    pub fn first(&mut self) -> Option<Arc<FileMetadata>> {
        if self.empty() {
            return None;
        }
        match &self.start {
            Some(s) => self.iter = s.clone(),
            None => self.iter.first(),
        }
        let f = self.current()?;
        self.skip_filtered_forward(Some(f))
    }

    pub fn last(&mut self) -> Option<Arc<FileMetadata>> {
        if self.empty() {
            return None;
        }
        match &self.end {
            Some(e) => self.iter = e.clone(),
            None => self.iter.last(),
        }
        let f = self.current()?;
        self.skip_filtered_backward(Some(f))
    }

    /// Advance to the next file.
    ///
    /// # Panics
    ///
    /// With invariants enabled, panics if the iterator is already exhausted
    /// in the forward direction.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Option<Arc<FileMetadata>> {
        if self.iter.is_empty_tree() {
            return None;
        }
        if INVARIANTS && (self.iter.exhausted_forward() || self.past_end()) {
            panic!("cannot next forward-exhausted iterator");
        }
        self.iter.next();
        let f = self.current()?;
        self.skip_filtered_forward(Some(f))
    }

    /// Step back to the previous file.
    ///
    /// # Panics
    ///
    /// With invariants enabled, panics if the iterator is already exhausted
    /// in the backward direction.
    pub fn prev(&mut self) -> Option<Arc<FileMetadata>> {
        if self.iter.is_empty_tree() {
            return None;
        }
        if INVARIANTS && (self.iter.exhausted_backward() || self.before_start()) {
            panic!("cannot prev backward-exhausted iterator");
        }
        self.iter.prev();
        let f = self.current()?;
        self.skip_filtered_backward(Some(f))
    }

    /// Position at the first file whose largest user key is `>= user_key`.
    /// With a filter, the bound of the filtered key type is checked instead.
    pub fn seek_ge(&mut self, cmp: &dyn Comparator, user_key: &[u8]) -> Option<Arc<FileMetadata>> {
        if self.empty() {
            return None;
        }
        let mut meta =
            self.seek(|m| cmp.compare(&m.largest.user_key, user_key) != Ordering::Less);
        while let Some(m) = meta {
            let accept = match self.filter {
                KeyType::PointAndRange => true,
                KeyType::Point => {
                    m.has_point_keys
                        && cmp.compare(&m.largest_point_key.user_key, user_key) != Ordering::Less
                }
                KeyType::Range => {
                    m.has_range_keys
                        && cmp.compare(&m.largest_range_key.user_key, user_key) != Ordering::Less
                }
            };
            if accept {
                return Some(m);
            }
            meta = self.next();
        }
        None
    }

    /// Position at the last file whose smallest user key is `< user_key`.
    /// With a filter, the bound of the filtered key type is checked instead.
    pub fn seek_lt(&mut self, cmp: &dyn Comparator, user_key: &[u8]) -> Option<Arc<FileMetadata>> {
        if self.empty() {
            return None;
        }
        self.seek(|m| cmp.compare(&m.smallest.user_key, user_key) != Ordering::Less);
        let mut meta = self.prev();
        while let Some(m) = meta {
            let accept = match self.filter {
                KeyType::PointAndRange => true,
                KeyType::Point => {
                    m.has_point_keys
                        && cmp.compare(&m.smallest_point_key.user_key, user_key) == Ordering::Less
                }
                KeyType::Range => {
                    m.has_range_keys
                        && cmp.compare(&m.smallest_range_key.user_key, user_key) == Ordering::Less
                }
            };
            if accept {
                return Some(m);
            }
            meta = self.prev();
        }
        None
    }

    fn skip_filtered_forward(&mut self, mut meta: Option<Arc<FileMetadata>>) -> Option<Arc<FileMetadata>> {
        while matches!(&meta, Some(m) if !m.contains_key_type(self.filter)) {
            self.iter.next();
            meta = self.current();
        }
        if meta.is_some() && self.past_end() {
            meta = None;
        }
        meta
    }

    fn skip_filtered_backward(&mut self, mut meta: Option<Arc<FileMetadata>>) -> Option<Arc<FileMetadata>> {
        while matches!(&meta, Some(m) if !m.contains_key_type(self.filter)) {
            self.iter.prev();
            meta = self.current();
        }
        if meta.is_some() && self.before_start() {
            meta = None;
        }
        meta
    }

    /// Seek the underlying tree, then clamp the position to the bounds.
    fn seek<F: FnMut(&FileMetadata) -> bool>(&mut self, f: F) -> Option<Arc<FileMetadata>> {
        self.iter.seek(f);
        if self.past_end() {
            if let Some(e) = &self.end {
                self.iter = e.clone();
            }
            // Nothing within bounds satisfies the seek; park just past the
            // end bound so a following prev() returns the last file.
            self.iter.next();
            return None;
        }
        if self.before_start() {
            if let Some(s) = &self.start {
                self.iter = s.clone();
            }
        }
        self.current()
    }

    /// The file at the current position together with a one-file slice of
    /// it, or `None` if the iterator is outside its bounds.
    pub fn take(&self) -> Option<LevelFile> {
        if !self.iter.valid() || self.past_end() || self.before_start() {
            return None;
        }
        let bounds = self.iter.clone();
        let slice = LevelSlice::new_bounded(self.iter.clone(), bounds.clone(), bounds);
        Some(LevelFile {
            file: self.iter.cur().clone(),
            slice,
        })
    }
}

impl fmt::Debug for LevelIterator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(s) = &self.start {
            writeln!(f, "start:\n{:?}", s)?;
        }
        writeln!(f, "pos:\n{:?}", self.iter)?;
        if let Some(e) = &self.end {
            writeln!(f, "end:\n{:?}", e)?;
        }
        Ok(())
    }
}

/// Files of a key-ordered level that overlap `[start, end]`, or
/// `[start, end)` when `exclusive_end` is set.
pub(crate) fn overlaps(
    iter: &LevelIterator,
    cmp: &dyn Comparator,
    start: &[u8],
    end: &[u8],
    exclusive_end: bool,
) -> LevelSlice {
    let mut start_iter = iter.clone();
    if let Some(f) = start_iter.seek_ge(cmp, start) {
        // A file ending in an exclusive sentinel at `start` does not contain
        // `start`.
        if f.largest.is_exclusive_sentinel()
            && cmp.compare(&f.largest.user_key, start) == Ordering::Equal
        {
            start_iter.next();
        }
    }

    let mut end_iter = iter.clone();
    let mut end_file = end_iter.seek_ge(cmp, end);
    if !exclusive_end {
        // Several files may include `end` itself; take all of them.
        while matches!(&end_file, Some(f) if cmp.compare(&f.largest.user_key, end) == Ordering::Equal)
        {
            end_file = end_iter.next();
        }
    }
    // The end bound is inclusive: step back if we overshot.
    let step_back = match &end_file {
        None => true,
        Some(f) => {
            let c = cmp.compare(&f.smallest.user_key, end);
            c == Ordering::Greater || (c == Ordering::Equal && exclusive_end)
        }
    };
    if step_back {
        end_iter.prev();
    }
    LevelSlice::new_bounded(start_iter.iter.clone(), start_iter.iter, end_iter.iter)
}

/// The smallest and largest bounds across every file reachable from `iters`.
/// Returns `None` if there are no files.
pub fn key_range<I>(cmp: &dyn Comparator, iters: I) -> Option<(InternalKey, InternalKey)>
where
    I: IntoIterator<Item = LevelIterator>,
{
    let mut range: Option<(InternalKey, InternalKey)> = None;
    for mut iter in iters {
        let mut cur = iter.first();
        while let Some(m) = cur {
            range = Some(match range {
                None => (m.smallest.clone(), m.largest.clone()),
                Some((smallest, largest)) => {
                    let smallest = if InternalKey::compare(cmp, &smallest, &m.smallest)
                        != Ordering::Less
                    {
                        m.smallest.clone()
                    } else {
                        smallest
                    };
                    let largest = if InternalKey::compare(cmp, &largest, &m.largest)
                        != Ordering::Greater
                    {
                        m.largest.clone()
                    } else {
                        largest
                    };
                    (smallest, largest)
                }
            });
            cur = iter.next();
        }
    }
    range
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FileNum, KeyKind};
    use crate::util::comparator::BytewiseComparator;

    fn cmp() -> Arc<dyn Comparator> {
        Arc::new(BytewiseComparator::new())
    }

    fn point_file(num: u64, smallest: &'static str, largest: &'static str) -> Arc<FileMetadata> {
        let mut m = FileMetadata::new(FileNum(num), 100).with_seq_nums(num, num);
        m.extend_point_key_bounds(
            &BytewiseComparator::new(),
            InternalKey::new(smallest, num, KeyKind::Set),
            InternalKey::new(largest, num, KeyKind::Set),
        );
        m.init_physical_backing();
        Arc::new(m)
    }

    fn range_file(num: u64, smallest: &'static str, largest: &'static str) -> Arc<FileMetadata> {
        let mut m = FileMetadata::new(FileNum(num), 100).with_seq_nums(num, num);
        m.extend_range_key_bounds(
            &BytewiseComparator::new(),
            InternalKey::new(smallest, num, KeyKind::RangeKeySet),
            InternalKey::range_key_sentinel(largest, KeyKind::RangeKeySet),
        );
        m.init_physical_backing();
        Arc::new(m)
    }

    fn nums(slice: &LevelSlice) -> Vec<u64> {
        slice.files().iter().map(|f| f.file_num.0).collect()
    }

    fn level_of(files: &[Arc<FileMetadata>]) -> LevelMetadata {
        LevelMetadata::from_files(&cmp(), 1, files).unwrap()
    }

    #[test]
    fn test_level_metadata_sizes() {
        let mut lm = level_of(&[point_file(1, "a", "b"), point_file(2, "c", "d")]);
        assert_eq!(lm.len(), 2);
        assert_eq!(lm.size(), 200);
        assert!(!lm.empty());

        let parent = point_file(3, "e", "f");
        let mut v = FileMetadata::new(FileNum(4), 40)
            .with_seq_nums(3, 3)
            .with_virtual();
        v.extend_point_key_bounds(
            &BytewiseComparator::new(),
            InternalKey::new("e", 3, KeyKind::Set),
            InternalKey::new("e", 3, KeyKind::Set),
        );
        v.set_backing(parent.backing().unwrap().clone());
        let v = Arc::new(v);
        lm.insert(v.clone()).unwrap();
        assert_eq!(lm.num_virtual(), 1);
        assert_eq!(lm.virtual_size(), 40);
        assert_eq!(lm.slice().virtual_size_sum(), 40);
        assert_eq!(lm.slice().num_virtual(), 1);

        assert_eq!(lm.remove(&v), Some(true));
        assert_eq!(lm.num_virtual(), 0);
        assert_eq!(lm.size(), 200);
        // A file the level does not hold leaves the sizes alone.
        assert_eq!(lm.remove(&v), None);
        assert_eq!(lm.size(), 200);
        lm.release();
    }

    #[test]
    fn test_find_returns_single_file_slice() {
        let files = vec![
            point_file(1, "a", "c"),
            point_file(2, "d", "f"),
            point_file(3, "g", "i"),
        ];
        let lm = level_of(&files);
        let found = lm.find(&BytewiseComparator::new(), &files[1]).unwrap();
        assert_eq!(found.file_num, FileNum(2));
        let slice = found.slice();
        assert_eq!(slice.len(), 1);
        assert_eq!(nums(&slice), vec![2]);

        // Same bounds, different identity.
        let impostor = point_file(2, "d", "f");
        assert!(lm.find(&BytewiseComparator::new(), &impostor).is_none());
    }

    #[test]
    fn test_find_in_l0() {
        let files = vec![point_file(1, "a", "z"), point_file(2, "a", "z")];
        let lm = LevelMetadata::from_files(&cmp(), 0, &files).unwrap();
        let found = lm.find(&BytewiseComparator::new(), &files[0]).unwrap();
        assert_eq!(found.file_num, FileNum(1));
    }

    #[test]
    fn test_slice_constructors() {
        let c = cmp();
        let files = vec![point_file(3, "a", "b"), point_file(1, "x", "y"), point_file(2, "m", "n")];
        assert_eq!(nums(&LevelSlice::seq_sorted(&files).unwrap()), vec![1, 2, 3]);
        assert_eq!(nums(&LevelSlice::key_sorted(&c, &files).unwrap()), vec![3, 2, 1]);
        assert_eq!(nums(&LevelSlice::specific_order(&files).unwrap()), vec![3, 1, 2]);
        // Building a slice leaves no references behind.
        assert!(files.iter().all(|f| f.refs() == 0));
        assert_eq!(LevelSlice::seq_sorted(&files).unwrap().size_sum(), 300);
    }

    #[test]
    fn test_reslice() {
        let files: Vec<_> = (0..50u64)
            .map(|i| {
                let k: &'static str = Box::leak(format!("k{:03}", i).into_boxed_str());
                point_file(i + 1, k, k)
            })
            .collect();
        let lm = level_of(&files);
        let slice = lm.slice();
        assert_eq!(slice.len(), 50);

        let inner = slice.reslice(|start, end| {
            for _ in 0..10 {
                start.next();
            }
            for _ in 0..5 {
                end.prev();
            }
        });
        assert_eq!(inner.len(), 35);
        assert_eq!(nums(&inner), (11..=45).collect::<Vec<_>>());

        // Reslicing a bounded slice starts from its bounds.
        let narrower = inner.reslice(|start, _| {
            start.next();
        });
        assert_eq!(nums(&narrower), (12..=45).collect::<Vec<_>>());

        let empty = inner.reslice(|start, end| {
            start.last();
            end.first();
            end.prev();
        });
        assert!(empty.empty());
        assert_eq!(empty.len(), 0);
    }

    #[test]
    fn test_bounded_iterator_respects_bounds() {
        let files = vec![
            point_file(1, "a", "b"),
            point_file(2, "c", "d"),
            point_file(3, "e", "f"),
            point_file(4, "g", "h"),
        ];
        let lm = level_of(&files);
        let c = BytewiseComparator::new();
        let slice = overlaps(&lm.iter(), &c, b"c", b"f", false);
        assert_eq!(nums(&slice), vec![2, 3]);

        let mut it = slice.iter();
        assert_eq!(it.seek_ge(&c, b"a").map(|f| f.file_num.0), Some(2));
        assert!(it.seek_ge(&c, b"g").is_none());
        // After seeking past the end bound, prev returns the last file.
        assert_eq!(it.prev().map(|f| f.file_num.0), Some(3));
        assert_eq!(it.seek_lt(&c, b"z").map(|f| f.file_num.0), Some(3));
        assert!(it.seek_lt(&c, b"c").is_none());
        assert_eq!(it.last().map(|f| f.file_num.0), Some(3));
        assert!(it.next().is_none());
    }

    #[test]
    fn test_overlaps_exclusive_bounds() {
        let c = BytewiseComparator::new();
        let mut m = FileMetadata::new(FileNum(1), 10).with_seq_nums(1, 1);
        m.extend_point_key_bounds(
            &c,
            InternalKey::new("a", 1, KeyKind::Set),
            InternalKey::range_delete_sentinel("c"),
        );
        m.init_physical_backing();
        let files = vec![Arc::new(m), point_file(2, "c", "d"), point_file(3, "f", "g")];
        let lm = level_of(&files);

        // The sentinel at "c" does not contain "c".
        assert_eq!(nums(&overlaps(&lm.iter(), &c, b"c", b"c", false)), vec![2]);
        assert_eq!(nums(&overlaps(&lm.iter(), &c, b"b", b"f", true)), vec![1, 2]);
        assert_eq!(nums(&overlaps(&lm.iter(), &c, b"b", b"f", false)), vec![1, 2, 3]);
        assert!(overlaps(&lm.iter(), &c, b"x", b"z", false).empty());
    }

    #[test]
    fn test_filtered_iteration() {
        let files = vec![
            point_file(1, "a", "b"),
            range_file(2, "c", "e"),
            point_file(3, "f", "g"),
        ];
        let lm = level_of(&files);
        let c = BytewiseComparator::new();

        let mut points = lm.iter().filter(KeyType::Point);
        assert_eq!(points.first().map(|f| f.file_num.0), Some(1));
        assert_eq!(points.next().map(|f| f.file_num.0), Some(3));
        assert!(points.next().is_none());
        assert_eq!(points.seek_ge(&c, b"c").map(|f| f.file_num.0), Some(3));

        let mut ranges = lm.iter().filter(KeyType::Range);
        assert_eq!(ranges.first().map(|f| f.file_num.0), Some(2));
        assert_eq!(ranges.last().map(|f| f.file_num.0), Some(2));
        // The range key bound is exclusive at "e" but compares by user key.
        assert_eq!(ranges.seek_ge(&c, b"e").map(|f| f.file_num.0), Some(2));
        assert!(ranges.seek_lt(&c, b"c").is_none());
        assert_eq!(ranges.seek_lt(&c, b"d").map(|f| f.file_num.0), Some(2));
    }

    #[test]
    fn test_take() {
        let files = vec![point_file(1, "a", "b"), point_file(2, "c", "d")];
        let lm = level_of(&files);
        let mut it = lm.iter();
        assert!(it.take().is_none());
        it.last();
        let lf = it.take().unwrap();
        assert_eq!(lf.file_num, FileNum(2));
        assert_eq!(lf.slice().len(), 1);
    }

    #[test]
    #[cfg_attr(not(any(debug_assertions, feature = "invariants")), ignore)]
    #[should_panic(expected = "forward-exhausted")]
    fn test_next_after_exhaustion_panics() {
        let lm = level_of(&[point_file(1, "a", "b")]);
        let mut it = lm.iter();
        it.first();
        assert!(it.next().is_none());
        it.next();
    }

    #[test]
    fn test_empty_level() {
        let lm = LevelMetadata::new(&cmp(), 3);
        assert!(lm.empty());
        let mut it = lm.iter();
        assert!(it.first().is_none());
        assert!(it.next().is_none());
        assert!(it.seek_ge(&BytewiseComparator::new(), b"a").is_none());
        assert!(lm.slice().empty());
        assert_eq!(lm.slice().len(), 0);
        assert_eq!(lm.slice().reslice(|_, _| {}).len(), 0);
    }

    #[test]
    fn test_key_range() {
        let c = BytewiseComparator::new();
        let a = level_of(&[point_file(1, "d", "f")]);
        let b = level_of(&[point_file(2, "b", "c"), point_file(3, "x", "y")]);
        let (smallest, largest) = key_range(&c, [a.iter(), b.iter()]).unwrap();
        assert_eq!(smallest.user_key(), b"b");
        assert_eq!(largest.user_key(), b"y");
        assert!(key_range(&c, [LevelMetadata::new(&cmp(), 1).iter()]).is_none());
    }
}
