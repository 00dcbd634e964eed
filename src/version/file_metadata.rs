//! SSTable metadata tracked by the manifest.
//!
//! A [`FileMetadata`] describes one leveled sstable, physical or virtual. It
//! does not record the level it lives in: the same metadata may move between
//! levels across versions while being shared by every version that holds it.
//! The on-disk object behind it is a [`FileBacking`], which may be shared by
//! several virtual sstables.

use std::cmp::Ordering;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, AtomicU64, AtomicU8};
use std::sync::atomic::Ordering as AtomicOrdering;
use std::sync::{Arc, OnceLock};

use crate::error::{Error, Result};
use crate::types::{DiskFileNum, FileNum, FormatKey, InternalKey};
use crate::util::comparator::Comparator;
use crate::version::INVARIANTS;

/// Bit set in the bounds marker when the table contains point keys.
pub(crate) const MASK_CONTAINS_POINT_KEYS: u8 = 1 << 0;
/// Bit set in the bounds marker when the smallest bound is a point key.
pub(crate) const MASK_SMALLEST: u8 = 1 << 1;
/// Bit set in the bounds marker when the largest bound is a point key.
pub(crate) const MASK_LARGEST: u8 = 1 << 2;

/// Which kinds of keys a caller is interested in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyType {
    /// Point keys and range keys.
    #[default]
    PointAndRange,
    /// Point keys only.
    Point,
    /// Range keys only.
    Range,
}

/// Which key type supplies one of a file's overall bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BoundType {
    PointKey,
    RangeKey,
}

/// In-memory compaction state of a file. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CompactionState {
    NotCompacting = 0,
    Compacting = 1,
    Compacted = 2,
}

impl CompactionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => CompactionState::NotCompacting,
            1 => CompactionState::Compacting,
            2 => CompactionState::Compacted,
            _ => panic!("unknown compaction state {}", v),
        }
    }
}

impl fmt::Display for CompactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CompactionState::NotCompacting => "NotCompacting",
            CompactionState::Compacting => "Compacting",
            CompactionState::Compacted => "Compacted",
        };
        f.write_str(s)
    }
}

/// The on-disk object backing one physical sstable or one or more virtual
/// sstables.
#[derive(Debug)]
pub struct FileBacking {
    /// Number of B-tree entries, across all versions, that reference a table
    /// backed by this object. The object is obsolete when this reaches zero.
    refs: AtomicI32,
    /// References held by the latest version only. `latest_refs <= refs`.
    latest_refs: AtomicI32,
    /// Sum of the sizes of the virtual tables in the latest version that are
    /// backed by this object.
    virtualized_size: AtomicU64,
    pub disk_file_num: DiskFileNum,
    pub size: u64,
}

impl FileBacking {
    /// Create a backing with no references.
    pub fn new(disk_file_num: DiskFileNum, size: u64) -> Self {
        Self {
            refs: AtomicI32::new(0),
            latest_refs: AtomicI32::new(0),
            virtualized_size: AtomicU64::new(0),
            disk_file_num,
            size,
        }
    }

    /// Current reference count.
    pub fn refs(&self) -> i32 {
        self.refs.load(AtomicOrdering::Acquire)
    }

    /// References held by the latest version.
    pub fn latest_refs(&self) -> i32 {
        self.latest_refs.load(AtomicOrdering::Acquire)
    }

    /// Size of the virtual tables in the latest version backed by this object.
    pub fn virtualized_size(&self) -> u64 {
        self.virtualized_size.load(AtomicOrdering::Acquire)
    }
}

/// Subset of [`FileMetadata`] reported to event listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableInfo {
    pub file_num: FileNum,
    pub size: u64,
    pub smallest: InternalKey,
    pub largest: InternalKey,
    pub smallest_seq_num: u64,
    pub largest_seq_num: u64,
}

/// Metadata for one leveled sstable.
///
/// Key bounds and sizes are fixed once the metadata is shared through an
/// `Arc`; the compaction bookkeeping that changes afterwards lives in atomics.
#[derive(Debug, Default)]
pub struct FileMetadata {
    /// Seeks remaining before the file becomes a read-compaction candidate.
    allowed_seeks: AtomicI64,
    init_allowed_seeks: AtomicI64,
    backing: OnceLock<Arc<FileBacking>>,
    compaction_state: AtomicU8,
    marked_for_compaction: AtomicBool,
    intra_l0_compacting: AtomicBool,

    pub file_num: FileNum,
    /// Size in bytes. For a virtual table, an estimate of the virtualized
    /// portion of its backing.
    pub size: u64,
    /// Unix seconds at which the file was created.
    pub creation_time: i64,
    pub smallest_seq_num: u64,
    pub largest_seq_num: u64,

    /// Overall bounds: the union of the point and range key bounds.
    pub smallest: InternalKey,
    pub largest: InternalKey,
    pub smallest_point_key: InternalKey,
    pub largest_point_key: InternalKey,
    pub smallest_range_key: InternalKey,
    pub largest_range_key: InternalKey,
    pub has_point_keys: bool,
    pub has_range_keys: bool,

    pub is_virtual: bool,

    bounds_set: bool,
    bound_type_smallest: Option<BoundType>,
    bound_type_largest: Option<BoundType>,
}

impl FileMetadata {
    /// Create metadata for a file with no bounds yet.
    pub fn new(file_num: FileNum, size: u64) -> Self {
        Self {
            file_num,
            size,
            ..Default::default()
        }
    }

    /// Set the sequence number bounds.
    pub fn with_seq_nums(mut self, smallest: u64, largest: u64) -> Self {
        self.smallest_seq_num = smallest;
        self.largest_seq_num = largest;
        self
    }

    /// Mark the file as a virtual sstable.
    pub fn with_virtual(mut self) -> Self {
        self.is_virtual = true;
        self
    }

    /// Set the creation time.
    pub fn with_creation_time(mut self, creation_time: i64) -> Self {
        self.creation_time = creation_time;
        self
    }

    /// Set the marked-for-compaction flag before the file is published.
    pub fn with_marked_for_compaction(self, marked: bool) -> Self {
        self.marked_for_compaction
            .store(marked, AtomicOrdering::Release);
        self
    }

    /// Give a physical sstable its own backing. Idempotent.
    ///
    /// # Panics
    ///
    /// Panics if the file is virtual: virtual sstables share an existing
    /// backing.
    pub fn init_physical_backing(&self) {
        if self.is_virtual {
            panic!("virtual sstable {} must use an existing backing", self.file_num);
        }
        self.backing
            .get_or_init(|| Arc::new(FileBacking::new(self.file_num.disk_file_num(), self.size)));
    }

    /// Attach an existing backing. Returns false if one was already set.
    pub fn set_backing(&self, backing: Arc<FileBacking>) -> bool {
        self.backing.set(backing).is_ok()
    }

    /// The backing object, if initialized.
    pub fn backing(&self) -> Option<&Arc<FileBacking>> {
        self.backing.get()
    }

    fn backing_ref(&self) -> &FileBacking {
        match self.backing.get() {
            Some(b) => b,
            None => panic!("file {} has no backing", self.file_num),
        }
    }

    /// Check a freshly created virtual sstable against the file it was carved
    /// out of.
    pub fn validate_virtual(&self, created_from: &FileMetadata) -> Result<()> {
        if !self.is_virtual {
            return Err(Error::corruption(format!(
                "file {} is not a virtual sstable",
                self.file_num
            )));
        }
        if created_from.smallest_seq_num != self.smallest_seq_num
            || created_from.largest_seq_num != self.largest_seq_num
        {
            return Err(Error::corruption(format!(
                "virtual sstable {} has seqnums [{}-{}], parent {} has [{}-{}]",
                self.file_num,
                self.smallest_seq_num,
                self.largest_seq_num,
                created_from.file_num,
                created_from.smallest_seq_num,
                created_from.largest_seq_num
            )));
        }
        if let (Some(parent), Some(own)) = (created_from.backing(), self.backing()) {
            if !Arc::ptr_eq(parent, own) {
                return Err(Error::corruption(format!(
                    "virtual sstable {} does not share the backing of {}",
                    self.file_num, created_from.file_num
                )));
            }
        }
        if self.size == 0 {
            return Err(Error::corruption(format!(
                "virtual sstable {} has no size",
                self.file_num
            )));
        }
        Ok(())
    }

    /// Reference count of the backing sstable.
    pub fn refs(&self) -> i32 {
        self.backing_ref().refs()
    }

    /// Increment the reference count of the backing sstable.
    pub fn add_ref(&self) {
        self.backing_ref().refs.fetch_add(1, AtomicOrdering::AcqRel);
    }

    /// Decrement the reference count of the backing sstable, returning the
    /// new count.
    pub fn release_ref(&self) -> i32 {
        let v = self.backing_ref().refs.fetch_sub(1, AtomicOrdering::AcqRel) - 1;
        if v < 0 {
            panic!("invalid refcount {} for file {}", v, self.file_num);
        }
        v
    }

    /// Increment the latest-version reference count of the backing sstable.
    pub fn add_latest_ref(&self) {
        let backing = self.backing_ref();
        backing.latest_refs.fetch_add(1, AtomicOrdering::AcqRel);
        if self.is_virtual {
            backing
                .virtualized_size
                .fetch_add(self.size, AtomicOrdering::AcqRel);
        }
    }

    /// Decrement the latest-version reference count of the backing sstable,
    /// returning the new count.
    pub fn release_latest_ref(&self) -> i32 {
        let backing = self.backing_ref();
        if self.is_virtual {
            backing
                .virtualized_size
                .fetch_sub(self.size, AtomicOrdering::AcqRel);
        }
        let v = backing.latest_refs.fetch_sub(1, AtomicOrdering::AcqRel) - 1;
        if v < 0 {
            panic!("invalid latest refcount {} for file {}", v, self.file_num);
        }
        v
    }

    /// Latest-version reference count of the backing sstable.
    pub fn latest_refs(&self) -> i32 {
        self.backing_ref().latest_refs()
    }

    pub fn allowed_seeks(&self) -> i64 {
        self.allowed_seeks.load(AtomicOrdering::Acquire)
    }

    pub fn init_allowed_seeks(&self) -> i64 {
        self.init_allowed_seeks.load(AtomicOrdering::Acquire)
    }

    /// Reset the seek budget.
    pub fn set_allowed_seeks(&self, seeks: i64) {
        self.allowed_seeks.store(seeks, AtomicOrdering::Release);
        self.init_allowed_seeks.store(seeks, AtomicOrdering::Release);
    }

    /// Charge one seek against the budget, returning what remains.
    pub fn consume_seek(&self) -> i64 {
        self.allowed_seeks.fetch_sub(1, AtomicOrdering::AcqRel) - 1
    }

    pub fn marked_for_compaction(&self) -> bool {
        self.marked_for_compaction.load(AtomicOrdering::Acquire)
    }

    /// Flag the file for compaction. Callers holding annotations that depend
    /// on the flag must invalidate them.
    pub fn set_marked_for_compaction(&self, marked: bool) {
        self.marked_for_compaction
            .store(marked, AtomicOrdering::Release);
    }

    pub fn is_intra_l0_compacting(&self) -> bool {
        self.intra_l0_compacting.load(AtomicOrdering::Acquire)
    }

    pub fn set_intra_l0_compacting(&self, v: bool) {
        self.intra_l0_compacting.store(v, AtomicOrdering::Release);
    }

    pub fn compaction_state(&self) -> CompactionState {
        CompactionState::from_u8(self.compaction_state.load(AtomicOrdering::Acquire))
    }

    /// Whether the file is an input to an in-progress compaction.
    pub fn is_compacting(&self) -> bool {
        self.compaction_state() == CompactionState::Compacting
    }

    /// Transition the compaction state.
    ///
    /// # Panics
    ///
    /// With invariants enabled, panics on any transition other than
    /// NotCompacting -> Compacting -> {Compacted, NotCompacting}.
    pub fn set_compaction_state(&self, to: CompactionState) {
        if INVARIANTS {
            let from = self.compaction_state();
            let ok = match from {
                CompactionState::NotCompacting => to == CompactionState::Compacting,
                CompactionState::Compacting => {
                    to == CompactionState::Compacted || to == CompactionState::NotCompacting
                }
                CompactionState::Compacted => false,
            };
            if !ok {
                panic!("invalid compaction state transition: {} -> {}", from, to);
            }
        }
        self.compaction_state
            .store(to as u8, AtomicOrdering::Release);
    }

    /// Extend the point key bounds, and the overall bounds with them.
    pub fn extend_point_key_bounds(
        &mut self,
        cmp: &dyn Comparator,
        smallest: InternalKey,
        largest: InternalKey,
    ) -> &mut Self {
        if !self.has_point_keys {
            self.smallest_point_key = smallest;
            self.largest_point_key = largest;
            self.has_point_keys = true;
        } else {
            if InternalKey::compare(cmp, &smallest, &self.smallest_point_key) == Ordering::Less {
                self.smallest_point_key = smallest;
            }
            if InternalKey::compare(cmp, &largest, &self.largest_point_key) == Ordering::Greater {
                self.largest_point_key = largest;
            }
        }
        let (s, l) = (
            self.smallest_point_key.clone(),
            self.largest_point_key.clone(),
        );
        self.extend_overall_bounds(cmp, s, l, BoundType::PointKey);
        self
    }

    /// Extend the range key bounds, and the overall bounds with them.
    pub fn extend_range_key_bounds(
        &mut self,
        cmp: &dyn Comparator,
        smallest: InternalKey,
        largest: InternalKey,
    ) -> &mut Self {
        if !self.has_range_keys {
            self.smallest_range_key = smallest;
            self.largest_range_key = largest;
            self.has_range_keys = true;
        } else {
            if InternalKey::compare(cmp, &smallest, &self.smallest_range_key) == Ordering::Less {
                self.smallest_range_key = smallest;
            }
            if InternalKey::compare(cmp, &largest, &self.largest_range_key) == Ordering::Greater {
                self.largest_range_key = largest;
            }
        }
        let (s, l) = (
            self.smallest_range_key.clone(),
            self.largest_range_key.clone(),
        );
        self.extend_overall_bounds(cmp, s, l, BoundType::RangeKey);
        self
    }

    fn extend_overall_bounds(
        &mut self,
        cmp: &dyn Comparator,
        smallest: InternalKey,
        largest: InternalKey,
        bound_type: BoundType,
    ) {
        if !self.bounds_set {
            self.smallest = smallest;
            self.largest = largest;
            self.bounds_set = true;
            self.bound_type_smallest = Some(bound_type);
            self.bound_type_largest = Some(bound_type);
            return;
        }
        if InternalKey::compare(cmp, &smallest, &self.smallest) == Ordering::Less {
            self.smallest = smallest;
            self.bound_type_smallest = Some(bound_type);
        }
        if InternalKey::compare(cmp, &largest, &self.largest) == Ordering::Greater {
            self.largest = largest;
            self.bound_type_largest = Some(bound_type);
        }
    }

    /// Set the overall bounds directly, as decoded from a manifest record.
    pub(crate) fn set_decoded_bounds(
        &mut self,
        smallest_type: BoundType,
        largest_type: BoundType,
    ) {
        self.smallest = match smallest_type {
            BoundType::PointKey => self.smallest_point_key.clone(),
            BoundType::RangeKey => self.smallest_range_key.clone(),
        };
        self.largest = match largest_type {
            BoundType::PointKey => self.largest_point_key.clone(),
            BoundType::RangeKey => self.largest_range_key.clone(),
        };
        self.bound_type_smallest = Some(smallest_type);
        self.bound_type_largest = Some(largest_type);
        self.bounds_set = true;
    }

    /// Whether the file's key range overlaps `[start, end]`, or `[start, end)`
    /// when `exclusive_end` is set.
    pub fn overlaps(
        &self,
        cmp: &dyn Comparator,
        start: &[u8],
        end: &[u8],
        exclusive_end: bool,
    ) -> bool {
        let c = cmp.compare(&self.largest.user_key, start);
        if c == Ordering::Less || (c == Ordering::Equal && self.largest.is_exclusive_sentinel()) {
            // Entirely before the range.
            return false;
        }
        let c = cmp.compare(&self.smallest.user_key, end);
        if c == Ordering::Greater || (c == Ordering::Equal && exclusive_end) {
            // Entirely after the range.
            return false;
        }
        true
    }

    /// Whether the file's key range lies entirely within `[start, end)`.
    pub fn contained_within_span(&self, cmp: &dyn Comparator, start: &[u8], end: &[u8]) -> bool {
        let lower = cmp.compare(&self.smallest.user_key, start);
        let upper = cmp.compare(&self.largest.user_key, end);
        lower != Ordering::Less
            && (upper == Ordering::Less
                || (upper == Ordering::Equal && self.largest.is_exclusive_sentinel()))
    }

    /// Whether the file contains keys of the given type.
    pub fn contains_key_type(&self, kt: KeyType) -> bool {
        match kt {
            KeyType::PointAndRange => true,
            KeyType::Point => self.has_point_keys,
            KeyType::Range => self.has_range_keys,
        }
    }

    /// The smallest bound for keys of the given type, if the file has any.
    pub fn smallest_bound(&self, kt: KeyType) -> Option<&InternalKey> {
        match kt {
            KeyType::PointAndRange => Some(&self.smallest),
            KeyType::Point => self.has_point_keys.then_some(&self.smallest_point_key),
            KeyType::Range => self.has_range_keys.then_some(&self.smallest_range_key),
        }
    }

    /// The largest bound for keys of the given type, if the file has any.
    pub fn largest_bound(&self, kt: KeyType) -> Option<&InternalKey> {
        match kt {
            KeyType::PointAndRange => Some(&self.largest),
            KeyType::Point => self.has_point_keys.then_some(&self.largest_point_key),
            KeyType::Range => self.has_range_keys.then_some(&self.largest_range_key),
        }
    }

    /// Marker byte recording whether the file has point keys and which key
    /// type supplies each overall bound.
    pub(crate) fn bounds_marker(&self) -> Result<u8> {
        let mut marker = 0u8;
        if self.has_point_keys {
            marker |= MASK_CONTAINS_POINT_KEYS;
        }
        match self.bound_type_smallest {
            Some(BoundType::PointKey) => marker |= MASK_SMALLEST,
            Some(BoundType::RangeKey) => {}
            None => {
                return Err(Error::corruption(format!(
                    "file {} has neither point nor range key as smallest key",
                    self.file_num
                )))
            }
        }
        match self.bound_type_largest {
            Some(BoundType::PointKey) => marker |= MASK_LARGEST,
            Some(BoundType::RangeKey) => {}
            None => {
                return Err(Error::corruption(format!(
                    "file {} has neither point nor range key as largest key",
                    self.file_num
                )))
            }
        }
        Ok(marker)
    }

    /// Whether the encoder needs the custom-field record form for this file.
    pub(crate) fn has_custom_fields(&self) -> bool {
        self.marked_for_compaction() || self.creation_time != 0 || self.is_virtual
    }

    /// Verbose description for tests and debugging.
    pub fn debug_string(&self, format: FormatKey, verbose: bool) -> String {
        let mut s = format!(
            "{}:[{}-{}]",
            self.file_num,
            self.smallest.pretty(format),
            self.largest.pretty(format)
        );
        if !verbose {
            return s;
        }
        s.push_str(&format!(
            " seqnums:[{}-{}]",
            self.smallest_seq_num, self.largest_seq_num
        ));
        if self.has_point_keys {
            s.push_str(&format!(
                " points:[{}-{}]",
                self.smallest_point_key.pretty(format),
                self.largest_point_key.pretty(format)
            ));
        }
        if self.has_range_keys {
            s.push_str(&format!(
                " ranges:[{}-{}]",
                self.smallest_range_key.pretty(format),
                self.largest_range_key.pretty(format)
            ));
        }
        s
    }

    /// Parse the form produced by [`FileMetadata::debug_string`]:
    ///
    /// ```text
    /// 000005:[a#3,SET-m#4,SET] seqnums:[3-4] points:[a#3,SET-m#4,SET]
    /// ```
    ///
    /// When only the overall bounds are given they are taken as point key
    /// bounds. The result has a physical backing.
    pub fn parse_debug(s: &str) -> Result<FileMetadata> {
        let malformed = |detail: &str| Error::invalid_argument(format!("malformed input: {}: {}", s, detail));
        let fields: Vec<&str> = s
            .split(|c: char| matches!(c, ':' | '[' | '-' | ']') || c.is_whitespace())
            .filter(|f| !f.is_empty())
            .collect();
        if fields.len() % 3 != 0 {
            return Err(malformed("expected prefix:[smallest-largest] groups"));
        }

        let mut m = FileMetadata::default();
        for group in fields.chunks(3) {
            let prefix = group[0];
            if prefix == "seqnums" {
                m.smallest_seq_num = group[1].parse().map_err(|_| malformed(group[1]))?;
                m.largest_seq_num = group[2].parse().map_err(|_| malformed(group[2]))?;
                continue;
            }
            let smallest = InternalKey::parse_pretty(group[1])?;
            let largest = InternalKey::parse_pretty(group[2])?;
            match prefix {
                "points" => {
                    m.smallest_point_key = smallest;
                    m.largest_point_key = largest;
                    m.has_point_keys = true;
                }
                "ranges" => {
                    m.smallest_range_key = smallest;
                    m.largest_range_key = largest;
                    m.has_range_keys = true;
                }
                num => {
                    m.file_num = FileNum(num.parse().map_err(|_| malformed(num))?);
                    m.smallest = smallest;
                    m.largest = largest;
                    m.bounds_set = true;
                }
            }
        }

        if !m.has_point_keys && !m.has_range_keys {
            m.smallest_point_key = m.smallest.clone();
            m.largest_point_key = m.largest.clone();
            m.has_point_keys = true;
        }
        m.bound_type_smallest = Some(if m.has_point_keys && m.smallest == m.smallest_point_key {
            BoundType::PointKey
        } else {
            BoundType::RangeKey
        });
        m.bound_type_largest = Some(if m.has_point_keys && m.largest == m.largest_point_key {
            BoundType::PointKey
        } else {
            BoundType::RangeKey
        });
        m.init_physical_backing();
        Ok(m)
    }

    /// Check the metadata for internal consistency.
    pub fn validate(&self, cmp: &dyn Comparator, format: FormatKey) -> Result<()> {
        if !self.has_point_keys && !self.has_range_keys {
            return Err(Error::corruption(format!(
                "file {} has neither point nor range keys",
                self.file_num
            )));
        }
        if InternalKey::compare(cmp, &self.smallest, &self.largest) == Ordering::Greater {
            return Err(Error::corruption(format!(
                "file {} has inconsistent bounds: {} vs {}",
                self.file_num,
                self.smallest.pretty(format),
                self.largest.pretty(format)
            )));
        }
        if self.smallest_seq_num > self.largest_seq_num {
            return Err(Error::corruption(format!(
                "file {} has inconsistent seqnum bounds: {} vs {}",
                self.file_num, self.smallest_seq_num, self.largest_seq_num
            )));
        }

        let typed = [
            (
                "point",
                self.has_point_keys,
                &self.smallest_point_key,
                &self.largest_point_key,
            ),
            (
                "range",
                self.has_range_keys,
                &self.smallest_range_key,
                &self.largest_range_key,
            ),
        ];
        for (name, present, smallest, largest) in typed {
            if !present {
                continue;
            }
            if InternalKey::compare(cmp, smallest, largest) == Ordering::Greater {
                return Err(Error::corruption(format!(
                    "file {} has inconsistent {} key bounds: {} vs {}",
                    self.file_num,
                    name,
                    smallest.pretty(format),
                    largest.pretty(format)
                )));
            }
            if InternalKey::compare(cmp, smallest, &self.smallest) == Ordering::Less
                || InternalKey::compare(cmp, largest, &self.largest) == Ordering::Greater
            {
                return Err(Error::corruption(format!(
                    "file {} has inconsistent {} key bounds relative to overall bounds: \
                     overall = [{}-{}], {} keys = [{}-{}]",
                    self.file_num,
                    name,
                    self.smallest.pretty(format),
                    self.largest.pretty(format),
                    name,
                    smallest.pretty(format),
                    largest.pretty(format)
                )));
            }
        }

        if self.backing.get().is_none() {
            return Err(Error::corruption(format!(
                "file {} metadata has no backing",
                self.file_num
            )));
        }
        Ok(())
    }

    /// Summary of the file for event listeners.
    pub fn table_info(&self) -> TableInfo {
        TableInfo {
            file_num: self.file_num,
            size: self.size,
            smallest: self.smallest.clone(),
            largest: self.largest.clone(),
            smallest_seq_num: self.smallest_seq_num,
            largest_seq_num: self.largest_seq_num,
        }
    }

    /// L0 ordering: largest seqnum, then smallest seqnum, then file number.
    pub fn cmp_seq_num(&self, other: &FileMetadata) -> Ordering {
        self.largest_seq_num
            .cmp(&other.largest_seq_num)
            .then(self.smallest_seq_num.cmp(&other.smallest_seq_num))
            .then(self.file_num.cmp(&other.file_num))
    }

    pub(crate) fn less_seq_num(&self, other: &FileMetadata) -> bool {
        self.cmp_seq_num(other) == Ordering::Less
    }

    /// L1+ ordering: smallest internal key.
    pub fn cmp_smallest_key(&self, other: &FileMetadata, cmp: &dyn Comparator) -> Ordering {
        InternalKey::compare(cmp, &self.smallest, &other.smallest)
    }

    /// Whether two metadata values would encode identically in a manifest
    /// record.
    pub(crate) fn same_persisted_state(&self, other: &FileMetadata) -> bool {
        self.file_num == other.file_num
            && self.size == other.size
            && self.creation_time == other.creation_time
            && self.smallest_seq_num == other.smallest_seq_num
            && self.largest_seq_num == other.largest_seq_num
            && self.smallest == other.smallest
            && self.largest == other.largest
            && self.has_point_keys == other.has_point_keys
            && self.has_range_keys == other.has_range_keys
            && (!self.has_point_keys
                || (self.smallest_point_key == other.smallest_point_key
                    && self.largest_point_key == other.largest_point_key))
            && (!self.has_range_keys
                || (self.smallest_range_key == other.smallest_range_key
                    && self.largest_range_key == other.largest_range_key))
            && self.is_virtual == other.is_virtual
            && self.marked_for_compaction() == other.marked_for_compaction()
    }
}

impl fmt::Display for FileMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:[{}-{}]", self.file_num, self.smallest, self.largest)
    }
}

/// Sort files by increasing sequence number.
pub fn sort_by_seq_num(files: &mut [Arc<FileMetadata>]) {
    files.sort_by(|a, b| a.cmp_seq_num(b));
}

/// Sort files by smallest key.
pub fn sort_by_smallest(files: &mut [Arc<FileMetadata>], cmp: &dyn Comparator) {
    files.sort_by(|a, b| a.cmp_smallest_key(b, cmp));
}
