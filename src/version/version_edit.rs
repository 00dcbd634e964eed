//! VersionEdit - describes changes between versions, and its manifest
//! record encoding.

use bytes::{BufMut, Bytes, BytesMut};
use std::collections::BTreeMap;
use std::fmt;
use std::io::{Read, Write};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::options::NUM_LEVELS;
use crate::types::{default_format_key, DiskFileNum, FileNum, FormatKey, InternalKey};
use crate::util::coding::{
    decode_length_prefixed, decode_u8, decode_varint64, encode_length_prefixed, encode_varint64,
};

use super::file_metadata::{
    BoundType, FileBacking, FileMetadata, MASK_CONTAINS_POINT_KEYS, MASK_LARGEST, MASK_SMALLEST,
};
use super::{custom_tag, EditTag};

/// A file removed from a level. The file itself may still be referenced by
/// another level, when it moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeletedFileEntry {
    pub level: usize,
    pub file_num: FileNum,
}

/// A file added to a level, either new or moved from another level.
#[derive(Debug, Clone)]
pub struct NewFileEntry {
    pub level: usize,
    pub meta: Arc<FileMetadata>,
    /// Set only when decoding a virtual sstable, whose backing must be looked
    /// up among the created backings.
    pub backing_file_num: Option<DiskFileNum>,
}

impl NewFileEntry {
    pub fn new(level: usize, meta: Arc<FileMetadata>) -> Self {
        Self {
            level,
            meta,
            backing_file_num: None,
        }
    }

    fn backing_disk_file_num(&self) -> Option<DiskFileNum> {
        self.meta
            .backing()
            .map(|b| b.disk_file_num)
            .or(self.backing_file_num)
    }
}

/// The changes between two versions, along with the database bookkeeping
/// persisted alongside them.
///
/// A file number may be both deleted and added when a file moves between
/// levels.
#[derive(Debug, Clone, Default)]
pub struct VersionEdit {
    /// Name of the comparer. Only set in the first edit of a manifest.
    pub comparer_name: String,
    /// Smallest log number whose contents are not yet flushed. Zero when
    /// unset.
    pub min_unflushed_log_num: FileNum,
    /// Kept only so that old manifests can be displayed.
    pub obsolete_prev_log_num: u64,
    /// Next file number to allocate. Zero when unset.
    pub next_file_num: FileNum,
    /// Upper bound on sequence numbers in flushed logs.
    pub last_seq_num: u64,
    /// Deleted files. Metadata is absent when the entry was decoded from a
    /// record, which only carries the file number.
    pub deleted_files: BTreeMap<DeletedFileEntry, Option<Arc<FileMetadata>>>,
    pub new_files: Vec<NewFileEntry>,
    /// Backings created in this edit for virtual sstables. A backing is
    /// created in exactly one edit.
    pub created_backing_tables: Vec<Arc<FileBacking>>,
    /// Backings no longer referenced by the latest version. A backing is
    /// removed in exactly one edit.
    pub removed_backing_tables: Vec<DiskFileNum>,
}

impl VersionEdit {
    /// Create a new empty edit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file to a level.
    pub fn add_file(&mut self, level: usize, meta: Arc<FileMetadata>) {
        self.new_files.push(NewFileEntry::new(level, meta));
    }

    /// Delete a file from a level.
    pub fn delete_file(&mut self, level: usize, meta: Arc<FileMetadata>) {
        let entry = DeletedFileEntry {
            level,
            file_num: meta.file_num,
        };
        self.deleted_files.insert(entry, Some(meta));
    }

    /// Encode the edit as a manifest record.
    pub fn encode(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(256);
        self.encode_into(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Encode the edit and write the record to `w`.
    pub fn encode_to<W: Write>(&self, w: &mut W) -> Result<()> {
        let record = self.encode()?;
        w.write_all(&record)?;
        Ok(())
    }

    fn encode_into(&self, buf: &mut BytesMut) -> Result<()> {
        if !self.comparer_name.is_empty() {
            put_tag(buf, EditTag::Comparator);
            encode_length_prefixed(buf, self.comparer_name.as_bytes());
        }
        if self.min_unflushed_log_num.0 != 0 {
            put_tag(buf, EditTag::LogNumber);
            encode_varint64(buf, self.min_unflushed_log_num.0);
        }
        if self.obsolete_prev_log_num != 0 {
            put_tag(buf, EditTag::PrevLogNumber);
            encode_varint64(buf, self.obsolete_prev_log_num);
        }
        if self.next_file_num.0 != 0 {
            put_tag(buf, EditTag::NextFileNumber);
            encode_varint64(buf, self.next_file_num.0);
        }
        for dfn in &self.removed_backing_tables {
            put_tag(buf, EditTag::RemovedBackingTable);
            encode_varint64(buf, dfn.0);
        }
        for backing in &self.created_backing_tables {
            put_tag(buf, EditTag::CreatedBackingTable);
            encode_varint64(buf, backing.disk_file_num.0);
            encode_varint64(buf, backing.size);
        }
        // The first record of a manifest carries the last sequence number
        // even when it is zero.
        if self.last_seq_num != 0 || !self.comparer_name.is_empty() {
            put_tag(buf, EditTag::LastSequence);
            encode_varint64(buf, self.last_seq_num);
        }
        for entry in self.deleted_files.keys() {
            put_tag(buf, EditTag::DeletedFile);
            encode_varint64(buf, entry.level as u64);
            encode_varint64(buf, entry.file_num.0);
        }
        for nf in &self.new_files {
            encode_new_file(buf, nf)?;
        }
        Ok(())
    }

    /// Decode a manifest record.
    ///
    /// Virtual sstables are decoded without a backing; their entry records
    /// the backing's disk file number instead.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut edit = VersionEdit::new();
        let mut cursor = data;

        while !cursor.is_empty() {
            let tag = read_uvarint(&mut cursor)?;
            let tag = EditTag::from_u64(tag).ok_or_else(Error::corrupt_manifest)?;

            match tag {
                EditTag::Comparator => {
                    let name = read_bytes(&mut cursor)?;
                    edit.comparer_name =
                        String::from_utf8(name.to_vec()).map_err(|_| Error::corrupt_manifest())?;
                }
                EditTag::LogNumber => {
                    edit.min_unflushed_log_num = FileNum(read_uvarint(&mut cursor)?);
                }
                EditTag::NextFileNumber => {
                    edit.next_file_num = FileNum(read_uvarint(&mut cursor)?);
                }
                EditTag::LastSequence => {
                    edit.last_seq_num = read_uvarint(&mut cursor)?;
                }
                EditTag::CompactPointer => {
                    read_level(&mut cursor)?;
                    read_bytes(&mut cursor)?;
                }
                EditTag::RemovedBackingTable => {
                    let n = read_uvarint(&mut cursor)?;
                    edit.removed_backing_tables.push(DiskFileNum(n));
                }
                EditTag::CreatedBackingTable => {
                    let dfn = read_uvarint(&mut cursor)?;
                    let size = read_uvarint(&mut cursor)?;
                    edit.created_backing_tables
                        .push(Arc::new(FileBacking::new(DiskFileNum(dfn), size)));
                }
                EditTag::DeletedFile => {
                    let level = read_level(&mut cursor)?;
                    let file_num = FileNum(read_uvarint(&mut cursor)?);
                    edit.deleted_files
                        .insert(DeletedFileEntry { level, file_num }, None);
                }
                EditTag::NewFile
                | EditTag::NewFile2
                | EditTag::NewFile3
                | EditTag::NewFile4
                | EditTag::NewFile5 => {
                    edit.new_files.push(decode_new_file(tag, &mut cursor)?);
                }
                EditTag::PrevLogNumber => {
                    edit.obsolete_prev_log_num = read_uvarint(&mut cursor)?;
                }
                EditTag::ColumnFamily
                | EditTag::ColumnFamilyAdd
                | EditTag::ColumnFamilyDrop
                | EditTag::MaxColumnFamily => {
                    return Err(Error::corruption("column families are not supported"));
                }
            }
        }

        Ok(edit)
    }

    /// Read one whole record from `r` and decode it.
    pub fn decode_from<R: Read>(r: &mut R) -> Result<Self> {
        let mut data = Vec::new();
        r.read_to_end(&mut data)?;
        Self::decode(&data)
    }

    fn to_string_with(&self, verbose: bool, format: FormatKey) -> String {
        let mut buf = String::new();
        if !self.comparer_name.is_empty() {
            buf.push_str(&format!("  comparer:     {}\n", self.comparer_name));
        }
        if self.min_unflushed_log_num.0 != 0 {
            buf.push_str(&format!("  log-num:       {}\n", self.min_unflushed_log_num.0));
        }
        if self.obsolete_prev_log_num != 0 {
            buf.push_str(&format!("  prev-log-num:  {}\n", self.obsolete_prev_log_num));
        }
        if self.next_file_num.0 != 0 {
            buf.push_str(&format!("  next-file-num: {}\n", self.next_file_num.0));
        }
        if self.last_seq_num != 0 {
            buf.push_str(&format!("  last-seq-num:  {}\n", self.last_seq_num));
        }
        for entry in self.deleted_files.keys() {
            buf.push_str(&format!("  deleted:       L{} {}\n", entry.level, entry.file_num));
        }
        for nf in &self.new_files {
            buf.push_str(&format!(
                "  added:         L{} {}\n",
                nf.level,
                nf.meta.debug_string(format, verbose)
            ));
        }
        for backing in &self.created_backing_tables {
            buf.push_str(&format!(
                "  add-backing:   {} ({})\n",
                backing.disk_file_num, backing.size
            ));
        }
        for dfn in &self.removed_backing_tables {
            buf.push_str(&format!("  del-backing:   {}\n", dfn));
        }
        buf
    }

    /// Like `Display`, but with full file metadata.
    pub fn debug_string(&self, format: FormatKey) -> String {
        self.to_string_with(true, format)
    }
}

impl fmt::Display for VersionEdit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_with(false, default_format_key))
    }
}

/// Two edits are equal when they would encode to equivalent records.
impl PartialEq for VersionEdit {
    fn eq(&self, other: &Self) -> bool {
        self.comparer_name == other.comparer_name
            && self.min_unflushed_log_num == other.min_unflushed_log_num
            && self.obsolete_prev_log_num == other.obsolete_prev_log_num
            && self.next_file_num == other.next_file_num
            && self.last_seq_num == other.last_seq_num
            && self.deleted_files.keys().eq(other.deleted_files.keys())
            && self.new_files.len() == other.new_files.len()
            && self.new_files.iter().zip(&other.new_files).all(|(a, b)| {
                a.level == b.level
                    && a.meta.same_persisted_state(&b.meta)
                    && (!a.meta.is_virtual
                        || a.backing_disk_file_num() == b.backing_disk_file_num())
            })
            && self.created_backing_tables.len() == other.created_backing_tables.len()
            && self
                .created_backing_tables
                .iter()
                .zip(&other.created_backing_tables)
                .all(|(a, b)| a.disk_file_num == b.disk_file_num && a.size == b.size)
            && self.removed_backing_tables == other.removed_backing_tables
    }
}

fn put_tag(buf: &mut BytesMut, tag: EditTag) {
    encode_varint64(buf, tag.to_u64());
}

fn put_key(buf: &mut BytesMut, key: &InternalKey) {
    encode_varint64(buf, key.encoded_len() as u64);
    key.encode_to(buf);
}

fn encode_new_file(buf: &mut BytesMut, nf: &NewFileEntry) -> Result<()> {
    let meta = &nf.meta;
    let custom_fields = meta.has_custom_fields();
    let tag = if meta.has_range_keys {
        EditTag::NewFile5
    } else if custom_fields {
        EditTag::NewFile4
    } else {
        EditTag::NewFile2
    };
    put_tag(buf, tag);
    encode_varint64(buf, nf.level as u64);
    encode_varint64(buf, meta.file_num.0);
    encode_varint64(buf, meta.size);
    if !meta.has_range_keys {
        put_key(buf, &meta.smallest_point_key);
        put_key(buf, &meta.largest_point_key);
    } else {
        buf.put_u8(meta.bounds_marker()?);
        if meta.has_point_keys {
            put_key(buf, &meta.smallest_point_key);
            put_key(buf, &meta.largest_point_key);
        }
        put_key(buf, &meta.smallest_range_key);
        put_key(buf, &meta.largest_range_key);
    }
    encode_varint64(buf, meta.smallest_seq_num);
    encode_varint64(buf, meta.largest_seq_num);
    if custom_fields {
        if meta.creation_time != 0 {
            encode_varint64(buf, custom_tag::CREATION_TIME);
            let mut field = BytesMut::with_capacity(10);
            encode_varint64(&mut field, meta.creation_time as u64);
            encode_length_prefixed(buf, &field);
        }
        if meta.marked_for_compaction() {
            encode_varint64(buf, custom_tag::NEEDS_COMPACTION);
            encode_length_prefixed(buf, &[1]);
        }
        if meta.is_virtual {
            let backing = nf.backing_disk_file_num().ok_or_else(|| {
                Error::corruption(format!("virtual sstable {} has no backing", meta.file_num))
            })?;
            encode_varint64(buf, custom_tag::VIRTUAL);
            encode_varint64(buf, backing.0);
        }
        encode_varint64(buf, custom_tag::TERMINATE);
    }
    Ok(())
}

fn decode_new_file(tag: EditTag, cursor: &mut &[u8]) -> Result<NewFileEntry> {
    let level = read_level(cursor)?;
    let file_num = FileNum(read_uvarint(cursor)?);
    if tag == EditTag::NewFile3 {
        // Path id, unused.
        read_uvarint(cursor)?;
    }
    let size = read_uvarint(cursor)?;

    let mut point_bounds = None;
    let mut range_bounds = None;
    let mut marker = 0u8;
    if tag != EditTag::NewFile5 {
        point_bounds = Some((read_key(cursor)?, read_key(cursor)?));
    } else {
        marker = decode_u8(cursor).ok_or_else(Error::corrupt_manifest)?;
        if marker & MASK_CONTAINS_POINT_KEYS != 0 {
            point_bounds = Some((read_key(cursor)?, read_key(cursor)?));
        } else if marker & (MASK_SMALLEST | MASK_LARGEST) != 0 {
            return Err(Error::corruption(format!(
                "new-file-4-range-keys: table without point keys has point key bounds: marker={:x}",
                marker
            )));
        }
        range_bounds = Some((read_key(cursor)?, read_key(cursor)?));
    }

    let (mut smallest_seq_num, mut largest_seq_num) = (0, 0);
    if tag != EditTag::NewFile {
        smallest_seq_num = read_uvarint(cursor)?;
        largest_seq_num = read_uvarint(cursor)?;
    }

    let mut marked_for_compaction = false;
    let mut creation_time = 0u64;
    let mut backing_file_num = None;
    if tag == EditTag::NewFile4 || tag == EditTag::NewFile5 {
        loop {
            let custom = read_uvarint(cursor)?;
            if custom == custom_tag::TERMINATE {
                break;
            }
            if custom == custom_tag::VIRTUAL {
                backing_file_num = Some(DiskFileNum(read_uvarint(cursor)?));
                continue;
            }
            let field = read_bytes(cursor)?;
            match custom {
                custom_tag::NEEDS_COMPACTION => {
                    if field.len() != 1 {
                        return Err(Error::corruption(
                            "new-file4: need-compaction field wrong size",
                        ));
                    }
                    marked_for_compaction = field[0] == 1;
                }
                custom_tag::CREATION_TIME => {
                    let mut value = &field[..];
                    creation_time = decode_varint64(&mut value)
                        .filter(|_| value.is_empty())
                        .ok_or_else(|| {
                            Error::corruption("new-file4: invalid file creation time")
                        })?;
                }
                custom_tag::PATH_ID => {
                    return Err(Error::corruption("new-file4: path-id field not supported"));
                }
                other if other & custom_tag::NON_SAFE_IGNORE_MASK != 0 => {
                    return Err(Error::corruption(format!(
                        "new-file4: custom field not supported: {}",
                        other
                    )));
                }
                _ => {}
            }
        }
    }

    let mut meta = FileMetadata::new(file_num, size)
        .with_seq_nums(smallest_seq_num, largest_seq_num)
        .with_creation_time(creation_time as i64)
        .with_marked_for_compaction(marked_for_compaction);
    if backing_file_num.is_some() {
        meta = meta.with_virtual();
    }
    if let Some((smallest, largest)) = point_bounds {
        meta.smallest_point_key = smallest;
        meta.largest_point_key = largest;
        meta.has_point_keys = true;
    }
    match range_bounds {
        None => meta.set_decoded_bounds(BoundType::PointKey, BoundType::PointKey),
        Some((smallest, largest)) => {
            meta.smallest_range_key = smallest;
            meta.largest_range_key = largest;
            meta.has_range_keys = true;
            let bound = |mask| {
                if marker & mask == mask {
                    BoundType::PointKey
                } else {
                    BoundType::RangeKey
                }
            };
            meta.set_decoded_bounds(bound(MASK_SMALLEST), bound(MASK_LARGEST));
        }
    }
    if backing_file_num.is_none() {
        meta.init_physical_backing();
    }

    Ok(NewFileEntry {
        level,
        meta: Arc::new(meta),
        backing_file_num,
    })
}

fn read_uvarint(cursor: &mut &[u8]) -> Result<u64> {
    decode_varint64(cursor).ok_or_else(Error::corrupt_manifest)
}

fn read_bytes(cursor: &mut &[u8]) -> Result<Bytes> {
    decode_length_prefixed(cursor).ok_or_else(Error::corrupt_manifest)
}

fn read_level(cursor: &mut &[u8]) -> Result<usize> {
    let level = read_uvarint(cursor)?;
    if level >= NUM_LEVELS as u64 {
        return Err(Error::corrupt_manifest());
    }
    Ok(level as usize)
}

fn read_key(cursor: &mut &[u8]) -> Result<InternalKey> {
    InternalKey::decode(&read_bytes(cursor)?)
}
