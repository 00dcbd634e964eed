//! Core key and file-number types.

use bytes::{BufMut, Bytes, BytesMut};
use std::cmp::Ordering;
use std::fmt;

use crate::error::{Error, Result};
use crate::util::comparator::Comparator;

/// Largest representable sequence number (56 bits).
pub const SEQ_NUM_MAX: u64 = (1 << 56) - 1;

/// Formats a user key for display in debug output.
pub type FormatKey = fn(&[u8]) -> String;

/// Default key formatter: printable ASCII verbatim, everything else escaped.
pub fn default_format_key(key: &[u8]) -> String {
    key.escape_ascii().to_string()
}

/// The kind of an internal key, stored in the low byte of its trailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum KeyKind {
    Delete = 0,
    Set = 1,
    Merge = 2,
    LogData = 3,
    SingleDelete = 7,
    RangeDelete = 15,
    Separator = 17,
    SetWithDelete = 18,
    RangeKeyDelete = 19,
    RangeKeyUnset = 20,
    RangeKeySet = 21,
    IngestSst = 22,
    DeleteSized = 23,
    Invalid = 255,
}

impl KeyKind {
    /// Create from byte. Unknown kinds map to `Invalid`.
    pub fn from_byte(b: u8) -> Self {
        match b {
            0 => KeyKind::Delete,
            1 => KeyKind::Set,
            2 => KeyKind::Merge,
            3 => KeyKind::LogData,
            7 => KeyKind::SingleDelete,
            15 => KeyKind::RangeDelete,
            17 => KeyKind::Separator,
            18 => KeyKind::SetWithDelete,
            19 => KeyKind::RangeKeyDelete,
            20 => KeyKind::RangeKeyUnset,
            21 => KeyKind::RangeKeySet,
            22 => KeyKind::IngestSst,
            23 => KeyKind::DeleteSized,
            _ => KeyKind::Invalid,
        }
    }

    /// Convert to byte.
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    /// Whether this kind belongs to a range key (set, unset or delete).
    pub fn is_range_key(self) -> bool {
        matches!(
            self,
            KeyKind::RangeKeySet | KeyKind::RangeKeyUnset | KeyKind::RangeKeyDelete
        )
    }

    fn name(self) -> &'static str {
        match self {
            KeyKind::Delete => "DEL",
            KeyKind::Set => "SET",
            KeyKind::Merge => "MERGE",
            KeyKind::LogData => "LOGDATA",
            KeyKind::SingleDelete => "SINGLEDEL",
            KeyKind::RangeDelete => "RANGEDEL",
            KeyKind::Separator => "SEPARATOR",
            KeyKind::SetWithDelete => "SETWITHDEL",
            KeyKind::RangeKeyDelete => "RANGEKEYDEL",
            KeyKind::RangeKeyUnset => "RANGEKEYUNSET",
            KeyKind::RangeKeySet => "RANGEKEYSET",
            KeyKind::IngestSst => "INGESTSST",
            KeyKind::DeleteSized => "DELSIZED",
            KeyKind::Invalid => "INVALID",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        let kind = match name {
            "DEL" => KeyKind::Delete,
            "SET" => KeyKind::Set,
            "MERGE" => KeyKind::Merge,
            "LOGDATA" => KeyKind::LogData,
            "SINGLEDEL" => KeyKind::SingleDelete,
            "RANGEDEL" => KeyKind::RangeDelete,
            "SEPARATOR" => KeyKind::Separator,
            "SETWITHDEL" => KeyKind::SetWithDelete,
            "RANGEKEYDEL" => KeyKind::RangeKeyDelete,
            "RANGEKEYUNSET" => KeyKind::RangeKeyUnset,
            "RANGEKEYSET" => KeyKind::RangeKeySet,
            "INGESTSST" => KeyKind::IngestSst,
            "DELSIZED" => KeyKind::DeleteSized,
            _ => return None,
        };
        Some(kind)
    }
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Internal key: a user key plus an 8-byte trailer.
///
/// The trailer packs the sequence number in the high 56 bits and the
/// [`KeyKind`] in the low 8 bits:
/// ```text
/// [user_key][trailer (8 bytes, little-endian)]
/// ```
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct InternalKey {
    /// The user-provided key.
    pub user_key: Bytes,
    /// `(seq_num << 8) | kind`.
    pub trailer: u64,
}

impl InternalKey {
    /// Create a new internal key.
    pub fn new(user_key: impl Into<Bytes>, seq_num: u64, kind: KeyKind) -> Self {
        debug_assert!(seq_num <= SEQ_NUM_MAX);
        Self {
            user_key: user_key.into(),
            trailer: (seq_num << 8) | kind.to_byte() as u64,
        }
    }

    /// Create the exclusive end sentinel used for range deletions ending at
    /// `user_key`.
    pub fn range_delete_sentinel(user_key: impl Into<Bytes>) -> Self {
        Self::new(user_key, SEQ_NUM_MAX, KeyKind::RangeDelete)
    }

    /// Create the exclusive end sentinel used for range keys ending at
    /// `user_key`.
    pub fn range_key_sentinel(user_key: impl Into<Bytes>, kind: KeyKind) -> Self {
        debug_assert!(kind.is_range_key());
        Self::new(user_key, SEQ_NUM_MAX, kind)
    }

    /// Get the user key.
    pub fn user_key(&self) -> &[u8] {
        &self.user_key
    }

    /// Get the sequence number.
    pub fn seq_num(&self) -> u64 {
        self.trailer >> 8
    }

    /// Get the key kind.
    pub fn kind(&self) -> KeyKind {
        KeyKind::from_byte(self.trailer as u8)
    }

    /// Whether this key is an exclusive upper bound: a range deletion or
    /// range key end carrying the maximum sequence number. Such a key does
    /// not include its own user key.
    pub fn is_exclusive_sentinel(&self) -> bool {
        let kind = self.kind();
        (kind == KeyKind::RangeDelete || kind.is_range_key()) && self.seq_num() == SEQ_NUM_MAX
    }

    /// Compare two internal keys: user keys ascending by `cmp`, then
    /// trailers descending so that newer entries sort first.
    pub fn compare(cmp: &dyn Comparator, a: &InternalKey, b: &InternalKey) -> Ordering {
        cmp.compare(&a.user_key, &b.user_key)
            .then_with(|| b.trailer.cmp(&a.trailer))
    }

    /// Encode into an existing buffer.
    pub fn encode_to(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.user_key);
        buf.put_u64_le(self.trailer);
    }

    /// Decode an internal key from bytes.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < 8 {
            return Err(Error::corrupt_manifest());
        }
        let n = data.len() - 8;
        let mut trailer = [0u8; 8];
        trailer.copy_from_slice(&data[n..]);
        Ok(Self {
            user_key: Bytes::copy_from_slice(&data[..n]),
            trailer: u64::from_le_bytes(trailer),
        })
    }

    /// Get the encoded length.
    pub fn encoded_len(&self) -> usize {
        self.user_key.len() + 8
    }

    /// Render as `key#seq,KIND` using `format_key` for the user key.
    pub fn pretty(&self, format_key: FormatKey) -> String {
        let seq = self.seq_num();
        if seq == SEQ_NUM_MAX {
            format!("{}#inf,{}", format_key(&self.user_key), self.kind())
        } else {
            format!("{}#{},{}", format_key(&self.user_key), seq, self.kind())
        }
    }

    /// Parse the `key#seq,KIND` form produced by [`InternalKey::pretty`].
    pub fn parse_pretty(s: &str) -> Result<Self> {
        let bad = || Error::invalid_argument(format!("malformed internal key {:?}", s));
        let (user_key, rest) = s.rsplit_once('#').ok_or_else(bad)?;
        let (seq, kind) = rest.split_once(',').ok_or_else(bad)?;
        let seq = if seq == "inf" {
            SEQ_NUM_MAX
        } else {
            seq.parse::<u64>().map_err(|_| bad())?
        };
        let kind = KeyKind::from_name(kind).ok_or_else(bad)?;
        Ok(Self::new(Bytes::copy_from_slice(user_key.as_bytes()), seq, kind))
    }
}

impl fmt::Debug for InternalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pretty(default_format_key))
    }
}

impl fmt::Display for InternalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pretty(default_format_key))
    }
}

/// Identifies a physical or virtual sstable for the lifetime of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct FileNum(pub u64);

/// Identifies an on-disk object. A physical table's disk file number equals
/// its file number; virtual tables share their backing's disk file number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct DiskFileNum(pub u64);

impl FileNum {
    /// The disk file number of a physical table with this file number.
    pub fn disk_file_num(self) -> DiskFileNum {
        DiskFileNum(self.0)
    }
}

impl fmt::Display for FileNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06}", self.0)
    }
}

impl fmt::Display for DiskFileNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06}", self.0)
    }
}
