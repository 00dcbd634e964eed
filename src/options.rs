//! Configuration options for the manifest layer.

use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::types::{default_format_key, FormatKey};
use crate::util::comparator::{BytewiseComparator, Comparator};

/// Number of levels in the LSM tree.
pub const NUM_LEVELS: usize = 7;

/// Default number of bytes of L0 data between flush split keys (2MB).
pub const DEFAULT_FLUSH_SPLIT_BYTES: i64 = 2 * 1024 * 1024;

/// Default read compaction rate: one allowed seek per 16KB of file data.
pub const DEFAULT_READ_COMPACTION_RATE: i64 = 16 * 1024;

/// Lower bound on the number of seeks a new file is granted before it
/// becomes a read-compaction candidate.
pub const MIN_ALLOWED_SEEKS: i64 = 100;

/// Options that govern how edits are applied to versions.
#[derive(Clone)]
pub struct ManifestOptions {
    /// User key comparator. All versions built by one manifest must share it.
    pub comparer: Arc<dyn Comparator>,

    /// Formatter used when user keys appear in debug output.
    pub format_key: FormatKey,

    /// Target bytes of L0 data between flush split keys. Zero or negative
    /// disables split keys.
    pub flush_split_bytes: i64,

    /// Bytes of file data per allowed seek.
    pub read_compaction_rate: i64,
}

impl Default for ManifestOptions {
    fn default() -> Self {
        Self {
            comparer: Arc::new(BytewiseComparator::new()),
            format_key: default_format_key,
            flush_split_bytes: DEFAULT_FLUSH_SPLIT_BYTES,
            read_compaction_rate: DEFAULT_READ_COMPACTION_RATE,
        }
    }
}

impl fmt::Debug for ManifestOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManifestOptions")
            .field("comparer", &self.comparer.name())
            .field("flush_split_bytes", &self.flush_split_bytes)
            .field("read_compaction_rate", &self.read_compaction_rate)
            .finish()
    }
}

impl ManifestOptions {
    /// Create options with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the user key comparator.
    pub fn comparer(mut self, comparer: Arc<dyn Comparator>) -> Self {
        self.comparer = comparer;
        self
    }

    /// Set the user key formatter.
    pub fn format_key(mut self, format_key: FormatKey) -> Self {
        self.format_key = format_key;
        self
    }

    /// Set the flush split size.
    pub fn flush_split_bytes(mut self, bytes: i64) -> Self {
        self.flush_split_bytes = bytes;
        self
    }

    /// Set the read compaction rate.
    pub fn read_compaction_rate(mut self, rate: i64) -> Self {
        self.read_compaction_rate = rate;
        self
    }

    /// Seeks granted to a file of `size` bytes.
    pub fn allowed_seeks(&self, size: u64) -> i64 {
        let seeks = size as i64 / self.read_compaction_rate.max(1);
        seeks.max(MIN_ALLOWED_SEEKS)
    }

    /// Validate the options.
    pub fn validate(&self) -> Result<()> {
        if self.read_compaction_rate <= 0 {
            return Err(Error::invalid_configuration(
                "read_compaction_rate must be positive",
            ));
        }
        if self.comparer.name().is_empty() {
            return Err(Error::invalid_configuration("comparer must be named"));
        }
        Ok(())
    }
}
