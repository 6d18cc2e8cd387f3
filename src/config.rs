//! Configuration for hybridkv stores
//!
//! Centralized configuration with sensible defaults. Engine-sizing values
//! (index buckets, page/memory/segment bits, log location) only apply when
//! the store constructs the engine itself; they are ignored for an
//! externally supplied engine.

use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::engine::LogSettings;

/// Main configuration for a store instance
#[derive(Debug, Clone)]
pub struct StoreOptions {
    // -------------------------------------------------------------------------
    // Engine Sizing
    // -------------------------------------------------------------------------
    /// Number of 64-bit buckets in the engine's hash index.
    /// Default: 2^20 buckets (a 64 MB index).
    pub index_bucket_count: u64,

    /// Size of a log page (a contiguous block of in-memory or on-disk
    /// storage) as a power of two. Default: 25 (32 MB).
    pub page_size_bits: u8,

    /// Size of the in-memory region of the log as a power of two. Overflow
    /// is evicted to the on-disk region. Default: 26 (64 MB).
    pub memory_size_bits: u8,

    /// Size of an on-disk log segment (one pre-allocated file) as a power
    /// of two. Default: 28 (256 MB).
    pub segment_size_bits: u8,

    // -------------------------------------------------------------------------
    // Log Location
    // -------------------------------------------------------------------------
    /// Directory for on-disk log files. `None` places them in
    /// `<temp dir>/hybridkv-logs`.
    pub log_directory: Option<PathBuf>,

    /// Log file name prefix. `None` generates a unique id, so two stores
    /// sharing a directory never collide.
    pub log_file_name_prefix: Option<String>,

    /// Delete log files when the store is disposed. Default: true.
    pub delete_log_on_close: bool,

    // -------------------------------------------------------------------------
    // Compaction
    // -------------------------------------------------------------------------
    /// Time between log compaction attempts, in milliseconds. A negative
    /// value disables the compaction scheduler entirely. Default: 60000.
    pub time_between_compactions_ms: i64,

    /// Initial compaction threshold in bytes: compaction runs only when the
    /// safe-readonly region is at least this large. 0 derives the threshold
    /// as `2^memory_size_bits * 2`. Default: 0.
    pub initial_compaction_threshold_bytes: u64,

    /// Tunables for the compaction policy.
    pub compaction: CompactionTuning,

    // -------------------------------------------------------------------------
    // Serialization
    // -------------------------------------------------------------------------
    /// Options for the key/value binary codec.
    pub codec: CodecOptions,
}

/// Options for the binary codec
#[derive(Debug, Clone)]
pub struct CodecOptions {
    /// Use variable-width integer encoding (smaller records, slightly more
    /// CPU). Default: true.
    pub varint_integers: bool,

    /// Reject any single encoded key or value larger than this many bytes.
    /// `None` means unlimited. Default: `None`.
    pub byte_limit: Option<u64>,
}

impl Default for CodecOptions {
    fn default() -> Self {
        Self {
            varint_integers: true,
            byte_limit: None,
        }
    }
}

/// Tunables for the compaction policy
///
/// The defaults reproduce the long-standing behavior of the scheduler:
/// reclaim the oldest 20% of the safe-readonly region per compaction, and
/// double the threshold after 5 consecutive compactions. Neither value is
/// known to be optimal; they are exposed so deployments can experiment.
#[derive(Debug, Clone)]
pub struct CompactionTuning {
    /// Fraction of the safe-readonly region reclaimed per compaction.
    /// Must be in (0, 1]. Default: 0.2.
    pub compact_fraction: f64,

    /// Number of consecutive compactions before the threshold doubles.
    /// An already-compact log can exceed a stale threshold indefinitely;
    /// doubling backs the scheduler off once compaction stops making
    /// progress at the current threshold. Default: 5.
    pub compactions_before_backoff: u8,
}

impl Default for CompactionTuning {
    fn default() -> Self {
        Self {
            compact_fraction: 0.2,
            compactions_before_backoff: 5,
        }
    }
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            index_bucket_count: 1 << 20,
            page_size_bits: 25,
            memory_size_bits: 26,
            segment_size_bits: 28,
            log_directory: None,
            log_file_name_prefix: None,
            delete_log_on_close: true,
            time_between_compactions_ms: 60_000,
            initial_compaction_threshold_bytes: 0,
            compaction: CompactionTuning::default(),
            codec: CodecOptions::default(),
        }
    }
}

impl StoreOptions {
    /// Create a new options builder
    pub fn builder() -> StoreOptionsBuilder {
        StoreOptionsBuilder::default()
    }

    /// Effective compaction threshold: the configured value, or twice the
    /// in-memory region size when the configured value is 0.
    pub(crate) fn compaction_threshold(&self) -> u64 {
        if self.initial_compaction_threshold_bytes == 0 {
            (1u64 << self.memory_size_bits) * 2
        } else {
            self.initial_compaction_threshold_bytes
        }
    }

    /// Engine settings for a store-constructed engine.
    pub(crate) fn log_settings(&self) -> LogSettings {
        let directory = self
            .log_directory
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("hybridkv-logs"));
        let prefix = self
            .log_file_name_prefix
            .clone()
            .unwrap_or_else(generated_log_file_prefix);

        LogSettings {
            log_path: directory.join(format!("{prefix}.log")),
            index_bucket_count: self.index_bucket_count,
            page_size_bits: self.page_size_bits,
            memory_size_bits: self.memory_size_bits,
            segment_size_bits: self.segment_size_bits,
            delete_on_close: self.delete_log_on_close,
        }
    }
}

/// Unique log file prefix: wall clock + pid + process-wide counter.
fn generated_log_file_prefix() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);

    format!("{:016x}-{:x}-{:x}", nanos, process::id(), seq)
}

/// Builder for StoreOptions
#[derive(Default)]
pub struct StoreOptionsBuilder {
    options: StoreOptions,
}

impl StoreOptionsBuilder {
    /// Set the number of hash index buckets
    pub fn index_bucket_count(mut self, count: u64) -> Self {
        self.options.index_bucket_count = count;
        self
    }

    /// Set the log page size (as a power of two)
    pub fn page_size_bits(mut self, bits: u8) -> Self {
        self.options.page_size_bits = bits;
        self
    }

    /// Set the in-memory log region size (as a power of two)
    pub fn memory_size_bits(mut self, bits: u8) -> Self {
        self.options.memory_size_bits = bits;
        self
    }

    /// Set the on-disk segment size (as a power of two)
    pub fn segment_size_bits(mut self, bits: u8) -> Self {
        self.options.segment_size_bits = bits;
        self
    }

    /// Set the log file directory
    pub fn log_directory(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.log_directory = Some(path.into());
        self
    }

    /// Set the log file name prefix
    pub fn log_file_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.options.log_file_name_prefix = Some(prefix.into());
        self
    }

    /// Set whether log files are deleted on close
    pub fn delete_log_on_close(mut self, delete: bool) -> Self {
        self.options.delete_log_on_close = delete;
        self
    }

    /// Set the compaction cadence in milliseconds (negative disables)
    pub fn time_between_compactions_ms(mut self, ms: i64) -> Self {
        self.options.time_between_compactions_ms = ms;
        self
    }

    /// Set the initial compaction threshold in bytes (0 derives from the
    /// in-memory region size)
    pub fn initial_compaction_threshold_bytes(mut self, bytes: u64) -> Self {
        self.options.initial_compaction_threshold_bytes = bytes;
        self
    }

    /// Set the compaction tunables
    pub fn compaction(mut self, tuning: CompactionTuning) -> Self {
        self.options.compaction = tuning;
        self
    }

    /// Set the codec options
    pub fn codec(mut self, codec: CodecOptions) -> Self {
        self.options.codec = codec;
        self
    }

    pub fn build(self) -> StoreOptions {
        self.options
    }
}
