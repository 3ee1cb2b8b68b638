//! Configuration options for stratadb.

/// Number of levels in the LSM tree.
pub const NUM_LEVELS: usize = 7;

/// Number of L0 files that triggers a compaction.
pub const DEFAULT_L0_COMPACTION_TRIGGER: usize = 4;

/// Default target size for a single table file (2MB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 2 * 1024 * 1024;

/// Default size target for level 1 (10MB).
pub const DEFAULT_MAX_BYTES_FOR_LEVEL_BASE: u64 = 10 * 1024 * 1024;

/// Default size multiplier between adjacent levels.
pub const DEFAULT_MAX_BYTES_FOR_LEVEL_MULTIPLIER: u64 = 10;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct Options {
    /// Enable extra verification (checksums on reads driven by the engine).
    pub paranoid_checks: bool,

    /// Append to an existing MANIFEST on recovery instead of rewriting it,
    /// provided the old one is still small.
    pub reuse_manifest: bool,

    /// Target size for table files; also bounds how large a MANIFEST may
    /// grow before recovery rewrites it.
    pub max_file_size: u64,

    /// Size target for level 1. Each level after that is allowed
    /// `max_bytes_for_level_multiplier` times its predecessor.
    pub max_bytes_for_level_base: u64,

    /// Size multiplier between adjacent levels.
    pub max_bytes_for_level_multiplier: u64,

    /// Number of L0 files that triggers a compaction.
    pub l0_compaction_trigger: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            paranoid_checks: false,
            reuse_manifest: false,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_bytes_for_level_base: DEFAULT_MAX_BYTES_FOR_LEVEL_BASE,
            max_bytes_for_level_multiplier: DEFAULT_MAX_BYTES_FOR_LEVEL_MULTIPLIER,
            l0_compaction_trigger: DEFAULT_L0_COMPACTION_TRIGGER,
        }
    }
}

impl Options {
    /// Create new options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the options.
    pub fn validate(&self) -> crate::Result<()> {
        if self.max_file_size < 1024 {
            return Err(crate::Error::invalid_argument(
                "max_file_size must be at least 1KB",
            ));
        }
        if self.max_bytes_for_level_multiplier < 2 {
            return Err(crate::Error::invalid_argument(
                "max_bytes_for_level_multiplier must be at least 2",
            ));
        }
        if self.l0_compaction_trigger == 0 {
            return Err(crate::Error::invalid_argument(
                "l0_compaction_trigger must be positive",
            ));
        }
        Ok(())
    }

    /// Maximum byte budget for a level before it scores a compaction.
    ///
    /// The result for level 0 is not used; L0 is scored by file count.
    pub fn max_bytes_for_level(&self, level: usize) -> f64 {
        let mut result = self.max_bytes_for_level_base as f64;
        let mut level = level;
        while level > 1 {
            result *= self.max_bytes_for_level_multiplier as f64;
            level -= 1;
        }
        result
    }

    /// Target size for compaction output files.
    pub fn target_file_size(&self) -> u64 {
        self.max_file_size
    }

    /// Maximum bytes of grandparent (level+2) overlap before a compaction
    /// closes its current output file.
    pub fn max_grandparent_overlap_bytes(&self) -> u64 {
        10 * self.target_file_size()
    }

    /// Maximum total bytes a compaction may cover after expanding its
    /// level-N input set.
    pub fn expanded_compaction_byte_size_limit(&self) -> u64 {
        25 * self.target_file_size()
    }
}

/// Options that control a single read.
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    /// Verify block checksums while reading.
    pub verify_checksums: bool,

    /// Allow the blocks touched by this read to populate the block cache.
    /// Compaction scans disable this so bulk reads don't evict hot data.
    pub fill_cache: bool,
}

impl ReadOptions {
    /// Read options for user-facing reads.
    pub fn new() -> Self {
        Self {
            verify_checksums: false,
            fill_cache: true,
        }
    }
}
