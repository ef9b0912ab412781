//! # Engine Configuration
//!
//! Build-time knobs of the firmware engine become a plain runtime struct.
//! [`OverlayConfig::validate`] runs during `init`; any violation is reported
//! as an `InvalidInit` fault.

use core::fmt;

use crate::index::OverlayIndex;

/// Largest group expressed in minimum-size units
pub const MAX_GROUP_UNITS: u32 = 16;

/// Smallest supported group granularity in bytes
pub const MIN_GROUP_GRANULARITY: u32 = 16;

// ============================================================================
// Policy
// ============================================================================

/// Eviction strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvictionPolicy {
    /// Least recently used
    #[default]
    Lru,
    /// Least frequently used, ties broken by recency
    Lfu,
    /// Recency for cold entries, frequency once an entry reaches `hot_threshold` hits
    Mixed {
        /// Hit count at which an entry stops being promoted by recency
        hot_threshold: u32,
    },
}

impl fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lru => write!(f, "lru"),
            Self::Lfu => write!(f, "lfu"),
            Self::Mixed { hot_threshold } => write!(f, "mixed(hot>={})", hot_threshold),
        }
    }
}

/// What locking a non-resident group does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockMode {
    /// Remember the request; the group is committed locked on its next load
    #[default]
    Defer,
    /// Refuse with `OverlayError::NotResident`
    Reject,
}

/// Where the backing-store index comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableSource {
    /// Index linked into the image
    Static(OverlayIndex),
    /// Index image stored in the backing store, loaded into the top of the cache
    Backing {
        /// Byte offset of the image in the backing store
        offset: u32,
        /// Image size in bytes (including the CRC trailer when CRC is enabled)
        size: u32,
    },
}

impl Default for TableSource {
    fn default() -> Self {
        Self::Static(OverlayIndex::default())
    }
}

// ============================================================================
// Config
// ============================================================================

/// Reasons a configuration is refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// Minimum group size is not a power of two or below the granularity
    BadMinGroupSize(u32),
    /// Maximum group size is not a multiple of the minimum, or too many units
    BadMaxGroupSize(u32),
    /// Entry table capacity of zero
    ZeroEntries,
    /// Empty backing index image
    EmptyTableImage,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadMinGroupSize(size) => write!(f, "invalid minimum group size {}", size),
            Self::BadMaxGroupSize(size) => write!(f, "invalid maximum group size {}", size),
            Self::ZeroEntries => write!(f, "entry table capacity is zero"),
            Self::EmptyTableImage => write!(f, "table image size is zero"),
        }
    }
}

/// Overlay engine configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayConfig {
    /// Allocation granularity of the cache in bytes
    pub min_group_size: u32,
    /// Largest accepted group in bytes
    pub max_group_size: u32,
    /// Eviction strategy
    pub policy: EvictionPolicy,
    /// Check every loaded group (and the index image) with the integrity hook
    pub crc: bool,
    /// Locking behavior for non-resident groups
    pub lock_mode: LockMode,
    /// Entry table capacity; `None` means one entry per cache unit
    pub max_entries: Option<usize>,
    /// Backing-store index source
    pub tables: TableSource,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            min_group_size: 512,
            max_group_size: 4096,
            policy: EvictionPolicy::Lru,
            crc: false,
            lock_mode: LockMode::Defer,
            max_entries: None,
            tables: TableSource::default(),
        }
    }
}

impl OverlayConfig {
    /// Configuration using a link-time index
    pub fn with_index(index: OverlayIndex) -> Self {
        Self {
            tables: TableSource::Static(index),
            ..Self::default()
        }
    }

    /// Configuration loading its index image from the backing store
    pub fn with_backing_tables(offset: u32, size: u32) -> Self {
        Self {
            tables: TableSource::Backing { offset, size },
            ..Self::default()
        }
    }

    /// Set the group granularity
    pub fn with_min_group_size(mut self, size: u32) -> Self {
        self.min_group_size = size;
        self
    }

    /// Set the largest accepted group
    pub fn with_max_group_size(mut self, size: u32) -> Self {
        self.max_group_size = size;
        self
    }

    /// Set the eviction policy
    pub fn with_policy(mut self, policy: EvictionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Enable or disable integrity checks
    pub fn with_crc(mut self, crc: bool) -> Self {
        self.crc = crc;
        self
    }

    /// Set the lock mode
    pub fn with_lock_mode(mut self, mode: LockMode) -> Self {
        self.lock_mode = mode;
        self
    }

    /// Bound the entry table
    pub fn with_max_entries(mut self, entries: usize) -> Self {
        self.max_entries = Some(entries);
        self
    }

    /// Check internal consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        let min = self.min_group_size;
        if !min.is_power_of_two() || min < MIN_GROUP_GRANULARITY {
            return Err(ConfigError::BadMinGroupSize(min));
        }

        let max = self.max_group_size;
        if max < min || max % min != 0 || max / min > MAX_GROUP_UNITS {
            return Err(ConfigError::BadMaxGroupSize(max));
        }

        if self.max_entries == Some(0) {
            return Err(ConfigError::ZeroEntries);
        }

        if let TableSource::Backing { size: 0, .. } = self.tables {
            return Err(ConfigError::EmptyTableImage);
        }

        Ok(())
    }
}

/// Parameters of `OverlayCache::init`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InitArgs {
    /// Load a backing-store index image right away
    pub load_tables: bool,
}
