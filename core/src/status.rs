//! Owned snapshot of the engine state.

use alloc::vec::Vec;
use core::fmt;

use arrayvec::ArrayVec;

use crate::config::EvictionPolicy;
use crate::control::CacheStats;
use crate::entry::MAX_ALIASES;
use crate::token::{GroupId, Token};

/// One resident entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryStatus {
    /// Group id
    pub group: GroupId,
    /// Address of the first byte
    pub address: usize,
    /// Group size in bytes
    pub size: u32,
    /// Excluded from eviction
    pub locked: bool,
    /// Data overlay
    pub data: bool,
    /// Outstanding data references
    pub ref_count: u32,
    /// Recency stamp
    pub stamp: u64,
    /// Hit counter
    pub hits: u32,
    /// Multi-group tokens resolving here
    pub aliases: ArrayVec<Token, MAX_ALIASES>,
}

/// Engine snapshot returned by `status()`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CacheStatus {
    /// `init` succeeded
    pub initialized: bool,
    /// Misses may load
    pub enabled: bool,
    /// Load operations allowed
    pub load_enabled: bool,
    /// Index tables available
    pub tables_loaded: bool,
    /// Active eviction policy
    pub policy: EvictionPolicy,
    /// Region size in bytes
    pub cache_bytes: usize,
    /// Bytes available to groups (region minus index reservation)
    pub usable_bytes: usize,
    /// Free bytes
    pub free_bytes: usize,
    /// Longest free run in bytes
    pub largest_free_bytes: usize,
    /// Counters
    pub stats: CacheStats,
    /// Resident entries in address order
    pub entries: Vec<EntryStatus>,
}

impl CacheStatus {
    /// Entry of `group`, if resident
    pub fn entry(&self, group: GroupId) -> Option<&EntryStatus> {
        self.entries.iter().find(|e| e.group == group)
    }

    /// Bytes held by resident entries
    pub fn resident_bytes(&self) -> usize {
        self.usable_bytes - self.free_bytes
    }
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "overlay cache: {} resident, {}/{} bytes free (largest {}), policy {}",
            self.entries.len(),
            self.free_bytes,
            self.usable_bytes,
            self.largest_free_bytes,
            self.policy
        )?;
        write!(
            f,
            "loads {} hits {} misses {} evictions {} defrag {} errors {}",
            self.stats.loads,
            self.stats.hits,
            self.stats.misses,
            self.stats.evictions,
            self.stats.defragmentations,
            self.stats.errors
        )
    }
}
