//! Resident cache entries.

use arrayvec::ArrayVec;
use bitflags::bitflags;

use crate::token::{GroupId, Token};

/// Multi-group tokens recorded per entry
pub const MAX_ALIASES: usize = 4;

bitflags! {
    /// Entry state bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct EntryFlags: u8 {
        /// Excluded from eviction until unlocked
        const LOCKED = 1 << 0;
        /// Read-only data overlay governed by a reference count
        const DATA   = 1 << 1;
    }
}

/// One resident group
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Group held by this entry
    pub group: GroupId,
    /// First cache unit
    pub unit: usize,
    /// Units occupied
    pub units: usize,
    /// Group size in bytes
    pub size: u32,
    /// State bits
    pub flags: EntryFlags,
    /// Outstanding data-overlay references
    pub ref_count: u32,
    /// Recency stamp; larger is more recent, 0 is the preferred victim
    pub stamp: u64,
    /// Hit counter
    pub hits: u32,
    /// Multi-group tokens resolvable to this entry
    pub aliases: ArrayVec<Token, MAX_ALIASES>,
}

impl CacheEntry {
    /// Freshly loaded entry
    pub fn new(group: GroupId, unit: usize, units: usize, size: u32, stamp: u64) -> Self {
        Self {
            group,
            unit,
            units,
            size,
            flags: EntryFlags::empty(),
            ref_count: 0,
            stamp,
            hits: 1,
            aliases: ArrayVec::new(),
        }
    }

    /// One past the last unit
    pub fn end(&self) -> usize {
        self.unit + self.units
    }

    /// Locked against eviction
    pub fn is_locked(&self) -> bool {
        self.flags.contains(EntryFlags::LOCKED)
    }

    /// Data overlay
    pub fn is_data(&self) -> bool {
        self.flags.contains(EntryFlags::DATA)
    }

    /// Data overlay with outstanding references; must not move or go away
    pub fn is_pinned(&self) -> bool {
        self.is_data() && self.ref_count > 0
    }

    /// May be chosen as a victim
    pub fn is_evictable(&self) -> bool {
        !self.is_locked() && !self.is_pinned()
    }

    /// Record a multi-group alias; returns false if the alias set is full
    pub fn add_alias(&mut self, token: Token) -> bool {
        if self.aliases.contains(&token) {
            return true;
        }
        self.aliases.try_push(token).is_ok()
    }
}
