//! # Cache Control Block
//!
//! Owns the cache region and the resident entries. The region is divided into
//! units of the minimum group size; entries are kept sorted by their first
//! unit and free space is whatever lies between them.
//!
//! ```text
//! unit 0                                   usable_units      total_units
//! ├──────┬──────────┬────┬────────┬────────┼─────────────────┤
//! │  A   │   free   │ B  │   C    │  free  │  index tables   │
//! └──────┴──────────┴────┴────────┴────────┴─────────────────┘
//! ```

use alloc::vec::Vec;

use crate::entry::CacheEntry;
use crate::token::GroupId;

/// Engine counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    /// Committed group loads
    pub loads: u64,
    /// Resolutions served from the cache
    pub hits: u64,
    /// Resolutions that found the group absent
    pub misses: u64,
    /// Entries evicted to make room
    pub evictions: u64,
    /// Compaction passes
    pub defragmentations: u64,
    /// Faults reported through the error hook
    pub errors: u64,
}

/// Cache region plus resident-entry bookkeeping
#[derive(Debug)]
pub struct ControlBlock<'c> {
    region: &'c mut [u8],
    unit_size: usize,
    total_units: usize,
    usable_units: usize,
    max_entries: usize,
    entries: Vec<CacheEntry>,
    tick: u64,
}

impl<'c> ControlBlock<'c> {
    /// Take ownership of `region`, which must be a multiple of `unit_size`
    pub fn new(region: &'c mut [u8], unit_size: usize, max_entries: usize) -> Self {
        let total_units = region.len() / unit_size;
        Self {
            region,
            unit_size,
            total_units,
            usable_units: total_units,
            max_entries,
            entries: Vec::with_capacity(max_entries.min(total_units)),
            tick: 0,
        }
    }

    // ------------------------------------------------------------------------
    // Geometry
    // ------------------------------------------------------------------------

    /// Unit size in bytes
    pub fn unit_size(&self) -> usize {
        self.unit_size
    }

    /// Units in the region
    pub fn total_units(&self) -> usize {
        self.total_units
    }

    /// Units available to groups
    pub fn usable_units(&self) -> usize {
        self.usable_units
    }

    /// Entry table capacity
    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Units needed for `bytes`
    pub fn units_for(&self, bytes: usize) -> usize {
        bytes.div_ceil(self.unit_size)
    }

    /// Address of the first byte of the region
    pub fn base_address(&self) -> usize {
        self.region.as_ptr() as usize
    }

    /// Address of unit `unit`
    pub fn unit_address(&self, unit: usize) -> usize {
        self.base_address() + unit * self.unit_size
    }

    /// `len` bytes starting at unit `unit`
    pub fn bytes_mut(&mut self, unit: usize, len: usize) -> &mut [u8] {
        let start = unit * self.unit_size;
        &mut self.region[start..start + len]
    }

    /// Whole region
    pub fn region_mut(&mut self) -> &mut [u8] {
        &mut *self.region
    }

    /// Set aside the top `units` units; returns the first reserved unit
    pub fn reserve_top(&mut self, units: usize) -> usize {
        self.usable_units = self.total_units - units;
        self.usable_units
    }

    /// Give the reserved top units back to groups
    pub fn release_reservation(&mut self) {
        self.usable_units = self.total_units;
    }

    // ------------------------------------------------------------------------
    // Entries
    // ------------------------------------------------------------------------

    /// Resident entries, sorted by first unit
    pub fn entries(&self) -> &[CacheEntry] {
        &self.entries
    }

    /// Mutable access for in-place relocation; order must be preserved
    pub fn entries_mut(&mut self) -> &mut [CacheEntry] {
        &mut self.entries
    }

    /// Position of the entry holding `group`
    pub fn find(&self, group: GroupId) -> Option<usize> {
        self.entries.iter().position(|e| e.group == group)
    }

    /// Entry holding `group`
    pub fn entry_mut(&mut self, group: GroupId) -> Option<&mut CacheEntry> {
        self.entries.iter_mut().find(|e| e.group == group)
    }

    /// Insert keeping the unit order
    pub fn insert(&mut self, entry: CacheEntry) {
        let pos = self.entries.partition_point(|e| e.unit < entry.unit);
        self.entries.insert(pos, entry);
    }

    /// Remove the entry at `pos`
    pub fn remove(&mut self, pos: usize) -> CacheEntry {
        self.entries.remove(pos)
    }

    /// Drop every entry
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Advance and return the recency clock
    pub fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    // ------------------------------------------------------------------------
    // Free space
    // ------------------------------------------------------------------------

    /// Free runs `(first unit, length)` in the usable area
    pub fn holes(&self) -> Holes<'_> {
        Holes {
            entries: &self.entries,
            next: 0,
            cursor: 0,
            limit: self.usable_units,
        }
    }

    /// Free units in total
    pub fn free_units(&self) -> usize {
        self.holes().map(|(_, len)| len).sum()
    }

    /// Longest free run
    pub fn largest_hole(&self) -> usize {
        self.holes().map(|(_, len)| len).max().unwrap_or(0)
    }

    /// Lowest free run of at least `units`
    pub fn first_fit(&self, units: usize) -> Option<usize> {
        self.holes()
            .find(|(_, len)| *len >= units)
            .map(|(start, _)| start)
    }

    /// Does any entry overlap `[start, end)`?
    pub fn occupied_in(&self, start: usize, end: usize) -> bool {
        self.entries
            .iter()
            .any(|e| e.unit < end && e.end() > start)
    }
}

/// Iterator over free runs
#[derive(Debug)]
pub struct Holes<'a> {
    entries: &'a [CacheEntry],
    next: usize,
    cursor: usize,
    limit: usize,
}

impl Iterator for Holes<'_> {
    type Item = (usize, usize);

    fn next(&mut self) -> Option<Self::Item> {
        while self.cursor < self.limit {
            let start = self.cursor;
            let end = match self.entries.get(self.next) {
                Some(entry) => {
                    self.next += 1;
                    self.cursor = entry.end();
                    entry.unit.min(self.limit)
                }
                None => {
                    self.cursor = self.limit;
                    self.limit
                }
            };
            if end > start {
                return Some((start, end - start));
            }
        }
        None
    }
}
