//! # Eviction & Defragmentation
//!
//! Room for a group is planned first and committed afterwards, so a load
//! that cannot be placed leaves the cache untouched.
//!
//! Planning takes victims in policy order, one at a time, until either a
//! free run of the requested size exists or the free space could be merged
//! into one by compaction. Compaction slides every movable entry toward the
//! bottom of the cache, keeping their order. Data overlays with outstanding
//! references never move, so they split the cache into segments that are
//! compacted independently.

use alloc::vec;
use alloc::vec::Vec;

use crate::config::EvictionPolicy;
use crate::control::ControlBlock;
use crate::entry::CacheEntry;
use crate::error::ErrorCode;
use crate::token::GroupId;

/// How to make room for a group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    /// Groups to evict, in eviction order
    pub victims: Vec<GroupId>,
    /// Free space must be compacted after eviction
    pub compact: bool,
}

/// Why no room can be made
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanError {
    /// Not enough reclaimable space
    NotEnoughEntries,
    /// Enough space in total, but pinned data overlays keep it fragmented
    DefragError,
    /// Space would suffice, but the entry table is full and nothing can be evicted
    NoAvailableEntry,
}

impl From<PlanError> for ErrorCode {
    fn from(err: PlanError) -> Self {
        match err {
            PlanError::NotEnoughEntries => ErrorCode::NotEnoughEntries,
            PlanError::DefragError => ErrorCode::DefragError,
            PlanError::NoAvailableEntry => ErrorCode::NoAvailableEntry,
        }
    }
}

// ============================================================================
// Planning
// ============================================================================

/// Plan room for `units` units
pub fn plan(
    cb: &ControlBlock<'_>,
    policy: &EvictionPolicy,
    units: usize,
) -> Result<Plan, PlanError> {
    if units > cb.usable_units() {
        return Err(PlanError::NotEnoughEntries);
    }

    let entries = cb.entries();
    let mut order: Vec<usize> = (0..entries.len())
        .filter(|&i| entries[i].is_evictable())
        .collect();
    order.sort_by_key(|&i| policy.victim_key(&entries[i]));

    let mut removed = vec![false; entries.len()];
    let mut victims = Vec::new();
    let mut next = order.iter();

    loop {
        let slot_free = entries.len() - victims.len() < cb.max_entries();
        if slot_free {
            let (largest, _) = free_runs(entries, &removed, cb.usable_units());
            if largest >= units {
                return Ok(Plan {
                    victims,
                    compact: false,
                });
            }
            if compactable(entries, &removed, cb.usable_units(), units) {
                return Ok(Plan {
                    victims,
                    compact: true,
                });
            }
        }

        match next.next() {
            Some(&i) => {
                removed[i] = true;
                victims.push(entries[i].group);
            }
            None => break,
        }
    }

    let (_, total) = free_runs(entries, &removed, cb.usable_units());
    if total < units {
        Err(PlanError::NotEnoughEntries)
    } else if entries.len() - victims.len() >= cb.max_entries() {
        Err(PlanError::NoAvailableEntry)
    } else {
        Err(PlanError::DefragError)
    }
}

/// (largest run, total) of free units once `removed` entries are gone
fn free_runs(entries: &[CacheEntry], removed: &[bool], limit: usize) -> (usize, usize) {
    let mut cursor = 0;
    let mut largest = 0;
    let mut total = 0;
    for (entry, _) in entries.iter().zip(removed).filter(|(_, r)| !**r) {
        let gap = entry.unit.saturating_sub(cursor);
        largest = largest.max(gap);
        total += gap;
        cursor = entry.end();
    }
    let tail = limit.saturating_sub(cursor);
    (largest.max(tail), total + tail)
}

/// Would compaction produce a run of `units`?
fn compactable(entries: &[CacheEntry], removed: &[bool], limit: usize, units: usize) -> bool {
    let mut segment_start = 0;
    let mut used = 0;
    for (entry, _) in entries.iter().zip(removed).filter(|(_, r)| !**r) {
        if entry.is_pinned() {
            if entry.unit - segment_start - used >= units {
                return true;
            }
            segment_start = entry.end();
            used = 0;
        } else {
            used += entry.units;
        }
    }
    limit.saturating_sub(segment_start + used) >= units
}

// ============================================================================
// Commit
// ============================================================================

/// Remove the planned victims; returns how many were evicted
pub fn evict(cb: &mut ControlBlock<'_>, victims: &[GroupId]) -> usize {
    let mut evicted = 0;
    for group in victims {
        if let Some(pos) = cb.find(*group) {
            let entry = cb.remove(pos);
            log::debug!(
                "overlay: evict {} from unit {} ({} units)",
                entry.group,
                entry.unit,
                entry.units
            );
            evicted += 1;
        }
    }
    evicted
}

/// Slide movable entries toward unit 0; returns the bytes moved
///
/// Moved code is made visible to instruction fetch before returning.
pub fn compact(cb: &mut ControlBlock<'_>) -> usize {
    let unit_size = cb.unit_size();
    let mut cursor = 0;
    let mut moved = 0;
    let mut lowest = None;

    for i in 0..cb.entries().len() {
        let (unit, units, pinned) = {
            let entry = &cb.entries()[i];
            (entry.unit, entry.units, entry.is_pinned())
        };
        if pinned {
            cursor = unit + units;
            continue;
        }
        if unit > cursor {
            let src = unit * unit_size;
            let len = units * unit_size;
            cb.region_mut().copy_within(src..src + len, cursor * unit_size);
            cb.entries_mut()[i].unit = cursor;
            lowest.get_or_insert(cursor);
            moved += len;
        }
        cursor += units;
    }

    if let Some(first) = lowest {
        let span = (cursor - first) * unit_size;
        comrv_hal::sync_code_range(cb.unit_address(first), span);
    }
    moved
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::EntryFlags;

    const UNIT: usize = 16;

    fn block(region: &mut [u8], max_entries: usize) -> ControlBlock<'_> {
        ControlBlock::new(region, UNIT, max_entries)
    }

    fn place(cb: &mut ControlBlock<'_>, group: u16, unit: usize, units: usize, stamp: u64) {
        cb.insert(CacheEntry::new(
            GroupId(group),
            unit,
            units,
            (units * UNIT) as u32,
            stamp,
        ));
    }

    fn pin(cb: &mut ControlBlock<'_>, group: u16) {
        let entry = cb.entry_mut(GroupId(group)).unwrap();
        entry.flags.insert(EntryFlags::DATA);
        entry.ref_count = 1;
    }

    #[test]
    fn test_fits_without_eviction() {
        let mut region = vec![0u8; 4 * UNIT];
        let mut cb = block(&mut region, 4);
        place(&mut cb, 1, 0, 1, 1);
        let plan = plan(&cb, &EvictionPolicy::Lru, 3).unwrap();
        assert!(plan.victims.is_empty());
        assert!(!plan.compact);
    }

    #[test]
    fn test_victims_follow_policy_order() {
        let mut region = vec![0u8; 4 * UNIT];
        let mut cb = block(&mut region, 4);
        place(&mut cb, 1, 0, 2, 5);
        place(&mut cb, 2, 2, 2, 3);
        let plan = plan(&cb, &EvictionPolicy::Lru, 2).unwrap();
        assert_eq!(plan.victims, vec![GroupId(2)]);
        assert!(!plan.compact);
    }

    #[test]
    fn test_scattered_space_needs_compaction() {
        let mut region = vec![0u8; 4 * UNIT];
        let mut cb = block(&mut region, 4);
        place(&mut cb, 1, 0, 1, 1);
        place(&mut cb, 2, 2, 1, 2);
        let plan = plan(&cb, &EvictionPolicy::Lru, 2).unwrap();
        assert!(plan.victims.is_empty());
        assert!(plan.compact);
    }

    #[test]
    fn test_locked_entries_are_skipped() {
        let mut region = vec![0u8; 4 * UNIT];
        let mut cb = block(&mut region, 4);
        place(&mut cb, 1, 0, 2, 1);
        place(&mut cb, 2, 2, 2, 2);
        cb.entry_mut(GroupId(1)).unwrap().flags.insert(EntryFlags::LOCKED);
        let plan = plan(&cb, &EvictionPolicy::Lru, 2).unwrap();
        assert_eq!(plan.victims, vec![GroupId(2)]);
    }

    #[test]
    fn test_oversized_group() {
        let mut region = vec![0u8; 4 * UNIT];
        let cb = block(&mut region, 4);
        assert_eq!(
            plan(&cb, &EvictionPolicy::Lru, 5),
            Err(PlanError::NotEnoughEntries)
        );
    }

    #[test]
    fn test_pinned_data_blocks_compaction() {
        let mut region = vec![0u8; 4 * UNIT];
        let mut cb = block(&mut region, 4);
        place(&mut cb, 1, 1, 1, 1);
        pin(&mut cb, 1);
        place(&mut cb, 2, 2, 1, 2);
        pin(&mut cb, 2);
        // free units 0 and 3, split by two pinned entries
        assert_eq!(plan(&cb, &EvictionPolicy::Lru, 2), Err(PlanError::DefragError));
        assert_eq!(
            plan(&cb, &EvictionPolicy::Lru, 3),
            Err(PlanError::NotEnoughEntries)
        );
    }

    #[test]
    fn test_full_entry_table() {
        let mut region = vec![0u8; 4 * UNIT];
        let mut cb = block(&mut region, 1);
        place(&mut cb, 1, 0, 1, 1);
        cb.entry_mut(GroupId(1)).unwrap().flags.insert(EntryFlags::LOCKED);
        assert_eq!(
            plan(&cb, &EvictionPolicy::Lru, 1),
            Err(PlanError::NoAvailableEntry)
        );

        cb.entry_mut(GroupId(1)).unwrap().flags.remove(EntryFlags::LOCKED);
        let plan = plan(&cb, &EvictionPolicy::Lru, 1).unwrap();
        assert_eq!(plan.victims, vec![GroupId(1)]);
    }

    #[test]
    fn test_compact_moves_bytes_and_keeps_order() {
        let mut region = vec![0u8; 6 * UNIT];
        region[2 * UNIT] = 0xA2;
        region[4 * UNIT] = 0xB4;
        region[5 * UNIT] = 0xC5;
        let mut cb = block(&mut region, 6);
        place(&mut cb, 1, 2, 1, 1);
        place(&mut cb, 2, 4, 1, 1);
        place(&mut cb, 3, 5, 1, 1);
        pin(&mut cb, 2);

        let moved = compact(&mut cb);
        assert_eq!(moved, UNIT);

        let units: Vec<(GroupId, usize)> = cb.entries().iter().map(|e| (e.group, e.unit)).collect();
        assert_eq!(
            units,
            vec![(GroupId(1), 0), (GroupId(2), 4), (GroupId(3), 5)]
        );
        assert_eq!(cb.region_mut()[0], 0xA2);
        assert_eq!(cb.largest_hole(), 3);
    }

    #[test]
    fn test_evict_commits_victims() {
        let mut region = vec![0u8; 4 * UNIT];
        let mut cb = block(&mut region, 4);
        place(&mut cb, 1, 0, 1, 1);
        place(&mut cb, 2, 1, 1, 1);
        assert_eq!(evict(&mut cb, &[GroupId(2), GroupId(9)]), 1);
        assert_eq!(cb.entries().len(), 1);
        assert_eq!(cb.free_units(), 3);
    }
}
