//! End-to-end behavior of the engine: residency, eviction, locking, data
//! overlays and defragmentation exercised through the public API.

use alloc::vec;
use alloc::vec::Vec;

use crate::config::{EvictionPolicy, InitArgs};
use crate::engine::{LockState, OverlayCache, ResetKind};
use crate::error::ErrorCode;
use crate::hooks::{CallOrigin, InstrumentationEvent};
use crate::status::CacheStatus;
use crate::testing::{config, image, token, TestHooks, UNIT};
use crate::token::{GroupId, Token};

const POLICIES: [EvictionPolicy; 3] = [
    EvictionPolicy::Lru,
    EvictionPolicy::Lfu,
    EvictionPolicy::Mixed { hot_threshold: 2 },
];

fn region(units: usize) -> Vec<u8> {
    vec![0u8; units * UNIT as usize]
}

fn engine<'c>(
    memory: &'c mut [u8],
    group_units: &[u16],
    policy: EvictionPolicy,
) -> OverlayCache<'c, TestHooks> {
    let (index, hooks) = image(group_units, Vec::new());
    let mut cache = OverlayCache::new(config(index).with_policy(policy), hooks);
    cache
        .init(memory, InitArgs::default())
        .unwrap_or_else(|err| panic!("init failed: {}", err));
    cache
}

fn call(cache: &mut OverlayCache<'_, TestHooks>, group: u16) -> usize {
    cache
        .resolve(token(group), CallOrigin::Invoke)
        .unwrap_or_else(|err| panic!("resolve {} failed: {}", group, err))
}

fn resident(status: &CacheStatus) -> Vec<GroupId> {
    status.entries.iter().map(|e| e.group).collect()
}

/// Resident entries never overlap and never leave the usable area
fn assert_layout(status: &CacheStatus) {
    let unit = UNIT as usize;
    let base = status
        .entries
        .first()
        .map(|e| e.address)
        .unwrap_or_default();
    let mut used = 0;
    let mut end = base;
    for entry in &status.entries {
        assert!(entry.address >= end, "entries overlap at {}", entry.group);
        let span = (entry.size as usize).div_ceil(unit) * unit;
        end = entry.address + span;
        used += span;
    }
    assert!(used <= status.usable_bytes);
    assert_eq!(used, status.resident_bytes());
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn test_load_then_hit() {
    let mut memory = region(4);
    let mut cache = engine(&mut memory, &[1], EvictionPolicy::Lru);

    let first = call(&mut cache, 0);
    assert_eq!(cache.stats().loads, 1);
    let second = call(&mut cache, 0);
    assert_eq!(first, second);
    assert_eq!(cache.stats().loads, 1);

    let events: Vec<InstrumentationEvent> =
        cache.hooks().events.iter().map(|(_, e)| *e).collect();
    assert_eq!(
        events,
        vec![
            InstrumentationEvent::LoadAndInvoke,
            InstrumentationEvent::NoLoadAndInvoke
        ]
    );
}

#[test]
fn test_second_group_fits_beside_first() {
    let mut memory = region(4);
    let mut cache = engine(&mut memory, &[2, 2], EvictionPolicy::Lru);

    call(&mut cache, 0);
    call(&mut cache, 1);
    assert_eq!(cache.stats().loads, 2);
    assert_eq!(cache.stats().evictions, 0);
    assert!(cache.is_resident(token(0)));
    assert!(cache.is_resident(token(1)));
}

#[test]
fn test_locked_group_survives_flood_until_unlocked() {
    for policy in POLICIES {
        let mut memory = region(4);
        let mut cache = engine(&mut memory, &[1, 1, 1, 1, 1, 1, 1], policy);

        call(&mut cache, 0);
        cache.lock_unlock(token(0), LockState::Lock).unwrap();

        for round in 0..3 {
            for group in 1..7 {
                call(&mut cache, group);
                assert!(cache.is_resident(token(0)), "{} round {}", policy, round);
            }
        }
        let loads = cache.stats().loads;
        call(&mut cache, 0);
        assert_eq!(cache.stats().loads, loads, "{}: locked group reloaded", policy);

        cache.lock_unlock(token(0), LockState::Unlock).unwrap();
        let entry = cache.status().entry(GroupId(0)).cloned().unwrap();
        assert!(!entry.locked);
        assert_eq!((entry.stamp, entry.hits), (0, 0));

        for group in 1..7 {
            call(&mut cache, group);
        }
        assert!(!cache.is_resident(token(0)), "{}: unlocked group kept", policy);
        let loads = cache.stats().loads;
        call(&mut cache, 0);
        assert_eq!(cache.stats().loads, loads + 1);
    }
}

#[test]
fn test_unlocked_group_is_next_victim() {
    let mut memory = region(3);
    let mut cache = engine(&mut memory, &[1, 1, 1, 1], EvictionPolicy::Lru);
    call(&mut cache, 0);
    call(&mut cache, 1);
    call(&mut cache, 2);
    cache.lock_unlock(token(2), LockState::Lock).unwrap();
    cache.lock_unlock(token(2), LockState::Unlock).unwrap();

    // group 0 is older, but the unlocked group goes first
    call(&mut cache, 3);
    assert!(!cache.is_resident(token(2)));
    assert!(cache.is_resident(token(0)));
}

#[test]
fn test_data_overlay_reclaimed_only_under_pressure() {
    let mut memory = region(4);
    let mut cache = engine(&mut memory, &[1, 1, 1, 1, 1], EvictionPolicy::Lru);
    let data = token(0);
    // a second call site referencing a later word of the same group
    let other_site = Token::new(GroupId(0), 4);

    let first = cache.allocate_data(data).unwrap();
    assert_eq!(cache.stats().loads, 1);
    let second = cache.allocate_data(other_site).unwrap();
    assert_eq!(second, first + 16);
    assert_eq!(cache.stats().loads, 1);
    assert_eq!(cache.stats().hits, 1);
    assert_eq!(cache.status().entry(GroupId(0)).unwrap().ref_count, 2);

    cache.release_data(other_site).unwrap();
    cache.release_data(data).unwrap();
    assert_eq!(cache.status().entry(GroupId(0)).unwrap().ref_count, 0);
    assert!(cache.is_resident(data));
    assert_eq!(cache.stats().evictions, 0);

    // the remaining free space is used first
    for group in 1..4 {
        call(&mut cache, group);
    }
    assert!(cache.is_resident(data));
    assert_eq!(cache.stats().evictions, 0);

    // now its space is needed
    call(&mut cache, 4);
    assert!(!cache.is_resident(data));
    assert_eq!(cache.stats().evictions, 1);
}

#[test]
fn test_referenced_data_overlay_is_never_evicted() {
    let mut memory = region(3);
    let mut cache = engine(&mut memory, &[1, 1, 1, 1, 1], EvictionPolicy::Lru);
    let address = cache.allocate_data(token(0)).unwrap();

    for _ in 0..2 {
        for group in 1..5 {
            call(&mut cache, group);
        }
    }
    assert!(cache.is_resident(token(0)));
    assert_eq!(cache.allocate_data(token(0)).unwrap(), address);
}

#[test]
fn test_scattered_space_is_compacted() {
    for policy in POLICIES {
        let mut memory = region(4);
        let mut cache = engine(&mut memory, &[1, 1, 1, 1, 2], policy);
        for group in 0..4 {
            call(&mut cache, group);
        }
        call(&mut cache, 0);
        call(&mut cache, 2);
        let loads = cache.stats().loads;

        call(&mut cache, 4);
        let status = cache.status();
        assert!(status.stats.defragmentations >= 1, "{}", policy);
        assert_eq!(status.stats.loads, loads + 1, "{}", policy);
        assert_eq!(
            resident(&status),
            vec![GroupId(0), GroupId(2), GroupId(4)],
            "{}",
            policy
        );
        assert_layout(&status);

        // the moved groups are still served without reloading
        call(&mut cache, 0);
        call(&mut cache, 2);
        assert_eq!(cache.stats().loads, loads + 1);
    }
}

// ============================================================================
// Properties
// ============================================================================

#[test]
fn test_hits_leave_other_entries_alone() {
    let mut memory = region(4);
    let mut cache = engine(&mut memory, &[1, 1, 2], EvictionPolicy::Lru);
    let addresses: Vec<usize> = (0..3).map(|g| call(&mut cache, g)).collect();
    let before = resident(&cache.status());

    for _ in 0..3 {
        for group in 0..3u16 {
            assert_eq!(call(&mut cache, group), addresses[usize::from(group)]);
            assert_eq!(cache.search(token(group)).unwrap(), Some(addresses[usize::from(group)]));
        }
    }
    assert_eq!(resident(&cache.status()), before);
    assert_eq!(cache.stats().loads, 3);
}

#[test]
fn test_oversized_group_always_fails() {
    let mut memory = region(4);
    let mut cache = engine(&mut memory, &[1, 5], EvictionPolicy::Lru);

    let err = cache.resolve(token(1), CallOrigin::Invoke).unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::NotEnoughEntries));

    call(&mut cache, 0);
    cache.lock_unlock(token(0), LockState::Lock).unwrap();
    let err = cache.resolve(token(1), CallOrigin::Invoke).unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::NotEnoughEntries));
    // nothing was evicted for the failed request
    assert!(cache.is_resident(token(0)));
    assert_eq!(cache.stats().evictions, 0);
}

#[test]
fn test_locked_cache_reports_not_enough_entries() {
    let mut memory = region(2);
    let mut cache = engine(&mut memory, &[1, 1, 1], EvictionPolicy::Lru);
    call(&mut cache, 0);
    call(&mut cache, 1);
    cache.lock_unlock(token(0), LockState::Lock).unwrap();
    cache.lock_unlock(token(1), LockState::Lock).unwrap();

    let err = cache.resolve(token(2), CallOrigin::Invoke).unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::NotEnoughEntries));
    assert_eq!(
        cache.hooks().errors,
        vec![(token(2), ErrorCode::NotEnoughEntries)]
    );
}

#[test]
fn test_entry_table_exhausted() {
    let (index, hooks) = image(&[1, 1, 1], Vec::new());
    let mut memory = region(4);
    let mut cache = OverlayCache::new(config(index).with_max_entries(2), hooks);
    cache.init(&mut memory, InitArgs::default()).unwrap();
    call(&mut cache, 0);
    call(&mut cache, 1);
    cache.lock_unlock(token(0), LockState::Lock).unwrap();
    cache.lock_unlock(token(1), LockState::Lock).unwrap();

    let err = cache.resolve(token(2), CallOrigin::Invoke).unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::NoAvailableEntry));

    // an evictable entry frees a slot even though space was never short
    cache.lock_unlock(token(1), LockState::Unlock).unwrap();
    call(&mut cache, 2);
    assert!(!cache.is_resident(token(1)));
    assert_eq!(cache.status().entries.len(), 2);
}

#[test]
fn test_pinned_data_fragmentation_is_defrag_error() {
    let mut memory = region(4);
    let mut cache = engine(&mut memory, &[1, 1, 1, 1, 2], EvictionPolicy::Lru);
    for group in 0..4 {
        call(&mut cache, group);
    }
    // pin units 1 and 2; units 0 and 3 stay reclaimable but never adjacent
    cache.allocate_data(token(1)).unwrap();
    cache.allocate_data(token(2)).unwrap();

    let err = cache.resolve(token(4), CallOrigin::Invoke).unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::DefragError));
    assert_eq!(cache.stats().evictions, 0);
    assert_eq!(cache.status().entries.len(), 4);

    cache.release_data(token(2)).unwrap();
    call(&mut cache, 4);
    assert!(cache.is_resident(token(1)));
}

#[test]
fn test_release_at_zero_changes_nothing() {
    let mut memory = region(4);
    let mut cache = engine(&mut memory, &[1, 1], EvictionPolicy::Lru);
    cache.allocate_data(token(0)).unwrap();
    cache.release_data(token(0)).unwrap();
    call(&mut cache, 1);

    let before = cache.status();
    let err = cache.release_data(token(0)).unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::RefCountUnderflow));
    let after = cache.status();
    assert_eq!(before.entries, after.entries);
    assert_eq!(after.stats.errors, before.stats.errors + 1);
}

#[test]
fn test_random_workload_keeps_layout() {
    let sizes = [1u16, 2, 1, 3, 1, 2, 4, 1];
    for policy in POLICIES {
        let mut memory = region(8);
        let mut cache = engine(&mut memory, &sizes, policy);
        let mut seed = 0x1234_5678u32;

        for step in 0..400 {
            seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            let group = ((seed >> 16) as usize % sizes.len()) as u16;
            match (seed >> 8) % 8 {
                0 => {
                    let _ = cache.lock_unlock(token(group), LockState::Lock);
                }
                1 => {
                    let _ = cache.lock_unlock(token(group), LockState::Unlock);
                }
                _ => {
                    if cache.resolve(token(group), CallOrigin::Invoke).is_ok() {
                        assert!(cache.is_resident(token(group)), "{} step {}", policy, step);
                    }
                }
            }

            let status = cache.status();
            assert_layout(&status);
            for entry in status.entries.iter().filter(|e| e.locked) {
                assert!(cache.is_resident(token(entry.group.0)));
            }
            if step % 100 == 99 {
                for group in 0..sizes.len() as u16 {
                    let _ = cache.lock_unlock(token(group), LockState::Unlock);
                }
            }
        }
    }
}

#[test]
fn test_locked_entries_never_evicted_in_workload() {
    for policy in POLICIES {
        let mut memory = region(6);
        let mut cache = engine(&mut memory, &[1, 2, 1, 2, 1, 1], policy);
        call(&mut cache, 0);
        cache.lock_unlock(token(0), LockState::Lock).unwrap();
        let evictions_before = cache.stats().evictions;

        for step in 0..60u16 {
            let group = 1 + step % 5;
            let _ = cache.resolve(token(group), CallOrigin::Invoke);
            assert!(cache.is_resident(token(0)), "{} step {}", policy, step);
        }
        assert!(cache.stats().evictions > evictions_before);
    }
}

#[test]
fn test_reset_between_scenarios() {
    let mut memory = region(4);
    let mut cache = engine(&mut memory, &[1, 1], EvictionPolicy::Lru);
    call(&mut cache, 0);
    cache.lock_unlock(token(1), LockState::Lock).unwrap();
    cache.allocate_data(token(0)).unwrap();

    cache.reset(ResetKind::LoadedGroups).unwrap();
    assert!(!cache.is_resident(token(0)));
    assert_eq!(cache.stats().loads, 1);

    // the pending lock did not survive the reset
    call(&mut cache, 1);
    assert!(!cache.status().entry(GroupId(1)).unwrap().locked);

    let plain = Token::address(0x400);
    assert_eq!(cache.resolve(plain, CallOrigin::Return), Ok(0x400));
}
