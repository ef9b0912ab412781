//! # Eviction Ordering
//!
//! Each policy maps an entry to a victim key; the entry with the smallest
//! key is evicted first.
//!
//! | Policy | Hit                                        | Key                         |
//! |--------|--------------------------------------------|-----------------------------|
//! | LRU    | stamp := now                               | (0, stamp)                  |
//! | LFU    | hits += 1                                  | (0, hits, stamp)            |
//! | Mixed  | cold: stamp := now, hits += 1; hot: hits += 1 | cold (0, stamp), hot (1, hits, stamp) |
//!
//! An entry is hot once its hit count reaches the threshold.

use crate::config::EvictionPolicy;
use crate::entry::CacheEntry;

/// Sort key for victim selection
pub type VictimKey = (u8, u64, u64);

impl EvictionPolicy {
    /// Update an entry for a hit at time `now`
    pub fn on_hit(&self, entry: &mut CacheEntry, now: u64) {
        match *self {
            Self::Lru => {
                entry.stamp = now;
                entry.hits = entry.hits.saturating_add(1);
            }
            Self::Lfu => {
                entry.hits = entry.hits.saturating_add(1);
            }
            Self::Mixed { hot_threshold } => {
                if entry.hits < hot_threshold {
                    entry.stamp = now;
                }
                entry.hits = entry.hits.saturating_add(1);
            }
        }
    }

    /// Make a just-unlocked entry the preferred victim
    pub fn on_unlock(&self, entry: &mut CacheEntry) {
        entry.stamp = 0;
        entry.hits = 0;
    }

    /// Victim key; smaller goes first
    pub fn victim_key(&self, entry: &CacheEntry) -> VictimKey {
        match *self {
            Self::Lru => (0, entry.stamp, 0),
            Self::Lfu => (0, u64::from(entry.hits), entry.stamp),
            Self::Mixed { hot_threshold } => {
                if entry.hits < hot_threshold {
                    (0, entry.stamp, 0)
                } else {
                    (1, u64::from(entry.hits), entry.stamp)
                }
            }
        }
    }
}
