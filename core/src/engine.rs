//! # Overlay Cache Engine
//!
//! [`OverlayCache`] is the explicit context object holding all engine state:
//! configuration, hooks, the cache control block and the backing-store
//! index. Several independent instances may coexist.
//!
//! ## Resolution
//!
//! ```text
//! token ──► plain address? ──yes──► returned unchanged
//!             │ no
//!             ▼
//!          locate group (multi-group: first resident member)
//!             │
//!      hit ◄──┴──► miss ──► plan room ──► evict ──► compact? ──► load hook
//!       │                                                          │
//!   promote                                                   integrity
//!       │                                                          │
//!       └──────────────► address = entry base + token offset ◄── commit
//! ```
//!
//! Every fault goes through [`OverlayHooks::on_error`] exactly once and is
//! then returned as [`OverlayError::Fault`].

use alloc::vec::Vec;
use core::fmt;

use crate::config::{InitArgs, LockMode, OverlayConfig, TableSource};
use crate::control::{CacheStats, ControlBlock};
use crate::crc::split_trailer;
use crate::entry::{CacheEntry, EntryFlags};
use crate::error::{ErrorCode, OverlayError, OverlayResult};
use crate::evict;
use crate::hooks::{CallOrigin, InstrumentationEvent, OverlayHooks};
use crate::index::{GroupDescriptor, OverlayIndex};
use crate::status::{CacheStatus, EntryStatus};
use crate::token::{GroupId, Token};

/// What `reset` clears
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetKind {
    /// Residency, counters and a backing-loaded index
    Full,
    /// Residency only; counters and index survive
    LoadedGroups,
}

/// Lock request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    /// Exclude from eviction
    Lock,
    /// Re-admit to eviction as the preferred victim
    Unlock,
}

/// Group a token resolves to
#[derive(Debug, Clone, Copy)]
struct Located {
    /// Member token (differs from the request for multi-group tokens)
    member: Token,
    descriptor: GroupDescriptor,
    /// Entry position if resident
    position: Option<usize>,
}

/// Find the group serving `token`; multi-group tokens prefer a resident member
fn locate(index: &OverlayIndex, cb: &ControlBlock<'_>, token: Token) -> Result<Located, ErrorCode> {
    if !token.is_overlay() {
        return Err(ErrorCode::InvalidToken);
    }
    let candidates = if token.is_multi_group() {
        index
            .members(token.list_index())
            .ok_or(ErrorCode::InvalidToken)?
    } else {
        core::slice::from_ref(&token)
    };

    let mut first = None;
    for member in candidates {
        let descriptor = index.group(member.group()).ok_or(ErrorCode::InvalidToken)?;
        if member.offset_bytes() >= descriptor.size {
            return Err(ErrorCode::InvalidToken);
        }
        if let Some(position) = cb.find(member.group()) {
            return Ok(Located {
                member: *member,
                descriptor: *descriptor,
                position: Some(position),
            });
        }
        first.get_or_insert((*member, *descriptor));
    }

    let (member, descriptor) = first.ok_or(ErrorCode::InvalidToken)?;
    Ok(Located {
        member,
        descriptor,
        position: None,
    })
}

// ============================================================================
// Engine
// ============================================================================

/// Overlay cache engine
pub struct OverlayCache<'c, H> {
    config: OverlayConfig,
    hooks: H,
    control: Option<ControlBlock<'c>>,
    index: Option<OverlayIndex>,
    index_from_backing: bool,
    stats: CacheStats,
    enabled: bool,
    load_enabled: bool,
    pending_locks: Vec<GroupId>,
}

impl<H> fmt::Debug for OverlayCache<'_, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OverlayCache")
            .field("config", &self.config)
            .field("initialized", &self.control.is_some())
            .field("tables_loaded", &self.index.is_some())
            .field("enabled", &self.enabled)
            .field("load_enabled", &self.load_enabled)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl<'c, H: OverlayHooks> OverlayCache<'c, H> {
    /// Engine in the uninitialized state
    pub fn new(config: OverlayConfig, hooks: H) -> Self {
        Self {
            config,
            hooks,
            control: None,
            index: None,
            index_from_backing: false,
            stats: CacheStats::default(),
            enabled: true,
            load_enabled: true,
            pending_locks: Vec::new(),
        }
    }

    /// Configuration
    pub fn config(&self) -> &OverlayConfig {
        &self.config
    }

    /// Injected hooks
    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    /// Injected hooks, mutably
    pub fn hooks_mut(&mut self) -> &mut H {
        &mut self.hooks
    }

    /// Counters
    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// `init` has succeeded
    pub fn is_initialized(&self) -> bool {
        self.control.is_some()
    }

    /// Report a fault and turn it into an error
    pub(crate) fn fault<T>(&mut self, token: Token, code: ErrorCode) -> OverlayResult<T> {
        log::error!("overlay: {} (token {})", code, token);
        self.hooks.on_error(token, code);
        self.stats.errors += 1;
        Err(OverlayError::Fault { code, token })
    }

    fn ensure_init(&mut self, token: Token) -> OverlayResult<()> {
        if self.control.is_none() {
            return self.fault(token, ErrorCode::InvalidInit);
        }
        Ok(())
    }

    fn locate_checked(&mut self, token: Token) -> OverlayResult<Located> {
        let outcome = match (self.index.as_ref(), self.control.as_ref()) {
            (Some(index), Some(cb)) => locate(index, cb, token),
            (None, Some(_)) => Err(ErrorCode::InvokedWhileDisabled),
            (_, None) => Err(ErrorCode::InvalidInit),
        };
        outcome.or_else(|code| self.fault(token, code))
    }

    // ------------------------------------------------------------------------
    // Initialization
    // ------------------------------------------------------------------------

    /// Take ownership of the cache region and start from an empty cache
    ///
    /// The region size must be a non-zero multiple of the minimum group size.
    pub fn init(&mut self, region: &'c mut [u8], args: InitArgs) -> OverlayResult<()> {
        if let Err(err) = self.config.validate() {
            log::error!("overlay: rejected configuration: {}", err);
            return self.fault(Token::INVALID, ErrorCode::InvalidInit);
        }

        let unit = self.config.min_group_size as usize;
        if region.is_empty() || region.len() % unit != 0 {
            log::error!(
                "overlay: cache of {} bytes is not a multiple of {}",
                region.len(),
                unit
            );
            return self.fault(Token::INVALID, ErrorCode::InvalidInit);
        }

        let index = match &self.config.tables {
            TableSource::Static(index) => index
                .check_sizes(self.config.max_group_size)
                .map(|()| Some(index.clone())),
            TableSource::Backing { .. } => Ok(None),
        };
        let index = match index {
            Ok(index) => index,
            Err(err) => {
                log::error!("overlay: rejected index: {}", err);
                return self.fault(Token::INVALID, ErrorCode::InvalidInit);
            }
        };

        let units = region.len() / unit;
        let max_entries = self.config.max_entries.unwrap_or(units);
        let control = ControlBlock::new(region, unit, max_entries);
        log::info!(
            "overlay: cache at {:#x}, {} units of {} bytes, {} entries, policy {}",
            control.base_address(),
            units,
            unit,
            max_entries,
            self.config.policy
        );

        self.control = Some(control);
        self.index = index;
        self.index_from_backing = false;
        self.stats = CacheStats::default();
        self.pending_locks.clear();

        if args.load_tables {
            self.load_tables()?;
        }
        Ok(())
    }

    /// Load the index image from the backing store into the top of the cache
    ///
    /// Does nothing for a static index or when the tables are already loaded.
    pub fn load_tables(&mut self) -> OverlayResult<()> {
        self.ensure_init(Token::TABLES)?;
        let (offset, size) = match self.config.tables {
            TableSource::Static(_) => return Ok(()),
            TableSource::Backing { offset, size } => (offset, size as usize),
        };
        if self.index.is_some() {
            return Ok(());
        }

        match self.fetch_tables(offset, size) {
            Ok((index, first_unit)) => {
                log::info!(
                    "overlay: index loaded, {} groups, {} multi-group words, units {}..",
                    index.len(),
                    index.multi_group_table().len(),
                    first_unit
                );
                if let Some(cb) = self.control.as_mut() {
                    cb.reserve_top(cb.total_units() - first_unit);
                }
                self.index = Some(index);
                self.index_from_backing = true;
                Ok(())
            }
            Err(code) => self.fault(Token::TABLES, code),
        }
    }

    fn fetch_tables(&mut self, offset: u32, size: usize) -> Result<(OverlayIndex, usize), ErrorCode> {
        let cb = self.control.as_mut().ok_or(ErrorCode::InvalidInit)?;
        let units = cb.units_for(size);
        if units >= cb.total_units() {
            log::error!("overlay: index image of {} bytes leaves no room for groups", size);
            return Err(ErrorCode::InvalidInit);
        }
        let first = cb.total_units() - units;
        // nothing can be resident before the tables exist
        debug_assert!(!cb.occupied_in(first, cb.total_units()));

        let image = cb.bytes_mut(first, size);
        if let Err(fault) = self.hooks.load(offset, image) {
            log::error!("overlay: index image load failed: {}", fault);
            return Err(ErrorCode::LoadError);
        }

        let payload = if self.config.crc {
            let (payload, expected) = split_trailer(image).ok_or(ErrorCode::InvalidInit)?;
            if !self.hooks.check_integrity(payload, expected) {
                return Err(ErrorCode::CrcCheckError);
            }
            payload
        } else {
            &image[..]
        };

        let index = OverlayIndex::parse_image(payload, self.config.min_group_size)
            .and_then(|index| index.check_sizes(self.config.max_group_size).map(|()| index))
            .map_err(|err| {
                log::error!("overlay: bad index image: {}", err);
                ErrorCode::InvalidInit
            })?;
        Ok((index, first))
    }

    /// Clear residency, and for a full reset also counters and a loaded index
    pub fn reset(&mut self, kind: ResetKind) -> OverlayResult<()> {
        self.ensure_init(Token::INVALID)?;
        let Some(cb) = self.control.as_mut() else {
            return Ok(());
        };

        let referenced = cb.entries().iter().filter(|e| e.is_pinned()).count();
        if referenced > 0 {
            log::warn!(
                "overlay: reset drops {} data overlays still referenced",
                referenced
            );
        }
        cb.clear();
        self.pending_locks.clear();

        if kind == ResetKind::Full {
            self.stats = CacheStats::default();
            if self.index_from_backing {
                cb.release_reservation();
                self.index = None;
                self.index_from_backing = false;
            }
        }
        log::debug!("overlay: reset ({:?})", kind);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Control
    // ------------------------------------------------------------------------

    /// Allow misses to load again
    pub fn enable(&mut self) {
        self.enabled = true;
        log::debug!("overlay: engine enabled");
    }

    /// Serve hits only; a miss reports `InvokedWhileDisabled`
    pub fn disable(&mut self) {
        self.enabled = false;
        log::debug!("overlay: engine disabled");
    }

    /// Switch load operations on or off; a miss while off reports `LoadDisabled`
    pub fn set_load_enabled(&mut self, enabled: bool) {
        self.load_enabled = enabled;
        log::debug!("overlay: loads {}", if enabled { "enabled" } else { "disabled" });
    }

    // ------------------------------------------------------------------------
    // Resolution
    // ------------------------------------------------------------------------

    /// Resolve a token to a resident address, loading its group on a miss
    ///
    /// Plain addresses are returned unchanged. The address stays valid until
    /// a later operation can evict or move the group.
    pub fn resolve(&mut self, token: Token, origin: CallOrigin) -> OverlayResult<usize> {
        self.ensure_init(token)?;
        if !token.is_overlay() {
            return Ok(token.raw() as usize);
        }
        self.acquire(token, origin).map(|(_, address)| address)
    }

    /// Promoting residency check that never loads
    pub fn search(&mut self, token: Token) -> OverlayResult<Option<usize>> {
        self.ensure_init(token)?;
        if !token.is_overlay() {
            return Ok(Some(token.raw() as usize));
        }
        let located = self.locate_checked(token)?;
        match located.position {
            Some(position) => Ok(self.promote(position, located.member).map(|(_, address)| address)),
            None => Ok(None),
        }
    }

    /// Residency check without side effects
    pub fn is_resident(&self, token: Token) -> bool {
        if !token.is_overlay() {
            return true;
        }
        match (self.index.as_ref(), self.control.as_ref()) {
            (Some(index), Some(cb)) => {
                locate(index, cb, token).is_ok_and(|located| located.position.is_some())
            }
            _ => false,
        }
    }

    fn acquire(&mut self, token: Token, origin: CallOrigin) -> OverlayResult<(GroupId, usize)> {
        let outcome = self.try_acquire(token, origin);
        outcome.or_else(|code| self.fault(token, code))
    }

    fn try_acquire(&mut self, token: Token, origin: CallOrigin) -> Result<(GroupId, usize), ErrorCode> {
        let located = match (self.index.as_ref(), self.control.as_ref()) {
            (Some(index), Some(cb)) => locate(index, cb, token)?,
            (None, Some(_)) => return Err(ErrorCode::InvokedWhileDisabled),
            (_, None) => return Err(ErrorCode::InvalidInit),
        };

        if let Some(position) = located.position {
            let hit = self.promote(position, located.member);
            if let Some((_, address)) = hit {
                log::trace!("overlay: hit {} -> {:#x}", token, address);
                self.hooks
                    .on_event(token, InstrumentationEvent::new(false, origin));
            }
            return hit.ok_or(ErrorCode::InvalidInit);
        }

        self.stats.misses += 1;
        log::trace!("overlay: miss {} ({})", token, located.descriptor.id);
        if !self.enabled {
            return Err(ErrorCode::InvokedWhileDisabled);
        }
        if !self.load_enabled {
            return Err(ErrorCode::LoadDisabled);
        }

        let unit = self.load_group(&located.descriptor)?;
        let cb = self.control.as_ref().ok_or(ErrorCode::InvalidInit)?;
        let address = cb.unit_address(unit) + located.member.offset_bytes() as usize;
        self.hooks
            .on_event(token, InstrumentationEvent::new(true, origin));
        Ok((located.descriptor.id, address))
    }

    /// Count a hit on the entry at `position` and compute the member address
    fn promote(&mut self, position: usize, member: Token) -> Option<(GroupId, usize)> {
        let cb = self.control.as_mut()?;
        let now = cb.next_tick();
        let entry = cb.entries_mut().get_mut(position)?;
        self.config.policy.on_hit(entry, now);
        let (group, unit) = (entry.group, entry.unit);
        self.stats.hits += 1;
        Some((group, cb.unit_address(unit) + member.offset_bytes() as usize))
    }

    /// Make room for, copy in, check and commit one group; returns its first unit
    fn load_group(&mut self, descriptor: &GroupDescriptor) -> Result<usize, ErrorCode> {
        let Self {
            config,
            hooks,
            control,
            index,
            stats,
            pending_locks,
            ..
        } = self;
        let cb = control.as_mut().ok_or(ErrorCode::InvalidInit)?;
        let index = index.as_ref().ok_or(ErrorCode::InvokedWhileDisabled)?;

        let size = descriptor.size as usize;
        let units = cb.units_for(size);
        let plan = evict::plan(cb, &config.policy, units)?;

        stats.evictions += evict::evict(cb, &plan.victims) as u64;
        if plan.compact {
            let moved = evict::compact(cb);
            stats.defragmentations += 1;
            log::debug!("overlay: compaction moved {} bytes", moved);
        }
        let unit = cb.first_fit(units).ok_or(ErrorCode::DefragError)?;

        let dest = cb.bytes_mut(unit, size);
        if let Err(fault) = hooks.load(descriptor.offset, dest) {
            log::error!("overlay: loading {} failed: {}", descriptor.id, fault);
            return Err(ErrorCode::LoadError);
        }
        if config.crc {
            let intact = match descriptor.checksum {
                Some(expected) => hooks.check_integrity(dest, expected),
                None => match split_trailer(dest) {
                    Some((payload, expected)) => hooks.check_integrity(payload, expected),
                    None => false,
                },
            };
            if !intact {
                return Err(ErrorCode::CrcCheckError);
            }
        }

        let now = cb.next_tick();
        let mut entry = CacheEntry::new(descriptor.id, unit, units, descriptor.size, now);
        for alias in index.aliases(descriptor.id) {
            if !entry.add_alias(alias) {
                log::warn!("overlay: alias list of {} truncated", descriptor.id);
                break;
            }
        }
        if let Some(pos) = pending_locks.iter().position(|g| *g == descriptor.id) {
            pending_locks.swap_remove(pos);
            entry.flags.insert(EntryFlags::LOCKED);
        }
        cb.insert(entry);
        stats.loads += 1;

        log::debug!(
            "overlay: loaded {} ({} bytes) at unit {}, {} evicted",
            descriptor.id,
            size,
            unit,
            plan.victims.len()
        );
        Ok(unit)
    }

    // ------------------------------------------------------------------------
    // Locking
    // ------------------------------------------------------------------------

    /// Pin or unpin a group
    ///
    /// Locking a group that is not resident is deferred to its next load or
    /// refused with [`OverlayError::NotResident`], depending on [`LockMode`].
    pub fn lock_unlock(&mut self, token: Token, state: LockState) -> OverlayResult<()> {
        self.ensure_init(token)?;
        if !token.is_overlay() {
            return self.fault(token, ErrorCode::InvalidToken);
        }
        let located = self.locate_checked(token)?;
        let group = located.descriptor.id;

        match (state, located.position) {
            (LockState::Lock, Some(position)) => {
                if let Some(entry) = self.entry_at(position) {
                    entry.flags.insert(EntryFlags::LOCKED);
                }
                log::debug!("overlay: locked {}", group);
            }
            (LockState::Lock, None) => match self.config.lock_mode {
                LockMode::Defer => {
                    if !self.pending_locks.contains(&group) {
                        self.pending_locks.push(group);
                    }
                    log::debug!("overlay: lock of {} deferred to its next load", group);
                }
                LockMode::Reject => return Err(OverlayError::NotResident(token)),
            },
            (LockState::Unlock, Some(position)) => {
                let policy = self.config.policy;
                if let Some(entry) = self.entry_at(position) {
                    if entry.is_locked() {
                        entry.flags.remove(EntryFlags::LOCKED);
                        policy.on_unlock(entry);
                        log::debug!("overlay: unlocked {}", group);
                    }
                }
            }
            (LockState::Unlock, None) => {
                self.pending_locks.retain(|g| *g != group);
            }
        }
        Ok(())
    }

    fn entry_at(&mut self, position: usize) -> Option<&mut CacheEntry> {
        self.control.as_mut()?.entries_mut().get_mut(position)
    }

    // ------------------------------------------------------------------------
    // Data Overlays
    // ------------------------------------------------------------------------

    /// Take a reference on a data overlay, loading it if needed
    ///
    /// The returned address stays valid, and the entry stays in place, until
    /// the matching [`release_data`](Self::release_data).
    pub fn allocate_data(&mut self, token: Token) -> OverlayResult<usize> {
        self.ensure_init(token)?;
        if !token.is_overlay() {
            return self.fault(token, ErrorCode::InvalidToken);
        }
        let (group, address) = self.acquire(token, CallOrigin::Return)?;
        if let Some(entry) = self.control.as_mut().and_then(|cb| cb.entry_mut(group)) {
            entry.flags.insert(EntryFlags::DATA);
            entry.ref_count = entry.ref_count.saturating_add(1);
            log::debug!("overlay: {} referenced ({})", group, entry.ref_count);
        }
        Ok(address)
    }

    /// Drop a reference taken by [`allocate_data`](Self::allocate_data)
    ///
    /// The entry is not reclaimed when the count reaches zero; it only becomes
    /// an eviction candidate.
    pub fn release_data(&mut self, token: Token) -> OverlayResult<()> {
        self.ensure_init(token)?;
        let outcome = self.try_release(token);
        outcome.or_else(|code| self.fault(token, code))
    }

    fn try_release(&mut self, token: Token) -> Result<(), ErrorCode> {
        if !token.is_overlay() {
            return Err(ErrorCode::InvalidToken);
        }
        let index = self.index.as_ref().ok_or(ErrorCode::InvokedWhileDisabled)?;
        let cb = self.control.as_mut().ok_or(ErrorCode::InvalidInit)?;
        let located = locate(index, cb, token)?;
        let position = located.position.ok_or(ErrorCode::RefCountUnderflow)?;
        let entry = cb
            .entries_mut()
            .get_mut(position)
            .ok_or(ErrorCode::RefCountUnderflow)?;
        if !entry.is_data() || entry.ref_count == 0 {
            return Err(ErrorCode::RefCountUnderflow);
        }
        entry.ref_count -= 1;
        log::debug!("overlay: {} released ({})", entry.group, entry.ref_count);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Status
    // ------------------------------------------------------------------------

    /// Snapshot of the engine state
    pub fn status(&self) -> CacheStatus {
        let mut status = CacheStatus {
            initialized: self.control.is_some(),
            enabled: self.enabled,
            load_enabled: self.load_enabled,
            tables_loaded: self.index.is_some(),
            policy: self.config.policy,
            stats: self.stats,
            ..CacheStatus::default()
        };

        if let Some(cb) = self.control.as_ref() {
            let unit = cb.unit_size();
            status.cache_bytes = cb.total_units() * unit;
            status.usable_bytes = cb.usable_units() * unit;
            status.free_bytes = cb.free_units() * unit;
            status.largest_free_bytes = cb.largest_hole() * unit;
            status.entries = cb
                .entries()
                .iter()
                .map(|e| EntryStatus {
                    group: e.group,
                    address: cb.unit_address(e.unit),
                    size: e.size,
                    locked: e.is_locked(),
                    data: e.is_data(),
                    ref_count: e.ref_count,
                    stamp: e.stamp,
                    hits: e.hits,
                    aliases: e.aliases.clone(),
                })
                .collect();
        }
        status
    }
}
