//! # Concurrency Guard
//!
//! One coarse critical section protects the whole engine. Every operation
//! of [`SharedCache`] runs as:
//!
//! ```text
//! enter section ──► lock engine ──► operate ──► unlock engine ──► exit section
//! ```
//!
//! The section is integrator-provided: an RTOS mutex, interrupt masking on a
//! single bare-metal flow of control, or nothing beyond the spin lock.
//! A thread that misses while another one is loading blocks on the section
//! and then re-checks residency, so duplicate misses collapse into hits.

use core::fmt;

use spin::Mutex;

use crate::config::InitArgs;
use crate::engine::{LockState, OverlayCache, ResetKind};
use crate::error::{ErrorCode, OverlayResult};
use crate::hooks::{CallOrigin, OverlayHooks};
use crate::status::CacheStatus;
use crate::token::Token;

/// Critical-section failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncFault {
    /// Acquisition did not complete
    Timeout,
    /// Release by a context that does not own the section
    NotOwner,
    /// Primitive-specific code
    Other(u32),
}

impl fmt::Display for SyncFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "critical section wait timed out"),
            Self::NotOwner => write!(f, "critical section released by non-owner"),
            Self::Other(code) => write!(f, "critical section error {:#x}", code),
        }
    }
}

/// Whole-engine critical section
pub trait CriticalSection {
    /// State carried from `enter` to `exit`
    type State;

    /// Enter the section, blocking if needed
    fn enter(&self) -> Result<Self::State, SyncFault>;

    /// Leave the section
    fn exit(&self, state: Self::State) -> Result<(), SyncFault>;
}

/// Bare-metal section: global interrupts masked for the duration
#[derive(Debug, Clone, Copy, Default)]
pub struct IrqSection;

impl CriticalSection for IrqSection {
    type State = bool;

    fn enter(&self) -> Result<bool, SyncFault> {
        Ok(comrv_hal::disable_interrupts_save())
    }

    fn exit(&self, was_enabled: bool) -> Result<(), SyncFault> {
        comrv_hal::restore_interrupts(was_enabled);
        Ok(())
    }
}

/// Section provided by the engine spin lock alone
#[derive(Debug, Clone, Copy, Default)]
pub struct SpinSection;

impl CriticalSection for SpinSection {
    type State = ();

    fn enter(&self) -> Result<(), SyncFault> {
        Ok(())
    }

    fn exit(&self, _state: ()) -> Result<(), SyncFault> {
        Ok(())
    }
}

// ============================================================================
// Shared Engine
// ============================================================================

/// Engine shared by tasks or harts
pub struct SharedCache<'c, H, S> {
    cache: Mutex<OverlayCache<'c, H>>,
    section: S,
}

impl<H, S: fmt::Debug> fmt::Debug for SharedCache<'_, H, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedCache")
            .field("section", &self.section)
            .finish_non_exhaustive()
    }
}

impl<'c, H: OverlayHooks, S: CriticalSection> SharedCache<'c, H, S> {
    /// Wrap an engine
    pub fn new(cache: OverlayCache<'c, H>, section: S) -> Self {
        Self {
            cache: Mutex::new(cache),
            section,
        }
    }

    /// Unwrap the engine
    pub fn into_inner(self) -> OverlayCache<'c, H> {
        self.cache.into_inner()
    }

    /// Run `op` inside the critical section
    pub fn with<R>(
        &self,
        op: impl FnOnce(&mut OverlayCache<'c, H>) -> OverlayResult<R>,
    ) -> OverlayResult<R> {
        let state = match self.section.enter() {
            Ok(state) => state,
            Err(fault) => {
                log::error!("overlay: {}", fault);
                return self.cache.lock().fault(Token::INVALID, ErrorCode::SyncWaitError);
            }
        };

        let result = {
            let mut cache = self.cache.lock();
            op(&mut *cache)
        };

        if let Err(fault) = self.section.exit(state) {
            log::error!("overlay: {}", fault);
            return self.cache.lock().fault(Token::INVALID, ErrorCode::SyncReleaseError);
        }
        result
    }

    /// See [`OverlayCache::init`]
    pub fn init(&self, region: &'c mut [u8], args: InitArgs) -> OverlayResult<()> {
        self.with(|cache| cache.init(region, args))
    }

    /// See [`OverlayCache::load_tables`]
    pub fn load_tables(&self) -> OverlayResult<()> {
        self.with(|cache| cache.load_tables())
    }

    /// See [`OverlayCache::reset`]
    pub fn reset(&self, kind: ResetKind) -> OverlayResult<()> {
        self.with(|cache| cache.reset(kind))
    }

    /// See [`OverlayCache::resolve`]
    pub fn resolve(&self, token: Token, origin: CallOrigin) -> OverlayResult<usize> {
        self.with(|cache| cache.resolve(token, origin))
    }

    /// See [`OverlayCache::search`]
    pub fn search(&self, token: Token) -> OverlayResult<Option<usize>> {
        self.with(|cache| cache.search(token))
    }

    /// See [`OverlayCache::lock_unlock`]
    pub fn lock_unlock(&self, token: Token, state: LockState) -> OverlayResult<()> {
        self.with(|cache| cache.lock_unlock(token, state))
    }

    /// See [`OverlayCache::allocate_data`]
    pub fn allocate_data(&self, token: Token) -> OverlayResult<usize> {
        self.with(|cache| cache.allocate_data(token))
    }

    /// See [`OverlayCache::release_data`]
    pub fn release_data(&self, token: Token) -> OverlayResult<()> {
        self.with(|cache| cache.release_data(token))
    }

    /// See [`OverlayCache::enable`]
    pub fn enable(&self) -> OverlayResult<()> {
        self.with(|cache| {
            cache.enable();
            Ok(())
        })
    }

    /// See [`OverlayCache::disable`]
    pub fn disable(&self) -> OverlayResult<()> {
        self.with(|cache| {
            cache.disable();
            Ok(())
        })
    }

    /// See [`OverlayCache::set_load_enabled`]
    pub fn set_load_enabled(&self, enabled: bool) -> OverlayResult<()> {
        self.with(|cache| {
            cache.set_load_enabled(enabled);
            Ok(())
        })
    }

    /// See [`OverlayCache::status`]
    pub fn status(&self) -> OverlayResult<CacheStatus> {
        self.with(|cache| Ok(cache.status()))
    }
}
