//! # Integration Hooks
//!
//! The engine talks to the outside world only through [`OverlayHooks`]:
//! copying bytes from the backing store, checking them, and reporting faults
//! and instrumentation events. An implementation is injected at construction.

use core::fmt;

use static_assertions::const_assert_eq;

use crate::crc::Crc32c;
use crate::error::ErrorCode;
use crate::token::Token;

// ============================================================================
// Call Origin / Instrumentation
// ============================================================================

/// How control reached the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOrigin {
    /// Call into an overlay function
    Invoke,
    /// Return into an overlay function (also used for data overlays)
    Return,
}

const EVENT_BASE: u8 = 0xFC;
const EVENT_LOAD: u8 = 1 << 1;
const EVENT_INVOKE: u8 = 1 << 0;

/// Instrumentation event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum InstrumentationEvent {
    /// Group loaded, then invoked
    LoadAndInvoke   = EVENT_BASE | EVENT_LOAD | EVENT_INVOKE,
    /// Group resident, invoked
    NoLoadAndInvoke = EVENT_BASE | EVENT_INVOKE,
    /// Group loaded on the return path
    LoadAndReturn   = EVENT_BASE | EVENT_LOAD,
    /// Group resident on the return path
    NoLoadAndReturn = EVENT_BASE,
}

const_assert_eq!(InstrumentationEvent::LoadAndInvoke as u8, 0xFF);
const_assert_eq!(InstrumentationEvent::NoLoadAndInvoke as u8, 0xFD);
const_assert_eq!(InstrumentationEvent::LoadAndReturn as u8, 0xFE);
const_assert_eq!(InstrumentationEvent::NoLoadAndReturn as u8, 0xFC);

impl InstrumentationEvent {
    /// Event for a resolution outcome
    pub const fn new(loaded: bool, origin: CallOrigin) -> Self {
        match (loaded, origin) {
            (true, CallOrigin::Invoke) => Self::LoadAndInvoke,
            (false, CallOrigin::Invoke) => Self::NoLoadAndInvoke,
            (true, CallOrigin::Return) => Self::LoadAndReturn,
            (false, CallOrigin::Return) => Self::NoLoadAndReturn,
        }
    }

    /// Did the event involve a load?
    pub const fn loaded(self) -> bool {
        self as u8 & EVENT_LOAD != 0
    }
}

// ============================================================================
// Hook Fault
// ============================================================================

/// Failure reported by the load hook
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookFault {
    /// Requested range lies outside the backing store
    OutOfRange,
    /// Device-specific failure code
    Device(u32),
}

impl fmt::Display for HookFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfRange => write!(f, "backing store range out of bounds"),
            Self::Device(code) => write!(f, "device error {:#x}", code),
        }
    }
}

// ============================================================================
// Hooks
// ============================================================================

/// Integration points of the overlay engine
pub trait OverlayHooks {
    /// Copy `dest.len()` bytes at `offset` in the backing store into `dest`
    ///
    /// Any cache maintenance the copy path needs is the hook's business.
    fn load(&mut self, offset: u32, dest: &mut [u8]) -> Result<(), HookFault>;

    /// Check `bytes` against `expected`; CRC32C by default
    fn check_integrity(&mut self, bytes: &[u8], expected: u32) -> bool {
        Crc32c::checksum(bytes) == expected
    }

    /// Fault notification
    ///
    /// The default halts on everything except the two policy codes.
    fn on_error(&mut self, token: Token, code: ErrorCode) {
        if !code.is_recoverable() {
            panic!("overlay fault: {} (token {})", code, token);
        }
        log::warn!("overlay: {} for token {}, continuing", code, token);
    }

    /// Instrumentation notification
    fn on_event(&mut self, _token: Token, _event: InstrumentationEvent) {}
}

/// Hooks that do nothing: loads leave the destination untouched, faults only surface as `Err`
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

impl OverlayHooks for NoopHooks {
    fn load(&mut self, _offset: u32, _dest: &mut [u8]) -> Result<(), HookFault> {
        Ok(())
    }

    fn check_integrity(&mut self, _bytes: &[u8], _expected: u32) -> bool {
        true
    }

    fn on_error(&mut self, _token: Token, _code: ErrorCode) {}
}
