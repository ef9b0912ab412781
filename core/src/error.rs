//! # Fault Taxonomy
//!
//! Every fault the engine detects is reported once through
//! [`OverlayHooks::on_error`](crate::hooks::OverlayHooks::on_error) and then
//! surfaced to the caller as [`OverlayError::Fault`]. The engine never panics
//! on its own; whether a fault halts the system is the hook's decision.
//!
//! ## Categories
//!
//! | Category        | Codes                                           | Default |
//! |-----------------|-------------------------------------------------|---------|
//! | Configuration   | `InvalidInit`                                   | halt    |
//! | Capacity        | `NoAvailableEntry`, `NotEnoughEntries`          | halt    |
//! | Load            | `LoadError`, `DefragError`                      | halt    |
//! | Integrity       | `CrcCheckError`                                 | halt    |
//! | Synchronization | `SyncWaitError`, `SyncReleaseError`             | halt    |
//! | Policy          | `LoadDisabled`, `InvokedWhileDisabled`          | resume  |
//! | Usage           | `InvalidToken`, `RefCountUnderflow`             | halt    |

use core::fmt;

use crate::token::Token;

/// Result type for engine operations
pub type OverlayResult<T> = Result<T, OverlayError>;

// =============================================================================
// ERROR CODE
// =============================================================================

/// Fault code handed to the error hook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ErrorCode {
    /// Bad init parameters, or an operation before `init`
    InvalidInit          = 0,
    /// Space for a group cannot be produced
    NotEnoughEntries     = 1,
    /// Load hook failed
    LoadError            = 2,
    /// Compaction blocked by referenced data overlays
    DefragError          = 3,
    /// Loaded bytes failed the integrity check
    CrcCheckError        = 4,
    /// Entry table exhausted
    NoAvailableEntry     = 5,
    /// Critical section could not be entered
    SyncWaitError        = 6,
    /// Critical section could not be left
    SyncReleaseError     = 7,
    /// Miss while loading is switched off
    LoadDisabled         = 8,
    /// Miss while the engine is disabled
    InvokedWhileDisabled = 9,
    /// Token names no known group
    InvalidToken         = 10,
    /// Data overlay released more often than allocated
    RefCountUnderflow    = 11,
}

/// Broad fault class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Detected at init
    Configuration,
    /// Cache space or entry table
    Capacity,
    /// Backing store access or relocation
    Load,
    /// Checksum mismatch
    Integrity,
    /// Critical section
    Synchronization,
    /// Expected outcome of an engine control setting
    Policy,
    /// API misuse by the caller
    Usage,
}

impl ErrorCode {
    /// Fault class
    pub const fn category(self) -> ErrorCategory {
        match self {
            Self::InvalidInit => ErrorCategory::Configuration,
            Self::NotEnoughEntries | Self::NoAvailableEntry => ErrorCategory::Capacity,
            Self::LoadError | Self::DefragError => ErrorCategory::Load,
            Self::CrcCheckError => ErrorCategory::Integrity,
            Self::SyncWaitError | Self::SyncReleaseError => ErrorCategory::Synchronization,
            Self::LoadDisabled | Self::InvokedWhileDisabled => ErrorCategory::Policy,
            Self::InvalidToken | Self::RefCountUnderflow => ErrorCategory::Usage,
        }
    }

    /// Only policy faults let execution continue by default
    pub const fn is_recoverable(self) -> bool {
        matches!(self.category(), ErrorCategory::Policy)
    }

    /// Numeric code
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Short name
    pub const fn name(self) -> &'static str {
        match self {
            Self::InvalidInit => "invalid init",
            Self::NotEnoughEntries => "not enough entries",
            Self::LoadError => "load error",
            Self::DefragError => "defragmentation error",
            Self::CrcCheckError => "crc check error",
            Self::NoAvailableEntry => "no available entry",
            Self::SyncWaitError => "sync wait error",
            Self::SyncReleaseError => "sync release error",
            Self::LoadDisabled => "load disabled",
            Self::InvokedWhileDisabled => "invoked while disabled",
            Self::InvalidToken => "invalid token",
            Self::RefCountUnderflow => "reference count underflow",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.code())
    }
}

// =============================================================================
// API ERROR
// =============================================================================

/// Error returned by the public API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayError {
    /// A fault, already reported through the error hook
    Fault {
        /// Fault code
        code: ErrorCode,
        /// Token the fault refers to
        token: Token,
    },
    /// Lock request for a group that is not resident (reject mode)
    NotResident(Token),
}

impl OverlayError {
    /// Fault code, if this is a fault
    pub const fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Fault { code, .. } => Some(*code),
            Self::NotResident(_) => None,
        }
    }

    /// Token the error refers to
    pub const fn token(&self) -> Token {
        match self {
            Self::Fault { token, .. } | Self::NotResident(token) => *token,
        }
    }
}

impl fmt::Display for OverlayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fault { code, token } => write!(f, "{} for token {}", code, token),
            Self::NotResident(token) => write!(f, "token {} is not resident", token),
        }
    }
}
