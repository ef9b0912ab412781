//! # Overlay Tokens
//!
//! A token names a callable unit (or a read-only data object) living in an
//! overlay group. Tokens are produced at link time and never change; only the
//! residency of the group they name changes at runtime.
//!
//! ## Bit Layout
//!
//! ```text
//!  31  30..29   28   27   26 ........ 17   16 ............ 1   0
//! ┌───┬───────┬────┬────┬───────────────┬───────────────────┬───┐
//! │MG │cacheID│rsvd│thnk│ offset (words)│     group id      │OVL│
//! └───┴───────┴────┴────┴───────────────┴───────────────────┴───┘
//! ```
//!
//! - `OVL` clear means the value is a plain address that needs no resolution.
//! - For a multi-group token (`MG` set) the group id field is the start index
//!   of the member list in the multi-group table.

use core::fmt;

use bitflags::bitflags;
use static_assertions::const_assert_eq;

// ============================================================================
// Field Layout
// ============================================================================

const GROUP_SHIFT: u32 = 1;
const GROUP_BITS: u32 = 16;
const OFFSET_SHIFT: u32 = 17;
const OFFSET_BITS: u32 = 10;
const CACHE_ID_SHIFT: u32 = 29;
const CACHE_ID_BITS: u32 = 2;

const GROUP_MASK: u32 = ((1 << GROUP_BITS) - 1) << GROUP_SHIFT;
const OFFSET_MASK: u32 = ((1 << OFFSET_BITS) - 1) << OFFSET_SHIFT;
const CACHE_ID_MASK: u32 = ((1 << CACHE_ID_BITS) - 1) << CACHE_ID_SHIFT;

/// Token offsets are expressed in 32-bit words
pub const OFFSET_SCALE: u32 = 4;

bitflags! {
    /// Single-bit token indications
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TokenFlags: u32 {
        /// Value is an overlay token (clear: plain address)
        const OVERLAY     = 1 << 0;
        /// Call goes through a caller thunk
        const THUNK       = 1 << 27;
        /// Reserved by the toolchain
        const RESERVED    = 1 << 28;
        /// Token names a multi-group member list
        const MULTI_GROUP = 1 << 31;
    }
}

// Every bit of the word is owned by exactly one field.
const_assert_eq!(
    TokenFlags::all().bits() | GROUP_MASK | OFFSET_MASK | CACHE_ID_MASK,
    u32::MAX
);
const_assert_eq!(TokenFlags::all().bits() & (GROUP_MASK | OFFSET_MASK | CACHE_ID_MASK), 0);
const_assert_eq!(GROUP_MASK & OFFSET_MASK, 0);
const_assert_eq!((GROUP_MASK | OFFSET_MASK) & CACHE_ID_MASK, 0);

// ============================================================================
// Group Identifier
// ============================================================================

/// Overlay group identifier (index into the backing-store index)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct GroupId(pub u16);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "group#{}", self.0)
    }
}

// ============================================================================
// Token
// ============================================================================

/// Overlay token
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Token(u32);

impl Token {
    /// Reported with faults that do not concern a specific token
    pub const INVALID: Token = Token(u32::MAX);
    /// Reported with faults raised while loading the index tables
    pub const TABLES: Token = Token(1);
    /// Terminator of a multi-group member list
    pub const LIST_END: Token = Token(0);

    /// Wrap a raw token value
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Build an overlay token for a function/data object inside a group
    ///
    /// `offset_words` is truncated to the 10-bit field.
    pub const fn new(group: GroupId, offset_words: u16) -> Self {
        Self(
            TokenFlags::OVERLAY.bits()
                | ((group.0 as u32) << GROUP_SHIFT)
                | (((offset_words as u32) << OFFSET_SHIFT) & OFFSET_MASK),
        )
    }

    /// Build a multi-group token naming the member list at `list_index`
    pub const fn multi_group(list_index: u16) -> Self {
        Self(
            TokenFlags::OVERLAY.bits()
                | TokenFlags::MULTI_GROUP.bits()
                | ((list_index as u32) << GROUP_SHIFT),
        )
    }

    /// Build a plain (already resolved) address token
    ///
    /// Addresses are word aligned, so bit 0 is always clear.
    pub const fn address(address: u32) -> Self {
        Self(address & !TokenFlags::OVERLAY.bits())
    }

    /// Raw value
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Flag bits
    pub const fn flags(self) -> TokenFlags {
        TokenFlags::from_bits_truncate(self.0)
    }

    /// Is this an overlay token (as opposed to a plain address)?
    pub const fn is_overlay(self) -> bool {
        self.0 & TokenFlags::OVERLAY.bits() != 0
    }

    /// Is this a multi-group token?
    pub const fn is_multi_group(self) -> bool {
        self.0 & TokenFlags::MULTI_GROUP.bits() != 0
    }

    /// Group id field
    pub const fn group(self) -> GroupId {
        GroupId(((self.0 & GROUP_MASK) >> GROUP_SHIFT) as u16)
    }

    /// Multi-group list index (same field as the group id)
    pub const fn list_index(self) -> usize {
        ((self.0 & GROUP_MASK) >> GROUP_SHIFT) as usize
    }

    /// Offset inside the group in words
    pub const fn offset_words(self) -> u16 {
        ((self.0 & OFFSET_MASK) >> OFFSET_SHIFT) as u16
    }

    /// Offset inside the group in bytes
    pub const fn offset_bytes(self) -> u32 {
        self.offset_words() as u32 * OFFSET_SCALE
    }

    /// Cache id field
    pub const fn cache_id(self) -> u8 {
        ((self.0 & CACHE_ID_MASK) >> CACHE_ID_SHIFT) as u8
    }

    /// Copy of this token with the given cache id
    pub const fn with_cache_id(self, cache_id: u8) -> Self {
        Self((self.0 & !CACHE_ID_MASK) | (((cache_id as u32) << CACHE_ID_SHIFT) & CACHE_ID_MASK))
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_overlay() {
            return write!(f, "Token(addr {:#010x})", self.0);
        }
        if self.is_multi_group() {
            write!(f, "Token(multi list={})", self.list_index())
        } else {
            write!(
                f,
                "Token({} +{:#x})",
                self.group(),
                self.offset_bytes()
            )
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

impl From<u32> for Token {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

impl From<Token> for u32 {
    fn from(token: Token) -> Self {
        token.0
    }
}
