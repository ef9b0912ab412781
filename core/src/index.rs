//! # Backing-Store Index
//!
//! Read-only tables describing where every overlay group lives in the
//! backing store, plus the multi-group table listing functions that were
//! duplicated into more than one group.
//!
//! Lookups are O(log n) by group id and O(k) by multi-group token, where k
//! is the number of groups sharing that token.
//!
//! ## Image Format
//!
//! The index can be stored in the backing store as a compact little-endian
//! image:
//!
//! ```text
//! u16 group_count (N)
//! u16 multi_group_words (M)
//! u16 offsets[N + 1]       group i spans [offsets[i], offsets[i+1]) units
//! pad to 4 bytes
//! u32 multi_group[M]       0-terminated member lists of full tokens
//! u32 crc                  only when CRC is configured
//! ```

use alloc::vec::Vec;
use core::fmt;

use crate::crc::Crc32c;
use crate::token::{GroupId, Token};

// ============================================================================
// Errors
// ============================================================================

/// Malformed index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexError {
    /// Image shorter than its header claims
    Truncated,
    /// Offset table not strictly increasing at this position
    BadOffset(usize),
    /// Group id present twice
    DuplicateGroup(GroupId),
    /// Group of size zero or above the configured maximum
    BadGroupSize(GroupId),
    /// Multi-group entry at this position is not a plain overlay token
    /// inside a known group
    BadMember(usize),
    /// Multi-group table does not end with a terminator
    UnterminatedList,
    /// Multi-group table longer than the token can index
    TableTooLarge,
}

impl fmt::Display for IndexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated => write!(f, "index image truncated"),
            Self::BadOffset(i) => write!(f, "offset table not increasing at {}", i),
            Self::DuplicateGroup(id) => write!(f, "duplicate {}", id),
            Self::BadGroupSize(id) => write!(f, "bad size for {}", id),
            Self::BadMember(i) => write!(f, "bad multi-group member at {}", i),
            Self::UnterminatedList => write!(f, "unterminated multi-group list"),
            Self::TableTooLarge => write!(f, "multi-group table too large"),
        }
    }
}

// ============================================================================
// Group Descriptor
// ============================================================================

/// Where one group lives in the backing store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupDescriptor {
    /// Group id
    pub id: GroupId,
    /// Byte offset in the backing store
    pub offset: u32,
    /// Size in bytes
    pub size: u32,
    /// Expected checksum; `None` means the group carries a trailing CRC word
    pub checksum: Option<u32>,
}

impl GroupDescriptor {
    /// Descriptor without an explicit checksum
    pub const fn new(id: GroupId, offset: u32, size: u32) -> Self {
        Self {
            id,
            offset,
            size,
            checksum: None,
        }
    }

    /// Attach an explicit checksum
    pub const fn with_checksum(mut self, checksum: u32) -> Self {
        self.checksum = Some(checksum);
        self
    }
}

// ============================================================================
// Index
// ============================================================================

/// Backing-store index
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OverlayIndex {
    /// Sorted by id
    groups: Vec<GroupDescriptor>,
    multi_group: Vec<Token>,
    /// (member group, multi-group token naming its list), sorted by group
    reverse: Vec<(GroupId, Token)>,
}

impl OverlayIndex {
    /// Build an index from descriptors and a raw multi-group table
    pub fn new(
        mut groups: Vec<GroupDescriptor>,
        multi_group: Vec<Token>,
    ) -> Result<Self, IndexError> {
        groups.sort_unstable_by_key(|g| g.id);
        if let Some(pair) = groups.windows(2).find(|w| w[0].id == w[1].id) {
            return Err(IndexError::DuplicateGroup(pair[0].id));
        }

        if multi_group.len() > usize::from(u16::MAX) + 1 {
            return Err(IndexError::TableTooLarge);
        }
        if multi_group.last().is_some_and(|t| *t != Token::LIST_END) {
            return Err(IndexError::UnterminatedList);
        }

        let mut reverse = Vec::new();
        let mut start = 0usize;
        for (i, member) in multi_group.iter().enumerate() {
            if *member == Token::LIST_END {
                start = i + 1;
                continue;
            }
            if !member.is_overlay() || member.is_multi_group() {
                return Err(IndexError::BadMember(i));
            }
            let target = groups
                .binary_search_by_key(&member.group(), |g| g.id)
                .map(|pos| &groups[pos]);
            match target {
                Ok(group) if member.offset_bytes() < group.size => {}
                _ => return Err(IndexError::BadMember(i)),
            }
            reverse.push((member.group(), Token::multi_group(start as u16)));
        }
        reverse.sort_unstable_by_key(|(group, token)| (*group, token.raw()));
        reverse.dedup();

        Ok(Self {
            groups,
            multi_group,
            reverse,
        })
    }

    /// Build an index from a unit offset table; group `i` gets id `i`
    pub fn from_offset_table(
        offsets: &[u16],
        unit: u32,
        multi_group: Vec<Token>,
    ) -> Result<Self, IndexError> {
        if offsets.is_empty() {
            return Err(IndexError::Truncated);
        }
        let mut groups = Vec::with_capacity(offsets.len() - 1);
        for (i, pair) in offsets.windows(2).enumerate() {
            if pair[1] <= pair[0] {
                return Err(IndexError::BadOffset(i + 1));
            }
            groups.push(GroupDescriptor::new(
                GroupId(i as u16),
                u32::from(pair[0]) * unit,
                u32::from(pair[1] - pair[0]) * unit,
            ));
        }
        Self::new(groups, multi_group)
    }

    /// Parse an index image (without its CRC trailer)
    pub fn parse_image(bytes: &[u8], unit: u32) -> Result<Self, IndexError> {
        let groups = usize::from(read_u16(bytes, 0)?);
        let words = usize::from(read_u16(bytes, 2)?);

        let mut offsets = Vec::with_capacity(groups + 1);
        for i in 0..=groups {
            offsets.push(read_u16(bytes, 4 + 2 * i)?);
        }

        let base = align4(4 + 2 * (groups + 1));
        let mut multi_group = Vec::with_capacity(words);
        for i in 0..words {
            multi_group.push(Token::from_raw(read_u32(bytes, base + 4 * i)?));
        }

        Self::from_offset_table(&offsets, unit, multi_group)
    }

    /// Produce an index image, optionally followed by its CRC32C
    pub fn encode_image(offsets: &[u16], multi_group: &[Token], crc: bool) -> Vec<u8> {
        let groups = offsets.len().saturating_sub(1);
        let mut image = Vec::new();
        image.extend_from_slice(&(groups as u16).to_le_bytes());
        image.extend_from_slice(&(multi_group.len() as u16).to_le_bytes());
        for offset in offsets {
            image.extend_from_slice(&offset.to_le_bytes());
        }
        image.resize(align4(image.len()), 0);
        for token in multi_group {
            image.extend_from_slice(&token.raw().to_le_bytes());
        }
        if crc {
            let crc = Crc32c::checksum(&image);
            image.extend_from_slice(&crc.to_le_bytes());
        }
        image
    }

    /// Reject empty groups and groups above `max_size`
    pub fn check_sizes(&self, max_size: u32) -> Result<(), IndexError> {
        match self.groups.iter().find(|g| g.size == 0 || g.size > max_size) {
            Some(bad) => Err(IndexError::BadGroupSize(bad.id)),
            None => Ok(()),
        }
    }

    /// Descriptor of `id`
    pub fn group(&self, id: GroupId) -> Option<&GroupDescriptor> {
        self.groups
            .binary_search_by_key(&id, |g| g.id)
            .ok()
            .map(|i| &self.groups[i])
    }

    /// Members of the multi-group list starting at `list_index`
    pub fn members(&self, list_index: usize) -> Option<&[Token]> {
        let tail = self.multi_group.get(list_index..)?;
        let end = tail.iter().position(|t| *t == Token::LIST_END)?;
        if end == 0 {
            return None;
        }
        Some(&tail[..end])
    }

    /// Multi-group tokens with a member in `group`
    pub fn aliases(&self, group: GroupId) -> impl Iterator<Item = Token> + '_ {
        let start = self.reverse.partition_point(|(g, _)| *g < group);
        self.reverse[start..]
            .iter()
            .take_while(move |(g, _)| *g == group)
            .map(|(_, token)| *token)
    }

    /// All descriptors, sorted by id
    pub fn groups(&self) -> &[GroupDescriptor] {
        &self.groups
    }

    /// Raw multi-group table
    pub fn multi_group_table(&self) -> &[Token] {
        &self.multi_group
    }

    /// Number of groups
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// No groups at all
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

fn align4(value: usize) -> usize {
    (value + 3) & !3
}

fn read_u16(bytes: &[u8], pos: usize) -> Result<u16, IndexError> {
    match bytes.get(pos..pos + 2) {
        Some(b) => Ok(u16::from_le_bytes([b[0], b[1]])),
        None => Err(IndexError::Truncated),
    }
}

fn read_u32(bytes: &[u8], pos: usize) -> Result<u32, IndexError> {
    match bytes.get(pos..pos + 4) {
        Some(b) => Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]])),
        None => Err(IndexError::Truncated),
    }
}
