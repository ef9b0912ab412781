//! Test doubles shared by the unit and scenario tests.

use alloc::vec::Vec;

use crate::config::OverlayConfig;
use crate::crc::Crc32c;
use crate::error::ErrorCode;
use crate::hooks::{HookFault, InstrumentationEvent, OverlayHooks};
use crate::index::OverlayIndex;
use crate::token::{GroupId, Token};

/// Group granularity used by the tests
pub const UNIT: u32 = 64;

/// Hooks backed by an in-memory backing store, recording everything
#[derive(Debug, Default, Clone)]
pub struct TestHooks {
    /// Backing store contents
    pub store: Vec<u8>,
    /// Every reported fault
    pub errors: Vec<(Token, ErrorCode)>,
    /// Every instrumentation event
    pub events: Vec<(Token, InstrumentationEvent)>,
    /// Load hook invocations
    pub load_calls: usize,
    /// Fail every load
    pub fail_loads: bool,
    /// Flip the first byte of every load
    pub corrupt_loads: bool,
}

impl OverlayHooks for TestHooks {
    fn load(&mut self, offset: u32, dest: &mut [u8]) -> Result<(), HookFault> {
        self.load_calls += 1;
        if self.fail_loads {
            return Err(HookFault::Device(0xE1));
        }
        let start = offset as usize;
        let src = self
            .store
            .get(start..start + dest.len())
            .ok_or(HookFault::OutOfRange)?;
        dest.copy_from_slice(src);
        if self.corrupt_loads {
            dest[0] ^= 0xFF;
        }
        Ok(())
    }

    fn on_error(&mut self, token: Token, code: ErrorCode) {
        self.errors.push((token, code));
    }

    fn on_event(&mut self, token: Token, event: InstrumentationEvent) {
        self.events.push((token, event));
    }
}

/// Token for offset 0 of `group`
pub fn token(group: u16) -> Token {
    Token::new(GroupId(group), 0)
}

/// Backing-store bytes for groups of the given sizes (in units)
///
/// Group `i` is filled with `i + 1` and ends with the CRC32C of its
/// preceding bytes, so the same store works with and without CRC checks.
fn group_bytes(group_units: &[u16]) -> (Vec<u16>, Vec<u8>) {
    let mut offsets = Vec::with_capacity(group_units.len() + 1);
    let mut store = Vec::new();
    let mut unit = 0u16;
    offsets.push(unit);
    for (i, units) in group_units.iter().enumerate() {
        let len = usize::from(*units) * UNIT as usize;
        let mut bytes = alloc::vec![(i + 1) as u8; len - 4];
        let crc = Crc32c::checksum(&bytes);
        bytes.extend_from_slice(&crc.to_le_bytes());
        store.extend_from_slice(&bytes);
        unit += units;
        offsets.push(unit);
    }
    (offsets, store)
}

/// Link-time index plus hooks serving its groups
pub fn image(group_units: &[u16], multi_group: Vec<Token>) -> (OverlayIndex, TestHooks) {
    let (offsets, store) = group_bytes(group_units);
    let index = OverlayIndex::from_offset_table(&offsets, UNIT, multi_group)
        .unwrap_or_else(|err| panic!("bad test index: {}", err));
    let hooks = TestHooks {
        store,
        ..TestHooks::default()
    };
    (index, hooks)
}

/// Hooks whose store ends with an index image; returns (image offset, image size, hooks)
pub fn backing_image(group_units: &[u16], crc: bool) -> (u32, u32, TestHooks) {
    let (offsets, mut store) = group_bytes(group_units);
    let image = OverlayIndex::encode_image(&offsets, &[], crc);
    let offset = store.len() as u32;
    store.extend_from_slice(&image);
    let hooks = TestHooks {
        store,
        ..TestHooks::default()
    };
    (offset, image.len() as u32, hooks)
}

/// Test configuration around a link-time index
pub fn config(index: OverlayIndex) -> OverlayConfig {
    OverlayConfig::with_index(index)
        .with_min_group_size(UNIT)
        .with_max_group_size(UNIT * 8)
}
