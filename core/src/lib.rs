//! # COMRV Overlay Cache Engine
//!
//! Programs larger than the fast code memory of a RISC-V core are split at
//! link time into *overlay groups*. Calls into overlaid code go through a
//! 32-bit [`Token`] instead of an address; the engine resolves the token to
//! a resident copy of the group, loading it from the backing store on a
//! miss and evicting other groups when the cache is full.
//!
//! ## Components
//!
//! - **Token**: packed group id, offset and multi-group flag
//! - **Index**: group offsets, sizes and multi-group lists from the linker
//! - **Control block**: resident entries over a caller-provided region
//! - **Policy**: LRU, LFU or mixed victim ordering
//! - **Eviction**: plan-then-commit room making, with compaction
//! - **Engine**: resolve, search, lock, data overlays, reset, status
//! - **Hooks**: integrator-supplied load, integrity, error and event sinks
//! - **Sync**: one coarse critical section around the whole engine
//!
//! ## Usage
//!
//! ```ignore
//! let config = OverlayConfig::with_index(index).with_policy(EvictionPolicy::Lru);
//! let mut cache = OverlayCache::new(config, hooks);
//! cache.init(&mut OVERLAY_REGION, InitArgs::default())?;
//! let entry = cache.resolve(token, CallOrigin::Invoke)?;
//! ```

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

pub mod config;
pub mod control;
pub mod crc;
pub mod engine;
pub mod entry;
pub mod error;
pub mod hooks;
pub mod index;
pub mod policy;
pub mod status;
pub mod sync;
pub mod token;

mod evict;

#[cfg(test)]
mod scenarios;
#[cfg(test)]
mod testing;

pub use config::{EvictionPolicy, InitArgs, LockMode, OverlayConfig, TableSource};
pub use control::CacheStats;
pub use engine::{LockState, OverlayCache, ResetKind};
pub use error::{ErrorCategory, ErrorCode, OverlayError, OverlayResult};
pub use hooks::{CallOrigin, HookFault, InstrumentationEvent, NoopHooks, OverlayHooks};
pub use index::{GroupDescriptor, IndexError, OverlayIndex};
pub use status::{CacheStatus, EntryStatus};
pub use sync::{CriticalSection, IrqSection, SharedCache, SpinSection, SyncFault};
pub use token::{GroupId, Token, TokenFlags};

/// Engine major version
pub const VERSION_MAJOR: u16 = 0;
/// Engine minor version
pub const VERSION_MINOR: u16 = 1;

/// Version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
