//! # COMRV Hardware Shim
//!
//! The overlay engine needs exactly two things from the hardware:
//!
//! - **Interrupt masking**: a save/restore pair on the machine-mode global
//!   interrupt enable bit, used to build the bare-metal critical section.
//! - **Instruction-stream fence**: `FENCE.I` after the engine itself moves
//!   code inside the overlay cache (defragmentation).
//!
//! Everything else a board needs (timers, UART, vector tables) lives outside
//! this workspace.
//!
//! ## Host Builds
//!
//! On targets other than RISC-V the same API is backed by an emulated
//! interrupt-enable flag and a plain memory fence, so the engine and its
//! tests run unmodified on the build machine.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

pub mod cache;
pub mod interrupts;

pub use cache::{fence_i, sync_code_range};
pub use interrupts::{disable_interrupts_save, interrupts_enabled, restore_interrupts};
