//! # Global Interrupt Control
//!
//! Save/restore of the machine-mode interrupt enable bit (`mstatus.MIE`).
//!
//! The save variant uses a single `csrrci` so reading the old state and
//! clearing the bit cannot be split by an interrupt.

cfg_if::cfg_if! {
    if #[cfg(any(target_arch = "riscv32", target_arch = "riscv64"))] {
        mod imp {
            use core::arch::asm;

            /// Machine Interrupt Enable bit of `mstatus`
            const MSTATUS_MIE: usize = 1 << 3;

            #[inline]
            pub fn enabled() -> bool {
                let value: usize;
                // SAFETY: reading mstatus has no side effects
                unsafe {
                    asm!("csrr {}, mstatus", out(reg) value, options(nomem, nostack, preserves_flags));
                }
                value & MSTATUS_MIE != 0
            }

            #[inline]
            pub fn disable_save() -> bool {
                let old: usize;
                // SAFETY: atomically clears MIE and returns the previous mstatus
                unsafe {
                    asm!("csrrci {}, mstatus, 8", out(reg) old, options(nostack));
                }
                old & MSTATUS_MIE != 0
            }

            #[inline]
            pub fn enable() {
                // SAFETY: sets MIE only
                unsafe {
                    asm!("csrsi mstatus, 8", options(nostack));
                }
            }
        }
    } else {
        mod imp {
            use core::sync::atomic::{AtomicBool, Ordering};

            /// Emulated `mstatus.MIE` for hosted builds
            static MIE: AtomicBool = AtomicBool::new(true);

            #[inline]
            pub fn enabled() -> bool {
                MIE.load(Ordering::SeqCst)
            }

            #[inline]
            pub fn disable_save() -> bool {
                MIE.swap(false, Ordering::SeqCst)
            }

            #[inline]
            pub fn enable() {
                MIE.store(true, Ordering::SeqCst);
            }
        }
    }
}

/// Check if global interrupts are enabled
#[inline]
pub fn interrupts_enabled() -> bool {
    imp::enabled()
}

/// Disable global interrupts and return the previous state
#[inline]
pub fn disable_interrupts_save() -> bool {
    imp::disable_save()
}

/// Restore the state returned by [`disable_interrupts_save`]
#[inline]
pub fn restore_interrupts(was_enabled: bool) {
    if was_enabled {
        imp::enable();
    }
}
