//! # Instruction Stream Synchronization
//!
//! RISC-V has no range-based instruction cache invalidation in the base ISA.
//! After code bytes are written or moved, `FENCE.I` is the only way to make
//! subsequent instruction fetches on this hart observe them.

cfg_if::cfg_if! {
    if #[cfg(any(target_arch = "riscv32", target_arch = "riscv64"))] {
        /// Execute FENCE.I
        ///
        /// Orders all preceding stores to instruction memory before any
        /// following instruction fetch on this hart.
        #[inline]
        pub fn fence_i() {
            // SAFETY: fence.i has no operands and only affects ordering
            unsafe {
                core::arch::asm!("fence.i", options(nostack, preserves_flags));
            }
        }
    } else {
        /// Execute FENCE.I
        ///
        /// Host builds have coherent instruction fetch; a full memory fence
        /// keeps the ordering guarantee callers rely on.
        #[inline]
        pub fn fence_i() {
            core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
        }
    }
}

/// Make a freshly written or moved code range visible to instruction fetch
///
/// The base ISA only offers the global FENCE.I, so the range is used for
/// tracing only.
#[inline]
pub fn sync_code_range(start: usize, len: usize) {
    log::trace!("fence.i after code update {:#x}..{:#x}", start, start + len);
    fence_i();
}
