//! Ordering between register writes and instruction fetch.

/// Data synchronization barrier: all outstanding memory accesses complete.
#[cfg(target_arch = "aarch64")]
#[inline]
pub fn dsb() {
    // SAFETY: a barrier has no memory effects beyond ordering.
    unsafe {
        core::arch::asm!("dsb sy", options(nostack, preserves_flags));
    }
}

/// Instruction synchronization barrier: later instructions see earlier system register writes.
#[cfg(target_arch = "aarch64")]
#[inline]
pub fn isb() {
    // SAFETY: a barrier has no memory effects beyond ordering.
    unsafe {
        core::arch::asm!("isb", options(nostack, preserves_flags));
    }
}

#[cfg(not(target_arch = "aarch64"))]
#[inline]
pub fn dsb() {
    core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
}

#[cfg(not(target_arch = "aarch64"))]
#[inline]
pub fn isb() {
    core::sync::atomic::compiler_fence(core::sync::atomic::Ordering::SeqCst);
}
