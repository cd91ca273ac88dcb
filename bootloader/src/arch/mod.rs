//! Architecture abstraction layer
//!
//! The bootstrap only needs three things from the CPU: a way to trap into
//! the SPM, a barrier after page attribute changes, and a way to halt.
//! On hosts other than AArch64 the barrier is a compiler fence and halting
//! spins, which keeps the crate testable.

#[cfg(target_arch = "aarch64")]
pub mod aarch64;

/// Make page attribute changes visible before the memory is touched again
#[inline]
pub fn memory_attributes_barrier() {
    #[cfg(target_arch = "aarch64")]
    aarch64::memory_attributes_barrier();

    #[cfg(not(target_arch = "aarch64"))]
    core::sync::atomic::compiler_fence(core::sync::atomic::Ordering::SeqCst);
}

/// Stop this core forever
pub fn halt() -> ! {
    loop {
        #[cfg(target_arch = "aarch64")]
        aarch64_cpu::asm::wfe();

        #[cfg(not(target_arch = "aarch64"))]
        core::hint::spin_loop();
    }
}
