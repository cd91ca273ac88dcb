//! Partition entry point
//!
//! The SPM enters the partition at `_ModuleEntryPoint` with the boot
//! information blob in x0. The modules to start afterwards are provided by
//! the final image through `sp_module_entries`.

use super::context::ModuleEntry;
use super::orchestrator::BootstrapOrchestrator;
use crate::arch::{self, aarch64::SvcConduit};
use crate::config::BootConfig;
use crate::ffa::FfaMemoryPermissions;
use crate::image::PeCoffRelocator;

unsafe extern "Rust" {
    /// Modules to run once the bootstrap succeeds, in order
    fn sp_module_entries() -> &'static [&'static dyn ModuleEntry];
}

/// Entry point of the secure partition
///
/// # Safety
///
/// Only the SPM may call this, once, with the boot information blob it
/// prepared for this partition.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn _ModuleEntryPoint(
    shared_buf_address: u64,
    shared_buf_size: u64,
    cookie1: u64,
    cookie2: u64,
) -> ! {
    log::debug!(
        "SP entry: buffer {:#x} ({:#x} bytes), cookies {:#x} {:#x}",
        shared_buf_address,
        shared_buf_size,
        cookie1,
        cookie2
    );

    let conduit = SvcConduit;
    let attributes = FfaMemoryPermissions::new(&conduit);
    let relocator = PeCoffRelocator;
    let orchestrator = BootstrapOrchestrator::new(&conduit, &attributes, &relocator, BootConfig::new());

    // SAFETY: the final image defines `sp_module_entries`.
    let modules = unsafe { sp_module_entries() };
    // SAFETY: x0 holds the blob the SPM prepared for this partition.
    let code = unsafe { orchestrator.run(shared_buf_address, modules) };
    log::info!("SP bootstrap finished with {}", code);
    arch::halt()
}

#[cfg(not(test))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo<'_>) -> ! {
    log::error!("{}", info);
    arch::halt()
}
