//! SP Bootloader Library
//!
//! Brings a secure partition from the moment the SPM hands it control to the
//! moment the MM core starts dispatching:
//!
//! 1. negotiate the FF-A version with the SPM
//! 2. find the partition manifest through the FF-A boot information blob
//! 3. recover the memory layout from the manifest
//! 4. locate the MM core image, lock down its sections and relocate it
//! 5. initialize the heap allocator and hand a [`BootContext`] to the
//!    downstream modules
//!
//! Any failure aborts the boot; a half-initialized partition is never run.

#![cfg_attr(not(test), no_std)]
#![warn(clippy::all)]

/// Architecture support - SVC conduit, barriers, halt
pub mod arch;

/// Boot orchestration - step sequencing, boot context, entry point
pub mod boot_stage;

/// Build-time configuration of the bootstrap
pub mod config;

/// FF-A interface - transport, version negotiation, memory permissions
pub mod ffa;

/// MM core image - firmware volume, PE/TE headers, permissions, relocation
pub mod image;

/// Partition manifest - device tree reader and boot information parser
pub mod manifest;

/// Boot protocol - FF-A boot information blob
pub mod protocol;

/// Utility library - byte-order helpers
pub mod utils;

#[cfg(test)]
mod test_support;

pub use boot_stage::{BootContext, BootOutcome, BootstrapOrchestrator, ModuleEntry};
pub use config::{BootConfig, HeapRegionPolicy};
pub use sp_api::{BootError, BootInfo, Result, Status};
