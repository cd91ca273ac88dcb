//! SP API
//!
//! Core types shared by the secure partition crates: the boot information
//! recovered from the partition manifest, memory categories and page
//! arithmetic, and the firmware status codes a failed boot halts with.

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod boot;
pub mod error;
pub mod memory;

pub use boot::{BootInfo, MemoryRange};
pub use error::{
    BootError, FfaError, ImageFault, ManifestFault, ManifestMissingKind, PermissionOp, Result,
    Status,
};
pub use memory::{
    CategoryPolicy, MemoryCategory, PAGE_SHIFT, PAGE_SIZE, pages_to_size, size_to_pages,
};
