//! Partition manifest
//!
//! The SPM describes the partition in a flattened device tree.
//! [`ManifestReader`] is a read-only, bounds-checked view of that tree and
//! [`ManifestParser`] turns it into the partition [`BootInfo`](sp_api::BootInfo).

pub mod fdt;
pub mod parser;

pub use fdt::{ManifestNode, ManifestReader, Subnodes};
pub use parser::{Granule, ImageDescription, ManifestParser};

use sp_api::{BootError, ManifestMissingKind};

/// A tree that cannot be walked up to the manifest node holds no manifest
pub(crate) fn unreadable(error: BootError) -> BootError {
    match error {
        BootError::ManifestMalformed(fault) => {
            log::error!("Manifest is not a readable device tree: {:?}", fault);
            BootError::ManifestMissing(ManifestMissingKind::Unreadable(fault))
        }
        other => other,
    }
}
