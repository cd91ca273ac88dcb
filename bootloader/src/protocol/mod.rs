//! Boot protocol
//!
//! The SPM passes the partition an FF-A boot information blob: a header
//! followed by a table of typed descriptors. The only descriptor consumed
//! here is the one pointing at the partition manifest.

pub mod boot_info;

pub use boot_info::{BootInfoDescriptor, BootInfoHeader, BootInfoLocator};
