//! Boot stage
//!
//! [`BootstrapOrchestrator`] chains the boot steps and stops at the first
//! failure; the resulting [`BootContext`] is handed to the downstream
//! modules.

pub mod context;
#[cfg(all(feature = "baremetal", target_arch = "aarch64"))]
pub mod entry;
pub mod orchestrator;

pub use context::{BootContext, ModuleEntry};
pub use orchestrator::{BootOutcome, BootstrapOrchestrator};
