//! Image domain module (event-sourced).
//!
//! Boot images tracked by the provisioner, implemented purely as deterministic
//! domain data on top of the generic lifecycle (no IO, no storage):
//! - **VNFS**: userland OS images
//! - **Bootstrap**: kernel + initramfs pairs

pub mod bootstrap;
pub mod vnfs;

pub use bootstrap::{Bootstrap, BootstrapCommand, BootstrapEvent, BootstrapFields, BootstrapPatch};
pub use vnfs::{Vnfs, VnfsCommand, VnfsEvent, VnfsFields, VnfsPatch};
