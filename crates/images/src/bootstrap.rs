use serde::{Deserialize, Serialize};

use provisioner_core::value_object::{assign, merge_non_zero};
use provisioner_events::{CommandTypes, EntityCommand, EntityEvent, EntityState, EventTypes, Fields};

/// Aggregate root: Bootstrap (a kernel + initramfs pair used to boot a node).
pub type Bootstrap = EntityState<BootstrapFields>;
pub type BootstrapEvent = EntityEvent<BootstrapFields>;
pub type BootstrapCommand = EntityCommand<BootstrapFields>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootstrapFields {
    pub arch: String,
    pub path: String,
    pub checksum: String,
    pub size: u64,
    pub compress_algo: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compress_algo: Option<String>,
}

impl Fields for BootstrapFields {
    type Patch = BootstrapPatch;

    const AGGREGATE_TYPE: &'static str = "bootstrap";
    const EVENTS: EventTypes = EventTypes {
        created: "bootstrap.created",
        changed: "bootstrap.changed",
        deleted: "bootstrap.deleted",
    };
    const COMMANDS: CommandTypes = CommandTypes {
        create: "bootstrap.create",
        update: "bootstrap.update",
        delete: "bootstrap.delete",
    };

    fn assign(&mut self, patch: &BootstrapPatch) {
        assign(&mut self.arch, &patch.arch);
        assign(&mut self.path, &patch.path);
        assign(&mut self.checksum, &patch.checksum);
        assign(&mut self.size, &patch.size);
        assign(&mut self.compress_algo, &patch.compress_algo);
    }

    fn merge(&mut self, patch: &BootstrapPatch) {
        merge_non_zero(&mut self.arch, &patch.arch);
        merge_non_zero(&mut self.path, &patch.path);
        merge_non_zero(&mut self.checksum, &patch.checksum);
        merge_non_zero(&mut self.size, &patch.size);
        merge_non_zero(&mut self.compress_algo, &patch.compress_algo);
    }
}
