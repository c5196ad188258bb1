use serde::{Deserialize, Serialize};

use provisioner_core::value_object::{assign, merge_non_zero};
use provisioner_events::{CommandTypes, EntityCommand, EntityEvent, EntityState, EventTypes, Fields};

/// Aggregate root: VNFS (a userland OS image, compressed CPIO).
pub type Vnfs = EntityState<VnfsFields>;
pub type VnfsEvent = EntityEvent<VnfsFields>;
pub type VnfsCommand = EntityCommand<VnfsFields>;

/// Tracked attributes of a VNFS image.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VnfsFields {
    pub arch: String,
    pub path: String,
    pub checksum: String,
    /// Image size in bytes.
    pub size: u64,
    pub compress_algo: String,
}

/// VNFS change payload. `None` means "not mentioned".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VnfsPatch {
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

impl Fields for VnfsFields {
    type Patch = VnfsPatch;

    const AGGREGATE_TYPE: &'static str = "vnfs";
    const EVENTS: EventTypes = EventTypes {
        created: "vnfs.created",
        changed: "vnfs.updated",
        deleted: "vnfs.deleted",
    };
    const COMMANDS: CommandTypes = CommandTypes {
        create: "vnfs.create",
        update: "vnfs.update",
        delete: "vnfs.delete",
    };

    fn assign(&mut self, patch: &VnfsPatch) {
        assign(&mut self.arch, &patch.arch);
        assign(&mut self.path, &patch.path);
        assign(&mut self.checksum, &patch.checksum);
        assign(&mut self.size, &patch.size);
        assign(&mut self.compress_algo, &patch.compress_algo);
    }

    fn merge(&mut self, patch: &VnfsPatch) {
        merge_non_zero(&mut self.arch, &patch.arch);
        merge_non_zero(&mut self.path, &patch.path);
        merge_non_zero(&mut self.checksum, &patch.checksum);
        merge_non_zero(&mut self.size, &patch.size);
        merge_non_zero(&mut self.compress_algo, &patch.compress_algo);
    }
}
