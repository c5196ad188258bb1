//! Node provisioning: attaching images to nodes.
//!
//! A node embeds image snapshots by value. Attaching re-resolves the image by
//! id so the snapshot is current at attach time, and `refresh_images` brings
//! stale snapshots up to date. Each step is a separate `apply`; there is no
//! atomicity across the image and node streams.

use tracing::{info, instrument, warn};

use provisioner_core::{AggregateId, AggregateRoot, Clock, DomainError, LifecycleStatus, SystemClock};
use provisioner_events::{Aggregate, Fields};
use provisioner_images::{Bootstrap, Vnfs};
use provisioner_nodes::{ImageSnapshot, Node, NodeCommand, NodeFields, NodePatch};

use crate::config::RepositoryConfig;
use crate::event_store::EventStore;
use crate::repository::{Repository, RepositoryError};

/// Node-facing service composing the node, VNFS and bootstrap repositories.
#[derive(Debug)]
pub struct NodeProvisioner<S, C = SystemClock> {
    nodes: Repository<Node, S, C>,
    vnfs: Repository<Vnfs, S, C>,
    bootstraps: Repository<Bootstrap, S, C>,
}

impl<S, C> NodeProvisioner<S, C> {
    pub fn new(
        nodes: Repository<Node, S, C>,
        vnfs: Repository<Vnfs, S, C>,
        bootstraps: Repository<Bootstrap, S, C>,
    ) -> Self {
        Self {
            nodes,
            vnfs,
            bootstraps,
        }
    }

    /// Build all three repositories over one store handle.
    pub fn shared(store: S, clock: C, config: RepositoryConfig) -> Self
    where
        S: Clone,
        C: Clone,
    {
        Self::new(
            Repository::with_clock(store.clone(), clock.clone(), config),
            Repository::with_clock(store.clone(), clock.clone(), config),
            Repository::with_clock(store, clock, config),
        )
    }

    pub fn nodes(&self) -> &Repository<Node, S, C> {
        &self.nodes
    }

    pub fn vnfs(&self) -> &Repository<Vnfs, S, C> {
        &self.vnfs
    }

    pub fn bootstraps(&self) -> &Repository<Bootstrap, S, C> {
        &self.bootstraps
    }
}

impl<S, C> NodeProvisioner<S, C>
where
    S: EventStore,
    C: Clock,
{
    /// Embed the current state of VNFS `vnfs_id` into node `node_id`.
    #[instrument(skip_all, fields(node_id = %node_id, vnfs_id = %vnfs_id), err)]
    pub fn attach_vnfs(&self, node_id: &AggregateId, vnfs_id: &AggregateId) -> Result<u64, RepositoryError> {
        let vnfs = self.vnfs.load(vnfs_id)?;
        ensure_attachable(node_id, &vnfs)?;
        self.update_node(
            node_id,
            NodePatch {
                vnfs: Some(ImageSnapshot::of_vnfs(&vnfs)),
                ..NodePatch::default()
            },
        )
    }

    /// Embed the current state of bootstrap `bootstrap_id` into node `node_id`.
    #[instrument(skip_all, fields(node_id = %node_id, bootstrap_id = %bootstrap_id), err)]
    pub fn attach_bootstrap(
        &self,
        node_id: &AggregateId,
        bootstrap_id: &AggregateId,
    ) -> Result<u64, RepositoryError> {
        let bootstrap = self.bootstraps.load(bootstrap_id)?;
        ensure_attachable(node_id, &bootstrap)?;
        self.update_node(
            node_id,
            NodePatch {
                bootstrap: Some(ImageSnapshot::of_bootstrap(&bootstrap)),
                ..NodePatch::default()
            },
        )
    }

    /// Replace embedded snapshots whose image has moved on since attachment.
    ///
    /// Deleted images are left as they were. Returns the node version, which
    /// is unchanged when every snapshot is already current.
    #[instrument(skip_all, fields(node_id = %node_id), err)]
    pub fn refresh_images(&self, node_id: &AggregateId) -> Result<u64, RepositoryError> {
        let node = self.nodes.load(node_id)?;
        let mut patch = NodePatch::default();

        if let Some(snapshot) = &node.fields().vnfs {
            let current = self.vnfs.load(&snapshot.id)?;
            if is_stale(snapshot, &current) {
                patch.vnfs = Some(ImageSnapshot::of_vnfs(&current));
            }
        }

        if let Some(snapshot) = &node.fields().bootstrap {
            let current = self.bootstraps.load(&snapshot.id)?;
            if is_stale(snapshot, &current) {
                patch.bootstrap = Some(ImageSnapshot::of_bootstrap(&current));
            }
        }

        if patch == NodePatch::default() {
            return Ok(node.version());
        }

        info!(
            vnfs = patch.vnfs.is_some(),
            bootstrap = patch.bootstrap.is_some(),
            "refreshing stale image snapshots"
        );
        self.update_node(node_id, patch)
    }

    /// Update an existing, non-deleted node. The check runs against the state
    /// each attempt appends on, so a concurrent delete is never overwritten.
    fn update_node(&self, node_id: &AggregateId, patch: NodePatch) -> Result<u64, RepositoryError> {
        self.nodes
            .apply_with_retry_when(&NodeCommand::update(node_id.clone(), patch), |node: &Node| {
                match node.status() {
                    LifecycleStatus::Active => Ok(()),
                    LifecycleStatus::Unborn => Err(DomainError::not_found(node_id)),
                    LifecycleStatus::Deleted => {
                        Err(DomainError::already_deleted(node_id, NodeFields::COMMANDS.update))
                    }
                }
            })
    }
}

fn ensure_attachable<A: Aggregate>(node_id: &AggregateId, image: &A) -> Result<(), DomainError> {
    if image.status() == LifecycleStatus::Active {
        return Ok(());
    }
    Err(DomainError::validation(
        node_id,
        NodeFields::COMMANDS.update,
        format!(
            "{} {} is {}; only active images can be attached",
            A::AGGREGATE_TYPE,
            image.id(),
            image.status()
        ),
    ))
}

fn is_stale<A: Aggregate>(snapshot: &ImageSnapshot, current: &A) -> bool {
    if current.version() == snapshot.version {
        return false;
    }
    if current.status() != LifecycleStatus::Active {
        warn!(
            image_id = %snapshot.id,
            status = %current.status(),
            "embedded image is no longer active; keeping snapshot"
        );
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use provisioner_images::{BootstrapCommand, BootstrapPatch, VnfsCommand, VnfsPatch};

    use crate::event_store::InMemoryEventStore;

    fn id(value: &str) -> AggregateId {
        AggregateId::new(value).unwrap()
    }

    fn provisioner() -> NodeProvisioner<Arc<InMemoryEventStore>> {
        NodeProvisioner::shared(Arc::new(InMemoryEventStore::new()), SystemClock, RepositoryConfig::default())
    }

    fn seed(p: &NodeProvisioner<Arc<InMemoryEventStore>>) {
        p.nodes()
            .apply(&NodeCommand::create(
                id("n0001"),
                NodePatch {
                    arch: Some("x86_64".to_string()),
                    ..NodePatch::default()
                },
            ))
            .unwrap();
        p.vnfs()
            .apply(&VnfsCommand::create(
                id("rocky-9"),
                VnfsPatch {
                    arch: Some("x86_64".to_string()),
                    path: Some("/var/lib/provision/vnfs/rocky-9.img.gz".to_string()),
                    size: Some(1024),
                    ..VnfsPatch::default()
                },
            ))
            .unwrap();
        p.bootstraps()
            .apply(&BootstrapCommand::create(
                id("kernel-6.1"),
                BootstrapPatch {
                    arch: Some("x86_64".to_string()),
                    ..BootstrapPatch::default()
                },
            ))
            .unwrap();
    }

    #[test]
    fn attach_embeds_current_image_state() {
        let p = provisioner();
        seed(&p);

        assert_eq!(p.attach_vnfs(&id("n0001"), &id("rocky-9")).unwrap(), 2);
        assert_eq!(p.attach_bootstrap(&id("n0001"), &id("kernel-6.1")).unwrap(), 3);

        let node = p.nodes().load(&id("n0001")).unwrap();
        let vnfs = node.fields().vnfs.as_ref().unwrap();
        assert_eq!(vnfs.id, id("rocky-9"));
        assert_eq!(vnfs.size, 1024);
        assert_eq!(vnfs.version, 1);
        assert_eq!(node.fields().bootstrap.as_ref().map(|b| b.id.clone()), Some(id("kernel-6.1")));
        assert_eq!(node.fields().arch, "x86_64");
    }

    #[test]
    fn attaching_a_deleted_image_is_refused() {
        let p = provisioner();
        seed(&p);
        p.vnfs().apply(&VnfsCommand::delete(id("rocky-9"))).unwrap();

        let err = p.attach_vnfs(&id("n0001"), &id("rocky-9")).unwrap_err();
        let Some(DomainError::Validation { aggregate_id, command, reason }) = err.as_domain() else {
            panic!("expected a validation error, got {err:?}");
        };
        assert_eq!(aggregate_id, "n0001");
        assert_eq!(command, "node.update");
        assert!(reason.contains("rocky-9"));
        assert_eq!(p.nodes().load(&id("n0001")).unwrap().version(), 1);
    }

    #[test]
    fn attaching_an_unknown_image_or_node_is_not_found() {
        let p = provisioner();
        seed(&p);

        assert!(p.attach_vnfs(&id("n0001"), &id("nope")).unwrap_err().is_not_found());
        assert!(p.attach_vnfs(&id("n9999"), &id("rocky-9")).unwrap_err().is_not_found());
    }

    #[test]
    fn refresh_replaces_stale_snapshots_only() {
        let p = provisioner();
        seed(&p);
        p.attach_vnfs(&id("n0001"), &id("rocky-9")).unwrap();
        p.attach_bootstrap(&id("n0001"), &id("kernel-6.1")).unwrap();

        // Nothing moved yet.
        assert_eq!(p.refresh_images(&id("n0001")).unwrap(), 3);

        p.vnfs()
            .apply(&VnfsCommand::update(
                id("rocky-9"),
                VnfsPatch {
                    size: Some(2048),
                    checksum: Some("5d41402abc4b2a76b9719d911017c592".to_string()),
                    ..VnfsPatch::default()
                },
            ))
            .unwrap();

        assert_eq!(p.refresh_images(&id("n0001")).unwrap(), 4);
        let node = p.nodes().load(&id("n0001")).unwrap();
        let vnfs = node.fields().vnfs.as_ref().unwrap();
        assert_eq!(vnfs.version, 2);
        assert_eq!(vnfs.size, 2048);
        assert_eq!(node.fields().bootstrap.as_ref().unwrap().version, 1);
    }

    #[test]
    fn refresh_keeps_snapshots_of_deleted_images() {
        let p = provisioner();
        seed(&p);
        p.attach_vnfs(&id("n0001"), &id("rocky-9")).unwrap();
        p.vnfs().apply(&VnfsCommand::delete(id("rocky-9"))).unwrap();

        assert_eq!(p.refresh_images(&id("n0001")).unwrap(), 2);
        let node = p.nodes().load(&id("n0001")).unwrap();
        assert_eq!(node.fields().vnfs.as_ref().unwrap().version, 1);
    }

    #[test]
    fn deleted_nodes_do_not_take_attachments() {
        let p = provisioner();
        seed(&p);
        p.nodes().apply(&NodeCommand::delete(id("n0001"))).unwrap();

        let err = p.attach_vnfs(&id("n0001"), &id("rocky-9")).unwrap_err();
        assert_eq!(err.as_domain(), Some(&DomainError::already_deleted("n0001", "node.update")));
    }
}
