use std::collections::BTreeMap;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use provisioner_core::value_object::{assign, merge_non_zero, merge_non_zero_some};
use provisioner_core::{AggregateId, AggregateRoot, ValueObject};
use provisioner_events::{CommandTypes, EntityCommand, EntityEvent, EntityState, EventTypes, Fields};
use provisioner_images::{Bootstrap, Vnfs};

/// Aggregate root: Node (a physical or virtual machine being provisioned).
pub type Node = EntityState<NodeFields>;
pub type NodeEvent = EntityEvent<NodeFields>;
pub type NodeCommand = EntityCommand<NodeFields>;

/// Copy of an image aggregate as it was when attached to a node.
///
/// This is a value, not a live reference: the node's history records "image X
/// as of version N". To see the image's latest state, load it again by `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSnapshot {
    pub id: AggregateId,
    /// Version of the image aggregate the snapshot was taken at.
    pub version: u64,
    pub arch: String,
    pub path: String,
    pub checksum: String,
    pub size: u64,
    pub compress_algo: String,
}

impl ImageSnapshot {
    pub fn of_vnfs(vnfs: &Vnfs) -> Self {
        let f = vnfs.fields();
        Self {
            id: vnfs.id().clone(),
            version: vnfs.version(),
            arch: f.arch.clone(),
            path: f.path.clone(),
            checksum: f.checksum.clone(),
            size: f.size,
            compress_algo: f.compress_algo.clone(),
        }
    }

    pub fn of_bootstrap(bootstrap: &Bootstrap) -> Self {
        let f = bootstrap.fields();
        Self {
            id: bootstrap.id().clone(),
            version: bootstrap.version(),
            arch: f.arch.clone(),
            path: f.path.clone(),
            checksum: f.checksum.clone(),
            size: f.size,
            compress_algo: f.compress_algo.clone(),
        }
    }
}

impl ValueObject for ImageSnapshot {
    // A snapshot of an aggregate with no history carries no information.
    fn is_zero(&self) -> bool {
        self.version == 0
    }
}

/// A physical or virtual network adapter of a node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Netdev {
    pub hwaddr: String,
    pub name: String,
    pub ip: String,
    pub netmask: String,
    pub gateway: String,
    pub domain: String,
}

impl ValueObject for Netdev {
    fn is_zero(&self) -> bool {
        self == &Netdev::default()
    }
}

/// Tracked attributes of a node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeFields {
    pub arch: String,
    pub bootstrap: Option<ImageSnapshot>,
    pub vnfs: Option<ImageSnapshot>,
    /// Network devices keyed by CIDR subnet (e.g. `192.168.1.0/24`).
    pub netdevs: BTreeMap<String, Netdev>,
}

/// Node change payload. A present, non-empty `netdevs` replaces the whole map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bootstrap: Option<ImageSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vnfs: Option<ImageSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub netdevs: Option<BTreeMap<String, Netdev>>,
}

impl Fields for NodeFields {
    type Patch = NodePatch;

    const AGGREGATE_TYPE: &'static str = "node";
    const EVENTS: EventTypes = EventTypes {
        created: "node.created",
        changed: "node.updated",
        deleted: "node.deleted",
    };
    const COMMANDS: CommandTypes = CommandTypes {
        create: "node.create",
        update: "node.update",
        delete: "node.delete",
    };

    fn assign(&mut self, patch: &NodePatch) {
        assign(&mut self.arch, &patch.arch);
        if let Some(bootstrap) = &patch.bootstrap {
            self.bootstrap = Some(bootstrap.clone());
        }
        if let Some(vnfs) = &patch.vnfs {
            self.vnfs = Some(vnfs.clone());
        }
        assign(&mut self.netdevs, &patch.netdevs);
    }

    fn merge(&mut self, patch: &NodePatch) {
        merge_non_zero(&mut self.arch, &patch.arch);
        merge_non_zero_some(&mut self.bootstrap, &patch.bootstrap);
        merge_non_zero_some(&mut self.vnfs, &patch.vnfs);
        merge_non_zero(&mut self.netdevs, &patch.netdevs);
    }

    fn validate(patch: &NodePatch) -> Result<(), String> {
        let Some(netdevs) = &patch.netdevs else {
            return Ok(());
        };
        for (subnet, netdev) in netdevs {
            validate_cidr(subnet)?;
            for (field, value) in [("ip", &netdev.ip), ("gateway", &netdev.gateway)] {
                if !value.is_empty() && value.parse::<IpAddr>().is_err() {
                    return Err(format!("netdev {subnet}: {field} '{value}' is not an IP address"));
                }
            }
        }
        Ok(())
    }
}

fn validate_cidr(subnet: &str) -> Result<(), String> {
    let invalid = || format!("netdev key '{subnet}' is not a CIDR subnet");

    let (addr, prefix) = subnet.split_once('/').ok_or_else(invalid)?;
    let addr: IpAddr = addr.parse().map_err(|_| invalid())?;
    let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
    let max = if addr.is_ipv4() { 32 } else { 128 };
    if prefix > max {
        return Err(invalid());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use provisioner_core::{DomainError, LifecycleStatus};
    use provisioner_events::{Aggregate, EventCodec, execute};
    use provisioner_images::{VnfsCommand, VnfsPatch};

    fn node_id() -> AggregateId {
        AggregateId::new("n0001").unwrap()
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn vnfs_snapshot(size: u64) -> ImageSnapshot {
        let id = AggregateId::new("centos-7").unwrap();
        let mut vnfs = Vnfs::unborn(id.clone());
        let create = VnfsCommand::create(
            id,
            VnfsPatch {
                arch: Some("x86_64".to_string()),
                size: Some(size),
                ..VnfsPatch::default()
            },
        );
        execute(&mut vnfs, &create, at(0)).unwrap();
        ImageSnapshot::of_vnfs(&vnfs)
    }

    fn eth0() -> BTreeMap<String, Netdev> {
        let mut netdevs = BTreeMap::new();
        netdevs.insert(
            "10.0.0.0/16".to_string(),
            Netdev {
                hwaddr: "52:54:00:12:34:56".to_string(),
                name: "eth0".to_string(),
                ip: "10.0.1.1".to_string(),
                netmask: "255.255.0.0".to_string(),
                gateway: "10.0.0.1".to_string(),
                domain: "cluster".to_string(),
            },
        );
        netdevs
    }

    #[test]
    fn snapshot_captures_the_image_as_of_attachment() {
        let snapshot = vnfs_snapshot(4096);
        assert_eq!(snapshot.id.as_str(), "centos-7");
        assert_eq!(snapshot.version, 1);
        assert_eq!(snapshot.size, 4096);
        assert!(!snapshot.is_zero());
    }

    #[test]
    fn update_attaches_image_and_keeps_network() {
        let mut node = Node::unborn(node_id());
        let create = NodeCommand::create(
            node_id(),
            NodePatch {
                arch: Some("x86_64".to_string()),
                netdevs: Some(eth0()),
                ..NodePatch::default()
            },
        );
        execute(&mut node, &create, at(0)).unwrap();

        let attach = NodeCommand::update(
            node_id(),
            NodePatch {
                vnfs: Some(vnfs_snapshot(4096)),
                netdevs: Some(BTreeMap::new()),
                ..NodePatch::default()
            },
        );
        execute(&mut node, &attach, at(1)).unwrap();

        assert_eq!(node.status(), LifecycleStatus::Active);
        assert_eq!(node.fields().vnfs.as_ref().map(|s| s.size), Some(4096));
        assert_eq!(node.fields().netdevs, eth0());
        assert_eq!(node.fields().bootstrap, None);
    }

    #[test]
    fn non_empty_netdevs_replace_the_whole_map() {
        let mut node = Node::unborn(node_id());
        execute(
            &mut node,
            &NodeCommand::create(node_id(), NodePatch { netdevs: Some(eth0()), ..NodePatch::default() }),
            at(0),
        )
        .unwrap();

        let mut ib0 = BTreeMap::new();
        ib0.insert(
            "172.16.0.0/12".to_string(),
            Netdev {
                name: "ib0".to_string(),
                ..Netdev::default()
            },
        );
        execute(
            &mut node,
            &NodeCommand::update(node_id(), NodePatch { netdevs: Some(ib0.clone()), ..NodePatch::default() }),
            at(1),
        )
        .unwrap();

        assert_eq!(node.fields().netdevs, ib0);
    }

    #[test]
    fn netdev_keys_must_be_cidr_subnets() {
        let node = Node::unborn(node_id());

        let mut bad = BTreeMap::new();
        bad.insert("eth0".to_string(), Netdev::default());
        let err = node
            .handle(&NodeCommand::create(node_id(), NodePatch { netdevs: Some(bad), ..NodePatch::default() }))
            .unwrap_err();
        assert_eq!(
            err,
            DomainError::validation(node_id(), "node.create", "netdev key 'eth0' is not a CIDR subnet")
        );

        let mut too_wide = BTreeMap::new();
        too_wide.insert("10.0.0.0/33".to_string(), Netdev::default());
        assert!(validate_cidr("10.0.0.0/33").is_err());
        assert!(
            node.handle(&NodeCommand::update(node_id(), NodePatch { netdevs: Some(too_wide), ..NodePatch::default() }))
                .is_err()
        );

        assert!(validate_cidr("fd00::/64").is_ok());
    }

    #[test]
    fn netdev_addresses_must_parse() {
        let node = Node::unborn(node_id());
        let mut netdevs = eth0();
        if let Some(dev) = netdevs.get_mut("10.0.0.0/16") {
            dev.gateway = "gateway.local".to_string();
        }
        let err = node
            .handle(&NodeCommand::update(node_id(), NodePatch { netdevs: Some(netdevs), ..NodePatch::default() }))
            .unwrap_err();
        assert!(err.to_string().contains("gateway"));
    }

    #[test]
    fn snapshot_survives_the_event_codec() {
        let event = NodeEvent::FieldChanged(NodePatch {
            bootstrap: Some(vnfs_snapshot(1)),
            netdevs: Some(eth0()),
            ..NodePatch::default()
        });
        let body = event.encode(&node_id()).unwrap();
        let decoded = NodeEvent::decode(&node_id(), "node.updated", body).unwrap();
        assert_eq!(decoded, event);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Property: every IPv4 network with a prefix in 0..=32 is a valid key.
            #[test]
            fn ipv4_cidr_keys_validate(octets in any::<[u8; 4]>(), prefix in 0u8..=32) {
                let key = format!("{}.{}.{}.{}/{prefix}", octets[0], octets[1], octets[2], octets[3]);
                prop_assert!(validate_cidr(&key).is_ok());
            }

            /// Property: an absent or empty netdevs payload never touches the
            /// map; a non-empty one replaces it entirely.
            #[test]
            fn netdevs_merge_is_all_or_nothing(names in proptest::collection::vec("[a-z]{1,6}", 0..4)) {
                let mut fields = NodeFields { netdevs: eth0(), ..NodeFields::default() };

                let incoming: BTreeMap<String, Netdev> = names
                    .iter()
                    .enumerate()
                    .map(|(i, name)| (format!("10.{i}.0.0/16"), Netdev { name: name.clone(), ..Netdev::default() }))
                    .collect();

                fields.merge(&NodePatch { netdevs: None, ..NodePatch::default() });
                prop_assert_eq!(&fields.netdevs, &eth0());

                fields.merge(&NodePatch { netdevs: Some(incoming.clone()), ..NodePatch::default() });
                if incoming.is_empty() {
                    prop_assert_eq!(&fields.netdevs, &eth0());
                } else {
                    prop_assert_eq!(&fields.netdevs, &incoming);
                }
            }
        }
    }
}
