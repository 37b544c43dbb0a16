use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{PeerStatus, StableNodeId, Status};

/// UI-facing snapshot of one mesh member, rebuilt from status on every query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeerRecord {
    pub id: StableNodeId,
    pub dns_name: String,
    pub name: String,
    pub namespace: String,
    pub host_name: String,
    pub online: bool,
    pub os: String,
    pub addrs: Vec<String>,
    pub routes: Vec<String>,
    pub ips: Vec<IpAddr>,
    pub created: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
    /// Currently selected as this machine's exit node.
    pub is_exit_node: bool,
    /// Advertises exit-node service.
    pub exit_node_capable: bool,
}

impl From<&PeerStatus> for PeerRecord {
    fn from(status: &PeerStatus) -> Self {
        let (name, namespace) = split_peer_namespace(&status.dns_name);
        Self {
            id: status.id.clone(),
            dns_name: status.dns_name.clone(),
            name: name.to_owned(),
            namespace: namespace.to_owned(),
            host_name: status.host_name.clone(),
            online: status.online,
            os: status.os.clone(),
            addrs: status.addrs.clone(),
            routes: status.primary_routes.clone(),
            ips: status.mesh_ips.clone(),
            created: status.created,
            last_seen: status.last_seen,
            is_exit_node: status.exit_node,
            exit_node_capable: status.exit_node_option,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Namespace {
    pub name: String,
    pub peers: Vec<PeerRecord>,
}

/// Splits a DNS name at its first `.` into display name and namespace.
///
/// A name without a separator yields an empty namespace.
pub fn split_peer_namespace(dns_name: &str) -> (&str, &str) {
    dns_name.split_once('.').unwrap_or((dns_name, ""))
}

/// Groups peers by namespace, keeping first-seen order for both groups and
/// the peers inside each group.
pub fn build_directory(status: &Status) -> Vec<Namespace> {
    let mut namespaces: Vec<Namespace> = Vec::new();

    for peer in status.peer_order() {
        let record = PeerRecord::from(peer);
        match namespaces.iter_mut().find(|ns| ns.name == record.namespace) {
            Some(namespace) => namespace.peers.push(record),
            None => namespaces.push(Namespace {
                name: record.namespace.clone(),
                peers: vec![record],
            }),
        }
    }

    namespaces
}
