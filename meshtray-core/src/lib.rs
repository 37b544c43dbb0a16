use std::{collections::BTreeMap, net::IpAddr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

mod directory;
mod exit_node;

pub use directory::{Namespace, PeerRecord, build_directory, split_peer_namespace};
pub use exit_node::{
    EXIT_ROUTE_V4, EXIT_ROUTE_V6, contains_exit_routes, exit_node_candidates, exit_node_ip_of_arg,
    trim_dns_suffix,
};

pub type NodeKey = String;
pub type StableNodeId = String;
pub type ProfileId = String;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("exit node argument must not be empty")]
    EmptyExitNodeArg,
    #[error("{0} is not configured as an exit node")]
    NotExitNode(IpAddr),
    #[error("{0} is not a known peer")]
    UnknownPeerIp(IpAddr),
    #[error("node {0:?} has no mesh IP")]
    NoMeshIp(String),
    #[error("node {0:?} is not advertising an exit node")]
    NotAdvertisingExitNode(String),
    #[error("invalid exit node {0:?}; must be IP or unique node name")]
    NoMatchingNode(String),
    #[error("ambiguous exit node name {0:?}")]
    AmbiguousNode(String),
}

/// Treats an explicit JSON `null` the same as a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// The daemon encodes an unset address as an empty string.
mod addr_or_empty {
    use std::net::IpAddr;

    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(addr: &Option<IpAddr>, serializer: S) -> Result<S::Ok, S::Error> {
        match addr {
            Some(addr) => serializer.collect_str(addr),
            None => serializer.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<IpAddr>, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
        if raw.is_empty() {
            return Ok(None);
        }
        raw.parse().map(Some).map_err(D::Error::custom)
    }
}

/// One node as reported by the daemon's status endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct PeerStatus {
    #[serde(rename = "ID", default)]
    pub id: StableNodeId,
    #[serde(default)]
    pub public_key: NodeKey,
    #[serde(default)]
    pub host_name: String,
    #[serde(rename = "DNSName", default)]
    pub dns_name: String,
    #[serde(rename = "OS", default)]
    pub os: String,
    #[serde(rename = "TailscaleIPs", default, deserialize_with = "null_as_default")]
    pub mesh_ips: Vec<IpAddr>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub addrs: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub primary_routes: Vec<String>,
    #[serde(default)]
    pub online: bool,
    #[serde(default)]
    pub exit_node: bool,
    #[serde(default)]
    pub exit_node_option: bool,
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
}

/// Full daemon status snapshot.
///
/// Peers are keyed by node key; iterating the map yields the daemon's stable
/// enumeration order (ascending key).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct Status {
    #[serde(default)]
    pub backend_state: String,
    #[serde(rename = "Self", default, deserialize_with = "null_as_default")]
    pub self_status: PeerStatus,
    #[serde(rename = "Peer", default, deserialize_with = "null_as_default")]
    pub peers: BTreeMap<NodeKey, PeerStatus>,
    #[serde(rename = "MagicDNSSuffix", default)]
    pub magic_dns_suffix: String,
}

impl Status {
    pub fn peer_order(&self) -> impl Iterator<Item = &PeerStatus> {
        self.peers.values()
    }

    pub fn peer_by_dns_name(&self, dns_name: &str) -> Option<&PeerStatus> {
        self.peer_order().find(|peer| peer.dns_name == dns_name)
    }

    pub fn is_running(&self) -> bool {
        self.backend_state == "Running"
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct Prefs {
    #[serde(rename = "ExitNodeID", default)]
    pub exit_node_id: StableNodeId,
    #[serde(rename = "ExitNodeIP", default, with = "addr_or_empty")]
    pub exit_node_ip: Option<IpAddr>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub advertise_routes: Vec<String>,
}

impl Prefs {
    pub fn advertises_exit_node(&self) -> bool {
        contains_exit_routes(&self.advertise_routes)
    }
}

/// A preference edit: only fields whose `*_set` flag is true are applied, and
/// each applied field is replaced wholesale.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MaskedPrefs {
    #[serde(flatten)]
    pub prefs: Prefs,
    #[serde(rename = "ExitNodeIDSet", default, skip_serializing_if = "is_false")]
    pub exit_node_id_set: bool,
    #[serde(rename = "ExitNodeIPSet", default, skip_serializing_if = "is_false")]
    pub exit_node_ip_set: bool,
    #[serde(rename = "AdvertiseRoutesSet", default, skip_serializing_if = "is_false")]
    pub advertise_routes_set: bool,
}

impl MaskedPrefs {
    /// Sets both exit-node fields to empty values.
    pub fn clear_exit_node() -> Self {
        Self {
            prefs: Prefs::default(),
            exit_node_id_set: true,
            exit_node_ip_set: true,
            advertise_routes_set: false,
        }
    }

    /// Selects an exit node by mesh IP and clears any ID-based selection.
    pub fn exit_node_ip(ip: IpAddr) -> Self {
        Self {
            prefs: Prefs {
                exit_node_ip: Some(ip),
                ..Prefs::default()
            },
            ..Self::clear_exit_node()
        }
    }

    pub fn advertise_routes(routes: Vec<String>) -> Self {
        Self {
            prefs: Prefs {
                advertise_routes: routes,
                ..Prefs::default()
            },
            advertise_routes_set: true,
            ..Self::default()
        }
    }
}

/// Daemon backend state as carried by bus notifications.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(from = "u8", into = "u8")]
pub enum BackendState {
    NoState,
    InUseOtherUser,
    NeedsLogin,
    NeedsMachineAuth,
    Stopped,
    Starting,
    Running,
    Unknown(u8),
}

impl From<u8> for BackendState {
    fn from(code: u8) -> Self {
        match code {
            0 => BackendState::NoState,
            1 => BackendState::InUseOtherUser,
            2 => BackendState::NeedsLogin,
            3 => BackendState::NeedsMachineAuth,
            4 => BackendState::Stopped,
            5 => BackendState::Starting,
            6 => BackendState::Running,
            other => BackendState::Unknown(other),
        }
    }
}

impl From<BackendState> for u8 {
    fn from(state: BackendState) -> Self {
        match state {
            BackendState::NoState => 0,
            BackendState::InUseOtherUser => 1,
            BackendState::NeedsLogin => 2,
            BackendState::NeedsMachineAuth => 3,
            BackendState::Stopped => 4,
            BackendState::Starting => 5,
            BackendState::Running => 6,
            BackendState::Unknown(code) => code,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FilesWaiting {}

/// One message from the daemon's event bus. Fields the companion does not
/// classify are ignored; every notification still counts as an update.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct Notify {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<BackendState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files_waiting: Option<FilesWaiting>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WaitingFile {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Size")]
    pub size: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccountProfile {
    #[serde(rename = "ID")]
    pub id: ProfileId,
    #[serde(rename = "Name")]
    pub name: String,
}
