use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;

pub const SYNC_SCHEMA_VERSION: &str = "1.0.0";

/// Node lifecycle as reported by the provisioning backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Discover,
    Provisioning,
    Provisioned,
    Deploying,
    Ready,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeErrorType {
    Provision,
    Deploy,
}

/// Resource domain a configuration session operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Domain {
    Disks,
    Interfaces,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: u32,
    pub cluster_id: Option<u32>,
    pub name: Option<String>,
    pub mac: String,
    pub status: NodeStatus,
    pub error_type: Option<NodeErrorType>,
    pub pending_addition: bool,
    pub pending_deletion: bool,
    pub online: bool,
    pub role: Option<String>,
}

impl Node {
    pub fn offline(&self) -> bool {
        !self.online
    }

    pub fn needs_reprovision(&self) -> bool {
        self.status == NodeStatus::Error
            && self.error_type == Some(NodeErrorType::Provision)
            && !self.pending_deletion
    }

    pub fn human_readable_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.mac)
    }
}

/// Named logical partition carved from a disk. The enforced minimum size
/// is supplied externally per name at edit time, not stored on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub name: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disk {
    pub id: String, // stable id per provider
    pub size: u64,
    pub volumes: Vec<Volume>,
}

impl Disk {
    pub fn volume(&self, name: &str) -> Option<&Volume> {
        self.volumes.iter().find(|volume| volume.name == name)
    }
}

/// Reference to a logical network by name. Display metadata (vlan,
/// amount) is resolved through a catalog collaborator, not stored here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    pub name: String,
}

impl Network {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interface {
    pub id: u32,
    pub name: String,
    pub mac: String,
    pub current_speed: Option<u32>,
    pub max_speed: Option<u32>,
    pub assigned_networks: Vec<Network>,
}

impl Interface {
    /// Drops nonsensical speed readings reported by some agents.
    pub fn clean_speeds(&mut self) {
        // u32::MAX sentinel shows up from agents that cannot read speed
        if self.current_speed == Some(u32::MAX) {
            self.current_speed = None;
        }
        if self.max_speed == Some(u32::MAX) {
            self.max_speed = None;
        }
    }
}

/// Bulk-upsert payload for the sync collaborator, keyed by node id.
/// Exactly one of `role`, `volumes`, `interfaces` is set per call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSyncPayload {
    pub schema_version: String,
    pub id: u32,
    pub cluster_id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volumes: Option<Vec<Disk>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interfaces: Option<Vec<Interface>>,
    pub pending_addition: bool,
    pub pending_deletion: bool,
}

impl NodeSyncPayload {
    pub fn for_node(node: &Node) -> Self {
        Self {
            schema_version: SYNC_SCHEMA_VERSION.to_string(),
            id: node.id,
            cluster_id: node.cluster_id,
            role: None,
            volumes: None,
            interfaces: None,
            pending_addition: node.pending_addition,
            pending_deletion: node.pending_deletion,
        }
    }
}

pub fn now_utc_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}
