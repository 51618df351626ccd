//! Walks one node through a disk edit and an interface move, against
//! in-memory collaborators.

use anyhow::{anyhow, Result};
use rackforge_core::{Disk, Interface, Network, Node, NodeStatus, NodeSyncPayload, Volume};
use rackforge_session::{CommitResult, DiskSession, InterfaceSession, SyncBackend, SyncFailure};

struct PrintingBackend;

impl SyncBackend for PrintingBackend {
    fn save(&mut self, payload: &NodeSyncPayload) -> Result<(), SyncFailure> {
        println!(
            "save node {}: {}",
            payload.id,
            serde_json::to_string(payload).unwrap_or_default()
        );
        Ok(())
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let node = Node {
        id: 1,
        cluster_id: Some(1),
        name: Some("slave-01".to_string()),
        mac: "aa:bb:cc:dd:ee:01".to_string(),
        status: NodeStatus::Discover,
        error_type: None,
        pending_addition: true,
        pending_deletion: false,
        online: true,
        role: Some("compute".to_string()),
    };

    let (mut disks, ticket) = DiskSession::new(node.clone(), false);
    disks.complete_load(
        ticket,
        vec![Disk {
            id: "sda".to_string(),
            size: 1_000_000,
            volumes: vec![
                Volume {
                    name: "os".to_string(),
                    size: 200_000,
                },
                Volume {
                    name: "vm".to_string(),
                    size: 100_000,
                },
            ],
        }],
    );
    disks.grow_volume_to_fill("sda", "vm", 50_000);
    println!("dirty after grow: {}", disks.is_dirty());
    match disks.commit(&mut PrintingBackend) {
        CommitResult::Committed => println!("disks committed"),
        other => return Err(anyhow!("disk commit did not apply: {other:?}")),
    }

    let (mut ifaces, ticket) = InterfaceSession::new(node, false);
    ifaces.complete_load(
        ticket,
        vec![
            Interface {
                id: 1,
                name: "eth0".to_string(),
                mac: "aa:bb:cc:dd:ee:01".to_string(),
                current_speed: Some(1000),
                max_speed: Some(1000),
                assigned_networks: vec![Network::new("public"), Network::new("management")],
            },
            Interface {
                id: 2,
                name: "eth1".to_string(),
                mac: "aa:bb:cc:dd:ee:02".to_string(),
                current_speed: None,
                max_speed: Some(10000),
                assigned_networks: vec![Network::new("storage")],
            },
        ],
    );
    ifaces.begin_move(1, &["management"]);
    ifaces.end_move(Some(2));
    match ifaces.commit(&mut PrintingBackend) {
        CommitResult::Committed => println!("interfaces committed"),
        other => return Err(anyhow!("interface commit did not apply: {other:?}")),
    }
    Ok(())
}
