use rackforge_core::{Interface, Network};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MoveFault {
    #[error("a move is already staged")]
    AlreadyStaged,
    #[error("no move is staged")]
    NotStaged,
    #[error("unknown interface")]
    UnknownInterface,
}

/// Staged half of a two-phase network move: networks detached from
/// `origin` and not yet attached anywhere.
#[derive(Debug, Clone)]
struct StagedMove {
    origin: u32,
    networks: Vec<Network>,
}

/// One node's interfaces with exclusive network membership. A network
/// belongs to at most one interface's assigned set; it may be
/// transiently unassigned only inside a staged move.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceSet {
    pub interfaces: Vec<Interface>,
    #[serde(skip)]
    staged: Option<StagedMove>,
}

impl InterfaceSet {
    /// Assigned sets are kept in name order so that a detach/restore
    /// round trip compares structurally equal to the starting state.
    pub fn new(mut interfaces: Vec<Interface>) -> Self {
        for iface in &mut interfaces {
            iface.assigned_networks.sort_by(|a, b| a.name.cmp(&b.name));
        }
        Self {
            interfaces,
            staged: None,
        }
    }

    pub fn interface(&self, id: u32) -> Option<&Interface> {
        self.interfaces.iter().find(|iface| iface.id == id)
    }

    fn interface_mut(&mut self, id: u32) -> Option<&mut Interface> {
        self.interfaces.iter_mut().find(|iface| iface.id == id)
    }

    pub fn is_empty(&self, id: u32) -> bool {
        self.interface(id)
            .map(|iface| iface.assigned_networks.is_empty())
            .unwrap_or(true)
    }

    /// Removes and returns the named networks from the source
    /// interface. Names not assigned there are skipped silently.
    pub fn detach_networks(&mut self, source: u32, names: &[&str]) -> Vec<Network> {
        let Some(iface) = self.interface_mut(source) else {
            return Vec::new();
        };
        let mut detached = Vec::new();
        iface.assigned_networks.retain(|network| {
            if names.contains(&network.name.as_str()) {
                detached.push(network.clone());
                false
            } else {
                true
            }
        });
        detached
    }

    pub fn attach_networks(&mut self, target: u32, networks: Vec<Network>) {
        if let Some(iface) = self.interface_mut(target) {
            iface.assigned_networks.extend(networks);
            iface.assigned_networks.sort_by(|a, b| a.name.cmp(&b.name));
        }
    }

    /// First half of a move: detaches the named networks from the
    /// source and stages them. Exactly one move may be staged at a
    /// time; a second begin is a contract violation and a no-op.
    pub fn begin_move(&mut self, source: u32, names: &[&str]) -> Result<(), MoveFault> {
        if self.staged.is_some() {
            debug_assert!(false, "begin_move while a move is staged");
            return Err(MoveFault::AlreadyStaged);
        }
        if self.interface(source).is_none() {
            debug_assert!(false, "begin_move from unknown interface {source}");
            return Err(MoveFault::UnknownInterface);
        }
        let networks = self.detach_networks(source, names);
        self.staged = Some(StagedMove {
            origin: source,
            networks,
        });
        Ok(())
    }

    /// Second half of a move. A known target other than the origin
    /// receives the staged networks; anything else (no target, unknown
    /// target, the origin itself) restores them to the origin. The
    /// staged set is never dropped.
    pub fn end_move(&mut self, target: Option<u32>) -> Result<(), MoveFault> {
        let Some(staged) = self.staged.take() else {
            debug_assert!(false, "end_move without a staged move");
            return Err(MoveFault::NotStaged);
        };
        let destination = match target {
            Some(id) if id != staged.origin && self.interface(id).is_some() => id,
            _ => staged.origin,
        };
        self.attach_networks(destination, staged.networks);
        Ok(())
    }

    pub fn move_in_progress(&self) -> bool {
        self.staged.is_some()
    }

    /// All assigned networks across all interfaces, plus any staged
    /// set. Sorted so callers can compare as a multiset.
    pub fn all_networks(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .interfaces
            .iter()
            .flat_map(|iface| iface.assigned_networks.iter())
            .map(|network| network.name.clone())
            .collect();
        if let Some(staged) = &self.staged {
            names.extend(staged.networks.iter().map(|network| network.name.clone()));
        }
        names.sort();
        names
    }
}

/// Display metadata for a network, resolved by name through an
/// explicit catalog rather than patched onto the network type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkDetails {
    pub vlan: Option<u16>,
    pub amount: u32,
}

pub trait NetworkCatalog {
    fn details(&self, name: &str) -> Option<NetworkDetails>;
}

impl InterfaceSet {
    /// Resolves display metadata for one interface's assigned networks
    /// through the catalog. Networks the catalog does not know render
    /// without details.
    pub fn describe(
        &self,
        id: u32,
        catalog: &dyn NetworkCatalog,
    ) -> Vec<(String, Option<NetworkDetails>)> {
        self.interface(id)
            .map(|iface| {
                iface
                    .assigned_networks
                    .iter()
                    .map(|network| (network.name.clone(), catalog.details(&network.name)))
                    .collect()
            })
            .unwrap_or_default()
    }
}
