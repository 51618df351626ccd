use rackforge_capacity::{has_validation_errors, DiskAllocation};
use rackforge_core::{now_utc_rfc3339, Disk, Domain, Interface, Node, NodeSyncPayload};
use rackforge_lockdown::is_locked;
use rackforge_netassign::InterfaceSet;
use rackforge_snapshot::Baseline;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncFailure {
    #[error("save rejected: {0}")]
    Rejected(String),
    #[error("defaults unavailable: {0}")]
    DefaultsUnavailable(String),
}

/// Idempotent bulk upsert keyed by node id. The engine never retries on
/// its own; retry is operator-initiated by committing again.
pub trait SyncBackend {
    fn save(&mut self, payload: &NodeSyncPayload) -> Result<(), SyncFailure>;
}

/// Server-suggested allocations. Returned data is not yet validated;
/// the session runs it through validation before commit is allowed.
pub trait DefaultsSource {
    fn fetch_disks(&mut self, node_id: u32) -> Result<Vec<Disk>, SyncFailure>;
    fn fetch_interfaces(&mut self, node_id: u32) -> Result<Vec<Interface>, SyncFailure>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Loading,
    Ready,
    Committing,
}

/// Completion guard for split asynchronous operations. A ticket issued
/// by a begin_* call is honored only while the session generation it
/// captured is current; teardown and every settled operation advance
/// the generation, so superseded completions are discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpTicket {
    generation: u64,
}

#[derive(Debug)]
pub enum CommitStart {
    Started {
        ticket: OpTicket,
        payload: NodeSyncPayload,
    },
    RejectedInvalid,
    RejectedBusy,
    RejectedLocked,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitResult {
    Committed,
    Invalid,
    Busy,
    Locked,
    Failed(SyncFailure),
}

/// Outcome delivered to complete_commit. A backend that normalizes the
/// committed collection server-side hands the normalized copy back so
/// the rebased baseline reflects it.
#[derive(Debug)]
pub enum CommitOutcome<T> {
    Success { normalized: Option<T> },
    Failure(SyncFailure),
}

/// Configuration session for the disk/volume domain of one node.
///
/// Lifecycle: Loading → Ready ⇄ Committing. All mutation happens on one
/// logical thread; overlapping async completions are ordering hazards
/// handled by [`OpTicket`] guards, not data races.
pub struct DiskSession {
    session_id: Uuid,
    node: Node,
    deploy_running: bool,
    phase: SessionPhase,
    disks: Vec<DiskAllocation>,
    baseline: Option<Baseline>,
    generation: u64,
    torn_down: bool,
    last_commit_at: Option<String>,
}

impl DiskSession {
    pub fn new(node: Node, deploy_running: bool) -> (Self, OpTicket) {
        let session = Self {
            session_id: Uuid::new_v4(),
            node,
            deploy_running,
            phase: SessionPhase::Loading,
            disks: Vec::new(),
            baseline: None,
            generation: 0,
            torn_down: false,
            last_commit_at: None,
        };
        let ticket = session.ticket();
        (session, ticket)
    }

    fn ticket(&self) -> OpTicket {
        OpTicket {
            generation: self.generation,
        }
    }

    fn stale(&self, ticket: OpTicket) -> bool {
        self.torn_down || ticket.generation != self.generation
    }

    fn editable(&self) -> bool {
        self.phase == SessionPhase::Ready && !self.torn_down && !self.locked()
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn disks(&self) -> &[DiskAllocation] {
        &self.disks
    }

    pub fn locked(&self) -> bool {
        is_locked(Domain::Disks, &self.node, self.deploy_running)
    }

    pub fn is_dirty(&self) -> bool {
        self.baseline
            .as_ref()
            .map(|baseline| baseline.is_dirty(&self.disks))
            .unwrap_or(false)
    }

    pub fn has_errors(&self) -> bool {
        has_validation_errors(&self.disks)
    }

    pub fn controls_enabled(&self) -> bool {
        self.phase == SessionPhase::Ready
            && !self.locked()
            && (self.is_dirty() || self.has_errors())
    }

    pub fn last_commit_at(&self) -> Option<&str> {
        self.last_commit_at.as_deref()
    }

    /// Installs the initially fetched allocation, validates it, and
    /// captures the baseline. A stale ticket (torn-down session) leaves
    /// the session untouched.
    pub fn complete_load(&mut self, ticket: OpTicket, disks: Vec<Disk>) -> bool {
        if self.stale(ticket) || self.phase != SessionPhase::Loading {
            debug!(session = %self.session_id, "discarding stale load completion");
            return false;
        }
        self.disks = disks.into_iter().map(DiskAllocation::new).collect();
        for alloc in &mut self.disks {
            alloc.validate();
        }
        let Ok(baseline) = Baseline::capture(&self.disks) else {
            warn!(session = %self.session_id, "failed to capture disk baseline");
            return false;
        };
        self.baseline = Some(baseline);
        self.generation += 1;
        self.phase = SessionPhase::Ready;
        info!(session = %self.session_id, node = self.node.id, "disk session ready");
        true
    }

    /// Per-volume edit. Refused silently while not editable (locked,
    /// loading, or committing); the whole-disk capacity check reruns
    /// after every accepted or rejected edit.
    pub fn set_volume_size(
        &mut self,
        disk_id: &str,
        volume: &str,
        candidate: i64,
        minimum: u64,
    ) -> bool {
        if !self.editable() {
            return false;
        }
        let Some(alloc) = self.disks.iter_mut().find(|a| a.disk.id == disk_id) else {
            debug_assert!(false, "unknown disk {disk_id}");
            return false;
        };
        let accepted = alloc.set_volume_size(volume, candidate, minimum);
        alloc.validate();
        accepted
    }

    /// Text-input edit path; malformed text marks the volume invalid.
    pub fn apply_size_text(
        &mut self,
        disk_id: &str,
        volume: &str,
        text: &str,
        minimum: u64,
    ) -> bool {
        if !self.editable() {
            return false;
        }
        let Some(alloc) = self.disks.iter_mut().find(|a| a.disk.id == disk_id) else {
            debug_assert!(false, "unknown disk {disk_id}");
            return false;
        };
        let accepted = alloc.apply_size_text(volume, text, minimum);
        alloc.validate();
        accepted
    }

    pub fn grow_volume_to_fill(&mut self, disk_id: &str, volume: &str, minimum: u64) -> bool {
        if !self.editable() {
            return false;
        }
        let Some(alloc) = self.disks.iter_mut().find(|a| a.disk.id == disk_id) else {
            debug_assert!(false, "unknown disk {disk_id}");
            return false;
        };
        alloc.grow_volume_to_fill(volume, minimum)
    }

    /// Restores live state from the baseline. No network call; calling
    /// it twice in a row is indistinguishable from calling it once.
    pub fn revert_changes(&mut self) {
        if !self.editable() {
            return;
        }
        let Some(baseline) = &self.baseline else {
            return;
        };
        match baseline.restore::<Vec<DiskAllocation>>() {
            Ok(mut disks) => {
                for alloc in &mut disks {
                    alloc.validate();
                }
                self.disks = disks;
            }
            Err(err) => warn!(session = %self.session_id, %err, "revert failed"),
        }
    }

    /// Starts a defaults fetch. The returned ticket must be handed back
    /// to [`DiskSession::complete_load_defaults`] with the result.
    pub fn begin_load_defaults(&mut self) -> Option<OpTicket> {
        if !self.editable() {
            return None;
        }
        Some(self.ticket())
    }

    /// Wholesale replacement with the fetched defaults. Dirty state is
    /// recomputed against the existing baseline; loading defaults does
    /// not rebase, so the operator still commits or reverts explicitly.
    pub fn complete_load_defaults(
        &mut self,
        ticket: OpTicket,
        result: Result<Vec<Disk>, SyncFailure>,
    ) -> Option<SyncFailure> {
        if self.stale(ticket) || self.phase != SessionPhase::Ready {
            debug!(session = %self.session_id, "discarding stale defaults completion");
            return None;
        }
        // Settled, so later completions against older tickets are stale.
        self.generation += 1;
        match result {
            Ok(disks) => {
                self.disks = disks.into_iter().map(DiskAllocation::new).collect();
                for alloc in &mut self.disks {
                    alloc.validate();
                }
                None
            }
            Err(failure) => {
                warn!(session = %self.session_id, %failure, "defaults fetch failed");
                Some(failure)
            }
        }
    }

    /// Starts a commit. Pre-rejected when validation errors exist, the
    /// domain is locked, or a commit is already in flight; the last is
    /// a programming-contract violation (controls are disabled then).
    pub fn begin_commit(&mut self) -> CommitStart {
        if self.phase == SessionPhase::Committing {
            debug_assert!(false, "commit while committing");
            warn!(session = %self.session_id, "rejected commit while committing");
            return CommitStart::RejectedBusy;
        }
        if self.phase != SessionPhase::Ready || self.torn_down {
            return CommitStart::RejectedBusy;
        }
        if self.locked() {
            return CommitStart::RejectedLocked;
        }
        if self.has_errors() {
            return CommitStart::RejectedInvalid;
        }
        self.phase = SessionPhase::Committing;
        let mut payload = NodeSyncPayload::for_node(&self.node);
        payload.volumes = Some(self.disks.iter().map(|a| a.disk.clone()).collect());
        info!(session = %self.session_id, node = self.node.id, "disk commit started");
        CommitStart::Started {
            ticket: self.ticket(),
            payload,
        }
    }

    /// Settles an in-flight commit. Success installs any server-side
    /// normalization and rebases the baseline from the just-committed
    /// live state; failure keeps edits and baseline intact for retry.
    pub fn complete_commit(
        &mut self,
        ticket: OpTicket,
        outcome: CommitOutcome<Vec<Disk>>,
    ) -> Option<SyncFailure> {
        if self.stale(ticket) || self.phase != SessionPhase::Committing {
            debug!(session = %self.session_id, "discarding stale commit completion");
            return None;
        }
        self.generation += 1;
        self.phase = SessionPhase::Ready;
        match outcome {
            CommitOutcome::Success { normalized } => {
                if let Some(disks) = normalized {
                    self.disks = disks.into_iter().map(DiskAllocation::new).collect();
                    for alloc in &mut self.disks {
                        alloc.validate();
                    }
                }
                match Baseline::capture(&self.disks) {
                    Ok(baseline) => self.baseline = Some(baseline),
                    Err(err) => {
                        warn!(session = %self.session_id, %err, "baseline rebase failed")
                    }
                }
                self.last_commit_at = Some(now_utc_rfc3339());
                info!(session = %self.session_id, node = self.node.id, "disk commit applied");
                None
            }
            CommitOutcome::Failure(failure) => {
                warn!(session = %self.session_id, %failure, "disk commit failed");
                Some(failure)
            }
        }
    }

    /// Advisory status refresh from the polling feed. Updates the lock
    /// inputs only; never re-enables controls mid-commit and never
    /// interrupts an in-flight operation.
    pub fn observe_status(&mut self, node: Node, deploy_running: bool) {
        self.node = node;
        self.deploy_running = deploy_running;
    }

    /// Abandons the session. Pending completions become stale and will
    /// be discarded instead of mutating torn-down state.
    pub fn teardown(&mut self) {
        self.torn_down = true;
        self.generation += 1;
    }

    /// Synchronous driver over the split commit API.
    pub fn commit(&mut self, backend: &mut dyn SyncBackend) -> CommitResult {
        match self.begin_commit() {
            CommitStart::Started { ticket, payload } => {
                let outcome = match backend.save(&payload) {
                    Ok(()) => CommitOutcome::Success { normalized: None },
                    Err(failure) => CommitOutcome::Failure(failure),
                };
                match self.complete_commit(ticket, outcome) {
                    None => CommitResult::Committed,
                    Some(failure) => CommitResult::Failed(failure),
                }
            }
            CommitStart::RejectedInvalid => CommitResult::Invalid,
            CommitStart::RejectedBusy => CommitResult::Busy,
            CommitStart::RejectedLocked => CommitResult::Locked,
        }
    }

    /// Synchronous driver over the split defaults API.
    pub fn load_defaults(&mut self, source: &mut dyn DefaultsSource) -> Option<SyncFailure> {
        let Some(ticket) = self.begin_load_defaults() else {
            return None;
        };
        let result = source.fetch_disks(self.node.id);
        self.complete_load_defaults(ticket, result)
    }
}

/// Configuration session for the interface/network domain of one node.
/// Independent of any disk session for the same node; the only shared
/// read is the node status consulted by the lock policy.
pub struct InterfaceSession {
    session_id: Uuid,
    node: Node,
    deploy_running: bool,
    phase: SessionPhase,
    interfaces: InterfaceSet,
    baseline: Option<Baseline>,
    generation: u64,
    torn_down: bool,
    last_commit_at: Option<String>,
}

impl InterfaceSession {
    pub fn new(node: Node, deploy_running: bool) -> (Self, OpTicket) {
        let session = Self {
            session_id: Uuid::new_v4(),
            node,
            deploy_running,
            phase: SessionPhase::Loading,
            interfaces: InterfaceSet::new(Vec::new()),
            baseline: None,
            generation: 0,
            torn_down: false,
            last_commit_at: None,
        };
        let ticket = session.ticket();
        (session, ticket)
    }

    fn ticket(&self) -> OpTicket {
        OpTicket {
            generation: self.generation,
        }
    }

    fn stale(&self, ticket: OpTicket) -> bool {
        self.torn_down || ticket.generation != self.generation
    }

    fn editable(&self) -> bool {
        self.phase == SessionPhase::Ready && !self.torn_down && !self.locked()
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn interfaces(&self) -> &InterfaceSet {
        &self.interfaces
    }

    pub fn locked(&self) -> bool {
        is_locked(Domain::Interfaces, &self.node, self.deploy_running)
    }

    pub fn is_dirty(&self) -> bool {
        self.baseline
            .as_ref()
            .map(|baseline| baseline.is_dirty(&self.interfaces))
            .unwrap_or(false)
    }

    pub fn controls_enabled(&self) -> bool {
        self.phase == SessionPhase::Ready && !self.locked() && self.is_dirty()
    }

    pub fn last_commit_at(&self) -> Option<&str> {
        self.last_commit_at.as_deref()
    }

    pub fn complete_load(&mut self, ticket: OpTicket, mut interfaces: Vec<Interface>) -> bool {
        if self.stale(ticket) || self.phase != SessionPhase::Loading {
            debug!(session = %self.session_id, "discarding stale load completion");
            return false;
        }
        for iface in &mut interfaces {
            iface.clean_speeds();
        }
        self.interfaces = InterfaceSet::new(interfaces);
        let Ok(baseline) = Baseline::capture(&self.interfaces) else {
            warn!(session = %self.session_id, "failed to capture interface baseline");
            return false;
        };
        self.baseline = Some(baseline);
        self.generation += 1;
        self.phase = SessionPhase::Ready;
        info!(session = %self.session_id, node = self.node.id, "interface session ready");
        true
    }

    /// Picks up networks from an interface, staging them for a drop.
    /// Silently refused while not editable; at most one move may be
    /// staged.
    pub fn begin_move(&mut self, source: u32, names: &[&str]) -> bool {
        if !self.editable() {
            return false;
        }
        self.interfaces.begin_move(source, names).is_ok()
    }

    /// Settles a staged move. Deliberately not gated on the lock: a
    /// gesture that began while unlocked must still land or restore
    /// even if the node locked mid-drag, so no network is orphaned.
    pub fn end_move(&mut self, target: Option<u32>) -> bool {
        if !self.interfaces.move_in_progress() {
            debug_assert!(false, "end_move without a staged move");
            return false;
        }
        self.interfaces.end_move(target).is_ok()
    }

    pub fn revert_changes(&mut self) {
        if !self.editable() || self.interfaces.move_in_progress() {
            return;
        }
        let Some(baseline) = &self.baseline else {
            return;
        };
        match baseline.restore::<InterfaceSet>() {
            Ok(interfaces) => self.interfaces = interfaces,
            Err(err) => warn!(session = %self.session_id, %err, "revert failed"),
        }
    }

    pub fn begin_load_defaults(&mut self) -> Option<OpTicket> {
        if !self.editable() {
            return None;
        }
        Some(self.ticket())
    }

    pub fn complete_load_defaults(
        &mut self,
        ticket: OpTicket,
        result: Result<Vec<Interface>, SyncFailure>,
    ) -> Option<SyncFailure> {
        if self.stale(ticket) || self.phase != SessionPhase::Ready {
            debug!(session = %self.session_id, "discarding stale defaults completion");
            return None;
        }
        // Settled, so later completions against older tickets are stale.
        self.generation += 1;
        match result {
            Ok(mut interfaces) => {
                for iface in &mut interfaces {
                    iface.clean_speeds();
                }
                self.interfaces = InterfaceSet::new(interfaces);
                None
            }
            Err(failure) => {
                warn!(session = %self.session_id, %failure, "defaults fetch failed");
                Some(failure)
            }
        }
    }

    pub fn begin_commit(&mut self) -> CommitStart {
        if self.phase == SessionPhase::Committing {
            debug_assert!(false, "commit while committing");
            warn!(session = %self.session_id, "rejected commit while committing");
            return CommitStart::RejectedBusy;
        }
        if self.phase != SessionPhase::Ready || self.torn_down {
            return CommitStart::RejectedBusy;
        }
        if self.interfaces.move_in_progress() {
            warn!(session = %self.session_id, "rejected commit during staged move");
            return CommitStart::RejectedBusy;
        }
        if self.locked() {
            return CommitStart::RejectedLocked;
        }
        self.phase = SessionPhase::Committing;
        let mut payload = NodeSyncPayload::for_node(&self.node);
        payload.interfaces = Some(self.interfaces.interfaces.clone());
        info!(session = %self.session_id, node = self.node.id, "interface commit started");
        CommitStart::Started {
            ticket: self.ticket(),
            payload,
        }
    }

    pub fn complete_commit(
        &mut self,
        ticket: OpTicket,
        outcome: CommitOutcome<Vec<Interface>>,
    ) -> Option<SyncFailure> {
        if self.stale(ticket) || self.phase != SessionPhase::Committing {
            debug!(session = %self.session_id, "discarding stale commit completion");
            return None;
        }
        self.generation += 1;
        self.phase = SessionPhase::Ready;
        match outcome {
            CommitOutcome::Success { normalized } => {
                if let Some(mut interfaces) = normalized {
                    for iface in &mut interfaces {
                        iface.clean_speeds();
                    }
                    self.interfaces = InterfaceSet::new(interfaces);
                }
                match Baseline::capture(&self.interfaces) {
                    Ok(baseline) => self.baseline = Some(baseline),
                    Err(err) => {
                        warn!(session = %self.session_id, %err, "baseline rebase failed")
                    }
                }
                self.last_commit_at = Some(now_utc_rfc3339());
                info!(session = %self.session_id, node = self.node.id, "interface commit applied");
                None
            }
            CommitOutcome::Failure(failure) => {
                warn!(session = %self.session_id, %failure, "interface commit failed");
                Some(failure)
            }
        }
    }

    pub fn observe_status(&mut self, node: Node, deploy_running: bool) {
        self.node = node;
        self.deploy_running = deploy_running;
    }

    pub fn teardown(&mut self) {
        self.torn_down = true;
        self.generation += 1;
    }

    pub fn commit(&mut self, backend: &mut dyn SyncBackend) -> CommitResult {
        match self.begin_commit() {
            CommitStart::Started { ticket, payload } => {
                let outcome = match backend.save(&payload) {
                    Ok(()) => CommitOutcome::Success { normalized: None },
                    Err(failure) => CommitOutcome::Failure(failure),
                };
                match self.complete_commit(ticket, outcome) {
                    None => CommitResult::Committed,
                    Some(failure) => CommitResult::Failed(failure),
                }
            }
            CommitStart::RejectedInvalid => CommitResult::Invalid,
            CommitStart::RejectedBusy => CommitResult::Busy,
            CommitStart::RejectedLocked => CommitResult::Locked,
        }
    }

    pub fn load_defaults(&mut self, source: &mut dyn DefaultsSource) -> Option<SyncFailure> {
        let Some(ticket) = self.begin_load_defaults() else {
            return None;
        };
        let result = source.fetch_interfaces(self.node.id);
        self.complete_load_defaults(ticket, result)
    }
}
