use rackforge_core::{Domain, Node, NodeErrorType, NodeStatus};

/// Whether a resource domain may be mutated for this node right now.
/// Derived on every call from the node lifecycle plus the explicit
/// deploy-running signal; never cached, since status changes arrive
/// asynchronously while a session is open.
pub fn is_locked(domain: Domain, node: &Node, deploy_running: bool) -> bool {
    if deploy_running {
        return true;
    }
    let unlocked = match domain {
        Domain::Disks => {
            node.pending_addition
                || (node.status == NodeStatus::Error
                    && node.error_type == Some(NodeErrorType::Provision))
        }
        Domain::Interfaces => node.pending_addition || node.status == NodeStatus::Error,
    };
    !unlocked
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(status: NodeStatus, error_type: Option<NodeErrorType>, pending: bool) -> Node {
        Node {
            id: 1,
            cluster_id: Some(1),
            name: None,
            mac: "aa:bb:cc:dd:ee:01".to_string(),
            status,
            error_type,
            pending_addition: pending,
            pending_deletion: false,
            online: true,
            role: None,
        }
    }

    #[test]
    fn pending_addition_unlocks_both_domains() {
        let node = node(NodeStatus::Discover, None, true);
        assert!(!is_locked(Domain::Disks, &node, false));
        assert!(!is_locked(Domain::Interfaces, &node, false));
    }

    #[test]
    fn ready_node_is_locked() {
        let node = node(NodeStatus::Ready, None, false);
        assert!(is_locked(Domain::Disks, &node, false));
        assert!(is_locked(Domain::Interfaces, &node, false));
    }

    #[test]
    fn provision_error_unlocks_both_domains() {
        let node = node(NodeStatus::Error, Some(NodeErrorType::Provision), false);
        assert!(!is_locked(Domain::Disks, &node, false));
        assert!(!is_locked(Domain::Interfaces, &node, false));
    }

    #[test]
    fn deploy_error_unlocks_interfaces_only() {
        let node = node(NodeStatus::Error, Some(NodeErrorType::Deploy), false);
        assert!(is_locked(Domain::Disks, &node, false));
        assert!(!is_locked(Domain::Interfaces, &node, false));
    }

    #[test]
    fn running_deploy_locks_regardless_of_state() {
        let unlocked = node(NodeStatus::Error, Some(NodeErrorType::Provision), true);
        assert!(is_locked(Domain::Disks, &unlocked, true));
        assert!(is_locked(Domain::Interfaces, &unlocked, true));
    }

    #[test]
    fn all_other_statuses_lock() {
        for status in [
            NodeStatus::Discover,
            NodeStatus::Provisioning,
            NodeStatus::Provisioned,
            NodeStatus::Deploying,
            NodeStatus::Ready,
        ] {
            let node = node(status, None, false);
            assert!(is_locked(Domain::Disks, &node, false), "{status:?}");
            assert!(is_locked(Domain::Interfaces, &node, false), "{status:?}");
        }
    }
}
