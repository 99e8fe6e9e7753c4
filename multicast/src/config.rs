//! Configuration for the multicast group.

use {
    serde::{Deserialize, Serialize},
    std::{net::SocketAddr, time::Duration},
};

/// Identifier of a group member, as written in the node table.
pub type NodeId = String;

/// A static group member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Member identity.
    pub id: NodeId,
    /// Address the member's listener accepts connections on.
    pub addr: SocketAddr,
}

impl Node {
    pub fn new(id: impl Into<NodeId>, addr: SocketAddr) -> Self {
        Self {
            id: id.into(),
            addr,
        }
    }
}

/// Configuration for one member of a multicast group.
///
/// Controls who we dial, how persistently, and how much we buffer per link.
#[derive(Debug, Clone)]
pub struct GroupConfig {
    /// Our own identity; sent as the handshake on every outbound link.
    pub self_id: NodeId,

    /// Local address to bind the listener on.
    /// Default: `0.0.0.0:8900`
    pub bind_addr: SocketAddr,

    /// The configured group members. Self may or may not be listed;
    /// see [`GroupConfig::membership`].
    pub members: Vec<Node>,

    /// Delay between two dial attempts to the same peer (ms).
    pub dial_retry_interval_ms: u64,

    /// Upper bound on a single dial attempt (ms).
    pub dial_timeout_ms: u64,

    /// Give up on a peer after this many failed dials.
    /// `None` retries forever.
    pub max_dial_attempts: Option<u32>,

    /// Capacity of each peer's outbound queue. Enqueuing into a full queue
    /// blocks the caller.
    pub outbound_queue_size: usize,

    /// Capacity of the queue between inbound readers and the dispatcher.
    pub inbound_queue_size: usize,

    /// Maximum length of a single newline-delimited frame in bytes.
    pub max_line_length: usize,
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            self_id: NodeId::new(),
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8900)),
            members: Vec::new(),
            dial_retry_interval_ms: 5_000,
            dial_timeout_ms: 10_000,
            max_dial_attempts: None,
            outbound_queue_size: 1_000,
            inbound_queue_size: 1_000,
            max_line_length: 1_048_576, // 1 MB
        }
    }
}

impl GroupConfig {
    /// Create a config for `self_id` listening on `bind_addr` with default timers.
    pub fn new(self_id: impl Into<NodeId>, bind_addr: SocketAddr, members: Vec<Node>) -> Self {
        Self {
            self_id: self_id.into(),
            bind_addr,
            members,
            ..Self::default()
        }
    }

    /// Create a config suitable for local testing with shorter timeouts.
    #[cfg(any(test, feature = "dev-context-only-utils"))]
    pub fn dev_default(self_id: impl Into<NodeId>, bind_addr: SocketAddr, members: Vec<Node>) -> Self {
        Self {
            self_id: self_id.into(),
            bind_addr,
            members,
            dial_retry_interval_ms: 50,
            dial_timeout_ms: 1_000,
            max_dial_attempts: Some(100),
            outbound_queue_size: 64,
            inbound_queue_size: 64,
            max_line_length: 65_536,
        }
    }

    pub fn dial_retry_interval(&self) -> Duration {
        Duration::from_millis(self.dial_retry_interval_ms)
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms)
    }

    /// The full group: the configured members plus self, deduplicated by id.
    ///
    /// Self is always part of the mesh so that our own multicasts travel the
    /// same path as everyone else's.
    pub fn membership(&self) -> Vec<Node> {
        let mut nodes: Vec<Node> = Vec::with_capacity(self.members.len().saturating_add(1));
        for node in &self.members {
            if !nodes.iter().any(|n| n.id == node.id) {
                nodes.push(node.clone());
            }
        }
        if !nodes.iter().any(|n| n.id == self.self_id) {
            nodes.push(Node::new(self.self_id.clone(), self.bind_addr));
        }
        nodes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn test_default_config() {
        let cfg = GroupConfig::default();
        assert_eq!(cfg.dial_retry_interval(), Duration::from_secs(5));
        assert_eq!(cfg.dial_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.max_dial_attempts, None);
        assert_eq!(cfg.outbound_queue_size, 1_000);
    }

    #[test]
    fn test_membership_adds_self() {
        let cfg = GroupConfig::new("a", addr(9001), vec![Node::new("b", addr(9002))]);
        let ids: Vec<_> = cfg.membership().into_iter().map(|n| n.id).collect();
        assert_eq!(ids, vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn test_membership_dedups() {
        let cfg = GroupConfig::new(
            "a",
            addr(9001),
            vec![
                Node::new("a", addr(9001)),
                Node::new("b", addr(9002)),
                Node::new("b", addr(9003)),
            ],
        );
        let members = cfg.membership();
        assert_eq!(members.len(), 2);
        assert_eq!(members[1].addr, addr(9002));
    }
}
