//! The live-peer map.
//!
//! The [`PeerManager`] holds one entry per group member we still consider
//! alive, each with the sending half of that member's bounded outbound queue.
//! It is the single source of truth for "who is in the group right now": the
//! B-layer consults it to fan out, the TO-layer to size its quorum and to
//! decide whether a hold-queue head belongs to a crashed process.
//!
//! Entries are only ever removed, never re-added: a peer whose connector
//! exits is out of the group for the rest of the process lifetime. Every
//! change is published on a `watch` channel as a [`Membership`] snapshot.

use {
    crate::{
        config::{Node, NodeId},
        error::{MulticastError, Result},
    },
    log::{debug, info},
    std::{collections::HashMap, sync::Arc},
    tokio::sync::{mpsc, watch},
};

/// A frame ready to be written to a socket, shared between all peer queues
/// of one multicast.
pub type Frame = Arc<str>;

/// Snapshot of the group published on every membership change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Membership {
    /// Members still in the live-peer map (self included).
    pub live: usize,
    /// Live members whose connector has completed its handshake.
    pub connected: usize,
}

impl Membership {
    /// Every live peer has a working outbound link.
    pub fn is_meshed(&self) -> bool {
        self.connected == self.live
    }
}

/// Per-peer connection bookkeeping.
#[derive(Debug)]
pub struct PeerConnection {
    /// Static identity and network address.
    pub node: Node,
    /// Sending half of the peer's bounded outbound queue.
    queue: mpsc::Sender<Frame>,
    /// Whether the connector has dialed and sent its handshake.
    pub is_connected: bool,
    /// Counter: frames we have enqueued for this peer.
    pub messages_sent: u64,
    /// Counter: bytes we have enqueued for this peer (excluding newlines).
    pub bytes_sent: u64,
}

impl PeerConnection {
    fn record_sent(&mut self, frame: &Frame) {
        self.messages_sent = self.messages_sent.saturating_add(1);
        self.bytes_sent = self.bytes_sent.saturating_add(frame.len() as u64);
    }
}

/// Manages the set of live peers.
///
/// Thread-safety note: `PeerManager` is designed to be used behind an
/// `Arc<Mutex<_>>`. Queue handles are cloned out under the lock and awaited
/// on outside it, so a blocked enqueue never holds up an ejection.
#[derive(Debug)]
pub struct PeerManager {
    peers: HashMap<NodeId, PeerConnection>,
    membership_tx: watch::Sender<Membership>,
}

impl Default for PeerManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerManager {
    /// Create a new, empty peer manager.
    pub fn new() -> Self {
        let (membership_tx, _) = watch::channel(Membership::default());
        Self {
            peers: HashMap::new(),
            membership_tx,
        }
    }

    // ── Peer lifecycle ──────────────────────────────────────────────────

    /// Register a group member and create its outbound queue.
    ///
    /// Returns the receiving half, to be drained by the member's connector.
    /// Registering an id twice replaces the earlier queue.
    pub fn add_peer(&mut self, node: Node, queue_size: usize) -> mpsc::Receiver<Frame> {
        let (queue, rx) = mpsc::channel(queue_size.max(1));
        debug!("adding peer {} ({})", node.id, node.addr);
        self.peers.insert(
            node.id.clone(),
            PeerConnection {
                node,
                queue,
                is_connected: false,
                messages_sent: 0,
                bytes_sent: 0,
            },
        );
        self.publish();
        rx
    }

    /// Eject a peer from the group.
    ///
    /// Returns the removed entry the first time, `None` on every later call.
    pub fn remove_peer(&mut self, id: &str) -> Option<PeerConnection> {
        let removed = self.peers.remove(id)?;
        info!(
            "eject node [{}] from group ({} frames / {} bytes sent), {} live",
            id,
            removed.messages_sent,
            removed.bytes_sent,
            self.peers.len()
        );
        self.publish();
        Some(removed)
    }

    /// Mark a peer's outbound link as established.
    pub fn mark_connected(&mut self, id: &str) -> Result<()> {
        let conn = self
            .peers
            .get_mut(id)
            .ok_or_else(|| MulticastError::UnknownPeer(id.to_string()))?;
        conn.is_connected = true;
        self.publish();
        Ok(())
    }

    // ── Queries ─────────────────────────────────────────────────────────

    /// Number of live members, self included. This is the TO quorum.
    pub fn live_count(&self) -> usize {
        self.peers.len()
    }

    pub fn is_live(&self, id: &str) -> bool {
        self.peers.contains_key(id)
    }

    /// Ids of all live members, sorted.
    pub fn live_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.peers.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn get_peer(&self, id: &str) -> Option<&PeerConnection> {
        self.peers.get(id)
    }

    /// Whether `voters` covers every live member.
    pub fn all_live_in<V>(&self, voters: &HashMap<NodeId, V>) -> bool {
        self.peers.keys().all(|id| voters.contains_key(id))
    }

    pub fn membership(&self) -> Membership {
        Membership {
            live: self.peers.len(),
            connected: self.peers.values().filter(|p| p.is_connected).count(),
        }
    }

    /// Subscribe to membership changes.
    pub fn subscribe(&self) -> watch::Receiver<Membership> {
        self.membership_tx.subscribe()
    }

    // ── Enqueue ─────────────────────────────────────────────────────────

    /// Queue handle for one peer; counts `frame` as sent to it.
    pub fn queue_for(&mut self, id: &str, frame: &Frame) -> Result<mpsc::Sender<Frame>> {
        let conn = self
            .peers
            .get_mut(id)
            .ok_or_else(|| MulticastError::UnknownPeer(id.to_string()))?;
        conn.record_sent(frame);
        Ok(conn.queue.clone())
    }

    /// Queue handles for every live peer; counts `frame` as sent to each.
    pub fn all_queues(&mut self, frame: &Frame) -> Vec<(NodeId, mpsc::Sender<Frame>)> {
        self.peers
            .iter_mut()
            .map(|(id, conn)| {
                conn.record_sent(frame);
                (id.clone(), conn.queue.clone())
            })
            .collect()
    }

    fn publish(&self) {
        self.membership_tx.send_replace(self.membership());
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
