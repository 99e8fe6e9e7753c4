//! Sequencing state for totally-ordered multicast.
//!
//! [`Sequencer`] is the per-node half of the three-phase agreement: it
//! answers asks with proposals, applies announced agreements and releases
//! the hold-back queue. [`ProposalVotes`] is the sender's half: it collects
//! replies until every live member has voted and picks the winner.
//!
//! Neither type does I/O; the TO-layer drives them under its own lock.

use {
    crate::{
        config::NodeId,
        envelope::{AnnounceAgreementSeq, AskProposalSeq, MessageId, ReplyProposalSeq},
        error::{MulticastError, Result},
        hold_queue::{HoldEntry, HoldQueue},
        peer_manager::PeerManager,
    },
    log::{debug, info},
    std::collections::HashMap,
};

/// A message this node has proposed a sequence number for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsgItem {
    /// Encoded TO-envelope.
    pub body: Vec<u8>,
    pub proposal_seq: u64,
    /// The node that asked; the entry is discarded if it leaves un-agreed.
    pub sender: NodeId,
    pub agreement_seq: u64,
    pub agreed: bool,
}

/// A message released from the hold-back queue, in final order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub msg_id: MessageId,
    pub seq: u64,
    pub process_id: NodeId,
    pub body: Vec<u8>,
}

#[derive(Debug)]
pub struct Sequencer {
    self_id: NodeId,
    /// Largest agreed sequence number seen group-wide. Never decreases.
    max_agreed: u64,
    /// Largest sequence number this node has proposed.
    max_proposed: u64,
    items: HashMap<MessageId, MsgItem>,
    hold: HoldQueue,
}

impl Sequencer {
    pub fn new(self_id: impl Into<NodeId>) -> Self {
        Self {
            self_id: self_id.into(),
            max_agreed: 0,
            max_proposed: 0,
            items: HashMap::new(),
            hold: HoldQueue::new(),
        }
    }

    pub fn max_agreed(&self) -> u64 {
        self.max_agreed
    }

    pub fn max_proposed(&self) -> u64 {
        self.max_proposed
    }

    /// Messages proposed for but not yet delivered or discarded.
    pub fn pending(&self) -> usize {
        self.hold.len()
    }

    pub fn item(&self, msg_id: &MessageId) -> Option<&MsgItem> {
        self.items.get(msg_id)
    }

    /// Phase 2: propose a sequence number for `ask` and hold the message.
    ///
    /// A repeated ask gets the proposal already made for it.
    pub fn on_ask(&mut self, ask: AskProposalSeq) -> ReplyProposalSeq {
        if let Some(item) = self.items.get(&ask.msg_id) {
            return ReplyProposalSeq {
                process_id: self.self_id.clone(),
                msg_id: ask.msg_id,
                proposal_seq: item.proposal_seq,
            };
        }

        let proposal = self.max_agreed.max(self.max_proposed).saturating_add(1);
        self.max_proposed = proposal;
        debug!(
            "propose {} for [{}] from [{}]",
            proposal, ask.msg_id, ask.src_id
        );

        self.hold
            .push(HoldEntry::proposed(proposal, ask.src_id.clone(), ask.msg_id));
        self.items.insert(
            ask.msg_id,
            MsgItem {
                body: ask.body,
                proposal_seq: proposal,
                sender: ask.src_id,
                agreement_seq: 0,
                agreed: false,
            },
        );

        ReplyProposalSeq {
            process_id: self.self_id.clone(),
            msg_id: ask.msg_id,
            proposal_seq: proposal,
        }
    }

    /// Phase 3: apply an announced agreement.
    ///
    /// The group-wide maximum is raised even when the message itself is
    /// unknown here (already delivered, or discarded with its sender).
    pub fn on_agreement(&mut self, announce: &AnnounceAgreementSeq) -> Result<()> {
        self.max_agreed = self.max_agreed.max(announce.agreement_seq);

        let item = self
            .items
            .get_mut(&announce.msg_id)
            .ok_or(MulticastError::UnknownMessage(announce.msg_id))?;
        item.agreement_seq = announce.agreement_seq;
        item.agreed = true;

        if !self.hold.update(
            &announce.msg_id,
            announce.agreement_seq,
            announce.process_id.clone(),
            true,
        ) {
            return Err(MulticastError::UnknownMessage(announce.msg_id));
        }
        Ok(())
    }

    /// Release every deliverable message from the head of the hold queue.
    ///
    /// An un-agreed head whose sender is no longer live is discarded. An
    /// un-agreed head whose sender is live stops the release.
    ///
    /// Only un-agreed heads are ever discarded. An agreed head is delivered
    /// even if its sender has left the group since: its sequence number is
    /// final, and members that released it before noticing the crash have
    /// already delivered it at that position.
    pub fn release(&mut self, is_live: impl Fn(&str) -> bool) -> Vec<Delivery> {
        let mut released = Vec::new();
        while let Some(head) = self.hold.peek() {
            let msg_id = head.msg_id;
            let Some(item) = self.items.get(&msg_id) else {
                // Entry without an item: nothing to deliver.
                self.hold.pop();
                continue;
            };

            if !item.agreed {
                if is_live(&item.sender) {
                    break;
                }
                info!(
                    "skip crashed process [{}] msg [{}]",
                    item.sender, msg_id
                );
                self.hold.pop();
                self.items.remove(&msg_id);
                continue;
            }

            let Some(entry) = self.hold.pop() else {
                break;
            };
            let Some(item) = self.items.remove(&msg_id) else {
                continue;
            };
            info!(
                "TO deliver [{}:{}][{}]",
                entry.seq, entry.process_id, entry.msg_id
            );
            released.push(Delivery {
                msg_id,
                seq: entry.seq,
                process_id: entry.process_id,
                body: item.body,
            });
        }
        released
    }
}

/// Proposals collected by the sender of one message.
#[derive(Debug)]
pub struct ProposalVotes {
    msg_id: MessageId,
    votes: HashMap<NodeId, u64>,
}

impl ProposalVotes {
    pub fn new(msg_id: MessageId) -> Self {
        Self {
            msg_id,
            votes: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.votes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.votes.is_empty()
    }

    /// Record one reply. A second reply from the same process replaces the
    /// first; replies for another message are ignored.
    pub fn record(&mut self, reply: ReplyProposalSeq) {
        if reply.msg_id != self.msg_id {
            return;
        }
        self.votes.insert(reply.process_id, reply.proposal_seq);
    }

    /// Every member still in the live-peer map has voted.
    pub fn is_complete(&self, peers: &PeerManager) -> bool {
        peers.all_live_in(&self.votes)
    }

    /// The largest proposal, ties broken by the larger process id.
    pub fn agreement(&self) -> Option<AnnounceAgreementSeq> {
        self.votes
            .iter()
            .max_by(|(pa, sa), (pb, sb)| sa.cmp(sb).then_with(|| pa.cmp(pb)))
            .map(|(process_id, &seq)| AnnounceAgreementSeq {
                process_id: process_id.clone(),
                msg_id: self.msg_id,
                agreement_seq: seq,
            })
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
