//! Totally-ordered multicast: the TO-layer.
//!
//! Three phases per message:
//!
//! 1. The sender R-multicasts an ask carrying the message.
//! 2. Every member proposes a sequence number, holds the message, and
//!    B-unicasts its proposal back to the sender.
//! 3. Once every live member has replied, the sender R-multicasts the
//!    largest proposal as the agreed number.
//!
//! Each member releases its hold-back queue after every agreement, every
//! ask and every membership change, and hands released messages to the
//! TO dispatcher in a single delivery task.

use {
    crate::{
        config::GroupConfig,
        dispatcher::Dispatcher,
        envelope::{
            new_message_id, AnnounceAgreementSeq, AskProposalSeq, BEnvelope, ControlPath,
            JsonFrame, MessageId, REnvelope, ReplyProposalSeq, TOEnvelope,
        },
        error::{MulticastError, Result},
        reliable::ReliableMulticast,
        sequencer::{Delivery, ProposalVotes, Sequencer},
        transport::BasicMulticast,
    },
    log::{debug, error, warn},
    std::{
        collections::HashMap,
        net::SocketAddr,
        sync::{Arc, Mutex, MutexGuard, PoisonError},
    },
    tokio::{net::TcpListener, sync::mpsc},
};

/// Dispatcher type for totally-ordered application messages.
pub type TODispatcher = Dispatcher<String, TOEnvelope>;

type VoteSender = mpsc::UnboundedSender<ReplyProposalSeq>;

/// ISIS-style totally-ordered multicast on top of the R- and B-layers.
pub struct TotalOrderMulticast {
    basic: Arc<BasicMulticast>,
    reliable: Arc<ReliableMulticast>,
    sequencer: Mutex<Sequencer>,
    /// Vote channels of the messages this node is collecting proposals for.
    pending_votes: Mutex<HashMap<MessageId, VoteSender>>,
    deliver_tx: mpsc::UnboundedSender<Delivery>,
    deliver_rx: Mutex<Option<mpsc::UnboundedReceiver<Delivery>>>,
    dispatcher: Arc<TODispatcher>,
}

impl TotalOrderMulticast {
    /// Build the full B/R/TO stack for `config`.
    pub fn new(config: GroupConfig) -> Arc<Self> {
        let basic = BasicMulticast::new(config);
        let reliable = ReliableMulticast::new(basic);
        Self::with_reliable(reliable)
    }

    /// Layer TO on an existing R-layer (and the B-layer beneath it).
    pub fn with_reliable(reliable: Arc<ReliableMulticast>) -> Arc<Self> {
        let basic = reliable.basic().clone();
        let (deliver_tx, deliver_rx) = mpsc::unbounded_channel();
        let total = Arc::new(Self {
            sequencer: Mutex::new(Sequencer::new(basic.self_id())),
            basic,
            reliable,
            pending_votes: Mutex::new(HashMap::new()),
            deliver_tx,
            deliver_rx: Mutex::new(Some(deliver_rx)),
            dispatcher: Arc::new(Dispatcher::new("to-multicast")),
        });
        total.bind_handlers();
        total
    }

    fn bind_handlers(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.reliable
            .dispatcher()
            .bind(ControlPath::AskProposalSeq, move |env: REnvelope| {
                let weak = weak.clone();
                async move {
                    if let Some(total) = weak.upgrade() {
                        total.on_ask(env).await;
                    }
                }
            });

        let weak = Arc::downgrade(self);
        self.reliable
            .dispatcher()
            .bind(ControlPath::AnnounceAgreementSeq, move |env: REnvelope| {
                let weak = weak.clone();
                async move {
                    if let Some(total) = weak.upgrade() {
                        total.on_announce(env);
                    }
                }
            });

        let weak = Arc::downgrade(self);
        self.basic
            .dispatcher()
            .bind(ControlPath::ReplyProposalSeq, move |env: BEnvelope| {
                let weak = weak.clone();
                async move {
                    if let Some(total) = weak.upgrade() {
                        total.on_reply(env);
                    }
                }
            });
    }

    pub fn basic(&self) -> &Arc<BasicMulticast> {
        &self.basic
    }

    pub fn reliable(&self) -> &Arc<ReliableMulticast> {
        &self.reliable
    }

    /// Where totally-ordered messages are delivered, keyed by their path.
    pub fn dispatcher(&self) -> &Arc<TODispatcher> {
        &self.dispatcher
    }

    pub fn self_id(&self) -> &str {
        self.basic.self_id()
    }

    /// Largest agreed sequence number this node has seen.
    pub fn max_agreed(&self) -> u64 {
        self.sequencer().max_agreed()
    }

    /// Messages held back, waiting for agreement or for earlier messages.
    pub fn pending(&self) -> usize {
        self.sequencer().pending()
    }

    fn sequencer(&self) -> MutexGuard<'_, Sequencer> {
        self.sequencer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pending_votes(&self) -> MutexGuard<'_, HashMap<MessageId, VoteSender>> {
        self.pending_votes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    /// Start delivery and the B-layer on the configured address.
    pub async fn start(self: &Arc<Self>) -> Result<SocketAddr> {
        self.spawn_workers()?;
        self.basic.start().await
    }

    /// Start delivery and the B-layer on an already-bound listener.
    pub fn start_with_listener(self: &Arc<Self>, listener: TcpListener) -> Result<SocketAddr> {
        self.spawn_workers()?;
        self.basic.start_with_listener(listener)
    }

    pub async fn wait_for_mesh(&self) -> Result<()> {
        self.basic.wait_for_mesh().await
    }

    pub fn shutdown(&self) {
        self.basic.shutdown();
    }

    fn spawn_workers(self: &Arc<Self>) -> Result<()> {
        let deliver_rx = self
            .deliver_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(MulticastError::AlreadyStarted)?;
        tokio::spawn(self.clone().run_delivery(deliver_rx));
        tokio::spawn(self.clone().watch_membership());
        Ok(())
    }

    async fn run_delivery(self: Arc<Self>, mut deliver_rx: mpsc::UnboundedReceiver<Delivery>) {
        let cancel = self.basic.shutdown_token();
        loop {
            let delivery = tokio::select! {
                delivery = deliver_rx.recv() => delivery,
                _ = cancel.cancelled() => break,
            };
            let Some(delivery) = delivery else {
                break;
            };
            match TOEnvelope::decode(&delivery.body) {
                Ok(env) => {
                    debug!(
                        "node [{}] deliver [{}:{}][{}] on {}",
                        self.self_id(),
                        delivery.seq,
                        delivery.process_id,
                        delivery.msg_id,
                        env.path
                    );
                    self.dispatcher.route(env).await;
                }
                Err(e) => warn!("to-multicast: decode message {} failed: {}", delivery.msg_id, e),
            }
        }
    }

    /// Re-run the release loop whenever a member leaves, so a head held by
    /// a crashed sender does not wait for the next announce.
    async fn watch_membership(self: Arc<Self>) {
        let cancel = self.basic.shutdown_token();
        let mut membership = self.basic.subscribe_membership();
        loop {
            tokio::select! {
                changed = membership.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    self.release();
                }
                _ = cancel.cancelled() => break,
            }
        }
    }

    // ── Sending ─────────────────────────────────────────────────────────

    /// Totally-ordered multicast of `body` under `path`.
    ///
    /// Returns once the ask has been handed to the R-layer; agreement and
    /// delivery happen in the background.
    pub async fn multicast(self: &Arc<Self>, path: &str, body: Vec<u8>) -> Result<MessageId> {
        let ask = AskProposalSeq {
            src_id: self.self_id().to_string(),
            msg_id: new_message_id(),
            body: TOEnvelope::new(path, body).encode()?,
        };
        let msg_id = ask.msg_id;
        let ask_bytes = ask.encode()?;

        let (vote_tx, vote_rx) = mpsc::unbounded_channel();
        self.pending_votes().insert(msg_id, vote_tx);
        tokio::spawn(self.clone().collect_votes(msg_id, vote_rx));

        if let Err(e) = self
            .reliable
            .multicast(ControlPath::AskProposalSeq, ask_bytes)
            .await
        {
            self.pending_votes().remove(&msg_id);
            return Err(e);
        }
        Ok(msg_id)
    }

    /// Wait for a proposal from every live member, then announce the winner.
    async fn collect_votes(
        self: Arc<Self>,
        msg_id: MessageId,
        mut vote_rx: mpsc::UnboundedReceiver<ReplyProposalSeq>,
    ) {
        let cancel = self.basic.shutdown_token();
        let mut membership = self.basic.subscribe_membership();
        let mut votes = ProposalVotes::new(msg_id);
        loop {
            tokio::select! {
                vote = vote_rx.recv() => match vote {
                    Some(vote) => votes.record(vote),
                    None => return,
                },
                changed = membership.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
                _ = cancel.cancelled() => return,
            }
            // Live-peer lock held only for the check, so an ejection is
            // either fully seen or not at all.
            let complete = votes.is_complete(&self.basic.peers());
            if complete && !votes.is_empty() {
                break;
            }
        }
        self.pending_votes().remove(&msg_id);

        let Some(announce) = votes.agreement() else {
            return;
        };
        debug!(
            "node [{}] agreed {} for [{}] ({} votes)",
            self.self_id(),
            announce.agreement_seq,
            msg_id,
            votes.len()
        );
        let sent = match announce.encode() {
            Ok(bytes) => {
                self.reliable
                    .multicast(ControlPath::AnnounceAgreementSeq, bytes)
                    .await
            }
            Err(e) => Err(e),
        };
        if let Err(e) = sent {
            error!("to-multicast: announce for [{}] failed: {}", msg_id, e);
        }
    }

    // ── Handlers ────────────────────────────────────────────────────────

    async fn on_ask(&self, env: REnvelope) {
        let ask = match AskProposalSeq::decode(&env.body) {
            Ok(ask) => ask,
            Err(e) => {
                warn!("to-multicast: decode ask failed: {}", e);
                return;
            }
        };
        let sender = ask.src_id.clone();
        let reply = self.sequencer().on_ask(ask);
        // The sender may have crashed already; its entry then goes at once.
        self.release();

        let sent = match reply.encode() {
            Ok(bytes) => {
                self.basic
                    .unicast(&sender, ControlPath::ReplyProposalSeq, bytes)
                    .await
            }
            Err(e) => Err(e),
        };
        if let Err(e) = sent {
            warn!(
                "to-multicast: reply for [{}] to [{}] failed: {}",
                reply.msg_id, sender, e
            );
        }
    }

    fn on_reply(&self, env: BEnvelope) {
        let reply = match ReplyProposalSeq::decode(&env.body) {
            Ok(reply) => reply,
            Err(e) => {
                warn!("to-multicast: decode reply from [{}] failed: {}", env.src_id, e);
                return;
            }
        };
        let pending = self.pending_votes();
        match pending.get(&reply.msg_id) {
            Some(vote_tx) => {
                let msg_id = reply.msg_id;
                if vote_tx.send(reply).is_err() {
                    debug!("to-multicast: vote collection for [{}] already over", msg_id);
                }
            }
            None => debug!(
                "to-multicast: late reply for [{}] from [{}]",
                reply.msg_id, reply.process_id
            ),
        }
    }

    fn on_announce(&self, env: REnvelope) {
        let announce = match AnnounceAgreementSeq::decode(&env.body) {
            Ok(announce) => announce,
            Err(e) => {
                warn!("to-multicast: decode announce failed: {}", e);
                return;
            }
        };
        if let Err(e) = self.sequencer().on_agreement(&announce) {
            warn!("to-multicast: {}", e);
        }
        self.release();
    }

    /// Run the release loop and queue whatever it frees for delivery.
    fn release(&self) {
        let mut sequencer = self.sequencer();
        let released = {
            let peers = self.basic.peers();
            sequencer.release(|id| peers.is_live(id))
        };
        for delivery in released {
            if self.deliver_tx.send(delivery).is_err() {
                warn!("to-multicast: delivery task gone");
                break;
            }
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
