//! Basic multicast: the B-layer.
//!
//! One persistent TCP link per group member, self included. Outbound, a
//! connector task per member dials with a fixed retry interval, sends the
//! handshake line and then drains that member's bounded queue. Inbound, one
//! listener accepts connections and spawns a reader per connection that
//! decodes lines into [`BEnvelope`]s and feeds them to the B dispatcher.
//!
//! ## Wire format
//!
//! ```text
//! {"from":"<node id>"}\n                              handshake, once
//! {"src":"<node id>","path":"<path>","body":"<b64>"}\n   one per envelope
//! ```
//!
//! A connector that fails to write, sees its peer hang up, or gives up
//! dialing removes the peer from the live-peer map; that is the only way a
//! member ever leaves the group.

use {
    crate::{
        config::{GroupConfig, Node, NodeId},
        dispatcher::Dispatcher,
        envelope::{BEnvelope, ControlPath, Handshake, JsonFrame},
        error::{MulticastError, Result},
        peer_manager::{Frame, Membership, PeerManager},
    },
    bytes::BytesMut,
    futures::{SinkExt, StreamExt},
    log::{debug, error, info, warn},
    std::{
        net::SocketAddr,
        sync::{Arc, Mutex, MutexGuard, PoisonError},
    },
    tokio::{
        io::AsyncReadExt,
        net::{TcpListener, TcpStream},
        sync::{mpsc, watch},
    },
    tokio_util::{
        codec::{Decoder, FramedRead, FramedWrite, LinesCodec, LinesCodecError},
        sync::CancellationToken,
    },
};

/// Dispatcher type for decoded B-layer envelopes.
pub type BDispatcher = Dispatcher<ControlPath, BEnvelope>;

/// Best-effort multicast over a full mesh of TCP links.
pub struct BasicMulticast {
    config: GroupConfig,
    peers: Arc<Mutex<PeerManager>>,
    dispatcher: Arc<BDispatcher>,
    /// Outbound queues created at construction, handed to connectors on start.
    unstarted: Mutex<Option<Vec<(Node, mpsc::Receiver<Frame>)>>>,
    cancel: CancellationToken,
}

impl BasicMulticast {
    /// Build the live-peer map for every member of the group. Nothing is
    /// dialed until [`BasicMulticast::start`].
    pub fn new(config: GroupConfig) -> Arc<Self> {
        let mut peers = PeerManager::new();
        let queues = config
            .membership()
            .into_iter()
            .map(|node| {
                let rx = peers.add_peer(node.clone(), config.outbound_queue_size);
                (node, rx)
            })
            .collect();

        Arc::new(Self {
            config,
            peers: Arc::new(Mutex::new(peers)),
            dispatcher: Arc::new(Dispatcher::new("b-multicast")),
            unstarted: Mutex::new(Some(queues)),
            cancel: CancellationToken::new(),
        })
    }

    pub fn self_id(&self) -> &str {
        &self.config.self_id
    }

    pub fn config(&self) -> &GroupConfig {
        &self.config
    }

    /// Where every decoded inbound envelope is routed.
    pub fn dispatcher(&self) -> &Arc<BDispatcher> {
        &self.dispatcher
    }

    /// Lock the live-peer map.
    pub fn peers(&self) -> MutexGuard<'_, PeerManager> {
        self.peers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn live_count(&self) -> usize {
        self.peers().live_count()
    }

    pub fn is_live(&self, id: &str) -> bool {
        self.peers().is_live(id)
    }

    /// Subscribe to membership changes (ejections and completed dials).
    pub fn subscribe_membership(&self) -> watch::Receiver<Membership> {
        self.peers().subscribe()
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    /// Bind the configured address and start the listener and connectors.
    ///
    /// Returns the bound address (useful when the configured port is 0).
    pub async fn start(self: &Arc<Self>) -> Result<SocketAddr> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.start_with_listener(listener)
    }

    /// Like [`BasicMulticast::start`] but with an already-bound listener.
    pub fn start_with_listener(self: &Arc<Self>, listener: TcpListener) -> Result<SocketAddr> {
        let queues = self
            .unstarted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(MulticastError::AlreadyStarted)?;

        let local_addr = listener.local_addr()?;
        info!(
            "node [{}] success listening on: {}",
            self.config.self_id, local_addr
        );

        let (inbound_tx, inbound_rx) = mpsc::channel(self.config.inbound_queue_size.max(1));
        self.dispatcher.clone().run(inbound_rx);
        tokio::spawn(Self::accept_loop(
            listener,
            inbound_tx,
            self.config.max_line_length,
            self.cancel.clone(),
        ));

        for (node, rx) in queues {
            tokio::spawn(self.clone().run_connector(node, rx));
        }
        Ok(local_addr)
    }

    /// Resolve once every live member has a connected outbound link.
    pub async fn wait_for_mesh(&self) -> Result<()> {
        let mut rx = self.subscribe_membership();
        rx.wait_for(Membership::is_meshed)
            .await
            .map_err(|_| MulticastError::ChannelClosed)?;
        Ok(())
    }

    /// Stop the listener, all readers and all connectors.
    pub fn shutdown(&self) {
        info!("node [{}] shutting down", self.config.self_id);
        self.cancel.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token cancelled by [`BasicMulticast::shutdown`], for tasks of the
    /// layers above.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    // ── Sending ─────────────────────────────────────────────────────────

    fn encode(&self, path: ControlPath, body: Vec<u8>) -> Result<Frame> {
        let env = BEnvelope {
            src_id: self.config.self_id.clone(),
            path: path.as_str().to_string(),
            body,
        };
        Ok(Arc::from(env.encode_line()?))
    }

    /// Enqueue `body` for every live member, self included.
    ///
    /// Blocks while any member's queue is full. A member ejected while we
    /// wait is skipped.
    pub async fn multicast(&self, path: ControlPath, body: Vec<u8>) -> Result<()> {
        let frame = self.encode(path, body)?;
        let queues = self.peers().all_queues(&frame);
        for (id, queue) in queues {
            tokio::select! {
                sent = queue.send(frame.clone()) => {
                    if sent.is_err() {
                        debug!("b-multicast: peer [{}] left while enqueuing", id);
                    }
                }
                _ = self.cancel.cancelled() => return Err(MulticastError::ChannelClosed),
            }
        }
        Ok(())
    }

    /// Enqueue `body` for a single live member.
    pub async fn unicast(&self, dst: &str, path: ControlPath, body: Vec<u8>) -> Result<()> {
        let frame = self.encode(path, body)?;
        let queue = self.peers().queue_for(dst, &frame)?;
        tokio::select! {
            sent = queue.send(frame) => sent.map_err(|_| MulticastError::QueueClosed(dst.to_string())),
            _ = self.cancel.cancelled() => Err(MulticastError::ChannelClosed),
        }
    }

    // ── Outbound connectors ─────────────────────────────────────────────

    /// Dial `node`, then drain its queue until the link or the queue fails.
    /// The member is ejected when this returns.
    async fn run_connector(self: Arc<Self>, node: Node, rx: mpsc::Receiver<Frame>) {
        let result = tokio::select! {
            result = self.connect_and_drain(&node, rx) => result,
            _ = self.cancel.cancelled() => return,
        };
        match result {
            Ok(()) => info!("connector to [{}] finished", node.id),
            Err(e) => error!("node [{}] lost connection to [{}]: {}", self.config.self_id, node.id, e),
        }
        self.peers().remove_peer(&node.id);
    }

    async fn connect_and_drain(&self, node: &Node, mut rx: mpsc::Receiver<Frame>) -> Result<()> {
        let stream = self.dial(node).await?;
        info!(
            "node [{}] success connect to the server [{}] in [{}]",
            self.config.self_id, node.id, node.addr
        );

        let (mut read_half, write_half) = stream.into_split();
        let mut sink = FramedWrite::new(write_half, LinesCodec::new());
        sink.send(Handshake::new(self.config.self_id.clone()).encode_line()?)
            .await?;
        self.peers().mark_connected(&node.id)?;

        // The remote never writes on this link; a readable socket means it
        // hung up.
        let mut probe = [0u8; 64];
        loop {
            tokio::select! {
                frame = rx.recv() => match frame {
                    Some(frame) => sink.send(frame).await?,
                    None => return Ok(()),
                },
                read = read_half.read(&mut probe) => match read {
                    Ok(0) => {
                        return Err(MulticastError::Transport(std::io::Error::new(
                            std::io::ErrorKind::UnexpectedEof,
                            "peer closed the connection",
                        )))
                    }
                    Ok(_) => debug!("ignoring unexpected bytes from [{}]", node.id),
                    Err(e) => return Err(e.into()),
                },
            }
        }
    }

    /// Dial with a blocking, fixed-interval retry.
    async fn dial(&self, node: &Node) -> Result<TcpStream> {
        let mut attempts: u32 = 0;
        loop {
            attempts = attempts.saturating_add(1);
            debug!(
                "node [{}] tries to connect to the server [{}] in [{}]",
                self.config.self_id, node.id, node.addr
            );
            match tokio::time::timeout(self.config.dial_timeout(), TcpStream::connect(node.addr))
                .await
            {
                Ok(Ok(stream)) => return Ok(stream),
                Ok(Err(e)) => warn!(
                    "node [{}] failed to connect to [{}] in [{}]: {}, retry",
                    self.config.self_id, node.id, node.addr, e
                ),
                Err(_) => warn!(
                    "node [{}] timed out connecting to [{}] in [{}], retry",
                    self.config.self_id, node.id, node.addr
                ),
            }
            if self
                .config
                .max_dial_attempts
                .is_some_and(|max| attempts >= max)
            {
                return Err(MulticastError::Unreachable {
                    peer: node.id.clone(),
                    attempts,
                });
            }
            tokio::time::sleep(self.config.dial_retry_interval()).await;
        }
    }

    // ── Inbound ─────────────────────────────────────────────────────────

    async fn accept_loop(
        listener: TcpListener,
        inbound_tx: mpsc::Sender<BEnvelope>,
        max_line_length: usize,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        debug!("accepted connection from {}", addr);
                        tokio::spawn(Self::handle_connection(
                            stream,
                            addr,
                            inbound_tx.clone(),
                            max_line_length,
                            cancel.clone(),
                        ));
                    }
                    Err(e) => error!("accept error: {}", e),
                },
                _ = cancel.cancelled() => break,
            }
        }
        debug!("listener stopped");
    }

    /// Read the handshake, then newline-delimited envelopes until EOF.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        inbound_tx: mpsc::Sender<BEnvelope>,
        max_line_length: usize,
        cancel: CancellationToken,
    ) {
        let mut lines = FramedRead::new(stream, TolerantLines::new(max_line_length));

        let from = tokio::select! {
            first = lines.next() => match read_handshake(first) {
                Ok(from) => from,
                Err(e) => {
                    warn!("dropping connection from {}: {}", addr, e);
                    return;
                }
            },
            _ = cancel.cancelled() => return,
        };
        info!("node [{}] connected from {}", from, addr);

        loop {
            let next = tokio::select! {
                next = lines.next() => next,
                _ = cancel.cancelled() => break,
            };
            match next {
                Some(Ok(Ok(line))) => match BEnvelope::decode(line.as_bytes()) {
                    Ok(env) => {
                        if inbound_tx.send(env).await.is_err() {
                            info!("inbound channel closed, stopping reader for [{}]", from);
                            break;
                        }
                    }
                    Err(e) => warn!("decode message from [{}] failed: {}", from, e),
                },
                Some(Ok(Err(LinesCodecError::MaxLineLengthExceeded))) => {
                    warn!("node [{}] sent a frame over {} bytes, skipping", from, max_line_length)
                }
                Some(Ok(Err(e))) => {
                    warn!("node [{}] sent an unreadable line: {}, skipping", from, e)
                }
                Some(Err(e)) => {
                    warn!("node [{}] connection err: {}", from, e);
                    break;
                }
                None => {
                    info!("node [{}] connection reach EOF", from);
                    break;
                }
            }
        }
    }
}

type LineResult = std::result::Result<String, LinesCodecError>;

/// [`LinesCodec`] that yields a bad line as an `Err` item instead of failing
/// the stream.
///
/// `FramedRead` stops for good after its decoder returns an error, so an
/// over-long or non-UTF-8 line would otherwise close the connection. The
/// inner codec has already consumed (or is discarding) the offending line
/// when it reports it, so decoding resumes at the next one. Socket errors
/// still come through as stream errors.
struct TolerantLines {
    inner: LinesCodec,
}

impl TolerantLines {
    fn new(max_line_length: usize) -> Self {
        Self {
            inner: LinesCodec::new_with_max_length(max_line_length),
        }
    }
}

impl Decoder for TolerantLines {
    type Item = LineResult;
    type Error = LinesCodecError;

    fn decode(
        &mut self,
        src: &mut BytesMut,
    ) -> std::result::Result<Option<LineResult>, LinesCodecError> {
        match self.inner.decode(src) {
            Ok(line) => Ok(line.map(Ok)),
            Err(e) => Ok(Some(Err(e))),
        }
    }

    fn decode_eof(
        &mut self,
        src: &mut BytesMut,
    ) -> std::result::Result<Option<LineResult>, LinesCodecError> {
        match self.inner.decode_eof(src) {
            Ok(line) => Ok(line.map(Ok)),
            Err(e) => Ok(Some(Err(e))),
        }
    }
}

fn read_handshake(first: Option<std::result::Result<LineResult, LinesCodecError>>) -> Result<NodeId> {
    let line = match first {
        Some(line) => line??,
        None => return Err(MulticastError::Handshake("connection closed".to_string())),
    };
    match Handshake::decode(line.as_bytes()) {
        Ok(hs) if !hs.from.is_empty() => Ok(hs.from),
        Ok(_) => Err(MulticastError::Handshake("empty sender id".to_string())),
        Err(e) => Err(MulticastError::Handshake(e.to_string())),
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
