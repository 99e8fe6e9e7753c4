//! Reliable multicast: the R-layer.
//!
//! Every R-envelope carries a random id. On first receipt a node re-floods
//! the envelope to the whole group (unless it is the origin of this copy)
//! and only then delivers it locally, so as long as one correct member got
//! a message, every correct member eventually gets it. Later copies of the
//! same id are dropped.

use {
    crate::{
        dispatcher::Dispatcher,
        envelope::{BEnvelope, ControlPath, JsonFrame, MessageId, REnvelope},
        error::Result,
        transport::BasicMulticast,
    },
    log::{debug, warn},
    std::{
        collections::HashSet,
        sync::{Arc, Mutex, PoisonError},
    },
};

/// Dispatcher type for delivered R-layer envelopes.
pub type RDispatcher = Dispatcher<ControlPath, REnvelope>;

/// At-least-once, at-most-once-delivered multicast on top of B.
pub struct ReliableMulticast {
    basic: Arc<BasicMulticast>,
    /// Ids already delivered. Grows for the lifetime of the process.
    received: Mutex<HashSet<MessageId>>,
    dispatcher: Arc<RDispatcher>,
}

impl ReliableMulticast {
    /// Layer R on top of `basic`, taking over its reliable-multicast path.
    pub fn new(basic: Arc<BasicMulticast>) -> Arc<Self> {
        let reliable = Arc::new(Self {
            basic: basic.clone(),
            received: Mutex::new(HashSet::new()),
            dispatcher: Arc::new(Dispatcher::new("r-multicast")),
        });

        let weak = Arc::downgrade(&reliable);
        basic
            .dispatcher()
            .bind(ControlPath::ReliableMulticast, move |env: BEnvelope| {
                let weak = weak.clone();
                async move {
                    if let Some(reliable) = weak.upgrade() {
                        reliable.on_basic_deliver(env).await;
                    }
                }
            });
        reliable
    }

    pub fn basic(&self) -> &Arc<BasicMulticast> {
        &self.basic
    }

    /// Where delivered R-envelopes are routed.
    pub fn dispatcher(&self) -> &Arc<RDispatcher> {
        &self.dispatcher
    }

    /// Reliably multicast `body` to every live member under `path`.
    ///
    /// Returns the id given to the envelope.
    pub async fn multicast(&self, path: ControlPath, body: Vec<u8>) -> Result<MessageId> {
        let env = REnvelope::new(path.as_str(), body);
        let id = env.id;
        self.basic
            .multicast(ControlPath::ReliableMulticast, env.encode()?)
            .await?;
        Ok(id)
    }

    /// Number of distinct ids seen so far.
    pub fn received_count(&self) -> usize {
        self.received_set().len()
    }

    fn received_set(&self) -> std::sync::MutexGuard<'_, HashSet<MessageId>> {
        self.received.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn on_basic_deliver(&self, b_env: BEnvelope) {
        let r_env = match REnvelope::decode(&b_env.body) {
            Ok(env) => env,
            Err(e) => {
                warn!("r-multicast: decode envelope from [{}] failed: {}", b_env.src_id, e);
                return;
            }
        };

        // Check-and-insert under one lock so concurrent copies deliver once.
        if !self.received_set().insert(r_env.id) {
            debug!("r-multicast: duplicate {} from [{}]", r_env.id, b_env.src_id);
            return;
        }

        if b_env.src_id != self.basic.self_id() {
            if let Err(e) = self
                .basic
                .multicast(ControlPath::ReliableMulticast, b_env.body)
                .await
            {
                warn!("r-multicast: re-flood of {} failed: {}", r_env.id, e);
            }
        }

        self.dispatcher.route(r_env).await;
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::config::GroupConfig,
        std::time::Duration,
        tokio::{net::TcpListener, sync::mpsc},
    };

    #[tokio::test]
    async fn test_duplicate_delivered_once() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let basic = BasicMulticast::new(GroupConfig::dev_default("a", addr, vec![]));
        let reliable = ReliableMulticast::new(basic.clone());

        let (tx, mut rx) = mpsc::unbounded_channel();
        reliable
            .dispatcher()
            .bind(ControlPath::AskProposalSeq, move |env: REnvelope| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(env);
                }
            });

        basic.start_with_listener(listener).unwrap();
        basic.wait_for_mesh().await.unwrap();

        // Hand the same envelope to the R-layer three times, as if it had
        // been re-flooded by other members.
        let env = REnvelope::new(ControlPath::AskProposalSeq.as_str(), b"x".to_vec());
        for src in ["b", "c", "b"] {
            reliable
                .on_basic_deliver(BEnvelope {
                    src_id: src.to_string(),
                    path: ControlPath::ReliableMulticast.as_str().to_string(),
                    body: env.encode().unwrap(),
                })
                .await;
        }

        let got = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, env);
        // The re-flooded copy comes back over the self-link and is dropped.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(reliable.received_count(), 1);
        basic.shutdown();
    }

    #[tokio::test]
    async fn test_multicast_delivers_locally() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let basic = BasicMulticast::new(GroupConfig::dev_default("a", addr, vec![]));
        let reliable = ReliableMulticast::new(basic.clone());

        let (tx, mut rx) = mpsc::unbounded_channel();
        reliable
            .dispatcher()
            .bind(ControlPath::AnnounceAgreementSeq, move |env: REnvelope| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(env.body);
                }
            });
        basic.start_with_listener(listener).unwrap();
        basic.wait_for_mesh().await.unwrap();

        let id = reliable
            .multicast(ControlPath::AnnounceAgreementSeq, b"hello".to_vec())
            .await
            .unwrap();
        let body = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(body, b"hello");
        assert!(reliable.received_set().contains(&id));
        basic.shutdown();
    }

    #[tokio::test]
    async fn test_garbage_body_ignored() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let basic = BasicMulticast::new(GroupConfig::dev_default("a", addr, vec![]));
        let reliable = ReliableMulticast::new(basic);
        reliable
            .on_basic_deliver(BEnvelope {
                src_id: "b".to_string(),
                path: ControlPath::ReliableMulticast.as_str().to_string(),
                body: b"garbage".to_vec(),
            })
            .await;
        assert_eq!(reliable.received_count(), 0);
    }
}
