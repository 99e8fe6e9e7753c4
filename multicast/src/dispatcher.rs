//! Path-keyed routing of decoded envelopes to handlers.
//!
//! Every layer owns one [`Dispatcher`]. The B- and R-layers key theirs by the
//! closed [`ControlPath`](crate::envelope::ControlPath) set; the
//! application-facing TO dispatcher is keyed by `String` so handlers can be
//! bound after the group is built.
//!
//! Handlers are async: a handler may enqueue onto a peer's bounded outbound
//! queue and so may have to wait. [`Dispatcher::run`] awaits each handler
//! before routing the next envelope, which keeps per-connection arrival order.

use {
    futures::future::BoxFuture,
    log::{debug, warn},
    std::{
        collections::HashMap,
        fmt::Debug,
        future::Future,
        hash::Hash,
        sync::{Arc, RwLock},
    },
    tokio::{sync::mpsc, task::JoinHandle},
};

/// Anything that can be routed: it names the path it should be handed to.
pub trait Routable: Send + 'static {
    fn path(&self) -> &str;
}

/// A lookup key parsed from an envelope's path.
pub trait RouteKey: Eq + Hash + Clone + Debug + Send + Sync + 'static {
    fn from_path(path: &str) -> Option<Self>;
}

impl RouteKey for String {
    fn from_path(path: &str) -> Option<Self> {
        Some(path.to_string())
    }
}

type Handler<M> = Arc<dyn Fn(M) -> BoxFuture<'static, ()> + Send + Sync>;

/// Routes envelopes of type `M` to at most one handler per key.
pub struct Dispatcher<K, M> {
    /// Used in log lines to tell the layers apart.
    name: &'static str,
    handlers: RwLock<HashMap<K, Handler<M>>>,
}

impl<K: RouteKey, M: Routable> Dispatcher<K, M> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Register `handler` for `key`. A later binding for the same key
    /// replaces the earlier one.
    pub fn bind<F, Fut>(&self, key: K, handler: F)
    where
        F: Fn(M) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: Handler<M> =
            Arc::new(move |msg: M| -> BoxFuture<'static, ()> { Box::pin(handler(msg)) });
        let mut handlers = self
            .handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if handlers.insert(key.clone(), handler).is_some() {
            debug!("{} dispatcher: rebound {:?}", self.name, key);
        }
    }

    /// Whether a handler is bound for `path`.
    pub fn is_bound(&self, path: &str) -> bool {
        K::from_path(path).is_some_and(|key| {
            self.handlers
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .contains_key(&key)
        })
    }

    /// Hand `msg` to the handler bound for its path.
    ///
    /// Returns `false` (after logging) when no handler matches.
    pub async fn route(&self, msg: M) -> bool {
        let handler = K::from_path(msg.path()).and_then(|key| {
            self.handlers
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .get(&key)
                .cloned()
        });
        match handler {
            Some(handler) => {
                handler(msg).await;
                true
            }
            None => {
                warn!(
                    "{} dispatcher: path [{}] doesn't match any handler, dropping",
                    self.name,
                    msg.path()
                );
                false
            }
        }
    }

    /// Route everything received on `rx`, in order, until the channel closes.
    pub fn run(self: Arc<Self>, mut rx: mpsc::Receiver<M>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                self.route(msg).await;
            }
            debug!("{} dispatcher: input closed", self.name);
        })
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
