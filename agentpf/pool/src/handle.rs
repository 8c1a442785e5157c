use agentpf_core::{
    AgentClient, AgentDialer, AgentPodInfo, DialBridge, Error, PodKey, Provider, Result,
    SessionInfo, Tunnel,
};
use parking_lot::Mutex;
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{sync::watch, time};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

/// The outcome of connecting to an agent. It is `None` until the connection
/// attempt completes and is set exactly once.
type Ready = Option<Result<Arc<dyn AgentClient>>>;

/// A connection to a single agent pod.
///
/// Handles are created by the pool and connect in the background. Tunnels
/// may be requested immediately; they wait for the connection to complete.
pub struct AgentHandle {
    key: PodKey,
    info: AgentPodInfo,
    session: SessionInfo,
    bridge: Arc<dyn DialBridge>,
    state: Mutex<State>,
    ready: watch::Sender<Ready>,
    open_tunnels: Arc<AtomicUsize>,

    /// Governs the transport and, through child tokens, the dial watch.
    cancel: CancellationToken,

    /// The dial watch claimed at creation for agents that were already
    /// intercepted. It is started by `connect`.
    initial_dial_watch: Option<CancellationToken>,
}

#[derive(Debug)]
struct State {
    intercepted: bool,

    /// Set iff `intercepted` is true.
    dial_watch: Option<CancellationToken>,
}

/// Counts a tunnel as open for as long as it is held.
struct OpenTunnel(Arc<AtomicUsize>);

// === impl AgentHandle ===

impl AgentHandle {
    pub(crate) fn new(
        info: AgentPodInfo,
        session: SessionInfo,
        bridge: Arc<dyn DialBridge>,
    ) -> Arc<Self> {
        let cancel = CancellationToken::new();
        let initial_dial_watch = info.intercepted.then(|| cancel.child_token());
        let (ready, _) = watch::channel(None);
        Arc::new(Self {
            key: info.key(),
            state: Mutex::new(State {
                intercepted: info.intercepted,
                dial_watch: initial_dial_watch.clone(),
            }),
            info,
            session,
            bridge,
            ready,
            open_tunnels: Default::default(),
            cancel,
            initial_dial_watch,
        })
    }

    pub fn key(&self) -> &PodKey {
        &self.key
    }

    /// The agent as it was reported when the handle was created.
    pub fn info(&self) -> &AgentPodInfo {
        &self.info
    }

    pub fn is_intercepted(&self) -> bool {
        self.state.lock().intercepted
    }

    pub fn open_tunnels(&self) -> usize {
        self.open_tunnels.load(Ordering::Acquire)
    }

    #[cfg(test)]
    pub(crate) fn is_connected(&self) -> bool {
        matches!(*self.ready.borrow(), Some(Ok(_)))
    }

    /// A busy handle is still connecting, intercepted, or carrying tunnels,
    /// and must not be evicted.
    pub(crate) fn is_busy(&self) -> bool {
        self.ready.borrow().is_none() || self.is_intercepted() || self.open_tunnels() > 0
    }

    /// Waits for the connection attempt to complete.
    pub async fn ready(&self) -> Result<Arc<dyn AgentClient>> {
        let mut rx = self.ready.subscribe();
        let ready = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| Error::Canceled(self.key.clone()))?;
        (*ready)
            .clone()
            .unwrap_or_else(|| Err(Error::Canceled(self.key.clone())))
    }

    /// Cancels the transport and any dial watch. Safe to call repeatedly.
    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }

    fn resolve(&self, ready: Result<Arc<dyn AgentClient>>) {
        self.ready.send_if_modified(move |current| {
            if current.is_some() {
                return false;
            }
            *current = Some(ready);
            true
        });
    }

    /// Dials the agent and resolves the ready signal.
    ///
    /// The dial is bounded by `timeout` and abandoned if the handle is
    /// canceled. On failure the error is delivered to every waiter; the
    /// caller is responsible for removing the handle from the pool.
    pub(crate) async fn connect(
        self: Arc<Self>,
        dialer: Arc<dyn AgentDialer>,
        timeout: Duration,
    ) -> Result<()> {
        let dialed = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Canceled(self.key.clone())),
            res = time::timeout(timeout, dialer.dial(&self.info)) => match res {
                Ok(res) => res,
                Err(_) => Err(Error::ConnectTimeout {
                    key: self.key.clone(),
                    timeout,
                }),
            },
        };
        let (client, teardown) = match dialed {
            Ok(conn) => conn.into_parts(),
            Err(error) => {
                self.resolve(Err(error.clone()));
                return Err(error);
            }
        };

        // The transport lives until the handle is canceled.
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            cancel.cancelled().await;
            teardown();
        });

        if let Some(dial_watch) = self.initial_dial_watch.clone() {
            if let Err(error) = self
                .clone()
                .start_dial_watch(client.clone(), dial_watch)
                .await
            {
                self.cancel.cancel();
                self.resolve(Err(error.clone()));
                return Err(error);
            }
        }

        self.resolve(Ok(client));
        Ok(())
    }

    /// Reconciles the intercept state with the manager's view of the agent.
    pub(crate) fn set_intercepted(self: &Arc<Self>, intercepted: bool) {
        let mut state = self.state.lock();
        if state.intercepted == intercepted {
            return;
        }
        state.intercepted = intercepted;

        if !intercepted {
            if let Some(dial_watch) = state.dial_watch.take() {
                dial_watch.cancel();
            }
            info!(key = %self.key, "Agent is no longer intercepted");
            return;
        }

        info!(key = %self.key, "Agent is intercepted");
        let dial_watch = self.cancel.child_token();
        state.dial_watch = Some(dial_watch.clone());
        drop(state);

        let handle = self.clone();
        tokio::spawn(
            async move {
                // If the connection failed, the handle is being removed.
                let Ok(client) = handle.ready().await else {
                    return;
                };
                if let Err(error) = handle
                    .clone()
                    .start_dial_watch(client, dial_watch.clone())
                    .await
                {
                    warn!(%error, "Failed to watch dial requests");
                    let mut state = handle.state.lock();
                    if !dial_watch.is_cancelled() {
                        dial_watch.cancel();
                        state.intercepted = false;
                        state.dial_watch = None;
                    }
                }
            }
            .instrument(info_span!("agent", key = %self.key)),
        );
    }

    /// Subscribes to the agent's dial requests and bridges them into tunnels
    /// until `dial_watch` is canceled.
    async fn start_dial_watch(
        self: Arc<Self>,
        client: Arc<dyn AgentClient>,
        dial_watch: CancellationToken,
    ) -> Result<()> {
        let dials = tokio::select! {
            biased;
            _ = dial_watch.cancelled() => return Ok(()),
            res = client.watch_dial(&self.session) => res?,
        };
        debug!(key = %self.key, "Watching dial requests");

        let bridge = self.bridge.clone();
        let session = self.session.clone();
        let span = info_span!("dial_watch", key = %self.key);
        let provider: Arc<dyn Provider> = self;
        tokio::spawn(
            async move {
                tokio::select! {
                    _ = dial_watch.cancelled() => debug!("Dial watch canceled"),
                    res = bridge.run(provider, dials, session) => match res {
                        Ok(()) => debug!("Dial requests ended"),
                        Err(error) => warn!(%error, "Dial bridge failed"),
                    },
                }
            }
            .instrument(span),
        );
        Ok(())
    }
}

#[async_trait::async_trait]
impl Provider for AgentHandle {
    async fn tunnel(&self) -> Result<Tunnel> {
        let client = self.ready().await?;
        // Counted before opening so the handle can't be evicted mid-open.
        let open = OpenTunnel::acquire(&self.open_tunnels);
        if self.cancel.is_cancelled() {
            return Err(Error::Canceled(self.key.clone()));
        }
        let tunnel = client.tunnel().await?;
        Ok(tunnel.on_release(move || drop(open)))
    }
}

impl std::fmt::Debug for AgentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentHandle")
            .field("key", &self.key)
            .field("state", &*self.state.lock())
            .field("open_tunnels", &self.open_tunnels())
            .finish_non_exhaustive()
    }
}

// === impl OpenTunnel ===

impl OpenTunnel {
    fn acquire(count: &Arc<AtomicUsize>) -> Self {
        count.fetch_add(1, Ordering::AcqRel);
        Self(count.clone())
    }
}

impl Drop for OpenTunnel {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}
