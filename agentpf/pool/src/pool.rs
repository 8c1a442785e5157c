use crate::{handle::AgentHandle, metrics::PoolMetrics, waiters::Waiters, Config};
use agentpf_core::{AgentDialer, AgentPodInfo, DialBridge, Error, PodKey, Result, SessionInfo};
use ahash::{AHashMap as HashMap, RandomState};
use dashmap::{mapref::entry::Entry, DashMap, DashSet};
use parking_lot::RwLock;
use std::{
    net::IpAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, trace, warn, Instrument};

pub type SharedPool = Arc<ConnectionPool>;

/// Maintains connections to the agents of a session.
///
/// The pool is driven by [`ConnectionPool::watch_agent_pods`], which
/// reconciles the pool's handles with every agent snapshot the manager
/// sends.
pub struct ConnectionPool {
    config: Config,
    session: SessionInfo,
    dialer: Arc<dyn AgentDialer>,
    bridge: Arc<dyn DialBridge>,
    metrics: PoolMetrics,

    handles: DashMap<PodKey, Arc<AgentHandle>, RandomState>,
    ip_waiters: Waiters<IpAddr>,
    workload_waiters: Waiters<String>,
    proxy_via: DashSet<String, RandomState>,

    /// The agents in the most recent snapshot.
    agents: RwLock<Arc<[AgentPodInfo]>>,

    /// Set once the manager is found not to support the agent feed, or the
    /// watch has ended. Waits succeed immediately once disabled.
    disabled: AtomicBool,
}

// === impl ConnectionPool ===

impl ConnectionPool {
    pub fn shared(
        config: Config,
        session: SessionInfo,
        dialer: Arc<dyn AgentDialer>,
        bridge: Arc<dyn DialBridge>,
        metrics: PoolMetrics,
    ) -> SharedPool {
        Arc::new(Self {
            config,
            session,
            dialer,
            bridge,
            metrics,
            handles: DashMap::with_hasher(RandomState::new()),
            ip_waiters: Waiters::new(),
            workload_waiters: Waiters::new(),
            proxy_via: DashSet::with_hasher(RandomState::new()),
            agents: RwLock::new(Arc::from(Vec::new())),
            disabled: AtomicBool::new(false),
        })
    }

    pub fn session(&self) -> &SessionInfo {
        &self.session
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn metrics(&self) -> &PoolMetrics {
        &self.metrics
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// The keys of the agents the pool currently holds handles for.
    pub fn keys(&self) -> Vec<PodKey> {
        self.handles.iter().map(|e| e.key().clone()).collect()
    }

    #[cfg(test)]
    pub(crate) fn get(&self, key: &PodKey) -> Option<Arc<AgentHandle>> {
        self.handles.get(key).map(|e| e.value().clone())
    }

    /// Selects a handle for traffic destined to `ip`.
    ///
    /// Prefers the agent running in the pod that owns `ip`, then any
    /// intercepted agent, then any agent at all, so that traffic which
    /// doesn't need a specific agent reuses an existing connection.
    pub fn get_client(&self, ip: IpAddr) -> Option<Arc<AgentHandle>> {
        let mut intercepted = None;
        let mut any = None;
        for entry in self.handles.iter() {
            let handle = entry.value();
            if handle.info().pod_ip == ip {
                return Some(handle.clone());
            }
            if intercepted.is_none() && handle.is_intercepted() {
                intercepted = Some(handle.clone());
            }
            if any.is_none() {
                any = Some(handle.clone());
            }
        }
        intercepted.or(any)
    }

    /// Returns a handle for an agent of the named workload.
    pub fn get_workload_client(&self, workload: &str) -> Option<Arc<AgentHandle>> {
        self.handles
            .iter()
            .find(|e| e.value().info().workload == workload)
            .map(|e| e.value().clone())
    }

    /// Keeps the named workload's agent connected regardless of whether it
    /// is intercepted or idle. Takes effect on the next agent snapshot.
    pub fn set_proxy_via(&self, workload: impl Into<String>) {
        let workload = workload.into();
        if self.proxy_via.insert(workload.clone()) {
            info!(%workload, "Routing through workload agent");
        }
    }

    /// Waits until the pool holds a handle for the agent that owns `ip`.
    ///
    /// Returns immediately once the pool is disabled, since the pool can no
    /// longer tell whether such an agent exists.
    pub async fn wait_for_ip(self: &Arc<Self>, ip: IpAddr, timeout: Duration) -> Result<()> {
        if self.is_disabled() {
            return Ok(());
        }
        let waiter = self.ip_waiters.register(ip, || {
            self.has_ip(ip) || self.connect_known(|agent| agent.pod_ip == ip)
        });
        self.wait(waiter, timeout, || ip.to_string()).await
    }

    /// Waits until the pool holds a handle for an agent of `workload`.
    pub async fn wait_for_workload(
        self: &Arc<Self>,
        workload: &str,
        timeout: Duration,
    ) -> Result<()> {
        if self.is_disabled() {
            return Ok(());
        }
        let waiter = self.workload_waiters.register(workload.to_string(), || {
            self.has_workload(workload) || self.connect_known(|agent| agent.workload == workload)
        });
        self.wait(waiter, timeout, || format!("workload {workload}"))
            .await
    }

    async fn wait(
        &self,
        waiter: Option<CancellationToken>,
        timeout: Duration,
        target: impl FnOnce() -> String,
    ) -> Result<()> {
        let Some(waiter) = waiter else {
            return Ok(());
        };
        // The pool may have been disabled, and its waiters released, before
        // this waiter was registered.
        if self.is_disabled() {
            return Ok(());
        }
        time::timeout(timeout, waiter.cancelled())
            .await
            .map_err(|_| Error::WaitTimeout {
                target: target(),
                timeout,
            })
    }

    /// Reconciles the pool with a snapshot of the session's agents and then
    /// releases any waiters the snapshot satisfies.
    pub(crate) fn update(self: &Arc<Self>, agents: Vec<AgentPodInfo>) {
        self.metrics.updates.inc();
        self.reconcile(agents);
        self.notify_waiters();
        self.metrics.handles.set(self.handles.len() as i64);
    }

    fn reconcile(self: &Arc<Self>, agents: Vec<AgentPodInfo>) {
        if !agents.is_empty() && agents.iter().all(|a| !a.has_identity()) {
            info!("Agents do not report their pods; disabling agent connections");
            self.disable();
            return;
        }

        let agents = agents
            .into_iter()
            .filter(AgentPodInfo::has_identity)
            .collect::<Arc<[_]>>();
        *self.agents.write() = agents.clone();
        let current = agents
            .iter()
            .map(|a| (a.key(), a))
            .collect::<HashMap<_, _>>();
        debug!(agents = current.len(), handles = self.len(), "Reconciling");

        self.handles.retain(|key, handle| {
            if current.contains_key(key) {
                return true;
            }
            info!(%key, "Agent is gone");
            handle.cancel();
            false
        });

        for handle in self.snapshot() {
            if let Some(agent) = current.get(handle.key()) {
                handle.set_intercepted(agent.intercepted);
            }
        }

        for agent in agents.iter() {
            if agent.intercepted || self.is_proxy_via(&agent.workload) || self.is_awaited(agent) {
                self.ensure_handle(agent);
            }
        }

        self.evict_idle();

        if self.handles.is_empty() {
            if let Some(agent) = agents.first() {
                debug!(key = %agent.key(), "Keeping a fallback agent connection");
                self.ensure_handle(agent);
            }
        }
    }

    /// Removes handles that nothing needs, keeping at least one.
    fn evict_idle(&self) {
        let handles = self.snapshot();
        let mut remaining = handles.len();
        for handle in handles {
            if remaining <= 1 {
                break;
            }
            // Waiter locks are taken before handle locks, so waiters are
            // checked outside of the removal.
            if self.is_awaited(handle.info()) {
                continue;
            }
            let evicted = self.handles.remove_if(handle.key(), |_, h| {
                Arc::ptr_eq(h, &handle) && !h.is_busy() && !self.is_proxy_via(&h.info().workload)
            });
            if evicted.is_some() {
                info!(key = %handle.key(), "Closing idle agent connection");
                handle.cancel();
                self.metrics.evictions.inc();
                remaining -= 1;
            }
        }
    }

    pub(crate) fn notify_waiters(&self) {
        if self.is_disabled() {
            self.ip_waiters.release_all();
            self.workload_waiters.release_all();
            return;
        }
        self.ip_waiters.notify(|ip| {
            let ready = self.has_ip(*ip);
            if ready {
                trace!(%ip, "Releasing waiters");
            }
            ready
        });
        self.workload_waiters.notify(|workload| {
            let ready = self.has_workload(workload);
            if ready {
                trace!(%workload, "Releasing waiters");
            }
            ready
        });
    }

    /// Returns the existing handle for `agent`, or creates one and starts
    /// connecting it.
    ///
    /// A disabled pool creates no handles. The check is made while the key's
    /// slot is locked so that a concurrent `cancel_all` can't miss the handle.
    pub(crate) fn ensure_handle(
        self: &Arc<Self>,
        agent: &AgentPodInfo,
    ) -> Option<Arc<AgentHandle>> {
        let handle = match self.handles.entry(agent.key()) {
            Entry::Occupied(entry) => return Some(entry.get().clone()),
            Entry::Vacant(_) if self.is_disabled() => return None,
            Entry::Vacant(entry) => {
                let handle =
                    AgentHandle::new(agent.clone(), self.session.clone(), self.bridge.clone());
                entry.insert(handle.clone());
                handle
            }
        };
        info!(key = %handle.key(), intercepted = agent.intercepted, "Connecting to agent");
        self.spawn_connect(handle.clone());
        Some(handle)
    }

    fn spawn_connect(self: &Arc<Self>, handle: Arc<AgentHandle>) {
        let pool = self.clone();
        let dialer = self.dialer.clone();
        let timeout = self.config.connect_timeout;
        let span = info_span!("agent", key = %handle.key());
        tokio::spawn(
            async move {
                match handle.clone().connect(dialer, timeout).await {
                    Ok(()) => {
                        debug!("Connected");
                        pool.metrics.connects.inc();
                    }
                    Err(error) => {
                        if let Error::Canceled(_) = error {
                            debug!("Canceled while connecting");
                        } else {
                            warn!(%error, "Failed to connect to agent");
                            pool.metrics.connect_failures.inc();
                        }
                        pool.handles
                            .remove_if(handle.key(), |_, h| Arc::ptr_eq(h, &handle));
                        pool.metrics.handles.set(pool.handles.len() as i64);
                    }
                }
            }
            .instrument(span),
        );
    }

    /// Creates a handle for the first known agent matching `matches`, if
    /// any. Returns true if such an agent exists.
    fn connect_known(self: &Arc<Self>, matches: impl Fn(&AgentPodInfo) -> bool) -> bool {
        let agents = self.agents.read().clone();
        match agents.iter().find(|a| matches(a)) {
            Some(agent) => {
                self.ensure_handle(agent);
                true
            }
            None => false,
        }
    }

    /// Permanently disables the pool.
    pub(crate) fn disable(&self) {
        if !self.disabled.swap(true, Ordering::AcqRel) {
            info!("Agent connection pool disabled");
        }
    }

    /// Removes and cancels every handle.
    pub(crate) fn cancel_all(&self) {
        *self.agents.write() = Arc::from(Vec::new());
        self.handles.retain(|key, handle| {
            debug!(%key, "Closing agent connection");
            handle.cancel();
            false
        });
        self.metrics.handles.set(0);
    }

    /// Clones the current handles so they can be inspected without holding
    /// the map's locks.
    fn snapshot(&self) -> Vec<Arc<AgentHandle>> {
        self.handles.iter().map(|e| e.value().clone()).collect()
    }

    fn has_ip(&self, ip: IpAddr) -> bool {
        self.handles.iter().any(|e| e.value().info().pod_ip == ip)
    }

    fn has_workload(&self, workload: &str) -> bool {
        self.handles
            .iter()
            .any(|e| e.value().info().workload == workload)
    }

    fn is_proxy_via(&self, workload: &str) -> bool {
        self.proxy_via.contains(workload)
    }

    fn is_awaited(&self, agent: &AgentPodInfo) -> bool {
        self.ip_waiters.contains(&agent.pod_ip) || self.workload_waiters.contains(&agent.workload)
    }

    /// The number of registered IP and workload waiters.
    #[cfg(test)]
    pub(crate) fn waiters(&self) -> (usize, usize) {
        (self.ip_waiters.len(), self.workload_waiters.len())
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("session", &self.session)
            .field("handles", &self.keys())
            .field("disabled", &self.is_disabled())
            .finish_non_exhaustive()
    }
}
