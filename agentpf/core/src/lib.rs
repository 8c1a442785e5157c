#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Types and collaborator traits for the agent connection pool.
//!
//! The pool itself lives in `agentpf-pool`; this crate only describes the
//! agents it tracks, the tunnels it hands out, and the external services it
//! consumes (the manager's agent feed, the pod dialer, per-agent clients and
//! the dial bridge).

mod agent;
mod backoff;
mod error;
mod tunnel;

pub use self::{
    agent::{AgentPodInfo, PodKey, SessionInfo},
    backoff::{Backoff, Delays},
    error::{Error, Result},
    tunnel::{DialRequest, DialStream, ReleaseGuard, Tunnel, TunnelStream},
};

use futures::prelude::*;
use std::{pin::Pin, sync::Arc};

/// A stream of agent snapshots. Each item is the complete set of agents the
/// manager currently knows about for the session.
pub type AgentPodsStream =
    Pin<Box<dyn Stream<Item = Result<Vec<AgentPodInfo>>> + Send + 'static>>;

/// Opens tunnels toward a single agent.
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    async fn tunnel(&self) -> Result<Tunnel>;
}

/// Models the manager's streaming agent feed.
#[async_trait::async_trait]
pub trait ManagerClient: Send + Sync {
    async fn watch_agent_pods(&self, session: &SessionInfo) -> Result<AgentPodsStream>;
}

/// A connected client for one agent's API.
#[async_trait::async_trait]
pub trait AgentClient: Send + Sync + 'static {
    /// Opens a bidirectional tunnel stream.
    async fn tunnel(&self) -> Result<Tunnel>;

    /// Subscribes to dial requests the agent wants the client to fulfill.
    async fn watch_dial(&self, session: &SessionInfo) -> Result<DialStream>;
}

/// Establishes a transport to an agent pod.
#[async_trait::async_trait]
pub trait AgentDialer: Send + Sync + 'static {
    async fn dial(&self, agent: &AgentPodInfo) -> Result<Connection>;
}

/// Bridges an agent's dial requests into tunnels opened through `provider`.
///
/// Implementations run until `dials` ends; callers stop them by dropping the
/// returned future.
#[async_trait::async_trait]
pub trait DialBridge: Send + Sync + 'static {
    async fn run(
        &self,
        provider: Arc<dyn Provider>,
        dials: DialStream,
        session: SessionInfo,
    ) -> Result<()>;
}

/// The result of dialing an agent: a client and a function that tears down
/// the underlying transport.
pub struct Connection {
    pub client: Arc<dyn AgentClient>,
    teardown: Option<Box<dyn FnOnce() + Send + Sync>>,
}

// === impl Connection ===

impl Connection {
    pub fn new(client: Arc<dyn AgentClient>) -> Self {
        Self {
            client,
            teardown: None,
        }
    }

    pub fn with_teardown(mut self, teardown: impl FnOnce() + Send + Sync + 'static) -> Self {
        self.teardown = Some(Box::new(teardown));
        self
    }

    /// Splits the connection into its client and teardown function.
    pub fn into_parts(self) -> (Arc<dyn AgentClient>, Box<dyn FnOnce() + Send + Sync>) {
        let teardown = self.teardown.unwrap_or_else(|| Box::new(|| {}));
        (self.client, teardown)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("teardown", &self.teardown.is_some())
            .finish_non_exhaustive()
    }
}
