#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! A pool of connections to traffic agents.
//!
//! The pool follows the manager's feed of agent pods, keeps connections to
//! the agents that are intercepted, explicitly routed through, or awaited,
//! and hands out [`Provider`](agentpf_core::Provider)s that open tunnels
//! toward them.

mod dial;
mod handle;
mod metrics;
mod pool;
mod waiters;
mod watch;


pub use self::{
    dial::TcpDialBridge,
    handle::AgentHandle,
    metrics::PoolMetrics,
    pool::{ConnectionPool, SharedPool},
};
pub use agentpf_core as core;

use agentpf_core::Backoff;
use std::time::Duration;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
pub struct Config {
    /// Bounds each attempt to dial an agent.
    pub connect_timeout: Duration,

    /// Governs re-establishing the agent watch while the manager is
    /// unavailable.
    pub backoff: Backoff,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            backoff: Backoff::default(),
        }
    }
}
