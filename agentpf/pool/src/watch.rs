use crate::pool::ConnectionPool;
use agentpf_core::{Delays, ManagerClient, Result};
use futures::prelude::*;
use std::sync::Arc;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

impl ConnectionPool {
    /// Drives the pool from the manager's agent feed.
    ///
    /// Runs until `shutdown` is canceled, the feed ends, or the manager turns
    /// out not to support it, all of which return `Ok`. While the manager is
    /// unavailable the watch is re-established with exponential backoff. Any
    /// other failure is returned.
    ///
    /// On return the pool is disabled and every handle is canceled.
    pub async fn watch_agent_pods<M>(
        self: &Arc<Self>,
        manager: &M,
        shutdown: CancellationToken,
    ) -> Result<()>
    where
        M: ManagerClient + ?Sized,
    {
        let res = tokio::select! {
            biased;
            _ = shutdown.cancelled() => Ok(()),
            res = self.watch(manager) => res,
        };
        self.disable();
        self.cancel_all();
        self.notify_waiters();
        res
    }

    async fn watch<M>(self: &Arc<Self>, manager: &M) -> Result<()>
    where
        M: ManagerClient + ?Sized,
    {
        let mut delays = self.config().backoff.delays();
        loop {
            let error = match self.watch_stream(manager, &mut delays).await {
                Ok(()) => return Ok(()),
                Err(error) => error,
            };
            if error.is_unimplemented() {
                info!(%error, "Manager does not support watching agent pods");
                return Ok(());
            }
            if !error.is_unavailable() {
                return Err(error);
            }

            let delay = delays.next().unwrap_or(self.config().backoff.max);
            debug!(%error, ?delay, "Manager unavailable; retrying");
            self.metrics().watch_retries.inc();
            time::sleep(delay).await;
        }
    }

    /// Applies the updates of a single agent watch until it ends or fails.
    async fn watch_stream<M>(self: &Arc<Self>, manager: &M, delays: &mut Delays) -> Result<()>
    where
        M: ManagerClient + ?Sized,
    {
        let mut updates = manager.watch_agent_pods(self.session()).await?;
        while let Some(agents) = updates.next().await {
            let agents = agents?;
            delays.reset();
            debug!(agents = agents.len(), "Received agent snapshot");
            self.update(agents);
            if self.is_disabled() {
                return Ok(());
            }
        }
        debug!("Agent watch ended");
        Ok(())
    }
}
