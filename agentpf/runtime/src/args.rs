use crate::{
    core::{Backoff, SessionInfo},
    grpc::GrpcManagerClient,
    k8s::PortForwardDialer,
    pool::{self, ConnectionPool, PoolMetrics, TcpDialBridge},
};
use anyhow::{bail, Result};
use clap::Parser;
use prometheus_client::registry::Registry;
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tonic::transport::Endpoint;
use tracing::{error, info, info_span, Instrument};

#[derive(Debug, Parser)]
#[clap(name = "agentpf", about = "Keeps a session connected to its traffic agents")]
pub struct Args {
    #[clap(long, default_value = "agentpf=info,warn", env = "AGENTPF_LOG")]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// The manager's gRPC address.
    #[clap(long, env = "AGENTPF_MANAGER_ADDR")]
    manager_addr: http::Uri,

    #[clap(long, env = "AGENTPF_SESSION_ID")]
    session_id: String,

    #[clap(long, default_value = "5000")]
    connect_timeout_ms: u64,

    #[clap(long, default_value = "100")]
    backoff_min_ms: u64,

    #[clap(long, default_value = "15000")]
    backoff_max_ms: u64,

    /// Workloads whose agents stay connected even when they aren't
    /// intercepted. May be repeated.
    #[clap(long = "proxy-via")]
    proxy_via: Vec<String>,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let config = self.pool_config()?;
        let Self {
            admin,
            client,
            log_level,
            log_format,
            manager_addr,
            session_id,
            proxy_via,
            ..
        } = self;

        let mut prom = <Registry>::default();
        let pool_metrics = PoolMetrics::register(prom.sub_registry_with_prefix("agentpf"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        let session = SessionInfo::new(session_id);
        let pool = ConnectionPool::shared(
            config,
            session.clone(),
            Arc::new(PortForwardDialer::new(runtime.client(), session)),
            Arc::new(TcpDialBridge::new()),
            pool_metrics,
        );
        for workload in proxy_via {
            pool.set_proxy_via(workload);
        }

        // The manager connection is established on first use so that an
        // unreachable manager is retried by the watch rather than failing
        // startup.
        info!(addr = %manager_addr, "Watching agent pods");
        let manager = GrpcManagerClient::new(Endpoint::from(manager_addr).connect_lazy());

        // On shutdown, cancel the watch and wait for the pool to close its
        // connections.
        let drain = runtime.shutdown_handle();
        tokio::spawn(
            async move {
                let shutdown = CancellationToken::new();
                let watch = pool.watch_agent_pods(&manager, shutdown.clone());
                tokio::pin!(watch);
                let res = tokio::select! {
                    res = &mut watch => res,
                    release = drain.signaled() => {
                        shutdown.cancel();
                        release.release_after(watch).await
                    }
                };
                if let Err(error) = res {
                    error!(%error, "Agent watch failed");
                }
            }
            .instrument(info_span!("agent_pods")),
        );

        // Block the main thread on the shutdown signal. Once it fires, wait for the background tasks to
        // complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }

    fn pool_config(&self) -> Result<pool::Config> {
        if self.backoff_min_ms > self.backoff_max_ms {
            bail!(
                "--backoff-min-ms ({}) must not exceed --backoff-max-ms ({})",
                self.backoff_min_ms,
                self.backoff_max_ms
            );
        }
        Ok(pool::Config {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            backoff: Backoff {
                min: Duration::from_millis(self.backoff_min_ms),
                max: Duration::from_millis(self.backoff_max_ms),
            },
        })
    }
}
