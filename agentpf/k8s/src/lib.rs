#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Dials traffic agents through the Kubernetes port-forward API.

use agentpf_core::{AgentDialer, AgentPodInfo, Connection, Result, SessionInfo};
use agentpf_grpc::{GrpcAgentClient, GrpcHttp};
use anyhow::Context;
use http::uri::Authority;
use k8s_openapi::api::core::v1::Pod;
use kube::api::Portforwarder;
use std::{sync::Arc, time::Duration};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, debug_span, info, Instrument};

/// Port-forward upgrades occasionally fail with a protocol switch error
/// while the API server is busy.
const PROTOCOL_SWITCH_RETRY: Duration = Duration::from_secs(1);

/// Connects to each agent's gRPC API over a port-forward to the agent's pod.
///
/// Dials are not bounded here; the pool enforces its connect timeout.
#[derive(Clone)]
pub struct PortForwardDialer {
    client: kube::Client,
    session: SessionInfo,
}

// === impl PortForwardDialer ===

impl PortForwardDialer {
    pub fn new(client: kube::Client, session: SessionInfo) -> Self {
        Self { client, session }
    }

    async fn port_forward(&self, agent: &AgentPodInfo) -> anyhow::Result<Portforwarder> {
        let api = kube::Api::<Pod>::namespaced(self.client.clone(), &agent.namespace);
        loop {
            match api.portforward(&agent.pod_name, &[agent.api_port]).await {
                Err(kube::Error::UpgradeConnection(
                    kube::client::UpgradeConnectionError::ProtocolSwitch(status),
                )) => {
                    info!(?status, pod = %agent.key(), "Flakey port forward; retrying");
                    time::sleep(PROTOCOL_SWITCH_RETRY).await;
                }
                res => {
                    return res.with_context(|| format!("port-forward to agent {}", agent.key()))
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl AgentDialer for PortForwardDialer {
    async fn dial(&self, agent: &AgentPodInfo) -> Result<Connection> {
        let authority = authority(agent)?;
        let mut pf = self.port_forward(agent).await?;
        let Some(io) = pf.take_stream(agent.api_port) else {
            pf.abort();
            return Err(anyhow::anyhow!(
                "port-forward to agent {} has no stream for port {}",
                agent.key(),
                agent.api_port
            )
            .into());
        };

        let http = match GrpcHttp::handshake(io, authority).await {
            Ok(http) => http,
            Err(error) => {
                pf.abort();
                return Err(error
                    .context(format!("HTTP/2 handshake with agent {}", agent.key()))
                    .into());
            }
        };
        debug!(pod = %agent.key(), port = agent.api_port, "Port-forward established");

        // The forward runs until the pool tears the connection down.
        let closed = CancellationToken::new();
        tokio::spawn({
            let closed = closed.clone();
            async move {
                closed.cancelled().await;
                pf.abort();
                debug!("Port-forward closed");
            }
            .instrument(debug_span!("portforward", pod = %agent.key()))
        });

        let client = GrpcAgentClient::new(http, self.session.clone());
        Ok(Connection::new(Arc::new(client)).with_teardown(move || closed.cancel()))
    }
}

/// Requests to an agent are addressed to `<pod>.<namespace>:<port>`.
fn authority(agent: &AgentPodInfo) -> anyhow::Result<Authority> {
    format!("{}:{}", agent.key(), agent.api_port)
        .parse()
        .with_context(|| format!("invalid authority for agent {}", agent.key()))
}
