use crate::api;
use agentpf_core::{AgentPodInfo, DialRequest, Error, SessionInfo};
use anyhow::{anyhow, bail, Context};
use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};

impl TryFrom<api::AgentPodInfo> for AgentPodInfo {
    type Error = Error;

    fn try_from(agent: api::AgentPodInfo) -> Result<Self, Error> {
        // Managers that predate pod names send agents without an address.
        // These only tell the pool to stop watching, so they aren't validated.
        if agent.pod_name.is_empty() {
            return Ok(Self {
                api_port: u16::try_from(agent.api_port).unwrap_or(0),
                pod_ip: ip_from_bytes(&agent.pod_ip).unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
                pod_name: agent.pod_name,
                namespace: agent.namespace,
                workload: agent.workload,
                intercepted: agent.intercepted,
            });
        }

        let api_port = u16::try_from(agent.api_port)
            .with_context(|| format!("invalid API port {}", agent.api_port))?;
        let pod_ip = ip_from_bytes(&agent.pod_ip)
            .with_context(|| format!("agent {}.{}", agent.pod_name, agent.namespace))?;
        Ok(Self {
            pod_name: agent.pod_name,
            namespace: agent.namespace,
            api_port,
            pod_ip,
            workload: agent.workload,
            intercepted: agent.intercepted,
        })
    }
}

impl From<&AgentPodInfo> for api::AgentPodInfo {
    fn from(agent: &AgentPodInfo) -> Self {
        Self {
            pod_name: agent.pod_name.clone(),
            namespace: agent.namespace.clone(),
            api_port: agent.api_port.into(),
            pod_ip: ip_to_bytes(agent.pod_ip),
            workload: agent.workload.clone(),
            intercepted: agent.intercepted,
        }
    }
}

impl TryFrom<api::DialRequest> for DialRequest {
    type Error = Error;

    fn try_from(dial: api::DialRequest) -> Result<Self, Error> {
        let ip = ip_from_bytes(&dial.destination_ip).context("invalid dial destination")?;
        let port = u16::try_from(dial.destination_port)
            .map_err(|_| anyhow!("invalid dial port {}", dial.destination_port))?;
        Ok(Self {
            conn_id: dial.conn_id,
            destination: SocketAddr::new(ip, port),
            roundtrip_latency: nanos(dial.roundtrip_latency),
            dial_timeout: nanos(dial.dial_timeout),
        })
    }
}

impl From<&DialRequest> for api::DialRequest {
    fn from(dial: &DialRequest) -> Self {
        Self {
            conn_id: dial.conn_id.clone(),
            destination_ip: ip_to_bytes(dial.destination.ip()),
            destination_port: dial.destination.port().into(),
            roundtrip_latency: i64::try_from(dial.roundtrip_latency.as_nanos()).unwrap_or(i64::MAX),
            dial_timeout: i64::try_from(dial.dial_timeout.as_nanos()).unwrap_or(i64::MAX),
        }
    }
}

impl From<&SessionInfo> for api::SessionInfo {
    fn from(session: &SessionInfo) -> Self {
        Self {
            session_id: session.session_id.clone(),
        }
    }
}

fn ip_from_bytes(bytes: &[u8]) -> anyhow::Result<IpAddr> {
    if let Ok(v4) = <[u8; 4]>::try_from(bytes) {
        return Ok(IpAddr::from(v4));
    }
    if let Ok(v6) = <[u8; 16]>::try_from(bytes) {
        return Ok(IpAddr::from(v6));
    }
    bail!("IP address must be 4 or 16 bytes, not {}", bytes.len())
}

fn ip_to_bytes(ip: IpAddr) -> Vec<u8> {
    match ip {
        IpAddr::V4(ip) => ip.octets().to_vec(),
        IpAddr::V6(ip) => ip.octets().to_vec(),
    }
}

/// Negative durations are treated as zero.
fn nanos(n: i64) -> Duration {
    Duration::from_nanos(u64::try_from(n).unwrap_or(0))
}
