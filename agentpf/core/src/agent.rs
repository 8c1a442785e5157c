use std::{fmt, net::IpAddr, sync::Arc};

/// Describes a traffic agent pod as reported by the manager.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentPodInfo {
    pub pod_name: String,
    pub namespace: String,
    pub api_port: u16,
    pub pod_ip: IpAddr,
    pub workload: String,
    pub intercepted: bool,
}

/// Identifies an agent pod as `<pod>.<namespace>`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PodKey(Arc<str>);

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct SessionInfo {
    pub session_id: String,
}

// === impl AgentPodInfo ===

impl AgentPodInfo {
    pub fn key(&self) -> PodKey {
        PodKey::new(&self.pod_name, &self.namespace)
    }

    /// Agents that predate the pod feed report no pod name and can't be
    /// addressed individually.
    pub fn has_identity(&self) -> bool {
        !self.pod_name.is_empty()
    }
}

// === impl PodKey ===

impl PodKey {
    pub fn new(pod_name: &str, namespace: &str) -> Self {
        Self(format!("{pod_name}.{namespace}").into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// === impl SessionInfo ===

impl SessionInfo {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
        }
    }
}
