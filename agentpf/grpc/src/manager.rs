use crate::{api, status_to_error};
use agentpf_core::{AgentPodInfo, AgentPodsStream, ManagerClient, Result, SessionInfo};
use futures::prelude::*;
use tonic::{
    client::GrpcService,
    codegen::{Body, Bytes, StdError},
};
use tracing::{debug, warn};

/// Watches a session's agents through the manager's gRPC API.
#[derive(Clone, Debug)]
pub struct GrpcManagerClient<T> {
    client: api::manager_client::ManagerClient<T>,
}

// === impl GrpcManagerClient ===

impl<T> GrpcManagerClient<T>
where
    T: GrpcService<tonic::body::Body>,
    T::Error: Into<StdError>,
    T::ResponseBody: Body<Data = Bytes> + Send + 'static,
    <T::ResponseBody as Body>::Error: Into<StdError> + Send,
{
    pub fn new(inner: T) -> Self {
        Self {
            client: api::manager_client::ManagerClient::new(inner),
        }
    }
}

#[async_trait::async_trait]
impl<T> ManagerClient for GrpcManagerClient<T>
where
    T: GrpcService<tonic::body::Body> + Clone + Send + Sync + 'static,
    T::Future: Send,
    T::Error: Into<StdError>,
    T::ResponseBody: Body<Data = Bytes> + Send + 'static,
    <T::ResponseBody as Body>::Error: Into<StdError> + Send,
{
    async fn watch_agent_pods(&self, session: &SessionInfo) -> Result<AgentPodsStream> {
        let rsp = self
            .client
            .clone()
            .watch_agent_pods(api::SessionInfo::from(session))
            .await
            .map_err(status_to_error)?;
        debug!(session = %session.session_id, "Watching agent pods");

        let updates = rsp.into_inner().map(|res| -> Result<Vec<AgentPodInfo>> {
            let snapshot = res.map_err(status_to_error)?;
            let agents = snapshot
                .agents
                .into_iter()
                .filter_map(|agent| match AgentPodInfo::try_from(agent) {
                    Ok(agent) => Some(agent),
                    Err(error) => {
                        warn!(%error, "Ignoring invalid agent");
                        None
                    }
                })
                .collect();
            Ok(agents)
        });
        Ok(Box::pin(updates))
    }
}
