use crate::{api, status_to_error, GrpcHttp};
use agentpf_core::{AgentClient, DialRequest, DialStream, Result, SessionInfo, Tunnel};
use bytes::Bytes;
use futures::prelude::*;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{
    client::GrpcService,
    codegen::{Body, StdError},
    metadata::{Ascii, MetadataValue},
};

/// The metadata entry that identifies the session a tunnel belongs to.
pub const SESSION_ID_HEADER: &str = "agentpf-session-id";

const TUNNEL_BUFFER: usize = 16;

/// A client for one agent's gRPC API.
///
/// Tunnels are tagged with the session the client was created for.
#[derive(Clone, Debug)]
pub struct GrpcAgentClient<T = GrpcHttp> {
    client: api::agent_client::AgentClient<T>,
    session: SessionInfo,
}

// === impl GrpcAgentClient ===

impl<T> GrpcAgentClient<T>
where
    T: GrpcService<tonic::body::Body>,
    T::Error: Into<StdError>,
    T::ResponseBody: Body<Data = Bytes> + Send + 'static,
    <T::ResponseBody as Body>::Error: Into<StdError> + Send,
{
    pub fn new(inner: T, session: SessionInfo) -> Self {
        Self {
            client: api::agent_client::AgentClient::new(inner),
            session,
        }
    }
}

#[async_trait::async_trait]
impl<T> AgentClient for GrpcAgentClient<T>
where
    T: GrpcService<tonic::body::Body> + Clone + Send + Sync + 'static,
    T::Future: Send,
    T::Error: Into<StdError>,
    T::ResponseBody: Body<Data = Bytes> + Send + 'static,
    <T::ResponseBody as Body>::Error: Into<StdError> + Send,
{
    async fn tunnel(&self) -> Result<Tunnel> {
        let session_id = self
            .session
            .session_id
            .parse::<MetadataValue<Ascii>>()
            .map_err(|_| anyhow::anyhow!("invalid session ID {:?}", self.session.session_id))?;

        let (tx, rx) = mpsc::channel::<Bytes>(TUNNEL_BUFFER);
        let outbound = ReceiverStream::new(rx).map(|payload| api::TunnelMessage { payload });
        let mut req = tonic::Request::new(outbound);
        req.metadata_mut().insert(SESSION_ID_HEADER, session_id);

        let rsp = self
            .client
            .clone()
            .tunnel(req)
            .await
            .map_err(status_to_error)?;
        let inbound = rsp
            .into_inner()
            .map(|res| res.map(|msg| msg.payload).map_err(status_to_error));
        Ok(Tunnel::new(tx, Box::pin(inbound)))
    }

    async fn watch_dial(&self, session: &SessionInfo) -> Result<DialStream> {
        let rsp = self
            .client
            .clone()
            .watch_dial(api::SessionInfo::from(session))
            .await
            .map_err(status_to_error)?;
        let dials = rsp
            .into_inner()
            .map(|res| res.map_err(status_to_error).and_then(DialRequest::try_from));
        Ok(Box::pin(dials))
    }
}
