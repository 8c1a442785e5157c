//! Messages and client stubs of the `agentpf.v1` protocol, as described by
//! `proto/agentpf.proto`.

/// Identifies the client session on whose behalf a call is made.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SessionInfo {
    #[prost(string, tag = "1")]
    pub session_id: ::prost::alloc::string::String,
}

/// A traffic agent pod known to the manager.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AgentPodInfo {
    #[prost(string, tag = "1")]
    pub pod_name: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub namespace: ::prost::alloc::string::String,
    #[prost(int32, tag = "3")]
    pub api_port: i32,
    /// 4 bytes for IPv4, 16 bytes for IPv6.
    #[prost(bytes = "vec", tag = "4")]
    pub pod_ip: ::prost::alloc::vec::Vec<u8>,
    #[prost(string, tag = "5")]
    pub workload: ::prost::alloc::string::String,
    #[prost(bool, tag = "6")]
    pub intercepted: bool,
}

/// The complete set of agents of a session at one point in time.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AgentPodInfoSnapshot {
    #[prost(message, repeated, tag = "1")]
    pub agents: ::prost::alloc::vec::Vec<AgentPodInfo>,
}

/// Asks the client to dial a destination and attach the connection to the
/// tunnel identified by `conn_id`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DialRequest {
    #[prost(bytes = "bytes", tag = "1")]
    pub conn_id: ::prost::bytes::Bytes,
    #[prost(bytes = "vec", tag = "2")]
    pub destination_ip: ::prost::alloc::vec::Vec<u8>,
    #[prost(uint32, tag = "3")]
    pub destination_port: u32,
    /// Nanoseconds.
    #[prost(int64, tag = "4")]
    pub roundtrip_latency: i64,
    /// Nanoseconds.
    #[prost(int64, tag = "5")]
    pub dial_timeout: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TunnelMessage {
    #[prost(bytes = "bytes", tag = "1")]
    pub payload: ::prost::bytes::Bytes,
}

pub mod manager_client {
    use tonic::codegen::*;

    #[derive(Debug, Clone)]
    pub struct ManagerClient<T> {
        inner: tonic::client::Grpc<T>,
    }

    impl<T> ManagerClient<T>
    where
        T: tonic::client::GrpcService<tonic::body::Body>,
        T::Error: Into<StdError>,
        T::ResponseBody: Body<Data = Bytes> + std::marker::Send + 'static,
        <T::ResponseBody as Body>::Error: Into<StdError> + std::marker::Send,
    {
        pub fn new(inner: T) -> Self {
            let inner = tonic::client::Grpc::new(inner);
            Self { inner }
        }

        /// Streams a snapshot of the session's agents whenever it changes.
        pub async fn watch_agent_pods(
            &mut self,
            request: impl tonic::IntoRequest<super::SessionInfo>,
        ) -> std::result::Result<
            tonic::Response<tonic::codec::Streaming<super::AgentPodInfoSnapshot>>,
            tonic::Status,
        > {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::unknown(format!("Service was not ready: {}", e.into()))
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static("/agentpf.v1.Manager/WatchAgentPods");
            let mut req = request.into_request();
            req.extensions_mut()
                .insert(GrpcMethod::new("agentpf.v1.Manager", "WatchAgentPods"));
            self.inner.server_streaming(req, path, codec).await
        }
    }
}

pub mod agent_client {
    use tonic::codegen::*;

    #[derive(Debug, Clone)]
    pub struct AgentClient<T> {
        inner: tonic::client::Grpc<T>,
    }

    impl<T> AgentClient<T>
    where
        T: tonic::client::GrpcService<tonic::body::Body>,
        T::Error: Into<StdError>,
        T::ResponseBody: Body<Data = Bytes> + std::marker::Send + 'static,
        <T::ResponseBody as Body>::Error: Into<StdError> + std::marker::Send,
    {
        pub fn new(inner: T) -> Self {
            let inner = tonic::client::Grpc::new(inner);
            Self { inner }
        }

        /// Opens a bidirectional tunnel.
        pub async fn tunnel(
            &mut self,
            request: impl tonic::IntoStreamingRequest<Message = super::TunnelMessage>,
        ) -> std::result::Result<
            tonic::Response<tonic::codec::Streaming<super::TunnelMessage>>,
            tonic::Status,
        > {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::unknown(format!("Service was not ready: {}", e.into()))
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static("/agentpf.v1.Agent/Tunnel");
            let mut req = request.into_streaming_request();
            req.extensions_mut()
                .insert(GrpcMethod::new("agentpf.v1.Agent", "Tunnel"));
            self.inner.streaming(req, path, codec).await
        }

        /// Streams requests to dial destinations on behalf of the agent.
        pub async fn watch_dial(
            &mut self,
            request: impl tonic::IntoRequest<super::SessionInfo>,
        ) -> std::result::Result<
            tonic::Response<tonic::codec::Streaming<super::DialRequest>>,
            tonic::Status,
        > {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::unknown(format!("Service was not ready: {}", e.into()))
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static("/agentpf.v1.Agent/WatchDial");
            let mut req = request.into_request();
            req.extensions_mut()
                .insert(GrpcMethod::new("agentpf.v1.Agent", "WatchDial"));
            self.inner.server_streaming(req, path, codec).await
        }
    }
}
