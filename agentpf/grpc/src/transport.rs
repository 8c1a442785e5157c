use crate::rt::TokioExecutor;
use futures::prelude::*;
use http::uri::{Authority, Scheme};
use hyper::{body::Incoming, client::conn::http2};
use hyper_util::rt::TokioIo;
use std::{
    pin::Pin,
    task::{Context, Poll},
};
use tokio::io::{AsyncRead, AsyncWrite};
use tonic::codegen::StdError;
use tracing::debug;

/// A gRPC transport over a single HTTP/2 connection on an arbitrary byte
/// stream, such as a Kubernetes port-forward.
///
/// Requests are addressed to `authority` regardless of the URI tonic builds.
#[derive(Clone, Debug)]
pub struct GrpcHttp {
    tx: http2::SendRequest<tonic::body::Body>,
    authority: Authority,
}

// === impl GrpcHttp ===

impl GrpcHttp {
    pub async fn handshake<I>(io: I, authority: Authority) -> anyhow::Result<Self>
    where
        I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, conn) = http2::Builder::new(TokioExecutor)
            .handshake(TokioIo::new(io))
            .await?;
        tokio::spawn(async move {
            if let Err(error) = conn.await {
                debug!(%error, "HTTP/2 connection failed");
            }
        });
        Ok(Self { tx, authority })
    }

    pub fn authority(&self) -> &Authority {
        &self.authority
    }
}

impl tower::Service<http::Request<tonic::body::Body>> for GrpcHttp {
    type Response = http::Response<Incoming>;
    type Error = StdError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.tx.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, req: http::Request<tonic::body::Body>) -> Self::Future {
        let (mut parts, body) = req.into_parts();

        let mut uri = parts.uri.into_parts();
        uri.scheme = Some(Scheme::HTTP);
        uri.authority = Some(self.authority.clone());
        parts.uri = match http::Uri::from_parts(uri) {
            Ok(uri) => uri,
            Err(error) => return future::err(error.into()).boxed(),
        };

        self.tx
            .send_request(http::Request::from_parts(parts, body))
            .map_err(Into::into)
            .boxed()
    }
}
