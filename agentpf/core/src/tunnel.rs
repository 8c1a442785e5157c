use crate::Result;
use bytes::Bytes;
use futures::prelude::*;
use std::{fmt, net::SocketAddr, pin::Pin, time::Duration};
use tokio::sync::mpsc;

/// Messages received from the far side of a tunnel.
pub type TunnelStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send + 'static>>;

/// Dial requests received from an agent.
pub type DialStream = Pin<Box<dyn Stream<Item = Result<DialRequest>> + Send + 'static>>;

/// A bidirectional message stream to an agent.
///
/// Messages are written to `sender` and read from `receiver`. Any release
/// hooks registered on the tunnel run when it is dropped.
pub struct Tunnel {
    pub sender: mpsc::Sender<Bytes>,
    pub receiver: TunnelStream,
    releases: Vec<Release>,
}

/// A request from an agent asking the client to dial `destination` and
/// attach the resulting connection to the tunnel identified by `conn_id`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DialRequest {
    pub conn_id: Bytes,
    pub destination: SocketAddr,
    pub roundtrip_latency: Duration,
    pub dial_timeout: Duration,
}

struct Release(Option<Box<dyn FnOnce() + Send + Sync>>);

/// Holds a split tunnel's release hooks.
#[must_use]
pub struct ReleaseGuard(Vec<Release>);

// === impl Tunnel ===

impl Tunnel {
    pub fn new(sender: mpsc::Sender<Bytes>, receiver: TunnelStream) -> Self {
        Self {
            sender,
            receiver,
            releases: Vec::new(),
        }
    }

    /// Registers a function to be invoked when the tunnel is dropped.
    pub fn on_release(mut self, release: impl FnOnce() + Send + Sync + 'static) -> Self {
        self.releases.push(Release(Some(Box::new(release))));
        self
    }

    pub fn send(&self, msg: Bytes) -> impl Future<Output = Result<()>> + Send + '_ {
        let sender = &self.sender;
        async move {
            sender
                .send(msg)
                .await
                .map_err(|_| anyhow::anyhow!("tunnel closed").into())
        }
    }

    /// Returns the next message, or `None` when the far side has closed the
    /// tunnel.
    pub async fn recv(&mut self) -> Option<Result<Bytes>> {
        self.receiver.next().await
    }

    /// Splits the tunnel into its halves. The tunnel's release hooks run
    /// when the returned guard is dropped.
    pub fn into_split(self) -> (mpsc::Sender<Bytes>, TunnelStream, ReleaseGuard) {
        (self.sender, self.receiver, ReleaseGuard(self.releases))
    }
}

impl fmt::Debug for Tunnel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tunnel")
            .field("closed", &self.sender.is_closed())
            .field("releases", &self.releases.len())
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for ReleaseGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ReleaseGuard").field(&self.0.len()).finish()
    }
}

// === impl Release ===

impl Drop for Release {
    fn drop(&mut self) {
        if let Some(release) = self.0.take() {
            release();
        }
    }
}
