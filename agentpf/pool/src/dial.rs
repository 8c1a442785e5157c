use agentpf_core::{DialBridge, DialRequest, DialStream, Provider, Result, SessionInfo};
use bytes::{Bytes, BytesMut};
use futures::prelude::*;
use std::{sync::Arc, time::Duration};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    time,
};
use tracing::{debug, debug_span, Instrument};

const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(5);
const READ_BUFFER_SIZE: usize = 32 * 1024;

/// Fulfills an agent's dial requests by connecting to the requested
/// destination over TCP and piping it through a new tunnel.
///
/// The first message on each tunnel carries the request's connection ID so
/// the agent can pair the tunnel with the connection it is holding.
#[derive(Clone, Debug, Default)]
pub struct TcpDialBridge(());

// === impl TcpDialBridge ===

impl TcpDialBridge {
    pub fn new() -> Self {
        Self(())
    }
}

#[async_trait::async_trait]
impl DialBridge for TcpDialBridge {
    async fn run(
        &self,
        provider: Arc<dyn Provider>,
        mut dials: DialStream,
        session: SessionInfo,
    ) -> Result<()> {
        while let Some(dial) = dials.next().await {
            let dial = dial?;
            let span = debug_span!(
                "dial",
                dst = %dial.destination,
                latency = ?dial.roundtrip_latency
            );
            let provider = provider.clone();
            tokio::spawn(
                async move {
                    match bridge(&*provider, dial).await {
                        Ok(()) => debug!("Connection closed"),
                        Err(error) => debug!(%error, "Dial failed"),
                    }
                }
                .instrument(span),
            );
        }
        debug!(session = %session.session_id, "Dial requests ended");
        Ok(())
    }
}

async fn bridge(provider: &dyn Provider, dial: DialRequest) -> Result<()> {
    let tunnel = provider.tunnel().await?;
    tunnel.send(dial.conn_id.clone()).await?;

    let timeout = if dial.dial_timeout.is_zero() {
        DEFAULT_DIAL_TIMEOUT
    } else {
        dial.dial_timeout
    };
    let conn = time::timeout(timeout, TcpStream::connect(dial.destination))
        .await
        .map_err(|_| anyhow::anyhow!("dialing {} timed out after {timeout:?}", dial.destination))??;
    debug!("Connected");

    let (mut read, mut write) = conn.into_split();
    let (sender, mut receiver, _release) = tunnel.into_split();

    let outbound = async move {
        let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);
        loop {
            buf.reserve(READ_BUFFER_SIZE);
            if read.read_buf(&mut buf).await? == 0 {
                break;
            }
            sender
                .send(buf.split().freeze())
                .await
                .map_err(|_| anyhow::anyhow!("tunnel closed"))?;
        }
        // Dropping the sender half-closes the tunnel.
        drop(sender);
        Ok::<_, agentpf_core::Error>(())
    };

    let inbound = async move {
        while let Some(msg) = receiver.next().await {
            let msg: Bytes = msg?;
            write.write_all(&msg).await?;
        }
        write.shutdown().await?;
        Ok::<_, agentpf_core::Error>(())
    };

    tokio::try_join!(outbound, inbound)?;
    Ok(())
}
