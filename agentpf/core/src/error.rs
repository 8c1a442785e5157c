use crate::PodKey;
use std::{sync::Arc, time::Duration};

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors produced by the pool and its collaborators.
///
/// Errors are cheap to clone so that a single connection failure can be
/// reported to every caller waiting on the same agent.
#[derive(Clone, Debug, thiserror::Error)]
pub enum Error {
    /// The server is temporarily unreachable; the operation may be retried.
    #[error("unavailable: {0}")]
    Unavailable(Arc<str>),

    /// The server does not implement the requested call.
    #[error("unimplemented: {0}")]
    Unimplemented(Arc<str>),

    #[error("connecting to agent {key} timed out after {timeout:?}")]
    ConnectTimeout { key: PodKey, timeout: Duration },

    #[error("connection to agent {0} was canceled")]
    Canceled(PodKey),

    #[error("timed out after {timeout:?} waiting for an agent for {target}")]
    WaitTimeout { target: String, timeout: Duration },

    #[error("rpc failed with code {code}: {message}")]
    Rpc { code: i32, message: Arc<str> },

    #[error("{0:#}")]
    Other(Arc<anyhow::Error>),
}

// === impl Error ===

impl Error {
    pub fn unavailable(msg: impl Into<Arc<str>>) -> Self {
        Self::Unavailable(msg.into())
    }

    pub fn unimplemented(msg: impl Into<Arc<str>>) -> Self {
        Self::Unimplemented(msg.into())
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    pub fn is_unimplemented(&self) -> bool {
        matches!(self, Self::Unimplemented(_))
    }
}

impl From<anyhow::Error> for Error {
    fn from(error: anyhow::Error) -> Self {
        Self::Other(Arc::new(error))
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Self::Other(Arc::new(error.into()))
    }
}
