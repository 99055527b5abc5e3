//! Remote exec transport abstraction
//!
//! The bridge only needs "pump these pipes into that container until it is
//! done". The concrete transport is picked by an [`ExecutorFactory`] from the
//! URL the scheduler hands out.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

use super::size_queue::TerminalSizeQueue;

/// Errors from a remote exec stream
#[derive(Error, Debug)]
pub enum ExecError {
    /// The exec URL cannot be used by this transport
    #[error("invalid exec url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// TLS setup failed
    #[error("TLS setup failed: {0}")]
    Tls(#[from] native_tls::Error),

    /// Could not open or keep the transport
    #[error("exec transport error: {0}")]
    Transport(#[from] Box<tokio_tungstenite::tungstenite::Error>),

    /// The remote side reported a failure
    #[error("remote command failed: {0}")]
    Remote(String),

    /// Local pipe I/O failed
    #[error("pipe I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The session was cancelled before the remote side finished
    #[error("exec stream cancelled")]
    Cancelled,
}

/// Pipes and settings for one exec stream
pub struct StreamOptions {
    /// Bytes to feed the remote process
    pub stdin: Option<Box<dyn AsyncRead + Send + Unpin>>,
    /// Sink for remote output (stderr is merged here under a TTY)
    pub stdout: Option<Box<dyn AsyncWrite + Send + Unpin>>,
    /// Whether the remote side allocated a TTY
    pub tty: bool,
    /// Resize events for the TTY
    pub resize: Option<Arc<TerminalSizeQueue>>,
}

/// A remote exec session bound to one URL
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Pump the given pipes until the remote side closes, fails, or `cancel` fires.
    ///
    /// The stdout writer is dropped when this returns, which is how readers of
    /// the other end of the pipe learn the stream is over.
    async fn stream(&self, options: StreamOptions, cancel: CancellationToken)
        -> Result<(), ExecError>;
}

/// Builds executors for exec URLs handed out by the scheduler
pub trait ExecutorFactory: Send + Sync {
    fn create(&self, url: &str) -> Result<Box<dyn RemoteExecutor>, ExecError>;
}
