//! tonic service for the container shell stream

use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status, Streaming};
use tracing::warn;

use jg_protocol::proto::container_shell_server::{ContainerShell, ContainerShellServer};
use jg_protocol::proto::{ShellRequest, ShellResponse};

use crate::shell::ShellBridge;

/// Messages buffered towards a slow client before the forwarder waits
const OUTBOUND_BUFFER: usize = 64;

pub type ShellResponseStream = Pin<Box<dyn Stream<Item = Result<ShellResponse, Status>> + Send + 'static>>;

/// Serves `jobgate.v1.ContainerShell`
pub struct ContainerShellService {
    bridge: Arc<ShellBridge>,
    shutdown: CancellationToken,
}

impl ContainerShellService {
    /// Sessions opened through this service end when `shutdown` fires
    pub fn new(bridge: Arc<ShellBridge>, shutdown: CancellationToken) -> Self {
        Self { bridge, shutdown }
    }

    pub fn into_server(self) -> ContainerShellServer<Self> {
        ContainerShellServer::new(self)
    }
}

#[tonic::async_trait]
impl ContainerShell for ContainerShellService {
    type ShellStream = ShellResponseStream;

    async fn shell(
        &self,
        request: Request<Streaming<ShellRequest>>,
    ) -> Result<Response<Self::ShellStream>, Status> {
        let peer = request.remote_addr();
        let session = self.bridge.open(request.into_inner()).await.map_err(|e| {
            warn!("Rejected shell stream from {:?}: {}", peer, e);
            Status::from(e)
        })?;

        let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
        let bridge = Arc::clone(&self.bridge);
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move { bridge.run(session, tx, shutdown).await });

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(Response::new(Box::pin(stream)))
    }
}
