//! Gateway server lifecycle

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tonic::transport::server::TcpIncoming;
use tonic::transport::Server;

use crate::grpc::ContainerShellService;
use crate::state::GatewayState;

/// Runs the shell RPC endpoint and the proxy pool until shutdown
pub struct GatewayServer {
    state: Arc<GatewayState>,
}

impl GatewayServer {
    pub fn new(state: Arc<GatewayState>) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &Arc<GatewayState> {
        &self.state
    }

    /// Bind the configured address and serve until `shutdown` fires
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        self.validate()?;
        let addr: SocketAddr = self
            .state
            .config
            .bind_address
            .parse()
            .with_context(|| format!("Invalid bind address {:?}", self.state.config.bind_address))?;
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;

        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener.
    ///
    /// Persisted proxies are recovered and the cleaner started before the
    /// first RPC is accepted. On shutdown the cleaner stops, live shell
    /// sessions are cancelled and proxy listeners closed; their records stay
    /// on disk for the next start.
    pub async fn run_with_listener(&self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        self.validate()?;
        self.serve(listener, shutdown).await
    }

    fn validate(&self) -> Result<()> {
        self.state
            .config
            .validate()
            .context("Invalid gateway configuration")
    }

    async fn serve(&self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        let local_addr = listener.local_addr().context("Failed to read listener address")?;
        let proxies = &self.state.proxies;

        proxies.recover_proxies().await;
        proxies.start_periodic_clean(self.state.config.proxy.clean_interval);

        let incoming = TcpIncoming::from_listener(listener, true, None)
            .map_err(|e| anyhow::anyhow!("Failed to accept on {}: {}", local_addr, e))?;
        let service = ContainerShellService::new(Arc::clone(&self.state.bridge), shutdown.clone());

        tracing::info!("Gateway listening on {}", local_addr);

        let signal = {
            let shutdown = shutdown.clone();
            async move { shutdown.cancelled().await }
        };
        let served = Server::builder()
            .add_service(service.into_server())
            .serve_with_incoming_shutdown(incoming, signal)
            .await;

        tracing::info!("Gateway shutting down...");
        proxies.stop_periodic_clean().await;
        let cancelled = self.state.sessions.cancel_all();
        if cancelled > 0 {
            tracing::info!("Cancelled {} shell sessions", cancelled);
        }
        proxies.shutdown().await;

        served.context("gRPC server failed")
    }
}
