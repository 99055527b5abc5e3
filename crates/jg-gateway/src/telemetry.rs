//! Tracing subscriber setup
//!
//! The gateway ships as a library; the binary embedding it installs the
//! subscriber once before building [`GatewayState`](crate::GatewayState).

use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter from `RUST_LOG`, falling back to `default_level`
pub fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Install the global fmt subscriber. Fails if one is already installed.
///
/// ```no_run
/// use std::sync::Arc;
///
/// use jg_core::config::GatewayConfig;
/// use jg_core::Scheduler;
/// use jg_gateway::telemetry::init_tracing;
/// use jg_gateway::{GatewayServer, GatewayState};
/// use tokio_util::sync::CancellationToken;
///
/// async fn serve(config: GatewayConfig, scheduler: Arc<dyn Scheduler>) -> anyhow::Result<()> {
///     init_tracing("info")?;
///
///     let state = Arc::new(GatewayState::with_ws_executor(config, scheduler)?);
///     let shutdown = CancellationToken::new();
///     tokio::spawn({
///         let shutdown = shutdown.clone();
///         async move {
///             let _ = tokio::signal::ctrl_c().await;
///             shutdown.cancel();
///         }
///     });
///
///     GatewayServer::new(state).run(shutdown).await
/// }
/// ```
pub fn init_tracing(default_level: &str) -> Result<(), TryInitError> {
    tracing_subscriber::registry()
        .with(env_filter(default_level))
        .with(tracing_subscriber::fmt::layer())
        .try_init()
}
