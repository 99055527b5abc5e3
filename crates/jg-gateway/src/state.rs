//! Shared gateway state

use std::sync::Arc;

use jg_core::config::GatewayConfig;
use jg_core::{JsonStore, Scheduler};

use crate::jobs::JobAccess;
use crate::proxy::ProxyManager;
use crate::shell::{ExecError, ExecutorFactory, ShellBridge, ShellSessions, WsExecutorFactory};

/// Everything the gateway's entry points share, built once at startup
pub struct GatewayState {
    /// Configuration
    pub config: GatewayConfig,
    /// Scheduler client
    pub scheduler: Arc<dyn Scheduler>,
    /// Proxy tunnels
    pub proxies: Arc<ProxyManager>,
    /// Live shell sessions
    pub sessions: Arc<ShellSessions>,
    /// Shell stream bridge
    pub bridge: Arc<ShellBridge>,
    /// Job submission and cancellation hooks
    pub jobs: Arc<JobAccess>,
}

impl GatewayState {
    /// Create state using `executors` for shell exec streams
    pub fn new(config: GatewayConfig, scheduler: Arc<dyn Scheduler>, executors: Arc<dyn ExecutorFactory>) -> Self {
        let proxies = Arc::new(ProxyManager::new(
            Arc::clone(&scheduler),
            JsonStore::new(config.proxy_meta_path()),
            config.proxy.clone(),
        ));
        let sessions = Arc::new(ShellSessions::new());
        let bridge = Arc::new(ShellBridge::new(
            Arc::clone(&scheduler),
            executors,
            Arc::clone(&sessions),
            config.shell.clone(),
        ));
        let jobs = Arc::new(JobAccess::new(
            Arc::clone(&scheduler),
            Arc::clone(&proxies),
            JsonStore::new(config.submit_jobs_path()),
            config.proxy.port_range(),
        ));

        Self {
            config,
            scheduler,
            proxies,
            sessions,
            bridge,
            jobs,
        }
    }

    /// Create state that execs over the WebSocket channel protocol
    pub fn with_ws_executor(config: GatewayConfig, scheduler: Arc<dyn Scheduler>) -> Result<Self, ExecError> {
        let executors = Arc::new(WsExecutorFactory::new()?);
        Ok(Self::new(config, scheduler, executors))
    }
}
