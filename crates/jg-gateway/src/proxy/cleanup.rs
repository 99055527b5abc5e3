//! Periodic garbage collection of proxy tunnels

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::manager::ProxyManager;

/// Run the proxy cleaner.
///
/// Every `period` the manager drops tunnels whose job has finished. The
/// first pass runs one period after start, so a freshly recovered pool is
/// not collected before the scheduler has caught up.
///
/// # Arguments
///
/// * `manager` - The proxy manager to clean
/// * `period` - Time between passes
/// * `cancel` - Cancellation token for shutdown
pub async fn run_periodic_clean(manager: Arc<ProxyManager>, period: Duration, cancel: CancellationToken) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::info!("Starting proxy cleaner (interval: {:?})", period);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let removed = manager.clean_invalid_proxies().await;
                if removed > 0 {
                    tracing::debug!("Proxy cleaner removed {} tunnels", removed);
                }
            }
            _ = cancel.cancelled() => {
                tracing::info!("Proxy cleaner shutting down");
                break;
            }
        }
    }
}
