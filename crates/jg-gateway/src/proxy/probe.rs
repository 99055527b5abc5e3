//! Backend reachability probe

use std::time::Duration;

use tokio::net::TcpStream;

/// Whether a TCP connection to `target` succeeds within `timeout`.
///
/// `target` is either `host:port` or a `http://host:port` URL.
pub async fn probe_target(target: &str, timeout: Duration) -> bool {
    let authority = target
        .strip_prefix("http://")
        .or_else(|| target.strip_prefix("https://"))
        .unwrap_or(target)
        .trim_end_matches('/');

    match tokio::time::timeout(timeout, TcpStream::connect(authority)).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            tracing::debug!("Probe of {} failed: {}", target, e);
            false
        }
        Err(_) => {
            tracing::debug!("Probe of {} timed out after {:?}", target, timeout);
            false
        }
    }
}
