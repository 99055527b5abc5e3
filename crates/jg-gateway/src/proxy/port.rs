//! Adapter-side port allocation

use std::collections::HashSet;
use std::net::TcpListener;
use std::ops::RangeInclusive;

use rand::Rng;

use super::ProxyError;

/// Random draws before falling back to a sweep of the range
const RANDOM_ATTEMPTS: usize = 64;

fn exhausted(range: &RangeInclusive<u16>) -> ProxyError {
    ProxyError::NoUnusedPort {
        start: *range.start(),
        end: *range.end(),
    }
}

/// First port in `range` that can be bound on `host`.
///
/// Availability is tested with a throwaway listener that is dropped before
/// returning, so another process may still grab the port first. Ports in
/// `skip` are already owned by live proxies and are not tried. The scan
/// runs on the blocking pool.
pub async fn find_available_port(
    host: &str,
    range: RangeInclusive<u16>,
    skip: &HashSet<u16>,
) -> Result<u16, ProxyError> {
    let host = host.to_string();
    let skip = skip.clone();
    tokio::task::spawn_blocking(move || scan_for_port(&host, range, &skip)).await?
}

fn scan_for_port(host: &str, range: RangeInclusive<u16>, skip: &HashSet<u16>) -> Result<u16, ProxyError> {
    range
        .clone()
        .filter(|port| !skip.contains(port))
        .find(|&port| TcpListener::bind((host, port)).is_ok())
        .ok_or_else(|| exhausted(&range))
}

/// A port in `range` that is not in `used`.
///
/// Draws randomly first, then sweeps the range so a nearly full range still
/// yields its last free port.
pub fn generate_unused_random_port<R: Rng>(
    range: RangeInclusive<u16>,
    used: &HashSet<u16>,
    rng: &mut R,
) -> Result<u16, ProxyError> {
    if range.is_empty() {
        return Err(exhausted(&range));
    }

    for _ in 0..RANDOM_ATTEMPTS {
        let port = rng.gen_range(range.clone());
        if !used.contains(&port) {
            return Ok(port);
        }
    }

    range
        .clone()
        .find(|port| !used.contains(port))
        .ok_or_else(|| exhausted(&range))
}
