//! Reverse-HTTP proxy tunnels
//!
//! Each [`ProxyService`] forwards one stable adapter-side port to a
//! container port on whichever node a job landed on. The [`ProxyManager`]
//! owns every live service, persists their metadata and garbage collects
//! tunnels whose job has finished.

mod cleanup;
mod manager;
mod port;
mod probe;
mod service;

pub use cleanup::run_periodic_clean;
pub use manager::ProxyManager;
pub use port::{find_available_port, generate_unused_random_port};
pub use probe::probe_target;
pub use service::ProxyService;

use thiserror::Error;

/// Errors from proxy lifecycle operations
#[derive(Error, Debug)]
pub enum ProxyError {
    /// Every port in the configured range is taken
    #[error("no unused port in range {start}-{end}")]
    NoUnusedPort { start: u16, end: u16 },

    /// The listener could not be bound
    #[error("failed to bind proxy listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Teardown found no tunnel for a node of the job
    #[error("no proxy for job {job_name} on node {node}")]
    NotFound { job_name: String, node: String },

    /// A persisted record cannot be turned back into a tunnel
    #[error("invalid proxy target: {0}")]
    InvalidTarget(String),

    /// The port scan did not run to completion
    #[error("port scan task failed: {0}")]
    PortScan(#[from] tokio::task::JoinError),

    /// The upstream HTTP client could not be built
    #[error("failed to build proxy client: {0}")]
    Client(#[from] reqwest::Error),
}
