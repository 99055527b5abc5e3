//! jg-gateway: Interactive and network access to scheduled job containers
//!
//! The gateway bridges client shell streams to exec sessions inside running
//! job containers, and keeps a pool of reverse-HTTP proxies that forward
//! stable adapter ports to container ports on whichever node a job landed
//! on. Proxy tunnels are persisted, recovered on restart and collected once
//! their job has finished.

pub mod grpc;
pub mod jobs;
pub mod proxy;
pub mod server;
pub mod shell;
pub mod state;
pub mod telemetry;

pub use grpc::ContainerShellService;
pub use jobs::{JobAccess, JobAccessError};
pub use proxy::{ProxyError, ProxyManager, ProxyService};
pub use server::GatewayServer;
pub use shell::{ShellBridge, ShellError, ShellSessions};
pub use state::GatewayState;
