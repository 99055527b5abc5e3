//! Gateway configuration

use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::duration_secs;
use crate::error::ConfigError;

/// Configuration for the job access gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Address the gRPC shell service binds to
    pub bind_address: String,

    /// Directory holding the persisted record files
    pub data_dir: PathBuf,

    /// Reverse proxy pool settings
    pub proxy: ProxyConfig,

    /// Interactive shell settings
    pub shell: ShellConfig,

    /// Submitted-job bookkeeping
    pub jobs: JobsConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:50051".to_string(),
            data_dir: super::default_data_dir(),
            proxy: ProxyConfig::default(),
            shell: ShellConfig::default(),
            jobs: JobsConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Path of the proxy metadata file
    pub fn proxy_meta_path(&self) -> PathBuf {
        self.data_dir.join(&self.proxy.meta_file)
    }

    /// Path of the submitted-job file
    pub fn submit_jobs_path(&self) -> PathBuf {
        self.data_dir.join(&self.jobs.submit_file)
    }

    /// Reject settings the gateway cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.proxy.port_range_start == 0 {
            return Err(ConfigError::Invalid(
                "proxy.port_range_start must be non-zero".to_string(),
            ));
        }
        if self.proxy.port_range_start > self.proxy.port_range_end {
            return Err(ConfigError::Invalid(format!(
                "proxy port range {}..={} is empty",
                self.proxy.port_range_start, self.proxy.port_range_end
            )));
        }
        if self.shell.command.is_empty() {
            return Err(ConfigError::Invalid("shell.command is empty".to_string()));
        }
        Ok(())
    }
}

/// Reverse proxy pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// First adapter-side port a proxy may listen on
    pub port_range_start: u16,

    /// Last adapter-side port a proxy may listen on
    pub port_range_end: u16,

    /// Host the proxy listeners bind to
    pub bind_host: String,

    /// Per-request read budget
    #[serde(with = "duration_secs")]
    pub read_timeout: Duration,

    /// Per-request write budget
    #[serde(with = "duration_secs")]
    pub write_timeout: Duration,

    /// How long idle backend connections are kept
    #[serde(with = "duration_secs")]
    pub idle_timeout: Duration,

    /// Graceful shutdown budget before listeners are force-closed
    #[serde(with = "duration_secs")]
    pub shutdown_timeout: Duration,

    /// Interval between garbage collection passes
    #[serde(with = "duration_secs")]
    pub clean_interval: Duration,

    /// Only recover tunnels whose target answers a TCP connect
    pub probe_before_recover: bool,

    /// Connect budget for the reachability probe
    #[serde(with = "duration_secs")]
    pub probe_timeout: Duration,

    /// File name of the proxy metadata store inside `data_dir`
    pub meta_file: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            port_range_start: 30000,
            port_range_end: 65535,
            bind_host: "0.0.0.0".to_string(),
            read_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(5),
            clean_interval: Duration::from_secs(60),
            probe_before_recover: false,
            probe_timeout: Duration::from_secs(2),
            meta_file: "proxy_meta.json".to_string(),
        }
    }
}

impl ProxyConfig {
    /// Adapter-side port range
    pub fn port_range(&self) -> RangeInclusive<u16> {
        self.port_range_start..=self.port_range_end
    }
}

/// Interactive shell configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    /// How long to wait for the client's `Connect`
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,

    /// Command started in the container
    pub command: Vec<String>,

    /// Uid the exec session is requested for
    pub uid: u32,

    /// Capacity of the in-memory stdin/stdout pipes, in bytes
    pub pipe_capacity: usize,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            command: vec!["/bin/sh".to_string()],
            uid: 0,
            pipe_capacity: 64 * 1024,
        }
    }
}

/// Submitted-job bookkeeping configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    /// File name of the submitted-job store inside `data_dir`
    pub submit_file: String,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            submit_file: "submit_jobs.json".to_string(),
        }
    }
}
