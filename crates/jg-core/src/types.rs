//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;

use jg_protocol::PodName;

use crate::store::Record;

/// Scheduler job identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u32);

impl JobId {
    /// Create a new job ID
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw ID value
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for JobId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// Job status as observed by the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    /// Queued, not yet placed
    Pending,
    /// Placed and running
    Running,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
    /// Cancelled by a user or an administrator
    Cancelled,
    /// Killed for running past its time limit
    ExceedTimeLimit,
    /// Any status this adapter does not know about
    Unknown,
}

impl JobStatus {
    /// Whether the job may still need its tunnels
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Running)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Cancelled => write!(f, "cancelled"),
            JobStatus::ExceedTimeLimit => write!(f, "exceed-time-limit"),
            JobStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// Request for an exec stream into a running step's container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequest {
    /// Uid the exec session runs as
    pub uid: u32,
    pub job_id: JobId,
    pub step_id: u32,
    pub node: String,
    pub command: Vec<String>,
    pub stdin: bool,
    pub tty: bool,
    pub stdout: bool,
    pub stderr: bool,
}

impl ExecRequest {
    /// An interactive TTY request. Stderr is merged into stdout by the TTY,
    /// so it is never requested separately.
    pub fn interactive(uid: u32, pod: &PodName, command: Vec<String>) -> Self {
        Self {
            uid,
            job_id: JobId(pod.job_id),
            step_id: pod.step_id,
            node: pod.node.clone(),
            command,
            stdin: true,
            tty: true,
            stdout: true,
            stderr: false,
        }
    }
}

/// Exec stream allocated by the scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecStream {
    /// URL the remote-exec transport connects to
    pub url: String,
}

/// Registry key of a proxy tunnel
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProxyKey {
    pub job_id: JobId,
    pub node: String,
    pub container_port: u16,
}

impl ProxyKey {
    /// Create a new key
    pub fn new(job_id: JobId, node: impl Into<String>, container_port: u16) -> Self {
        Self {
            job_id,
            node: node.into(),
            container_port,
        }
    }

    /// Backend URL the tunnel forwards to
    pub fn target_addr(&self) -> String {
        format!("http://{}:{}", self.node, self.container_port)
    }
}

impl fmt::Display for ProxyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.job_id, self.node, self.container_port)
    }
}

/// Persisted description of one live proxy tunnel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyMeta {
    #[serde(rename = "new_job_name")]
    pub job_name: String,
    pub job_id: JobId,
    /// Adapter-side listening port
    pub proxy_port: u16,
    pub target_node: String,
    /// `http://node:port`
    pub target_addr: String,
}

impl ProxyMeta {
    /// Build the record for a tunnel on `key` listening on `proxy_port`
    pub fn new(job_name: impl Into<String>, key: &ProxyKey, proxy_port: u16) -> Self {
        Self {
            job_name: job_name.into(),
            job_id: key.job_id,
            proxy_port,
            target_node: key.node.clone(),
            target_addr: key.target_addr(),
        }
    }

    /// Port on the target node, taken from `target_addr`
    pub fn container_port(&self) -> Option<u16> {
        self.target_addr
            .rsplit_once(':')
            .and_then(|(_, port)| port.trim_end_matches('/').parse().ok())
    }
}

impl Record for ProxyMeta {
    type Key = ProxyKey;

    fn key(&self) -> ProxyKey {
        // Records written by the manager always carry a port in target_addr.
        ProxyKey::new(
            self.job_id,
            self.target_node.clone(),
            self.container_port().unwrap_or(0),
        )
    }
}

/// Port bindings captured when a job was submitted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitJobInfo {
    #[serde(rename = "new_job_name")]
    pub job_name: String,
    pub job_id: JobId,
    pub job_type: String,
    pub host_ports: Vec<u16>,
    pub container_ports: Vec<u16>,
}

impl Record for SubmitJobInfo {
    type Key = String;

    fn key(&self) -> String {
        self.job_name.clone()
    }
}
