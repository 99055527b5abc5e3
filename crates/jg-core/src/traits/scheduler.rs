//! Scheduler client trait
//!
//! The gateway never talks to the cluster scheduler directly; it consumes
//! these three calls from whatever RPC client the adapter is built with.

use async_trait::async_trait;

use crate::error::SchedulerError;
use crate::types::{ExecRequest, ExecStream, JobId, JobStatus};

/// The subset of the scheduler client used by the gateway
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Allocate an exec stream into a running step's container
    async fn exec_in_container(&self, request: &ExecRequest) -> Result<ExecStream, SchedulerError>;

    /// Current status of a job
    async fn query_job_status(&self, job_id: JobId) -> Result<JobStatus, SchedulerError>;

    /// Nodes the job's primary step was placed on
    async fn query_job_topology(&self, job_id: JobId) -> Result<Vec<String>, SchedulerError>;
}
