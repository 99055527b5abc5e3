//! Shell stream bridge
//!
//! Bridges a client's bidirectional shell stream to an interactive exec
//! session inside a running job container.

mod bridge;
mod executor;
mod sessions;
mod size_queue;
mod utf8;
mod ws;

pub use bridge::{ResponseSender, ShellBridge, ShellSession};
pub use executor::{ExecError, ExecutorFactory, RemoteExecutor, StreamOptions};
pub use sessions::{SessionHandle, SessionId, ShellSessions};
pub use size_queue::TerminalSizeQueue;
pub use utf8::Utf8Carry;
pub use ws::{WsExecutor, WsExecutorFactory};

use std::time::Duration;

use thiserror::Error;

use jg_core::{JobId, JobStatus, SchedulerError};
use jg_protocol::ProtocolError;

/// Errors that end a shell session
#[derive(Error, Debug)]
pub enum ShellError {
    /// No `Connect` arrived in time
    #[error("no connect message within {0:?}")]
    ConnectTimeout(Duration),

    /// The client closed the stream before connecting
    #[error("stream closed before connect")]
    ClosedBeforeConnect,

    /// The first message was not `Connect`
    #[error("expected connect as first message, got {0}")]
    UnexpectedMessage(&'static str),

    /// Malformed connect request
    #[error("invalid connect request: {0}")]
    Protocol(#[from] ProtocolError),

    /// The job is not in a state that has a container to attach to
    #[error("job {job_id} is {status}, not running")]
    NotRunning { job_id: JobId, status: JobStatus },

    /// Status query failed
    #[error("failed to query job status: {0}")]
    Scheduler(#[source] SchedulerError),

    /// The scheduler would not hand out an exec stream
    #[error("failed to create exec stream: {0}")]
    ExecUrl(#[source] SchedulerError),

    /// The exec transport could not be built or failed while streaming
    #[error("exec stream failed: {0}")]
    Executor(#[from] ExecError),

    /// The inbound RPC stream failed
    #[error("client stream error: {0}")]
    Stream(tonic::Status),
}

impl From<ShellError> for tonic::Status {
    fn from(err: ShellError) -> Self {
        match err {
            ShellError::ConnectTimeout(_) => tonic::Status::deadline_exceeded(err.to_string()),
            ShellError::ClosedBeforeConnect
            | ShellError::UnexpectedMessage(_)
            | ShellError::Protocol(_) => tonic::Status::invalid_argument(err.to_string()),
            ShellError::NotRunning { .. } => tonic::Status::failed_precondition(err.to_string()),
            ShellError::Scheduler(_) => tonic::Status::unavailable(err.to_string()),
            ShellError::ExecUrl(_) | ShellError::Executor(_) => {
                tonic::Status::internal(err.to_string())
            }
            ShellError::Stream(status) => status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::Code;

    #[test]
    fn test_status_codes() {
        let code = |e: ShellError| tonic::Status::from(e).code();

        assert_eq!(
            code(ShellError::ConnectTimeout(Duration::from_secs(10))),
            Code::DeadlineExceeded
        );
        assert_eq!(code(ShellError::UnexpectedMessage("data")), Code::InvalidArgument);
        assert_eq!(
            code(ShellError::Protocol(ProtocolError::EmptyJobId)),
            Code::InvalidArgument
        );
        assert_eq!(
            code(ShellError::NotRunning {
                job_id: JobId(1),
                status: JobStatus::Pending
            }),
            Code::FailedPrecondition
        );
        assert_eq!(
            code(ShellError::ExecUrl(SchedulerError::Rejected {
                description: "no such step".into()
            })),
            Code::Internal
        );
        assert_eq!(
            code(ShellError::Scheduler(SchedulerError::Unavailable("down".into()))),
            Code::Unavailable
        );
    }

    #[test]
    fn test_executor_error_keeps_upstream_message() {
        let status = tonic::Status::from(ShellError::Executor(ExecError::Remote(
            "command terminated with non-zero exit code: 1".into(),
        )));
        assert_eq!(status.code(), Code::Internal);
        assert!(status.message().contains("non-zero exit code"));
    }
}
