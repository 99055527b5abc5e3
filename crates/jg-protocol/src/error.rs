//! Protocol error types

use thiserror::Error;

/// Errors that can occur while decoding shell protocol input
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The standalone job id field was empty
    #[error("job id is empty")]
    EmptyJobId,

    /// The pod name did not split into job, step and node
    #[error("invalid pod name {pod_name:?}: expected 3 segments separated by ':::', got {segments}")]
    SegmentCount { pod_name: String, segments: usize },

    /// A numeric segment did not parse
    #[error("invalid {field} {value:?} in pod name")]
    InvalidNumber { field: &'static str, value: String },

    /// A segment was empty
    #[error("empty {0} in pod name")]
    EmptySegment(&'static str),

    /// The job id embedded in the pod name disagrees with the one sent alongside it
    #[error("job id mismatch: request has {request}, pod name has {pod}")]
    JobIdMismatch { request: String, pod: u32 },

    /// A message arrived without a payload
    #[error("message has no payload")]
    EmptyMessage,

    /// Terminal dimensions do not fit a 16-bit value
    #[error("terminal size {rows}x{cols} out of range")]
    SizeOutOfRange { rows: u32, cols: u32 },
}
