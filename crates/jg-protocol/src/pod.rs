//! Compound pod name addressing a running job step
//!
//! Clients address a container by `"<job_id>:::<step_id>:::<node>"`. The
//! job id is also sent in its own field; both must agree before a session
//! is allowed to start.

use std::fmt;
use std::str::FromStr;

use crate::error::ProtocolError;

/// Separator between pod name segments
pub const POD_NAME_DELIMITER: &str = ":::";

/// A parsed pod name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PodName {
    /// Scheduler job id
    pub job_id: u32,
    /// Step within the job
    pub step_id: u32,
    /// Compute node the step runs on
    pub node: String,
}

impl PodName {
    /// Create a pod name from its parts
    pub fn new(job_id: u32, step_id: u32, node: impl Into<String>) -> Self {
        Self {
            job_id,
            step_id,
            node: node.into(),
        }
    }

    /// Parse a pod name and cross-check it against the standalone job id
    /// carried by a `Connect` message.
    pub fn from_connect(job_id: &str, pod_name: &str) -> Result<Self, ProtocolError> {
        let job_id = job_id.trim();
        if job_id.is_empty() {
            return Err(ProtocolError::EmptyJobId);
        }

        let parsed: PodName = pod_name.parse()?;

        let requested = job_id
            .parse::<u32>()
            .map_err(|_| ProtocolError::InvalidNumber {
                field: "job id",
                value: job_id.to_string(),
            })?;

        if requested != parsed.job_id {
            return Err(ProtocolError::JobIdMismatch {
                request: job_id.to_string(),
                pod: parsed.job_id,
            });
        }

        Ok(parsed)
    }
}

impl FromStr for PodName {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(POD_NAME_DELIMITER).collect();
        if parts.len() != 3 {
            return Err(ProtocolError::SegmentCount {
                pod_name: s.to_string(),
                segments: parts.len(),
            });
        }

        let number = |field: &'static str, value: &str| -> Result<u32, ProtocolError> {
            if value.is_empty() {
                return Err(ProtocolError::EmptySegment(field));
            }
            value.parse::<u32>().map_err(|_| ProtocolError::InvalidNumber {
                field,
                value: value.to_string(),
            })
        };

        let job_id = number("job id", parts[0])?;
        let step_id = number("step id", parts[1])?;

        let node = parts[2].trim();
        if node.is_empty() {
            return Err(ProtocolError::EmptySegment("node"));
        }

        Ok(Self::new(job_id, step_id, node))
    }
}

impl fmt::Display for PodName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{delim}{}{delim}{}",
            self.job_id,
            self.step_id,
            self.node,
            delim = POD_NAME_DELIMITER
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_pod_name() {
        let pod: PodName = "42:::1:::node03".parse().unwrap();
        assert_eq!(pod, PodName::new(42, 1, "node03"));
    }

    #[test]
    fn test_display_matches_wire_format() {
        let pod = PodName::new(42, 1, "node03");
        assert_eq!(pod.to_string(), "42:::1:::node03");
    }

    #[test]
    fn test_two_segments_rejected() {
        let err = "42:::1".parse::<PodName>().unwrap_err();
        assert_eq!(
            err,
            ProtocolError::SegmentCount {
                pod_name: "42:::1".to_string(),
                segments: 2
            }
        );
    }

    #[test]
    fn test_non_numeric_job_id_rejected() {
        let err = "abc:::1:::node03".parse::<PodName>().unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::InvalidNumber { field: "job id", .. }
        ));
    }

    #[test]
    fn test_non_numeric_step_id_rejected() {
        let err = "42:::x:::node03".parse::<PodName>().unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::InvalidNumber { field: "step id", .. }
        ));
    }

    #[test]
    fn test_empty_node_rejected() {
        let err = "42:::1:::".parse::<PodName>().unwrap_err();
        assert_eq!(err, ProtocolError::EmptySegment("node"));
    }

    #[test]
    fn test_from_connect_checks_job_id() {
        let pod = PodName::from_connect("42", "42:::1:::node03").unwrap();
        assert_eq!(pod.node, "node03");

        let err = PodName::from_connect("7", "42:::1:::node03").unwrap_err();
        assert!(matches!(err, ProtocolError::JobIdMismatch { pod: 42, .. }));
    }

    #[test]
    fn test_from_connect_empty_job_id() {
        let err = PodName::from_connect("  ", "42:::1:::node03").unwrap_err();
        assert_eq!(err, ProtocolError::EmptyJobId);
    }
}
