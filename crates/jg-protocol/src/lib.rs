//! jg-protocol: Wire protocol for the job access gateway
//!
//! This crate defines the bidirectional shell stream exchanged between a
//! frontend client and the gateway, plus the compound pod name clients use
//! to address a running job step.

pub mod error;
pub mod message;
pub mod pod;

/// Generated protobuf types and tonic stubs for `jobgate.v1`.
pub mod proto {
    tonic::include_proto!("jobgate.v1");
}

pub use error::ProtocolError;
pub use message::{ClientMessage, ServerMessage, TerminalSize};
pub use pod::{PodName, POD_NAME_DELIMITER};
