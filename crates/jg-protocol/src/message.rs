//! Message types for the shell stream protocol
//!
//! The generated protobuf types in [`crate::proto`] are what travels on the
//! wire. This module lifts them into plain enums so the gateway can match on
//! them without digging through `Option<oneof>` layers.
//!
//! # Message Flow
//!
//! 1. Client sends `Connect` (must be the first message)
//! 2. Terminal I/O: `Data` flows in both directions
//! 3. Window resize: `Resize` from the client
//! 4. Session end: client sends `Disconnect` or half-closes; server answers
//!    with `Exit` or an RPC error

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::proto::{self, shell_request, shell_response};

/// Terminal dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalSize {
    /// Number of rows
    pub rows: u16,
    /// Number of columns
    pub cols: u16,
}

impl TerminalSize {
    /// Create a new terminal size
    pub fn new(rows: u16, cols: u16) -> Self {
        Self { rows, cols }
    }

    /// Default terminal size (24x80)
    pub fn default_size() -> Self {
        Self { rows: 24, cols: 80 }
    }
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self::default_size()
    }
}

impl TryFrom<proto::Resize> for TerminalSize {
    type Error = ProtocolError;

    fn try_from(resize: proto::Resize) -> Result<Self, Self::Error> {
        let out_of_range = || ProtocolError::SizeOutOfRange {
            rows: resize.rows,
            cols: resize.cols,
        };
        let rows = u16::try_from(resize.rows).map_err(|_| out_of_range())?;
        let cols = u16::try_from(resize.cols).map_err(|_| out_of_range())?;
        Ok(Self { rows, cols })
    }
}

/// Client to server messages
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// Open a session on a pod
    Connect { job_id: String, pod_name: String },
    /// Keyboard input for the remote shell
    Data(String),
    /// Terminal window changed size
    Resize(proto::Resize),
    /// Client is done
    Disconnect,
}

impl ClientMessage {
    /// Short name used in logs and error messages
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Connect { .. } => "connect",
            ClientMessage::Data(_) => "data",
            ClientMessage::Resize(_) => "resize",
            ClientMessage::Disconnect => "disconnect",
        }
    }
}

impl TryFrom<proto::ShellRequest> for ClientMessage {
    type Error = ProtocolError;

    fn try_from(request: proto::ShellRequest) -> Result<Self, Self::Error> {
        match request.payload.ok_or(ProtocolError::EmptyMessage)? {
            shell_request::Payload::Connect(c) => Ok(ClientMessage::Connect {
                job_id: c.job_id,
                pod_name: c.pod_name,
            }),
            shell_request::Payload::Data(d) => Ok(ClientMessage::Data(d.payload)),
            shell_request::Payload::Resize(r) => Ok(ClientMessage::Resize(r)),
            shell_request::Payload::Disconnect(_) => Ok(ClientMessage::Disconnect),
        }
    }
}

impl From<ClientMessage> for proto::ShellRequest {
    fn from(message: ClientMessage) -> Self {
        let payload = match message {
            ClientMessage::Connect { job_id, pod_name } => {
                shell_request::Payload::Connect(proto::Connect { job_id, pod_name })
            }
            ClientMessage::Data(payload) => shell_request::Payload::Data(proto::Data { payload }),
            ClientMessage::Resize(r) => shell_request::Payload::Resize(r),
            ClientMessage::Disconnect => shell_request::Payload::Disconnect(proto::Disconnect {}),
        };
        proto::ShellRequest {
            payload: Some(payload),
        }
    }
}

/// Server to client messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    /// Output from the remote shell
    Data(String),
    /// The remote session ended
    Exit { code: i32 },
}

impl From<ServerMessage> for proto::ShellResponse {
    fn from(message: ServerMessage) -> Self {
        let payload = match message {
            ServerMessage::Data(payload) => shell_response::Payload::Data(proto::Data { payload }),
            ServerMessage::Exit { code } => shell_response::Payload::Exit(proto::Exit { code }),
        };
        proto::ShellResponse {
            payload: Some(payload),
        }
    }
}

impl TryFrom<proto::ShellResponse> for ServerMessage {
    type Error = ProtocolError;

    fn try_from(response: proto::ShellResponse) -> Result<Self, Self::Error> {
        match response.payload.ok_or(ProtocolError::EmptyMessage)? {
            shell_response::Payload::Data(d) => Ok(ServerMessage::Data(d.payload)),
            shell_response::Payload::Exit(e) => Ok(ServerMessage::Exit { code: e.code }),
        }
    }
}
