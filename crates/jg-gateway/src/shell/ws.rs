//! WebSocket remote exec transport
//!
//! Speaks the Kubernetes channel protocol used by CRI streaming servers:
//! every binary frame starts with a channel byte (0 stdin, 1 stdout,
//! 2 stderr, 3 status, 4 resize). `v5.channel.k8s.io` additionally lets the
//! client half-close stdin with a `[255, 0]` frame; it is preferred when the
//! server offers it so a client `Disconnect` reaches the remote shell as EOF.
//!
//! Exec endpoints live inside the cluster and present self-signed
//! certificates, so certificate and hostname verification are disabled.

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_tls_with_config, Connector};
use tokio_util::sync::CancellationToken;

use super::executor::{ExecError, ExecutorFactory, RemoteExecutor, StreamOptions};

const STDIN_CHANNEL: u8 = 0;
const STDOUT_CHANNEL: u8 = 1;
const STDERR_CHANNEL: u8 = 2;
const STATUS_CHANNEL: u8 = 3;
const RESIZE_CHANNEL: u8 = 4;
const CLOSE_CHANNEL: u8 = 255;

const PROTOCOL_V5: &str = "v5.channel.k8s.io";

/// Subprotocols offered during the handshake, most preferred first.
/// tungstenite splits the offer on bare commas, so no whitespace.
const OFFERED_PROTOCOLS: &str = "v5.channel.k8s.io,v4.channel.k8s.io";

/// Frames queued towards the remote side
const OUTBOUND_FRAMES: usize = 32;

/// Read size for stdin frames
const STDIN_CHUNK: usize = 4096;

/// Builds [`WsExecutor`]s sharing one TLS connector
pub struct WsExecutorFactory {
    tls: native_tls::TlsConnector,
}

impl WsExecutorFactory {
    /// Create a factory whose connections skip certificate verification
    pub fn new() -> Result<Self, ExecError> {
        let tls = native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .build()?;
        Ok(Self { tls })
    }
}

impl ExecutorFactory for WsExecutorFactory {
    fn create(&self, url: &str) -> Result<Box<dyn RemoteExecutor>, ExecError> {
        Ok(Box::new(WsExecutor {
            url: websocket_url(url)?,
            tls: self.tls.clone(),
        }))
    }
}

/// Map the scheme the scheduler hands out onto a WebSocket scheme
fn websocket_url(url: &str) -> Result<String, ExecError> {
    let url = url.trim();
    if let Some(rest) = url.strip_prefix("https://") {
        Ok(format!("wss://{}", rest))
    } else if let Some(rest) = url.strip_prefix("http://") {
        Ok(format!("ws://{}", rest))
    } else if url.starts_with("wss://") || url.starts_with("ws://") {
        Ok(url.to_string())
    } else {
        Err(ExecError::InvalidUrl {
            url: url.to_string(),
            reason: "expected an http(s) or ws(s) scheme".to_string(),
        })
    }
}

/// Exec session over one WebSocket connection
pub struct WsExecutor {
    url: String,
    tls: native_tls::TlsConnector,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ResizeFrame {
    width: u16,
    height: u16,
}

#[derive(Deserialize)]
struct ExecStatus {
    #[serde(default)]
    status: String,
    #[serde(default)]
    message: String,
}

/// Turn the status channel payload into the stream's verdict
fn exec_status(payload: &[u8]) -> Result<(), ExecError> {
    if payload.is_empty() {
        return Ok(());
    }

    let status: ExecStatus = serde_json::from_slice(payload)
        .map_err(|e| ExecError::Remote(format!("unreadable exec status: {}", e)))?;

    if status.status == "Success" {
        Ok(())
    } else if status.message.is_empty() {
        Err(ExecError::Remote(status.status))
    } else {
        Err(ExecError::Remote(status.message))
    }
}

fn channel_frame(channel: u8, payload: &[u8]) -> Message {
    let mut frame = Vec::with_capacity(payload.len() + 1);
    frame.push(channel);
    frame.extend_from_slice(payload);
    Message::binary(frame)
}

#[async_trait::async_trait]
impl RemoteExecutor for WsExecutor {
    async fn stream(
        &self,
        options: StreamOptions,
        cancel: CancellationToken,
    ) -> Result<(), ExecError> {
        let StreamOptions {
            stdin,
            stdout,
            tty,
            resize,
        } = options;

        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(Box::new)?;
        request
            .headers_mut()
            .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(OFFERED_PROTOCOLS));

        let connector = Connector::NativeTls(self.tls.clone());
        let (ws, response) = tokio::select! {
            result = connect_async_tls_with_config(request, None, false, Some(connector)) => {
                result.map_err(Box::new)?
            }
            _ = cancel.cancelled() => return Err(ExecError::Cancelled),
        };

        let half_close = response
            .headers()
            .get(SEC_WEBSOCKET_PROTOCOL)
            .and_then(|v| v.to_str().ok())
            == Some(PROTOCOL_V5);
        tracing::debug!("Exec stream connected to {} (stdin half-close: {})", self.url, half_close);

        let (mut sink, mut source) = ws.split();
        let (out_tx, mut out_rx) = mpsc::channel::<Message>(OUTBOUND_FRAMES);

        let writer = tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                if let Err(e) = sink.send(frame).await {
                    tracing::debug!("Exec stream write failed: {}", e);
                    break;
                }
            }
        });

        let stdin_pump = {
            let out_tx = out_tx.clone();
            tokio::spawn(async move {
                let Some(mut stdin) = stdin else { return };
                let mut buf = vec![0u8; STDIN_CHUNK];
                loop {
                    match stdin.read(&mut buf).await {
                        Ok(0) => break,
                        Ok(n) => {
                            if out_tx.send(channel_frame(STDIN_CHANNEL, &buf[..n])).await.is_err() {
                                return;
                            }
                        }
                        Err(e) => {
                            tracing::debug!("Exec stdin read failed: {}", e);
                            break;
                        }
                    }
                }
                if half_close {
                    let _ = out_tx.send(channel_frame(CLOSE_CHANNEL, &[STDIN_CHANNEL])).await;
                }
            })
        };

        let resize_pump = {
            let out_tx = out_tx.clone();
            tokio::spawn(async move {
                let Some(queue) = resize.filter(|_| tty) else { return };
                while let Some(size) = queue.next().await {
                    let frame = ResizeFrame {
                        width: size.cols,
                        height: size.rows,
                    };
                    let Ok(payload) = serde_json::to_vec(&frame) else { continue };
                    if out_tx.send(channel_frame(RESIZE_CHANNEL, &payload)).await.is_err() {
                        break;
                    }
                }
            })
        };
        drop(out_tx);

        let inbound = async {
            let mut stdout = stdout;
            while let Some(message) = source.next().await {
                match message.map_err(Box::new)? {
                    Message::Binary(data) => {
                        let Some((&channel, payload)) = data.split_first() else {
                            continue;
                        };
                        match channel {
                            STDOUT_CHANNEL | STDERR_CHANNEL => {
                                if let Some(out) = stdout.as_mut() {
                                    out.write_all(payload).await?;
                                    out.flush().await?;
                                }
                            }
                            STATUS_CHANNEL => return exec_status(payload),
                            other => tracing::trace!("Ignoring exec frame on channel {}", other),
                        }
                    }
                    Message::Close(_) => return Ok(()),
                    _ => {}
                }
            }
            Ok::<(), ExecError>(())
        };

        let result = tokio::select! {
            result = inbound => result,
            _ = cancel.cancelled() => Err(ExecError::Cancelled),
        };

        stdin_pump.abort();
        resize_pump.abort();
        writer.abort();

        result
    }
}
