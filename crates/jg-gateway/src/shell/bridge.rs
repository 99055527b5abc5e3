//! Per-session orchestration of a shell stream
//!
//! A session goes `AwaitConnect -> Streaming -> Closed`. [`ShellBridge::open`]
//! covers the first transition and allocates nothing until the connect
//! request has been validated and the scheduler has handed out an exec URL.
//! [`ShellBridge::run`] drives the streaming phase and always ends with
//! either an `Exit` message or an error status on the outbound channel.

use std::sync::Arc;

use futures::{Stream, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tonic::Status;
use tracing::{debug, error, info, warn};

use jg_core::config::ShellConfig;
use jg_core::{ExecRequest, JobId, JobStatus, Scheduler};
use jg_protocol::proto::{ShellRequest, ShellResponse};
use jg_protocol::{ClientMessage, PodName, ServerMessage, TerminalSize};

use super::executor::{ExecutorFactory, RemoteExecutor, StreamOptions};
use super::sessions::ShellSessions;
use super::size_queue::TerminalSizeQueue;
use super::utf8::Utf8Carry;
use super::ShellError;

/// Sender half of a shell RPC response stream
pub type ResponseSender = mpsc::Sender<Result<ShellResponse, Status>>;

/// Read size for the stdout forwarder
const FORWARD_CHUNK: usize = 4096;

/// Resolves connect requests into exec sessions and streams them
pub struct ShellBridge {
    scheduler: Arc<dyn Scheduler>,
    executors: Arc<dyn ExecutorFactory>,
    sessions: Arc<ShellSessions>,
    config: ShellConfig,
}

/// A validated session that has not started streaming yet
pub struct ShellSession<S> {
    pod: PodName,
    executor: Box<dyn RemoteExecutor>,
    inbound: S,
}

impl<S> ShellSession<S> {
    /// Container this session is attached to
    pub fn pod(&self) -> &PodName {
        &self.pod
    }
}

impl ShellBridge {
    pub fn new(
        scheduler: Arc<dyn Scheduler>,
        executors: Arc<dyn ExecutorFactory>,
        sessions: Arc<ShellSessions>,
        config: ShellConfig,
    ) -> Self {
        Self {
            scheduler,
            executors,
            sessions,
            config,
        }
    }

    /// Live session registry
    pub fn sessions(&self) -> &Arc<ShellSessions> {
        &self.sessions
    }

    /// Wait for the connect request and resolve it into an executor.
    pub async fn open<S>(&self, mut inbound: S) -> Result<ShellSession<S>, ShellError>
    where
        S: Stream<Item = Result<ShellRequest, Status>> + Unpin + Send + 'static,
    {
        let first = tokio::time::timeout(self.config.connect_timeout, inbound.next())
            .await
            .map_err(|_| ShellError::ConnectTimeout(self.config.connect_timeout))?;

        let request = match first {
            None => return Err(ShellError::ClosedBeforeConnect),
            Some(Err(status)) => return Err(ShellError::Stream(status)),
            Some(Ok(request)) => request,
        };

        let (job_id, pod_name) = match ClientMessage::try_from(request)? {
            ClientMessage::Connect { job_id, pod_name } => (job_id, pod_name),
            other => return Err(ShellError::UnexpectedMessage(other.kind())),
        };

        let pod = PodName::from_connect(&job_id, &pod_name)?;
        let job_id = JobId(pod.job_id);

        let status = self
            .scheduler
            .query_job_status(job_id)
            .await
            .map_err(ShellError::Scheduler)?;
        if status != JobStatus::Running {
            return Err(ShellError::NotRunning { job_id, status });
        }

        let request = ExecRequest::interactive(self.config.uid, &pod, self.config.command.clone());
        let stream = self
            .scheduler
            .exec_in_container(&request)
            .await
            .map_err(ShellError::ExecUrl)?;
        debug!("Exec stream for {} allocated at {}", pod, stream.url);

        let executor = self.executors.create(&stream.url)?;

        Ok(ShellSession {
            pod,
            executor,
            inbound,
        })
    }

    /// Stream a session until the remote side finishes, the client goes
    /// away, or `shutdown` fires.
    ///
    /// The final outbound item is `Exit{code: 0}` when the executor returned
    /// cleanly, or an `Internal` status carrying the executor error.
    pub async fn run<S>(&self, session: ShellSession<S>, outbound: ResponseSender, shutdown: CancellationToken)
    where
        S: Stream<Item = Result<ShellRequest, Status>> + Unpin + Send + 'static,
    {
        let ShellSession {
            pod,
            executor,
            inbound,
        } = session;

        let cancel = shutdown.child_token();
        let handle = self.sessions.register(pod.clone(), cancel.clone());
        info!("Shell session {} opened on {}", handle.id, pod);

        let (stdin_writer, stdin_reader) = tokio::io::duplex(self.config.pipe_capacity);
        let (stdout_writer, stdout_reader) = tokio::io::duplex(self.config.pipe_capacity);
        let size_queue = Arc::new(TerminalSizeQueue::new());

        // Client gone means nobody will read our output.
        let watcher = tokio::spawn({
            let outbound = outbound.clone();
            let cancel = cancel.clone();
            async move {
                tokio::select! {
                    _ = outbound.closed() => cancel.cancel(),
                    _ = cancel.cancelled() => {}
                }
            }
        });

        let options = StreamOptions {
            stdin: Some(Box::new(stdin_reader)),
            stdout: Some(Box::new(stdout_writer)),
            tty: true,
            resize: Some(Arc::clone(&size_queue)),
        };

        let exec = async {
            let result = executor.stream(options, cancel.clone()).await;
            size_queue.stop();
            cancel.cancel();
            result
        };

        let (result, (), ()) = tokio::join!(
            exec,
            forward_output(stdout_reader, &outbound),
            handle_requests(inbound, stdin_writer, &size_queue, &cancel),
        );

        watcher.abort();
        self.sessions.remove(handle.id);

        match result {
            Ok(()) => {
                info!("Shell session {} on {} exited", handle.id, pod);
                let exit: ShellResponse = ServerMessage::Exit { code: 0 }.into();
                let _ = outbound.send(Ok(exit)).await;
            }
            Err(e) => {
                error!("Shell session {} on {} failed: {}", handle.id, pod, e);
                let _ = outbound.send(Err(ShellError::Executor(e).into())).await;
            }
        }
    }
}

/// Copy remote output to the client until the executor drops its writer.
async fn forward_output(mut stdout: DuplexStream, outbound: &ResponseSender) {
    let mut carry = Utf8Carry::new();
    let mut buf = vec![0u8; FORWARD_CHUNK];

    loop {
        let n = match stdout.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!("Shell stdout read failed: {}", e);
                break;
            }
        };

        let text = carry.decode(&buf[..n]);
        if text.is_empty() {
            continue;
        }
        if outbound.send(Ok(ServerMessage::Data(text).into())).await.is_err() {
            return;
        }
    }

    if let Some(rest) = carry.finish() {
        let _ = outbound.send(Ok(ServerMessage::Data(rest).into())).await;
    }
}

/// Apply client messages to the session until `Disconnect`, client EOF or
/// cancellation. Dropping the stdin writer on return hands the remote shell EOF.
async fn handle_requests<S>(
    mut inbound: S,
    mut stdin: DuplexStream,
    size_queue: &TerminalSizeQueue,
    cancel: &CancellationToken,
) where
    S: Stream<Item = Result<ShellRequest, Status>> + Unpin,
{
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = inbound.next() => next,
        };

        let request = match next {
            None => {
                debug!("Client closed the shell stream");
                break;
            }
            Some(Err(status)) => {
                warn!("Shell stream receive failed: {}", status);
                break;
            }
            Some(Ok(request)) => request,
        };

        match ClientMessage::try_from(request) {
            Ok(ClientMessage::Data(payload)) => {
                let written = tokio::select! {
                    _ = cancel.cancelled() => break,
                    result = stdin.write_all(payload.as_bytes()) => result,
                };
                if let Err(e) = written {
                    debug!("Shell stdin closed: {}", e);
                    break;
                }
            }
            Ok(ClientMessage::Resize(resize)) => match TerminalSize::try_from(resize) {
                Ok(size) => {
                    if !size_queue.push(size) {
                        warn!("Dropped resize to {}x{}, previous resize still pending", size.rows, size.cols);
                    }
                }
                Err(e) => warn!("Ignoring resize: {}", e),
            },
            Ok(ClientMessage::Disconnect) => {
                debug!("Client disconnected");
                break;
            }
            Ok(other) => warn!("Ignoring {} message on an open session", other.kind()),
            Err(e) => warn!("Ignoring malformed shell request: {}", e),
        }
    }

    let _ = stdin.shutdown().await;
}
