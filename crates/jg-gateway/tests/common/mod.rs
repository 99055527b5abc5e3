//! Fakes shared by the gateway integration tests

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tonic::Status;

use jg_core::{ExecRequest, ExecStream, JobId, JobStatus, Scheduler, SchedulerError};
use jg_gateway::shell::{ExecError, ExecutorFactory, RemoteExecutor, StreamOptions};
use jg_protocol::proto::{self, ShellRequest};
use jg_protocol::{ClientMessage, TerminalSize};

/// Scheduler with scripted job statuses and topology
#[derive(Default)]
pub struct FakeScheduler {
    statuses: Mutex<HashMap<JobId, JobStatus>>,
    failing: Mutex<HashSet<JobId>>,
    topology: Mutex<HashMap<JobId, Vec<String>>>,
    exec_base: Mutex<Option<String>>,
    pub exec_requests: Mutex<Vec<ExecRequest>>,
}

impl FakeScheduler {
    pub fn set_status(&self, job_id: u32, status: JobStatus) {
        self.statuses.lock().unwrap().insert(JobId(job_id), status);
    }

    pub fn fail_status(&self, job_id: u32) {
        self.failing.lock().unwrap().insert(JobId(job_id));
    }

    /// Hand out exec URLs under `base` instead of the node's kubelet address
    pub fn set_exec_base(&self, base: &str) {
        *self.exec_base.lock().unwrap() = Some(base.to_string());
    }

    pub fn set_topology(&self, job_id: u32, nodes: &[&str]) {
        self.topology
            .lock()
            .unwrap()
            .insert(JobId(job_id), nodes.iter().map(|n| n.to_string()).collect());
    }
}

#[async_trait]
impl Scheduler for FakeScheduler {
    async fn exec_in_container(&self, request: &ExecRequest) -> Result<ExecStream, SchedulerError> {
        self.exec_requests.lock().unwrap().push(request.clone());
        let base = self
            .exec_base
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| format!("https://{}:10250", request.node));
        Ok(ExecStream {
            url: format!("{}/exec/{}/{}", base, request.job_id, request.step_id),
        })
    }

    async fn query_job_status(&self, job_id: JobId) -> Result<JobStatus, SchedulerError> {
        if self.failing.lock().unwrap().contains(&job_id) {
            return Err(SchedulerError::Unavailable("scheduler timed out".into()));
        }
        self.statuses
            .lock()
            .unwrap()
            .get(&job_id)
            .copied()
            .ok_or(SchedulerError::NotFound(job_id.0))
    }

    async fn query_job_topology(&self, job_id: JobId) -> Result<Vec<String>, SchedulerError> {
        self.topology
            .lock()
            .unwrap()
            .get(&job_id)
            .cloned()
            .ok_or(SchedulerError::NotFound(job_id.0))
    }
}

/// What a fake exec session does with its pipes
#[derive(Clone)]
pub enum Behavior {
    /// Copy stdin to stdout until stdin closes
    Echo,
    /// Fail straight away with a remote error
    Fail(String),
    /// Block until cancelled
    Hang,
    /// Record terminal sizes, finishing cleanly after this many
    Resizes(usize),
}

pub struct FakeExecutorFactory {
    behavior: Behavior,
    pub urls: Mutex<Vec<String>>,
    pub sizes: Arc<Mutex<Vec<TerminalSize>>>,
}

impl FakeExecutorFactory {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            urls: Mutex::new(Vec::new()),
            sizes: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl ExecutorFactory for FakeExecutorFactory {
    fn create(&self, url: &str) -> Result<Box<dyn RemoteExecutor>, ExecError> {
        self.urls.lock().unwrap().push(url.to_string());
        Ok(Box::new(FakeExecutor {
            behavior: self.behavior.clone(),
            sizes: Arc::clone(&self.sizes),
        }))
    }
}

struct FakeExecutor {
    behavior: Behavior,
    sizes: Arc<Mutex<Vec<TerminalSize>>>,
}

#[async_trait]
impl RemoteExecutor for FakeExecutor {
    async fn stream(&self, options: StreamOptions, cancel: CancellationToken) -> Result<(), ExecError> {
        match &self.behavior {
            Behavior::Echo => {
                let mut stdin = options.stdin.expect("stdin pipe");
                let mut stdout = options.stdout.expect("stdout pipe");
                tokio::select! {
                    copied = tokio::io::copy(&mut stdin, &mut stdout) => copied.map(|_| ()).map_err(ExecError::from),
                    _ = cancel.cancelled() => Err(ExecError::Cancelled),
                }
            }
            Behavior::Fail(message) => Err(ExecError::Remote(message.clone())),
            Behavior::Hang => {
                cancel.cancelled().await;
                Err(ExecError::Cancelled)
            }
            Behavior::Resizes(expected) => {
                let queue = options.resize.expect("resize queue");
                while self.sizes.lock().unwrap().len() < *expected {
                    let size = tokio::select! {
                        size = queue.next() => size,
                        _ = cancel.cancelled() => return Err(ExecError::Cancelled),
                    };
                    match size {
                        Some(size) => self.sizes.lock().unwrap().push(size),
                        None => break,
                    }
                }
                Ok(())
            }
        }
    }
}

pub type ClientStream = Pin<Box<dyn Stream<Item = Result<ShellRequest, Status>> + Send>>;

/// An open-ended client request stream fed through the returned sender
pub fn client_stream() -> (mpsc::Sender<Result<ShellRequest, Status>>, ClientStream) {
    let (tx, rx) = mpsc::channel(16);
    let stream = futures::stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) });
    (tx, Box::pin(stream))
}

pub fn connect(job_id: &str, pod_name: &str) -> ShellRequest {
    ClientMessage::Connect {
        job_id: job_id.into(),
        pod_name: pod_name.into(),
    }
    .into()
}

pub fn data(payload: &str) -> ShellRequest {
    ClientMessage::Data(payload.into()).into()
}

pub fn resize(rows: u32, cols: u32) -> ShellRequest {
    ClientMessage::Resize(proto::Resize { rows, cols }).into()
}

pub fn disconnect() -> ShellRequest {
    ClientMessage::Disconnect.into()
}
