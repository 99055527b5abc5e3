//! Shell bridge integration tests
//!
//! Drives `ShellBridge` with an in-process scheduler and exec transport.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tonic::{Code, Status};

use jg_core::config::ShellConfig;
use jg_core::JobStatus;
use jg_gateway::shell::{ShellBridge, ShellError, ShellSessions};
use jg_protocol::proto::ShellResponse;
use jg_protocol::{ServerMessage, TerminalSize};

use common::{client_stream, connect, data, disconnect, resize, Behavior, FakeExecutorFactory, FakeScheduler};

fn bridge(scheduler: Arc<FakeScheduler>, executors: Arc<FakeExecutorFactory>) -> ShellBridge {
    ShellBridge::new(scheduler, executors, Arc::new(ShellSessions::new()), ShellConfig::default())
}

fn running_scheduler() -> Arc<FakeScheduler> {
    let scheduler = Arc::new(FakeScheduler::default());
    scheduler.set_status(42, JobStatus::Running);
    scheduler
}

/// Collect outbound messages until the bridge drops its sender
async fn drain(mut rx: mpsc::Receiver<Result<ShellResponse, Status>>) -> (String, Option<Result<ServerMessage, Status>>) {
    let mut output = String::new();
    let mut last = None;
    while let Some(item) = rx.recv().await {
        match item {
            Ok(response) => match ServerMessage::try_from(response).unwrap() {
                ServerMessage::Data(text) => output.push_str(&text),
                exit => last = Some(Ok(exit)),
            },
            Err(status) => last = Some(Err(status)),
        }
    }
    (output, last)
}

#[tokio::test]
async fn test_first_message_must_be_connect() {
    let executors = Arc::new(FakeExecutorFactory::new(Behavior::Echo));
    let bridge = bridge(running_scheduler(), Arc::clone(&executors));

    for first in [data("ls\n"), resize(24, 80)] {
        let (tx, inbound) = client_stream();
        tx.send(Ok(first)).await.unwrap();

        let err = bridge.open(inbound).await.err().unwrap();
        assert!(matches!(err, ShellError::UnexpectedMessage(_)));
        assert_eq!(Status::from(err).code(), Code::InvalidArgument);
    }

    assert!(executors.urls.lock().unwrap().is_empty());
    assert!(bridge.sessions().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_connect_timeout() {
    let bridge = bridge(running_scheduler(), Arc::new(FakeExecutorFactory::new(Behavior::Echo)));
    let (_tx, inbound) = client_stream();

    let err = bridge.open(inbound).await.err().unwrap();
    assert!(matches!(err, ShellError::ConnectTimeout(_)));
    assert_eq!(Status::from(err).code(), Code::DeadlineExceeded);
}

#[tokio::test]
async fn test_invalid_connect_requests() {
    let bridge = bridge(running_scheduler(), Arc::new(FakeExecutorFactory::new(Behavior::Echo)));

    for (job_id, pod_name) in [("7", "42:::0:::node01"), ("", "42:::0:::node01"), ("42", "42:::0")] {
        let (tx, inbound) = client_stream();
        tx.send(Ok(connect(job_id, pod_name))).await.unwrap();

        let err = bridge.open(inbound).await.err().unwrap();
        assert!(matches!(err, ShellError::Protocol(_)), "{job_id} {pod_name}: {err}");
        assert_eq!(Status::from(err).code(), Code::InvalidArgument);
    }
}

#[tokio::test]
async fn test_job_must_be_running() {
    let scheduler = Arc::new(FakeScheduler::default());
    scheduler.set_status(42, JobStatus::Pending);
    let executors = Arc::new(FakeExecutorFactory::new(Behavior::Echo));
    let bridge = bridge(Arc::clone(&scheduler), Arc::clone(&executors));

    let (tx, inbound) = client_stream();
    tx.send(Ok(connect("42", "42:::0:::node01"))).await.unwrap();

    let err = bridge.open(inbound).await.err().unwrap();
    assert!(matches!(
        err,
        ShellError::NotRunning {
            status: JobStatus::Pending,
            ..
        }
    ));
    assert_eq!(Status::from(err).code(), Code::FailedPrecondition);
    assert!(scheduler.exec_requests.lock().unwrap().is_empty());
    assert!(executors.urls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_echo_session_exits_cleanly() {
    let scheduler = running_scheduler();
    let executors = Arc::new(FakeExecutorFactory::new(Behavior::Echo));
    let bridge = bridge(Arc::clone(&scheduler), Arc::clone(&executors));

    let (tx, inbound) = client_stream();
    tx.send(Ok(connect("42", "42:::1:::node03"))).await.unwrap();
    let session = bridge.open(inbound).await.unwrap();
    assert_eq!(session.pod().node, "node03");

    let request = scheduler.exec_requests.lock().unwrap()[0].clone();
    assert_eq!(request.step_id, 1);
    assert_eq!(request.command, vec!["/bin/sh".to_string()]);
    assert!(request.stdin && request.tty && request.stdout && !request.stderr);
    assert_eq!(executors.urls.lock().unwrap()[0], "https://node03:10250/exec/42/1");

    tx.send(Ok(data("echo hi\n"))).await.unwrap();
    tx.send(Ok(resize(40, 120))).await.unwrap();
    tx.send(Ok(data("héllo\n"))).await.unwrap();
    tx.send(Ok(disconnect())).await.unwrap();

    let (out_tx, out_rx) = mpsc::channel(16);
    timeout(Duration::from_secs(5), bridge.run(session, out_tx, CancellationToken::new()))
        .await
        .expect("session should end after disconnect");

    let (output, last) = drain(out_rx).await;
    assert_eq!(output, "echo hi\nhéllo\n");
    assert_eq!(last.unwrap().unwrap(), ServerMessage::Exit { code: 0 });
    assert!(bridge.sessions().is_empty());
}

#[tokio::test]
async fn test_resize_events_reach_executor() {
    let executors = Arc::new(FakeExecutorFactory::new(Behavior::Resizes(2)));
    let bridge = Arc::new(bridge(running_scheduler(), Arc::clone(&executors)));

    let (tx, inbound) = client_stream();
    tx.send(Ok(connect("42", "42:::0:::node01"))).await.unwrap();
    let session = bridge.open(inbound).await.unwrap();

    let (out_tx, out_rx) = mpsc::channel(16);
    let running = tokio::spawn({
        let bridge = Arc::clone(&bridge);
        async move { bridge.run(session, out_tx, CancellationToken::new()).await }
    });

    // One event at a time: the queue holds a single pending size.
    tx.send(Ok(resize(40, 120))).await.unwrap();
    while executors.sizes.lock().unwrap().is_empty() {
        tokio::task::yield_now().await;
    }
    tx.send(Ok(resize(50, 200))).await.unwrap();

    timeout(Duration::from_secs(5), running)
        .await
        .expect("session should end after two resizes")
        .unwrap();

    assert_eq!(
        *executors.sizes.lock().unwrap(),
        vec![TerminalSize::new(40, 120), TerminalSize::new(50, 200)]
    );
    let (_, last) = drain(out_rx).await;
    assert_eq!(last.unwrap().unwrap(), ServerMessage::Exit { code: 0 });
}

#[tokio::test]
async fn test_executor_failure_is_internal_error() {
    let executors = Arc::new(FakeExecutorFactory::new(Behavior::Fail(
        "command terminated with non-zero exit code".into(),
    )));
    let bridge = bridge(running_scheduler(), executors);

    let (tx, inbound) = client_stream();
    tx.send(Ok(connect("42", "42:::0:::node01"))).await.unwrap();
    let session = bridge.open(inbound).await.unwrap();

    let (out_tx, out_rx) = mpsc::channel(16);
    timeout(Duration::from_secs(5), bridge.run(session, out_tx, CancellationToken::new()))
        .await
        .expect("session should end when the executor fails");

    let (output, last) = drain(out_rx).await;
    assert!(output.is_empty());
    let status = last.unwrap().unwrap_err();
    assert_eq!(status.code(), Code::Internal);
    assert!(status.message().contains("non-zero exit code"));
}

#[tokio::test]
async fn test_client_going_away_cancels_session() {
    let bridge = bridge(running_scheduler(), Arc::new(FakeExecutorFactory::new(Behavior::Hang)));

    let (tx, inbound) = client_stream();
    tx.send(Ok(connect("42", "42:::0:::node01"))).await.unwrap();
    let session = bridge.open(inbound).await.unwrap();

    let (out_tx, out_rx) = mpsc::channel(16);
    drop(out_rx);

    timeout(Duration::from_secs(5), bridge.run(session, out_tx, CancellationToken::new()))
        .await
        .expect("session should end once the client is gone");
    assert!(bridge.sessions().is_empty());
}

#[tokio::test]
async fn test_shutdown_cancels_live_sessions() {
    let bridge = Arc::new(bridge(running_scheduler(), Arc::new(FakeExecutorFactory::new(Behavior::Hang))));

    let (tx, inbound) = client_stream();
    tx.send(Ok(connect("42", "42:::0:::node01"))).await.unwrap();
    let session = bridge.open(inbound).await.unwrap();

    let shutdown = CancellationToken::new();
    let (out_tx, out_rx) = mpsc::channel(16);
    let running = tokio::spawn({
        let bridge = Arc::clone(&bridge);
        let shutdown = shutdown.clone();
        async move { bridge.run(session, out_tx, shutdown).await }
    });

    while bridge.sessions().is_empty() {
        tokio::task::yield_now().await;
    }
    assert_eq!(bridge.sessions().len(), 1);

    shutdown.cancel();
    timeout(Duration::from_secs(5), running).await.unwrap().unwrap();

    let (_, last) = drain(out_rx).await;
    assert_eq!(last.unwrap().unwrap_err().code(), Code::Internal);
    assert!(bridge.sessions().is_empty());
}
