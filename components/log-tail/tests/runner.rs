use futures::StreamExt;
use futures::stream;
use log_tail::instrumentation::tracing::build_subscriber;
use log_tail::proto::{LogEntry, TailLogEntriesRequest, TailLogEntriesResponse, log_entry::Payload};
use log_tail::runtime::runtime::{StopReason, run_log_tail};
use log_tail::tailer::client::{Connector, LogTailClient, ResponseStream, TailSession};
use log_tail::tailer::models::{RunParameters, TailError};
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::Poll;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tonic::Status;
use tracing_subscriber::EnvFilter;

/// What the fake service does, plus what it observed.
#[derive(Default)]
struct FakeState {
    connects: AtomicUsize,
    closes: AtomicUsize,
    requests: Mutex<Option<mpsc::Receiver<TailLogEntriesRequest>>>,
}

impl FakeState {
    fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Requests sent before the send direction closed. `None` if the
    /// direction is still open.
    fn sent_requests(&self) -> Option<Vec<TailLogEntriesRequest>> {
        let mut guard = self.requests.lock().unwrap();
        let rx = guard.as_mut()?;
        let mut sent = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(request) => sent.push(request),
                Err(mpsc::error::TryRecvError::Empty) => return None,
                Err(mpsc::error::TryRecvError::Disconnected) => return Some(sent),
            }
        }
    }
}

#[derive(Default)]
struct FakeConnector {
    state: Arc<FakeState>,
    connect_error: Option<TailError>,
    open_error: Mutex<Option<TailError>>,
    responses: Mutex<Option<ResponseStream>>,
    drop_requests: bool,
    hang_connect: bool,
    hang_open: bool,
}

impl FakeConnector {
    fn with_responses(responses: ResponseStream) -> Self {
        Self {
            responses: Mutex::new(Some(responses)),
            ..Default::default()
        }
    }
}

struct FakeClient {
    state: Arc<FakeState>,
    open_error: Option<TailError>,
    responses: Option<ResponseStream>,
    drop_requests: bool,
    hang_open: bool,
}

impl Connector for FakeConnector {
    type Client = FakeClient;

    async fn connect(&self) -> Result<FakeClient, TailError> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        if self.hang_connect {
            std::future::pending::<()>().await;
        }
        if let Some(err) = &self.connect_error {
            return Err(err.clone());
        }
        Ok(FakeClient {
            state: self.state.clone(),
            open_error: self.open_error.lock().unwrap().take(),
            responses: self.responses.lock().unwrap().take(),
            drop_requests: self.drop_requests,
            hang_open: self.hang_open,
        })
    }
}

impl LogTailClient for FakeClient {
    async fn tail_log_entries(&mut self) -> Result<TailSession, TailError> {
        if self.hang_open {
            std::future::pending::<()>().await;
        }
        if let Some(err) = self.open_error.take() {
            return Err(err);
        }
        let responses = self
            .responses
            .take()
            .unwrap_or_else(|| stream::pending().boxed());
        let (session, rx) = TailSession::channel(responses);
        if !self.drop_requests {
            *self.state.requests.lock().unwrap() = Some(rx);
        }
        Ok(session)
    }

    async fn close(self) {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Clonable in-memory stdout.
#[derive(Clone, Default)]
struct SharedOutput(Arc<Mutex<Vec<u8>>>);

impl SharedOutput {
    fn text(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl Write for SharedOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Output that always fails with the given error kind.
struct FailingOutput(io::ErrorKind);

impl Write for FailingOutput {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::from(self.0))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Output whose first write panics.
struct PanickingOutput;

impl Write for PanickingOutput {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        panic!("renderer bug");
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn params(up_time: Option<&str>) -> RunParameters {
    RunParameters::new("proj-1", "", up_time, None).unwrap()
}

fn batch(text: &str) -> TailLogEntriesResponse {
    TailLogEntriesResponse {
        entries: vec![LogEntry {
            log_name: "projects/proj-1/logs/app".to_string(),
            payload: Some(Payload::TextPayload(text.to_string())),
            ..Default::default()
        }],
        ..Default::default()
    }
}

fn batches(items: Vec<Result<TailLogEntriesResponse, Status>>) -> ResponseStream {
    stream::iter(items).boxed()
}

#[tokio::test]
async fn renders_batches_in_order_and_stops_when_the_stream_ends() {
    let connector = FakeConnector::with_responses(batches(vec![
        Ok(batch("first")),
        Ok(batch("second")),
        Ok(batch("third")),
    ]));
    let output = SharedOutput::default();

    let reason = run_log_tail(&params(None), &connector, CancellationToken::new(), output.clone())
        .await
        .unwrap();

    assert_eq!(reason, StopReason::StreamEnded);
    let text = output.text();
    let first = text.find(" first").unwrap();
    let second = text.find(" second").unwrap();
    let third = text.find(" third").unwrap();
    assert!(first < second && second < third);
    assert_eq!(text.matches("projects/proj-1/logs/app").count(), 3);
    assert_eq!(connector.state.closes(), 1);
}

#[tokio::test]
async fn sends_one_subscription_request_then_closes_the_send_direction() {
    let connector = FakeConnector::with_responses(batches(vec![]));

    run_log_tail(&params(None), &connector, CancellationToken::new(), SharedOutput::default())
        .await
        .unwrap();

    let sent = connector.state.sent_requests().expect("send direction closed");
    assert_eq!(
        sent,
        vec![TailLogEntriesRequest {
            resource_names: vec!["projects/proj-1".to_string()],
            filter: String::new(),
            buffer_window: None,
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn stops_cleanly_once_the_up_time_elapses() {
    let connector = FakeConnector::default();
    let started = Instant::now();

    let reason = run_log_tail(
        &params(Some("2s")),
        &connector,
        CancellationToken::new(),
        SharedOutput::default(),
    )
    .await
    .unwrap();

    assert_eq!(reason, StopReason::UpTimeElapsed);
    assert!(started.elapsed() >= Duration::from_secs(2));
    assert_eq!(connector.state.closes(), 1);
    assert!(connector.state.sent_requests().is_some());
}

#[tokio::test(start_paused = true)]
async fn stops_cleanly_on_cancellation_without_an_up_time() {
    let connector = FakeConnector::default();
    let cancel = CancellationToken::new();
    let started = Instant::now();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        trigger.cancel();
    });

    let reason = run_log_tail(&params(None), &connector, cancel, SharedOutput::default())
        .await
        .unwrap();

    assert_eq!(reason, StopReason::Cancelled);
    assert!(started.elapsed() >= Duration::from_millis(500));
    assert_eq!(connector.state.closes(), 1);
}

#[tokio::test(start_paused = true)]
async fn cancellation_wins_over_a_longer_up_time() {
    let connector = FakeConnector::default();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let reason = run_log_tail(&params(Some("1h")), &connector, cancel, SharedOutput::default())
        .await
        .unwrap();

    assert_eq!(reason, StopReason::Cancelled);
}

#[tokio::test]
async fn surfaces_a_receive_error_and_releases_resources_once() {
    let connector =
        FakeConnector::with_responses(batches(vec![Err(Status::unavailable("backend down"))]));

    let err = run_log_tail(
        &params(Some("1h")),
        &connector,
        CancellationToken::new(),
        SharedOutput::default(),
    )
    .await
    .unwrap_err();

    assert_eq!(err, TailError::Stream("Unavailable: backend down".into()));
    assert_eq!(
        err.to_string(),
        "error receiving response: Unavailable: backend down"
    );
    assert_eq!(connector.state.closes(), 1);
    assert!(connector.state.sent_requests().is_some());
}

#[tokio::test]
async fn entries_before_an_error_are_still_rendered() {
    let connector = FakeConnector::with_responses(batches(vec![
        Ok(batch("before")),
        Err(Status::permission_denied("no access")),
    ]));
    let output = SharedOutput::default();

    let err = run_log_tail(&params(None), &connector, CancellationToken::new(), output.clone())
        .await
        .unwrap_err();

    assert!(matches!(err, TailError::Stream(msg) if msg == "PermissionDenied: no access"));
    assert!(output.text().contains(" before"));
}

#[tokio::test]
async fn empty_batches_are_not_rendered() {
    let connector = FakeConnector::with_responses(batches(vec![
        Ok(TailLogEntriesResponse::default()),
        Ok(batch("only")),
        Ok(TailLogEntriesResponse::default()),
    ]));
    let output = SharedOutput::default();

    run_log_tail(&params(None), &connector, CancellationToken::new(), output.clone())
        .await
        .unwrap();

    assert_eq!(output.text().matches("projects/proj-1/logs/app").count(), 1);
}

#[tokio::test]
async fn connect_failure_is_a_connection_error() {
    let connector = FakeConnector {
        connect_error: Some(TailError::Connection("failed to create client: refused".into())),
        ..Default::default()
    };

    let err = run_log_tail(&params(None), &connector, CancellationToken::new(), SharedOutput::default())
        .await
        .unwrap_err();

    assert_eq!(
        err,
        TailError::Connection("failed to create client: refused".into())
    );
    assert_eq!(connector.state.closes(), 0);
}

#[tokio::test]
async fn stream_open_failure_still_closes_the_client() {
    let connector = FakeConnector {
        open_error: Mutex::new(Some(TailError::Connection(
            "failed to create TailLogEntries".into(),
        ))),
        ..Default::default()
    };

    let err = run_log_tail(&params(None), &connector, CancellationToken::new(), SharedOutput::default())
        .await
        .unwrap_err();

    assert!(matches!(err, TailError::Connection(_)));
    assert_eq!(connector.state.connects.load(Ordering::SeqCst), 1);
    assert_eq!(connector.state.closes(), 1);
}

#[tokio::test]
async fn send_failure_never_starts_consuming() {
    let polled = Arc::new(AtomicBool::new(false));
    let flag = polled.clone();
    let responses = stream::poll_fn(move |_| {
        flag.store(true, Ordering::SeqCst);
        Poll::<Option<Result<TailLogEntriesResponse, Status>>>::Ready(None)
    })
    .boxed();

    let connector = FakeConnector {
        drop_requests: true,
        ..FakeConnector::with_responses(responses)
    };

    let err = run_log_tail(&params(None), &connector, CancellationToken::new(), SharedOutput::default())
        .await
        .unwrap_err();

    assert_eq!(
        err,
        TailError::Connection("failed to send stream request: stream closed".into())
    );
    tokio::task::yield_now().await;
    assert!(!polled.load(Ordering::SeqCst));
    assert_eq!(connector.state.closes(), 1);
}

#[tokio::test]
async fn closed_output_ends_the_run_cleanly() {
    let connector = FakeConnector::with_responses(
        stream::iter(vec![Ok(batch("a"))])
            .chain(stream::pending())
            .boxed(),
    );

    let reason = run_log_tail(
        &params(None),
        &connector,
        CancellationToken::new(),
        FailingOutput(io::ErrorKind::BrokenPipe),
    )
    .await
    .unwrap();

    assert_eq!(reason, StopReason::StreamEnded);
}

#[tokio::test]
async fn other_output_failures_are_stream_errors() {
    let connector = FakeConnector::with_responses(batches(vec![Ok(batch("a"))]));

    let err = run_log_tail(
        &params(None),
        &connector,
        CancellationToken::new(),
        FailingOutput(io::ErrorKind::PermissionDenied),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, TailError::Stream(msg) if msg.starts_with("failed to write log entries")));
}

#[tokio::test(start_paused = true)]
async fn cancellation_interrupts_a_stalled_connect() {
    let connector = FakeConnector {
        hang_connect: true,
        ..Default::default()
    };
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        trigger.cancel();
    });

    let reason = run_log_tail(&params(None), &connector, cancel, SharedOutput::default())
        .await
        .unwrap();

    assert_eq!(reason, StopReason::Cancelled);
    assert_eq!(connector.state.connects.load(Ordering::SeqCst), 1);
    assert_eq!(connector.state.closes(), 0);
}

#[tokio::test(start_paused = true)]
async fn cancellation_interrupts_a_stalled_stream_open_and_closes_the_client() {
    let connector = FakeConnector {
        hang_open: true,
        ..Default::default()
    };
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        trigger.cancel();
    });

    let reason = run_log_tail(&params(Some("1h")), &connector, cancel, SharedOutput::default())
        .await
        .unwrap();

    assert_eq!(reason, StopReason::Cancelled);
    assert_eq!(connector.state.closes(), 1);
}

#[tokio::test]
async fn a_panicking_consumer_fails_the_run() {
    let connector = FakeConnector::with_responses(batches(vec![Ok(batch("boom"))]));

    let err = run_log_tail(&params(None), &connector, CancellationToken::new(), PanickingOutput)
        .await
        .unwrap_err();

    assert!(matches!(err, TailError::Stream(msg) if msg.contains("panicked")));
    assert_eq!(connector.state.closes(), 1);
}

#[tokio::test(start_paused = true)]
async fn shutdown_notice_goes_to_diagnostics_not_to_the_entry_output() {
    let diagnostics = SharedOutput::default();
    let writer = diagnostics.clone();
    let _guard = tracing::subscriber::set_default(build_subscriber(
        EnvFilter::new("info"),
        move || writer.clone(),
        false,
    ));

    let connector = FakeConnector::with_responses(
        stream::iter(vec![Ok(batch("entry"))])
            .chain(stream::pending())
            .boxed(),
    );
    let output = SharedOutput::default();

    let reason = run_log_tail(&params(Some("2s")), &connector, CancellationToken::new(), output.clone())
        .await
        .unwrap();

    assert_eq!(reason, StopReason::UpTimeElapsed);
    assert!(diagnostics.text().contains("log streaming is shutting down..."));
    assert!(output.text().contains(" entry"));
    assert!(!output.text().contains("shutting down"));
}
