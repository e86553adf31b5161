//! Lifecycle of one tailing run.
//!
//! `Idle → Validating → Connecting → Subscribing → Streaming → {Completed | Failed}`
//!
//! Validation happens before this module is entered (see `RunParameters::new`).
//! From here on the runner:
//! 1. constructs the client and opens the `TailLogEntries` stream, giving up
//! early if shutdown is requested meanwhile,
//! 2. sends the subscription request,
//! 3. spawns one consumer task that renders responses to the output and
//! reports a failure over a single-slot `oneshot` channel,
//! 4. waits for the first of {consumer error or end, up-time, cancellation},
//! 5. closes the send direction, then the client, whatever the outcome.
//!
//! Nothing is retried. The consumer is never aborted; closing the send
//! direction lets the server finish the stream, which ends the consumer.

// Local crates
use crate::{
    proto::TailLogEntriesRequest,
    tailer::{
        client::{Connector, LogTailClient, ResponseStream, TailSession},
        models::{RunParameters, TailError},
        render,
    },
};

// External crates
use futures::StreamExt;
use std::io::{self, Write};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// How a successful run came to a stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The configured up-time elapsed.
    UpTimeElapsed,
    /// Shutdown was requested (signal or caller).
    Cancelled,
    /// The server ended the stream, or the output was closed.
    StreamEnded,
}

/// Tail log entries until a stop condition, writing rendered batches to `output`.
///
/// Returns `Ok` for the clean stop conditions and the terminal error
/// otherwise. The client and stream are released on every path once they
/// have been acquired.
#[instrument(
    name = "log_tail_runtime::run",
    target = "runtime::runtime",
    skip_all,
    fields(project_id = %params.project_id),
    level = "debug"
)]
pub async fn run_log_tail<C, W>(
    params: &RunParameters,
    connector: &C,
    cancel: CancellationToken,
    output: W,
) -> Result<StopReason, TailError>
where
    C: Connector,
    W: Write + Send + 'static,
{
    // Connecting and opening may stall on the network, so both race shutdown.
    let connected = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        connected = connector.connect() => Some(connected),
    };
    let Some(connected) = connected else {
        tracing::info!("log streaming is shutting down...");
        return Ok(StopReason::Cancelled);
    };
    let mut client = connected?;

    let opened = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        opened = client.tail_log_entries() => Some(opened),
    };
    let mut session = match opened {
        Some(Ok(session)) => session,
        Some(Err(e)) => {
            client.close().await;
            return Err(e);
        }
        None => {
            tracing::info!("log streaming is shutting down...");
            client.close().await;
            return Ok(StopReason::Cancelled);
        }
    };

    let outcome = stream_until_stopped(params, &mut session, cancel, output).await;

    // Teardown, reverse order of acquisition.
    session.close_send();
    client.close().await;

    outcome
}

/// Subscribe, spawn the consumer and wait for the first stop condition.
async fn stream_until_stopped<W>(
    params: &RunParameters,
    session: &mut TailSession,
    cancel: CancellationToken,
    output: W,
) -> Result<StopReason, TailError>
where
    W: Write + Send + 'static,
{
    let request = TailLogEntriesRequest::from(params);
    session.send(request).await?;

    let responses = session.take_responses().ok_or_else(|| {
        TailError::Connection("response stream was already consumed".to_string())
    })?;

    // Single slot: the consumer sends at most one error and never waits.
    let (error_tx, mut error_rx) = oneshot::channel::<TailError>();

    tracing::info!(resource = %params.resource_name(), "streaming logs");
    let consumer = tokio::spawn(consume_responses(responses, output, error_tx));

    let reason = tokio::select! {
        received = &mut error_rx => match received {
            Ok(err) => return Err(err),
            Err(_) => {
                // The sender also drops when the consumer unwinds.
                if let Err(e) = consumer.await {
                    if e.is_panic() {
                        return Err(TailError::Stream(format!("response consumer panicked: {e}")));
                    }
                }
                tracing::info!("log stream ended, shutting down...");
                StopReason::StreamEnded
            }
        },
        _ = up_time_elapsed(params.up_time) => {
            tracing::info!(up_time = ?params.up_time, "log streaming is shutting down...");
            StopReason::UpTimeElapsed
        },
        _ = cancel.cancelled() => {
            tracing::info!("log streaming is shutting down...");
            StopReason::Cancelled
        },
    };

    Ok(reason)
}

/// Resolves after `up_time`, or never when no up-time is configured.
async fn up_time_elapsed(up_time: Option<Duration>) {
    match up_time {
        Some(d) => tokio::time::sleep(d).await,
        None => std::future::pending::<()>().await,
    }
}

/// Consumer task: render each non-empty response as soon as it arrives.
///
/// Ends silently on a clean end of stream or a closed output (dropping
/// `errors` unsent), and hands any other failure to `errors`.
#[instrument(
    name = "log_tail_runtime::consume",
    target = "runtime::runtime",
    skip_all,
    level = "debug"
)]
async fn consume_responses<W: Write>(
    mut responses: ResponseStream,
    mut output: W,
    errors: oneshot::Sender<TailError>,
) {
    let mut batches: u64 = 0;

    while let Some(item) = responses.next().await {
        let response = match item {
            Ok(response) => response,
            Err(status) => {
                tracing::debug!(code = ?status.code(), "TailLogEntries stream failed");
                let _ = errors.send(TailError::Stream(format!(
                    "{:?}: {}",
                    status.code(),
                    status.message()
                )));
                return;
            }
        };

        if render::is_empty(&response) {
            continue;
        }

        if let Err(e) = render::write_response(&mut output, &response) {
            if e.kind() == io::ErrorKind::BrokenPipe {
                tracing::debug!("Output closed, no longer rendering entries");
                return;
            }
            let _ = errors.send(TailError::Stream(format!("failed to write log entries: {e}")));
            return;
        }
        batches += 1;
    }

    tracing::debug!(batches, "TailLogEntries stream ended");
}
