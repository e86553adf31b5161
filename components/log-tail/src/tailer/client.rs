//! Client side of the `TailLogEntries` bidirectional stream.
//!
//! The runner only sees the [`Connector`] and [`LogTailClient`] traits and a
//! [`TailSession`]. [`GrpcConnector`] is the production implementation backed
//! by a tonic channel; tests plug in in-memory fakes.
//!
//! The request direction is a bounded mpsc channel wrapped in a
//! `ReceiverStream`, the same way the outbound half of any tonic client
//! stream is fed. The RPC itself is started lazily on the first poll of the
//! response stream, so the subscription request is always queued before the
//! server sees the call.

// Local crates
use crate::proto::{LoggingServiceV2Client, TailLogEntriesRequest, TailLogEntriesResponse};
use crate::tailer::models::{ConnectionSettings, TailError};

// External crates
use futures::StreamExt;
use futures::stream::BoxStream;
use std::future::Future;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::metadata::AsciiMetadataValue;
use tonic::service::Interceptor;
use tonic::service::interceptor::InterceptedService;
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};
use tonic::{Request, Status};
use tracing::instrument;

/// Responses as seen by the consumer. `None` is a clean end of stream.
pub type ResponseStream = BoxStream<'static, Result<TailLogEntriesResponse, Status>>;

/// Capacity of the request direction. Only one request is ever sent.
const REQUEST_CHANNEL_CAPACITY: usize = 1;

/// One open `TailLogEntries` session.
///
/// Owns the send direction until [`TailSession::close_send`] and the
/// response stream until the consumer takes it.
pub struct TailSession {
    requests: Option<mpsc::Sender<TailLogEntriesRequest>>,
    responses: Option<ResponseStream>,
}

impl TailSession {
    /// Assemble a session from its two directions.
    pub fn new(requests: mpsc::Sender<TailLogEntriesRequest>, responses: ResponseStream) -> Self {
        Self {
            requests: Some(requests),
            responses: Some(responses),
        }
    }

    /// Create a session whose request direction is a fresh channel,
    /// returning the receiving end alongside it.
    pub fn channel(
        responses: ResponseStream,
    ) -> (Self, mpsc::Receiver<TailLogEntriesRequest>) {
        let (tx, rx) = mpsc::channel(REQUEST_CHANNEL_CAPACITY);
        (Self::new(tx, responses), rx)
    }

    /// Send a request on the stream.
    pub async fn send(&self, request: TailLogEntriesRequest) -> Result<(), TailError> {
        let Some(requests) = &self.requests else {
            return Err(TailError::Connection(
                "failed to send stream request: send direction already closed".to_string(),
            ));
        };
        requests.send(request).await.map_err(|_| {
            TailError::Connection("failed to send stream request: stream closed".to_string())
        })
    }

    /// Hand the response stream to the consumer. Yields it only once.
    pub fn take_responses(&mut self) -> Option<ResponseStream> {
        self.responses.take()
    }

    /// Close the send direction. Later calls are no-ops.
    pub fn close_send(&mut self) {
        if self.requests.take().is_some() {
            tracing::debug!("Closed TailLogEntries send direction");
        }
    }
}

impl std::fmt::Debug for TailSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TailSession")
            .field("send_open", &self.requests.is_some())
            .field("responses_taken", &self.responses.is_none())
            .finish()
    }
}

/// Builds a client handle to the tailing service.
pub trait Connector {
    /// Client type produced by [`Connector::connect`].
    type Client: LogTailClient;

    /// Construct a client. Failures are [`TailError::Connection`] or, for
    /// unusable settings, [`TailError::Configuration`].
    fn connect(&self) -> impl Future<Output = Result<Self::Client, TailError>> + Send;
}

/// A connected client able to open tailing sessions.
pub trait LogTailClient {
    /// Open a `TailLogEntries` stream.
    fn tail_log_entries(&mut self) -> impl Future<Output = Result<TailSession, TailError>> + Send;

    /// Release the client. Consumes it so it cannot be closed twice.
    fn close(self) -> impl Future<Output = ()> + Send;
}

/// Attaches `authorization: Bearer <token>` to every call when a token is set.
#[derive(Clone)]
pub struct BearerAuth {
    header: Option<AsciiMetadataValue>,
}

impl BearerAuth {
    /// Build the interceptor, rejecting tokens that are not valid header values.
    pub fn new(token: Option<&str>) -> Result<Self, TailError> {
        let header = token
            .map(|t| {
                AsciiMetadataValue::try_from(format!("Bearer {t}")).map_err(|_| {
                    TailError::Configuration(
                        "access token contains characters not allowed in a header".to_string(),
                    )
                })
            })
            .transpose()?;
        Ok(Self { header })
    }
}

impl std::fmt::Debug for BearerAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BearerAuth")
            .field("has_token", &self.header.is_some())
            .finish()
    }
}

impl Interceptor for BearerAuth {
    fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, Status> {
        if let Some(header) = &self.header {
            request
                .metadata_mut()
                .insert("authorization", header.clone());
        }
        Ok(request)
    }
}

type InnerClient = LoggingServiceV2Client<InterceptedService<Channel, BearerAuth>>;

/// Connects to the Cloud Logging API over gRPC.
#[derive(Debug, Clone)]
pub struct GrpcConnector {
    settings: ConnectionSettings,
}

impl GrpcConnector {
    /// Connector for the given endpoint and credentials.
    pub fn new(settings: ConnectionSettings) -> Self {
        Self { settings }
    }

    fn endpoint(&self) -> Result<Endpoint, TailError> {
        let connection_error =
            |e: tonic::transport::Error| TailError::Connection(format!("failed to create client: {e}"));

        let mut endpoint =
            Endpoint::from_shared(self.settings.endpoint.clone()).map_err(connection_error)?;
        if self.settings.endpoint.starts_with("https://") {
            endpoint = endpoint
                .tls_config(ClientTlsConfig::new().with_native_roots())
                .map_err(connection_error)?;
        }
        Ok(endpoint)
    }
}

impl Connector for GrpcConnector {
    type Client = GrpcTailClient;

    #[instrument(
        name = "log_tail_client::connect",
        target = "tailer::client",
        skip_all,
        fields(endpoint = %self.settings.endpoint),
        level = "debug"
    )]
    async fn connect(&self) -> Result<GrpcTailClient, TailError> {
        let auth = BearerAuth::new(self.settings.access_token.as_deref())?;
        if self.settings.access_token.is_none() {
            tracing::warn!("No access token configured, calls will be unauthenticated");
        }

        let endpoint = self.endpoint()?;
        tracing::debug!("Creating HTTP/2 connection channel to the logging service");
        let channel = endpoint
            .connect()
            .await
            .map_err(|e| TailError::Connection(format!("failed to create client: {e}")))?;

        tracing::debug!("Connected to the logging service");
        Ok(GrpcTailClient {
            inner: LoggingServiceV2Client::with_interceptor(channel, auth),
        })
    }
}

/// Connected `LoggingServiceV2` client.
#[derive(Debug)]
pub struct GrpcTailClient {
    inner: InnerClient,
}

impl LogTailClient for GrpcTailClient {
    async fn tail_log_entries(&mut self) -> Result<TailSession, TailError> {
        let (request_tx, request_rx) = mpsc::channel(REQUEST_CHANNEL_CAPACITY);
        let mut client = self.inner.clone();

        // RPC status errors (permissions, bad filter) surface on the first
        // receive, after the request has been queued.
        let responses = async_stream::stream! {
            match client.tail_log_entries(ReceiverStream::new(request_rx)).await {
                Ok(response) => {
                    let mut inner = response.into_inner();
                    loop {
                        match inner.message().await {
                            Ok(Some(message)) => yield Ok(message),
                            Ok(None) => break,
                            Err(status) => {
                                yield Err(status);
                                break;
                            }
                        }
                    }
                }
                Err(status) => yield Err(status),
            }
        };

        Ok(TailSession::new(request_tx, responses.boxed()))
    }

    async fn close(self) {
        drop(self.inner);
        tracing::debug!("Closed logging service client");
    }
}
