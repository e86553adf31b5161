// Local crates
use crate::helpers::duration::parse_duration;

// External crates
use std::time::Duration;

/// Endpoint used when neither a flag nor the profile names one.
pub const DEFAULT_ENDPOINT: &str = "https://logging.googleapis.com";

/// Tail error handling
/// - Every variant is terminal; nothing is retried. The process reports the
/// error once on stderr and exits nonzero.
/// - A clean end of stream, an elapsed up-time and a cancellation are not
/// errors and never appear here.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TailError {
    /// Missing or invalid input, detected before any external call.
    #[error("{0}")]
    Configuration(String),
    /// Client construction, stream construction or request send failed.
    #[error("{0}")]
    Connection(String),
    /// The tailing session failed after the request was sent.
    #[error("error receiving response: {0}")]
    Stream(String),
}

/// Immutable parameters of a single tailing run.
///
/// Built once from the command line (and optional profile) before any
/// client is constructed, then passed by reference into the runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunParameters {
    /// Google Cloud project whose logs are tailed. Never empty.
    pub project_id: String,
    /// Filter expression passed through verbatim. Empty means no filtering.
    pub filter: String,
    /// Stop after this long. `None` runs until cancelled or the stream ends.
    pub up_time: Option<Duration>,
    /// Server-side buffering window for out-of-order entries.
    pub buffer_window: Option<Duration>,
}

impl RunParameters {
    /// Validate raw run inputs.
    ///
    /// An empty or absent `up_time` means the run is unbounded; anything
    /// else must be a positive duration expression.
    pub fn new(
        project_id: impl Into<String>,
        filter: impl Into<String>,
        up_time: Option<&str>,
        buffer_window: Option<&str>,
    ) -> Result<Self, TailError> {
        let project_id = project_id.into();
        if project_id.is_empty() {
            return Err(TailError::Configuration("missing -projectId".to_string()));
        }

        let up_time = match optional_duration("-process-up-time", up_time)? {
            Some(d) if d.is_zero() => {
                return Err(TailError::Configuration(
                    "-process-up-time must be a positive duration".to_string(),
                ));
            }
            other => other,
        };
        let buffer_window = optional_duration("-buffer-window", buffer_window)?;

        Ok(Self {
            project_id,
            filter: filter.into(),
            up_time,
            buffer_window,
        })
    }

    /// Parent resource the subscription is scoped to.
    pub fn resource_name(&self) -> String {
        format!("projects/{}", self.project_id)
    }
}

fn optional_duration(flag: &str, raw: Option<&str>) -> Result<Option<Duration>, TailError> {
    match raw {
        None | Some("") => Ok(None),
        Some(raw) => parse_duration(raw)
            .map(Some)
            .map_err(|e| TailError::Configuration(format!("error parsing {flag}: {e}"))),
    }
}

/// Where and how to reach the tailing service.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// Service URL, `https://` unless pointing at a local emulator.
    pub endpoint: String,
    /// OAuth2 access token sent as a bearer `authorization` header.
    pub access_token: Option<String>,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            access_token: None,
        }
    }
}

// The token must never end up in logs.
impl std::fmt::Debug for ConnectionSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSettings")
            .field("endpoint", &self.endpoint)
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
