//! Error taxonomy of the client.

use std::time::Duration;

use ttx_highlight::MalformedBatch;

/// Failure of a session operation or of a single request.
///
/// None of these are fatal to the session: after a connection failure the
/// session is `Stopped` and `start()` may be called again.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The analyzer could not be launched, reached, or initialized.
    #[error("cannot connect to analyzer: {0}")]
    Connection(String),
    /// The connection dropped while the request was in flight.
    #[error("connection to analyzer lost")]
    ConnectionLost,
    #[error("`{method}` timed out after {after:?}")]
    Timeout { method: String, after: Duration },
    #[error("analyzer session is not running")]
    NotRunning,
    #[error("analyzer returned error {code} for `{method}`: {message}")]
    Rpc {
        method: String,
        code: i64,
        message: String,
    },
    #[error("invalid `{method}` reply: {source}")]
    InvalidResponse {
        method: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("cannot encode `{method}` message: {source}")]
    Encode {
        method: String,
        #[source]
        source: serde_json::Error,
    },
}

impl SessionError {
    /// Whether the failure concerns only the request, leaving the connection up.
    #[must_use]
    pub fn is_request_local(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Rpc { .. } | Self::InvalidResponse { .. }
        )
    }
}

/// Failure of a client-level operation.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("analyzer sent a malformed token batch: {0}")]
    Malformed(#[from] MalformedBatch),
    #[error("document is not open: {0}")]
    UnknownDocument(String),
}
