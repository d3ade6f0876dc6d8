#![expect(
    clippy::module_name_repetitions,
    reason = "Error types include the module name to indicate their scope"
)]

use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;

/// WebSocket error variants.
#[non_exhaustive]
#[derive(Debug)]
pub enum WsError {
    /// Error connecting to or communicating with the WebSocket server
    Connection(tokio_tungstenite::tungstenite::Error),
    /// Error parsing an inbound frame
    MessageParse {
        /// Location of the offending value inside the frame (e.g. `type`, `data.status`)
        path: String,
        /// Underlying JSON error
        source: serde_json::Error,
    },
    /// WebSocket connection was closed before the operation could complete
    ConnectionClosed,
    /// No correlated response arrived in time
    RequestTimeout {
        /// Correlation id the request was sent with
        correlation_id: String,
        /// How long the request waited
        timeout: Duration,
    },
    /// Subscription stream lagged and missed messages
    Lagged {
        /// Number of messages that were missed
        count: u64,
    },
}

impl WsError {
    /// Whether this error is a request that ran out of time.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::RequestTimeout { .. })
    }
}

impl fmt::Display for WsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection(e) => write!(f, "WebSocket connection error: {e}"),
            Self::MessageParse { path, source } => {
                write!(f, "Failed to parse WebSocket message at `{path}`: {source}")
            }
            Self::ConnectionClosed => write!(f, "WebSocket connection closed"),
            Self::RequestTimeout {
                correlation_id,
                timeout,
            } => write!(
                f,
                "No response for request {correlation_id} within {}ms",
                timeout.as_millis()
            ),
            Self::Lagged { count } => write!(f, "Subscription lagged, missed {count} messages"),
        }
    }
}

impl StdError for WsError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Connection(e) => Some(e),
            Self::MessageParse { source, .. } => Some(source),
            _ => None,
        }
    }
}

// Integration with main Error type
impl From<WsError> for crate::error::Error {
    fn from(e: WsError) -> Self {
        crate::error::Error::with_source(crate::error::Kind::WebSocket, e)
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for crate::error::Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        crate::error::Error::with_source(crate::error::Kind::WebSocket, WsError::Connection(e))
    }
}
