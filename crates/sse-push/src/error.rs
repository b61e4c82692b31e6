//! Error handling for the push client.

use std::time::Duration;

use thiserror::Error;

/// The main result type used throughout the push client.
pub type PushResult<T> = Result<T, PushError>;

/// Error type for push client operations and transport failures.
#[derive(Error, Debug)]
pub enum PushError {
    /// HTTP request errors (wraps reqwest::Error)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Timeout errors
    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    /// The SSE endpoint answered with a non-2xx status
    #[error("SSE endpoint returned status {status}")]
    InvalidStatus { status: http::StatusCode },

    /// The SSE endpoint answered with something other than `text/event-stream`
    #[error("SSE endpoint returned content type {content_type:?}")]
    InvalidContentType { content_type: String },

    /// The server closed the event stream
    #[error("SSE stream ended")]
    StreamEnded,

    /// The event stream broke mid-flight
    #[error("SSE stream error: {message}")]
    Stream { message: String },

    /// The connection actor is gone
    #[error("Connection closed{}", .message.as_deref().map(|m| format!(": {m}")).unwrap_or_default())]
    ConnectionClosed { message: Option<String> },
}

impl PushError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(duration: Duration) -> Self {
        Self::Timeout { duration }
    }

    /// Create an invalid-status error.
    pub fn invalid_status(status: http::StatusCode) -> Self {
        Self::InvalidStatus { status }
    }

    /// Create an invalid-content-type error.
    pub fn invalid_content_type(content_type: impl Into<String>) -> Self {
        Self::InvalidContentType {
            content_type: content_type.into(),
        }
    }

    /// Create a stream error.
    pub fn stream(message: impl Into<String>) -> Self {
        Self::Stream {
            message: message.into(),
        }
    }

    /// Create a connection-closed error.
    pub fn connection_closed(message: Option<String>) -> Self {
        Self::ConnectionClosed { message }
    }
}
