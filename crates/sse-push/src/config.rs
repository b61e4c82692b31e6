//! Push client configuration.

use std::time::Duration;

use crate::reconnect::BackoffConfig;

/// Default path of the SSE endpoint relative to the base URI.
pub const DEFAULT_STREAM_PATH: &str = "v1/sse";

/// Default number of consecutive failures tolerated before giving up.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Configuration for the push client.
///
/// Read once at construction; nothing re-reads it afterwards.
#[derive(Clone, Debug)]
pub struct PushConfig {
    /// Base URI of the backend, e.g. `https://cases.example.com/api/`.
    pub endpoint_base_uri: String,
    /// SSE path appended to the base URI.
    pub stream_path: String,
    /// Additional HTTP headers sent with every SSE request.
    pub headers: http::HeaderMap,
    /// Timeout for establishing the HTTP response.
    pub connect_timeout: Duration,
    /// Consecutive transport failures tolerated before the terminal state.
    pub max_retries: u32,
    /// Delay between a failure and its retry (`None` = retry immediately).
    pub reconnect_backoff: Option<BackoffConfig>,
    /// Capacity of each consumer stream and of the transport notice channel.
    pub event_channel_capacity: usize,
    /// Capacity of the command channel.
    pub command_channel_capacity: usize,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            endpoint_base_uri: String::new(),
            stream_path: DEFAULT_STREAM_PATH.to_string(),
            headers: http::HeaderMap::new(),
            connect_timeout: Duration::from_secs(10),
            max_retries: DEFAULT_MAX_RETRIES,
            reconnect_backoff: None,
            event_channel_capacity: 256,
            command_channel_capacity: 64,
        }
    }
}

impl PushConfig {
    /// Create a new configuration for the given backend base URI.
    #[must_use]
    pub fn new(endpoint_base_uri: impl Into<String>) -> Self {
        Self {
            endpoint_base_uri: endpoint_base_uri.into(),
            ..Default::default()
        }
    }

    /// Set the SSE path relative to the base URI.
    #[must_use]
    pub fn stream_path(mut self, path: impl Into<String>) -> Self {
        self.stream_path = path.into();
        self
    }

    /// Set additional HTTP headers.
    #[must_use]
    pub fn headers(mut self, headers: http::HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Set the connection timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the retry budget.
    #[must_use]
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Space automatic reconnects out with exponential backoff.
    #[must_use]
    pub fn reconnect_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.reconnect_backoff = Some(backoff);
        self
    }

    /// Set the event channel capacity.
    #[must_use]
    pub fn event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity;
        self
    }

    /// Set the command channel capacity.
    #[must_use]
    pub fn command_channel_capacity(mut self, capacity: usize) -> Self {
        self.command_channel_capacity = capacity;
        self
    }

    /// URL of the SSE endpoint, resuming `subscription_id` when given.
    pub fn sse_url(&self, subscription_id: Option<&str>) -> String {
        let mut url = self.endpoint_base_uri.clone();
        if !url.ends_with('/') {
            url.push('/');
        }
        url.push_str(self.stream_path.trim_matches('/'));
        if let Some(id) = subscription_id {
            url.push('/');
            url.push_str(id);
        }
        url
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error message string if any field has an invalid value.
    pub fn validate(&self) -> Result<(), String> {
        if self.endpoint_base_uri.is_empty() {
            return Err("Endpoint base URI cannot be empty".to_string());
        }
        if !(self.endpoint_base_uri.starts_with("http://")
            || self.endpoint_base_uri.starts_with("https://"))
        {
            return Err("Endpoint base URI must use http or https".to_string());
        }
        if self.stream_path.trim_matches('/').is_empty() {
            return Err("Stream path cannot be empty".to_string());
        }
        if self.connect_timeout.is_zero() {
            return Err("Connect timeout must be > 0".to_string());
        }
        if self.event_channel_capacity == 0 {
            return Err("Event channel capacity must be > 0".to_string());
        }
        if self.command_channel_capacity == 0 {
            return Err("Command channel capacity must be > 0".to_string());
        }
        if let Some(backoff) = &self.reconnect_backoff {
            backoff.validate()?;
        }
        Ok(())
    }
}
