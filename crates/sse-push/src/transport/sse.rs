//! HTTP server-sent-event transport.

use std::time::Duration;

use futures_util::StreamExt;
use tokio::{task::JoinHandle, time::timeout};
use tracing::{debug, info, warn};

use super::{PushTransport, TransportConnection, TransportSink, parse::SseDecoder};
use crate::{
    config::PushConfig,
    error::{PushError, PushResult},
};

/// [`PushTransport`] that streams `text/event-stream` over HTTP GET.
///
/// Each opened connection runs in its own tokio task; closing the connection
/// aborts the task, which drops the response body.
#[derive(Clone, Debug)]
pub struct HttpSseTransport {
    client: reqwest::Client,
    headers: http::HeaderMap,
    connect_timeout: Duration,
}

impl HttpSseTransport {
    /// Build a transport from the client configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &PushConfig) -> PushResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| PushError::config(format!("Failed to build HTTP client: {e}")))?;

        let mut headers = config.headers.clone();
        headers.insert(
            http::header::ACCEPT,
            http::HeaderValue::from_static("text/event-stream"),
        );
        headers.insert(
            http::header::CACHE_CONTROL,
            http::HeaderValue::from_static("no-cache"),
        );

        Ok(Self {
            client,
            headers,
            connect_timeout: config.connect_timeout,
        })
    }
}

impl PushTransport for HttpSseTransport {
    fn open(&self, url: &str, sink: TransportSink) -> Box<dyn TransportConnection> {
        let task = tokio::spawn(drive_stream(self.clone(), url.to_string(), sink));
        Box::new(HttpSseConnection { task })
    }
}

/// Handle to one HTTP SSE stream.
#[derive(Debug)]
pub struct HttpSseConnection {
    task: JoinHandle<()>,
}

impl TransportConnection for HttpSseConnection {
    fn close(&mut self) {
        self.task.abort();
    }

    fn is_closed(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for HttpSseConnection {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Send the request and validate status and content type.
async fn establish(transport: &HttpSseTransport, url: &str) -> PushResult<reqwest::Response> {
    let req = transport
        .client
        .get(url)
        .headers(transport.headers.clone());

    let resp = timeout(transport.connect_timeout, req.send())
        .await
        .map_err(|_| PushError::timeout(transport.connect_timeout))??;

    let status = resp.status();
    if !status.is_success() {
        return Err(PushError::invalid_status(status));
    }

    if let Some(ct) = resp.headers().get(http::header::CONTENT_TYPE) {
        let ct_str = ct.to_str().unwrap_or("");
        if !ct_str.contains("text/event-stream") {
            return Err(PushError::invalid_content_type(ct_str));
        }
    }

    Ok(resp)
}

/// Connection task: open, forward every data frame, report how it ended.
async fn drive_stream(transport: HttpSseTransport, url: String, sink: TransportSink) {
    info!(url = %url, generation = sink.generation(), "SSE connecting");

    let resp = match establish(&transport, &url).await {
        Ok(resp) => resp,
        Err(err) => {
            warn!(url = %url, error = %err, "SSE connection failed");
            sink.failed(err).await;
            return;
        }
    };

    info!(url = %url, "SSE connection established");
    if !sink.opened().await {
        return;
    }

    let mut body = resp.bytes_stream();
    let mut decoder = SseDecoder::new();

    while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(err) => {
                warn!(url = %url, error = %err, "SSE stream error");
                sink.failed(PushError::stream(err.to_string())).await;
                return;
            }
        };
        decoder.push(&chunk);

        loop {
            match decoder.next_frame() {
                Ok(Some(frame)) => {
                    debug!(event = %frame.event, id = %frame.id, "SSE frame received");
                    if !sink.message(frame.data).await {
                        debug!("Push state machine gone, dropping SSE stream");
                        return;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    warn!(url = %url, error = %err, "SSE stream is not valid UTF-8");
                    sink.failed(PushError::stream(err.to_string())).await;
                    return;
                }
            }
        }
    }

    warn!(url = %url, "SSE stream ended");
    sink.failed(PushError::StreamEnded).await;
}
