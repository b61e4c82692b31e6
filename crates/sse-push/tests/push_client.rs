//! Integration tests for the push client over HTTP.
//!
//! A mock hyper server plays the workflow engine: every accepted connection
//! consumes the next scripted reply and records the request path, so tests can
//! check reconnect and resumption URLs.

use std::{
    convert::Infallible,
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Duration,
};

use futures_util::{StreamExt, stream};
use http_body_util::{BodyExt, Full, StreamBody, combinators::BoxBody};
use hyper::{
    Request, Response,
    body::{Bytes, Frame, Incoming},
    server::conn::http1,
    service::service_fn,
};
use hyper_util::rt::TokioIo;
use sse_push::{ConnectionState, ConnectionStatus, EventKind, PushConfig, SsePushClient};
use tokio::{net::TcpListener, time::timeout};

// ---------------------------------------------------------------------------
// Mock push server helpers
// ---------------------------------------------------------------------------

#[derive(Clone, Copy)]
enum Reply {
    /// Complete response; the stream ends after `body`.
    Complete {
        status: u16,
        content_type: &'static str,
        body: &'static str,
    },
    /// `text/event-stream` response that sends `body` and then stays open.
    Open(&'static str),
}

fn complete(status: u16, content_type: &'static str, body: &'static str) -> Reply {
    Reply::Complete {
        status,
        content_type,
        body,
    }
}

struct MockServer {
    addr: SocketAddr,
    paths: Arc<Mutex<Vec<String>>>,
}

impl MockServer {
    fn base_uri(&self) -> String {
        format!("http://{}/api/", self.addr)
    }

    fn paths(&self) -> Vec<String> {
        self.paths.lock().expect("lock paths").clone()
    }
}

fn respond(reply: Reply) -> Response<BoxBody<Bytes, Infallible>> {
    match reply {
        Reply::Complete {
            status,
            content_type,
            body,
        } => Response::builder()
            .status(status)
            .header("content-type", content_type)
            .body(Full::new(Bytes::from(body)).boxed())
            .expect("build response"),
        Reply::Open(body) => {
            let frames = stream::iter([Ok::<_, Infallible>(Frame::data(Bytes::from(body)))])
                .chain(stream::pending());
            Response::builder()
                .status(200)
                .header("content-type", "text/event-stream")
                .body(BodyExt::boxed(StreamBody::new(frames)))
                .expect("build response")
        }
    }
}

/// Start a mock server that answers connection `n` with `replies[n]` and
/// drops connections once the script runs out.
async fn start_push_server(replies: Vec<Reply>) -> MockServer {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock server");
    let addr = listener.local_addr().expect("local addr");
    let replies = Arc::new(Mutex::new(replies.into_iter()));
    let paths = Arc::new(Mutex::new(Vec::new()));

    let server_paths = Arc::clone(&paths);
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let replies = Arc::clone(&replies);
            let paths = Arc::clone(&server_paths);
            let io = TokioIo::new(stream);
            tokio::spawn(async move {
                let _ = http1::Builder::new()
                    .serve_connection(
                        io,
                        service_fn(move |req: Request<Incoming>| {
                            paths
                                .lock()
                                .expect("lock paths")
                                .push(req.uri().path().to_string());
                            let reply = replies.lock().expect("lock replies").next();
                            let resp = match reply {
                                Some(reply) => respond(reply),
                                None => respond(complete(503, "text/plain", "")),
                            };
                            async move { Ok::<_, Infallible>(resp) }
                        }),
                    )
                    .await;
            });
        }
    });

    MockServer { addr, paths }
}

async fn wait_for_status(
    client: &SsePushClient,
    check: impl Fn(&ConnectionStatus) -> bool,
) -> ConnectionStatus {
    let mut status = client.status_changes();
    let current = timeout(Duration::from_secs(5), status.wait_for(|s| check(s)))
        .await
        .expect("timeout waiting for status")
        .expect("state machine alive")
        .clone();
    current
}

const ESTABLISHED_42: &str =
    "data: {\"eventType\":\"ESTABLISHED_CONNECTION\",\"subscriptionId\":\"sub-42\"}\n\n";

// ---------------------------------------------------------------------------
// End-to-end delivery
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_events_flow_from_server_to_filtered_streams() {
    let body = concat!(
        ": keep-alive\n\n",
        "data: {\"eventType\":\"ESTABLISHED_CONNECTION\",\"subscriptionId\":\"sub-42\"}\n\n",
        "event: case\ndata: {\"eventType\":\"CASE_CREATED\",\"processInstanceId\":\"p-1\"}\n\n",
        "data: {\"eventType\":\"TASK_UPDATE\",\"processInstanceId\":\"p-1\",\"taskId\":\"t-9\"}\n\n",
        "data: {\"eventType\":\"CASE_ASSIGNED\",\"processInstanceId\":\"p-2\"}\n\n",
    );
    let server = start_push_server(vec![Reply::Open(body)]).await;

    // Registered before the first await, so no frame can be missed.
    let client = SsePushClient::connect(PushConfig::new(server.base_uri())).expect("connect");
    let mut cases = client.filtered_stream([EventKind::CaseCreated, EventKind::CaseAssigned]);
    let mut tasks = client.filtered_stream([EventKind::TaskUpdate]);

    let status = wait_for_status(&client, |s| s.subscription_id.is_some()).await;
    assert_eq!(status.subscription_id.as_deref(), Some("sub-42"));
    assert_eq!(status.state, ConnectionState::Connected);

    let created = timeout(Duration::from_secs(5), cases.next_event())
        .await
        .expect("timeout")
        .expect("event");
    assert_eq!(created.kind(), Some(EventKind::CaseCreated));
    assert_eq!(created.process_instance_id(), Some("p-1"));

    let assigned = timeout(Duration::from_secs(5), cases.next_event())
        .await
        .expect("timeout")
        .expect("event");
    assert_eq!(assigned.process_instance_id(), Some("p-2"));

    let task = timeout(Duration::from_secs(5), tasks.next_event())
        .await
        .expect("timeout")
        .expect("event");
    assert_eq!(task.kind(), Some(EventKind::TaskUpdate));

    assert_eq!(server.paths(), vec!["/api/v1/sse".to_string()]);
}

#[tokio::test]
async fn test_consumers_are_independent() {
    let body = concat!(
        "data: {\"eventType\":\"PROCESS_END\",\"processInstanceId\":\"p-7\"}\n\n",
        "data: {\"eventType\":\"CASE_CREATED\",\"processInstanceId\":\"p-8\"}\n\n",
    );
    let server = start_push_server(vec![Reply::Open(body)]).await;
    let client = SsePushClient::connect(PushConfig::new(server.base_uri())).expect("connect");

    let mut ends = client.filtered_stream([EventKind::ProcessEnd]);
    let dropped = client.filtered_stream([EventKind::ProcessEnd]);
    let mut created = client.filtered_stream([EventKind::CaseCreated]);
    drop(dropped);
    assert_eq!(client.dispatcher().listener_count(EventKind::ProcessEnd), 1);

    let end = timeout(Duration::from_secs(5), ends.next_event())
        .await
        .expect("timeout")
        .expect("event");
    assert_eq!(end.process_instance_id(), Some("p-7"));

    let case = timeout(Duration::from_secs(5), created.next_event())
        .await
        .expect("timeout")
        .expect("event");
    assert_eq!(case.process_instance_id(), Some("p-8"));
    assert!(ends.try_next_event().is_none());
}

// ---------------------------------------------------------------------------
// Reconnects and resumption
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_reconnect_resumes_subscription() {
    let server = start_push_server(vec![
        complete(200, "text/event-stream", ESTABLISHED_42),
        Reply::Open("data: {\"eventType\":\"CASE_UNASSIGNED\",\"processInstanceId\":\"p-3\"}\n\n"),
    ])
    .await;

    let client = SsePushClient::connect(PushConfig::new(server.base_uri())).expect("connect");
    let mut unassigned = client.filtered_stream([EventKind::CaseUnassigned]);

    let event = timeout(Duration::from_secs(5), unassigned.next_event())
        .await
        .expect("timeout")
        .expect("event");
    assert_eq!(event.process_instance_id(), Some("p-3"));

    assert_eq!(
        server.paths(),
        vec!["/api/v1/sse".to_string(), "/api/v1/sse/sub-42".to_string()]
    );
    let status = wait_for_status(&client, |s| s.state.is_connected()).await;
    assert_eq!(status.retry_counter, 0);
    assert_eq!(status.subscription_id.as_deref(), Some("sub-42"));
}

#[tokio::test]
async fn test_wrong_content_type_counts_as_failure() {
    let server = start_push_server(vec![
        complete(200, "application/json", "{\"eventType\":\"CASE_CREATED\"}"),
        Reply::Open(ESTABLISHED_42),
    ])
    .await;

    let client = SsePushClient::connect(PushConfig::new(server.base_uri())).expect("connect");
    let status = wait_for_status(&client, |s| s.subscription_id.is_some()).await;

    assert_eq!(status.state, ConnectionState::Connected);
    assert_eq!(status.retry_counter, 0);
    assert_eq!(server.paths().len(), 2);
}

#[tokio::test]
async fn test_rejected_requests_exhaust_retry_budget() {
    let forbidden = complete(403, "application/json", "{\"error\":\"forbidden\"}");
    let server = start_push_server(vec![forbidden; 8]).await;

    let client = SsePushClient::connect(PushConfig::new(server.base_uri())).expect("connect");
    let mut errors = client.error_stream();

    let record = timeout(Duration::from_secs(5), errors.next_event())
        .await
        .expect("timeout")
        .expect("error record");
    assert_eq!(record.state, ConnectionState::RetriesExceeded);
    assert_eq!(record.data[0]["retryCounter"], 4);

    let status = client.status();
    assert_eq!(status.state, ConnectionState::RetriesExceeded);
    assert_eq!(status.subscription_id, None);

    // One initial attempt plus three retries, then nothing.
    client.ensure_connection();
    client.connection().fetch_status().await.expect("alive");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.paths().len(), 4);
}

#[tokio::test]
async fn test_disconnect_without_keep_starts_fresh() {
    let server = start_push_server(vec![Reply::Open(ESTABLISHED_42), Reply::Open("")]).await;

    let client = SsePushClient::connect(PushConfig::new(server.base_uri())).expect("connect");
    wait_for_status(&client, |s| s.subscription_id.is_some()).await;

    client.disconnect(false).await;
    let status = client.status();
    assert_eq!(status.state, ConnectionState::NotConnected);
    assert_eq!(status.subscription_id, None);

    client.ensure_connection();
    wait_for_status(&client, |s| s.state.is_connected()).await;
    assert_eq!(
        server.paths(),
        vec!["/api/v1/sse".to_string(), "/api/v1/sse".to_string()]
    );
}

#[tokio::test]
async fn test_extra_headers_are_sent() {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock server");
    let addr = listener.local_addr().expect("local addr");
    let (seen_tx, mut seen_rx) = tokio::sync::mpsc::unbounded_channel();

    tokio::spawn(async move {
        if let Ok((stream, _)) = listener.accept().await {
            let _ = http1::Builder::new()
                .serve_connection(
                    TokioIo::new(stream),
                    service_fn(move |req: Request<Incoming>| {
                        let header = |name: &str| {
                            req.headers()
                                .get(name)
                                .and_then(|v| v.to_str().ok())
                                .map(str::to_string)
                        };
                        let _ = seen_tx.send((
                            header("authorization"),
                            header("accept"),
                            header("cache-control"),
                        ));
                        async move { Ok::<_, Infallible>(respond(Reply::Open(""))) }
                    }),
                )
                .await;
        }
    });

    let mut headers = http::HeaderMap::new();
    headers.insert(
        http::header::AUTHORIZATION,
        http::HeaderValue::from_static("Bearer token-1"),
    );
    let client = SsePushClient::connect(PushConfig::new(format!("http://{addr}/")).headers(headers))
        .expect("connect");

    let (authorization, accept, cache_control) = timeout(Duration::from_secs(5), seen_rx.recv())
        .await
        .expect("timeout")
        .expect("request");
    assert_eq!(authorization.as_deref(), Some("Bearer token-1"));
    assert_eq!(accept.as_deref(), Some("text/event-stream"));
    assert_eq!(cache_control.as_deref(), Some("no-cache"));

    wait_for_status(&client, |s| s.state.is_connected()).await;
    client.shutdown().await;
}
