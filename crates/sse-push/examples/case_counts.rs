//! Case Count Example
//!
//! Keeps a live count of open and assigned cases from the push channel and
//! logs the connection lifecycle.
//!
//! Run with:
//! `PUSH_ENDPOINT=https://engine.example.com/api/ cargo run -p sse-push --example case_counts`

use std::{collections::HashSet, time::Duration};

use sse_push::{BackoffConfig, DomainEvent, EventKind, PushConfig, SsePushClient};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Default)]
struct CaseCounts {
    open: HashSet<String>,
    assigned: HashSet<String>,
}

impl CaseCounts {
    fn apply(&mut self, event: &DomainEvent) {
        let Some(case) = event.process_instance_id().map(str::to_string) else {
            return;
        };
        match event.kind() {
            Some(EventKind::CaseCreated) => {
                self.open.insert(case);
            }
            Some(EventKind::CaseAssigned) => {
                self.assigned.insert(case);
            }
            Some(EventKind::CaseUnassigned) => {
                self.assigned.remove(&case);
            }
            Some(EventKind::ProcessEnd) => {
                self.open.remove(&case);
                self.assigned.remove(&case);
            }
            _ => {}
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sse_push=debug")),
        )
        .init();

    let endpoint =
        std::env::var("PUSH_ENDPOINT").unwrap_or_else(|_| "http://127.0.0.1:8080/api/".to_string());

    let config = PushConfig::new(endpoint)
        .connect_timeout(Duration::from_secs(5))
        .reconnect_backoff(BackoffConfig::default());
    let client = SsePushClient::connect(config)?;

    let mut counts = CaseCounts::default();
    let mut cases = client.filtered_stream([
        EventKind::CaseCreated,
        EventKind::CaseAssigned,
        EventKind::CaseUnassigned,
        EventKind::ProcessEnd,
    ]);
    let mut errors = client.error_stream();

    let mut status = client.status_changes();
    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let current = status.borrow_and_update().clone();
            info!(
                state = %current.state,
                retry_counter = current.retry_counter,
                subscription_id = current.subscription_id.as_deref().unwrap_or("-"),
                "Connection status"
            );
        }
    });

    loop {
        tokio::select! {
            Some(event) = cases.next_event() => {
                counts.apply(&event);
                info!(
                    open = counts.open.len(),
                    assigned = counts.assigned.len(),
                    "Case counts updated"
                );
            }
            Some(record) = errors.next_event() => {
                error!(state = %record.state, message = %record.message, "Push channel gave up");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    client.shutdown().await;
    Ok(())
}
