//! # sse-push
//!
//! Resilient client for a server-sent-event push channel.
//!
//! The client keeps one long-lived `text/event-stream` connection to a
//! workflow engine, turns each message into a typed [`DomainEvent`] and fans
//! it out to any number of independent consumers.
//!
//! ## Features
//!
//! - **Single connection**: one state machine task owns the transport, so there
//!   is never more than one live stream per client
//! - **Bounded retries**: transport failures reconnect automatically until the
//!   retry budget is spent, then the client reports one [`ErrorRecord`] and stops
//! - **Resumption**: the server-issued subscription id is reused on reconnect
//! - **Filtered streams**: consumers subscribe to the event kinds they care about
//!   and unsubscribe by dropping their stream
//! - **Pluggable transport**: [`PushTransport`] lets tests and embedders replace HTTP
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sse_push::{EventKind, PushConfig, SsePushClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PushConfig::new("https://engine.example.com/api/")
//!         .connect_timeout(std::time::Duration::from_secs(5));
//!
//!     let client = SsePushClient::connect(config)?;
//!     let mut tasks = client.filtered_stream([EventKind::TaskUpdate]);
//!
//!     while let Some(event) = tasks.next_event().await {
//!         println!("task update for {:?}", event.process_instance_id());
//!     }
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod reconnect;
pub mod translate;
pub mod transport;

pub use client::{EventStream, SsePushClient};
pub use config::PushConfig;
pub use connection::{ConnectionHandle, ConnectionState, ConnectionStateMachine, ConnectionStatus};
pub use dispatcher::{EventDispatcher, ListenerId};
pub use error::{PushError, PushResult};
pub use event::{DomainEvent, EstablishedConnection, ErrorRecord, EventBody, EventKind, UnknownEvent};
pub use reconnect::BackoffConfig;
pub use translate::translate;
pub use transport::{HttpSseTransport, PushTransport, TransportConnection, TransportSink};
