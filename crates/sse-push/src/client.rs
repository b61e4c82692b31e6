//! Public push client facade.
//!
//! ```rust,no_run
//! use sse_push::{EventKind, PushConfig, SsePushClient};
//!
//! # async fn example() -> sse_push::PushResult<()> {
//! let client = SsePushClient::connect(PushConfig::new("https://engine.example.com/api/"))?;
//!
//! let mut cases = client.filtered_stream([EventKind::CaseCreated, EventKind::CaseAssigned]);
//! while let Some(event) = cases.next_event().await {
//!     println!("{:?} for {:?}", event.kind(), event.process_instance_id());
//! }
//! # Ok(())
//! # }
//! ```

use std::{
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use futures_util::stream::Stream;
use tokio::sync::{
    mpsc::{self, error::TrySendError},
    watch,
};
use tracing::{debug, warn};

use crate::{
    config::PushConfig,
    connection::{ConnectionHandle, ConnectionState, ConnectionStateMachine, ConnectionStatus},
    dispatcher::{EventDispatcher, ListenerId},
    error::PushResult,
    event::{DomainEvent, ErrorRecord, EventKind},
    transport::{HttpSseTransport, PushTransport},
};

/// Resilient push client.
///
/// Owns one connection state machine and one dispatcher. Clones share both;
/// dropping the last clone tears the connection down.
#[derive(Clone)]
pub struct SsePushClient {
    config: Arc<PushConfig>,
    connection: ConnectionHandle,
    dispatcher: Arc<EventDispatcher>,
}

impl SsePushClient {
    /// Connect over HTTP SSE.
    ///
    /// The first connection attempt starts immediately.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the HTTP client
    /// cannot be built.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn connect(config: PushConfig) -> PushResult<Self> {
        let transport = HttpSseTransport::new(&config)?;
        Self::with_transport(config, transport)
    }

    /// Connect over a caller-supplied transport.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn with_transport<T: PushTransport>(config: PushConfig, transport: T) -> PushResult<Self> {
        let config = Arc::new(config);
        let dispatcher = Arc::new(EventDispatcher::new());
        let connection =
            ConnectionStateMachine::spawn(Arc::clone(&config), transport, Arc::clone(&dispatcher))?;

        connection.ensure_connection();

        Ok(Self {
            config,
            connection,
            dispatcher,
        })
    }

    // ========================================================================
    // Streams
    // ========================================================================

    /// Events whose kind is one of `kinds`, in arrival order.
    ///
    /// A kind listed more than once is delivered once. The stream buffers at
    /// most `event_channel_capacity` events; further events are dropped until
    /// the consumer catches up.
    pub fn filtered_stream(&self, kinds: impl IntoIterator<Item = EventKind>) -> EventStream<DomainEvent> {
        let (tx, rx) = mpsc::channel(self.config.event_channel_capacity);
        let mut slots: Vec<Slot> = Vec::new();

        for kind in kinds {
            if slots.iter().any(|slot| matches!(slot, Slot::Kind(k, _) if *k == kind)) {
                continue;
            }
            let tx = tx.clone();
            let id = self.dispatcher.register_for(kind, move |event: &DomainEvent| {
                offer(&tx, event.clone(), "filtered");
            });
            slots.push(Slot::Kind(kind, id));
        }

        debug!(listeners = slots.len(), "Filtered push stream opened");
        EventStream::new(rx, Registration::new(Arc::clone(&self.dispatcher), slots))
    }

    /// Every event that carried a payload, known kind or not.
    pub fn all_messages_stream(&self) -> EventStream<DomainEvent> {
        let (tx, rx) = mpsc::channel(self.config.event_channel_capacity);
        let id = self.dispatcher.register_any(move |event: &DomainEvent| {
            if event.has_payload() {
                offer(&tx, event.clone(), "all_messages");
            }
        });
        EventStream::new(
            rx,
            Registration::new(Arc::clone(&self.dispatcher), vec![Slot::Any(id)]),
        )
    }

    /// Error records, e.g. the one reported when retries run out.
    pub fn error_stream(&self) -> EventStream<ErrorRecord> {
        let (tx, rx) = mpsc::channel(self.config.event_channel_capacity);
        let id = self.dispatcher.register_error(move |record: &ErrorRecord| {
            offer(&tx, record.clone(), "error");
        });
        EventStream::new(
            rx,
            Registration::new(Arc::clone(&self.dispatcher), vec![Slot::Error(id)]),
        )
    }

    // ========================================================================
    // Callbacks
    // ========================================================================

    /// Run `handler` for every event of `kind`. Handlers run on the
    /// connection task and must not block.
    pub fn on_event<F>(&self, kind: EventKind, handler: F) -> ListenerId
    where
        F: Fn(&DomainEvent) + Send + Sync + 'static,
    {
        self.dispatcher.register_for(kind, handler)
    }

    pub fn on_any_event<F>(&self, handler: F) -> ListenerId
    where
        F: Fn(&DomainEvent) + Send + Sync + 'static,
    {
        self.dispatcher.register_any(handler)
    }

    pub fn on_error<F>(&self, handler: F) -> ListenerId
    where
        F: Fn(&ErrorRecord) + Send + Sync + 'static,
    {
        self.dispatcher.register_error(handler)
    }

    /// The underlying dispatcher, for unregistering callbacks.
    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    // ========================================================================
    // Connection control
    // ========================================================================

    pub fn config(&self) -> &PushConfig {
        &self.config
    }

    pub fn status(&self) -> ConnectionStatus {
        self.connection.status()
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn subscription_id(&self) -> Option<String> {
        self.connection.subscription_id()
    }

    pub fn status_changes(&self) -> watch::Receiver<ConnectionStatus> {
        self.connection.status_changes()
    }

    /// See [`ConnectionHandle::ensure_connection`].
    pub fn ensure_connection(&self) {
        self.connection.ensure_connection();
    }

    /// See [`ConnectionHandle::disconnect`].
    pub async fn disconnect(&self, keep_subscription_id: bool) {
        self.connection.disconnect(keep_subscription_id).await;
    }

    /// Stop the connection for every clone of this client.
    pub async fn shutdown(&self) {
        self.connection.shutdown().await;
    }

    pub fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }
}

impl std::fmt::Debug for SsePushClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SsePushClient")
            .field("endpoint", &self.config.endpoint_base_uri)
            .field("status", &self.connection.status())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// EventStream
// ============================================================================

enum Slot {
    Any(ListenerId),
    Kind(EventKind, ListenerId),
    Error(ListenerId),
}

/// Dispatcher registrations owned by one stream.
struct Registration {
    dispatcher: Arc<EventDispatcher>,
    slots: Vec<Slot>,
}

impl Registration {
    fn new(dispatcher: Arc<EventDispatcher>, slots: Vec<Slot>) -> Self {
        Self { dispatcher, slots }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        for slot in self.slots.drain(..) {
            match slot {
                Slot::Any(id) => self.dispatcher.unregister_any(id),
                Slot::Kind(kind, id) => self.dispatcher.unregister_for(kind, id),
                Slot::Error(id) => self.dispatcher.unregister_error(id),
            };
        }
    }
}

/// Hand `item` to a consumer queue without blocking the connection task.
fn offer<T>(tx: &mpsc::Sender<T>, item: T, stream: &'static str) {
    match tx.try_send(item) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => {
            warn!(stream, capacity = tx.max_capacity(), "Push consumer queue full, dropping event");
        }
        // Receiver dropped; the registration is being torn down.
        Err(TrySendError::Closed(_)) => {}
    }
}

/// Receiving end of a consumer stream.
///
/// Dropping it unregisters its listeners and leaves every other consumer
/// untouched.
pub struct EventStream<T> {
    rx: mpsc::Receiver<T>,
    registration: Registration,
}

impl<T> EventStream<T> {
    fn new(rx: mpsc::Receiver<T>, registration: Registration) -> Self {
        Self {
            rx,
            registration,
        }
    }

    /// Receive the next item.
    pub async fn next_event(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Receive without waiting. Returns `None` when nothing is buffered.
    pub fn try_next_event(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}

impl<T> Stream for EventStream<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl<T> std::fmt::Debug for EventStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream")
            .field("listeners", &self.registration.slots.len())
            .finish()
    }
}
