//! Connection state machine.
//!
//! A single background task owns the transport handle, the retry counter and
//! the subscription id, and processes public commands and transport
//! notifications one at a time. That serialisation is what guarantees there
//! is never more than one live transport.
//!
//! ```text
//! ConnectionHandle ──► mpsc (DriverCommand) ──┐
//!                                             ▼
//!                                  ConnectionStateMachine ──open──► PushTransport
//!                                   │      ▲                          │
//!            watch (ConnectionStatus)◄┘      └── mpsc (TransportNotice)◄┘
//!                                   │
//!                                   └──► EventDispatcher
//! ```
//!
//! Retry policy: every transport failure increments the retry counter and
//! every successful open resets it to zero. While the counter stays within
//! `max_retries` the machine reconnects (immediately, or after the configured
//! backoff); once it exceeds it the machine enters
//! [`ConnectionState::RetriesExceeded`], reports one [`ErrorRecord`] and
//! makes no further attempts.

use std::{fmt, pin::Pin, sync::Arc};

use serde_json::json;
use tokio::{
    sync::{
        mpsc::{self, error::TrySendError},
        oneshot, watch,
    },
    time::{Sleep, sleep},
};
use tracing::{debug, error, info, warn};

use crate::{
    config::PushConfig,
    dispatcher::EventDispatcher,
    error::{PushError, PushResult},
    event::{DomainEvent, ErrorRecord},
    transport::{PushTransport, TransportConnection, TransportNotice, TransportSignal, TransportSink},
    translate::translate,
};

// ---------------------------------------------------------------------------
// Connection state
// ---------------------------------------------------------------------------

/// Connection state machine states.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No transport and no attempt in flight.
    NotConnected,
    /// First attempt of this client's lifetime is in flight.
    Connecting,
    /// The transport is open.
    Connected,
    /// A new attempt is in flight after at least one successful open.
    Reconnecting,
    /// Retry budget exhausted. Terminal: no further automatic attempts.
    RetriesExceeded,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Returns `true` while an attempt is in flight or scheduled.
    pub fn is_attempting(&self) -> bool {
        matches!(self, Self::Connecting | Self::Reconnecting)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::RetriesExceeded)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NotConnected => "NOT_CONNECTED",
            Self::Connecting => "CONNECTING",
            Self::Connected => "CONNECTED",
            Self::Reconnecting => "RECONNECTING",
            Self::RetriesExceeded => "RETRIES_EXCEEDED",
        })
    }
}

/// Snapshot of the machine, published on every change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    /// Consecutive transport failures since the last successful open.
    pub retry_counter: u32,
    /// Server-issued subscription id used to resume on reconnect.
    pub subscription_id: Option<String>,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self {
            state: ConnectionState::NotConnected,
            retry_counter: 0,
            subscription_id: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Control commands sent from [`ConnectionHandle`] to the state machine.
#[derive(Debug)]
pub(crate) enum DriverCommand {
    EnsureConnection,
    Disconnect {
        keep_subscription_id: bool,
        reply_tx: Option<oneshot::Sender<()>>,
    },
    Status {
        reply_tx: oneshot::Sender<ConnectionStatus>,
    },
    Shutdown {
        reply_tx: oneshot::Sender<()>,
    },
}

// ---------------------------------------------------------------------------
// ConnectionHandle
// ---------------------------------------------------------------------------

/// Clone-able handle for controlling the state machine.
///
/// None of the operations report transport failures; those are only
/// observable through the dispatcher's error bucket and [`Self::status`].
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    cmd_tx: mpsc::Sender<DriverCommand>,
    status_rx: watch::Receiver<ConnectionStatus>,
}

impl ConnectionHandle {
    /// Open a transport unless one is open or an attempt is in flight.
    ///
    /// Returns immediately; the outcome is asynchronous. If the command queue
    /// is full the request is dropped, since the queued commands are
    /// processed first anyway.
    pub fn ensure_connection(&self) {
        match self.cmd_tx.try_send(DriverCommand::EnsureConnection) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!("Push command queue full, dropping ensure_connection");
            }
            Err(TrySendError::Closed(_)) => {
                warn!("ensure_connection on a stopped push connection");
            }
        }
    }

    /// Close the active transport and cancel any scheduled retry.
    ///
    /// The subscription id is cleared unless `keep_subscription_id` is set.
    /// Idempotent; resolves once the state machine has processed it.
    pub async fn disconnect(&self, keep_subscription_id: bool) {
        let (reply_tx, reply_rx) = oneshot::channel();
        let cmd = DriverCommand::Disconnect {
            keep_subscription_id,
            reply_tx: Some(reply_tx),
        };
        if self.cmd_tx.send(cmd).await.is_ok() {
            let _ = reply_rx.await;
        }
    }

    /// Latest published status.
    pub fn status(&self) -> ConnectionStatus {
        self.status_rx.borrow().clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.status_rx.borrow().state
    }

    pub fn subscription_id(&self) -> Option<String> {
        self.status_rx.borrow().subscription_id.clone()
    }

    /// Receiver that observes every status change.
    pub fn status_changes(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_rx.clone()
    }

    /// Status after every previously issued command has been processed.
    ///
    /// # Errors
    ///
    /// Returns an error if the state machine has shut down.
    pub async fn fetch_status(&self) -> PushResult<ConnectionStatus> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(DriverCommand::Status { reply_tx })
            .await
            .map_err(|_| closed())?;
        reply_rx.await.map_err(|_| closed())
    }

    /// Tear down the transport, clear the subscription and stop the state
    /// machine.
    pub async fn shutdown(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(DriverCommand::Shutdown { reply_tx })
            .await
            .is_ok()
        {
            let _ = reply_rx.await;
        }
    }

    /// Check whether the state machine is still running.
    pub fn is_running(&self) -> bool {
        !self.cmd_tx.is_closed()
    }
}

fn closed() -> PushError {
    PushError::connection_closed(Some("push state machine shut down".to_string()))
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

struct ActiveTransport {
    generation: u64,
    connection: Box<dyn TransportConnection>,
}

/// Owner of the single push transport.
pub struct ConnectionStateMachine<T: PushTransport> {
    config: Arc<PushConfig>,
    transport: T,
    dispatcher: Arc<EventDispatcher>,
    cmd_rx: mpsc::Receiver<DriverCommand>,
    notice_tx: mpsc::Sender<TransportNotice>,
    notice_rx: mpsc::Receiver<TransportNotice>,
    status_tx: watch::Sender<ConnectionStatus>,
    state: ConnectionState,
    retry_counter: u32,
    subscription_id: Option<String>,
    active: Option<ActiveTransport>,
    next_generation: u64,
    /// Whether any transport has opened during this machine's lifetime.
    has_connected: bool,
    retry_at: Option<Pin<Box<Sleep>>>,
}

impl<T: PushTransport> ConnectionStateMachine<T> {
    /// Spawn the state machine on the current tokio runtime.
    ///
    /// The machine starts in [`ConnectionState::NotConnected`]; nothing is
    /// opened until [`ConnectionHandle::ensure_connection`] is called.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration validation fails.
    pub fn spawn(
        config: Arc<PushConfig>,
        transport: T,
        dispatcher: Arc<EventDispatcher>,
    ) -> PushResult<ConnectionHandle> {
        config.validate().map_err(PushError::config)?;

        let (cmd_tx, cmd_rx) = mpsc::channel(config.command_channel_capacity);
        let (notice_tx, notice_rx) = mpsc::channel(config.event_channel_capacity);
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::default());

        let machine = Self {
            config,
            transport,
            dispatcher,
            cmd_rx,
            notice_tx,
            notice_rx,
            status_tx,
            state: ConnectionState::NotConnected,
            retry_counter: 0,
            subscription_id: None,
            active: None,
            next_generation: 0,
            has_connected: false,
            retry_at: None,
        };
        tokio::spawn(machine.run());

        Ok(ConnectionHandle { cmd_tx, status_rx })
    }

    async fn run(mut self) {
        debug!(endpoint = %self.config.endpoint_base_uri, "Push state machine started");

        loop {
            tokio::select! {
                biased;

                cmd = self.cmd_rx.recv() => match cmd {
                    Some(DriverCommand::EnsureConnection) => self.ensure_connection(),
                    Some(DriverCommand::Disconnect { keep_subscription_id, reply_tx }) => {
                        self.disconnect(keep_subscription_id);
                        if let Some(reply_tx) = reply_tx {
                            let _ = reply_tx.send(());
                        }
                    }
                    Some(DriverCommand::Status { reply_tx }) => {
                        let _ = reply_tx.send(self.snapshot());
                    }
                    Some(DriverCommand::Shutdown { reply_tx }) => {
                        info!("Push connection shutting down (requested)");
                        self.disconnect(false);
                        let _ = reply_tx.send(());
                        return;
                    }
                    None => {
                        info!("All push handles dropped, shutting down");
                        self.disconnect(false);
                        return;
                    }
                },

                Some(notice) = self.notice_rx.recv() => self.on_notice(notice),

                () = retry_due(&mut self.retry_at) => {
                    self.retry_at = None;
                    self.open_transport();
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Public operations
    // ------------------------------------------------------------------

    fn ensure_connection(&mut self) {
        match self.state {
            ConnectionState::RetriesExceeded => {
                warn!("Push retry budget exhausted, not reconnecting");
                return;
            }
            ConnectionState::Connecting | ConnectionState::Reconnecting => {
                debug!(state = %self.state, "Push connection attempt already in flight");
                return;
            }
            ConnectionState::Connected
                if self
                    .active
                    .as_ref()
                    .is_some_and(|active| !active.connection.is_closed()) =>
            {
                debug!("Push transport already open");
                return;
            }
            ConnectionState::Connected | ConnectionState::NotConnected => {}
        }
        self.open_transport();
    }

    fn disconnect(&mut self, keep_subscription_id: bool) {
        self.teardown(keep_subscription_id);
        if !self.state.is_terminal() {
            self.set_state(ConnectionState::NotConnected);
        }
    }

    // ------------------------------------------------------------------
    // Transport lifecycle
    // ------------------------------------------------------------------

    fn on_notice(&mut self, notice: TransportNotice) {
        let current = self.active.as_ref().map(|active| active.generation);
        if current != Some(notice.generation) {
            debug!(
                generation = notice.generation,
                "Ignoring signal from a closed push transport"
            );
            return;
        }

        match notice.signal {
            TransportSignal::Opened => self.on_open(),
            TransportSignal::Message(data) => self.on_message(&data),
            TransportSignal::Failed(err) => self.on_failure(err),
        }
    }

    fn on_open(&mut self) {
        self.has_connected = true;
        self.retry_counter = 0;
        self.set_state(ConnectionState::Connected);
        info!(
            subscription_id = self.subscription_id.as_deref().unwrap_or(""),
            "Push connection established"
        );
    }

    fn on_message(&mut self, data: &str) {
        let event = translate(data);
        debug!(
            event_type = event.event_type().unwrap_or("<unknown>"),
            "Push event received"
        );

        if let DomainEvent::EstablishedConnection(established) = &event {
            info!(subscription_id = %established.subscription_id, "Push subscription established");
            self.subscription_id = Some(established.subscription_id.clone());
            self.publish();
        }

        self.dispatcher.dispatch(&event);
    }

    fn on_failure(&mut self, err: PushError) {
        self.close_active();
        self.retry_counter = self.retry_counter.saturating_add(1);

        if self.retry_counter > self.config.max_retries {
            self.give_up(&err);
            return;
        }

        warn!(
            retry_counter = self.retry_counter,
            max_retries = self.config.max_retries,
            error = %err,
            "Push transport failed, reconnecting"
        );
        self.teardown(true);

        match self.config.reconnect_backoff {
            Some(backoff) => {
                let delay = backoff.delay_for(self.retry_counter);
                debug!(delay_ms = delay.as_millis() as u64, "Push reconnect scheduled");
                self.set_state(self.attempt_state());
                self.retry_at = Some(Box::pin(sleep(delay)));
            }
            None => self.open_transport(),
        }
    }

    fn give_up(&mut self, err: &PushError) {
        let failures = self.retry_counter;
        let endpoint = self.config.sse_url(self.subscription_id.as_deref());
        error!(
            retry_counter = failures,
            endpoint = %endpoint,
            error = %err,
            "Push retry budget exhausted"
        );

        self.teardown(false);
        self.set_state(ConnectionState::RetriesExceeded);

        let record = ErrorRecord::new(
            ConnectionState::RetriesExceeded,
            format!("Push connection failed {failures} times in a row, giving up"),
            vec![json!({
                "retryCounter": failures,
                "endpoint": endpoint,
                "lastError": err.to_string(),
            })],
        );
        self.dispatcher.dispatch_error(&record);
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Close whatever is open, then open a fresh transport. Skips the
    /// state checks of `ensure_connection`.
    fn open_transport(&mut self) {
        self.close_active();
        self.retry_at = None;

        let generation = self.next_generation;
        self.next_generation += 1;
        let url = self.config.sse_url(self.subscription_id.as_deref());

        self.set_state(self.attempt_state());
        info!(url = %url, generation, state = %self.state, "Opening push transport");

        let sink = TransportSink::new(generation, self.notice_tx.clone());
        let connection = self.transport.open(&url, sink);
        self.active = Some(ActiveTransport {
            generation,
            connection,
        });
    }

    fn teardown(&mut self, keep_subscription_id: bool) {
        self.close_active();
        self.retry_at = None;
        if !keep_subscription_id && self.subscription_id.take().is_some() {
            debug!("Push subscription id cleared");
            self.publish();
        }
    }

    fn close_active(&mut self) {
        if let Some(mut active) = self.active.take()
            && !active.connection.is_closed()
        {
            debug!(generation = active.generation, "Closing push transport");
            active.connection.close();
        }
    }

    fn attempt_state(&self) -> ConnectionState {
        if self.has_connected {
            ConnectionState::Reconnecting
        } else {
            ConnectionState::Connecting
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            debug!(from = %self.state, to = %state, "Push connection state change");
            self.state = state;
        }
        self.publish();
    }

    fn snapshot(&self) -> ConnectionStatus {
        ConnectionStatus {
            state: self.state,
            retry_counter: self.retry_counter,
            subscription_id: self.subscription_id.clone(),
        }
    }

    fn publish(&self) {
        let status = self.snapshot();
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }
}

/// Resolves when the scheduled retry is due; pending forever if none is.
async fn retry_due(retry_at: &mut Option<Pin<Box<Sleep>>>) {
    match retry_at {
        Some(delay) => delay.as_mut().await,
        None => std::future::pending().await,
    }
}
