//! Push transport abstraction.
//!
//! The connection state machine never talks to the network directly. It asks a
//! [`PushTransport`] to open a connection against a URL and hands it a
//! [`TransportSink`]; the transport reports its lifecycle (open, message,
//! error) through that sink. [`HttpSseTransport`] is the production
//! implementation; tests plug in doubles.
//!
//! ```text
//! ConnectionStateMachine ──open(url, sink)──► PushTransport
//!        ▲                                         │
//!        └──────── TransportNotice (mpsc) ◄────────┘  Opened | Message | Failed
//! ```

pub mod parse;
mod sse;

use std::sync::Arc;

use tokio::sync::mpsc;

pub use self::sse::{HttpSseConnection, HttpSseTransport};
use crate::error::PushError;

/// Lifecycle notification emitted by a transport.
#[derive(Debug)]
pub enum TransportSignal {
    /// The stream is open and ready to deliver messages.
    Opened,
    /// One message payload (the SSE `data` field).
    Message(String),
    /// The transport failed; it will not emit anything else.
    Failed(PushError),
}

/// A [`TransportSignal`] tagged with the connection it came from.
#[derive(Debug)]
pub(crate) struct TransportNotice {
    pub(crate) generation: u64,
    pub(crate) signal: TransportSignal,
}

/// Callback side of a transport connection.
///
/// Every connection gets its own sink, so signals from a connection that has
/// since been closed or replaced can be told apart and dropped. The channel
/// behind it is bounded; a transport that outpaces the state machine waits.
#[derive(Clone, Debug)]
pub struct TransportSink {
    generation: u64,
    tx: mpsc::Sender<TransportNotice>,
}

impl TransportSink {
    pub(crate) fn new(generation: u64, tx: mpsc::Sender<TransportNotice>) -> Self {
        Self { generation, tx }
    }

    /// Which connection this sink belongs to.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Report that the stream opened. Returns `false` if nobody is listening.
    pub async fn opened(&self) -> bool {
        self.emit(TransportSignal::Opened).await
    }

    /// Report one inbound message.
    pub async fn message(&self, data: impl Into<String>) -> bool {
        self.emit(TransportSignal::Message(data.into())).await
    }

    /// Report a terminal failure of this connection.
    pub async fn failed(&self, error: PushError) -> bool {
        self.emit(TransportSignal::Failed(error)).await
    }

    /// `true` once the state machine has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn emit(&self, signal: TransportSignal) -> bool {
        self.tx
            .send(TransportNotice {
                generation: self.generation,
                signal,
            })
            .await
            .is_ok()
    }
}

/// Factory for push connections.
pub trait PushTransport: Send + Sync + 'static {
    /// Start opening a connection to `url`.
    ///
    /// Must not block: the outcome is reported asynchronously through `sink`.
    fn open(&self, url: &str, sink: TransportSink) -> Box<dyn TransportConnection>;
}

impl<T: PushTransport + ?Sized> PushTransport for Arc<T> {
    fn open(&self, url: &str, sink: TransportSink) -> Box<dyn TransportConnection> {
        (**self).open(url, sink)
    }
}

/// A live (or opening) connection created by a [`PushTransport`].
pub trait TransportConnection: Send {
    /// Stop the connection. Idempotent.
    fn close(&mut self);

    fn is_closed(&self) -> bool;
}
