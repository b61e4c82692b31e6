//! Domain event taxonomy carried by the push stream.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::connection::ConnectionState;

/// Known event kinds, named after their wire `eventType` values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    CaseCreated,
    TaskUpdate,
    ProcessEnd,
    CaseAssigned,
    CaseUnassigned,
    EstablishedConnection,
}

impl EventKind {
    /// Every known kind, in wire declaration order.
    pub const ALL: [EventKind; 6] = [
        Self::CaseCreated,
        Self::TaskUpdate,
        Self::ProcessEnd,
        Self::CaseAssigned,
        Self::CaseUnassigned,
        Self::EstablishedConnection,
    ];

    /// The `eventType` string used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CaseCreated => "CASE_CREATED",
            Self::TaskUpdate => "TASK_UPDATE",
            Self::ProcessEnd => "PROCESS_END",
            Self::CaseAssigned => "CASE_ASSIGNED",
            Self::CaseUnassigned => "CASE_UNASSIGNED",
            Self::EstablishedConnection => "ESTABLISHED_CONNECTION",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == s).ok_or(())
    }
}

/// Fields shared by the case/task events.
///
/// `processInstanceId` is lifted out when it is a string or another scalar;
/// anything else stays verbatim in `fields`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EventBody {
    pub process_instance_id: Option<String>,
    /// The remaining JSON fields, minus `eventType`.
    pub fields: Map<String, Value>,
}

/// Payload of `ESTABLISHED_CONNECTION`.
#[derive(Clone, Debug, PartialEq)]
pub struct EstablishedConnection {
    /// Server-issued token used to resume this subscription.
    pub subscription_id: String,
    pub process_instance_id: Option<String>,
    pub fields: Map<String, Value>,
}

/// A message whose `eventType` is missing, unrecognised, or whose body did
/// not decode.
#[derive(Clone, Debug, PartialEq)]
pub struct UnknownEvent {
    /// The `eventType` string, if one was present.
    pub event_type: Option<String>,
    /// Decoded JSON, or `Value::Null` when the text was not JSON.
    pub payload: Value,
    /// The raw message text.
    pub raw: String,
}

/// A typed event received from the push stream.
#[derive(Clone, Debug, PartialEq)]
pub enum DomainEvent {
    CaseCreated(EventBody),
    TaskUpdate(EventBody),
    ProcessEnd(EventBody),
    CaseAssigned(EventBody),
    CaseUnassigned(EventBody),
    EstablishedConnection(EstablishedConnection),
    Unknown(UnknownEvent),
}

impl DomainEvent {
    /// The event kind, or `None` for [`DomainEvent::Unknown`].
    pub fn kind(&self) -> Option<EventKind> {
        match self {
            Self::CaseCreated(_) => Some(EventKind::CaseCreated),
            Self::TaskUpdate(_) => Some(EventKind::TaskUpdate),
            Self::ProcessEnd(_) => Some(EventKind::ProcessEnd),
            Self::CaseAssigned(_) => Some(EventKind::CaseAssigned),
            Self::CaseUnassigned(_) => Some(EventKind::CaseUnassigned),
            Self::EstablishedConnection(_) => Some(EventKind::EstablishedConnection),
            Self::Unknown(_) => None,
        }
    }

    /// The wire `eventType`, including unrecognised ones.
    pub fn event_type(&self) -> Option<&str> {
        match self {
            Self::Unknown(unknown) => unknown.event_type.as_deref(),
            other => other.kind().map(|kind| kind.as_str()),
        }
    }

    pub fn process_instance_id(&self) -> Option<&str> {
        match self {
            Self::CaseCreated(body)
            | Self::TaskUpdate(body)
            | Self::ProcessEnd(body)
            | Self::CaseAssigned(body)
            | Self::CaseUnassigned(body) => body.process_instance_id.as_deref(),
            Self::EstablishedConnection(established) => {
                established.process_instance_id.as_deref()
            }
            Self::Unknown(unknown) => unknown
                .payload
                .get("processInstanceId")
                .and_then(Value::as_str),
        }
    }

    /// The subscription id carried by `ESTABLISHED_CONNECTION`.
    pub fn subscription_id(&self) -> Option<&str> {
        match self {
            Self::EstablishedConnection(established) => Some(&established.subscription_id),
            _ => None,
        }
    }

    /// `false` only for messages that carried no decodable payload at all.
    pub fn has_payload(&self) -> bool {
        match self {
            Self::Unknown(unknown) => !unknown.payload.is_null(),
            _ => true,
        }
    }
}

/// A reportable failure pushed to error listeners.
#[derive(Clone, Debug, PartialEq)]
pub struct ErrorRecord {
    /// Connection state at the time of the failure.
    pub state: ConnectionState,
    pub message: String,
    /// Free-form diagnostic context.
    pub data: Vec<Value>,
}

impl ErrorRecord {
    pub fn new(state: ConnectionState, message: impl Into<String>, data: Vec<Value>) -> Self {
        Self {
            state,
            message: message.into(),
            data,
        }
    }
}
