//! Raw SSE payload → [`DomainEvent`].
//!
//! The variant comes from `eventType` alone. The body is not validated:
//! `processInstanceId` and `subscriptionId` are read leniently and every
//! other field is carried along untouched.

use serde_json::{Map, Value};
use tracing::debug;

use crate::event::{DomainEvent, EstablishedConnection, EventBody, EventKind, UnknownEvent};

const EVENT_TYPE_FIELD: &str = "eventType";
const PROCESS_INSTANCE_FIELD: &str = "processInstanceId";
const SUBSCRIPTION_FIELD: &str = "subscriptionId";

/// Translate the text of one SSE `data` field into a [`DomainEvent`].
///
/// Never fails: anything that is not a JSON object with a recognised
/// `eventType` comes back as [`DomainEvent::Unknown`], which generic
/// listeners still receive. The only body requirement is a usable
/// `subscriptionId` on `ESTABLISHED_CONNECTION`.
pub fn translate(raw: &str) -> DomainEvent {
    let payload = match serde_json::from_str::<Value>(raw) {
        Ok(value) => value,
        Err(err) => {
            debug!(error = %err, "Push payload is not JSON");
            return unknown(None, Value::Null, raw);
        }
    };

    let mut fields = match payload {
        Value::Object(fields) => fields,
        other => return unknown(None, other, raw),
    };

    let event_type = match fields.get(EVENT_TYPE_FIELD) {
        Some(Value::String(event_type)) => event_type.clone(),
        _ => return unknown(None, Value::Object(fields), raw),
    };

    let Ok(kind) = event_type.parse::<EventKind>() else {
        return unknown(Some(event_type), Value::Object(fields), raw);
    };

    let variant: fn(EventBody) -> DomainEvent = match kind {
        EventKind::CaseCreated => DomainEvent::CaseCreated,
        EventKind::TaskUpdate => DomainEvent::TaskUpdate,
        EventKind::ProcessEnd => DomainEvent::ProcessEnd,
        EventKind::CaseAssigned => DomainEvent::CaseAssigned,
        EventKind::CaseUnassigned => DomainEvent::CaseUnassigned,
        EventKind::EstablishedConnection => return established(event_type, fields, raw),
    };

    fields.remove(EVENT_TYPE_FIELD);
    variant(EventBody {
        process_instance_id: take_scalar(&mut fields, PROCESS_INSTANCE_FIELD),
        fields,
    })
}

fn established(event_type: String, mut fields: Map<String, Value>, raw: &str) -> DomainEvent {
    let Some(subscription_id) = take_scalar(&mut fields, SUBSCRIPTION_FIELD) else {
        debug!("ESTABLISHED_CONNECTION without a usable subscriptionId");
        return unknown(Some(event_type), Value::Object(fields), raw);
    };

    fields.remove(EVENT_TYPE_FIELD);
    DomainEvent::EstablishedConnection(EstablishedConnection {
        subscription_id,
        process_instance_id: take_scalar(&mut fields, PROCESS_INSTANCE_FIELD),
        fields,
    })
}

/// Remove `key` and return it as text if it is a string, number or bool.
///
/// `null`, arrays and objects are left in place and yield `None`.
fn take_scalar(fields: &mut Map<String, Value>, key: &str) -> Option<String> {
    let text = match fields.get(key)? {
        Value::String(text) => text.clone(),
        Value::Number(number) => number.to_string(),
        Value::Bool(flag) => flag.to_string(),
        Value::Null | Value::Array(_) | Value::Object(_) => return None,
    };
    fields.remove(key);
    Some(text)
}

fn unknown(event_type: Option<String>, payload: Value, raw: &str) -> DomainEvent {
    DomainEvent::Unknown(UnknownEvent {
        event_type,
        payload,
        raw: raw.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_established_connection() {
        let event = translate(r#"{"eventType":"ESTABLISHED_CONNECTION","subscriptionId":"sub-42"}"#);
        assert_eq!(event.kind(), Some(EventKind::EstablishedConnection));
        assert_eq!(event.subscription_id(), Some("sub-42"));
    }

    #[test]
    fn test_case_event_keeps_extra_fields() {
        let event = translate(
            r#"{"eventType":"CASE_CREATED","processInstanceId":"pi-1","caseNumber":17}"#,
        );
        let DomainEvent::CaseCreated(body) = &event else {
            panic!("expected CASE_CREATED, got {event:?}");
        };
        assert_eq!(body.process_instance_id.as_deref(), Some("pi-1"));
        assert_eq!(body.fields.get("caseNumber"), Some(&json!(17)));
        assert!(!body.fields.contains_key("eventType"));
    }

    #[test]
    fn test_every_known_kind() {
        for kind in EventKind::ALL {
            if kind == EventKind::EstablishedConnection {
                continue;
            }
            let raw = format!(r#"{{"eventType":"{kind}"}}"#);
            let event = translate(&raw);
            assert_eq!(event.kind(), Some(kind));
            assert_eq!(event.process_instance_id(), None);
        }
    }

    #[test]
    fn test_missing_event_type_is_unknown() {
        let event = translate(r#"{"processInstanceId":"pi-9"}"#);
        assert_eq!(event.kind(), None);
        assert_eq!(event.event_type(), None);
        assert_eq!(event.process_instance_id(), Some("pi-9"));
        assert!(event.has_payload());
    }

    #[test]
    fn test_unrecognised_event_type_is_unknown() {
        let event = translate(r#"{"eventType":"CASE_ARCHIVED"}"#);
        assert_eq!(event.kind(), None);
        assert_eq!(event.event_type(), Some("CASE_ARCHIVED"));
    }

    #[test]
    fn test_non_string_event_type_is_unknown() {
        let event = translate(r#"{"eventType":42}"#);
        assert_eq!(event.kind(), None);
        assert_eq!(event.event_type(), None);
    }

    #[test]
    fn test_established_without_subscription_id_is_unknown() {
        let event = translate(r#"{"eventType":"ESTABLISHED_CONNECTION"}"#);
        let DomainEvent::Unknown(unknown) = &event else {
            panic!("expected Unknown, got {event:?}");
        };
        assert_eq!(unknown.event_type.as_deref(), Some("ESTABLISHED_CONNECTION"));
        assert_eq!(
            unknown.payload.get("eventType"),
            Some(&json!("ESTABLISHED_CONNECTION"))
        );
    }

    #[test]
    fn test_not_json_has_no_payload() {
        let event = translate("keep-alive");
        let DomainEvent::Unknown(unknown) = &event else {
            panic!("expected Unknown, got {event:?}");
        };
        assert_eq!(unknown.raw, "keep-alive");
        assert!(!event.has_payload());
    }

    #[test]
    fn test_json_null_has_no_payload() {
        assert!(!translate("null").has_payload());
        assert!(translate("[1,2]").has_payload());
    }

    #[test]
    fn test_numeric_process_instance_id_keeps_kind() {
        let event = translate(r#"{"eventType":"CASE_CREATED","processInstanceId":12345}"#);
        assert_eq!(event.kind(), Some(EventKind::CaseCreated));
        assert_eq!(event.process_instance_id(), Some("12345"));
    }

    #[test]
    fn test_structured_process_instance_id_stays_in_fields() {
        let event = translate(r#"{"eventType":"TASK_UPDATE","processInstanceId":{"id":7}}"#);
        let DomainEvent::TaskUpdate(body) = &event else {
            panic!("expected TASK_UPDATE, got {event:?}");
        };
        assert_eq!(body.process_instance_id, None);
        assert_eq!(body.fields.get("processInstanceId"), Some(&json!({"id": 7})));
    }

    #[test]
    fn test_numeric_subscription_id_is_captured() {
        let event = translate(r#"{"eventType":"ESTABLISHED_CONNECTION","subscriptionId":42}"#);
        assert_eq!(event.kind(), Some(EventKind::EstablishedConnection));
        assert_eq!(event.subscription_id(), Some("42"));
    }

    #[test]
    fn test_null_subscription_id_is_unknown() {
        let event = translate(r#"{"eventType":"ESTABLISHED_CONNECTION","subscriptionId":null}"#);
        assert_eq!(event.kind(), None);
        assert_eq!(event.event_type(), Some("ESTABLISHED_CONNECTION"));
    }
}
