//! Ingress parsing of CDC stream messages.
//!
//! Messages carry two JSON text fields, `key` and `value`; missing or
//! empty fields count as `{}`. Malformed events are dropped by the caller
//! (and still acknowledged so the stream never stalls).

use chrono::Utc;
use etrap_evidence::decode::decode_record;
use etrap_evidence::model::{ChangeEvent, Operation, SourceInfo};
use serde_json::{Map, Value};
use thiserror::Error;

/// Raw fields of one stream entry.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub stream: String,
    pub id: String,
    pub key: Option<String>,
    pub value: Option<String>,
}

#[derive(Debug, Error)]
pub enum EventParseError {
    #[error("invalid message json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("missing operation code")]
    MissingOperation,
    #[error("unknown operation code {0:?}")]
    UnknownOperation(String),
    #[error("DELETE event without a before image")]
    DeleteWithoutBefore,
}

pub fn parse_cdc_event(message: &RawMessage) -> Result<ChangeEvent, EventParseError> {
    let value = parse_or_empty(message.value.as_deref())?;
    let key = parse_or_empty(message.key.as_deref())?;

    let code = value
        .get("op")
        .and_then(Value::as_str)
        .ok_or(EventParseError::MissingOperation)?;
    let operation = Operation::from_cdc_code(code)
        .ok_or_else(|| EventParseError::UnknownOperation(code.to_string()))?;

    let before = value
        .get("before")
        .filter(|image| !image.is_null())
        .cloned()
        .map(decode_record);
    let after = value
        .get("after")
        .filter(|image| !image.is_null())
        .cloned()
        .map(decode_record);
    if operation == Operation::Delete && before.is_none() {
        return Err(EventParseError::DeleteWithoutBefore);
    }

    let source: SourceInfo = match value.get("source") {
        Some(raw) if !raw.is_null() => serde_json::from_value(raw.clone())?,
        _ => SourceInfo::default(),
    };
    let timestamp_ms = source.ts_ms.unwrap_or_else(|| Utc::now().timestamp_millis());

    Ok(ChangeEvent {
        stream: message.stream.clone(),
        message_id: message.id.clone(),
        operation,
        key,
        before,
        after,
        source,
        timestamp_ms,
    })
}

fn parse_or_empty(raw: Option<&str>) -> Result<Value, serde_json::Error> {
    match raw {
        Some(text) if !text.trim().is_empty() => serde_json::from_str(text),
        _ => Ok(Value::Object(Map::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(value: Value) -> RawMessage {
        RawMessage {
            stream: "etrap.public.accounts".to_string(),
            id: "1718349000000-0".to_string(),
            key: Some(r#"{"id": 1}"#.to_string()),
            value: Some(value.to_string()),
        }
    }

    #[test]
    fn insert_carries_a_decoded_after_image() {
        let event = parse_cdc_event(&message(json!({
            "op": "c",
            "before": null,
            "after": {"id": 1, "amount": "JxA="},
            "source": {"db": "etrapdb", "schema": "public", "table": "accounts", "ts_ms": 1749877844134_i64},
        })))
        .unwrap();

        assert_eq!(event.operation, Operation::Insert);
        assert!(event.before.is_none());
        assert_eq!(event.after, Some(json!({"id": 1, "amount": 10000})));
        assert_eq!(event.timestamp_ms, 1749877844134);
        assert_eq!(event.source.table, "accounts");
    }

    #[test]
    fn update_keeps_both_images() {
        let event = parse_cdc_event(&message(json!({
            "op": "u",
            "before": {"id": 1, "amount": 1},
            "after": {"id": 1, "amount": 2},
            "source": {"db": "etrapdb", "table": "accounts"},
        })))
        .unwrap();
        assert_eq!(event.operation, Operation::Update);
        assert!(event.before.is_some());
        assert!(event.after.is_some());
    }

    #[test]
    fn snapshot_maps_from_r() {
        let event = parse_cdc_event(&message(json!({
            "op": "r",
            "after": {"id": 1},
            "source": {},
        })))
        .unwrap();
        assert_eq!(event.operation, Operation::Snapshot);
    }

    #[test]
    fn delete_without_before_is_rejected() {
        let err = parse_cdc_event(&message(json!({
            "op": "d",
            "before": null,
            "after": null,
            "source": {"table": "accounts"},
        })))
        .unwrap_err();
        assert!(matches!(err, EventParseError::DeleteWithoutBefore));
    }

    #[test]
    fn missing_value_counts_as_empty_object() {
        let raw = RawMessage {
            stream: "etrap.public.accounts".to_string(),
            id: "1-0".to_string(),
            key: None,
            value: None,
        };
        // {} has no op, so the event is malformed rather than a panic
        assert!(matches!(
            parse_cdc_event(&raw),
            Err(EventParseError::MissingOperation)
        ));
    }

    #[test]
    fn blank_value_counts_as_empty_object() {
        let raw = RawMessage {
            stream: "etrap.public.accounts".to_string(),
            id: "1-0".to_string(),
            key: Some("  ".to_string()),
            value: Some("".to_string()),
        };
        assert!(matches!(
            parse_cdc_event(&raw),
            Err(EventParseError::MissingOperation)
        ));
    }

    #[test]
    fn unknown_operation_is_rejected() {
        let err = parse_cdc_event(&message(json!({"op": "t", "source": {}}))).unwrap_err();
        assert!(matches!(err, EventParseError::UnknownOperation(code) if code == "t"));
    }

    #[test]
    fn broken_json_is_rejected() {
        let raw = RawMessage {
            stream: "etrap.public.accounts".to_string(),
            id: "1-0".to_string(),
            key: None,
            value: Some("{not json".to_string()),
        };
        assert!(matches!(parse_cdc_event(&raw), Err(EventParseError::Json(_))));
    }

    #[test]
    fn missing_timestamp_falls_back_to_now() {
        let before = Utc::now().timestamp_millis();
        let event = parse_cdc_event(&message(json!({
            "op": "c",
            "after": {"id": 1},
            "source": {"db": "etrapdb", "table": "accounts"},
        })))
        .unwrap();
        assert!(event.timestamp_ms >= before);
    }
}
