//! Event wire codec: parse → validate → enrich → encode.
//!
//! Validation failures are reported in a fixed order so that callers always
//! see the first failing constraint: malformed JSON, missing
//! `service`/`level`/`message`, service length, unknown level, non-object
//! metadata.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::{EventError, MAX_SERVICE_LEN};
use crate::event::{Event, Level};

/// Parse and validate an event from raw JSON bytes.
pub fn parse(bytes: &[u8]) -> Result<Event, EventError> {
    let value: Value = serde_json::from_slice(bytes)?;
    from_value(&value)
}

/// Parse and validate an event from an already-decoded JSON value.
///
/// Used by the batch endpoint, where the outer envelope is decoded once and
/// each element is validated independently.
pub fn from_value(value: &Value) -> Result<Event, EventError> {
    let obj = value.as_object().ok_or(EventError::NotAnObject)?;

    let service = required_str(obj, "service")?;
    let level_raw = required_str(obj, "level")?;
    let message = required_str(obj, "message")?;

    if service.chars().count() > MAX_SERVICE_LEN {
        return Err(EventError::ServiceTooLong(service.chars().count()));
    }

    let level: Level = level_raw
        .parse()
        .map_err(|_| EventError::UnknownLevel(level_raw.to_string()))?;

    let metadata = match obj.get("metadata") {
        None | Some(Value::Null) => None,
        Some(Value::Object(m)) => Some(m.clone()),
        Some(_) => return Err(EventError::MetadataNotObject),
    };

    Ok(Event {
        timestamp: optional_timestamp(obj, "timestamp")?,
        service: service.to_string(),
        level,
        message: message.to_string(),
        metadata,
        trace_id: optional_str(obj, "trace_id"),
        span_id: optional_str(obj, "span_id"),
        ingested_at: optional_timestamp(obj, "ingested_at")?,
        host: optional_str(obj, "host"),
    })
}

/// Enrich an accepted event in place: stamp the ingestion instant, fill a
/// missing event timestamp with the arrival instant, record the accepting
/// host.
pub fn enrich(event: &mut Event, host: &str, now: DateTime<Utc>) {
    event.ingested_at = Some(now);
    if event.timestamp.is_none() {
        event.timestamp = Some(now);
    }
    event.host = Some(host.to_string());
}

/// Encode an enriched event as canonical JSON bytes for the log.
pub fn encode(event: &Event) -> Result<Vec<u8>, EventError> {
    Ok(serde_json::to_vec(event)?)
}

/// Log partition key: the UTF-8 bytes of the service name. Events from the
/// same service always land in the same partition.
pub fn partition_key(event: &Event) -> &[u8] {
    event.service.as_bytes()
}

fn required_str<'a>(
    obj: &'a serde_json::Map<String, Value>,
    field: &'static str,
) -> Result<&'a str, EventError> {
    match obj.get(field) {
        None | Some(Value::Null) => Err(EventError::MissingField(field)),
        Some(Value::String(s)) if s.is_empty() => Err(EventError::MissingField(field)),
        Some(Value::String(s)) => Ok(s),
        Some(_) => Err(EventError::NotAString(field)),
    }
}

fn optional_str(obj: &serde_json::Map<String, Value>, field: &str) -> Option<String> {
    obj.get(field)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

fn optional_timestamp(
    obj: &serde_json::Map<String, Value>,
    field: &'static str,
) -> Result<Option<DateTime<Utc>>, EventError> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => DateTime::parse_from_rfc3339(s)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|e| EventError::InvalidTimestamp {
                field,
                reason: e.to_string(),
            }),
        Some(other) => Err(EventError::InvalidTimestamp {
            field,
            reason: format!("expected RFC 3339 string, got {other}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn valid_body() -> Vec<u8> {
        br#"{"service":"api","level":"INFO","message":"ok","metadata":{"latency_ms":50}}"#.to_vec()
    }

    #[test]
    fn parses_minimal_event() {
        let event = parse(&valid_body()).unwrap();
        assert_eq!(event.service, "api");
        assert_eq!(event.level, Level::Info);
        assert_eq!(event.message, "ok");
        assert_eq!(event.latency_ms(), Some(50.0));
        assert!(event.timestamp.is_none());
        assert!(event.ingested_at.is_none());
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(matches!(parse(b"{not json"), Err(EventError::Json(_))));
    }

    #[test]
    fn rejects_non_object() {
        assert!(matches!(parse(b"[1,2]"), Err(EventError::NotAnObject)));
    }

    #[test]
    fn rejects_missing_fields_in_order() {
        let err = parse(br#"{"level":"INFO","message":"x"}"#).unwrap_err();
        assert!(matches!(err, EventError::MissingField("service")));

        let err = parse(br#"{"service":"api","message":"x"}"#).unwrap_err();
        assert!(matches!(err, EventError::MissingField("level")));

        let err = parse(br#"{"service":"api","level":"INFO"}"#).unwrap_err();
        assert!(matches!(err, EventError::MissingField("message")));
    }

    #[test]
    fn rejects_empty_service() {
        let err = parse(br#"{"service":"","level":"INFO","message":"x"}"#).unwrap_err();
        assert!(matches!(err, EventError::MissingField("service")));
    }

    #[test]
    fn rejects_overlong_service() {
        let service = "s".repeat(256);
        let body = format!(r#"{{"service":"{service}","level":"INFO","message":"x"}}"#);
        let err = parse(body.as_bytes()).unwrap_err();
        assert!(matches!(err, EventError::ServiceTooLong(256)));
    }

    #[test]
    fn rejects_unknown_level() {
        let err = parse(br#"{"service":"api","level":"TRACE","message":"x"}"#).unwrap_err();
        assert!(matches!(err, EventError::UnknownLevel(_)));
    }

    #[test]
    fn rejects_non_object_metadata() {
        let err =
            parse(br#"{"service":"api","level":"INFO","message":"x","metadata":[1]}"#).unwrap_err();
        assert!(matches!(err, EventError::MetadataNotObject));
    }

    #[test]
    fn service_length_checked_before_level() {
        // Both constraints violated: the length failure must win.
        let service = "s".repeat(300);
        let body = format!(r#"{{"service":"{service}","level":"NOPE","message":"x"}}"#);
        let err = parse(body.as_bytes()).unwrap_err();
        assert!(matches!(err, EventError::ServiceTooLong(300)));
    }

    #[test]
    fn enrich_fills_missing_timestamp() {
        let mut event = parse(&valid_body()).unwrap();
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        enrich(&mut event, "ingest-1", now);
        assert_eq!(event.timestamp, Some(now));
        assert_eq!(event.ingested_at, Some(now));
        assert_eq!(event.host.as_deref(), Some("ingest-1"));
    }

    #[test]
    fn enrich_keeps_caller_timestamp() {
        let body = br#"{"timestamp":"2025-06-01T09:30:00Z","service":"api","level":"WARN","message":"slow"}"#;
        let mut event = parse(body).unwrap();
        let arrival = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        enrich(&mut event, "ingest-1", arrival);
        assert_eq!(
            event.timestamp,
            Some(Utc.with_ymd_and_hms(2025, 6, 1, 9, 30, 0).unwrap())
        );
        assert_eq!(event.ingested_at, Some(arrival));
    }

    #[test]
    fn rejects_bad_timestamp() {
        let err = parse(
            br#"{"timestamp":"yesterday","service":"api","level":"INFO","message":"x"}"#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            EventError::InvalidTimestamp { field: "timestamp", .. }
        ));
    }

    #[test]
    fn encode_parse_roundtrip() {
        let body = br#"{"service":"payments","level":"ERROR","message":"boom","metadata":{"latency_ms":5000,"endpoint":"/pay","error_code":"E42"},"trace_id":"t-1","span_id":"s-1"}"#;
        let mut event = parse(body).unwrap();
        enrich(&mut event, "ingest-2", Utc::now());

        let bytes = encode(&event).unwrap();
        let reparsed = parse(&bytes).unwrap();
        assert_eq!(reparsed, event);
    }

    #[test]
    fn partition_key_is_service_bytes() {
        let event = parse(&valid_body()).unwrap();
        assert_eq!(partition_key(&event), b"api");
    }
}
