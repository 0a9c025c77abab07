//! JSON codec for message payloads.
//!
//! Both directions fail open: `encode` degrades to an empty object and
//! `decode` drops what it cannot read. Neither ever returns an error, so a
//! single bad message can't stall a producer or a consumer group.

use crate::envelope::Envelope;
use serde::Serialize;
use serde_json::Value;
use tracing::{error, warn};

/// Payload sent when a message can't be serialized.
///
/// It carries no `event`, so [`decode`] drops it: a degraded send is
/// delivered to the broker but never reaches a handler.
pub const EMPTY_PAYLOAD: &str = "{}";

/// Serializes `message` to JSON, substituting [`EMPTY_PAYLOAD`] on failure.
pub fn encode<M: Serialize + ?Sized>(message: &M) -> String {
    serde_json::to_string(message).unwrap_or_else(|e| {
        error!(error = %e, "Failed to serialize message, sending empty payload");
        EMPTY_PAYLOAD.to_owned()
    })
}

/// Parses a raw payload into an [`Envelope`].
///
/// Returns `None` for malformed JSON, for empty documents (`null`, `false`,
/// `0`, `""`) and for documents that are not shaped like an envelope. The
/// latter includes [`EMPTY_PAYLOAD`], so consumers never admit a message
/// whose producer failed to serialize it.
#[must_use]
pub fn decode(raw: &[u8]) -> Option<Envelope> {
    let value: Value = match serde_json::from_slice(raw) {
        Ok(value) => value,
        Err(e) => {
            error!(error = %e, bytes = raw.len(), "Failed to parse message");
            return None;
        },
    };

    if is_empty(&value) {
        warn!("Empty message");
        return None;
    }

    serde_json::from_value(value)
        .inspect_err(|e| error!(error = %e, "Message is not an event envelope"))
        .ok()
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f == 0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(_) | Value::Object(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    #[test]
    fn test_round_trip_preserves_envelope() {
        let envelope = Envelope::new("order.created", json!({ "id": 7, "items": ["a", "b"] }));
        let decoded = decode(encode(&envelope).as_bytes());
        assert_eq!(decoded, Some(envelope));
    }

    #[test]
    fn test_encode_falls_back_to_empty_object() {
        // Non-string map keys are not representable in JSON.
        let mut unrepresentable = BTreeMap::new();
        unrepresentable.insert(vec![1u8], 1);
        assert_eq!(encode(&unrepresentable), EMPTY_PAYLOAD);
    }

    #[test]
    fn test_decode_rejects_malformed_input() {
        assert_eq!(decode(b"{not json"), None);
        assert_eq!(decode(b""), None);
        assert_eq!(decode(&[0xff, 0xfe]), None);
    }

    #[test]
    fn test_decode_rejects_empty_documents() {
        for raw in ["null", "false", "0", "0.0", "\"\""] {
            assert_eq!(decode(raw.as_bytes()), None, "{raw} should be treated as empty");
        }
    }

    #[test]
    fn test_decode_rejects_non_envelopes() {
        assert_eq!(decode(b"[1,2,3]"), None);
        assert_eq!(decode(br#"{"data":{}}"#), None);
        assert_eq!(decode(b"true"), None);
    }

    #[test]
    fn test_degraded_payload_is_not_an_envelope() {
        assert_eq!(decode(EMPTY_PAYLOAD.as_bytes()), None);
    }

    #[test]
    fn test_decode_defaults_missing_data_to_null() {
        let envelope = decode(br#"{"event":"ping"}"#).expect("envelope without data is valid");
        assert_eq!(envelope.event, "ping");
        assert_eq!(envelope.data, Value::Null);
    }
}
