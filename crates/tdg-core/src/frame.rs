//! JSON array framing for the gateway wire protocol.
//!
//! Every frame in both directions is a JSON array carried as a text
//! message. Element 0 is a string: the command name on inbound frames,
//! the event tag on outbound frames. The remaining elements are
//! positional arguments or payload.

use serde_json::Value;

use crate::error::{TdgError, TdgResult};

/// Tag of the acknowledgement frame sent once, immediately after accept.
pub const TAG_CONNECTED: &str = "connected";

/// Tag wrapping events relayed from a client's upstream session.
pub const TAG_BFX: &str = "bfx";

/// Tag of handler-failure reports.
pub const TAG_ERROR: &str = "error";

/// Decode a raw text frame into its element sequence.
///
/// Fails when the text is not valid JSON or the value is not an array.
/// A decode failure is never fatal to a connection: callers log it and
/// drop the frame.
pub fn frame_decode(raw: &str) -> TdgResult<Vec<Value>> {
    let value: Value = serde_json::from_str(raw)?;
    match value {
        Value::Array(items) => Ok(items),
        other => Err(TdgError::Codec(format!(
            "expected array frame, got {}",
            json_type(&other)
        ))),
    }
}

/// Encode a tag plus payload elements into a wire frame.
///
/// Serializing an in-memory `Value` tree cannot fail, so this returns
/// the frame text directly.
pub fn frame_encode(tag: &str, payload: Vec<Value>) -> String {
    let mut items = Vec::with_capacity(1 + payload.len());
    items.push(Value::String(tag.to_string()));
    items.extend(payload);
    Value::Array(items).to_string()
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn round_trip_tag_and_payload() {
        let wire = frame_encode("data.candles", vec![json!("tBTCUSD"), json!(42), json!([1, 2])]);
        let frame = frame_decode(&wire).unwrap();
        assert_eq!(frame[0], json!("data.candles"));
        assert_eq!(frame[1], json!("tBTCUSD"));
        assert_eq!(frame[2], json!(42));
        assert_eq!(frame[3], json!([1, 2]));
    }

    #[test]
    fn encode_without_payload() {
        assert_eq!(frame_encode(TAG_CONNECTED, vec![]), r#"["connected"]"#);
    }

    #[test]
    fn decode_rejects_invalid_json() {
        assert!(frame_decode("{not json").is_err());
    }

    #[test]
    fn decode_rejects_non_array() {
        let err = frame_decode(r#"{"event":"ping"}"#).unwrap_err();
        assert!(err.to_string().contains("expected array frame"));
    }

    #[test]
    fn decode_accepts_empty_array() {
        assert!(frame_decode("[]").unwrap().is_empty());
    }
}
