//! Text framing shared by the WebSocket client and the broadcast server: one
//! JSON object `{"type": "<name>", "data": <payload>}` per frame.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Serialize)]
struct OutFrame<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    data: &'a Value,
}

#[derive(Deserialize)]
struct InFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

pub fn encode(name: &str, data: &Value) -> Result<String, serde_json::Error> {
    serde_json::to_string(&OutFrame { kind: name, data })
}

/// Splits a text frame into its event name and raw payload. A missing `data`
/// field decodes as `null`.
pub fn decode(text: &str) -> Result<(String, Value), serde_json::Error> {
    let frame: InFrame = serde_json::from_str(text)?;
    Ok((frame.kind, frame.data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_reads_type_and_data() {
        let (name, data) = decode(r#"{"type":"subscribe","data":{"channels":["alarm"]}}"#).unwrap();
        assert_eq!(name, "subscribe");
        assert_eq!(data, json!({"channels": ["alarm"]}));
    }

    #[test]
    fn test_decode_defaults_missing_data_to_null() {
        let (name, data) = decode(r#"{"type":"subscribe"}"#).unwrap();
        assert_eq!(name, "subscribe");
        assert!(data.is_null());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode("not json").is_err());
        assert!(decode(r#"{"data":{}}"#).is_err());
    }

    #[test]
    fn test_encode_shape() {
        let text = encode("alarm", &json!({"code": "T1"})).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value, json!({"type": "alarm", "data": {"code": "T1"}}));
    }
}
