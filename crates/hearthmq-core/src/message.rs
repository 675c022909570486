//! Immutable MQTT messages

use bytes::Bytes;
use serde::Serialize;

use crate::{Error, Result, Value};

/// A message received from or published to the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    topic: String,
    payload: Bytes,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    /// Build a message with a JSON-encoded payload
    pub fn json<T: Serialize + ?Sized>(topic: impl Into<String>, value: &T) -> Result<Self> {
        let topic = topic.into();
        let payload = serde_json::to_vec(value).map_err(|e| Error::MalformedPayload {
            topic: topic.clone(),
            reason: e.to_string(),
        })?;
        Ok(Self::new(topic, payload))
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// The command name: everything after the last `/`
    pub fn command(&self) -> &str {
        self.topic.rsplit('/').next().unwrap_or_default()
    }

    /// Decode the payload as UTF-8 JSON. An empty (or blank) payload is
    /// `Value::Null`, so bare commands such as `get` need no body.
    pub fn parse_payload(&self) -> Result<Value> {
        let text = std::str::from_utf8(&self.payload).map_err(|e| Error::MalformedPayload {
            topic: self.topic.clone(),
            reason: e.to_string(),
        })?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(text).map_err(|e| Error::MalformedPayload {
            topic: self.topic.clone(),
            reason: e.to_string(),
        })
    }

    /// Lossy UTF-8 view of the payload, for logging
    pub fn payload_preview(&self, max_chars: usize) -> String {
        let text = String::from_utf8_lossy(&self.payload);
        if text.chars().count() <= max_chars {
            text.into_owned()
        } else {
            let mut preview: String = text.chars().take(max_chars).collect();
            preview.push_str("...");
            preview
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_command_is_last_segment() {
        let msg = Message::new("hearthmq/light/lamp/set", "{}");
        assert_eq!(msg.command(), "set");

        let msg = Message::new("set", "{}");
        assert_eq!(msg.command(), "set");

        let msg = Message::new("hearthmq/light/lamp/", "{}");
        assert_eq!(msg.command(), "");
    }

    #[test]
    fn test_parse_json_object() {
        let msg = Message::new("a/b/set", r#"{"power": true, "level": 40}"#);
        let value = msg.parse_payload().unwrap();
        assert_eq!(value, json!({"power": true, "level": 40}));
    }

    #[test]
    fn test_parse_empty_payload_is_null() {
        assert_eq!(Message::new("a/b/get", "").parse_payload().unwrap(), Value::Null);
        assert_eq!(Message::new("a/b/get", " \n").parse_payload().unwrap(), Value::Null);
    }

    #[test]
    fn test_json_message() {
        let msg = Message::json("a/b/set", &json!({"level": 40})).unwrap();
        assert_eq!(msg.payload().as_ref(), br#"{"level":40}"#);
        assert_eq!(msg.parse_payload().unwrap(), json!({"level": 40}));
    }

    #[test]
    fn test_parse_malformed() {
        let msg = Message::new("a/b/set", "{not json");
        assert!(matches!(
            msg.parse_payload(),
            Err(Error::MalformedPayload { ref topic, .. }) if topic == "a/b/set"
        ));

        let msg = Message::new("a/b/set", vec![0xffu8, 0xfe]);
        assert!(msg.parse_payload().is_err());
    }

    #[test]
    fn test_payload_preview_truncates() {
        let msg = Message::new("t", "abcdefghij");
        assert_eq!(msg.payload_preview(4), "abcd...");
        assert_eq!(msg.payload_preview(20), "abcdefghij");
    }
}
