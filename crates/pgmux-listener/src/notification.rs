//! Decoded notifications.

use serde::de::DeserializeOwned;

/// A notification as delivered to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// Channel (topic) the notification was sent on.
    pub channel: String,
    /// Decoded payload.
    pub payload: Payload,
    /// Backend process id of the notifying session.
    pub process_id: i32,
}

/// A notification payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Raw text, when payload decoding is off.
    Text(String),
    /// A decoded JSON document.
    Json(serde_json::Value),
}

impl Payload {
    /// Get the decoded JSON value, if this is a JSON payload.
    #[must_use]
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Text(_) => None,
        }
    }

    /// Get the raw text, if this is a text payload.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Json(_) => None,
        }
    }

    /// Deserialize the payload into `T`.
    ///
    /// Text payloads are parsed as JSON first.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        match self {
            Self::Json(value) => T::deserialize(value),
            Self::Text(text) => serde_json::from_str(text),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_accessors() {
        let text = Payload::Text("lemon".into());
        assert_eq!(text.as_text(), Some("lemon"));
        assert!(text.as_json().is_none());

        let value = Payload::Json(json!({"n": 1}));
        assert_eq!(value.as_json(), Some(&json!({"n": 1})));
    }

    #[test]
    fn test_deserialize_payload() {
        let value = Payload::Json(json!(["value", 2, false, null]));
        let items: Vec<serde_json::Value> = value.deserialize().unwrap();
        assert_eq!(items.len(), 4);

        let number: u32 = Payload::Text("42".into()).deserialize().unwrap();
        assert_eq!(number, 42);
        assert!(Payload::Text("lemon".into()).deserialize::<u32>().is_err());
    }
}
