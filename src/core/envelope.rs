//! Message shapes carried between actors.
//!
//! Two layers live here and must not be conflated:
//! - [`Envelope`]: `{sender, payload}`, the unit of mailbox traffic.
//! - [`WireMessage`]: `{sender, actor, payload}`, what a bridge endpoint and a remote actor
//!   exchange over a socket.
//!
//! Frames a subscriber receives from the bridge are plain JSON values; see
//! [`crate::core::decode_frame_value`].

use serde::{Deserialize, Serialize};
use sonic_rs::Value;
use thiserror::Error;

/// Record handed out by a mailbox `receive()`: the payload is still JSON text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MailboxMessage {
    pub sender: String,
    pub payload: String,
}

/// Decoded mailbox message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub sender: String,
    pub payload: Value,
}

/// Envelope decoding/encoding failure. Never carries a partial envelope.
#[derive(Debug, Clone, Error)]
pub enum EnvelopeError {
    #[error("invalid envelope: {0}")]
    Parse(String),

    #[error("unable to encode envelope: {0}")]
    Encode(String),
}

impl Envelope {
    pub fn new(sender: impl Into<String>, payload: Value) -> Self {
        Self {
            sender: sender.into(),
            payload,
        }
    }

    /// Decode the JSON payload text of a mailbox record.
    pub fn from_record(record: &MailboxMessage) -> Result<Self, EnvelopeError> {
        let payload = sonic_rs::from_str::<Value>(&record.payload)
            .map_err(|err| EnvelopeError::Parse(err.to_string()))?;
        Ok(Self {
            sender: record.sender.clone(),
            payload,
        })
    }

    /// Serialize only the payload, as the mailbox `send` primitive expects.
    pub fn payload_text(&self) -> Result<String, EnvelopeError> {
        sonic_rs::to_string(&self.payload).map_err(|err| EnvelopeError::Encode(err.to_string()))
    }
}

/// `{"sender": .., "payload": ..}` as JSON text.
pub fn encode(sender: &str, payload: &Value) -> Result<String, EnvelopeError> {
    #[derive(Serialize)]
    struct Borrowed<'a> {
        sender: &'a str,
        payload: &'a Value,
    }

    sonic_rs::to_string(&Borrowed { sender, payload })
        .map_err(|err| EnvelopeError::Encode(err.to_string()))
}

/// Serde derives also accept the sequence form (`["A", {}]`); only objects are envelopes.
fn ensure_object(bytes: &[u8]) -> Result<(), EnvelopeError> {
    match bytes.iter().find(|b| !b.is_ascii_whitespace()) {
        Some(b'{') => Ok(()),
        _ => Err(EnvelopeError::Parse("expected a JSON object".to_string())),
    }
}

/// Parse envelope text. Missing fields, a non-string sender, a non-object document or
/// malformed JSON all fail.
pub fn decode(text: &str) -> Result<Envelope, EnvelopeError> {
    ensure_object(text.as_bytes())?;
    sonic_rs::from_str::<Envelope>(text).map_err(|err| EnvelopeError::Parse(err.to_string()))
}

/// Check that `text` is a single well-formed JSON document.
pub fn validate_json(text: &str) -> Result<(), EnvelopeError> {
    sonic_rs::from_str::<Value>(text)
        .map(|_| ())
        .map_err(|err| EnvelopeError::Parse(err.to_string()))
}

/// Message exchanged between a bridge endpoint and a remote actor.
///
/// Endpoint to actor: `sender` is the origin, `actor` the connected actor.
/// Actor to endpoint: `actor` is the destination; the endpoint attributes the message to the
/// connection's own actor id regardless of `sender`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub actor: String,
    pub payload: Value,
}

impl WireMessage {
    pub fn decode(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        ensure_object(bytes)?;
        sonic_rs::from_slice::<Self>(bytes).map_err(|err| EnvelopeError::Parse(err.to_string()))
    }

    pub fn encode(&self) -> Result<String, EnvelopeError> {
        sonic_rs::to_string(self).map_err(|err| EnvelopeError::Encode(err.to_string()))
    }

    /// Mailbox view of this message (payload re-serialized as JSON text).
    pub fn into_record(self) -> Result<MailboxMessage, EnvelopeError> {
        let payload =
            sonic_rs::to_string(&self.payload).map_err(|err| EnvelopeError::Encode(err.to_string()))?;
        Ok(MailboxMessage {
            sender: self.sender,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sonic_rs::json;

    #[test]
    fn encode_then_decode_is_identity() {
        let payload = json!({"hello": "world", "n": [1, 2.5, null, true], "nested": {"k": "v"}});
        let text = encode("A", &payload).unwrap();
        let env = decode(&text).unwrap();
        assert_eq!(env.sender, "A");
        assert_eq!(env.payload, payload);
    }

    #[test]
    fn null_payload_is_a_value_not_a_missing_field() {
        let env = decode(r#"{"sender":"A","payload":null}"#).unwrap();
        assert_eq!(env.payload, json!(null));
    }

    #[test]
    fn decode_fails_closed() {
        assert!(decode("").is_err());
        assert!(decode("{").is_err());
        assert!(decode(r#"{"sender":"A"}"#).is_err());
        assert!(decode(r#"{"payload":{}}"#).is_err());
        assert!(decode(r#"{"sender":7,"payload":{}}"#).is_err());
        assert!(decode(r#"["A", {}]"#).is_err());
        assert!(decode(r#" ["A", {}]"#).is_err());
        assert!(decode(r#"  {"sender":"A","payload":{}}"#).is_ok());
    }

    #[test]
    fn record_payload_must_be_json() {
        let ok = MailboxMessage {
            sender: "ping".into(),
            payload: r#"{"hello":"world"}"#.into(),
        };
        let env = Envelope::from_record(&ok).unwrap();
        assert_eq!(env.sender, "ping");
        assert_eq!(env.payload_text().unwrap(), r#"{"hello":"world"}"#);

        let bad = MailboxMessage {
            sender: "ping".into(),
            payload: "hello".into(),
        };
        assert!(matches!(
            Envelope::from_record(&bad),
            Err(EnvelopeError::Parse(_))
        ));
    }

    #[test]
    fn wire_message_defaults_addressing_fields() {
        let msg = WireMessage::decode(br#"{"actor":"pong","payload":[1]}"#).unwrap();
        assert_eq!(msg.sender, "");
        assert_eq!(msg.actor, "pong");
        assert!(WireMessage::decode(br#"{"actor":"pong"}"#).is_err());
        assert!(matches!(
            WireMessage::decode(br#"["ping", "pong", {}]"#),
            Err(EnvelopeError::Parse(_))
        ));
        assert!(WireMessage::decode(br#"  "pong""#).is_err());

        let record = WireMessage {
            sender: "pong".into(),
            actor: "ui".into(),
            payload: json!({"a": 1}),
        }
        .into_record()
        .unwrap();
        assert_eq!(record.sender, "pong");
        assert_eq!(record.payload, r#"{"a":1}"#);
    }

    #[test]
    fn validate_json_rejects_trailing_garbage() {
        assert!(validate_json(r#"{"a":1}"#).is_ok());
        assert!(validate_json(r#"{"a":1} x"#).is_err());
        assert!(validate_json("").is_err());
    }
}
