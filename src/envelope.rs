//! Application envelopes carried inside data frames.
//!
//! Every Text or Binary frame carries envelopes of three kinds: a message, a notification
//! (which may ask for an acknowledgment) or an acknowledgment. Two wire formats exist.
//!
//! # Json
//!
//! Carried in Text frames:
//!
//! ```json
//! { "type": "notification", "payload": { "id": 7 }, "responseRequired": true }
//! ```
//!
//! `type` is one of `"message"`, `"notification"` or `"ack"`; `responseRequired` may be
//! omitted and defaults to `false`.
//!
//! # Binary
//!
//! Carried in Binary frames:
//!
//! ```text
//! +--------+--------+--------------------------+-------------------+
//! |  kind  | flags  | payload length (u32, BE) |  payload ...      |
//! +--------+--------+--------------------------+-------------------+
//! ```
//!
//! `kind` is 1 (message), 2 (notification) or 3 (ack). Flag bit 0 means a response is
//! required; the other flag bits must be zero.
use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Frame, Result, WebSocketError};

/// Size of the binary envelope header.
const BINARY_HEAD_SIZE: usize = 6;
const FLAG_RESPONSE_REQUIRED: u8 = 0x01;

/// Selects how envelopes are encoded in frame payloads.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum PayloadFormat {
    /// JSON objects in Text frames.
    #[default]
    Json,
    /// Length-prefixed binary envelopes in Binary frames.
    Binary,
}

impl fmt::Display for PayloadFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json => write!(f, "json"),
            Self::Binary => write!(f, "binary"),
        }
    }
}

/// The application value carried by an envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// A structured value, used with [`PayloadFormat::Json`].
    Json(Value),
    /// Opaque bytes, used with [`PayloadFormat::Binary`].
    Binary(Bytes),
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

impl From<Bytes> for Payload {
    fn from(value: Bytes) -> Self {
        Self::Binary(value)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(value: Vec<u8>) -> Self {
        Self::Binary(value.into())
    }
}

/// Kind of an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeKind {
    Message,
    Notification,
    Ack,
}

impl EnvelopeKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::Notification => "notification",
            Self::Ack => "ack",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "message" => Some(Self::Message),
            "notification" => Some(Self::Notification),
            "ack" => Some(Self::Ack),
            _ => None,
        }
    }

    fn to_byte(self) -> u8 {
        match self {
            Self::Message => 1,
            Self::Notification => 2,
            Self::Ack => 3,
        }
    }

    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::Message),
            2 => Some(Self::Notification),
            3 => Some(Self::Ack),
            _ => None,
        }
    }
}

/// An application envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub kind: EnvelopeKind,
    pub payload: Payload,
    /// Only meaningful for notifications: the receiver must answer with an ack.
    pub response_required: bool,
}

impl Envelope {
    pub fn message(payload: impl Into<Payload>) -> Self {
        Self {
            kind: EnvelopeKind::Message,
            payload: payload.into(),
            response_required: false,
        }
    }

    pub fn notification(payload: impl Into<Payload>, response_required: bool) -> Self {
        Self {
            kind: EnvelopeKind::Notification,
            payload: payload.into(),
            response_required,
        }
    }

    pub fn ack(payload: impl Into<Payload>) -> Self {
        Self {
            kind: EnvelopeKind::Ack,
            payload: payload.into(),
            response_required: false,
        }
    }
}

/// Result of decoding one envelope from a buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Envelope(Envelope),
    /// A well-formed envelope of a kind we do not know. It carries the kind as found on the wire.
    Unknown(String),
}

fn is_false(value: &bool) -> bool {
    !*value
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JsonEnvelopeRef<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    payload: &'a Value,
    #[serde(skip_serializing_if = "is_false")]
    response_required: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
    #[serde(default)]
    response_required: bool,
}

impl PayloadFormat {
    /// Encodes an envelope into a final data frame.
    ///
    /// # Errors
    /// - `WebSocketError::IncompatiblePayload` when a binary payload is sent with the Json format.
    /// - `WebSocketError::PayloadTooLarge` when a binary payload does not fit its u32 length.
    pub fn encode(self, envelope: &Envelope) -> Result<Frame> {
        match self {
            Self::Json => {
                let Payload::Json(payload) = &envelope.payload else {
                    return Err(WebSocketError::IncompatiblePayload(self));
                };

                let bytes = serde_json::to_vec(&JsonEnvelopeRef {
                    kind: envelope.kind.as_str(),
                    payload,
                    response_required: envelope.response_required,
                })?;
                Ok(Frame::text(bytes))
            }
            Self::Binary => {
                let payload = match &envelope.payload {
                    Payload::Binary(bytes) => bytes.clone(),
                    Payload::Json(value) => Bytes::from(serde_json::to_vec(value)?),
                };
                let len = u32::try_from(payload.len()).map_err(|_| WebSocketError::PayloadTooLarge)?;

                let mut flags = 0;
                if envelope.response_required {
                    flags |= FLAG_RESPONSE_REQUIRED;
                }

                let mut dst = BytesMut::with_capacity(BINARY_HEAD_SIZE + payload.len());
                dst.put_u8(envelope.kind.to_byte());
                dst.put_u8(flags);
                dst.put_u32(len);
                dst.extend_from_slice(&payload);
                Ok(Frame::binary(dst.freeze()))
            }
        }
    }

    /// Decodes one envelope from the front of `buf`.
    ///
    /// # Returns
    /// - `Ok(Some((Decoded, consumed)))` with the number of bytes the envelope used.
    /// - `Ok(None)` if `buf` only holds the beginning of an envelope.
    /// - `Err(WebSocketError::PayloadDecode(_))` if the bytes can never become a valid envelope.
    pub fn decode(self, buf: &[u8]) -> Result<Option<(Decoded, usize)>> {
        match self {
            Self::Json => decode_json(buf),
            Self::Binary => decode_binary(buf),
        }
    }
}

fn decode_json(buf: &[u8]) -> Result<Option<(Decoded, usize)>> {
    let mut stream = serde_json::Deserializer::from_slice(buf).into_iter::<JsonEnvelope>();

    match stream.next() {
        None => Ok(None),
        // running out of input is not an error, the rest of the object is still on its way
        Some(Err(err)) if err.is_eof() => Ok(None),
        Some(Err(err)) => Err(WebSocketError::PayloadDecode(err.to_string())),
        Some(Ok(envelope)) => {
            let consumed = stream.byte_offset();
            let decoded = match EnvelopeKind::from_name(&envelope.kind) {
                Some(kind) => Decoded::Envelope(Envelope {
                    kind,
                    payload: Payload::Json(envelope.payload),
                    response_required: envelope.response_required,
                }),
                None => Decoded::Unknown(envelope.kind),
            };
            Ok(Some((decoded, consumed)))
        }
    }
}

fn decode_binary(buf: &[u8]) -> Result<Option<(Decoded, usize)>> {
    if buf.len() < BINARY_HEAD_SIZE {
        return Ok(None);
    }

    let flags = buf[1];
    if flags & !FLAG_RESPONSE_REQUIRED != 0 {
        return Err(WebSocketError::PayloadDecode(format!(
            "reserved envelope flags set (flags=0x{flags:02x})"
        )));
    }

    let len = u32::from_be_bytes([buf[2], buf[3], buf[4], buf[5]]) as usize;
    let consumed = BINARY_HEAD_SIZE + len;
    if buf.len() < consumed {
        return Ok(None);
    }

    let decoded = match EnvelopeKind::from_byte(buf[0]) {
        Some(kind) => Decoded::Envelope(Envelope {
            kind,
            payload: Payload::Binary(Bytes::copy_from_slice(&buf[BINARY_HEAD_SIZE..consumed])),
            response_required: flags & FLAG_RESPONSE_REQUIRED != 0,
        }),
        None => Decoded::Unknown(format!("0x{:02x}", buf[0])),
    };

    Ok(Some((decoded, consumed)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::OpCode;
    use serde_json::json;

    mod json_tests {
        use super::*;

        #[test]
        fn test_encode() {
            let frame = PayloadFormat::Json
                .encode(&Envelope::notification(json!({"id": 7}), true))
                .unwrap();
            assert_eq!(frame.opcode, OpCode::Text);

            let value: Value = serde_json::from_slice(&frame.payload).unwrap();
            assert_eq!(
                value,
                json!({"type": "notification", "payload": {"id": 7}, "responseRequired": true})
            );
        }

        #[test]
        fn test_encode_omits_false_flag() {
            let frame = PayloadFormat::Json
                .encode(&Envelope::message(json!("hi")))
                .unwrap();
            assert_eq!(&frame.payload[..], br#"{"type":"message","payload":"hi"}"#);
        }

        #[test]
        fn test_encode_rejects_binary_payload() {
            let res = PayloadFormat::Json.encode(&Envelope::message(vec![1u8, 2, 3]));
            assert!(matches!(
                res,
                Err(WebSocketError::IncompatiblePayload(PayloadFormat::Json))
            ));
        }

        #[test]
        fn test_decode_complete() {
            let buf = br#"{"type":"notification","payload":[1,2],"responseRequired":true}"#;
            let (decoded, consumed) = PayloadFormat::Json.decode(buf).unwrap().unwrap();

            assert_eq!(consumed, buf.len());
            assert_eq!(
                decoded,
                Decoded::Envelope(Envelope::notification(json!([1, 2]), true))
            );
        }

        #[test]
        fn test_decode_defaults() {
            let (decoded, _) = PayloadFormat::Json
                .decode(br#"{"type":"message"}"#)
                .unwrap()
                .unwrap();
            assert_eq!(decoded, Decoded::Envelope(Envelope::message(Value::Null)));
        }

        #[test]
        fn test_decode_truncated_is_incomplete() {
            assert!(PayloadFormat::Json
                .decode(br#"{"type":"mess"#)
                .unwrap()
                .is_none());
            assert!(PayloadFormat::Json.decode(b"").unwrap().is_none());
            assert!(PayloadFormat::Json.decode(b"  ").unwrap().is_none());
        }

        #[test]
        fn test_decode_garbage_is_error() {
            assert!(matches!(
                PayloadFormat::Json.decode(b"}{"),
                Err(WebSocketError::PayloadDecode(_))
            ));
            // valid JSON that is not an envelope
            assert!(matches!(
                PayloadFormat::Json.decode(br#"{"payload":1}"#),
                Err(WebSocketError::PayloadDecode(_))
            ));
        }

        #[test]
        fn test_decode_unknown_kind() {
            let (decoded, _) = PayloadFormat::Json
                .decode(br#"{"type":"subscribe","payload":1}"#)
                .unwrap()
                .unwrap();
            assert_eq!(decoded, Decoded::Unknown("subscribe".into()));
        }

        #[test]
        fn test_decode_concatenated() {
            let buf = br#"{"type":"message","payload":1} {"type":"ack"}"#;
            let (_, consumed) = PayloadFormat::Json.decode(buf).unwrap().unwrap();

            let (second, _) = PayloadFormat::Json
                .decode(&buf[consumed..])
                .unwrap()
                .unwrap();
            assert_eq!(second, Decoded::Envelope(Envelope::ack(Value::Null)));
        }
    }

    mod binary_tests {
        use super::*;

        #[test]
        fn test_encode_layout() {
            let frame = PayloadFormat::Binary
                .encode(&Envelope::notification(vec![0xAAu8, 0xBB], true))
                .unwrap();

            assert_eq!(frame.opcode, OpCode::Binary);
            assert_eq!(&frame.payload[..], &[2, 1, 0, 0, 0, 2, 0xAA, 0xBB]);
        }

        #[test]
        fn test_encode_json_payload_as_bytes() {
            let frame = PayloadFormat::Binary
                .encode(&Envelope::message(json!({"a": 1})))
                .unwrap();
            assert_eq!(&frame.payload[6..], br#"{"a":1}"#);
        }

        #[test]
        fn test_decode() {
            let buf = [1, 0, 0, 0, 0, 3, b'a', b'b', b'c', 3];
            let (decoded, consumed) = PayloadFormat::Binary.decode(&buf).unwrap().unwrap();

            assert_eq!(consumed, 9);
            assert_eq!(
                decoded,
                Decoded::Envelope(Envelope::message(Bytes::from_static(b"abc")))
            );
        }

        #[test]
        fn test_decode_incomplete() {
            let buf = [2, 1, 0, 0, 0, 4, 1, 2];
            for end in 0..=buf.len() {
                assert!(PayloadFormat::Binary.decode(&buf[..end]).unwrap().is_none());
            }
        }

        #[test]
        fn test_decode_garbage_is_error() {
            assert!(matches!(
                PayloadFormat::Binary.decode(&[0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]),
                Err(WebSocketError::PayloadDecode(_))
            ));
        }

        #[test]
        fn test_decode_unknown_kind() {
            let (decoded, consumed) = PayloadFormat::Binary
                .decode(&[9, 0, 0, 0, 0, 1, 0])
                .unwrap()
                .unwrap();
            assert_eq!(decoded, Decoded::Unknown("0x09".into()));
            assert_eq!(consumed, 7);
        }
    }
}
