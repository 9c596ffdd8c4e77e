//! Close codes and close frame payloads, as defined in
//! [RFC 6455 Section 7.4](https://datatracker.ietf.org/doc/html/rfc6455#section-7.4).
//!
//! A close frame payload is either empty, or a big-endian `u16` status code optionally
//! followed by a UTF-8 reason.
use bytes::{BufMut, Bytes, BytesMut};

use crate::{Result, WebSocketError};

/// Status code used to indicate why an endpoint is closing the WebSocket connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    /// Normal closure, meaning that the purpose for which the connection was established
    /// has been fulfilled.
    Normal,
    /// The endpoint is "going away", such as a server going down or a client that stopped
    /// receiving heartbeat answers.
    Away,
    /// The endpoint is terminating the connection due to a protocol error.
    Protocol,
    /// The endpoint received a type of data it cannot accept.
    Unsupported,
    /// No status code was actually present. Never sent on the wire.
    Status,
    /// The connection was closed abnormally. Never sent on the wire.
    Abnormal,
    /// The endpoint received data within a message that was not consistent with its type.
    Invalid,
    /// The endpoint received a message that violates its policy.
    Policy,
    /// The endpoint received a message that is too big to process.
    Size,
    /// The client expected the server to negotiate one or more extensions.
    Extension,
    /// The server encountered an unexpected condition.
    Error,
    /// The server is restarting.
    Restart,
    /// The server is overloaded and the client should try again later.
    Again,
    /// TLS handshake failure. Never sent on the wire.
    Tls,
    /// Reserved codes in the 1000-2999 range that have no meaning yet.
    Reserved(u16),
    /// Codes registered with IANA (3000-3999).
    Iana(u16),
    /// Codes for private use by applications (4000-4999).
    Library(u16),
    /// Codes outside of every valid range.
    Bad(u16),
}

impl CloseCode {
    /// Returns `true` if the code may be sent in a close frame.
    pub fn is_allowed(self) -> bool {
        !matches!(
            self,
            Self::Bad(_) | Self::Reserved(_) | Self::Status | Self::Abnormal | Self::Tls
        )
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        match code {
            1000 => Self::Normal,
            1001 => Self::Away,
            1002 => Self::Protocol,
            1003 => Self::Unsupported,
            1005 => Self::Status,
            1006 => Self::Abnormal,
            1007 => Self::Invalid,
            1008 => Self::Policy,
            1009 => Self::Size,
            1010 => Self::Extension,
            1011 => Self::Error,
            1012 => Self::Restart,
            1013 => Self::Again,
            1015 => Self::Tls,
            1..=999 => Self::Bad(code),
            1016..=2999 | 1004 | 1014 => Self::Reserved(code),
            3000..=3999 => Self::Iana(code),
            4000..=4999 => Self::Library(code),
            _ => Self::Bad(code),
        }
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        match code {
            CloseCode::Normal => 1000,
            CloseCode::Away => 1001,
            CloseCode::Protocol => 1002,
            CloseCode::Unsupported => 1003,
            CloseCode::Status => 1005,
            CloseCode::Abnormal => 1006,
            CloseCode::Invalid => 1007,
            CloseCode::Policy => 1008,
            CloseCode::Size => 1009,
            CloseCode::Extension => 1010,
            CloseCode::Error => 1011,
            CloseCode::Restart => 1012,
            CloseCode::Again => 1013,
            CloseCode::Tls => 1015,
            CloseCode::Reserved(code)
            | CloseCode::Iana(code)
            | CloseCode::Library(code)
            | CloseCode::Bad(code) => code,
        }
    }
}

/// The decoded payload of a close frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    pub code: CloseCode,
    pub reason: String,
}

impl CloseFrame {
    pub fn new(code: CloseCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Parses a close frame payload.
    ///
    /// # Returns
    /// - `Ok(None)` for an empty payload.
    /// - `Ok(Some(CloseFrame))` when a valid code (and optional UTF-8 reason) is present.
    /// - `Err(WebSocketError::InvalidCloseFrame)` for a 1 byte payload, a code that may not be
    ///   sent on the wire, or a reason that is not valid UTF-8.
    pub fn parse(payload: &[u8]) -> Result<Option<Self>> {
        match payload.len() {
            0 => Ok(None),
            1 => Err(WebSocketError::InvalidCloseFrame),
            _ => {
                let code = CloseCode::from(u16::from_be_bytes([payload[0], payload[1]]));
                if !code.is_allowed() {
                    return Err(WebSocketError::InvalidCloseFrame);
                }

                let reason = std::str::from_utf8(&payload[2..])
                    .map_err(|_| WebSocketError::InvalidCloseFrame)?;

                Ok(Some(Self::new(code, reason)))
            }
        }
    }

    /// Serializes the close frame into a frame payload.
    ///
    /// The reason is truncated on a character boundary so that the payload fits in a
    /// control frame (125 bytes).
    pub fn to_payload(&self) -> Bytes {
        let mut end = self.reason.len().min(123);
        while !self.reason.is_char_boundary(end) {
            end -= 1;
        }

        let mut payload = BytesMut::with_capacity(2 + end);
        payload.put_u16(self.code.into());
        payload.extend_from_slice(&self.reason.as_bytes()[..end]);
        payload.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_conversions() {
        assert_eq!(CloseCode::from(1000), CloseCode::Normal);
        assert_eq!(CloseCode::from(1009), CloseCode::Size);
        assert_eq!(CloseCode::from(1004), CloseCode::Reserved(1004));
        assert_eq!(CloseCode::from(3001), CloseCode::Iana(3001));
        assert_eq!(CloseCode::from(4500), CloseCode::Library(4500));
        assert_eq!(CloseCode::from(999), CloseCode::Bad(999));
        assert_eq!(CloseCode::from(5000), CloseCode::Bad(5000));

        assert_eq!(u16::from(CloseCode::Protocol), 1002);
        assert_eq!(u16::from(CloseCode::Library(4001)), 4001);
    }

    #[test]
    fn test_parse_empty() {
        assert_eq!(CloseFrame::parse(&[]).unwrap(), None);
    }

    #[test]
    fn test_parse_one_byte_is_invalid() {
        assert!(matches!(
            CloseFrame::parse(&[0x03]),
            Err(WebSocketError::InvalidCloseFrame)
        ));
    }

    #[test]
    fn test_parse_code_and_reason() {
        let frame = CloseFrame::parse(b"\x03\xE8Goodbye").unwrap().unwrap();
        assert_eq!(frame.code, CloseCode::Normal);
        assert_eq!(frame.reason, "Goodbye");
    }

    #[test]
    fn test_parse_rejects_wire_forbidden_codes() {
        // 1005 must never be sent in a close frame
        assert!(CloseFrame::parse(&1005u16.to_be_bytes()).is_err());
        assert!(CloseFrame::parse(&[0x03, 0xE8, 0xFF, 0xFE]).is_err());
    }

    #[test]
    fn test_to_payload_truncates_long_reason() {
        let frame = CloseFrame::new(CloseCode::Normal, "é".repeat(100));
        let payload = frame.to_payload();

        assert!(payload.len() <= 125);
        assert_eq!(&payload[..2], &1000u16.to_be_bytes());
        assert!(std::str::from_utf8(&payload[2..]).is_ok());
    }
}
