//! Frames as laid out in [RFC 6455 Section 5.2](https://datatracker.ietf.org/doc/html/rfc6455#section-5.2).
//!
//! A frame starts with two bytes: `FIN`, three reserved bits and a 4 bit opcode, then the
//! `MASK` bit and a 7 bit length. The extended length and the masking key follow when present,
//! then the payload.
//!
//! The payload length is written in one of three forms:
//!
//! - lengths below 126 fit in the 7 bit field,
//! - lengths from 126 to 65535 use the marker `126` followed by a 16 bit big-endian value,
//! - lengths of 65536 and above use the marker `127` followed by a 64 bit big-endian value.
//!
//! Frames come in two categories:
//!
//! - **Data Frames**: `Text`, `Binary` and `Continuation`, carrying envelopes.
//! - **Control Frames**: `Close`, `Ping` and `Pong`, managing the connection.
//!
//! A [`Frame`] always holds its payload in plaintext. The `mask` field only records the key
//! the frame was (or will be) masked with on the wire; the [`codec`](crate::codec) applies it.
//!
//! ```rust
//! use yawn::frame::Frame;
//! use yawn::close::CloseCode;
//!
//! let text_frame = Frame::text("Hello, WebSocket!");
//! let ping = Frame::ping("Ping payload");
//! let close = Frame::close(CloseCode::Normal, "Normal closure");
//! ```
use bytes::Bytes;

use crate::close::{CloseCode, CloseFrame};
use crate::Result;

/// Frame opcode ([RFC 6455 Section 11.8](https://datatracker.ietf.org/doc/html/rfc6455#section-11.8)).
///
/// Reserved values (0x3-0x7, 0xB-0xF) have no variant; decoding them yields
/// [`WebSocketError::UnknownOpCode`](crate::WebSocketError::UnknownOpCode).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    /// Close, Ping and Pong. These are never fragmented and carry at most 125 bytes.
    pub fn is_control(&self) -> bool {
        (u8::from(*self) & 0x8) != 0
    }
}

impl TryFrom<u8> for OpCode {
    /// The rejected byte.
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0x0 => Ok(Self::Continuation),
            0x1 => Ok(Self::Text),
            0x2 => Ok(Self::Binary),
            0x8 => Ok(Self::Close),
            0x9 => Ok(Self::Ping),
            0xA => Ok(Self::Pong),
            _ => Err(value),
        }
    }
}

impl From<OpCode> for u8 {
    fn from(opcode: OpCode) -> Self {
        match opcode {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }
}

/// Maximum payload size of a control frame.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// Largest possible frame header: 2 bytes, 8 bytes of extended length and a 4 byte mask.
pub(crate) const MAX_HEAD_SIZE: usize = 14;

/// A single WebSocket frame with its payload in plaintext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Set on the last fragment of a message.
    pub fin: bool,
    pub opcode: OpCode,
    /// Key the payload is XORed with on the wire.
    pub(crate) mask: Option<[u8; 4]>,
    pub payload: Bytes,
}

impl Frame {
    /// Builds a frame from its parts. Most callers want one of the typed constructors below.
    pub fn new(fin: bool, opcode: OpCode, mask: Option<[u8; 4]>, payload: impl Into<Bytes>) -> Self {
        Self {
            fin,
            opcode,
            mask,
            payload: payload.into(),
        }
    }

    pub fn text(payload: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Text, None, payload)
    }

    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Binary, None, payload)
    }

    /// Ping. The peer answers with a pong carrying the same payload.
    pub fn ping(payload: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Ping, None, payload)
    }

    pub fn pong(payload: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Pong, None, payload)
    }

    /// Close frame carrying `code` followed by the UTF-8 `reason`.
    pub fn close(code: CloseCode, reason: impl Into<String>) -> Self {
        Self::close_raw(CloseFrame::new(code, reason).to_payload())
    }

    /// Close frame with an arbitrary payload. Nothing is validated.
    pub fn close_raw(payload: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Close, None, payload)
    }

    /// Sets the masking key used when the frame is encoded.
    pub fn with_mask(mut self, mask: [u8; 4]) -> Self {
        self.mask = Some(mask);
        self
    }

    #[inline(always)]
    pub fn mask(&self) -> Option<[u8; 4]> {
        self.mask
    }

    #[inline(always)]
    pub fn is_masked(&self) -> bool {
        self.mask.is_some()
    }

    /// Parses the payload of a Close frame.
    ///
    /// See [`CloseFrame::parse`].
    pub fn close_frame(&self) -> Result<Option<CloseFrame>> {
        CloseFrame::parse(&self.payload)
    }

    /// Writes the header into `head` and returns how many bytes it took.
    ///
    /// `head` must hold at least [`MAX_HEAD_SIZE`] bytes.
    pub(crate) fn fmt_head(&self, head: &mut [u8]) -> usize {
        let fin = if self.fin { 0x80 } else { 0 };
        head[0] = fin | u8::from(self.opcode);

        let len = self.payload.len();
        let mut size = match len {
            0..=125 => {
                head[1] = len as u8;
                2
            }
            126..=0xFFFF => {
                head[1] = 126;
                head[2..4].copy_from_slice(&(len as u16).to_be_bytes());
                4
            }
            _ => {
                head[1] = 127;
                head[2..10].copy_from_slice(&(len as u64).to_be_bytes());
                10
            }
        };

        if let Some(mask) = self.mask {
            head[1] |= 0x80;
            head[size..size + 4].copy_from_slice(&mask);
            size += 4;
        }
        size
    }
}
