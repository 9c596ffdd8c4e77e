//! # yawn
//! Client-side implementation of the WebSocket protocol (RFC 6455) running over any async byte stream,
//! with a small application convention on top: every data frame carries an envelope that is either a
//! message, a notification or an acknowledgment.
//!
//! The crate is organized as a set of small protocol pieces that the connection engine drives:
//!
//! - [`frame`] and [`codec`]: the binary frame layout, encoding and decoding with masking.
//! - [`reassembler`]: incremental reassembly of frames from arbitrary transport chunks.
//! - [`handshake`]: the HTTP/1.1 upgrade request and response validation.
//! - [`heartbeat`]: periodic pings while the connection is open.
//! - [`envelope`] and [`router`]: envelope formats and dispatch of decoded envelopes.
//! - [`Client`]: the public handle to a connection running on its own task.
//!
//! # Features
//! - `logging`: Enables debug logging for the handshake, state transitions and frame dispatch
//!   using the `log` crate.
//!
//! # Client Example
//! ```no_run
//! use yawn::{Client, Event, Options};
//!
//! async fn client_connect() -> yawn::Result<()> {
//!     let options = Options::from_url("ws://127.0.0.1:9000/events")?;
//!     let mut client = Client::connect(options).await?;
//!
//!     client.send_message(serde_json::json!({ "hello": "world" })).await?;
//!
//!     while let Some(event) = client.next_event().await {
//!         match event {
//!             Event::Message(payload) => println!("message: {payload:?}"),
//!             Event::Notification(payload) => println!("notification: {payload:?}"),
//!             Event::Close(_) => break,
//!             _ => {}
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! # Memory Safety
//! - Maximum frame payload size (configurable, default 1 MiB)
//! - Maximum buffered bytes for partial frames and partial envelopes (default 2 MiB)
//! - Bounded handshake response size
//!
//! # Error Handling
//! Errors that happen on the connection task are delivered as [`Event::Error`]. Whether the
//! connection survives depends on [`WebSocketError::is_fatal`]. There is no automatic reconnection.

#![cfg_attr(docsrs, feature(doc_cfg))]

mod client;
mod connection;
mod mask;
mod options;

pub mod close;
pub mod codec;
pub mod envelope;
pub mod frame;
pub mod handshake;
pub mod heartbeat;
pub mod reassembler;
pub mod router;

use thiserror::Error;

pub use client::{Client, Event};
pub use close::{CloseCode, CloseFrame};
pub use connection::ConnectionState;
pub use envelope::{Envelope, EnvelopeKind, Payload, PayloadFormat};
pub use frame::{Frame, OpCode};
pub use options::{
    Options, DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_HEARTBEAT_INTERVAL, MAX_HANDSHAKE_SIZE,
    MAX_PAYLOAD_READ, MAX_READ_BUFFER,
};

/// A result type for WebSocket operations, using `WebSocketError` as the error type.
pub type Result<T> = std::result::Result<T, WebSocketError>;

/// Represents errors that can occur during WebSocket operations.
///
/// The errors are broadly categorized into:
///
/// - Transport errors (I/O failures, connection closed)
/// - Handshake errors (bad status line, header or accept value)
/// - Frame errors (malformed length, reserved bits, oversized frames)
/// - Payload errors (envelopes that cannot be decoded)
///
/// Use [`WebSocketError::is_fatal`] to know if the connection is torn down after the error.
#[derive(Error, Debug)]
pub enum WebSocketError {
    /// Returned when the HTTP status line of the upgrade response is not `101`.
    #[error("Invalid status code: {0}")]
    InvalidStatusCode(u16),

    /// The first line of the upgrade response is not a valid HTTP/1.x status line.
    #[error("Invalid status line: {0:?}")]
    InvalidStatusLine(String),

    /// A header line of the upgrade response is not of the form `Key: Value`.
    #[error("Invalid header line: {0:?}")]
    InvalidHeaderLine(String),

    /// Indicates that the HTTP "Upgrade" header is either missing or does not contain
    /// the required "websocket" value during connection handshake.
    #[error("Invalid upgrade header")]
    InvalidUpgradeHeader,

    /// Indicates that the HTTP "Connection" header is either missing or does not contain
    /// the required "upgrade" value during connection handshake.
    #[error("Invalid connection header")]
    InvalidConnectionHeader,

    /// The upgrade response has no "Sec-WebSocket-Accept" header.
    #[error("Sec-WebSocket-Accept header is missing")]
    MissingSecWebSocketAccept,

    /// The "Sec-WebSocket-Accept" header does not match the value computed from our key.
    #[error("Invalid Sec-WebSocket-Accept: expected {expected}, got {actual}")]
    InvalidSecWebSocketAccept { expected: String, actual: String },

    /// The upgrade response header block exceeds [`MAX_HANDSHAKE_SIZE`].
    #[error("Handshake response too large")]
    HandshakeTooLarge,

    /// The server did not complete the upgrade within the configured timeout.
    #[error("Handshake timed out")]
    HandshakeTimeout,

    /// Returned when attempting to perform operations on a closed WebSocket connection.
    /// Once a connection is closed, no further communication is possible.
    #[error("Connection is closed")]
    ConnectionClosed,

    /// Indicates that a received close frame has an invalid format, such as
    /// containing a payload of 1 byte (close frames must be either empty or ≥2 bytes).
    #[error("Invalid close frame")]
    InvalidCloseFrame,

    /// Indicates that reserved bits in the WebSocket frame header are set when they
    /// should be 0. No extension is ever negotiated.
    #[error("Reserved bits are not zero")]
    ReservedBitsNotZero,

    /// Occurs when a control frame (ping, pong, or close) is received with the FIN bit
    /// not set. RFC 6455 requires that control frames must not be fragmented.
    #[error("Control frame must not be fragmented")]
    ControlFrameFragmented,

    /// A control frame carries more than 125 bytes of payload.
    #[error("Control frame too large")]
    ControlFrameTooLarge,

    /// Occurs when a frame's payload length exceeds the maximum configured size.
    /// This helps prevent memory exhaustion attacks.
    #[error("Frame too large")]
    FrameTooLarge,

    /// The reassembly buffer grew past its configured maximum.
    #[error("Read buffer full")]
    ReadBufferFull,

    /// A frame with a reserved opcode (0x3-0x7, 0xB-0xF) was received.
    ///
    /// `consumed` is the size of the whole frame on the wire, so the stream can
    /// skip it and keep decoding.
    #[error("Unknown opcode (byte={opcode})")]
    UnknownOpCode { opcode: u8, consumed: usize },

    /// An envelope could not be decoded with the configured payload format.
    #[error("Invalid payload: {0}")]
    PayloadDecode(String),

    /// The envelope buffer grew past its configured maximum without producing an envelope.
    #[error("Payload too large")]
    PayloadTooLarge,

    /// The payload variant cannot be carried by the configured format.
    #[error("Payload is not compatible with the {0} format")]
    IncompatiblePayload(PayloadFormat),

    /// More pings went unanswered than the configured maximum.
    #[error("Heartbeat timed out after {0} unanswered pings")]
    HeartbeatTimeout(u32),

    /// Returned when the connection URL is missing a host.
    #[error("Invalid url: {0}")]
    InvalidUrl(&'static str),

    /// Returned when attempting to establish a WebSocket connection with an invalid URL scheme.
    /// Only "ws://" is handled by [`Client::connect`].
    #[error("Invalid http scheme")]
    InvalidHttpScheme,

    /// Wraps errors from URL parsing that may occur when processing WebSocket URLs.
    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),

    /// Wraps standard I/O errors that may occur during WebSocket communication,
    /// such as connection resets or network timeouts.
    #[error(transparent)]
    IoError(#[from] std::io::Error),

    /// Occurs when serialization of a JSON envelope fails.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl WebSocketError {
    /// Returns `true` if the connection cannot continue after this error.
    ///
    /// Unknown opcodes and undecodable payloads are reported but the framing stays in sync,
    /// so the connection keeps running.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::UnknownOpCode { .. }
                | Self::PayloadDecode(_)
                | Self::PayloadTooLarge
                | Self::IncompatiblePayload(_)
                | Self::Json(_)
        )
    }

    /// The close code sent to the peer when this error tears the connection down.
    pub fn close_code(&self) -> CloseCode {
        match self {
            Self::FrameTooLarge | Self::ReadBufferFull => CloseCode::Size,
            Self::UnknownOpCode { .. } => CloseCode::Unsupported,
            Self::ReservedBitsNotZero
            | Self::ControlFrameFragmented
            | Self::ControlFrameTooLarge
            | Self::InvalidCloseFrame => CloseCode::Protocol,
            Self::HeartbeatTimeout(_) => CloseCode::Away,
            _ => CloseCode::Error,
        }
    }
}
