//! WebSocket opening handshake (RFC 6455 Section 4), client side.
//!
//! ```http
//! GET /chat HTTP/1.1
//! Host: server.example.com
//! Upgrade: websocket
//! Connection: Upgrade
//! Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==
//! Sec-WebSocket-Version: 13
//! ```
//!
//! ```http
//! HTTP/1.1 101 Switching Protocols
//! Upgrade: websocket
//! Connection: Upgrade
//! Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=
//! ```
//!
//! Until the handshake completes the stream is plain text. [`Handshake::feed`] buffers the
//! response until the whole header block is present, the same way frames are reassembled.
use std::collections::HashMap;

use base64::prelude::*;
use bytes::{Bytes, BytesMut};
use sha1::{Digest, Sha1};

use crate::{Options, Result, WebSocketError, MAX_HANDSHAKE_SIZE};

/// Magic string appended to the key before hashing.
const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Computes the `Sec-WebSocket-Accept` value the server must answer for `key`.
///
/// ```rust
/// let accept = yawn::handshake::accept_key("dGhlIHNhbXBsZSBub25jZQ==");
/// assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
/// ```
pub fn accept_key(key: &str) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(key.as_bytes());
    sha1.update(WS_GUID.as_bytes());
    BASE64_STANDARD.encode(&sha1.finalize()[..])
}

/// Generates a random `Sec-WebSocket-Key`.
fn generate_key() -> String {
    let input: [u8; 16] = rand::random();
    BASE64_STANDARD.encode(input)
}

/// Progress of the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    NotStarted,
    Sent,
    Succeeded,
    Failed,
}

/// The outcome of a successful handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upgraded {
    /// The subprotocol echoed by the server, if any.
    pub protocol: Option<String>,
    /// Bytes received after the header block. They belong to the first frames.
    pub trailing: Bytes,
}

/// Parsed upgrade response head.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    /// Header values keyed by lowercase name.
    headers: HashMap<String, String>,
}

impl HttpResponse {
    /// Parses a response head, without the terminating empty line.
    ///
    /// Repeated headers are joined with `", "`.
    pub fn parse(head: &str) -> Result<Self> {
        let mut lines = head.split("\r\n");

        let status_line = lines.next().unwrap_or_default();
        let mut parts = status_line.splitn(3, ' ');
        let version = parts.next().unwrap_or_default();
        if !version.starts_with("HTTP/1.") {
            return Err(WebSocketError::InvalidStatusLine(status_line.to_string()));
        }
        let status = parts
            .next()
            .and_then(|code| code.parse::<u16>().ok())
            .ok_or_else(|| WebSocketError::InvalidStatusLine(status_line.to_string()))?;

        let mut headers: HashMap<String, String> = HashMap::new();
        for line in lines.filter(|line| !line.is_empty()) {
            let (name, value) = line
                .split_once(':')
                .filter(|(name, _)| !name.trim().is_empty())
                .ok_or_else(|| WebSocketError::InvalidHeaderLine(line.to_string()))?;

            let name = name.trim().to_ascii_lowercase();
            let value = value.trim();
            headers
                .entry(name)
                .and_modify(|existing| {
                    existing.push_str(", ");
                    existing.push_str(value);
                })
                .or_insert_with(|| value.to_string());
        }

        Ok(Self { status, headers })
    }

    /// Gets a header value by name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// Client side of the opening handshake.
///
/// The handshake moves from `NotStarted` to `Sent` when the request is produced, then to
/// `Succeeded` or `Failed` once the response head is complete.
#[derive(Debug)]
pub struct Handshake {
    state: HandshakeState,
    host: String,
    path: String,
    protocols: Vec<String>,
    key: String,
    expected_accept: String,
    buf: BytesMut,
}

impl Handshake {
    /// Creates a handshake with a fresh random key.
    pub fn new(options: &Options) -> Self {
        Self::with_key(options, generate_key())
    }

    /// Creates a handshake with a fixed key.
    pub fn with_key(options: &Options, key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            state: HandshakeState::NotStarted,
            host: options.host_header(),
            path: options.path.clone(),
            protocols: options.protocols.clone(),
            expected_accept: accept_key(&key),
            key,
            buf: BytesMut::new(),
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// The `Sec-WebSocket-Key` sent in the request.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The `Sec-WebSocket-Accept` value the server must answer.
    pub fn expected_accept(&self) -> &str {
        &self.expected_accept
    }

    /// Builds the upgrade request and moves to `Sent`.
    pub fn request(&mut self) -> Bytes {
        let mut request = format!(
            "GET {} HTTP/1.1\r\n\
             Host: {}\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Key: {}\r\n\
             Sec-WebSocket-Version: 13\r\n",
            self.path, self.host, self.key
        );

        if !self.protocols.is_empty() {
            request.push_str("Sec-WebSocket-Protocol: ");
            request.push_str(&self.protocols.join(", "));
            request.push_str("\r\n");
        }

        request.push_str("\r\n");

        self.state = HandshakeState::Sent;
        Bytes::from(request)
    }

    /// Feeds response bytes received from the transport.
    ///
    /// # Returns
    /// - `Ok(None)` while the header block is incomplete.
    /// - `Ok(Some(Upgraded))` once the response is validated.
    /// - `Err(_)` if the response is invalid. The handshake is then `Failed`.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Option<Upgraded>> {
        debug_assert_eq!(self.state, HandshakeState::Sent, "feed before request");

        // start searching a few bytes back, the terminator can straddle two chunks
        let search_from = self.buf.len().saturating_sub(3);
        self.buf.extend_from_slice(chunk);

        let Some(pos) = self.buf[search_from..]
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .map(|pos| search_from + pos)
        else {
            if self.buf.len() > MAX_HANDSHAKE_SIZE {
                return self.fail(WebSocketError::HandshakeTooLarge);
            }
            return Ok(None);
        };
        if pos + 4 > MAX_HANDSHAKE_SIZE {
            return self.fail(WebSocketError::HandshakeTooLarge);
        }

        let head = self.buf.split_to(pos + 4);
        let trailing = std::mem::take(&mut self.buf).freeze();

        match self.verify(&head[..pos]) {
            Ok(protocol) => {
                self.state = HandshakeState::Succeeded;

                #[cfg(feature = "logging")]
                log::debug!(
                    "handshake with {} succeeded (protocol={:?}, trailing={} bytes)",
                    self.host,
                    protocol,
                    trailing.len()
                );

                Ok(Some(Upgraded { protocol, trailing }))
            }
            Err(err) => self.fail(err),
        }
    }

    fn fail(&mut self, err: WebSocketError) -> Result<Option<Upgraded>> {
        #[cfg(feature = "logging")]
        log::debug!("handshake with {} failed: {}", self.host, err);

        self.state = HandshakeState::Failed;
        self.buf.clear();
        Err(err)
    }

    /// Validates the response head and returns the echoed subprotocol.
    fn verify(&self, head: &[u8]) -> Result<Option<String>> {
        let head = std::str::from_utf8(head)
            .map_err(|_| WebSocketError::InvalidStatusLine("<non utf-8 response>".into()))?;
        let response = HttpResponse::parse(head)?;

        if response.status != 101 {
            return Err(WebSocketError::InvalidStatusCode(response.status));
        }

        if !response
            .header("upgrade")
            .map(|h| h.eq_ignore_ascii_case("websocket"))
            .unwrap_or(false)
        {
            return Err(WebSocketError::InvalidUpgradeHeader);
        }

        if !response
            .header("connection")
            .map(|h| {
                h.split(',')
                    .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
            })
            .unwrap_or(false)
        {
            return Err(WebSocketError::InvalidConnectionHeader);
        }

        let accept = response
            .header("sec-websocket-accept")
            .ok_or(WebSocketError::MissingSecWebSocketAccept)?;
        if accept != self.expected_accept {
            return Err(WebSocketError::InvalidSecWebSocketAccept {
                expected: self.expected_accept.clone(),
                actual: accept.to_string(),
            });
        }

        Ok(response
            .header("sec-websocket-protocol")
            .map(str::to_string))
    }
}
