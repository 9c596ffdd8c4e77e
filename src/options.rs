use std::time::Duration;

use bytes::Bytes;
use url::Url;

use crate::{PayloadFormat, Result, WebSocketError};

/// The maximum allowed payload size for reading, set to 1 MiB.
///
/// Frames with a payload size larger than this limit will be rejected to ensure memory safety
/// and prevent excessively large messages from impacting performance.
pub const MAX_PAYLOAD_READ: usize = 1024 * 1024;

/// The maximum allowed read buffer size, set to 2 MiB.
///
/// Applies to bytes waiting for a frame to complete and to bytes waiting for an envelope to
/// complete.
pub const MAX_READ_BUFFER: usize = 2 * 1024 * 1024;

/// Interval between two heartbeat pings.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Time allowed for the server to answer the upgrade request.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum size of the upgrade response head.
pub const MAX_HANDSHAKE_SIZE: usize = 16 * 1024;

/// Configuration options for a WebSocket client.
///
/// # Examples
/// ```
/// use std::time::Duration;
/// use yawn::{Options, PayloadFormat};
///
/// let options = Options::new("127.0.0.1", 9000)
///     .with_path("/events")
///     .with_protocol("notify.v1")
///     .with_format(PayloadFormat::Binary)
///     .with_heartbeat_interval(Duration::from_secs(10));
/// ```
#[derive(Clone, Debug)]
pub struct Options {
    /// Host to connect to, also sent in the `Host` header.
    pub host: String,
    /// TCP port, omitted from the `Host` header when it is 80.
    pub port: u16,
    /// Request target of the upgrade request.
    pub path: String,
    /// Subprotocols offered in `Sec-WebSocket-Protocol`.
    pub protocols: Vec<String>,
    /// Format of the envelopes carried in data frames.
    pub format: PayloadFormat,
    /// Interval between heartbeat pings, `None` disables the heartbeat.
    pub heartbeat_interval: Option<Duration>,
    /// Payload carried by heartbeat pings.
    pub heartbeat_payload: Bytes,
    /// Pings that may go unanswered before the connection is considered dead.
    ///
    /// `None` (the default) never closes the connection because of missing pongs.
    pub max_missed_pongs: Option<u32>,
    /// Maximum payload size for incoming frames.
    pub max_payload_read: Option<usize>,
    /// Maximum size for buffered partial frames and partial envelopes.
    pub max_read_buffer: Option<usize>,
    /// Whether outgoing frames are masked, as RFC 6455 requires from clients.
    pub mask_frames: bool,
    /// Time allowed to complete the handshake, `None` waits forever.
    pub handshake_timeout: Option<Duration>,
}

impl Options {
    /// Creates options for `host:port` with the default settings.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            path: "/".to_string(),
            protocols: Vec::new(),
            format: PayloadFormat::default(),
            heartbeat_interval: Some(DEFAULT_HEARTBEAT_INTERVAL),
            heartbeat_payload: Bytes::new(),
            max_missed_pongs: None,
            max_payload_read: None,
            max_read_buffer: None,
            mask_frames: true,
            handshake_timeout: Some(DEFAULT_HANDSHAKE_TIMEOUT),
        }
    }

    /// Creates options from a `ws://host[:port][/path][?query]` url.
    ///
    /// # Errors
    /// - `WebSocketError::InvalidHttpScheme` for any scheme but `ws`. Secure connections are
    ///   established by the caller and handed to [`Client::handshake`](crate::Client::handshake).
    /// - `WebSocketError::InvalidUrl` if the url has no host.
    pub fn from_url(url: &str) -> Result<Self> {
        let url = Url::parse(url)?;
        if url.scheme() != "ws" {
            return Err(WebSocketError::InvalidHttpScheme);
        }

        let host = url
            .host_str()
            .ok_or(WebSocketError::InvalidUrl("missing host"))?;
        let port = url.port_or_known_default().unwrap_or(80);
        let path = &url[url::Position::BeforePath..url::Position::AfterQuery];

        Ok(Self::new(host, port).with_path(if path.is_empty() { "/" } else { path }))
    }

    /// Sets the request target of the upgrade request.
    pub fn with_path(self, path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..self
        }
    }

    /// Offers a subprotocol. The server may echo one of them back.
    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocols.push(protocol.into());
        self
    }

    /// Sets the envelope format.
    pub fn with_format(self, format: PayloadFormat) -> Self {
        Self { format, ..self }
    }

    /// Sets the interval between heartbeat pings.
    pub fn with_heartbeat_interval(self, interval: Duration) -> Self {
        Self {
            heartbeat_interval: Some(interval),
            ..self
        }
    }

    /// Disables heartbeat pings.
    pub fn without_heartbeat(self) -> Self {
        Self {
            heartbeat_interval: None,
            ..self
        }
    }

    /// Sets the payload sent in heartbeat pings.
    ///
    /// It must fit in a control frame (125 bytes); [`Client::handshake`](crate::Client::handshake)
    /// rejects larger payloads with `ControlFrameTooLarge`.
    pub fn with_heartbeat_payload(self, payload: impl Into<Bytes>) -> Self {
        Self {
            heartbeat_payload: payload.into(),
            ..self
        }
    }

    /// Closes the connection when more than `max` heartbeat pings are left unanswered.
    pub fn with_max_missed_pongs(self, max: u32) -> Self {
        Self {
            max_missed_pongs: Some(max),
            ..self
        }
    }

    /// Sets the maximum payload size for incoming frames.
    ///
    /// Unless set explicitly, the read buffer limit becomes twice this size.
    pub fn with_max_payload_read(self, size: usize) -> Self {
        Self {
            max_payload_read: Some(size),
            ..self
        }
    }

    /// Sets the maximum size of buffered partial frames and envelopes.
    pub fn with_max_read_buffer(self, size: usize) -> Self {
        Self {
            max_read_buffer: Some(size),
            ..self
        }
    }

    /// Sends frames unmasked.
    ///
    /// Servers are required to reject unmasked client frames; only use this against peers
    /// that expect it.
    pub fn without_masking(self) -> Self {
        Self {
            mask_frames: false,
            ..self
        }
    }

    /// Sets the time allowed to complete the handshake.
    pub fn with_handshake_timeout(self, timeout: Duration) -> Self {
        Self {
            handshake_timeout: Some(timeout),
            ..self
        }
    }

    /// Value of the `Host` header.
    pub(crate) fn host_header(&self) -> String {
        if self.port == 80 {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub(crate) fn payload_limit(&self) -> usize {
        self.max_payload_read.unwrap_or(MAX_PAYLOAD_READ)
    }

    // max read buffer should be at least 2 times the payload read if not specified
    pub(crate) fn buffer_limit(&self) -> usize {
        self.max_read_buffer.unwrap_or(
            self.max_payload_read
                .map(|payload_read| payload_read * 2)
                .unwrap_or(MAX_READ_BUFFER),
        )
    }
}

impl Default for Options {
    /// Options for `localhost:80`.
    fn default() -> Self {
        Self::new("localhost", 80)
    }
}
