//! Dispatch of decoded envelopes.
//!
//! The [`MessageRouter`] receives the payload of every inbound data frame, decodes the
//! envelopes it holds in the configured [`PayloadFormat`] and tells the connection what to do
//! with each of them. An envelope may span several frames; the undecoded tail is kept until
//! the next payload arrives.
use bytes::{Buf, BytesMut};

use crate::{
    envelope::{Decoded, Envelope, EnvelopeKind, Payload, PayloadFormat},
    WebSocketError,
};

/// What the connection must do with one decoded envelope.
#[derive(Debug)]
pub enum Route {
    /// Send this envelope back to the server.
    Reply(Envelope),
    /// Deliver an application message.
    Message(Payload),
    /// Deliver a notification.
    Notification(Payload),
    /// Report a decoding failure. The pending bytes were discarded.
    Error(WebSocketError),
}

/// Decodes envelopes from data frame payloads and routes them by kind.
#[derive(Debug)]
pub struct MessageRouter {
    format: PayloadFormat,
    buf: BytesMut,
    max_buffer: usize,
}

impl MessageRouter {
    /// Creates a router that buffers at most `max_buffer` bytes of incomplete envelopes.
    pub fn new(format: PayloadFormat, max_buffer: usize) -> Self {
        Self {
            format,
            buf: BytesMut::new(),
            max_buffer,
        }
    }

    pub fn format(&self) -> PayloadFormat {
        self.format
    }

    /// Number of bytes waiting for an envelope to complete.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Appends a frame payload and routes every envelope that is now complete.
    ///
    /// A notification asking for a response yields its [`Route::Reply`] acknowledgment before
    /// the [`Route::Notification`] itself. Acknowledgments from the server and envelopes of
    /// unknown kinds produce no route.
    pub fn route(&mut self, payload: &[u8]) -> Vec<Route> {
        let mut routes = Vec::new();

        if self.buf.len() + payload.len() > self.max_buffer {
            self.buf.clear();
            routes.push(Route::Error(WebSocketError::PayloadTooLarge));
            return routes;
        }
        self.buf.extend_from_slice(payload);

        loop {
            match self.format.decode(&self.buf) {
                Ok(Some((decoded, consumed))) => {
                    self.buf.advance(consumed);
                    match decoded {
                        Decoded::Envelope(envelope) => Self::dispatch(envelope, &mut routes),
                        Decoded::Unknown(_kind) => {
                            #[cfg(feature = "logging")]
                            log::debug!("<Router>: discarding envelope of unknown type {_kind}");
                        }
                    }
                }
                Ok(None) => {
                    if self.buf.iter().all(u8::is_ascii_whitespace) {
                        self.buf.clear();
                    }
                    break;
                }
                Err(err) => {
                    #[cfg(feature = "logging")]
                    log::debug!("<Router>: discarding {} undecodable bytes", self.buf.len());

                    self.buf.clear();
                    routes.push(Route::Error(err));
                    break;
                }
            }
        }

        routes
    }

    fn dispatch(envelope: Envelope, routes: &mut Vec<Route>) {
        match envelope.kind {
            EnvelopeKind::Message => routes.push(Route::Message(envelope.payload)),
            EnvelopeKind::Notification => {
                if envelope.response_required {
                    routes.push(Route::Reply(Envelope::ack(envelope.payload.clone())));
                }
                routes.push(Route::Notification(envelope.payload));
            }
            EnvelopeKind::Ack => {
                #[cfg(feature = "logging")]
                log::debug!("<Router>: ack received {:?}", envelope.payload);
            }
        }
    }
}
