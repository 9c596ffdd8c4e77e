//! Incremental frame reassembly.
//!
//! A transport delivers bytes in chunks that have nothing to do with frame boundaries. The
//! [`StreamReassembler`] buffers them and hands out frames as soon as they are complete:
//! one chunk may hold several frames, and a frame may be spread over many chunks.
//!
//! ```rust
//! use yawn::{codec, reassembler::StreamReassembler, OpCode, MAX_PAYLOAD_READ, MAX_READ_BUFFER};
//!
//! let wire = codec::encode(b"hello", OpCode::Text);
//! let mut reassembler = StreamReassembler::new(MAX_PAYLOAD_READ, MAX_READ_BUFFER);
//!
//! assert!(reassembler.feed(&wire[..3]).unwrap().is_empty());
//! let frames = reassembler.feed(&wire[3..]).unwrap();
//! assert_eq!(&frames[0].payload[..], b"hello");
//! ```
use bytes::BytesMut;
use tokio_util::codec::Decoder as _;

use crate::{codec::Decoder, Frame, Result, WebSocketError};

/// Buffers inbound bytes and extracts complete frames.
///
/// The buffer is append-only at the tail and consumed from the head; consumed storage is
/// reclaimed by `BytesMut` when the buffer grows again.
#[derive(Debug)]
pub struct StreamReassembler {
    decoder: Decoder,
    buf: BytesMut,
    max_buffer: usize,
}

impl StreamReassembler {
    /// Creates a reassembler.
    ///
    /// # Parameters
    /// - `max_payload_size`: Largest accepted frame payload.
    /// - `max_buffer`: Largest amount of bytes buffered while waiting for a frame to complete.
    pub fn new(max_payload_size: usize, max_buffer: usize) -> Self {
        Self {
            decoder: Decoder::new(max_payload_size),
            buf: BytesMut::new(),
            max_buffer,
        }
    }

    /// Number of buffered bytes that do not form a complete frame yet.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Appends a chunk received from the transport.
    ///
    /// # Errors
    /// Returns `WebSocketError::ReadBufferFull` if the buffer would exceed its maximum size.
    /// The chunk is not buffered in that case.
    pub fn extend(&mut self, chunk: &[u8]) -> Result<()> {
        if self.buf.len() + chunk.len() > self.max_buffer {
            return Err(WebSocketError::ReadBufferFull);
        }

        self.buf.extend_from_slice(chunk);
        Ok(())
    }

    /// Tries to extract the next frame from the buffered bytes.
    ///
    /// # Returns
    /// - `Ok(Some(Frame))` and the frame bytes are removed from the buffer.
    /// - `Ok(None)` when the buffered bytes do not hold a complete frame. They are kept.
    /// - `Err(WebSocketError::UnknownOpCode { .. })` after dropping the offending frame. Decoding
    ///   can go on.
    /// - Any other error clears the buffer, since the frame boundaries are lost.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        match self.decoder.decode(&mut self.buf) {
            Ok(frame) => Ok(frame),
            Err(err @ WebSocketError::UnknownOpCode { .. }) => Err(err),
            Err(err) => {
                self.buf.clear();
                Err(err)
            }
        }
    }

    /// Appends `chunk` and extracts every frame that is now complete.
    ///
    /// Frames decoded before an error are lost with it; use [`extend`](Self::extend) and
    /// [`next_frame`](Self::next_frame) to handle them one by one.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<Frame>> {
        self.extend(chunk)?;

        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame()? {
            frames.push(frame);
        }

        Ok(frames)
    }
}
