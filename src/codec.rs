//! Frame encoding and decoding.
//!
//! The free functions [`encode`], [`encode_masked`] and [`decode`] are pure: they never keep
//! state between calls. [`Decoder`] and [`Encoder`] wrap them for use with `tokio_util`
//! framed streams and the [`StreamReassembler`](crate::reassembler::StreamReassembler).
//!
//! Decoding has three outcomes:
//!
//! - `Ok(Some(Decoded))`: a complete frame and the number of input bytes it used.
//! - `Ok(None)`: incomplete, more bytes are needed. This is never an error.
//! - `Err(_)`: the bytes are malformed.
use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec;

use crate::{
    frame::{Frame, OpCode, MAX_CONTROL_PAYLOAD, MAX_HEAD_SIZE},
    mask::{apply_mask, random_mask},
    Result, WebSocketError,
};

/// A frame decoded from the front of a buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    /// The decoded frame, with its payload unmasked.
    pub frame: Frame,
    /// How many bytes of input the frame occupied.
    pub consumed: usize,
}

/// Header fields parsed before the payload.
struct Head {
    fin: bool,
    opcode: u8,
    mask: Option<[u8; 4]>,
    /// Size of the header in bytes, mask included.
    header_size: usize,
    payload_len: usize,
}

impl Head {
    fn frame_size(&self) -> usize {
        self.header_size + self.payload_len
    }
}

/// Parses a frame header from the front of `src`.
///
/// Returns `Ok(None)` while the header, including the extended length and the mask key,
/// is not fully buffered.
fn parse_head(src: &[u8], max_payload_size: usize) -> Result<Option<Head>> {
    if src.len() < 2 {
        return Ok(None);
    }

    let fin = src[0] & 0b1000_0000 != 0;
    if src[0] & 0b0111_0000 != 0 {
        return Err(WebSocketError::ReservedBitsNotZero);
    }

    let opcode = src[0] & 0b0000_1111;
    let masked = src[1] & 0b1000_0000 != 0;
    let length_code = src[1] & 0x7F;

    let extra = match length_code {
        126 => 2,
        127 => 8,
        _ => 0,
    };
    let header_size = 2 + extra + masked as usize * 4;
    if src.len() < header_size {
        return Ok(None);
    }

    let payload_len = match extra {
        0 => u64::from(length_code),
        2 => u64::from(u16::from_be_bytes([src[2], src[3]])),
        _ => {
            let mut len = [0u8; 8];
            len.copy_from_slice(&src[2..10]);
            u64::from_be_bytes(len)
        }
    };

    // control frames are validated as soon as the header is known
    let is_control = OpCode::try_from(opcode).is_ok_and(|opcode| opcode.is_control());
    if is_control && !fin {
        return Err(WebSocketError::ControlFrameFragmented);
    }
    if is_control && payload_len > MAX_CONTROL_PAYLOAD as u64 {
        return Err(WebSocketError::ControlFrameTooLarge);
    }

    // covers 64 bit lengths with the most significant bit set
    if payload_len > max_payload_size as u64 {
        return Err(WebSocketError::FrameTooLarge);
    }
    let payload_len = usize::try_from(payload_len).map_err(|_| WebSocketError::FrameTooLarge)?;

    let mask = masked.then(|| {
        let at = header_size - 4;
        [src[at], src[at + 1], src[at + 2], src[at + 3]]
    });

    Ok(Some(Head {
        fin,
        opcode,
        mask,
        header_size,
        payload_len,
    }))
}

/// Builds the frame out of a parsed header and its plaintext payload.
fn finish(head: &Head, payload: Bytes) -> Result<Frame> {
    let opcode = OpCode::try_from(head.opcode).map_err(|opcode| WebSocketError::UnknownOpCode {
        opcode,
        consumed: head.frame_size(),
    })?;

    Ok(Frame::new(head.fin, opcode, head.mask, payload))
}

/// Decodes one frame from the front of `src`.
///
/// # Parameters
/// - `src`: Buffered bytes, starting at a frame boundary.
/// - `max_payload_size`: Largest accepted payload, checked before the payload is buffered.
///
/// # Returns
/// - `Ok(Some(Decoded))` with the frame and the number of bytes to drop from `src`.
/// - `Ok(None)` if `src` does not hold a whole frame yet.
/// - `Err(WebSocketError::UnknownOpCode { consumed, .. })` for a complete frame with a reserved
///   opcode. Dropping `consumed` bytes resynchronizes the stream.
/// - Any other `Err` if the header is malformed. The stream cannot be resynchronized.
pub fn decode(src: &[u8], max_payload_size: usize) -> Result<Option<Decoded>> {
    let Some(head) = parse_head(src, max_payload_size)? else {
        return Ok(None);
    };

    let consumed = head.frame_size();
    if src.len() < consumed {
        return Ok(None);
    }

    let mut payload = BytesMut::from(&src[head.header_size..consumed]);
    if let Some(mask) = head.mask {
        apply_mask(&mut payload, mask);
    }

    let frame = finish(&head, payload.freeze())?;
    Ok(Some(Decoded { frame, consumed }))
}

/// Encodes `payload` as a final, unmasked frame.
pub fn encode(payload: &[u8], opcode: OpCode) -> BytesMut {
    let mut dst = BytesMut::with_capacity(MAX_HEAD_SIZE + payload.len());
    encode_frame(
        &Frame::new(true, opcode, None, Bytes::copy_from_slice(payload)),
        &mut dst,
    );
    dst
}

/// Encodes `payload` as a final frame masked with `mask`.
pub fn encode_masked(payload: &[u8], opcode: OpCode, mask: [u8; 4]) -> BytesMut {
    let mut dst = BytesMut::with_capacity(MAX_HEAD_SIZE + payload.len());
    encode_frame(
        &Frame::new(true, opcode, Some(mask), Bytes::copy_from_slice(payload)),
        &mut dst,
    );
    dst
}

/// Appends the wire representation of `frame` to `dst`, masking the payload if the frame
/// carries a key.
pub fn encode_frame(frame: &Frame, dst: &mut BytesMut) {
    let mut header = [0; MAX_HEAD_SIZE];
    let size = frame.fmt_head(&mut header[..]);

    dst.reserve(size + frame.payload.len());
    dst.extend_from_slice(&header[..size]);

    let start = dst.len();
    dst.extend_from_slice(&frame.payload);
    if let Some(mask) = frame.mask {
        apply_mask(&mut dst[start..], mask);
    }
}

/// A decoder for WebSocket frames over a growable buffer.
///
/// Complete frames are split off the front of the buffer without copying. Frames with a
/// reserved opcode are dropped from the buffer before the error is returned, so decoding can
/// continue with the next frame.
#[derive(Debug, Clone)]
pub struct Decoder {
    /// Maximum allowed size for the frame payload.
    max_payload_size: usize,
}

impl Decoder {
    /// Creates a new `Decoder` with a specified maximum payload size.
    pub fn new(max_payload_size: usize) -> Self {
        Self { max_payload_size }
    }
}

impl codec::Decoder for Decoder {
    type Item = Frame;
    type Error = WebSocketError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let Some(head) = parse_head(src, self.max_payload_size)? else {
            return Ok(None);
        };

        if src.remaining() < head.frame_size() {
            // the header is parsed again on the next call, but we already know how much is coming
            src.reserve(head.frame_size() - src.remaining());
            return Ok(None);
        }

        src.advance(head.header_size);
        let mut payload = src.split_to(head.payload_len);
        if let Some(mask) = head.mask {
            apply_mask(&mut payload, mask);
        }

        finish(&head, payload.freeze()).map(Some)
    }
}

/// WebSocket frame encoder.
///
/// When masking is enabled every frame that has no key of its own is masked with a fresh
/// random key, as RFC 6455 requires for client-to-server frames.
#[derive(Debug, Clone)]
pub struct Encoder {
    mask_frames: bool,
}

impl Encoder {
    pub fn new(mask_frames: bool) -> Self {
        Self { mask_frames }
    }
}

impl codec::Encoder<Frame> for Encoder {
    type Error = WebSocketError;

    fn encode(&mut self, mut frame: Frame, dst: &mut BytesMut) -> Result<()> {
        if frame.opcode.is_control() && frame.payload.len() > MAX_CONTROL_PAYLOAD {
            return Err(WebSocketError::ControlFrameTooLarge);
        }

        if self.mask_frames && frame.mask.is_none() {
            frame.mask = Some(random_mask());
        }

        encode_frame(&frame, dst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MAX_PAYLOAD_READ;
    use tokio_util::codec::{Decoder as _, Encoder as _};

    const LENGTHS: [usize; 7] = [0, 1, 125, 126, 65535, 65536, 70000];

    fn payload_of(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_round_trip_lengths() {
        for len in LENGTHS {
            let payload = payload_of(len);
            let wire = encode(&payload, OpCode::Text);

            let decoded = decode(&wire, MAX_PAYLOAD_READ).unwrap().unwrap();
            assert_eq!(decoded.consumed, wire.len(), "length {len}");
            assert_eq!(decoded.frame.opcode, OpCode::Text);
            assert!(decoded.frame.fin);
            assert!(!decoded.frame.is_masked());
            assert_eq!(&decoded.frame.payload[..], &payload[..], "length {len}");
        }
    }

    #[test]
    fn test_round_trip_masked() {
        let mask = [0x37, 0xfa, 0x21, 0x3d];
        for len in LENGTHS {
            let payload = payload_of(len);
            let wire = encode_masked(&payload, OpCode::Binary, mask);

            let decoded = decode(&wire, MAX_PAYLOAD_READ).unwrap().unwrap();
            assert_eq!(decoded.frame.mask(), Some(mask));
            assert_eq!(&decoded.frame.payload[..], &payload[..], "length {len}");
        }
    }

    #[test]
    fn test_length_field_boundaries() {
        let wire = encode(&payload_of(125), OpCode::Text);
        assert_eq!(wire[0], 0x81);
        assert_eq!(wire[1], 125);
        assert_eq!(wire.len(), 2 + 125);

        let wire = encode(&payload_of(126), OpCode::Text);
        assert_eq!(wire[1], 126);
        assert_eq!(&wire[2..4], &[0x00, 0x7E]);
        assert_eq!(wire.len(), 4 + 126);

        let wire = encode(&payload_of(65536), OpCode::Text);
        assert_eq!(wire[1], 127);
        assert_eq!(&wire[2..10], &[0, 0, 0, 0, 0, 1, 0, 0]);
        assert_eq!(wire.len(), 10 + 65536);
    }

    #[test]
    fn test_rfc_masked_hello() {
        // RFC 6455 section 5.7, a single-frame masked text message
        let wire = [
            0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58,
        ];
        let decoded = decode(&wire, MAX_PAYLOAD_READ).unwrap().unwrap();

        assert_eq!(decoded.consumed, wire.len());
        assert_eq!(&decoded.frame.payload[..], b"Hello");
        assert_eq!(
            &encode_masked(b"Hello", OpCode::Text, [0x37, 0xfa, 0x21, 0x3d])[..],
            &wire[..]
        );
    }

    #[test]
    fn test_incomplete_at_every_prefix() {
        for len in [0, 5, 200, 70000] {
            let wire = encode_masked(&payload_of(len), OpCode::Binary, [1, 2, 3, 4]);
            let step = (wire.len() / 64).max(1);

            for end in (0..wire.len()).step_by(step) {
                assert!(
                    decode(&wire[..end], MAX_PAYLOAD_READ).unwrap().is_none(),
                    "length {len} prefix {end}"
                );
            }
        }
    }

    #[test]
    fn test_consumed_leaves_trailing_bytes() {
        let mut wire = encode(b"first", OpCode::Text);
        wire.extend_from_slice(&encode(b"second", OpCode::Binary));

        let first = decode(&wire, MAX_PAYLOAD_READ).unwrap().unwrap();
        assert_eq!(&first.frame.payload[..], b"first");

        let second = decode(&wire[first.consumed..], MAX_PAYLOAD_READ)
            .unwrap()
            .unwrap();
        assert_eq!(second.frame.opcode, OpCode::Binary);
        assert_eq!(first.consumed + second.consumed, wire.len());
    }

    #[test]
    fn test_reserved_bits() {
        assert!(matches!(
            decode(&[0xC1, 0x00], MAX_PAYLOAD_READ),
            Err(WebSocketError::ReservedBitsNotZero)
        ));
    }

    #[test]
    fn test_frame_too_large() {
        let wire = encode(&payload_of(1025), OpCode::Binary);
        assert!(matches!(
            decode(&wire[..4], 1024),
            Err(WebSocketError::FrameTooLarge)
        ));

        // a 64 bit length with the top bit set
        let wire = [0x82, 0x7F, 0x80, 0, 0, 0, 0, 0, 0, 0];
        assert!(matches!(
            decode(&wire, MAX_PAYLOAD_READ),
            Err(WebSocketError::FrameTooLarge)
        ));
    }

    #[test]
    fn test_control_frame_rules() {
        // ping without FIN
        assert!(matches!(
            decode(&[0x09, 0x00], MAX_PAYLOAD_READ),
            Err(WebSocketError::ControlFrameFragmented)
        ));
        // ping with a 16 bit length
        assert!(matches!(
            decode(&[0x89, 0x7E, 0x00, 0x7E], MAX_PAYLOAD_READ),
            Err(WebSocketError::ControlFrameTooLarge)
        ));
    }

    #[test]
    fn test_unknown_opcode_reports_frame_size() {
        let wire = [0x83, 0x03, b'a', b'b', b'c'];

        assert!(decode(&wire[..4], MAX_PAYLOAD_READ).unwrap().is_none());
        assert!(matches!(
            decode(&wire, MAX_PAYLOAD_READ),
            Err(WebSocketError::UnknownOpCode {
                opcode: 0x3,
                consumed: 5
            })
        ));
    }

    #[test]
    fn test_decoder_splits_buffer() {
        let mut decoder = Decoder::new(MAX_PAYLOAD_READ);
        let mut src = BytesMut::new();
        src.extend_from_slice(&encode(b"ping", OpCode::Ping));
        src.extend_from_slice(&encode(b"tail", OpCode::Text)[..3]);

        let frame = decoder.decode(&mut src).unwrap().unwrap();
        assert_eq!(frame.opcode, OpCode::Ping);
        assert_eq!(&frame.payload[..], b"ping");

        assert!(decoder.decode(&mut src).unwrap().is_none());
        assert_eq!(src.len(), 3);
    }

    #[test]
    fn test_decoder_skips_unknown_opcode() {
        let mut decoder = Decoder::new(MAX_PAYLOAD_READ);
        let mut src = BytesMut::from(&[0x8B, 0x01, 0xFF][..]);
        src.extend_from_slice(&encode(b"after", OpCode::Text));

        assert!(matches!(
            decoder.decode(&mut src),
            Err(WebSocketError::UnknownOpCode { opcode: 0xB, .. })
        ));

        let frame = decoder.decode(&mut src).unwrap().unwrap();
        assert_eq!(&frame.payload[..], b"after");
        assert!(src.is_empty());
    }

    #[test]
    fn test_encoder_masks_when_enabled() {
        let mut dst = BytesMut::new();
        Encoder::new(true)
            .encode(Frame::text("masked"), &mut dst)
            .unwrap();

        assert_eq!(dst[1] & 0x80, 0x80);
        assert_ne!(&dst[6..], b"masked");

        let decoded = decode(&dst, MAX_PAYLOAD_READ).unwrap().unwrap();
        assert_eq!(&decoded.frame.payload[..], b"masked");
    }

    #[test]
    fn test_encoder_without_masking() {
        let mut dst = BytesMut::new();
        Encoder::new(false)
            .encode(Frame::text("plain"), &mut dst)
            .unwrap();

        assert_eq!(&dst[..], &encode(b"plain", OpCode::Text)[..]);
    }

    #[test]
    fn test_encoder_rejects_large_control_frames() {
        let mut dst = BytesMut::new();
        let res = Encoder::new(true).encode(Frame::ping(vec![0u8; 126]), &mut dst);

        assert!(matches!(res, Err(WebSocketError::ControlFrameTooLarge)));
        assert!(dst.is_empty());
    }
}
