//! Binary frame codec.
//!
//! Parses inbound frames from any [`AsyncRead`] and serializes outbound frames
//! to any [`AsyncWrite`]. Holds no state beyond the frame being processed.
//!
//! # Wire Format
//!
//! ```text
//!  byte 0            byte 1            extended length     mask      payload
//! +-+-+-+-+-------+ +-+-------------+ +-----------------+ +-------+ +---------+
//! |F|R|R|R| opcode| |M| len7 (0-127)| | 0, 2 or 8 bytes | | 0 / 4 | | len     |
//! |I|S|S|S|  (4)  | |A|             | | big-endian      | | bytes | | bytes   |
//! |N|V|V|V|       | |S|             | |                 | |       | |         |
//! +-+-+-+-+-------+ +-+-------------+ +-----------------+ +-------+ +---------+
//! ```
//!
//! `len7` 0..=125 is the literal length, 126 selects a 2-byte length, 127 an
//! 8-byte length. Outbound frames always set FIN and never set MASK.

// ============================================================================
// Imports
// ============================================================================

use std::io::ErrorKind;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::error::{Error, Result};

use super::opcode::OpCode;

// ============================================================================
// Constants
// ============================================================================

const FIN_BIT: u8 = 0x80;
const MASK_BIT: u8 = 0x80;
const OPCODE_MASK: u8 = 0x0F;
const LEN7_MASK: u8 = 0x7F;

/// `len7` value selecting a 2-byte extended length.
const LEN_U16: u8 = 126;

/// `len7` value selecting an 8-byte extended length.
const LEN_U64: u8 = 127;

/// Largest payload a control frame may carry.
const MAX_CONTROL_PAYLOAD: u64 = 125;

/// Largest header an outbound frame can have (2 + 8 bytes).
pub const MAX_HEADER_LEN: usize = 10;

/// Status code sent in the close frame this side emits.
pub const CLOSE_NORMAL: u16 = 1000;

// ============================================================================
// Frame
// ============================================================================

/// One decoded protocol unit.
///
/// Frames are created by the codec, consumed immediately and never retained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// `false` when a continuation is expected (never reassembled).
    pub fin: bool,
    /// Frame type.
    pub opcode: OpCode,
    /// Unmasked payload bytes.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Creates a final frame.
    #[inline]
    #[must_use]
    pub fn new(opcode: OpCode, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            fin: true,
            opcode,
            payload: payload.into(),
        }
    }

    /// Returns the status code of a close frame, if it carries one.
    #[must_use]
    pub fn close_code(&self) -> Option<u16> {
        if self.opcode != OpCode::Close {
            return None;
        }
        match self.payload.as_slice() {
            [hi, lo, ..] => Some(u16::from_be_bytes([*hi, *lo])),
            _ => None,
        }
    }
}

// ============================================================================
// Decode
// ============================================================================

/// Reads one frame from `reader`.
///
/// Returns `Ok(None)` if the stream ends cleanly on a frame boundary.
///
/// # Errors
///
/// - [`Error::InvalidOpcode`] for reserved opcodes
/// - [`Error::Protocol`] for a fragmented control frame or one carrying more
///   than 125 bytes
/// - [`Error::FrameTooLarge`] if the declared length exceeds `max_frame_size`;
///   the payload is not read
/// - [`Error::TruncatedFrame`] if the stream ends mid-frame
/// - [`Error::Io`] on transport failure
pub async fn read_frame<R>(reader: &mut R, max_frame_size: usize) -> Result<Option<Frame>>
where
    R: AsyncRead + Unpin,
{
    let mut head = [0u8; 2];
    if reader.read(&mut head[..1]).await? == 0 {
        return Ok(None);
    }
    read_full(reader, &mut head[1..]).await?;

    let fin = head[0] & FIN_BIT != 0;
    let nibble = head[0] & OPCODE_MASK;
    let opcode = OpCode::from_u8(nibble).ok_or_else(|| Error::invalid_opcode(nibble))?;

    let masked = head[1] & MASK_BIT != 0;
    let length = match head[1] & LEN7_MASK {
        LEN_U16 => {
            let mut ext = [0u8; 2];
            read_full(reader, &mut ext).await?;
            u64::from(u16::from_be_bytes(ext))
        }
        LEN_U64 => {
            let mut ext = [0u8; 8];
            read_full(reader, &mut ext).await?;
            u64::from_be_bytes(ext)
        }
        literal => u64::from(literal),
    };

    if opcode.is_control() && (!fin || length > MAX_CONTROL_PAYLOAD) {
        return Err(Error::protocol(format!(
            "{opcode:?} frame must be final and at most {MAX_CONTROL_PAYLOAD} bytes (fin: {fin}, length: {length})"
        )));
    }

    if length > max_frame_size as u64 {
        return Err(Error::frame_too_large(length, max_frame_size));
    }

    let mask = if masked {
        let mut key = [0u8; 4];
        read_full(reader, &mut key).await?;
        Some(key)
    } else {
        None
    };

    // Bounded by max_frame_size above.
    let mut payload = vec![0u8; length as usize];
    read_full(reader, &mut payload).await?;

    if let Some(key) = mask {
        apply_mask(&mut payload, key);
    }

    trace!(?opcode, fin, masked, length, "Frame decoded");

    Ok(Some(Frame {
        fin,
        opcode,
        payload,
    }))
}

/// XORs `payload` in place with the 4-byte masking key.
///
/// Masking is an involution: applying the same key twice restores the input.
#[inline]
pub fn apply_mask(payload: &mut [u8], key: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}

/// `read_exact` that reports end-of-stream as a truncated frame.
async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Err(Error::TruncatedFrame),
        Err(e) => Err(e.into()),
    }
}

// ============================================================================
// Encode
// ============================================================================

/// Encodes the header of a final, unmasked frame.
///
/// Returns the header buffer and the number of bytes used.
#[must_use]
pub fn encode_header(opcode: OpCode, payload_len: usize) -> ([u8; MAX_HEADER_LEN], usize) {
    let mut header = [0u8; MAX_HEADER_LEN];
    header[0] = FIN_BIT | opcode.as_u8();

    let used = if payload_len < LEN_U16 as usize {
        header[1] = payload_len as u8;
        2
    } else if let Ok(short) = u16::try_from(payload_len) {
        header[1] = LEN_U16;
        header[2..4].copy_from_slice(&short.to_be_bytes());
        4
    } else {
        header[1] = LEN_U64;
        header[2..10].copy_from_slice(&(payload_len as u64).to_be_bytes());
        10
    };

    (header, used)
}

/// Encodes a complete final, unmasked frame into a new buffer.
#[must_use]
pub fn encode_frame(opcode: OpCode, payload: &[u8]) -> Vec<u8> {
    let (header, used) = encode_header(opcode, payload.len());
    let mut out = Vec::with_capacity(used + payload.len());
    out.extend_from_slice(&header[..used]);
    out.extend_from_slice(payload);
    out
}

/// Writes one final, unmasked frame and flushes.
///
/// # Errors
///
/// Returns [`Error::Io`] if the write or flush fails.
pub async fn write_frame<W>(writer: &mut W, opcode: OpCode, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let (header, used) = encode_header(opcode, payload.len());
    writer.write_all(&header[..used]).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;

    trace!(?opcode, length = payload.len(), "Frame written");
    Ok(())
}

/// Payload of the close frame this side sends.
#[inline]
#[must_use]
pub fn close_payload(code: u16) -> [u8; 2] {
    code.to_be_bytes()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;
    use tokio_test::io::Builder;

    const LIMIT: usize = 64 * 1024;

    /// Builds a client frame the way a browser would: FIN set, masked.
    fn masked_frame(opcode: OpCode, payload: &[u8], key: [u8; 4]) -> Vec<u8> {
        let (header, used) = encode_header(opcode, payload.len());
        let mut out = header[..used].to_vec();
        out[1] |= MASK_BIT;
        out.extend_from_slice(&key);
        let mut body = payload.to_vec();
        apply_mask(&mut body, key);
        out.extend_from_slice(&body);
        out
    }

    #[tokio::test]
    async fn test_decode_unmasked_text() {
        let bytes = [0x81, 0x04, b'p', b'i', b'n', b'g'];
        let frame = read_frame(&mut &bytes[..], LIMIT)
            .await
            .expect("decode")
            .expect("frame");

        assert!(frame.fin);
        assert_eq!(frame.opcode, OpCode::Text);
        assert_eq!(frame.payload, b"ping");
    }

    #[tokio::test]
    async fn test_decode_masked_known_vector() {
        // "Hello" masked with 37 fa 21 3d.
        let bytes = [
            0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58,
        ];
        let frame = read_frame(&mut &bytes[..], LIMIT)
            .await
            .expect("decode")
            .expect("frame");

        assert_eq!(frame.payload, b"Hello");
    }

    #[tokio::test]
    async fn test_decode_partial_reads() {
        let bytes = masked_frame(OpCode::Binary, &[1, 2, 3, 4, 5, 6], [9, 8, 7, 6]);
        let mut mock = Builder::new()
            .read(&bytes[..1])
            .read(&bytes[1..3])
            .read(&bytes[3..7])
            .read(&bytes[7..])
            .build();

        let frame = read_frame(&mut mock, LIMIT)
            .await
            .expect("decode")
            .expect("frame");
        assert_eq!(frame.opcode, OpCode::Binary);
        assert_eq!(frame.payload, vec![1, 2, 3, 4, 5, 6]);
    }

    #[tokio::test]
    async fn test_decode_16bit_length() {
        let payload = vec![0xAB; 300];
        let bytes = encode_frame(OpCode::Binary, &payload);
        assert_eq!(bytes[1], LEN_U16);

        let frame = read_frame(&mut &bytes[..], LIMIT)
            .await
            .expect("decode")
            .expect("frame");
        assert_eq!(frame.payload, payload);
    }

    #[tokio::test]
    async fn test_decode_64bit_length() {
        let payload = vec![0x5A; 70_000];
        let bytes = encode_frame(OpCode::Binary, &payload);
        assert_eq!(bytes[1], LEN_U64);

        let frame = read_frame(&mut &bytes[..], 100_000)
            .await
            .expect("decode")
            .expect("frame");
        assert_eq!(frame.payload.len(), 70_000);
    }

    #[tokio::test]
    async fn test_clean_eof_is_none() {
        let empty: [u8; 0] = [];
        let result = read_frame(&mut &empty[..], LIMIT).await.expect("no error");
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_truncated_payload() {
        let bytes = [0x81, 0x05, b'a', b'b'];
        let err = read_frame(&mut &bytes[..], LIMIT).await.unwrap_err();
        assert!(matches!(err, Error::TruncatedFrame));
    }

    #[tokio::test]
    async fn test_truncated_header() {
        let bytes = [0x82];
        let err = read_frame(&mut &bytes[..], LIMIT).await.unwrap_err();
        assert!(matches!(err, Error::TruncatedFrame));
    }

    #[tokio::test]
    async fn test_oversize_rejected_before_payload() {
        // Declares 1,000,000 bytes; no payload follows. Reading past the
        // script would surface as TruncatedFrame instead.
        let mut header = vec![0x82, 0x80 | LEN_U64];
        header.extend_from_slice(&1_000_000u64.to_be_bytes());
        let mut mock = Builder::new().read(&header).build();

        let err = read_frame(&mut mock, LIMIT).await.unwrap_err();
        assert!(matches!(
            err,
            Error::FrameTooLarge {
                size: 1_000_000,
                limit: LIMIT
            }
        ));
    }

    #[tokio::test]
    async fn test_invalid_opcode() {
        let bytes = [0x83, 0x00];
        let err = read_frame(&mut &bytes[..], LIMIT).await.unwrap_err();
        assert!(matches!(err, Error::InvalidOpcode { opcode: 0x3 }));
    }

    #[tokio::test]
    async fn test_continuation_is_decoded() {
        let bytes = [0x00, 0x02, b'h', b'i'];
        let frame = read_frame(&mut &bytes[..], LIMIT)
            .await
            .expect("decode")
            .expect("frame");
        assert!(!frame.fin);
        assert_eq!(frame.opcode, OpCode::Continuation);
    }

    #[tokio::test]
    async fn test_two_frames_back_to_back() {
        let mut bytes = masked_frame(OpCode::Text, b"one", [1, 2, 3, 4]);
        bytes.extend(masked_frame(OpCode::Ping, b"", [5, 6, 7, 8]));
        let mut reader = &bytes[..];

        let first = read_frame(&mut reader, LIMIT).await.unwrap().unwrap();
        let second = read_frame(&mut reader, LIMIT).await.unwrap().unwrap();
        let end = read_frame(&mut reader, LIMIT).await.unwrap();

        assert_eq!(first.payload, b"one");
        assert_eq!(second.opcode, OpCode::Ping);
        assert!(end.is_none());
    }

    #[tokio::test]
    async fn test_fragmented_control_frame_rejected() {
        // PING without FIN.
        let bytes = [0x09, 0x00];
        let err = read_frame(&mut &bytes[..], LIMIT).await.unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
        assert!(err.is_framing_error());
    }

    #[tokio::test]
    async fn test_oversized_control_frame_rejected() {
        let bytes = masked_frame(OpCode::Ping, &[0u8; 126], [1, 2, 3, 4]);
        let err = read_frame(&mut &bytes[..], LIMIT).await.unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));

        let largest = masked_frame(OpCode::Pong, &[7u8; 125], [1, 2, 3, 4]);
        let frame = read_frame(&mut &largest[..], LIMIT)
            .await
            .expect("decode")
            .expect("frame");
        assert_eq!(frame.payload.len(), 125);
    }

    #[test]
    fn test_encode_header_tiers() {
        assert_eq!(encode_header(OpCode::Text, 0).1, 2);
        assert_eq!(encode_header(OpCode::Text, 125).1, 2);
        assert_eq!(encode_header(OpCode::Text, 126).1, 4);
        assert_eq!(encode_header(OpCode::Text, 65535).1, 4);
        assert_eq!(encode_header(OpCode::Text, 65536).1, 10);
    }

    #[test]
    fn test_encode_sets_fin_never_mask() {
        let bytes = encode_frame(OpCode::Pong, b"abc");
        assert_eq!(bytes, vec![0x8A, 0x03, b'a', b'b', b'c']);
    }

    #[tokio::test]
    async fn test_write_frame_flushes_header_and_payload() {
        let mut mock = Builder::new().write(&[0x81, 0x02, b'h', b'i']).build();
        write_frame(&mut mock, OpCode::Text, b"hi")
            .await
            .expect("write");
    }

    #[test]
    fn test_close_code() {
        let frame = Frame::new(OpCode::Close, close_payload(CLOSE_NORMAL).to_vec());
        assert_eq!(frame.close_code(), Some(1000));
        assert_eq!(Frame::new(OpCode::Close, Vec::new()).close_code(), None);
        assert_eq!(Frame::new(OpCode::Text, vec![3, 232]).close_code(), None);
    }

    proptest! {
        #[test]
        fn prop_encode_decode_round_trip(
            opcode in prop::sample::select(vec![OpCode::Text, OpCode::Binary]),
            payload in prop::collection::vec(any::<u8>(), 0..1024),
        ) {
            let bytes = encode_frame(opcode, &payload);
            let frame = tokio_test::block_on(read_frame(&mut &bytes[..], 1024))
                .expect("decode")
                .expect("frame");
            prop_assert!(frame.fin);
            prop_assert_eq!(frame.opcode, opcode);
            prop_assert_eq!(frame.payload, payload);
        }

        #[test]
        fn prop_control_round_trip(
            opcode in prop::sample::select(vec![OpCode::Close, OpCode::Ping, OpCode::Pong]),
            payload in prop::collection::vec(any::<u8>(), 0..=125),
        ) {
            let bytes = encode_frame(opcode, &payload);
            let frame = tokio_test::block_on(read_frame(&mut &bytes[..], 1024))
                .expect("decode")
                .expect("frame");
            prop_assert_eq!(frame.opcode, opcode);
            prop_assert_eq!(frame.payload, payload);
        }

        #[test]
        fn prop_masked_decode_recovers_plaintext(
            key in any::<[u8; 4]>(),
            payload in prop::collection::vec(any::<u8>(), 0..512),
        ) {
            let bytes = masked_frame(OpCode::Binary, &payload, key);
            let frame = tokio_test::block_on(read_frame(&mut &bytes[..], 1024))
                .expect("decode")
                .expect("frame");
            prop_assert_eq!(frame.payload, payload);
        }
    }
}
