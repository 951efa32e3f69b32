//! Wire codec: envelopes to and from length-prefixed frames.
//!
//! Frame layout (all integers big-endian):
//!
//! ```text
//! +-----------+----------+------+-----------+----------------+-----------+------+
//! | len: u32  | seq: u64 | kind | has_corr  | corr: u64      | ts: u64   | body |
//! |           |          | u8   | u8 (0/1)  | (if has_corr)  | epoch-ms  | ...  |
//! +-----------+----------+------+-----------+----------------+-----------+------+
//! ```
//!
//! `len` counts every byte after the prefix. Pure functions, no state.

use crate::{CorrelationId, DecodeError, EncodeError, Envelope, EnvelopeKind, Sequence};

/// Size of the length prefix.
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Maximum frame size after the prefix (1MB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Smallest possible frame body: seq + kind + has_corr + timestamp.
const MIN_HEADER_LEN: usize = 8 + 1 + 1 + 8;

/// Encode an envelope into a complete frame.
///
/// Fails only if the result would exceed [`MAX_FRAME_SIZE`].
pub fn encode(envelope: &Envelope) -> Result<Vec<u8>, EncodeError> {
    let corr_len = if envelope.correlation_id().is_some() { 8 } else { 0 };
    let body_len = MIN_HEADER_LEN + corr_len + envelope.payload().len();
    if body_len > MAX_FRAME_SIZE {
        return Err(EncodeError::FrameTooLarge {
            size: body_len,
            max: MAX_FRAME_SIZE,
        });
    }

    let mut frame = Vec::with_capacity(LENGTH_PREFIX_LEN + body_len);
    // body_len <= MAX_FRAME_SIZE, so it fits in a u32
    frame.extend_from_slice(&(body_len as u32).to_be_bytes());
    frame.extend_from_slice(&envelope.sequence().value().to_be_bytes());
    frame.push(envelope.kind() as u8);
    match envelope.correlation_id() {
        Some(id) => {
            frame.push(1);
            frame.extend_from_slice(&id.value().to_be_bytes());
        }
        None => frame.push(0),
    }
    frame.extend_from_slice(&envelope.timestamp().to_be_bytes());
    frame.extend_from_slice(envelope.payload());
    Ok(frame)
}

/// Decode one complete frame (prefix included).
///
/// The buffer must hold exactly one frame: fewer bytes than the prefix
/// announces is `Truncated`, more is `Malformed`.
pub fn decode(bytes: &[u8]) -> Result<Envelope, DecodeError> {
    if bytes.len() < LENGTH_PREFIX_LEN {
        return Err(DecodeError::Truncated {
            needed: LENGTH_PREFIX_LEN,
            available: bytes.len(),
        });
    }

    let len = read_prefix(bytes)?;
    let total = LENGTH_PREFIX_LEN + len;
    if bytes.len() < total {
        return Err(DecodeError::Truncated {
            needed: total,
            available: bytes.len(),
        });
    }
    if bytes.len() > total {
        return Err(DecodeError::Malformed(format!(
            "{} trailing bytes after frame",
            bytes.len() - total
        )));
    }

    decode_body(&bytes[LENGTH_PREFIX_LEN..])
}

fn read_prefix(bytes: &[u8]) -> Result<usize, DecodeError> {
    let len = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(DecodeError::Malformed(format!(
            "frame length {} exceeds maximum {}",
            len, MAX_FRAME_SIZE
        )));
    }
    Ok(len)
}

fn decode_body(body: &[u8]) -> Result<Envelope, DecodeError> {
    let mut reader = Reader::new(body);

    let sequence = Sequence::new(reader.u64()?);
    let kind = EnvelopeKind::try_from(reader.u8()?)?;
    let correlation_id = match reader.u8()? {
        0 => None,
        1 => Some(CorrelationId::new(reader.u64()?)),
        flag => {
            return Err(DecodeError::Malformed(format!(
                "invalid correlation flag: {flag}"
            )))
        }
    };
    let timestamp = reader.u64()?;
    let payload = reader.rest().to_vec();

    Ok(Envelope::with_timestamp(
        kind,
        sequence,
        correlation_id,
        timestamp,
        payload,
    ))
}

/// Bounds-checked reader over a frame body whose length is already known.
///
/// Running out of bytes here means the declared length was too short for
/// the header, which is malformed rather than truncated.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let end = self.pos.checked_add(n).filter(|&end| end <= self.buf.len());
        match end {
            Some(end) => {
                let slice = &self.buf[self.pos..end];
                self.pos = end;
                Ok(slice)
            }
            None => Err(DecodeError::Malformed(format!(
                "header needs {} more bytes at offset {}, frame has {}",
                n,
                self.pos,
                self.buf.len()
            ))),
        }
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn u64(&mut self) -> Result<u64, DecodeError> {
        let bytes = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(bytes);
        Ok(u64::from_be_bytes(arr))
    }

    fn rest(&mut self) -> &'a [u8] {
        let rest = &self.buf[self.pos..];
        self.pos = self.buf.len();
        rest
    }
}

/// Splits a byte stream into frames.
///
/// The transport delivers bytes in order but with arbitrary boundaries;
/// feed every chunk to [`extend`](Self::extend) and drain complete frames
/// with [`next_frame`](Self::next_frame).
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: Vec<u8>,
}

impl FrameBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes received from the transport.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pop the next complete frame, decoded.
    ///
    /// Returns `None` until a whole frame is buffered. A frame that fails
    /// to decode is consumed and reported, so the stream keeps moving. An
    /// oversized length prefix cannot be skipped safely, so the buffer is
    /// cleared in that case.
    pub fn next_frame(&mut self) -> Option<Result<Envelope, DecodeError>> {
        if self.buf.len() < LENGTH_PREFIX_LEN {
            return None;
        }

        let len = match read_prefix(&self.buf) {
            Ok(len) => len,
            Err(e) => {
                self.buf.clear();
                return Some(Err(e));
            }
        };

        let total = LENGTH_PREFIX_LEN + len;
        if self.buf.len() < total {
            return None;
        }

        let frame: Vec<u8> = self.buf.drain(..total).collect();
        Some(decode_body(&frame[LENGTH_PREFIX_LEN..]))
    }

    /// Bytes buffered but not yet part of a complete frame.
    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }

    /// Drop everything buffered (used when the connection is replaced).
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Body, Entity, EntityId, EntityKind, Mutation};

    fn event(seq: u64) -> Envelope {
        let mutation = Mutation::Add(vec![Entity::new(
            EntityId::new(format!("alice/{seq}-0")),
            EntityKind::Line,
            r#"{"stroke":"0x000000ff","strokeWidth":2.0,"points":[0.0,0.0,5.0,5.0]}"#,
            1705000000000,
        )]);
        Envelope::with_timestamp(
            EnvelopeKind::Event,
            Sequence::new(seq),
            None,
            1705000000000,
            mutation.to_bytes().unwrap(),
        )
    }

    #[test]
    fn encode_decode_preserves_all_fields() {
        let envelope = Envelope::with_timestamp(
            EnvelopeKind::Ack,
            Sequence::new(42),
            Some(CorrelationId::new(7)),
            1705000000123,
            vec![9, 8, 7],
        );

        let frame = encode(&envelope).unwrap();
        assert_eq!(decode(&frame).unwrap(), envelope);
    }

    #[test]
    fn length_prefix_is_big_endian_body_length() {
        let envelope = Envelope::with_timestamp(
            EnvelopeKind::Heartbeat,
            Sequence::zero(),
            None,
            0,
            vec![],
        );
        let frame = encode(&envelope).unwrap();

        assert_eq!(&frame[..4], &[0, 0, 0, 18]);
        assert_eq!(frame.len(), 4 + 18);
    }

    #[test]
    fn correlation_id_adds_eight_bytes() {
        let with = Envelope::with_timestamp(
            EnvelopeKind::Ack,
            Sequence::zero(),
            Some(CorrelationId::new(1)),
            0,
            vec![],
        );
        assert_eq!(encode(&with).unwrap().len(), 4 + 26);
    }

    #[test]
    fn truncated_buffer_is_truncated() {
        let frame = encode(&event(5)).unwrap();

        for cut in [0, 2, 4, 10, frame.len() - 1] {
            let result = decode(&frame[..cut]);
            assert!(
                matches!(result, Err(DecodeError::Truncated { .. })),
                "cut at {cut} gave {result:?}"
            );
        }
    }

    #[test]
    fn trailing_bytes_are_malformed() {
        let mut frame = encode(&event(5)).unwrap();
        frame.push(0);
        assert!(matches!(decode(&frame), Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn unknown_kind_is_unsupported() {
        let mut frame = encode(&event(5)).unwrap();
        frame[4 + 8] = 42;
        assert_eq!(decode(&frame), Err(DecodeError::UnsupportedKind(42)));
    }

    #[test]
    fn bad_correlation_flag_is_malformed() {
        let mut frame = encode(&event(5)).unwrap();
        frame[4 + 9] = 2;
        assert!(matches!(decode(&frame), Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn declared_length_shorter_than_header_is_malformed() {
        // Prefix says 5 bytes follow, and 5 bytes do follow
        let frame = [0, 0, 0, 5, 1, 2, 3, 4, 5];
        assert!(matches!(decode(&frame), Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn oversized_prefix_is_malformed() {
        let frame = [0xff, 0xff, 0xff, 0xff, 0, 0];
        assert!(matches!(decode(&frame), Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn oversized_payload_fails_to_encode() {
        let envelope = Envelope::new(
            EnvelopeKind::Event,
            Sequence::new(1),
            None,
            vec![0u8; MAX_FRAME_SIZE],
        );
        assert!(matches!(
            encode(&envelope),
            Err(EncodeError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn decode_never_panics_on_garbage() {
        // Deterministic pseudo-random garbage of many lengths
        let mut state: u32 = 0x2545_f491;
        for len in 0..512usize {
            let mut bytes = Vec::with_capacity(len);
            for _ in 0..len {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                bytes.push(state as u8);
            }
            let _ = decode(&bytes);

            let mut buffer = FrameBuffer::new();
            buffer.extend(&bytes);
            while let Some(_frame) = buffer.next_frame() {}
        }
    }

    #[test]
    fn frame_buffer_reassembles_split_frames() {
        let mut stream = encode(&event(1)).unwrap();
        stream.extend(encode(&event(2)).unwrap());
        stream.extend(encode(&event(3)).unwrap());

        let mut buffer = FrameBuffer::new();
        let mut decoded = Vec::new();
        // Feed one byte at a time
        for byte in &stream {
            buffer.extend(std::slice::from_ref(byte));
            while let Some(frame) = buffer.next_frame() {
                decoded.push(frame.unwrap().sequence().value());
            }
        }

        assert_eq!(decoded, vec![1, 2, 3]);
        assert_eq!(buffer.buffered_len(), 0);
    }

    #[test]
    fn frame_buffer_skips_bad_frame_and_continues() {
        let mut bad = encode(&event(1)).unwrap();
        bad[4 + 8] = 0; // kind 0 is unsupported
        let good = encode(&event(2)).unwrap();

        let mut buffer = FrameBuffer::new();
        buffer.extend(&bad);
        buffer.extend(&good);

        assert_eq!(
            buffer.next_frame(),
            Some(Err(DecodeError::UnsupportedKind(0)))
        );
        let next = buffer.next_frame().unwrap().unwrap();
        assert_eq!(next.sequence(), Sequence::new(2));
        assert!(buffer.next_frame().is_none());
    }

    #[test]
    fn frame_buffer_clears_on_oversized_prefix() {
        let mut buffer = FrameBuffer::new();
        buffer.extend(&[0x7f, 0, 0, 0, 1, 2, 3]);

        assert!(matches!(
            buffer.next_frame(),
            Some(Err(DecodeError::Malformed(_)))
        ));
        assert_eq!(buffer.buffered_len(), 0);
    }
}
