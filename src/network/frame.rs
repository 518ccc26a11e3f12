//! Frame Codec
//!
//! Length-prefixed framing: every message is a 2-byte big-endian length
//! followed by exactly that many body bytes, `1 <= len <= 510`.
//!
//! The decoder keeps the pending body length between calls, so the transport
//! may deliver bytes in arbitrary chunks.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

/// Size of the length prefix in bytes.
pub const PREFIX_LEN: usize = 2;

/// Largest body a frame may carry.
pub const MAX_BODY_LEN: usize = 510;

/// Framing errors.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Peer advertised a zero or oversized body.
    #[error("Invalid length prefix: {0}")]
    InvalidLength(usize),

    /// Attempted to send a body larger than the ceiling.
    #[error("Body of {len} bytes exceeds maximum of {max}")]
    BodyTooLong {
        /// Body length.
        len: usize,
        /// Configured ceiling.
        max: usize,
    },

    /// Attempted to send an empty body.
    #[error("Body is empty")]
    EmptyBody,

    /// Transport error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Codec for length-prefixed frames.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_body_len: usize,
    /// Body length announced by a prefix already consumed.
    pending_len: Option<usize>,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec {
    /// Codec with the protocol ceiling.
    pub fn new() -> Self {
        Self::with_max_body_len(MAX_BODY_LEN)
    }

    /// Codec with a custom ceiling.
    pub fn with_max_body_len(max_body_len: usize) -> Self {
        Self {
            max_body_len,
            pending_len: None,
        }
    }

    /// Largest body this codec accepts.
    pub fn max_body_len(&self) -> usize {
        self.max_body_len
    }

    /// Frame a body into a standalone buffer.
    pub fn frame(&mut self, body: Bytes) -> Result<Bytes, FrameError> {
        let mut dst = BytesMut::with_capacity(PREFIX_LEN + body.len());
        self.encode(body, &mut dst)?;
        Ok(dst.freeze())
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, FrameError> {
        let len = match self.pending_len {
            Some(len) => len,
            None => {
                if src.len() < PREFIX_LEN {
                    return Ok(None);
                }
                let len = src.get_u16() as usize;
                if len == 0 || len > self.max_body_len {
                    return Err(FrameError::InvalidLength(len));
                }
                self.pending_len = Some(len);
                len
            }
        };

        if src.len() < len {
            src.reserve(len - src.len());
            return Ok(None);
        }

        self.pending_len = None;
        Ok(Some(src.split_to(len).freeze()))
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, body: Bytes, dst: &mut BytesMut) -> Result<(), FrameError> {
        if body.is_empty() {
            return Err(FrameError::EmptyBody);
        }
        if body.len() > self.max_body_len {
            return Err(FrameError::BodyTooLong {
                len: body.len(),
                max: self.max_body_len,
            });
        }

        dst.reserve(PREFIX_LEN + body.len());
        dst.put_u16(body.len() as u16);
        dst.extend_from_slice(&body);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn framed(body: &[u8]) -> BytesMut {
        let mut buf = BytesMut::new();
        FrameCodec::new()
            .encode(Bytes::copy_from_slice(body), &mut buf)
            .unwrap();
        buf
    }

    #[test]
    fn test_encode_prefix_is_big_endian() {
        let buf = framed(b"MOVE:1");
        assert_eq!(&buf[..], b"\x00\x06MOVE:1");

        let body = vec![b'a'; 300];
        let buf = framed(&body);
        assert_eq!(&buf[..2], &[0x01u8, 0x2c]);
    }

    #[test]
    fn test_decode_needs_full_prefix_and_body() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from(&b"\x00"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"\x05LOG");
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"IN");
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), Bytes::from_static(b"LOGIN"));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_never_reads_past_frame() {
        let mut codec = FrameCodec::new();
        let mut buf = framed(b"A:1");
        buf.extend_from_slice(&framed(b"B:2"));
        buf.extend_from_slice(b"\x00");

        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), Bytes::from_static(b"A:1"));
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), Bytes::from_static(b"B:2"));
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(&buf[..], b"\x00");
    }

    #[test]
    fn test_decode_rejects_zero_length() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from(&b"\x00\x00MOVE:1"[..]);
        assert!(matches!(codec.decode(&mut buf), Err(FrameError::InvalidLength(0))));
    }

    #[test]
    fn test_encode_rejects_oversized_and_empty_bodies() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        let body = Bytes::from(vec![b'x'; MAX_BODY_LEN + 1]);
        assert!(matches!(
            codec.encode(body, &mut buf),
            Err(FrameError::BodyTooLong { len: 511, max: 510 })
        ));
        assert!(matches!(codec.encode(Bytes::new(), &mut buf), Err(FrameError::EmptyBody)));
        assert!(buf.is_empty());
    }

    proptest! {
        #[test]
        fn prop_round_trip(body in proptest::collection::vec(any::<u8>(), 1..=MAX_BODY_LEN)) {
            let mut buf = framed(&body);
            let decoded = FrameCodec::new().decode(&mut buf).unwrap().unwrap();
            prop_assert_eq!(&decoded[..], &body[..]);
            prop_assert!(buf.is_empty());
        }

        #[test]
        fn prop_round_trip_in_chunks(
            body in proptest::collection::vec(any::<u8>(), 1..=MAX_BODY_LEN),
            chunk in 1usize..64,
        ) {
            let wire = framed(&body);
            let mut codec = FrameCodec::new();
            let mut buf = BytesMut::new();
            let mut frames = Vec::new();

            for piece in wire.chunks(chunk) {
                buf.extend_from_slice(piece);
                while let Some(frame) = codec.decode(&mut buf).unwrap() {
                    frames.push(frame);
                }
            }

            prop_assert_eq!(frames.len(), 1);
            prop_assert_eq!(&frames[0][..], &body[..]);
        }

        #[test]
        fn prop_out_of_range_prefix_rejected(len in prop_oneof![Just(0u16), (MAX_BODY_LEN as u16 + 1)..=u16::MAX]) {
            let mut codec = FrameCodec::new();
            let mut buf = BytesMut::new();
            buf.put_u16(len);
            buf.extend_from_slice(b"MOVE:1");

            let result = codec.decode(&mut buf);
            prop_assert!(matches!(result, Err(FrameError::InvalidLength(l)) if l == len as usize));
            // No body bytes consumed
            prop_assert_eq!(&buf[..], b"MOVE:1");
        }
    }
}
