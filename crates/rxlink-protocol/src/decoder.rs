//! Streaming frame reassembly for byte-stream transports.
//!
//! A TCP read may return part of a header, part of a body, or several
//! frames back to back. [`FrameDecoder`] buffers whatever arrives and
//! yields complete frames (length prefix included) one at a time.

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::Decoder;

use rxlink_core::Error;

use crate::codec::{HEADER_LEN, MAX_BODY_LEN};

/// Length-prefix frame decoder.
///
/// Yields each frame exactly as it appeared on the wire so it can be
/// handed straight to a [`MessageCodec`](crate::codec::MessageCodec).
#[derive(Debug, Default)]
pub struct FrameDecoder;

impl FrameDecoder {
    pub fn new() -> Self {
        FrameDecoder
    }
}

impl Decoder for FrameDecoder {
    type Item = Bytes;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, Error> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let body_len = u16::from_be_bytes([src[0], src[1]]) as usize;
        if body_len == 0 || body_len > MAX_BODY_LEN {
            // The stream is no longer aligned on a frame boundary.
            src.advance(src.len());
            return Err(Error::Protocol(format!(
                "invalid frame length {body_len}"
            )));
        }

        let total = HEADER_LEN + body_len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        Ok(Some(src.split_to(total).freeze()))
    }
}
