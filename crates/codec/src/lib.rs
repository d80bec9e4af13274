//! Wire framing for the tchannel-server RPC transport.
//!
//! A [`FrameCodec`] turns a byte stream into discrete [`Frame`]s (and back)
//! via [`tokio_util::codec::Decoder`]/[`Encoder`], the same split the rest of
//! the retrieval pack uses for length-prefixed protocols over a `TcpStream`.

mod error;
mod frame;

pub use error::{Error, ErrorCode};
pub use frame::{Frame, FrameId};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Frames larger than this are rejected as malformed rather than buffered
/// indefinitely.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Bytes in the outer length prefix (a big-endian `u32` giving the size of
/// the header + body that follows it).
const LENGTH_PREFIX_SIZE: usize = 4;
const HEADER_SIZE: usize = 1 + 4; // tag + id

/// Stateless `Decoder`/`Encoder` pair for [`Frame`].
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, Error> {
        if src.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }

        let body_len = u32::from_be_bytes(src[..LENGTH_PREFIX_SIZE].try_into().unwrap()) as usize;
        if body_len > MAX_FRAME_SIZE {
            return Err(Error::FrameTooLarge(body_len));
        }
        if body_len < HEADER_SIZE {
            return Err(Error::Truncated);
        }

        if src.len() < LENGTH_PREFIX_SIZE + body_len {
            src.reserve(LENGTH_PREFIX_SIZE + body_len - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_PREFIX_SIZE);
        let mut body: Bytes = src.split_to(body_len).freeze();

        let tag_byte = body.get_u8();
        let id = body.get_u32();
        Frame::decode_body(tag_byte, id, &mut body).map(Some)
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Error> {
        let mut body = BytesMut::new();
        item.encode_header(&mut body);
        item.encode_body(&mut body);

        if body.len() > MAX_FRAME_SIZE {
            return Err(Error::FrameTooLarge(body.len()));
        }

        dst.reserve(LENGTH_PREFIX_SIZE + body.len());
        dst.put_u32(body.len() as u32);
        dst.extend_from_slice(&body);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoder_waits_for_a_full_frame() {
        let mut codec = FrameCodec;
        let frame = Frame::CallRequest {
            id: 1,
            arg1: Bytes::from_static(b"echo"),
            arg2: Bytes::from_static(b"k"),
            arg3: Bytes::from_static(b"v"),
        };

        let mut buf = BytesMut::new();
        codec.encode(frame.clone(), &mut buf).unwrap();

        let mut partial = buf.split_to(buf.len() - 1);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        partial.unsplit(buf);
        assert_eq!(codec.decode(&mut partial).unwrap(), Some(frame));
    }

    #[test]
    fn rejects_oversized_frame() {
        let mut codec = FrameCodec;
        let mut buf = BytesMut::new();
        buf.put_u32((MAX_FRAME_SIZE + 1) as u32);
        assert!(matches!(codec.decode(&mut buf), Err(Error::FrameTooLarge(_))));
    }
}
