use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, ErrorCode};

/// Correlates a request frame with its response frame on a single connection.
pub type FrameId = u32;

#[derive(num_enum::TryFromPrimitive, num_enum::IntoPrimitive, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum Tag {
    InitRequest = 0x01,
    InitResponse = 0x02,
    CallRequest = 0x03,
    CallResponse = 0x04,
    Error = 0x05,
}

/// A single unit exchanged between two endpoints.
///
/// Every variant carries the [`FrameId`] it correlates to: for `InitRequest`/
/// `InitResponse` this is the connection-local handshake id; for the rest it
/// is the id assigned by the caller when the operation started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    InitRequest {
        id: FrameId,
        host_port: String,
        process_name: String,
    },
    InitResponse {
        id: FrameId,
        host_port: String,
        process_name: String,
    },
    CallRequest {
        id: FrameId,
        arg1: Bytes,
        arg2: Bytes,
        arg3: Bytes,
    },
    CallResponse {
        id: FrameId,
        /// `Err` mirrors the wire's leading error indicator; `code`/`message`
        /// are only meaningful in that case.
        result: Result<(Bytes, Bytes), (ErrorCode, String)>,
    },
    /// A protocol-level failure tied to an operation id, distinct from an
    /// application-level `CallResponse` error.
    Error {
        id: FrameId,
        code: ErrorCode,
        message: String,
    },
}

impl Frame {
    pub fn id(&self) -> FrameId {
        match self {
            Frame::InitRequest { id, .. }
            | Frame::InitResponse { id, .. }
            | Frame::CallRequest { id, .. }
            | Frame::CallResponse { id, .. }
            | Frame::Error { id, .. } => *id,
        }
    }

    fn tag(&self) -> Tag {
        match self {
            Frame::InitRequest { .. } => Tag::InitRequest,
            Frame::InitResponse { .. } => Tag::InitResponse,
            Frame::CallRequest { .. } => Tag::CallRequest,
            Frame::CallResponse { .. } => Tag::CallResponse,
            Frame::Error { .. } => Tag::Error,
        }
    }

    /// Writes this frame's body (everything after the 4-byte type+id header)
    /// into `dst`. Does not include the outer length prefix.
    pub(crate) fn encode_body(&self, dst: &mut BytesMut) {
        match self {
            Frame::InitRequest {
                host_port,
                process_name,
                ..
            }
            | Frame::InitResponse {
                host_port,
                process_name,
                ..
            } => {
                put_str(dst, host_port);
                put_str(dst, process_name);
            }
            Frame::CallRequest {
                arg1, arg2, arg3, ..
            } => {
                put_bytes(dst, arg1);
                put_bytes(dst, arg2);
                put_bytes(dst, arg3);
            }
            Frame::CallResponse { result, .. } => match result {
                Ok((arg1, arg2)) => {
                    dst.put_u8(1);
                    put_bytes(dst, arg1);
                    put_bytes(dst, arg2);
                }
                Err((code, message)) => {
                    dst.put_u8(0);
                    dst.put_u16((*code).into());
                    put_str(dst, message);
                }
            },
            Frame::Error { code, message, .. } => {
                dst.put_u16((*code).into());
                put_str(dst, message);
            }
        }
    }

    pub(crate) fn encode_header(&self, dst: &mut BytesMut) {
        dst.put_u8(self.tag().into());
        dst.put_u32(self.id());
    }

    /// Parses a complete frame body given its already-consumed tag and id.
    pub(crate) fn decode_body(tag_byte: u8, id: FrameId, buf: &mut Bytes) -> Result<Self, Error> {
        let tag = Tag::try_from(tag_byte).map_err(|_| Error::UnknownFrameType(tag_byte))?;
        Ok(match tag {
            Tag::InitRequest | Tag::InitResponse => {
                let host_port = get_str(buf)?;
                let process_name = get_str(buf)?;
                if tag == Tag::InitRequest {
                    Frame::InitRequest {
                        id,
                        host_port,
                        process_name,
                    }
                } else {
                    Frame::InitResponse {
                        id,
                        host_port,
                        process_name,
                    }
                }
            }
            Tag::CallRequest => {
                let arg1 = get_bytes(buf)?;
                let arg2 = get_bytes(buf)?;
                let arg3 = get_bytes(buf)?;
                Frame::CallRequest {
                    id,
                    arg1,
                    arg2,
                    arg3,
                }
            }
            Tag::CallResponse => {
                if buf.remaining() < 1 {
                    return Err(Error::Truncated);
                }
                let ok = buf.get_u8();
                let result = if ok == 1 {
                    let arg1 = get_bytes(buf)?;
                    let arg2 = get_bytes(buf)?;
                    Ok((arg1, arg2))
                } else {
                    if buf.remaining() < 2 {
                        return Err(Error::Truncated);
                    }
                    let code = buf.get_u16();
                    let code = ErrorCode::try_from(code).map_err(|_| Error::UnknownErrorCode(code))?;
                    let message = get_str(buf)?;
                    Err((code, message))
                };
                Frame::CallResponse { id, result }
            }
            Tag::Error => {
                if buf.remaining() < 2 {
                    return Err(Error::Truncated);
                }
                let code = buf.get_u16();
                let code = ErrorCode::try_from(code).map_err(|_| Error::UnknownErrorCode(code))?;
                let message = get_str(buf)?;
                Frame::Error { id, code, message }
            }
        })
    }
}

fn put_bytes(dst: &mut BytesMut, value: &[u8]) {
    dst.put_u32(value.len() as u32);
    dst.put_slice(value);
}

fn put_str(dst: &mut BytesMut, value: &str) {
    put_bytes(dst, value.as_bytes());
}

fn get_bytes(buf: &mut Bytes) -> Result<Bytes, Error> {
    if buf.remaining() < 4 {
        return Err(Error::Truncated);
    }
    let len = buf.get_u32() as usize;
    if buf.remaining() < len {
        return Err(Error::Truncated);
    }
    Ok(buf.split_to(len))
}

fn get_str(buf: &mut Bytes) -> Result<String, Error> {
    let raw = get_bytes(buf)?;
    Ok(std::str::from_utf8(&raw)?.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(frame: Frame) {
        let mut body = BytesMut::new();
        frame.encode_body(&mut body);
        let mut body = body.freeze();
        let decoded = Frame::decode_body(frame.tag().into(), frame.id(), &mut body).unwrap();
        assert_eq!(frame, decoded);
    }

    #[test]
    fn call_request_roundtrips() {
        roundtrip(Frame::CallRequest {
            id: 7,
            arg1: Bytes::from_static(b"echo"),
            arg2: Bytes::from_static(b"k"),
            arg3: Bytes::from_static(b"v"),
        });
    }

    #[test]
    fn call_response_ok_roundtrips() {
        roundtrip(Frame::CallResponse {
            id: 7,
            result: Ok((Bytes::from_static(b"k"), Bytes::from_static(b"v"))),
        });
    }

    #[test]
    fn call_response_err_roundtrips() {
        roundtrip(Frame::CallResponse {
            id: 7,
            result: Err((ErrorCode::NoSuchEndpoint, "no such endpoint".into())),
        });
    }

    #[test]
    fn init_roundtrips() {
        roundtrip(Frame::InitRequest {
            id: 0,
            host_port: "127.0.0.1:4040".into(),
            process_name: "test".into(),
        });
    }
}
