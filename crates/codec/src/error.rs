use std::fmt;

/// Per-operation error code carried on the wire inside a [`crate::Frame::CallResponse`]
/// or [`crate::Frame::Error`] frame.
#[derive(num_enum::TryFromPrimitive, num_enum::IntoPrimitive, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    NoSuchEndpoint = 1,
    BadRequest = 2,
    Timeout = 3,
    Unexpected = 4,
}

/// Failures produced while decoding or encoding frames.
///
/// Distinct from [`ErrorCode`]: this type describes a broken byte stream, not
/// an application-level RPC failure.
#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    Utf8(std::str::Utf8Error),
    /// A frame announced a length field that exceeds `MAX_FRAME_SIZE`.
    FrameTooLarge(usize),
    /// An unrecognized frame type tag was encountered.
    UnknownFrameType(u8),
    /// An unrecognized error code was encountered in an Error/CallResponse frame.
    UnknownErrorCode(u16),
    /// The frame body ended before all declared fields could be read.
    Truncated,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "io error: {e}"),
            Error::Utf8(e) => write!(f, "invalid utf8: {e}"),
            Error::FrameTooLarge(n) => write!(f, "frame of {n} bytes exceeds maximum frame size"),
            Error::UnknownFrameType(t) => write!(f, "unknown frame type tag: {t}"),
            Error::UnknownErrorCode(c) => write!(f, "unknown error code: {c}"),
            Error::Truncated => write!(f, "frame body truncated"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Utf8(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(value: std::str::Utf8Error) -> Self {
        Self::Utf8(value)
    }
}
