use std::fmt;

/// Failure kinds surfaced to callers, log lines, or the wire.
#[derive(Debug, Clone)]
pub enum TChannelError {
    /// A caller-supplied option was missing or malformed (e.g. no host given to `send`).
    InvalidArg(String),
    /// The channel has already been shut down via `quit`.
    Destroyed,
    /// No handler is registered under the requested endpoint name.
    NoSuchEndpoint,
    /// An operation's deadline elapsed before a response arrived.
    Timeout,
    /// The underlying socket reported an error.
    SocketError(String),
    /// The underlying socket was closed by the peer.
    SocketClosed,
    /// A frame could not be decoded from the byte stream.
    ParseError(String),
    /// Synthetic error delivered to pending operations during `quit`.
    Shutdown,
}

impl fmt::Display for TChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArg(msg) => write!(f, "invalid argument: {msg}"),
            Self::Destroyed => write!(f, "channel is destroyed"),
            Self::NoSuchEndpoint => write!(f, "no such endpoint"),
            Self::Timeout => write!(f, "operation timed out"),
            Self::SocketError(msg) => write!(f, "socket error: {msg}"),
            Self::SocketClosed => write!(f, "socket closed"),
            Self::ParseError(msg) => write!(f, "parse error: {msg}"),
            Self::Shutdown => write!(f, "channel is shutting down"),
        }
    }
}

impl std::error::Error for TChannelError {}

impl From<codec::Error> for TChannelError {
    fn from(value: codec::Error) -> Self {
        Self::ParseError(value.to_string())
    }
}

impl From<std::io::Error> for TChannelError {
    fn from(value: std::io::Error) -> Self {
        Self::SocketError(value.to_string())
    }
}
