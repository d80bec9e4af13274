//! Connection multiplexing, peer registry, and timeout sweep for a
//! bidirectional RPC channel: the part of the system that has to get
//! concurrency and bookkeeping right under failure, independent of any
//! particular wire format.

mod channel;
mod clock;
mod connection;
mod error;
mod events;
mod handler;
mod op_table;
mod registry;

pub use channel::{Channel, ChannelOptions};
pub use clock::{Clock, Random, SharedClock, SharedRandom, SystemClock, ThreadRandom};
pub use connection::{ConnectionHandle, Direction};
pub use error::TChannelError;
pub use events::ChannelEvent;

use bytes::Bytes;

/// A server-role handler registered under an endpoint name.
///
/// `call` receives `arg2`/`arg3` from the inbound `CallRequest` (`arg1`, the
/// endpoint name, is consumed by dispatch) and returns the two response
/// payloads on success, or a message describing the failure, which is
/// reported to the caller as an `Unexpected` error.
#[async_trait::async_trait]
pub trait EndpointHandler: Send + Sync {
    async fn call(&self, arg2: Bytes, arg3: Bytes) -> Result<(Bytes, Bytes), String>;
}
