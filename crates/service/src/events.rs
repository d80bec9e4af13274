use std::sync::Arc;

use bytes::Bytes;

use crate::error::TChannelError;

/// Notifications a [`crate::Channel`] fans out over a
/// [`tokio::sync::broadcast`] channel; consumers (an HTTP `/events`
/// endpoint, a test harness) subscribe via `Channel::subscribe`.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    Listening { host_port: String },
    Identified { host_port: String },
    SocketClose {
        host_port: Option<String>,
        error: Option<Arc<TChannelError>>,
    },
    Endpoint { name: Bytes },
    EndpointMissing { name: Bytes },
}
