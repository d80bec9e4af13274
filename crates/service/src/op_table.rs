use std::time::Duration;

use bytes::Bytes;
use codec::FrameId;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::TChannelError;

/// Fixed-capacity, ahash-backed map used for both operation tables and the
/// peer registry; pre-sizing avoids the default hasher's rehash-on-grow
/// churn for the common case of a handful of concurrent operations.
pub struct Table<K, V> {
    inner: ahash::AHashMap<K, V>,
}

impl<K, V> Table<K, V>
where
    K: std::hash::Hash + Eq,
{
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: ahash::AHashMap::with_capacity_and_hasher(capacity, Default::default()),
        }
    }

    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        self.inner.insert(key, value)
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.inner.remove(key)
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.inner.get(key)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.inner.get_mut(key)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.inner.keys()
    }

    pub fn drain(&mut self) -> impl Iterator<Item = (K, V)> + '_ {
        self.inner.drain()
    }
}

impl<K, V> Default for Table<K, V>
where
    K: std::hash::Hash + Eq,
{
    fn default() -> Self {
        Self::with_capacity(0)
    }
}

/// An outbound (client-role) operation awaiting a response.
pub struct OutboundOp {
    pub start: Instant,
    pub timeout: Duration,
    /// Fulfilled exactly once: with the peer's response, a `Timeout`, or a
    /// terminal connection error.
    pub respond: oneshot::Sender<Result<(Bytes, Bytes), TChannelError>>,
}

/// An inbound (server-role) operation currently being handled.
///
/// Removed from the table either when its response is written
/// (`Connection::run_in_op`) or when the sweep decides it has overstayed
/// `server_timeout_default`; in the latter case no response is sent, mirroring
/// the symmetric timeout the peer will observe on its own outbound op.
pub struct InboundOp {
    pub start: Instant,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_tracks_len_through_insert_and_remove() {
        let mut table: Table<u32, &str> = Table::with_capacity(4);
        assert!(table.is_empty());
        table.insert(1, "a");
        table.insert(2, "b");
        assert_eq!(table.len(), 2);
        assert_eq!(table.remove(&1), Some("a"));
        assert_eq!(table.len(), 1);
        assert!(table.get(&1).is_none());
    }
}

pub type OutboundTable = Table<FrameId, OutboundOp>;
pub type InboundTable = Table<FrameId, InboundOp>;
