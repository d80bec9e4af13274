use parking_lot::RwLock;

use crate::op_table::Table;

/// Maps a peer's `HostPort` to its connections, in preference order.
///
/// Outbound connections are prepended (this endpoint dialed them
/// deliberately and prefers them), inbound connections are appended (used
/// only when nothing outbound is available). `get` always returns the first
/// entry. Keys are never removed once created, even after their connection
/// list empties; unbounded growth of long-dead hostPorts is an accepted
/// tradeoff.
pub struct PeerRegistry<H> {
    peers: RwLock<Table<String, Vec<H>>>,
}

impl<H: Clone + PartialEq> PeerRegistry<H> {
    pub fn new() -> Self {
        Self {
            peers: RwLock::new(Table::with_capacity(16)),
        }
    }

    pub fn set(&self, host_port: &str, conn: H, outbound: bool) {
        let mut peers = self.peers.write();
        if peers.get(&host_port.to_string()).is_some() {
            log::warn!("peer {host_port} already has a connection; adding another");
        }
        let list = match peers.get_mut(&host_port.to_string()) {
            Some(list) => list,
            None => {
                peers.insert(host_port.to_string(), Vec::new());
                peers.get_mut(&host_port.to_string()).unwrap()
            }
        };
        if outbound {
            list.insert(0, conn);
        } else {
            list.push(conn);
        }
    }

    pub fn get(&self, host_port: &str) -> Option<H> {
        self.peers
            .read()
            .get(&host_port.to_string())
            .and_then(|list| list.first().cloned())
    }

    pub fn remove(&self, host_port: &str, conn: &H) {
        let mut peers = self.peers.write();
        if let Some(list) = peers.get_mut(&host_port.to_string()) {
            list.retain(|c| c != conn);
        }
    }

    pub fn all(&self) -> Vec<H> {
        let peers = self.peers.read();
        let mut all = Vec::new();
        for key in peers.keys() {
            if let Some(list) = peers.get(key) {
                all.extend(list.iter().cloned());
            }
        }
        all
    }
}

impl<H: Clone + PartialEq> Default for PeerRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outbound_is_preferred_over_inbound() {
        let registry: PeerRegistry<u32> = PeerRegistry::new();
        registry.set("host:1", 1, false);
        assert_eq!(registry.get("host:1"), Some(1));
        registry.set("host:1", 2, true);
        assert_eq!(registry.get("host:1"), Some(2));
    }

    #[test]
    fn remove_drops_the_matching_connection() {
        let registry: PeerRegistry<u32> = PeerRegistry::new();
        registry.set("host:1", 1, false);
        registry.remove("host:1", &1);
        assert_eq!(registry.get("host:1"), None);
    }
}
