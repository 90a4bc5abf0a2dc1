//! Client registry implementation

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use crate::transport::{Connection, ConnectionId, ConnectionPhase};

/// Point-in-time view of one registered client
#[derive(Debug, Clone)]
pub struct ClientInfo {
    /// Connection handle
    pub id: ConnectionId,
    /// Remote address, if known
    pub peer_addr: Option<SocketAddr>,
    /// Current lifecycle phase
    pub phase: ConnectionPhase,
    /// Bytes written to this client
    pub bytes_sent: u64,
    /// Time since the client was accepted
    pub uptime: Duration,
}

/// Concurrency-safe set of open server-side connections
///
/// Inserted into by the accept loop, removed from by broadcast and by the
/// per-connection liveness task. A connection is never shared between two
/// registries.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection. Returns false if the id is already registered.
    pub fn insert(&self, connection: Arc<Connection>) -> bool {
        let id = connection.id();
        let mut clients = self.clients.write();

        if clients.contains_key(&id) {
            return false;
        }
        clients.insert(id, connection);

        tracing::debug!(connection_id = %id, clients = clients.len(), "Client registered");
        true
    }

    /// Remove a connection.
    ///
    /// Returns the connection only to the caller that actually removed it, so
    /// concurrent failure paths agree on who closes it.
    pub fn remove(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        let mut clients = self.clients.write();
        let removed = clients.remove(&id);

        if removed.is_some() {
            tracing::debug!(connection_id = %id, clients = clients.len(), "Client unregistered");
        }
        removed
    }

    /// Copy the current membership
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.clients.read().values().cloned().collect()
    }

    /// Remove and return every connection
    pub fn drain(&self) -> Vec<Arc<Connection>> {
        self.clients.write().drain().map(|(_, conn)| conn).collect()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.clients.read().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.clients.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.read().is_empty()
    }

    /// Per-client statistics
    pub fn clients(&self) -> Vec<ClientInfo> {
        self.snapshot()
            .iter()
            .map(|conn| ClientInfo {
                id: conn.id(),
                peer_addr: conn.peer_addr(),
                phase: conn.phase(),
                bytes_sent: conn.bytes_sent(),
                uptime: conn.uptime(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::duplex;

    use super::*;
    use crate::transport::ConnectionOptions;

    fn connection(id: u64) -> Arc<Connection> {
        let (a, _b) = duplex(64);
        let conn = Connection::from_stream(ConnectionId(id), a, None, ConnectionOptions::default());
        conn.open();
        Arc::new(conn)
    }

    #[test]
    fn test_insert_remove() {
        let registry = ClientRegistry::new();

        assert!(registry.insert(connection(1)));
        assert!(registry.insert(connection(2)));
        assert_eq!(registry.len(), 2);
        assert!(registry.contains(ConnectionId(1)));

        assert!(registry.remove(ConnectionId(1)).is_some());
        assert!(registry.remove(ConnectionId(1)).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_insert_rejected() {
        let registry = ClientRegistry::new();

        assert!(registry.insert(connection(1)));
        assert!(!registry.insert(connection(1)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_snapshot_is_independent() {
        let registry = ClientRegistry::new();
        registry.insert(connection(1));
        registry.insert(connection(2));

        let snapshot = registry.snapshot();
        registry.remove(ConnectionId(1));
        registry.insert(connection(3));

        assert_eq!(snapshot.len(), 2);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_drain() {
        let registry = ClientRegistry::new();
        registry.insert(connection(1));
        registry.insert(connection(2));

        let drained = registry.drain();
        assert_eq!(drained.len(), 2);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_client_info() {
        let registry = ClientRegistry::new();
        registry.insert(connection(7));

        let info = registry.clients();
        assert_eq!(info.len(), 1);
        assert_eq!(info[0].id, ConnectionId(7));
        assert_eq!(info[0].phase, ConnectionPhase::Open);
        assert_eq!(info[0].bytes_sent, 0);
    }
}
