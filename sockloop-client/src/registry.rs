//! Connection registry
//!
//! Maps connection ids to live connections so transport events can be routed
//! back to them. The registry becoming empty is what stops the network thread.

use crate::connection::Connection;
use sockloop_core::ConnectionId;
use std::collections::HashMap;
use std::sync::Arc;

/// Registry statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Connections currently registered
    pub active_connections: usize,
    /// Connections registered since the client was created
    pub total_connections: u64,
    /// Peak number of concurrent connections
    pub peak_connections: usize,
}

/// Live connections by id
#[derive(Debug, Default)]
pub(crate) struct Registry {
    connections: HashMap<ConnectionId, Arc<Connection>>,
    stats: RegistryStats,
}

impl Registry {
    /// Add a connection
    pub(crate) fn insert(&mut self, connection: Arc<Connection>) {
        self.connections.insert(connection.id(), connection);
        self.stats.active_connections = self.connections.len();
        self.stats.total_connections += 1;
        self.stats.peak_connections = self.stats.peak_connections.max(self.connections.len());
    }

    /// Remove a connection
    pub(crate) fn remove(&mut self, id: ConnectionId) -> Option<Arc<Connection>> {
        let removed = self.connections.remove(&id);
        self.stats.active_connections = self.connections.len();
        removed
    }

    /// Get connection by id
    pub(crate) fn get(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections.get(&id).cloned()
    }

    /// Snapshot of every registered connection
    pub(crate) fn connections(&self) -> Vec<Arc<Connection>> {
        self.connections.values().cloned().collect()
    }

    /// Current connection count
    pub(crate) fn len(&self) -> usize {
        self.connections.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub(crate) fn stats(&self) -> RegistryStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::delegate::WebSocketDelegate;
    use crate::looper;
    use sockloop_core::ConnectRequest;

    struct Silent;
    impl WebSocketDelegate for Silent {}

    fn connection() -> Arc<Connection> {
        let (commands, _looper) = looper::channel::<(), _>();
        let request = ConnectRequest::parse("ws://localhost/", &[] as &[&str], None::<&str>).unwrap();
        Arc::new(Connection::new(
            ConnectionId::next(),
            request,
            Arc::new(Silent),
            commands,
            &ClientConfig::default(),
        ))
    }

    #[test]
    fn test_insert_lookup_remove() {
        let mut registry = Registry::default();
        let a = connection();
        let b = connection();

        registry.insert(Arc::clone(&a));
        registry.insert(Arc::clone(&b));
        assert_eq!(registry.len(), 2);
        assert!(registry.get(a.id()).is_some());

        assert!(registry.remove(a.id()).is_some());
        assert!(registry.remove(a.id()).is_none());
        assert!(registry.get(a.id()).is_none());
        assert_eq!(registry.len(), 1);
        assert!(!registry.is_empty());

        registry.remove(b.id());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_stats() {
        let mut registry = Registry::default();
        let a = connection();
        let b = connection();

        registry.insert(Arc::clone(&a));
        registry.insert(Arc::clone(&b));
        registry.remove(a.id());
        registry.insert(connection());

        let stats = registry.stats();
        assert_eq!(stats.active_connections, 2);
        assert_eq!(stats.total_connections, 3);
        assert_eq!(stats.peak_connections, 2);
    }
}
