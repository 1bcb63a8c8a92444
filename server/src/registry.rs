//! The set of live connections
//!
//! [`ClientRegistry`] is plain data with no locking of its own; the
//! dispatcher wraps it in a reader/writer lock so broadcasts share access and
//! connects/disconnects take it exclusively.

use crate::connection::{Connection, ConnectionId};
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct ClientRegistry {
    connections: HashMap<ConnectionId, Connection>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection. Returns false, leaving the registry unchanged,
    /// if the id is already present.
    pub fn insert(&mut self, connection: Connection) -> bool {
        let id = connection.id();
        if self.connections.contains_key(&id) {
            return false;
        }
        self.connections.insert(id, connection);
        true
    }

    /// Removes a connection; `None` if it was already gone
    pub fn remove(&mut self, id: &ConnectionId) -> Option<Connection> {
        self.connections.remove(id)
    }

    pub fn get(&self, id: &ConnectionId) -> Option<&Connection> {
        self.connections.get(id)
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    /// Registered ids in ascending order
    pub fn ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = self.connections.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Empties the registry, handing back every connection
    pub fn drain(&mut self) -> Vec<Connection> {
        self.connections.drain().map(|(_, connection)| connection).collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
