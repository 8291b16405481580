//! Caller-side ownership of locally registered clients.

use std::collections::HashMap;

use log::debug;

use crate::protocol::ClientRecord;

/// Owns every [`ClientRecord`] for the lifetime of its client.
///
/// The router never mutates this; it reads snapshots through
/// [`crate::message_router::ClientDelegate`].
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: HashMap<String, ClientRecord>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a client announcing itself. Re-registering keeps the connected flag.
    pub fn register(&mut self, record: ClientRecord) {
        match self.clients.get_mut(&record.client_id) {
            Some(existing) => {
                existing.origin = record.origin;
                existing.tab_id = record.tab_id;
            }
            None => {
                debug!("ClientRegistry: registered client {}", record.client_id);
                self.clients.insert(record.client_id.clone(), record);
            }
        }
    }

    /// Records a `client_connect` handshake. Returns `false` for unknown ids.
    pub fn mark_connected(&mut self, client_id: &str) -> bool {
        match self.clients.get_mut(client_id) {
            Some(record) => {
                record.connected = true;
                true
            }
            None => false,
        }
    }

    pub fn detach(&mut self, client_id: &str) -> Option<ClientRecord> {
        let removed = self.clients.remove(client_id);
        if removed.is_some() {
            debug!("ClientRegistry: detached client {}", client_id);
        }
        removed
    }

    pub fn get(&self, client_id: &str) -> Option<&ClientRecord> {
        self.clients.get(client_id)
    }

    pub fn snapshot(&self) -> HashMap<String, ClientRecord> {
        self.clients.clone()
    }
}
