//! Connection registry.
//!
//! Tracks which username maps to which live transport handle. An entry exists
//! only while the socket is open and is removed immediately on disconnect;
//! reconnection grace for in-progress games is handled by the session layer,
//! not here.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tracing::debug;

use crate::message::ServerMessage;

/// Handle to one connected player's outbound message stream.
///
/// Sends are fire-and-forget: the websocket writer task drains the channel.
/// A closed channel means the connection is already gone, so the message is
/// dropped with a log line rather than retried.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    pub username: String,
    tx: mpsc::UnboundedSender<ServerMessage>,
}

impl ClientHandle {
    pub fn new(username: String, tx: mpsc::UnboundedSender<ServerMessage>) -> Self {
        Self { username, tx }
    }

    /// Queue a message for delivery.
    pub fn send(&self, message: ServerMessage) {
        if self.tx.send(message).is_err() {
            debug!(username = %self.username, "dropping message for closed connection");
        }
    }
}

/// Connection registry: username to live handle.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    clients: HashMap<String, ClientHandle>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handle, replacing any previous connection for the name.
    pub fn insert(&mut self, handle: ClientHandle) {
        self.clients.insert(handle.username.clone(), handle);
    }

    /// Get a clone of a player's handle.
    pub fn get(&self, username: &str) -> Option<ClientHandle> {
        self.clients.get(username).cloned()
    }

    /// Remove a player's handle on disconnect.
    pub fn remove(&mut self, username: &str) -> Option<ClientHandle> {
        self.clients.remove(username)
    }

    pub fn contains(&self, username: &str) -> bool {
        self.clients.contains_key(username)
    }

    pub fn count(&self) -> usize {
        self.clients.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn handle(name: &str) -> (ClientHandle, mpsc::UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ClientHandle::new(name.to_string(), tx), rx)
    }

    #[test]
    fn test_registry_insert_get_remove() {
        let mut registry = ConnectionRegistry::new();
        let (h, _rx) = handle("alice");
        registry.insert(h);

        assert!(registry.contains("alice"));
        assert_eq!(registry.count(), 1);
        assert!(registry.get("alice").is_some());

        registry.remove("alice");
        assert!(!registry.contains("alice"));
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_send_delivers() {
        let (h, mut rx) = handle("alice");
        h.send(ServerMessage::Waiting { timeout: 15 });
        assert_eq!(rx.try_recv().unwrap(), ServerMessage::Waiting { timeout: 15 });
    }

    #[test]
    fn test_send_to_closed_channel_is_silent() {
        let (h, rx) = handle("alice");
        drop(rx);
        // Must not panic or error
        h.send(ServerMessage::Waiting { timeout: 15 });
    }
}
