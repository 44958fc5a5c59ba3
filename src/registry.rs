//! Connection registry
//!
//! Process-wide map from peer identifier to connection. Every operation runs
//! under a single `parking_lot::Mutex` around a plain `HashMap`; nothing else
//! guards the map. Deliveries made while the lock is held use `try_send`, so
//! the lock is never held across an await or a blocking send.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::connection::Connection;
use crate::error::RenameError;
use crate::message::{Diagnostic, ServerMessage};

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    /// Identifier -> Connection
    connections: Mutex<HashMap<String, Arc<Connection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection under its current identifier.
    ///
    /// Returns false, leaving the map untouched, if the identifier is
    /// already taken.
    pub fn register(&self, conn: &Arc<Connection>) -> bool {
        let mut connections = self.connections.lock();
        let identifier = conn.identifier();
        if connections.contains_key(&identifier) {
            debug!("Identifier {} already registered, rejecting", identifier);
            return false;
        }
        connections.insert(identifier, Arc::clone(conn));
        debug!("Total connections: {}", connections.len());
        true
    }

    /// Remove a connection, but only if its identifier still maps to it.
    pub fn unregister(&self, conn: &Connection) -> bool {
        let mut connections = self.connections.lock();
        let identifier = conn.identifier();
        let owned = connections
            .get(&identifier)
            .is_some_and(|stored| stored.id() == conn.id());
        if owned {
            connections.remove(&identifier);
            debug!("Total connections: {}", connections.len());
        }
        owned
    }

    /// Change a connection's identifier.
    ///
    /// Everyone else is told `User <old> changed ID to: <new>`. Key removal,
    /// key insertion and the identifier update all happen under one lock.
    pub fn rename(&self, conn: &Arc<Connection>, new_id: &str) -> Result<(), RenameError> {
        let mut connections = self.connections.lock();
        let old_id = conn.identifier();

        let registered = connections
            .get(&old_id)
            .is_some_and(|stored| stored.id() == conn.id());
        if !registered {
            return Err(RenameError::NotRegistered);
        }
        if old_id == new_id {
            return Ok(());
        }
        if connections.contains_key(new_id) {
            return Err(RenameError::InUse(new_id.to_string()));
        }

        fan_out(
            &connections,
            conn,
            ServerMessage::Renamed {
                old: old_id.clone(),
                new: new_id.to_string(),
            },
        );

        connections.remove(&old_id);
        conn.set_identifier(new_id.to_string());
        connections.insert(new_id.to_string(), Arc::clone(conn));

        info!("Client {} changed ID to {}", old_id, new_id);
        Ok(())
    }

    /// Queue `msg` for every registered connection except `sender`.
    pub fn broadcast_all(&self, sender: &Connection, msg: ServerMessage) {
        let connections = self.connections.lock();
        fan_out(&connections, sender, msg);
    }

    /// Queue `text` for the connection registered as `target`.
    ///
    /// An unknown target gets the sender a "doesn't exist" diagnostic.
    pub fn send_private(&self, sender: &Connection, target: &str, text: String) {
        let recipient = self.connections.lock().get(target).cloned();
        match recipient {
            Some(recipient) => {
                let msg = ServerMessage::Chat {
                    from: sender.identifier(),
                    text,
                };
                sender.relay_to(&recipient, msg);
            }
            None => {
                debug!("Private target {} not found", target);
                sender.notify(Diagnostic::NoSuchClient {
                    id: target.to_string(),
                });
            }
        }
    }

    pub fn get(&self, identifier: &str) -> Option<Arc<Connection>> {
        self.connections.lock().get(identifier).cloned()
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.connections.lock().contains_key(identifier)
    }

    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.lock().is_empty()
    }

    /// Sorted snapshot of registered identifiers
    pub fn identifiers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.connections.lock().keys().cloned().collect();
        ids.sort();
        ids
    }
}

/// Deliver `msg` to every connection in `connections` except `sender`.
fn fan_out(connections: &HashMap<String, Arc<Connection>>, sender: &Connection, msg: ServerMessage) {
    for target in connections.values() {
        if target.id() != sender.id() {
            sender.relay_to(target, msg.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Mailbox;
    use tokio_util::sync::CancellationToken;

    fn connection(identifier: &str) -> (Arc<Connection>, Mailbox) {
        Connection::new(identifier, 20, CancellationToken::new())
    }

    fn drain(mailbox: &mut Mailbox) -> Vec<String> {
        std::iter::from_fn(|| mailbox.try_recv())
            .map(|m| m.to_string())
            .collect()
    }

    fn text(line: &str) -> ServerMessage {
        ServerMessage::Text(line.to_string())
    }

    #[test]
    fn test_register_rejects_duplicate_identifier() {
        let registry = ConnectionRegistry::new();
        let (a, _a_box) = connection("10.0.0.1:1");
        let (b, _b_box) = connection("10.0.0.1:1");

        assert!(registry.register(&a));
        assert!(!registry.register(&b));
        assert!(!registry.register(&a));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("10.0.0.1:1").unwrap().id(), a.id());
    }

    #[test]
    fn test_concurrent_register_keeps_identifiers_unique() {
        let registry = Arc::new(ConnectionRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    let (conn, mailbox) = connection("shared");
                    (registry.register(&conn), mailbox)
                })
            })
            .collect();

        let accepted = handles
            .into_iter()
            .map(|h| h.join().unwrap().0)
            .filter(|ok| *ok)
            .count();
        assert_eq!(accepted, 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unregister_only_removes_same_connection() {
        let registry = ConnectionRegistry::new();
        let (a, _a_box) = connection("x");
        let (b, _b_box) = connection("x");

        registry.register(&a);
        assert!(!registry.unregister(&b));
        assert!(registry.contains("x"));
        assert!(registry.unregister(&a));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_broadcast_skips_sender() {
        let registry = ConnectionRegistry::new();
        let (a, mut a_box) = connection("a");
        let (b, mut b_box) = connection("b");
        let (c, mut c_box) = connection("c");
        for conn in [&a, &b, &c] {
            registry.register(conn);
        }

        registry.broadcast_all(&a, text("hi"));

        assert!(drain(&mut a_box).is_empty());
        assert_eq!(drain(&mut b_box), vec!["hi"]);
        assert_eq!(drain(&mut c_box), vec!["hi"]);
    }

    #[test]
    fn test_broadcast_full_recipient_does_not_abort() {
        let registry = ConnectionRegistry::new();
        let (a, mut a_box) = connection("a");
        let (slow, _slow_box) = Connection::new("slow", 1, CancellationToken::new());
        let (b, mut b_box) = connection("b");
        for conn in [&a, &slow, &b] {
            registry.register(conn);
        }

        registry.broadcast_all(&a, text("one"));
        registry.broadcast_all(&a, text("two"));

        assert_eq!(drain(&mut b_box), vec!["one", "two"]);
        assert_eq!(
            drain(&mut a_box),
            vec!["Client slow message queue is full, dropping the message!"]
        );
    }

    #[test]
    fn test_private_to_unknown_target() {
        let registry = ConnectionRegistry::new();
        let (a, mut a_box) = connection("a");
        let (b, mut b_box) = connection("b");
        registry.register(&a);
        registry.register(&b);

        registry.send_private(&a, "nobody", "hello".to_string());

        assert_eq!(
            drain(&mut a_box),
            vec!["Client nobody doesn't exist, dropping the message!"]
        );
        assert!(drain(&mut b_box).is_empty());
    }

    #[test]
    fn test_private_delivery() {
        let registry = ConnectionRegistry::new();
        let (a, mut a_box) = connection("a");
        let (b, mut b_box) = connection("b");
        registry.register(&a);
        registry.register(&b);

        registry.send_private(&a, "b", "psst".to_string());

        assert_eq!(drain(&mut b_box), vec!["a : psst"]);
        assert!(drain(&mut a_box).is_empty());
    }

    #[test]
    fn test_private_overflow_one_diagnostic_per_dropped_send() {
        let registry = ConnectionRegistry::new();
        let (a, mut a_box) = Connection::new("a", 40, CancellationToken::new());
        let (b, _stalled) = connection("b");
        registry.register(&a);
        registry.register(&b);

        for i in 0..23 {
            registry.send_private(&a, "b", i.to_string());
        }

        let diagnostics = drain(&mut a_box);
        assert_eq!(diagnostics.len(), 3);
        assert!(diagnostics
            .iter()
            .all(|d| d == "Client b message queue is full, dropping the message!"));
    }

    #[test]
    fn test_rename_migrates_key_and_notifies_others() {
        let registry = ConnectionRegistry::new();
        let (a, mut a_box) = connection("10.0.0.1:1");
        let (b, mut b_box) = connection("10.0.0.2:2");
        registry.register(&a);
        registry.register(&b);

        assert_eq!(registry.rename(&a, "alice"), Ok(()));

        assert_eq!(a.identifier(), "alice");
        assert_eq!(registry.identifiers(), vec!["10.0.0.2:2", "alice"]);
        assert_eq!(
            drain(&mut b_box),
            vec!["User 10.0.0.1:1 changed ID to: alice"]
        );
        assert!(drain(&mut a_box).is_empty());

        registry.send_private(&b, "alice", "hello".to_string());
        registry.send_private(&b, "10.0.0.1:1", "stale".to_string());
        assert_eq!(drain(&mut a_box), vec!["10.0.0.2:2 : hello"]);
        assert_eq!(
            drain(&mut b_box),
            vec!["Client 10.0.0.1:1 doesn't exist, dropping the message!"]
        );
    }

    #[test]
    fn test_rename_collision_is_rejected() {
        let registry = ConnectionRegistry::new();
        let (a, _a_box) = connection("a");
        let (b, mut b_box) = connection("b");
        registry.register(&a);
        registry.register(&b);

        assert_eq!(
            registry.rename(&a, "b"),
            Err(RenameError::InUse("b".to_string()))
        );
        assert_eq!(a.identifier(), "a");
        assert_eq!(registry.get("b").unwrap().id(), b.id());
        assert!(drain(&mut b_box).is_empty());
    }

    #[test]
    fn test_rename_to_same_identifier_is_noop() {
        let registry = ConnectionRegistry::new();
        let (a, _a_box) = connection("a");
        let (b, mut b_box) = connection("b");
        registry.register(&a);
        registry.register(&b);

        assert_eq!(registry.rename(&a, "a"), Ok(()));
        assert!(drain(&mut b_box).is_empty());
    }

    #[test]
    fn test_rename_unregistered_connection() {
        let registry = ConnectionRegistry::new();
        let (a, _a_box) = connection("a");

        assert_eq!(registry.rename(&a, "alice"), Err(RenameError::NotRegistered));
        assert_eq!(a.identifier(), "a");
    }

    #[test]
    fn test_unregister_after_rename() {
        let registry = ConnectionRegistry::new();
        let (a, _a_box) = connection("a");
        registry.register(&a);
        registry.rename(&a, "alice").unwrap();

        assert!(registry.unregister(&a));
        assert!(registry.is_empty());
    }
}
