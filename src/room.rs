//! Rooms and the room registry
//!
//! A room is a named group of connections created lazily by the first
//! `#JR`. Membership holds direct references keyed by `ConnectionId`, so a
//! member that renames keeps receiving room traffic and is shown under its
//! current identifier.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::connection::Connection;
use crate::message::ServerMessage;
use crate::registry::ConnectionRegistry;
use crate::types::{ConnectionId, RoomName};

/// Named chat room
#[derive(Debug)]
pub struct Room {
    name: RoomName,
    /// ConnectionId -> member
    members: Mutex<HashMap<ConnectionId, Arc<Connection>>>,
}

impl Room {
    /// Create a room whose sole member is `first`
    pub fn new(name: RoomName, first: &Arc<Connection>) -> Self {
        let mut members = HashMap::new();
        members.insert(first.id(), Arc::clone(first));
        Self {
            name,
            members: Mutex::new(members),
        }
    }

    pub fn name(&self) -> &RoomName {
        &self.name
    }

    /// Add a member. Returns false if it already is one.
    pub fn add_member(&self, conn: &Arc<Connection>) -> bool {
        let mut members = self.members.lock();
        if members.contains_key(&conn.id()) {
            return false;
        }
        members.insert(conn.id(), Arc::clone(conn));
        true
    }

    pub fn remove_member(&self, conn: &Connection) -> bool {
        self.members.lock().remove(&conn.id()).is_some()
    }

    pub fn contains(&self, conn: &Connection) -> bool {
        self.members.lock().contains_key(&conn.id())
    }

    pub fn member_count(&self) -> usize {
        self.members.lock().len()
    }

    /// Current identifiers of all members, sorted
    pub fn member_labels(&self) -> Vec<String> {
        let mut labels: Vec<String> = self
            .members
            .lock()
            .values()
            .map(|m| m.identifier())
            .collect();
        labels.sort();
        labels
    }

    /// Queue a room-tagged line for every member except `sender`.
    ///
    /// The sender does not have to be a member.
    pub fn broadcast(&self, sender: &Connection, text: &str) {
        let msg = ServerMessage::Room {
            from: sender.identifier(),
            room: self.name.clone(),
            text: text.to_string(),
        };
        let members = self.members.lock();
        for member in members.values() {
            if member.id() != sender.id() {
                sender.relay_to(member, msg.clone());
            }
        }
    }
}

/// Result of a join request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// The room did not exist and was created with the joiner in it
    Created,
    /// The joiner was added to an existing room
    Joined,
    /// The joiner was already a member, nothing changed
    AlreadyMember,
}

/// Process-wide map from room name to room
///
/// Guarded by one `parking_lot::Mutex`. Lock order is registry map, then
/// room members; the connection registry is only touched after both are
/// released.
#[derive(Debug)]
pub struct RoomRegistry {
    rooms: Mutex<HashMap<RoomName, Arc<Room>>>,
    connections: Arc<ConnectionRegistry>,
}

impl RoomRegistry {
    pub fn new(connections: Arc<ConnectionRegistry>) -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
            connections,
        }
    }

    /// Join `name`, creating it if needed.
    ///
    /// A successful join is announced to every other registered connection,
    /// not only to the room.
    pub fn join_or_create(&self, name: &RoomName, sender: &Arc<Connection>) -> JoinOutcome {
        let outcome = {
            let mut rooms = self.rooms.lock();
            match rooms.get(name).cloned() {
                Some(room) => {
                    if room.add_member(sender) {
                        JoinOutcome::Joined
                    } else {
                        JoinOutcome::AlreadyMember
                    }
                }
                None => {
                    rooms.insert(name.clone(), Arc::new(Room::new(name.clone(), sender)));
                    debug!("Total rooms: {}", rooms.len());
                    JoinOutcome::Created
                }
            }
        };

        if outcome != JoinOutcome::AlreadyMember {
            sender.remember_room(name.clone());
            let who = sender.identifier();
            info!("Client {} joined room {} ({:?})", who, name, outcome);
            self.connections.broadcast_all(
                sender,
                ServerMessage::JoinedRoom {
                    who,
                    room: name.clone(),
                },
            );
        }
        outcome
    }

    /// Send `text` to the members of `name`.
    ///
    /// Returns false if no such room exists.
    pub fn send_to_room(&self, name: &RoomName, sender: &Connection, text: &str) -> bool {
        let Some(room) = self.get(name) else {
            return false;
        };
        room.broadcast(sender, text);
        true
    }

    /// Remove `conn` from every room it joined. Rooms are kept even when
    /// they end up empty.
    pub fn leave_all(&self, conn: &Connection) -> usize {
        let joined = conn.take_rooms();
        let rooms = self.rooms.lock();
        let mut left = 0;
        for name in &joined {
            if rooms.get(name).is_some_and(|room| room.remove_member(conn)) {
                left += 1;
            }
        }
        if left > 0 {
            debug!("Client {} left {} room(s)", conn.identifier(), left);
        }
        left
    }

    pub fn get(&self, name: &RoomName) -> Option<Arc<Room>> {
        self.rooms.lock().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.rooms.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Mailbox;
    use tokio_util::sync::CancellationToken;

    struct Fixture {
        connections: Arc<ConnectionRegistry>,
        rooms: RoomRegistry,
    }

    impl Fixture {
        fn new() -> Self {
            let connections = Arc::new(ConnectionRegistry::new());
            let rooms = RoomRegistry::new(Arc::clone(&connections));
            Self { connections, rooms }
        }

        fn connect(&self, identifier: &str) -> (Arc<Connection>, Mailbox) {
            let (conn, mailbox) = Connection::new(identifier, 20, CancellationToken::new());
            assert!(self.connections.register(&conn));
            (conn, mailbox)
        }
    }

    fn drain(mailbox: &mut Mailbox) -> Vec<String> {
        std::iter::from_fn(|| mailbox.try_recv())
            .map(|m| m.to_string())
            .collect()
    }

    #[test]
    fn test_room_creation() {
        let (host, _host_box) = Connection::new("host", 20, CancellationToken::new());
        let room = Room::new(RoomName::from("lobby"), &host);

        assert_eq!(room.name(), &RoomName::from("lobby"));
        assert_eq!(room.member_count(), 1);
        assert!(room.contains(&host));
    }

    #[test]
    fn test_add_member_rejects_duplicate() {
        let (host, _host_box) = Connection::new("host", 20, CancellationToken::new());
        let (guest, _guest_box) = Connection::new("guest", 20, CancellationToken::new());
        let room = Room::new(RoomName::from("lobby"), &host);

        assert!(room.add_member(&guest));
        assert!(!room.add_member(&guest));
        assert!(!room.add_member(&host));
        assert_eq!(room.member_count(), 2);
    }

    #[test]
    fn test_join_creates_room_with_sole_member() {
        let fx = Fixture::new();
        let (a, _a_box) = fx.connect("a");

        assert_eq!(fx.rooms.join_or_create(&RoomName::from("lobby"), &a), JoinOutcome::Created);

        let room = fx.rooms.get(&RoomName::from("lobby")).unwrap();
        assert_eq!(room.member_count(), 1);
        assert!(room.contains(&a));
        assert_eq!(a.rooms(), vec![RoomName::from("lobby")]);
    }

    #[test]
    fn test_second_join_adds_member_without_new_room() {
        let fx = Fixture::new();
        let (a, _a_box) = fx.connect("a");
        let (b, _b_box) = fx.connect("b");
        let lobby = RoomName::from("lobby");

        fx.rooms.join_or_create(&lobby, &a);
        assert_eq!(fx.rooms.join_or_create(&lobby, &b), JoinOutcome::Joined);
        assert_eq!(fx.rooms.join_or_create(&lobby, &b), JoinOutcome::AlreadyMember);

        assert_eq!(fx.rooms.len(), 1);
        assert_eq!(fx.rooms.get(&lobby).unwrap().member_labels(), vec!["a", "b"]);
    }

    #[test]
    fn test_join_is_announced_globally() {
        let fx = Fixture::new();
        let (a, mut a_box) = fx.connect("a");
        let (_b, mut b_box) = fx.connect("b");

        fx.rooms.join_or_create(&RoomName::from("lobby"), &a);

        assert!(drain(&mut a_box).is_empty());
        assert_eq!(drain(&mut b_box), vec!["User a joined room lobby"]);

        fx.rooms.join_or_create(&RoomName::from("lobby"), &a);
        assert!(drain(&mut b_box).is_empty());
    }

    #[test]
    fn test_room_send_reaches_members_only() {
        let fx = Fixture::new();
        let (a, mut a_box) = fx.connect("a");
        let (b, mut b_box) = fx.connect("b");
        let (c, mut c_box) = fx.connect("c");
        let (_outsider, mut outsider_box) = fx.connect("d");
        let lobby = RoomName::from("lobby");
        for conn in [&a, &b, &c] {
            fx.rooms.join_or_create(&lobby, conn);
        }
        for mailbox in [&mut a_box, &mut b_box, &mut c_box, &mut outsider_box] {
            drain(mailbox);
        }

        assert!(fx.rooms.send_to_room(&lobby, &a, "hi"));

        assert!(drain(&mut a_box).is_empty());
        assert_eq!(drain(&mut b_box), vec!["FROM a, ROOM lobby: hi"]);
        assert_eq!(drain(&mut c_box), vec!["FROM a, ROOM lobby: hi"]);
        assert!(drain(&mut outsider_box).is_empty());
    }

    #[test]
    fn test_non_member_can_send_to_room() {
        let fx = Fixture::new();
        let (a, mut a_box) = fx.connect("a");
        let (outsider, _outsider_box) = fx.connect("o");
        let lobby = RoomName::from("lobby");
        fx.rooms.join_or_create(&lobby, &a);

        assert!(fx.rooms.send_to_room(&lobby, &outsider, "knock"));
        assert_eq!(drain(&mut a_box), vec!["FROM o, ROOM lobby: knock"]);
    }

    #[test]
    fn test_send_to_unknown_room() {
        let fx = Fixture::new();
        let (a, mut a_box) = fx.connect("a");

        assert!(!fx.rooms.send_to_room(&RoomName::from("void"), &a, "hello"));
        assert!(drain(&mut a_box).is_empty());
    }

    #[test]
    fn test_room_label_follows_rename() {
        let fx = Fixture::new();
        let (a, _a_box) = fx.connect("a");
        let (b, mut b_box) = fx.connect("b");
        let lobby = RoomName::from("lobby");
        fx.rooms.join_or_create(&lobby, &a);
        fx.rooms.join_or_create(&lobby, &b);
        fx.connections.rename(&a, "alice").unwrap();
        drain(&mut b_box);

        fx.rooms.send_to_room(&lobby, &a, "renamed");

        assert_eq!(drain(&mut b_box), vec!["FROM alice, ROOM lobby: renamed"]);
        assert_eq!(fx.rooms.get(&lobby).unwrap().member_labels(), vec!["alice", "b"]);
    }

    #[test]
    fn test_leave_all_keeps_rooms() {
        let fx = Fixture::new();
        let (a, _a_box) = fx.connect("a");
        let (b, mut b_box) = fx.connect("b");
        fx.rooms.join_or_create(&RoomName::from("lobby"), &a);
        fx.rooms.join_or_create(&RoomName::from("dev"), &a);
        fx.rooms.join_or_create(&RoomName::from("lobby"), &b);

        assert_eq!(fx.rooms.leave_all(&a), 2);
        assert!(a.rooms().is_empty());
        assert_eq!(fx.rooms.len(), 2);
        assert_eq!(fx.rooms.get(&RoomName::from("dev")).unwrap().member_count(), 0);

        drain(&mut b_box);
        fx.rooms.send_to_room(&RoomName::from("lobby"), &b, "anyone?");
        assert!(!fx.rooms.get(&RoomName::from("lobby")).unwrap().contains(&a));
    }
}
