//! Connection struct definition
//!
//! Represents one accepted peer: its mutable identifier, its bounded outbound
//! mailbox, the rooms it has joined and the token that ends its lifecycle.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::DeliveryError;
use crate::message::{Diagnostic, ServerMessage};
use crate::types::{ConnectionId, RoomName};

/// Default mailbox capacity
pub const DEFAULT_MAILBOX_CAPACITY: usize = 20;

/// Connected peer
///
/// Shared as `Arc<Connection>` between both registries, every room it joined
/// and its own reader task. Only the writer task owns the receiving end of
/// the mailbox (see [`Mailbox`]).
#[derive(Debug)]
pub struct Connection {
    /// Stable identity, never changes
    id: ConnectionId,
    /// Peer-visible identifier, `<ip>:<port>` until renamed
    identifier: RwLock<String>,
    /// Outbound mailbox (bounded)
    sender: mpsc::Sender<ServerMessage>,
    /// Names of rooms this connection joined, for teardown cleanup
    rooms: Mutex<HashSet<RoomName>>,
    /// Cancelled once the connection starts draining
    closing: CancellationToken,
}

/// Receiving end of a connection's mailbox, drained by its writer task
#[derive(Debug)]
pub struct Mailbox {
    receiver: mpsc::Receiver<ServerMessage>,
}

impl Mailbox {
    /// Wait for the next queued message
    ///
    /// Returns `None` only after every sender is gone.
    pub async fn recv(&mut self) -> Option<ServerMessage> {
        self.receiver.recv().await
    }

    /// Take a queued message without waiting
    pub fn try_recv(&mut self) -> Option<ServerMessage> {
        self.receiver.try_recv().ok()
    }
}

impl Connection {
    /// Create a new connection with a mailbox of `capacity` slots.
    ///
    /// `closing` is usually a child of the server-wide shutdown token.
    pub fn new(
        identifier: impl Into<String>,
        capacity: usize,
        closing: CancellationToken,
    ) -> (Arc<Self>, Mailbox) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let connection = Arc::new(Self {
            id: ConnectionId::new(),
            identifier: RwLock::new(identifier.into()),
            sender,
            rooms: Mutex::new(HashSet::new()),
            closing,
        });
        (connection, Mailbox { receiver })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Current peer-visible identifier
    pub fn identifier(&self) -> String {
        self.identifier.read().clone()
    }

    /// Replace the identifier, returning the previous one.
    ///
    /// Only the connection registry calls this, while holding its own lock,
    /// so the registry key and the identifier change together.
    pub(crate) fn set_identifier(&self, new_id: String) -> String {
        std::mem::replace(&mut *self.identifier.write(), new_id)
    }

    /// Queue a message without waiting
    pub fn deliver(&self, msg: ServerMessage) -> Result<(), DeliveryError> {
        self.sender.try_send(msg).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::MailboxFull,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// Queue `msg` for `target` on behalf of this connection.
    ///
    /// A full target mailbox drops the message and tells this connection
    /// which target missed it. A closed target is skipped silently.
    pub fn relay_to(&self, target: &Connection, msg: ServerMessage) {
        match target.deliver(msg) {
            Ok(()) => {}
            Err(DeliveryError::MailboxFull) => {
                let id = target.identifier();
                warn!("Mailbox of {} is full, dropping message from {}", id, self.identifier());
                self.notify(Diagnostic::QueueFull { id });
            }
            Err(DeliveryError::Closed) => {
                debug!("Mailbox of {} is closed, skipping", target.identifier());
            }
        }
    }

    /// Inject a diagnostic into this connection's own stream
    pub fn notify(&self, diagnostic: Diagnostic) {
        if let Err(e) = self.deliver(diagnostic.into()) {
            debug!("Diagnostic for {} dropped: {}", self.identifier(), e);
        }
    }

    pub fn closing(&self) -> &CancellationToken {
        &self.closing
    }

    /// Start draining: the reader stops, the writer flushes and exits
    pub fn close(&self) {
        self.closing.cancel();
    }

    pub fn is_closing(&self) -> bool {
        self.closing.is_cancelled()
    }

    /// Record a joined room. Returns false if it was already recorded.
    pub(crate) fn remember_room(&self, room: RoomName) -> bool {
        self.rooms.lock().insert(room)
    }

    /// Drain the joined-room set
    pub(crate) fn take_rooms(&self) -> Vec<RoomName> {
        self.rooms.lock().drain().collect()
    }

    /// Snapshot of joined room names
    pub fn rooms(&self) -> Vec<RoomName> {
        let mut rooms: Vec<RoomName> = self.rooms.lock().iter().cloned().collect();
        rooms.sort();
        rooms
    }
}
