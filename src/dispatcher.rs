//! Command dispatcher
//!
//! Interprets one line of client input against the shared registries.
//! Runs synchronously on the sender's reader task; nothing here waits.

use std::sync::Arc;

use tracing::{debug, info};

use crate::connection::Connection;
use crate::error::RenameError;
use crate::message::{ClientCommand, Diagnostic, ServerMessage};
use crate::registry::ConnectionRegistry;
use crate::room::{JoinOutcome, RoomRegistry};

/// Shared routing state handed to every connection
#[derive(Debug, Clone)]
pub struct Dispatcher {
    connections: Arc<ConnectionRegistry>,
    rooms: Arc<RoomRegistry>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    /// Create a dispatcher with empty registries
    pub fn new() -> Self {
        let connections = Arc::new(ConnectionRegistry::new());
        let rooms = Arc::new(RoomRegistry::new(Arc::clone(&connections)));
        Self { connections, rooms }
    }

    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    pub fn rooms(&self) -> &RoomRegistry {
        &self.rooms
    }

    /// Parse and execute one line from `sender`
    pub fn dispatch(&self, sender: &Arc<Connection>, line: &str) {
        debug!("From client {}: {}", sender.identifier(), line);
        self.execute(sender, ClientCommand::parse(line));
    }

    /// Execute an already parsed command
    pub fn execute(&self, sender: &Arc<Connection>, cmd: ClientCommand) {
        match cmd {
            ClientCommand::Broadcast { text } => {
                self.connections.broadcast_all(sender, ServerMessage::Text(text));
            }
            ClientCommand::Private { target, text } => {
                self.connections.send_private(sender, &target, text);
            }
            ClientCommand::Rename { new_id } => {
                match self.connections.rename(sender, &new_id) {
                    Ok(()) => {}
                    Err(RenameError::InUse(id)) => {
                        sender.notify(Diagnostic::IdInUse { id });
                    }
                    Err(RenameError::NotRegistered) => {
                        debug!("Rename from unregistered client {}", sender.identifier());
                    }
                }
            }
            ClientCommand::JoinRoom { room } => {
                if self.rooms.join_or_create(&room, sender) == JoinOutcome::AlreadyMember {
                    sender.notify(Diagnostic::AlreadyInRoom { room });
                }
            }
            ClientCommand::RoomMessage { room, text } => {
                if !self.rooms.send_to_room(&room, sender, &text) {
                    sender.notify(Diagnostic::NoSuchRoom { room });
                }
            }
            ClientCommand::Unknown { command } => {
                info!("Invalid command {} from {}", command, sender.identifier());
            }
            ClientCommand::Invalid(diagnostic) => {
                sender.notify(diagnostic);
            }
        }
    }
}
