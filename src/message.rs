//! Message protocol definitions
//!
//! Line-based protocol. Client input is parsed into a `ClientCommand`;
//! everything the server queues for a peer is a structured `ServerMessage`
//! that renders to its wire line through `Display`.

use std::fmt;

use crate::types::RoomName;

/// Client → Server command
///
/// One parsed line of client input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    /// Plain text, relayed to every other connection
    Broadcast { text: String },
    /// `#PM <id> <text...>`
    Private { target: String, text: String },
    /// `#CN <newID>`
    Rename { new_id: String },
    /// `#JR <room>`
    JoinRoom { room: RoomName },
    /// `#MR <room> <text...>`
    RoomMessage { room: RoomName, text: String },
    /// A `#` line with an unrecognized command word
    Unknown { command: String },
    /// A recognized command missing its required argument
    Invalid(Diagnostic),
}

impl ClientCommand {
    /// Parse one line of client input.
    ///
    /// Lines starting with `#` are commands split on whitespace: token 0 is
    /// the command word, token 1 the target and tokens 2.. the payload,
    /// rejoined with single spaces. Anything else is a plain broadcast.
    pub fn parse(line: &str) -> Self {
        if !line.starts_with('#') {
            return ClientCommand::Broadcast {
                text: line.to_string(),
            };
        }

        let tokens: Vec<&str> = line.split_whitespace().collect();
        let command = tokens.first().copied().unwrap_or("#");
        let target = tokens.get(1).copied();
        let payload = || tokens.get(2..).map(|rest| rest.join(" ")).unwrap_or_default();

        match (command, target) {
            ("#PM", Some(target)) => ClientCommand::Private {
                target: target.to_string(),
                text: payload(),
            },
            ("#PM", None) => ClientCommand::Invalid(Diagnostic::MissingReceiver),
            ("#CN", Some(new_id)) => ClientCommand::Rename {
                new_id: new_id.to_string(),
            },
            ("#CN", None) => ClientCommand::Invalid(Diagnostic::MissingNewId),
            ("#JR", Some(room)) => ClientCommand::JoinRoom {
                room: RoomName::from(room),
            },
            ("#MR", Some(room)) => ClientCommand::RoomMessage {
                room: RoomName::from(room),
                text: payload(),
            },
            ("#JR" | "#MR", None) => ClientCommand::Invalid(Diagnostic::MissingRoom),
            (other, _) => ClientCommand::Unknown {
                command: other.to_string(),
            },
        }
    }
}

/// Server → Client message
///
/// Everything that ends up in a mailbox. Rendered to a single line (without
/// terminator) by `Display`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    /// First greeting line, names the assigned identifier
    Greeting { identifier: String },
    /// Second greeting line, lists the supported commands
    Help,
    /// Plain broadcast, relayed verbatim
    Text(String),
    /// Private message
    Chat { from: String, text: String },
    /// Room-scoped message
    Room {
        from: String,
        room: RoomName,
        text: String,
    },
    /// Someone changed their identifier
    Renamed { old: String, new: String },
    /// Someone joined a room
    JoinedRoom { who: String, room: RoomName },
    /// Protocol or delivery problem reported to the sender
    Diagnostic(Diagnostic),
}

impl fmt::Display for ServerMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerMessage::Greeting { identifier } => {
                write!(f, "You are connected from {}", identifier)
            }
            ServerMessage::Help => f.write_str(
                "Commands: #PM <id> <message> | #CN <new id> | #JR <room> | #MR <room> <message>",
            ),
            ServerMessage::Text(text) => f.write_str(text),
            ServerMessage::Chat { from, text } => write!(f, "{} : {}", from, text),
            ServerMessage::Room { from, room, text } => {
                write!(f, "FROM {}, ROOM {}: {}", from, room, text)
            }
            ServerMessage::Renamed { old, new } => {
                write!(f, "User {} changed ID to: {}", old, new)
            }
            ServerMessage::JoinedRoom { who, room } => {
                write!(f, "User {} joined room {}", who, room)
            }
            ServerMessage::Diagnostic(diagnostic) => fmt::Display::fmt(diagnostic, f),
        }
    }
}

impl From<Diagnostic> for ServerMessage {
    fn from(diagnostic: Diagnostic) -> Self {
        ServerMessage::Diagnostic(diagnostic)
    }
}

/// Diagnostics injected into the sender's own stream
///
/// They travel in-band as ordinary lines; there is no separate error channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// `#PM` without a target
    MissingReceiver,
    /// `#CN` without a new identifier
    MissingNewId,
    /// `#JR` / `#MR` without a room
    MissingRoom,
    /// Private target is not registered
    NoSuchClient { id: String },
    /// Recipient mailbox was full; the message to it was dropped
    QueueFull { id: String },
    /// Room send to an unknown room
    NoSuchRoom { room: RoomName },
    /// Rename target belongs to another connection
    IdInUse { id: String },
    /// `#JR` for a room the sender already belongs to
    AlreadyInRoom { room: RoomName },
    /// Input line exceeded the configured maximum and was discarded
    LineTooLong,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::MissingReceiver => f.write_str("Missing receiver's ID"),
            Diagnostic::MissingNewId => f.write_str("Missing new ID"),
            Diagnostic::MissingRoom => f.write_str("Missing room's ID"),
            Diagnostic::NoSuchClient { id } => {
                write!(f, "Client {} doesn't exist, dropping the message!", id)
            }
            Diagnostic::QueueFull { id } => {
                write!(f, "Client {} message queue is full, dropping the message!", id)
            }
            Diagnostic::NoSuchRoom { room } => {
                write!(f, "Room {} doesn't exist, dropping the message!", room)
            }
            Diagnostic::IdInUse { id } => write!(f, "Client ID {} is already in use", id),
            Diagnostic::AlreadyInRoom { room } => {
                write!(f, "You are already in room {}", room)
            }
            Diagnostic::LineTooLong => f.write_str("Line too long, dropping it!"),
        }
    }
}
