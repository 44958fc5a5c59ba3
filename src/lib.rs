//! Line-based Multi-room Chat Relay Library
//!
//! An in-memory TCP chat relay built on tokio. Peers send newline-delimited
//! text; plain lines go to everyone, `#` lines are commands.
//!
//! # Commands
//! - `#PM <id> <message>`: private message
//! - `#CN <new id>`: change your identifier
//! - `#JR <room>`: join a room, creating it if needed
//! - `#MR <room> <message>`: message a room
//!
//! # Architecture
//! - `ConnectionRegistry` and `RoomRegistry` are shared maps, each behind
//!   one `parking_lot::Mutex`
//! - Every connection has a bounded mailbox drained by its own writer;
//!   senders only ever `try_send`, so a stalled peer never blocks anyone
//! - The `Dispatcher` runs on the sender's reader and mutates the
//!   registries synchronously
//!
//! # Example
//! ```ignore
//! use line_relay::{ChatServer, Config};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let server = ChatServer::bind(Config::default()).await.unwrap();
//!     server.run(CancellationToken::new()).await;
//! }
//! ```

pub mod codec;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod message;
pub mod registry;
pub mod room;
pub mod server;
pub mod types;

// Re-export main types for convenience
pub use config::{Args, Config};
pub use connection::{Connection, Mailbox};
pub use dispatcher::Dispatcher;
pub use error::{AppError, CodecError, ConfigError, DeliveryError, RenameError};
pub use handler::{handle_connection, ConnectionSettings};
pub use message::{ClientCommand, Diagnostic, ServerMessage};
pub use registry::ConnectionRegistry;
pub use room::{JoinOutcome, Room, RoomRegistry};
pub use server::ChatServer;
pub use types::{ConnectionId, RoomName};
