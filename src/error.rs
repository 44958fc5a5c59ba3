//! Error types for the relay
//!
//! Defines application-level errors, line codec errors, configuration errors
//! and the non-fatal delivery/rename errors raised by the registries.
//! Uses thiserror for ergonomic error definitions.

use std::path::PathBuf;

use thiserror::Error;

/// Application-level errors
///
/// All of these are fatal to whatever produced them: a transport error ends
/// one connection, a config error ends the process before it starts.
#[derive(Debug, Error)]
pub enum AppError {
    /// IO error (fatal)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Line framing error (fatal for the connection)
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Invalid configuration
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Line codec errors
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Mailbox delivery errors
///
/// Occurs when a line cannot be queued for a recipient. Never fatal to the
/// sender; the caller decides whether to notify anyone.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// The recipient's mailbox is at capacity
    #[error("Mailbox full")]
    MailboxFull,

    /// The recipient's writer has gone away
    #[error("Mailbox closed")]
    Closed,
}

/// Identifier rename errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RenameError {
    /// Another live connection already uses the identifier
    #[error("Identifier {0} is already in use")]
    InUse(String),

    /// The connection is not (or no longer) registered
    #[error("Connection is not registered")]
    NotRegistered,
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value for {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}
