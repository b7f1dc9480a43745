use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Bind failed on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to resolve address '{0}'")]
    Resolve(String),

    #[error("Failed to connect to the {attempted} found address(es) for '{target}'")]
    Connect { target: String, attempted: usize },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Registry allocation failed")]
    RegistryFull,

    #[error("Command mailbox is closed")]
    MailboxClosed,

    #[error("Command mailbox already holds a pending command")]
    MailboxBusy,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Server shutting down")]
    Shutdown,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether the error is a fatal startup failure (resolution, bind, listen).
    pub fn is_fatal_startup(&self) -> bool {
        matches!(self, Error::Bind { .. } | Error::Resolve(_) | Error::Config(_))
    }
}
