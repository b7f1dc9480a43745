use crate::network::ConnectionId;
use bytes::Bytes;
use std::fmt;

mod executor;
mod parser;

pub use executor::{apply_command, Applied};
pub use parser::{parse_operator_command, ParseError};

/// Who an operator command addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    All,
    Client(ConnectionId),
}

impl Target {
    pub fn matches(&self, id: ConnectionId) -> bool {
        match self {
            Target::All => true,
            Target::Client(target) => *target == id,
        }
    }

    pub fn is_broadcast(&self) -> bool {
        matches!(self, Target::All)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::All => write!(f, "all"),
            Target::Client(id) => write!(f, "{}", id),
        }
    }
}

/// What to do with the addressed clients
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Kick,
    Message(Bytes),
}

/// A parsed operator instruction, consumed exactly once by the event loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    pub target: Target,
    pub action: Action,
}

impl CommandRequest {
    pub fn kick(target: Target) -> Self {
        Self {
            target,
            action: Action::Kick,
        }
    }

    pub fn message(target: Target, text: impl Into<Bytes>) -> Self {
        Self {
            target,
            action: Action::Message(text.into()),
        }
    }
}

/// One line of operator input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorCommand {
    /// Stop the server
    Exit,
    /// Stop reading operator input; the server keeps running
    StopInteractive,
    Request(CommandRequest),
}

/// Result of applying a command, reported back to the operator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Sent(ConnectionId),
    Kicked(ConnectionId),
    SendFailed(ConnectionId),
    NotFound(ConnectionId),
    Broadcast { delivered: usize, failed: usize },
    KickedAll(usize),
    /// The server stopped while the command was being applied
    Interrupted,
}

impl fmt::Display for CommandOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandOutcome::Sent(id) => write!(f, "Sent message to client {}", id),
            CommandOutcome::Kicked(id) => write!(f, "Kicked client {}", id),
            CommandOutcome::SendFailed(id) => {
                write!(f, "Failed to send message to client {}", id)
            }
            CommandOutcome::NotFound(id) => write!(f, "Client {} does not exist", id),
            CommandOutcome::Broadcast { delivered, failed: 0 } => {
                write!(f, "Sent message to {} client(s)", delivered)
            }
            CommandOutcome::Broadcast { delivered, failed } => write!(
                f,
                "Sent message to {} client(s), {} failed",
                delivered, failed
            ),
            CommandOutcome::KickedAll(count) => write!(f, "Kicked {} client(s)", count),
            CommandOutcome::Interrupted => write!(f, "Server stopped before the command completed"),
        }
    }
}
