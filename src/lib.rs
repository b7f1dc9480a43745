//! pulse-relay: a multiplexed TCP message relay
//!
//! One thread owns every socket and waits on a single poller. Clients send
//! newline-terminated text lines; an operator on a second thread can send
//! lines back to one or all clients, or kick them.
//!
//! # Architecture
//!
//! - mio-based event loop over a growable connection registry
//! - Heartbeat probes with a small credit budget per client
//! - Single-slot mailbox between the operator thread and the loop

/// Blocking client with automatic heartbeat replies
pub mod client;

/// Configuration management for the server
pub mod config;

/// Operator console
pub mod console;

/// Error types and result aliases
pub mod error;

pub mod heartbeat;

/// Command handoff and run state
pub mod mailbox;

/// Network layer for connection management
pub mod network;

/// Wire framing and operator commands
pub mod protocol;

pub mod registry;

/// Core server implementation
pub mod server;

pub use client::{Client, ClientReceiver, ClientSender};
pub use config::Config;
pub use error::{Error, Result};
pub use server::{Server, ServerEvent, ServerHandle};
