mod connection;

pub use connection::{Connection, ConnectionId, Inbound, Readiness, MAX_PULSE_CREDITS};
