use crate::protocol::frame::{self, Frame, FrameReader};
use bytes::Bytes;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::time::Instant;

/// Identifier the operator uses to address a client.
///
/// Zero is reserved for the listening endpoint.
pub type ConnectionId = usize;

/// Heartbeat sweeps a silent connection survives
pub const MAX_PULSE_CREDITS: u8 = 3;

/// Readiness carried from a poll cycle until the connection is serviced
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    pub readable: bool,
    pub hang_up: bool,
}

impl Readiness {
    pub fn is_pending(&self) -> bool {
        self.readable || self.hang_up
    }

    fn merge(&mut self, other: Readiness) {
        self.readable |= other.readable;
        self.hang_up |= other.hang_up;
    }
}

/// Everything drained from a connection in one service pass
#[derive(Debug, Default)]
pub struct Inbound {
    pub messages: Vec<Bytes>,
    pub closed: bool,
    pub error: Option<io::Error>,
}

/// One accepted client
///
/// Owns the socket; dropping the connection closes it.
#[derive(Debug)]
pub struct Connection<S> {
    id: ConnectionId,
    stream: S,
    addr: Option<SocketAddr>,
    credits: u8,
    readiness: Readiness,
    reader: FrameReader,
    connected_at: Instant,
    messages_received: u64,
}

impl<S> Connection<S> {
    pub fn new(id: ConnectionId, stream: S, addr: Option<SocketAddr>, max_message: usize) -> Self {
        Self {
            id,
            stream,
            addr,
            credits: MAX_PULSE_CREDITS,
            readiness: Readiness::default(),
            reader: FrameReader::new(max_message),
            connected_at: Instant::now(),
            messages_received: 0,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn addr(&self) -> Option<SocketAddr> {
        self.addr
    }

    pub fn stream(&self) -> &S {
        &self.stream
    }

    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    pub fn into_stream(self) -> S {
        self.stream
    }

    pub fn connected_at(&self) -> Instant {
        self.connected_at
    }

    pub fn messages_received(&self) -> u64 {
        self.messages_received
    }

    pub fn credits(&self) -> u8 {
        self.credits
    }

    /// Any inbound byte proves the peer is alive
    pub fn refresh_credits(&mut self) {
        self.credits = MAX_PULSE_CREDITS;
    }

    /// Spend one credit for an unanswered sweep, returning what is left
    pub fn spend_credit(&mut self) -> u8 {
        self.credits = self.credits.saturating_sub(1);
        self.credits
    }

    pub fn readiness(&self) -> Readiness {
        self.readiness
    }

    pub fn mark_ready(&mut self, readiness: Readiness) {
        self.readiness.merge(readiness);
    }

    pub fn has_pending_event(&self) -> bool {
        self.readiness.is_pending()
    }

    pub fn take_readiness(&mut self) -> Readiness {
        std::mem::take(&mut self.readiness)
    }
}

impl<S: Read> Connection<S> {
    /// Pull the next framed message off the socket
    pub fn receive(&mut self) -> io::Result<Frame> {
        self.reader.next_message(&mut self.stream)
    }

    /// Read until the socket would block, collecting every complete message.
    ///
    /// Credits are refreshed by any inbound byte, including a partial line
    /// still waiting for its boundary.
    pub fn drain(&mut self) -> Inbound {
        let mut inbound = Inbound::default();
        let received_before = self.reader.bytes_received();

        loop {
            match self.receive() {
                Ok(Frame::Message(message)) => {
                    self.messages_received += 1;
                    inbound.messages.push(message);
                }
                Ok(Frame::Pending) => break,
                Ok(Frame::Closed) => {
                    inbound.closed = true;
                    break;
                }
                Err(e) => {
                    inbound.error = Some(e);
                    break;
                }
            }
        }

        if self.reader.bytes_received() != received_before {
            self.refresh_credits();
        }
        inbound
    }
}

impl<S: Write> Connection<S> {
    /// Send an already framed buffer
    pub fn send(&mut self, framed: &[u8]) -> io::Result<usize> {
        frame::send_message(&mut self.stream, framed)
    }

    /// Send the one-byte heartbeat probe
    pub fn send_pulse(&mut self) -> io::Result<usize> {
        self.send(&[frame::PULSE])
    }
}
