//! Blocking client for the relay protocol.
//!
//! The receiving half answers heartbeat probes on its own, so a client that
//! only reads stays connected.

use crate::error::{Error, Result};
use crate::protocol::frame::{self, Frame, FrameReader, PULSE_ACK};
use bytes::Bytes;
use parking_lot::Mutex;
use std::io;
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use tracing::{debug, info};

/// A connected client, before it is split into halves
#[derive(Debug)]
pub struct Client {
    stream: TcpStream,
    peer: SocketAddr,
    max_message: usize,
}

impl Client {
    /// Connect to the first address of `host` that accepts.
    ///
    /// Every resolved address is tried in order.
    pub fn connect(host: &str, port: u16) -> Result<Self> {
        let target = format!("{}:{}", host, port);
        let addrs = (host, port)
            .to_socket_addrs()
            .map_err(|_| Error::Resolve(target.clone()))?;

        let mut attempted = 0;
        for addr in addrs {
            attempted += 1;
            info!("Connecting to address '{}' on port {}", addr.ip(), port);

            match TcpStream::connect(addr) {
                Ok(stream) => {
                    info!("Connected to server at {}", addr);
                    return Ok(Self {
                        stream,
                        peer: addr,
                        max_message: frame::DEFAULT_MAX_MESSAGE,
                    });
                }
                Err(e) => debug!("Connection to {} failed: {}", addr, e),
            }
        }

        if attempted == 0 {
            return Err(Error::Resolve(target));
        }
        Err(Error::Connect { target, attempted })
    }

    /// Limit on a single inbound message
    pub fn with_max_message(mut self, max_message: usize) -> Self {
        self.max_message = max_message;
        self
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Split into a receiving half and a clonable sending half
    pub fn split(self) -> Result<(ClientReceiver, ClientSender)> {
        let reader = self.stream.try_clone()?;
        let sender = ClientSender {
            stream: Arc::new(Mutex::new(self.stream)),
        };

        let receiver = ClientReceiver {
            stream: reader,
            frames: FrameReader::new(self.max_message),
            sender: sender.clone(),
        };

        Ok((receiver, sender))
    }
}

/// Sending half; writes are serialized so a probe reply never lands
/// inside a line
#[derive(Debug, Clone)]
pub struct ClientSender {
    stream: Arc<Mutex<TcpStream>>,
}

impl ClientSender {
    /// Send one line of text, newline-terminated
    pub fn send_line(&self, line: &str) -> Result<usize> {
        self.send_raw(&frame::encode_line(line.as_bytes()))
    }

    /// Send already framed bytes as-is
    pub fn send_raw(&self, framed: &[u8]) -> Result<usize> {
        let mut stream = self.stream.lock();
        Ok(frame::send_message(&mut *stream, framed)?)
    }

    /// Close both directions; a blocked receiver wakes with `None`
    pub fn shutdown(&self) -> Result<()> {
        let stream = self.stream.lock();
        match stream.shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Receiving half
#[derive(Debug)]
pub struct ClientReceiver {
    stream: TcpStream,
    frames: FrameReader,
    sender: ClientSender,
}

impl ClientReceiver {
    /// Block until the server sends a message.
    ///
    /// Probes are acknowledged and skipped. `None` means the server closed
    /// the connection.
    pub fn next_message(&mut self) -> Result<Option<Bytes>> {
        loop {
            match self.frames.next_message(&mut self.stream)? {
                Frame::Message(message) if frame::is_pulse(&message) => {
                    debug!("Answering server pulse");
                    self.sender.send_raw(&[PULSE_ACK])?;
                }
                Frame::Message(message) => return Ok(Some(message)),
                Frame::Closed => return Ok(None),
                Frame::Pending => continue,
            }
        }
    }

    pub fn sender(&self) -> &ClientSender {
        &self.sender
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::PULSE;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn answers_pulses_and_returns_lines() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = thread::spawn(move || {
            let (mut peer, _) = listener.accept().unwrap();
            peer.write_all(&[PULSE]).unwrap();
            peer.write_all(b"welcome\n").unwrap();

            let mut ack = [0u8; 1];
            peer.read_exact(&mut ack).unwrap();
            let mut line = [0u8; 3];
            peer.read_exact(&mut line).unwrap();
            (ack, line)
        });

        let client = Client::connect("127.0.0.1", port).unwrap();
        let (mut receiver, sender) = client.split().unwrap();

        let message = receiver.next_message().unwrap();
        assert_eq!(message.as_deref(), Some(&b"welcome"[..]));
        sender.send_line("yo").unwrap();

        let (ack, line) = server.join().unwrap();
        assert_eq!(ack, [PULSE_ACK]);
        assert_eq!(&line, b"yo\n");
    }

    #[test]
    fn closed_server_yields_none() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || drop(listener.accept().unwrap()));

        let (mut receiver, _sender) = Client::connect("127.0.0.1", port)
            .unwrap()
            .split()
            .unwrap();
        server.join().unwrap();

        assert_eq!(receiver.next_message().unwrap(), None);
    }

    #[test]
    fn refused_connection_reports_attempts() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        match Client::connect("127.0.0.1", port) {
            Err(Error::Connect { attempted, .. }) => assert_eq!(attempted, 1),
            other => panic!("expected connect failure, got {:?}", other.map(|c| c.peer_addr())),
        }
    }
}
