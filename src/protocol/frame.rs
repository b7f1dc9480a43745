use bytes::{Bytes, BytesMut};
use memchr::memchr3;
use std::io::{self, ErrorKind, Read, Write};

/// Ends a line on the wire; stripped on receipt
pub const TERMINATOR: u8 = b'\n';

/// Embedded end-of-message marker; stripped on receipt
pub const END_MARKER: u8 = b'\0';

/// Heartbeat probe, sent alone
pub const PULSE: u8 = 0x03;

/// Reply to a heartbeat probe
pub const PULSE_ACK: u8 = 0x03;

/// Largest message carried by the protocol
pub const DEFAULT_MAX_MESSAGE: usize = 0xFFFF;

const READ_CHUNK: usize = 4096;

/// Outcome of pulling one message off a stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A complete message, boundary byte removed (the pulse byte is kept)
    Message(Bytes),
    /// Zero-length read: the peer closed its end
    Closed,
    /// Non-blocking source ran dry before a boundary; partial bytes stay buffered
    Pending,
}

/// Incremental line reader
///
/// Reads until a newline, an embedded NUL, a pulse byte or `max_len` bytes.
/// Bytes past the first boundary are kept for the next call, so several
/// messages delivered by one read come out one at a time.
#[derive(Debug)]
pub struct FrameReader {
    buffer: BytesMut,
    scanned: usize,
    max_len: usize,
    received: u64,
}

impl FrameReader {
    pub fn new(max_len: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(max_len.min(READ_CHUNK)),
            scanned: 0,
            max_len: max_len.max(1),
            received: 0,
        }
    }

    /// Number of bytes held while waiting for a boundary
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Total bytes pulled from the source, boundaries and partial lines included
    pub fn bytes_received(&self) -> u64 {
        self.received
    }

    /// Read from `src` until a whole message is available.
    ///
    /// Reads are repeated until a boundary is hit; a single partial read never
    /// returns a message. Errors other than `WouldBlock`/`Interrupted` are
    /// transient failures left to the caller.
    pub fn next_message<R: Read>(&mut self, src: &mut R) -> io::Result<Frame> {
        loop {
            if let Some(message) = self.split_message() {
                return Ok(Frame::Message(message));
            }

            let start = self.buffer.len();
            let room = (self.max_len - start).min(READ_CHUNK);
            self.buffer.resize(start + room, 0);

            match src.read(&mut self.buffer[start..]) {
                Ok(0) => {
                    self.buffer.truncate(start);
                    return Ok(Frame::Closed);
                }
                Ok(n) => {
                    self.buffer.truncate(start + n);
                    self.received += n as u64;
                }
                Err(e) => {
                    self.buffer.truncate(start);
                    match e.kind() {
                        ErrorKind::WouldBlock => return Ok(Frame::Pending),
                        ErrorKind::Interrupted => continue,
                        _ => return Err(e),
                    }
                }
            }
        }
    }

    fn split_message(&mut self) -> Option<Bytes> {
        match memchr3(TERMINATOR, END_MARKER, PULSE, &self.buffer[self.scanned..]) {
            Some(offset) => {
                let boundary = self.scanned + offset;
                self.scanned = 0;

                let keep_boundary = self.buffer[boundary] == PULSE;
                if keep_boundary && boundary > 0 {
                    // An ack landing after partial text: hand out the ack and
                    // keep the text waiting for its own boundary
                    let tail = self.buffer.split_off(boundary);
                    self.buffer.extend_from_slice(&tail[1..]);
                    self.scanned = boundary;
                    return Some(Bytes::from_static(&[PULSE]));
                }

                let mut message = self.buffer.split_to(boundary + 1);
                if !keep_boundary {
                    message.truncate(boundary);
                }
                Some(message.freeze())
            }
            None if self.buffer.len() >= self.max_len => {
                self.scanned = 0;
                Some(self.buffer.split_to(self.max_len).freeze())
            }
            None => {
                self.scanned = self.buffer.len();
                None
            }
        }
    }
}

impl Default for FrameReader {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE)
    }
}

/// Frame a text payload for the wire, appending a newline unless the payload
/// already ends on a boundary byte.
pub fn encode_line(payload: &[u8]) -> Bytes {
    match payload.last() {
        Some(&TERMINATOR) | Some(&END_MARKER) => Bytes::copy_from_slice(payload),
        _ => {
            let mut framed = BytesMut::with_capacity(payload.len() + 1);
            framed.extend_from_slice(payload);
            framed.extend_from_slice(&[TERMINATOR]);
            framed.freeze()
        }
    }
}

/// Whether a received message is the bare heartbeat byte
#[inline]
pub fn is_pulse(message: &[u8]) -> bool {
    message == [PULSE]
}

/// Write a framed buffer until every byte is flushed.
///
/// Returns the byte count; a write that makes no progress is an error.
pub fn send_message<W: Write>(dst: &mut W, frame: &[u8]) -> io::Result<usize> {
    let mut written = 0;

    while written < frame.len() {
        match dst.write(&frame[written..]) {
            Ok(0) => {
                return Err(io::Error::new(
                    ErrorKind::WriteZero,
                    "peer accepted no bytes",
                ))
            }
            Ok(n) => written += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }

    Ok(written)
}
