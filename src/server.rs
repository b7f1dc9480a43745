use crate::heartbeat::PulseMonitor;
use crate::mailbox::{Mailbox, RunState};
use crate::network::{Connection, ConnectionId, Readiness};
use crate::protocol::{apply_command, frame, CommandOutcome, CommandRequest};
use crate::registry::Registry;
use crate::{
    config::Config,
    error::{Error, Result},
};
use bytes::Bytes;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use mio::event::Event;
use mio::net::{TcpListener as MioTcpListener, TcpStream as MioTcpStream};
use mio::{Events, Interest, Poll, Token};
use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// The listening socket's token; client ids start after it
const LISTENER: Token = Token(0);

/// Events queued per subscriber before new ones are dropped
const SUBSCRIBER_BACKLOG: usize = 1024;

/// Why a connection left the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The peer closed its end
    Closed,
    /// The poller reported a hang-up or socket error
    HangUp,
    /// Ran out of pulse credits
    Unresponsive,
    /// Removed by an operator command
    Kicked,
    /// Closed while the server stopped
    Shutdown,
}

/// Why an accepted socket was turned away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    ClientLimit,
    RegistryFull,
    Register,
}

/// Observable server activity, delivered to every subscriber
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    Connected {
        id: ConnectionId,
        addr: SocketAddr,
    },
    Rejected {
        addr: SocketAddr,
        reason: RejectReason,
    },
    Message {
        id: ConnectionId,
        payload: Bytes,
    },
    Disconnected {
        id: ConnectionId,
        reason: DisconnectReason,
    },
}

/// Single-threaded multiplexed message server
pub struct Server {
    config: Config,
    poll: Poll,
    registry: Registry<MioTcpListener, MioTcpStream>,
    local_addr: SocketAddr,
    mailbox: Arc<Mailbox>,
    active_connections: Arc<AtomicUsize>,
    subscribers: Vec<Sender<ServerEvent>>,
}

/// Clonable control surface for a running server
#[derive(Clone)]
pub struct ServerHandle {
    mailbox: Arc<Mailbox>,
    active_connections: Arc<AtomicUsize>,
    local_addr: SocketAddr,
}

impl ServerHandle {
    /// Signal the server to shut down gracefully
    pub fn shutdown(&self) {
        info!("Initiating server shutdown");
        self.mailbox.request_shutdown();
    }

    /// Hand a command to the event loop and wait for its outcome
    pub fn submit(&self, request: CommandRequest) -> Result<CommandOutcome> {
        self.mailbox.submit(request)
    }

    /// Get the number of connected clients
    pub fn connection_count(&self) -> usize {
        self.active_connections.load(Ordering::Acquire)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> RunState {
        self.mailbox.state()
    }

    pub fn mailbox(&self) -> &Arc<Mailbox> {
        &self.mailbox
    }
}

impl Server {
    /// Bind the listener and register it with a fresh poller.
    ///
    /// The server is `Active` once this returns.
    pub fn bind(config: Config) -> Result<Self> {
        config
            .validate()
            .map_err(|e| Error::Config(e.to_string()))?;

        let addr = config.listen_addr();
        let listener = TcpListener::bind(&addr).map_err(|source| Error::Bind {
            addr: addr.clone(),
            source,
        })?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let mut listener = MioTcpListener::from_std(listener);
        let poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;

        let registry = Registry::new(
            listener,
            config.registry_min_capacity,
            config.max_message_size,
        );

        let mailbox = Arc::new(Mailbox::new());
        mailbox.activate();

        info!("Server listening on {}", local_addr);

        Ok(Self {
            config,
            poll,
            registry,
            local_addr,
            mailbox,
            active_connections: Arc::new(AtomicUsize::new(0)),
            subscribers: Vec::new(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            mailbox: Arc::clone(&self.mailbox),
            active_connections: Arc::clone(&self.active_connections),
            local_addr: self.local_addr,
        }
    }

    /// Receive events emitted from now on.
    ///
    /// Each subscriber queues at most `SUBSCRIBER_BACKLOG` events; while its
    /// queue is full, further events are dropped for that subscriber only.
    pub fn subscribe(&mut self) -> Receiver<ServerEvent> {
        let (tx, rx) = bounded(SUBSCRIBER_BACKLOG);
        self.subscribers.push(tx);
        rx
    }

    /// Run the event loop until the server goes inactive.
    ///
    /// Each iteration polls, records readiness, runs a due heartbeat sweep,
    /// applies a pending operator command (skipping I/O for that iteration),
    /// then accepts new clients and services the ready ones.
    pub fn run(mut self) -> Result<()> {
        let mut events = Events::with_capacity(self.config.events_capacity);
        let mut monitor = PulseMonitor::new(self.config.pulse_interval(), Instant::now());
        let mut listener_ready = false;

        while !self.mailbox.is_inactive() {
            // Carried readiness from a skipped iteration must not wait out a full timeout
            let timeout = if listener_ready || self.has_carried_readiness() {
                Duration::ZERO
            } else {
                self.config.poll_timeout()
            };
            let polled = self.poll.poll(&mut events, Some(timeout));

            if self.mailbox.is_inactive() {
                break;
            }

            if polled.is_ok() {
                for event in events.iter() {
                    match event.token() {
                        LISTENER => listener_ready = true,
                        Token(id) => {
                            self.registry.mark_ready(id, readiness(event));
                        }
                    }
                }
            }

            if monitor.is_due(Instant::now()) && self.check_pulses(&monitor) {
                break;
            }

            if let Some(request) = self.mailbox.take() {
                let outcome = self.execute(&request);
                self.mailbox.complete(outcome);
                continue;
            }

            match polled {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!("Error encountered whilst polling: {}", e);
                    continue;
                }
            }

            // Snapshot before accepting; new clients have nothing to read yet
            let ready = self.registry.ready_ids();
            if !listener_ready && ready.is_empty() {
                continue;
            }

            if listener_ready {
                listener_ready = false;
                self.accept_clients();
            }

            for id in ready {
                if self.mailbox.is_inactive() {
                    break;
                }
                self.service(id);
            }
        }

        self.close();
        Ok(())
    }

    fn has_carried_readiness(&self) -> bool {
        self.registry.iter().any(Connection::has_pending_event)
    }

    /// Run one heartbeat sweep; true if the server stopped mid-sweep
    fn check_pulses(&mut self, monitor: &PulseMonitor) -> bool {
        let sweep = monitor.sweep(&mut self.registry, &self.mailbox, |conn| {
            conn.send_pulse()
        });

        for conn in sweep.evicted {
            self.release(conn, DisconnectReason::Unresponsive);
        }
        sweep.interrupted
    }

    fn execute(&mut self, request: &CommandRequest) -> CommandOutcome {
        let applied = apply_command(&mut self.registry, request, &self.mailbox, |conn, framed| {
            conn.send(framed)
        });

        for conn in applied.removed {
            self.release(conn, DisconnectReason::Kicked);
        }

        debug!("Applied {:?} to {}: {}", request.action, request.target, applied.outcome);
        applied.outcome
    }

    /// Accept until the listener would block
    fn accept_clients(&mut self) {
        loop {
            if self.mailbox.is_inactive() {
                return;
            }

            let (stream, addr) = match self.registry.listener_mut().accept() {
                Ok(accepted) => accepted,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    return;
                }
            };

            if self.config.at_client_limit(self.registry.len()) {
                drop(stream);
                self.emit(ServerEvent::Rejected {
                    addr,
                    reason: RejectReason::ClientLimit,
                });
                continue;
            }

            if let Err(e) = stream.set_nodelay(self.config.tcp_nodelay) {
                debug!("Failed to set nodelay for '{}': {}", addr, e);
            }

            let id = match self.registry.add(stream, Some(addr)) {
                Ok(id) => id,
                Err(rejected) => {
                    drop(rejected.stream);
                    self.emit(ServerEvent::Rejected {
                        addr,
                        reason: RejectReason::RegistryFull,
                    });
                    continue;
                }
            };

            let registered = match self.registry.find_mut(id) {
                Some(conn) => {
                    self.poll
                        .registry()
                        .register(conn.stream_mut(), Token(id), Interest::READABLE)
                }
                None => continue,
            };

            if let Err(e) = registered {
                debug!("Failed to register client {} with the poller: {}", id, e);
                drop(self.registry.remove_id(id));
                self.emit(ServerEvent::Rejected {
                    addr,
                    reason: RejectReason::Register,
                });
                continue;
            }

            self.active_connections.fetch_add(1, Ordering::Relaxed);
            self.emit(ServerEvent::Connected { id, addr });
        }
    }

    /// Handle the readiness carried by one connection
    fn service(&mut self, id: ConnectionId) {
        let Some(conn) = self.registry.find_mut(id) else {
            return;
        };

        let readiness = conn.take_readiness();
        if readiness.hang_up {
            self.evict(id, DisconnectReason::HangUp);
            return;
        }
        if !readiness.readable {
            return;
        }

        let inbound = conn.drain();
        for payload in inbound.messages {
            if !frame::is_pulse(&payload) {
                self.emit(ServerEvent::Message { id, payload });
            }
        }

        if let Some(e) = inbound.error {
            warn!("Failed to receive data from client {}: {}", id, e);
        }

        if inbound.closed {
            self.evict(id, DisconnectReason::Closed);
        }
    }

    fn evict(&mut self, id: ConnectionId, reason: DisconnectReason) {
        if let Some(conn) = self.registry.remove_id(id) {
            self.release(conn, reason);
        }
    }

    /// Deregister and close a connection already out of the registry
    fn release(&mut self, mut conn: Connection<MioTcpStream>, reason: DisconnectReason) {
        let id = conn.id();
        if let Err(e) = self.poll.registry().deregister(conn.stream_mut()) {
            debug!("Failed to deregister client {}: {}", id, e);
        }
        drop(conn);

        self.active_connections.fetch_sub(1, Ordering::Relaxed);
        self.emit(ServerEvent::Disconnected { id, reason });
    }

    fn emit(&mut self, event: ServerEvent) {
        match &event {
            ServerEvent::Connected { id, addr } => {
                info!("Connected with client '{}' (id {})", addr, id)
            }
            ServerEvent::Rejected { addr, reason } => match reason {
                RejectReason::ClientLimit => {
                    warn!("Failed to connect client '{}': reached client limit", addr)
                }
                RejectReason::RegistryFull => {
                    error!("Failed to connect client '{}': {}", addr, Error::RegistryFull)
                }
                RejectReason::Register => {
                    error!("Failed to connect client '{}': could not watch socket", addr)
                }
            },
            ServerEvent::Message { id, payload } => {
                info!("(Client {} message) {}", id, String::from_utf8_lossy(payload))
            }
            ServerEvent::Disconnected { id, reason } => match reason {
                DisconnectReason::Closed | DisconnectReason::HangUp => {
                    info!("Disconnected client {}: external disconnection", id)
                }
                DisconnectReason::Unresponsive => {
                    warn!("Disconnecting client {}: not responding to pulse checks", id)
                }
                DisconnectReason::Kicked => info!("Kicked client {}", id),
                DisconnectReason::Shutdown => debug!("Closed client {}", id),
            },
        }

        publish(&mut self.subscribers, &event);
    }

    /// Close every client socket, then the listener
    fn close(self) {
        info!("Closing server...");

        let Server {
            poll,
            registry,
            active_connections,
            mut subscribers,
            ..
        } = self;

        let (mut listener, connections) = registry.into_parts();
        for mut conn in connections {
            let _ = poll.registry().deregister(conn.stream_mut());
            let id = conn.id();
            drop(conn);
            publish(
                &mut subscribers,
                &ServerEvent::Disconnected {
                    id,
                    reason: DisconnectReason::Shutdown,
                },
            );
        }
        let _ = poll.registry().deregister(&mut listener);
        active_connections.store(0, Ordering::Release);

        info!("Server shutdown complete");
    }
}

/// Offer `event` to every subscriber without blocking the loop; subscribers
/// whose receiver is gone are dropped
fn publish(subscribers: &mut Vec<Sender<ServerEvent>>, event: &ServerEvent) {
    subscribers.retain(|tx| match tx.try_send(event.clone()) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            debug!("Subscriber backlog full, dropping {:?}", event);
            true
        }
        Err(TrySendError::Disconnected(_)) => false,
    });
}

fn readiness(event: &Event) -> Readiness {
    Readiness {
        readable: event.is_readable(),
        hang_up: event.is_error() || (event.is_read_closed() && event.is_write_closed()),
    }
}
