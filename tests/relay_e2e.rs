//! End-to-end tests against a real server on a loopback port

use std::io::{Read, Write};
use std::net::TcpStream;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use pulse_relay::mailbox::RunState;
use pulse_relay::protocol::{CommandOutcome, CommandRequest, Target};
use pulse_relay::server::{DisconnectReason, RejectReason};
use pulse_relay::{Client, Config, Server, ServerEvent, ServerHandle};

const WAIT: Duration = Duration::from_secs(5);

struct TestServer {
    handle: ServerHandle,
    events: Receiver<ServerEvent>,
    thread: JoinHandle<pulse_relay::Result<()>>,
}

impl TestServer {
    fn start(config: Config) -> Self {
        let mut server = Server::bind(config).unwrap();
        let events = server.subscribe();
        let handle = server.handle();
        let thread = thread::spawn(move || server.run());

        Self {
            handle,
            events,
            thread,
        }
    }

    fn with_defaults() -> Self {
        Self::start(test_config())
    }

    fn port(&self) -> u16 {
        self.handle.local_addr().port()
    }

    fn connect_raw(&self) -> (TcpStream, usize) {
        let stream = TcpStream::connect(("127.0.0.1", self.port())).unwrap();
        let id = self.wait_for(|event| match event {
            ServerEvent::Connected { id, .. } => Some(*id),
            _ => None,
        });
        (stream, id)
    }

    /// Skip events until `pick` accepts one
    fn wait_for<T>(&self, mut pick: impl FnMut(&ServerEvent) -> Option<T>) -> T {
        let deadline = Instant::now() + WAIT;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let event = self
                .events
                .recv_timeout(remaining)
                .expect("timed out waiting for server event");
            if let Some(found) = pick(&event) {
                return found;
            }
        }
    }

    fn stop(self) {
        self.handle.shutdown();
        self.thread.join().unwrap().unwrap();
    }
}

fn test_config() -> Config {
    Config {
        bind_addr: "127.0.0.1".to_string(),
        port: 0,
        poll_timeout_ms: 20,
        ..Default::default()
    }
}

/// Read until the peer closes; returns everything received
fn read_to_close(stream: &mut TcpStream) -> Vec<u8> {
    stream.set_read_timeout(Some(WAIT)).unwrap();
    let mut received = Vec::new();
    stream.read_to_end(&mut received).unwrap();
    received
}

#[test]
fn client_line_is_reported_with_its_id() {
    let server = TestServer::with_defaults();
    let (mut stream, id) = server.connect_raw();

    stream.write_all(b"hi there\n").unwrap();

    let payload = server.wait_for(|event| match event {
        ServerEvent::Message { id: from, payload } if *from == id => Some(payload.clone()),
        _ => None,
    });
    assert_eq!(&payload[..], b"hi there");

    server.stop();
}

#[test]
fn pipelined_messages_arrive_separately() {
    let server = TestServer::with_defaults();
    let (mut stream, _) = server.connect_raw();

    stream.write_all(b"one\ntwo\0three\n").unwrap();

    let mut seen = Vec::new();
    while seen.len() < 3 {
        seen.push(server.wait_for(|event| match event {
            ServerEvent::Message { payload, .. } => Some(payload.to_vec()),
            _ => None,
        }));
    }
    assert_eq!(seen, vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()]);

    server.stop();
}

#[test]
fn kick_all_closes_every_client() {
    let server = TestServer::with_defaults();
    let (mut first, _) = server.connect_raw();
    let (mut second, _) = server.connect_raw();
    assert_eq!(server.handle.connection_count(), 2);

    let outcome = server
        .handle
        .submit(CommandRequest::kick(Target::All))
        .unwrap();

    assert_eq!(outcome, CommandOutcome::KickedAll(2));
    assert_eq!(outcome.to_string(), "Kicked 2 client(s)");
    assert_eq!(server.handle.connection_count(), 0);
    assert!(read_to_close(&mut first).is_empty());
    assert!(read_to_close(&mut second).is_empty());

    server.stop();
}

#[test]
fn kicking_unknown_client_changes_nothing() {
    let server = TestServer::with_defaults();
    let (mut stream, id) = server.connect_raw();
    assert_ne!(id, 7);

    let outcome = server
        .handle
        .submit(CommandRequest::kick(Target::Client(7)))
        .unwrap();

    assert_eq!(outcome, CommandOutcome::NotFound(7));
    assert_eq!(outcome.to_string(), "Client 7 does not exist");
    assert_eq!(server.handle.connection_count(), 1);

    // Still serviced after the command
    stream.write_all(b"still here\n").unwrap();
    server.wait_for(|event| match event {
        ServerEvent::Message { id: from, .. } if *from == id => Some(()),
        _ => None,
    });

    server.stop();
}

#[test]
fn operator_message_reaches_clients() {
    let server = TestServer::with_defaults();
    let client = Client::connect("127.0.0.1", server.port()).unwrap();
    server.wait_for(|event| match event {
        ServerEvent::Connected { .. } => Some(()),
        _ => None,
    });
    let (mut receiver, _sender) = client.split().unwrap();

    let outcome = server
        .handle
        .submit(CommandRequest::message(Target::All, "hello"))
        .unwrap();
    assert_eq!(
        outcome,
        CommandOutcome::Broadcast {
            delivered: 1,
            failed: 0
        }
    );

    let message = receiver.next_message().unwrap().unwrap();
    assert_eq!(&message[..], b"hello");

    server.stop();
}

#[test]
fn silent_client_is_evicted_while_responsive_one_stays() {
    let server = TestServer::start(Config {
        pulse_interval_ms: 100,
        ..test_config()
    });

    let (_silent, silent_id) = server.connect_raw();

    let client = Client::connect("127.0.0.1", server.port()).unwrap();
    let responsive_id = server.wait_for(|event| match event {
        ServerEvent::Connected { id, .. } => Some(*id),
        _ => None,
    });
    let (mut receiver, sender) = client.split().unwrap();
    let reader = thread::spawn(move || while let Ok(Some(_)) = receiver.next_message() {});

    let evicted = server.wait_for(|event| match event {
        ServerEvent::Disconnected { id, reason } => Some((*id, *reason)),
        _ => None,
    });
    assert_eq!(evicted, (silent_id, DisconnectReason::Unresponsive));

    // Several more sweeps go by without the responsive client leaving
    thread::sleep(Duration::from_millis(600));
    assert_eq!(server.handle.connection_count(), 1);
    assert!(server
        .events
        .try_iter()
        .all(|event| !matches!(event, ServerEvent::Disconnected { id, .. } if id == responsive_id)));

    sender.shutdown().unwrap();
    reader.join().unwrap();
    server.stop();
}

#[test]
fn client_limit_turns_extra_clients_away() {
    let server = TestServer::start(Config {
        max_clients: Some(1),
        ..test_config()
    });
    let (_admitted, _) = server.connect_raw();

    let mut extra = TcpStream::connect(("127.0.0.1", server.port())).unwrap();
    let reason = server.wait_for(|event| match event {
        ServerEvent::Rejected { reason, .. } => Some(*reason),
        _ => None,
    });

    assert_eq!(reason, RejectReason::ClientLimit);
    assert!(read_to_close(&mut extra).is_empty());
    assert_eq!(server.handle.connection_count(), 1);

    server.stop();
}

#[test]
fn peer_close_is_reported() {
    let server = TestServer::with_defaults();
    let (stream, id) = server.connect_raw();
    drop(stream);

    let reason = server.wait_for(|event| match event {
        ServerEvent::Disconnected { id: gone, reason } if *gone == id => Some(*reason),
        _ => None,
    });
    assert!(matches!(
        reason,
        DisconnectReason::Closed | DisconnectReason::HangUp
    ));
    assert_eq!(server.handle.connection_count(), 0);

    server.stop();
}

#[test]
fn shutdown_closes_clients() {
    let server = TestServer::with_defaults();
    let (mut stream, _) = server.connect_raw();

    server.handle.shutdown();
    let TestServer { thread, handle, .. } = server;
    thread.join().unwrap().unwrap();

    assert!(read_to_close(&mut stream).is_empty());
    assert!(matches!(
        handle.submit(CommandRequest::kick(Target::All)),
        Err(pulse_relay::Error::MailboxClosed)
    ));
}

#[test]
fn lines_sent_around_a_command_are_not_lost() {
    let server = TestServer::with_defaults();
    let (mut stream, id) = server.connect_raw();
    let rounds = 30;

    for round in 0..rounds {
        let line = format!("line {}\n", round);
        if round % 2 == 0 {
            stream.write_all(line.as_bytes()).unwrap();
        }

        let handle = server.handle.clone();
        let command =
            thread::spawn(move || handle.submit(CommandRequest::kick(Target::Client(9999))));

        if round % 2 == 1 {
            stream.write_all(line.as_bytes()).unwrap();
        }
        assert_eq!(
            command.join().unwrap().unwrap(),
            CommandOutcome::NotFound(9999)
        );
    }

    for round in 0..rounds {
        let payload = server.wait_for(|event| match event {
            ServerEvent::Message { id: from, payload } if *from == id => Some(payload.clone()),
            _ => None,
        });
        assert_eq!(payload, format!("line {}", round));
    }

    server.stop();
}

#[test]
fn shutdown_waits_for_an_in_flight_kick() {
    // A long poll timeout keeps the command pending while shutdown arrives
    let server = TestServer::start(Config {
        poll_timeout_ms: 200,
        ..test_config()
    });
    let (mut first, _) = server.connect_raw();
    let (mut second, _) = server.connect_raw();

    let handle = server.handle.clone();
    let command = thread::spawn(move || handle.submit(CommandRequest::kick(Target::All)));

    while server.handle.state() != RunState::CommandPending && !command.is_finished() {
        thread::yield_now();
    }
    server.handle.shutdown();

    assert_eq!(command.join().unwrap().unwrap(), CommandOutcome::KickedAll(2));

    let TestServer { thread, events, .. } = server;
    thread.join().unwrap().unwrap();

    let reasons: Vec<_> = events
        .try_iter()
        .filter_map(|event| match event {
            ServerEvent::Disconnected { reason, .. } => Some(reason),
            _ => None,
        })
        .collect();
    assert_eq!(
        reasons,
        vec![DisconnectReason::Kicked, DisconnectReason::Kicked]
    );
    assert!(read_to_close(&mut first).is_empty());
    assert!(read_to_close(&mut second).is_empty());
}
