//! Operator console: reads commands line by line and hands them to the
//! event loop through the mailbox, one at a time.

use crate::error::Error;
use crate::mailbox::Mailbox;
use crate::protocol::{parse_operator_command, OperatorCommand};
use std::io::BufRead;
use tracing::{info, warn};

/// Why the console stopped reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleExit {
    /// `exit` was entered; the server has been asked to stop
    Exit,
    /// `stopint` was entered; the server keeps running
    StopInteractive,
    /// Input reached end of file
    InputClosed,
    /// The server stopped on its own
    ServerStopped,
}

pub fn print_usage() {
    info!("(Interactive) Format: \"<id> <message>\"");
    info!(
        "(Interactive) 'ID' can be 'all' to specify all connected clients, \
         'Message' can be 'kick' to disconnect the target client(s)."
    );
    info!("(Interactive) 'stopint' exits interactive mode and 'exit' stops the server.");
}

/// Drive the producer side of the mailbox from `input`.
///
/// Each command blocks until the event loop has applied it, so at most one
/// command is ever in flight.
pub fn run<R: BufRead>(input: R, mailbox: &Mailbox) -> ConsoleExit {
    print_usage();

    for line in input.lines() {
        if mailbox.is_inactive() {
            return ConsoleExit::ServerStopped;
        }

        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!("(Interactive) Failed to read input: {}", e);
                continue;
            }
        };

        let request = match parse_operator_command(&line) {
            Ok(OperatorCommand::Exit) => {
                info!("(Interactive) Stopping the server");
                mailbox.request_shutdown();
                return ConsoleExit::Exit;
            }
            Ok(OperatorCommand::StopInteractive) => {
                info!("(Interactive) The server will no longer accept input.");
                return ConsoleExit::StopInteractive;
            }
            Ok(OperatorCommand::Request(request)) => request,
            Err(e) => {
                warn!("(Interactive) Invalid input: {}", e);
                continue;
            }
        };

        match mailbox.submit(request) {
            Ok(outcome) => info!("(Interactive) {}", outcome),
            Err(Error::MailboxClosed) | Err(Error::Shutdown) => {
                return ConsoleExit::ServerStopped;
            }
            Err(e) => warn!("(Interactive) Command not applied: {}", e),
        }
    }

    ConsoleExit::InputClosed
}
