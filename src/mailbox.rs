//! Single-slot command handoff between the operator thread and the event loop.
//!
//! The run state doubles as the slot's full/empty flag: `Active` means empty,
//! `CommandPending` means a request is waiting for the loop. The producer only
//! deposits while `Active` and then blocks until the loop completes the
//! command; the loop only takes while `CommandPending`.

use crate::error::{Error, Result};
use crate::protocol::{CommandOutcome, CommandRequest};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Duration;
use tracing::debug;

/// How often a blocked producer re-checks for shutdown
const COMPLETION_POLL: Duration = Duration::from_millis(50);

/// Process-wide server run state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RunState {
    Inactive = 0,
    Active = 1,
    CommandPending = 2,
}

impl RunState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => RunState::Active,
            2 => RunState::CommandPending,
            _ => RunState::Inactive,
        }
    }
}

pub struct Mailbox {
    state: AtomicU8,
    deferred_shutdown: AtomicBool,
    request_tx: Sender<CommandRequest>,
    request_rx: Receiver<CommandRequest>,
    outcome_tx: Sender<CommandOutcome>,
    outcome_rx: Receiver<CommandOutcome>,
}

impl Mailbox {
    /// Create an empty mailbox in the `Inactive` state
    pub fn new() -> Self {
        let (request_tx, request_rx) = bounded(1);
        let (outcome_tx, outcome_rx) = bounded(1);

        Self {
            state: AtomicU8::new(RunState::Inactive as u8),
            deferred_shutdown: AtomicBool::new(false),
            request_tx,
            request_rx,
            outcome_tx,
            outcome_rx,
        }
    }

    pub fn state(&self) -> RunState {
        RunState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_inactive(&self) -> bool {
        self.state() == RunState::Inactive
    }

    /// `Inactive -> Active`, once the listener is up
    pub fn activate(&self) -> bool {
        self.transition(RunState::Inactive, RunState::Active)
    }

    fn transition(&self, from: RunState, to: RunState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Move towards `Inactive`.
    ///
    /// While a command is being applied the request is deferred until the
    /// loop completes it, so a command is never left half-applied.
    pub fn request_shutdown(&self) {
        loop {
            match self.state.compare_exchange(
                RunState::Active as u8,
                RunState::Inactive as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(current) if RunState::from_u8(current) == RunState::Inactive => return,
                Err(_) => {
                    self.deferred_shutdown.store(true, Ordering::Release);
                    if self.state() == RunState::CommandPending {
                        debug!("Shutdown deferred until the pending command completes");
                        return;
                    }
                }
            }
        }
    }

    /// Deposit a request and block until the loop has applied it.
    pub fn submit(&self, request: CommandRequest) -> Result<CommandOutcome> {
        if self.state() != RunState::Active {
            return Err(Error::MailboxClosed);
        }

        match self.request_tx.try_send(request) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => return Err(Error::MailboxBusy),
            Err(TrySendError::Disconnected(_)) => return Err(Error::MailboxClosed),
        }

        if !self.transition(RunState::Active, RunState::CommandPending) {
            // Shut down between the check and the deposit; withdraw the request
            let _ = self.request_rx.try_recv();
            return Err(Error::MailboxClosed);
        }

        loop {
            match self.outcome_rx.recv_timeout(COMPLETION_POLL) {
                Ok(outcome) => return Ok(outcome),
                Err(RecvTimeoutError::Timeout) => {
                    if self.is_inactive() {
                        // complete() publishes the state just before the outcome
                        return self
                            .outcome_rx
                            .recv_timeout(COMPLETION_POLL)
                            .map_err(|_| Error::Shutdown);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => return Err(Error::MailboxClosed),
            }
        }
    }

    /// Take the pending request, if the slot is full
    pub fn take(&self) -> Option<CommandRequest> {
        if self.state() != RunState::CommandPending {
            return None;
        }
        self.request_rx.try_recv().ok()
    }

    /// Hand the outcome back and empty the slot.
    ///
    /// A shutdown requested while the command ran takes effect here.
    pub fn complete(&self, outcome: CommandOutcome) {
        let next = if self.deferred_shutdown.swap(false, Ordering::AcqRel) {
            RunState::Inactive
        } else {
            RunState::Active
        };
        self.state.store(next as u8, Ordering::Release);
        let _ = self.outcome_tx.try_send(outcome);
    }
}

impl Default for Mailbox {
    fn default() -> Self {
        Self::new()
    }
}
