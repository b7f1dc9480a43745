//! Liveness probing for idle connections.
//!
//! The monitor runs inside the event loop. Each sweep spends one credit from
//! every connection without an unserviced event and probes it; a connection
//! that runs out of credits is evicted. Inbound bytes refresh credits on the
//! normal read path, so the monitor only looks at timing.

use crate::mailbox::Mailbox;
use crate::network::Connection;
use crate::registry::Registry;
use std::io;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Result of one sweep
#[derive(Debug)]
pub struct Sweep<S> {
    /// Unresponsive connections, already out of the registry
    pub evicted: Vec<Connection<S>>,
    pub probed: usize,
    pub skipped: usize,
    /// The server went inactive mid-scan
    pub interrupted: bool,
}

impl<S> Default for Sweep<S> {
    fn default() -> Self {
        Self {
            evicted: Vec::new(),
            probed: 0,
            skipped: 0,
            interrupted: false,
        }
    }
}

#[derive(Debug)]
pub struct PulseMonitor {
    interval: Duration,
    last_sweep: Instant,
}

impl PulseMonitor {
    pub fn new(interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            last_sweep: now,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Whether a sweep is due; a due check restarts the interval
    pub fn is_due(&mut self, now: Instant) -> bool {
        if now.saturating_duration_since(self.last_sweep) >= self.interval {
            self.last_sweep = now;
            true
        } else {
            false
        }
    }

    /// Run one probe cycle over the registry.
    ///
    /// Connections with an unserviced event are skipped: the pending read
    /// either proves liveness or reports the disconnect. Probe failures are
    /// logged and otherwise ignored.
    pub fn sweep<L, S, F>(
        &self,
        registry: &mut Registry<L, S>,
        mailbox: &Mailbox,
        mut probe: F,
    ) -> Sweep<S>
    where
        F: FnMut(&mut Connection<S>) -> io::Result<usize>,
    {
        let mut sweep = Sweep::default();
        let mut index = 0;

        while let Some(conn) = registry.get_mut(index) {
            if mailbox.is_inactive() {
                sweep.interrupted = true;
                return sweep;
            }

            if conn.has_pending_event() {
                sweep.skipped += 1;
                index += 1;
                continue;
            }

            if conn.spend_credit() == 0 {
                debug!("Client {} ran out of pulse credits", conn.id());
                // The last entry now sits at `index`
                sweep.evicted.push(registry.remove(index));
                continue;
            }

            if let Err(e) = probe(conn) {
                warn!("Failed to send pulse to client {}: {}", conn.id(), e);
            }
            sweep.probed += 1;
            index += 1;
        }

        debug!(
            probed = sweep.probed,
            skipped = sweep.skipped,
            evicted = sweep.evicted.len(),
            "Pulse sweep complete"
        );
        sweep
    }
}
