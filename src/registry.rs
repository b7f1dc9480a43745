//! Array-backed registry of live connections.
//!
//! Slot zero is reserved for the listening endpoint and counts towards
//! occupancy and capacity. Client entries are unordered: removal swaps the
//! last entry into the freed slot, so indices are not stable across a removal.
//! Capacity doubles when every slot is taken and halves once occupancy drops
//! under half of it, never going below the configured floor.

use crate::network::{Connection, ConnectionId, Readiness};
use std::fmt;
use std::net::SocketAddr;

/// Registry admission failure; carries the handle back so the caller closes it
pub struct Rejected<S> {
    pub stream: S,
    pub addr: Option<SocketAddr>,
}

impl<S> fmt::Debug for Rejected<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rejected").field("addr", &self.addr).finish()
    }
}

impl<S> fmt::Display for Rejected<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "registry allocation failed")
    }
}

/// Registry of client connections plus the listening endpoint
pub struct Registry<L, S> {
    listener: L,
    connections: Vec<Connection<S>>,
    capacity: usize,
    min_capacity: usize,
    max_message: usize,
    next_id: ConnectionId,
}

impl<L, S> Registry<L, S> {
    /// Create a registry whose only entry is the listener
    pub fn new(listener: L, min_capacity: usize, max_message: usize) -> Self {
        let min_capacity = min_capacity.max(2);

        Self {
            listener,
            connections: Vec::with_capacity(min_capacity - 1),
            capacity: min_capacity,
            min_capacity,
            max_message,
            next_id: 1,
        }
    }

    pub fn listener(&self) -> &L {
        &self.listener
    }

    pub fn listener_mut(&mut self) -> &mut L {
        &mut self.listener
    }

    /// Number of client connections, listener excluded
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Occupied slots, listener included
    pub fn occupancy(&self) -> usize {
        self.connections.len() + 1
    }

    /// Slots available before the next growth, listener included
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn min_capacity(&self) -> usize {
        self.min_capacity
    }

    /// Register a freshly accepted stream with full pulse credits.
    ///
    /// Grows the backing storage first when every slot is taken. On
    /// allocation failure the registry is left untouched.
    pub fn add(&mut self, stream: S, addr: Option<SocketAddr>) -> Result<ConnectionId, Rejected<S>> {
        if self.occupancy() >= self.capacity {
            let grown = self.capacity * 2;
            let additional = grown - 1 - self.connections.len();
            if self.connections.try_reserve_exact(additional).is_err() {
                return Err(Rejected { stream, addr });
            }
            self.capacity = grown;
        }

        let id = self.next_id;
        self.next_id += 1;
        self.connections
            .push(Connection::new(id, stream, addr, self.max_message));
        Ok(id)
    }

    /// Swap-remove the entry at `index`, handing it back for closing.
    ///
    /// The last entry moves into `index`; callers iterating by index must
    /// revisit the same position.
    pub fn remove(&mut self, index: usize) -> Connection<S> {
        let removed = self.connections.swap_remove(index);

        let half = self.capacity / 2;
        if self.occupancy() < half && half >= self.min_capacity {
            self.capacity = half;
            self.connections.shrink_to(half - 1);
        }

        removed
    }

    /// Remove by identifier
    pub fn remove_id(&mut self, id: ConnectionId) -> Option<Connection<S>> {
        self.position(id).map(|index| self.remove(index))
    }

    pub fn position(&self, id: ConnectionId) -> Option<usize> {
        self.connections.iter().position(|c| c.id() == id)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.position(id).is_some()
    }

    pub fn get(&self, index: usize) -> Option<&Connection<S>> {
        self.connections.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Connection<S>> {
        self.connections.get_mut(index)
    }

    pub fn find_mut(&mut self, id: ConnectionId) -> Option<&mut Connection<S>> {
        self.connections.iter_mut().find(|c| c.id() == id)
    }

    /// Client connections in slot order; the listener is never yielded
    pub fn iter(&self) -> impl Iterator<Item = &Connection<S>> + '_ {
        self.connections.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Connection<S>> + '_ {
        self.connections.iter_mut()
    }

    /// Identifiers present at the time of the call
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.connections.iter().map(Connection::id).collect()
    }

    /// Record readiness reported by the poller; unknown ids are ignored
    pub fn mark_ready(&mut self, id: ConnectionId, readiness: Readiness) -> bool {
        match self.find_mut(id) {
            Some(conn) => {
                conn.mark_ready(readiness);
                true
            }
            None => false,
        }
    }

    /// Identifiers of connections carrying an unserviced event
    pub fn ready_ids(&self) -> Vec<ConnectionId> {
        self.connections
            .iter()
            .filter(|c| c.has_pending_event())
            .map(Connection::id)
            .collect()
    }

    /// Tear the registry down into the listener and every remaining connection
    pub fn into_parts(self) -> (L, Vec<Connection<S>>) {
        (self.listener, self.connections)
    }
}

impl<L, S> fmt::Debug for Registry<L, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("connections", &self.ids())
            .field("capacity", &self.capacity)
            .field("min_capacity", &self.min_capacity)
            .finish()
    }
}
