//! Connection state machine for admitted TCP connections.
//!
//! A connection owns its byte stream and its admission slot. The slot is given
//! back exactly once, when the connection reaches `Closed`.

use super::counter::Slot;
use chrono::{DateTime, Utc};
use std::net::SocketAddr;

/// Current state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Serving probes.
    Open,
    /// Peer went away or the stream failed; teardown in progress.
    Closing,
    /// Slot released, stream dropped.
    Closed,
}

/// A single admitted client connection.
#[derive(Debug)]
pub struct Connection<S> {
    /// Underlying byte stream.
    pub stream: S,
    /// Remote address.
    pub peer: SocketAddr,
    /// When the gate admitted the connection.
    pub admitted_at: DateTime<Utc>,
    state: ConnState,
    slot: Option<Slot>,
}

impl<S> Connection<S> {
    /// Create a new connection in the open state.
    pub fn new(stream: S, peer: SocketAddr, slot: Slot) -> Self {
        Self {
            stream,
            peer,
            admitted_at: Utc::now(),
            state: ConnState::Open,
            slot: Some(slot),
        }
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    /// Mark connection for closing.
    pub fn begin_close(&mut self) {
        if self.state == ConnState::Open {
            self.state = ConnState::Closing;
        }
    }

    /// Release the admission slot and return the remaining admitted count.
    ///
    /// Returns `None` if the connection was already closed.
    pub fn close(&mut self) -> Option<usize> {
        let slot = self.slot.take()?;
        self.state = ConnState::Closed;
        Some(slot.release())
    }

    /// How long the connection has been admitted.
    pub fn age(&self) -> chrono::TimeDelta {
        Utc::now() - self.admitted_at
    }
}
