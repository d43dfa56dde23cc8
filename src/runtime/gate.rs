//! Admission decisions at the accept boundary.

use super::counter::{ConnectionCounter, Slot};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

/// Outcome of offering a freshly accepted socket to the gate.
#[derive(Debug)]
pub enum Admission {
    /// The socket holds a slot and goes to a handler.
    Admitted(Slot),
    /// No capacity; the socket must be closed without I/O.
    Rejected,
}

/// Per-listener admission gate.
///
/// Owned by the accept loop, so saturation tracking needs no synchronization;
/// only the counter is shared with handlers.
#[derive(Debug)]
pub struct AcceptGate {
    counter: Arc<ConnectionCounter>,
    saturated: bool,
    admitted_total: u64,
    rejected_total: u64,
}

impl AcceptGate {
    pub fn new(counter: Arc<ConnectionCounter>) -> Self {
        Self {
            counter,
            saturated: false,
            admitted_total: 0,
            rejected_total: 0,
        }
    }

    /// Decide whether the connection from `peer` is admitted.
    ///
    /// The first rejection of a saturation episode logs the pause marker; the
    /// first admission after it logs the resume marker.
    pub fn decide(&mut self, peer: SocketAddr) -> Admission {
        match self.counter.try_admit() {
            Some(slot) => {
                if self.saturated {
                    self.saturated = false;
                    info!("resumed accepting connections");
                }
                self.admitted_total += 1;
                info!("new connection from {peer}");
                info!("Total connections: {}", slot.admitted_count());
                Admission::Admitted(slot)
            }
            None => {
                if !self.saturated {
                    self.saturated = true;
                    info!(limit = self.counter.limit(), "paused accepting connections");
                }
                self.rejected_total += 1;
                Admission::Rejected
            }
        }
    }

    pub fn counter(&self) -> &Arc<ConnectionCounter> {
        &self.counter
    }

    pub fn is_saturated(&self) -> bool {
        self.saturated
    }

    pub fn admitted_total(&self) -> u64 {
        self.admitted_total
    }

    pub fn rejected_total(&self) -> u64 {
        self.rejected_total
    }
}
