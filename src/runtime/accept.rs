//! The accept loop.
//!
//! One task owns the listening socket. Each accepted socket is offered to the
//! gate under the coordinator's state lock; admitted sockets get their own
//! handler task, everything else is reset immediately. Once draining begins the
//! loop issues no further accepts, closes the listener, and waits for the
//! admitted handlers before reporting `Stopped`.

use super::connection::Connection;
use super::counter::ConnectionCounter;
use super::gate::{AcceptGate, Admission};
use super::listener;
use crate::protocols::echo::handle_connection;
use crate::shutdown::{ServerState, ShutdownCoordinator};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

/// Pause after a failed accept (e.g. out of file descriptors) before retrying.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

pub(crate) struct AcceptLoop {
    listener: TcpListener,
    gate: AcceptGate,
    coordinator: Arc<ShutdownCoordinator>,
    handlers: JoinSet<()>,
    max_probe_size: usize,
    drain_timeout: Duration,
}

impl AcceptLoop {
    pub(crate) fn new(
        listener: TcpListener,
        gate: AcceptGate,
        coordinator: Arc<ShutdownCoordinator>,
        max_probe_size: usize,
        drain_timeout: Duration,
    ) -> Self {
        Self {
            listener,
            gate,
            coordinator,
            handlers: JoinSet::new(),
            max_probe_size,
            drain_timeout,
        }
    }

    /// Accept until draining begins, then close the listener and drain.
    pub(crate) async fn run(mut self) {
        loop {
            tokio::select! {
                biased;

                _ = self.coordinator.reached(ServerState::Draining) => break,

                res = self.listener.accept() => match res {
                    Ok((stream, peer)) => self.dispatch(stream, peer),
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                },

                Some(res) = self.handlers.join_next() => log_handler_exit(res),
            }
        }

        let AcceptLoop {
            listener,
            gate,
            coordinator,
            mut handlers,
            drain_timeout,
            ..
        } = self;

        drop(listener);
        info!(
            admitted = gate.admitted_total(),
            rejected = gate.rejected_total(),
            "Listener closed"
        );

        drain(&mut handlers, gate.counter(), drain_timeout).await;
        coordinator.mark_stopped();
        info!("Server stopped");
    }

    fn dispatch(&mut self, stream: TcpStream, peer: SocketAddr) {
        let gate = &mut self.gate;
        match self.coordinator.while_accepting(|| gate.decide(peer)) {
            Some(Admission::Admitted(slot)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
                }
                let conn = Connection::new(stream, peer, slot);
                self.handlers
                    .spawn(handle_connection(conn, self.max_probe_size));
            }
            Some(Admission::Rejected) => {
                debug!(peer = %peer, "Rejected connection at capacity");
                listener::reject(stream);
            }
            None => {
                debug!(peer = %peer, "Refused connection while draining");
                listener::reject(stream);
            }
        }
    }
}

/// Wait for admitted handlers to finish on their own, aborting any that are
/// still open when `timeout` elapses.
///
/// Aborted handlers release their slots as they are dropped, so the count is
/// logged once more after the abort.
async fn drain(handlers: &mut JoinSet<()>, counter: &ConnectionCounter, timeout: Duration) {
    if handlers.is_empty() {
        return;
    }

    info!(remaining = handlers.len(), "Waiting for open connections to finish");
    let finished = tokio::time::timeout(timeout, async {
        while let Some(res) = handlers.join_next().await {
            log_handler_exit(res);
        }
    })
    .await;

    if finished.is_err() {
        warn!(
            remaining = handlers.len(),
            "Drain timeout elapsed, closing remaining connections"
        );
        handlers.shutdown().await;
        info!("Total connections: {}", counter.current());
    }
}

fn log_handler_exit(res: Result<(), JoinError>) {
    if let Err(e) = res {
        if e.is_panic() {
            error!("A connection handler panicked: {e:?}");
        }
    }
}
