//! Shutdown coordination for the server.
//!
//! The coordinator holds the server's lifecycle state in a `watch` channel.
//! The accept loop checks the state under the channel's read lock before every
//! admission, and the drain trigger flips it under the write lock while logging
//! the marker, so no admission can be logged after "shutting down".

use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Lifecycle of a server instance. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ServerState {
    /// Listener bound, accept loop not yet running.
    Starting,
    /// Accepting connections.
    Running,
    /// No new admissions; listener closing, handlers finishing.
    Draining,
    /// Listener closed and all handlers gone.
    Stopped,
}

/// Owner of the lifecycle state.
#[derive(Debug)]
pub struct ShutdownCoordinator {
    tx: watch::Sender<ServerState>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ServerState::Starting);
        Self { tx }
    }

    pub fn state(&self) -> ServerState {
        *self.tx.borrow()
    }

    /// Begin draining. Returns `false` if draining had already begun.
    pub fn trigger(&self) -> bool {
        self.tx.send_if_modified(|state| {
            if *state >= ServerState::Draining {
                return false;
            }
            *state = ServerState::Draining;
            info!("shutting down");
            true
        })
    }

    pub(crate) fn mark_running(&self) {
        self.advance(ServerState::Running);
    }

    pub(crate) fn mark_stopped(&self) {
        self.advance(ServerState::Stopped);
    }

    fn advance(&self, next: ServerState) {
        self.tx.send_if_modified(|state| {
            if *state >= next {
                return false;
            }
            *state = next;
            true
        });
    }

    /// Run `f` only while the server still admits connections.
    ///
    /// The state stays read-locked for the duration of `f`, which makes the
    /// check and whatever `f` logs atomic with respect to `trigger`.
    pub(crate) fn while_accepting<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        let state = self.tx.borrow();
        if *state >= ServerState::Draining {
            return None;
        }
        let result = f();
        drop(state);
        Some(result)
    }

    /// Resolve once the state has reached `target`.
    pub async fn reached(&self, target: ServerState) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|state| *state >= target).await;
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Cloneable handle for triggering and observing shutdown from any task or thread.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    coordinator: Arc<ShutdownCoordinator>,
}

impl ShutdownHandle {
    pub(crate) fn new(coordinator: Arc<ShutdownCoordinator>) -> Self {
        Self { coordinator }
    }

    /// Trigger graceful shutdown. Safe to call repeatedly.
    pub fn shutdown(&self) -> bool {
        self.coordinator.trigger()
    }

    pub fn state(&self) -> ServerState {
        self.coordinator.state()
    }

    /// Check if shutdown has been initiated
    pub fn is_shutting_down(&self) -> bool {
        self.state() >= ServerState::Draining
    }

    /// Wait until the server has fully stopped.
    pub async fn stopped(&self) {
        self.coordinator.reached(ServerState::Stopped).await;
    }
}
