//! Connection admission runtime.
//!
//! - `ConnectionCounter`: shared count of admitted connections and its limit
//! - `AcceptGate`: admit-or-reject decision per accepted socket
//! - `Connection`: one admitted connection's state
//! - `AcceptLoop`: owns the listener and drives the above until draining

mod accept;
mod connection;
mod counter;
mod gate;
pub mod listener;

pub(crate) use accept::AcceptLoop;
pub use connection::{ConnState, Connection};
pub use counter::{ConnectionCounter, Slot};
pub use gate::{AcceptGate, Admission};
