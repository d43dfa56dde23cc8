//! floodgate: a TCP echo-probe server with a hard connection cap.
//!
//! The server admits at most `connection_limit` concurrent connections.
//! Connections beyond the cap are reset at the accept boundary without any
//! I/O, and shutdown drains: new connections are refused while the ones
//! already admitted run until their peers close them.
//!
//! Log lines other tools watch for:
//! - `Total connections: <n>` on every admission and release
//! - `paused accepting connections` when the cap is first hit
//! - `shutting down` when draining begins

pub mod config;
pub mod probe;
pub mod protocols;
pub mod runtime;
pub mod server;
pub mod shutdown;

#[cfg(test)]
mod test_support;

pub use config::Config;
pub use server::{Server, ServerError};
pub use shutdown::{ServerState, ShutdownHandle};
