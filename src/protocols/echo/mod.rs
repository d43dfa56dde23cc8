//! Echo probe protocol.
//!
//! A liveness probe, not an application protocol:
//! - Client sends: `<payload>` followed by one `0xFF` sentinel byte
//! - Server echoes: `<payload>` exactly, without the sentinel
//!
//! ## Protocol Format
//!
//! ```text
//! Request:  <N arbitrary bytes other than 0xFF> 0xFF
//! Response: <the same N bytes>
//!
//! Example:
//! Request:  01 02 03 FF
//! Response: 01 02 03
//! ```
//!
//! The server never closes after a reply; a connection serves any number of
//! probes until the peer closes it. A client that gets no reply within its
//! deadline, or sees the connection close, treats the connection as dead.

pub mod handler;
pub mod parser;

pub use handler::handle_connection;
pub use parser::SENTINEL;
