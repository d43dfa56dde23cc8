//! Protocol implementations.
//!
//! - `echo`: sentinel-terminated echo probe used to check connection liveness
//!   (see `crate::probe` for the client side)

pub mod echo;
