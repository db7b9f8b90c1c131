//! Network layer: the per-connection protocol state machine.

mod connection;

pub use connection::{ConnState, Connection};
