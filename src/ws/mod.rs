//! WebSocket transport for the replication protocol

pub mod handler;
pub mod protocol;

pub use protocol::{ClientMsg, ServerMsg};
