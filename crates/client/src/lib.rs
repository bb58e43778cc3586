//! Client side of the simulation.
//!
//! # Invariants
//! - Tokens are unique per client and never [`worldsim_common::NO_TOKEN`].
//! - A result callback is invoked at most once.
//! - The callback map has its own lock, independent of the world's.

pub mod client;
pub mod transport;

pub use client::{Client, ResultCallback};
pub use transport::{LocalTransport, StreamTransport, Transport};

/// A client talking to a server in the same process.
pub type LocalClient = Client<LocalTransport>;

/// Errors from sending commands or receiving responses.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("backend disconnected")]
    Disconnected,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("protocol error: {0}")]
    Protocol(#[from] worldsim_protocol::ProtocolError),
}

/// Returns the crate name and version for diagnostics.
pub fn crate_info() -> &'static str {
    "worldsim-client v0.1.0"
}
