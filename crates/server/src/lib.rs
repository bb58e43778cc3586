//! Authoritative simulation server.
//!
//! # Invariants
//! - Only the simulation thread mutates the world, and only while holding
//!   the interframe lock exclusively.
//! - Operations execute once, in submission order.
//! - The wait for the previous fluid step happens outside the interframe
//!   lock; the next step starts before the lock is released.

pub mod config;
pub mod connection;
pub mod queue;
pub mod server;
pub mod stats;

pub use config::{ConfigError, ServerConfig};
pub use connection::Connection;
pub use queue::{OperationQueue, QueuedOperation, ReplyTo};
pub use server::{Server, StepWait};
pub use stats::{FrameStats, FrameTimer};

/// Errors from starting a [`Server`] or serving a [`Connection`].
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("protocol error: {0}")]
    Protocol(#[from] worldsim_protocol::ProtocolError),
}

/// Returns the crate name and version for diagnostics.
pub fn crate_info() -> &'static str {
    "worldsim-server v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_info_names_server() {
        assert!(crate_info().contains("server"));
    }
}
