//! Wire protocol between simulation clients and the server.
//!
//! # Invariants
//! - Every frame starts with an 8-byte header: message class, payload size.
//! - Payloads never exceed [`MAX_MESSAGE_SIZE`].
//! - A tokenless [`WorldCommand`] never produces a response.

pub mod framing;
pub mod messages;

pub use framing::{HEADER_SIZE, MAX_MESSAGE_SIZE, MessageParser, decode_payload, encode_frame};
pub use messages::{LinkControl, Message, MessageClass, WorldCommand, WorldCommandResponse};

/// Errors from encoding or parsing frames.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("message of {size} bytes exceeds the maximum of {max}")]
    TooLarge { size: usize, max: u32 },
    #[error("unknown message class {0}")]
    UnknownClass(u32),
    #[error("CBOR serialization error: {0}")]
    CborEncode(String),
    #[error("CBOR deserialization error: {0}")]
    CborDecode(String),
}

/// Returns the crate name and version for diagnostics.
pub fn crate_info() -> &'static str {
    "worldsim-protocol v0.1.0"
}
