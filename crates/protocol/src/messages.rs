use serde::{Deserialize, Serialize};
use worldsim_common::{NO_TOKEN, Token};
use worldsim_kernel::{WorldOperation, WorldOperationResult};

/// Message class carried in every frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MessageClass {
    /// Link-level messages handled by the connection itself.
    LinkControl = 0,
    WorldCommand = 1,
    WorldCommandResponse = 2,
}

impl MessageClass {
    pub fn from_u32(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::LinkControl),
            1 => Some(Self::WorldCommand),
            2 => Some(Self::WorldCommandResponse),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkControl {
    Ping { seq: u64 },
    Pong { seq: u64 },
}

/// A world operation sent to the simulation.
///
/// `token` is [`NO_TOKEN`] when the sender does not want a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldCommand {
    pub token: Token,
    pub op: WorldOperation,
}

impl WorldCommand {
    pub fn tokenless(op: WorldOperation) -> Self {
        Self { token: NO_TOKEN, op }
    }

    pub fn wants_response(&self) -> bool {
        self.token != NO_TOKEN
    }
}

/// Result of a tokened [`WorldCommand`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldCommandResponse {
    pub token: Token,
    pub result: WorldOperationResult,
}

/// Any message that can travel in a frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    LinkControl(LinkControl),
    WorldCommand(WorldCommand),
    WorldCommandResponse(WorldCommandResponse),
}

impl Message {
    pub fn class(&self) -> MessageClass {
        match self {
            Self::LinkControl(_) => MessageClass::LinkControl,
            Self::WorldCommand(_) => MessageClass::WorldCommand,
            Self::WorldCommandResponse(_) => MessageClass::WorldCommandResponse,
        }
    }
}

impl From<WorldCommand> for Message {
    fn from(cmd: WorldCommand) -> Self {
        Self::WorldCommand(cmd)
    }
}

impl From<WorldCommandResponse> for Message {
    fn from(response: WorldCommandResponse) -> Self {
        Self::WorldCommandResponse(response)
    }
}
