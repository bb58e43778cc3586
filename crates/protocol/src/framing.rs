//! Length-prefixed frames.
//!
//! ```text
//! +-------------+-------------+----------------------+
//! | class u32LE | size u32LE  | CBOR payload (size)  |
//! +-------------+-------------+----------------------+
//! ```
//!
//! Frames larger than [`MAX_MESSAGE_SIZE`] or with an unknown class are
//! protocol violations; the parser reports them and starts over.

use crate::ProtocolError;
use crate::messages::{Message, MessageClass};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Room for a 60x60 chunk of 16 floats per cell plus 1 KiB of overhead.
pub const MAX_MESSAGE_SIZE: u32 = 60 * 60 * 16 * 4 + 1024;

pub const HEADER_SIZE: usize = 8;

/// Encode `message` into a complete frame.
pub fn encode_frame(message: &Message) -> Result<Vec<u8>, ProtocolError> {
    let mut frame = vec![0u8; HEADER_SIZE];
    match message {
        Message::LinkControl(m) => write_payload(m, &mut frame)?,
        Message::WorldCommand(m) => write_payload(m, &mut frame)?,
        Message::WorldCommandResponse(m) => write_payload(m, &mut frame)?,
    }
    let size = frame.len() - HEADER_SIZE;
    if size > MAX_MESSAGE_SIZE as usize {
        return Err(ProtocolError::TooLarge {
            size,
            max: MAX_MESSAGE_SIZE,
        });
    }
    frame[0..4].copy_from_slice(&(message.class() as u32).to_le_bytes());
    frame[4..8].copy_from_slice(&(size as u32).to_le_bytes());
    Ok(frame)
}

fn write_payload<T: Serialize>(value: &T, buf: &mut Vec<u8>) -> Result<(), ProtocolError> {
    ciborium::into_writer(value, buf).map_err(|e| ProtocolError::CborEncode(e.to_string()))
}

fn read_payload<T: DeserializeOwned>(data: &[u8]) -> Result<T, ProtocolError> {
    ciborium::from_reader(data).map_err(|e| ProtocolError::CborDecode(e.to_string()))
}

/// Decode a payload of the given class.
pub fn decode_payload(class: MessageClass, payload: &[u8]) -> Result<Message, ProtocolError> {
    Ok(match class {
        MessageClass::LinkControl => Message::LinkControl(read_payload(payload)?),
        MessageClass::WorldCommand => Message::WorldCommand(read_payload(payload)?),
        MessageClass::WorldCommandResponse => {
            Message::WorldCommandResponse(read_payload(payload)?)
        }
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecvState {
    Header,
    Payload { class: MessageClass, size: usize },
}

/// Incremental frame reader.
///
/// Bytes may arrive in chunks of any size; [`MessageParser::feed`] returns
/// every message completed by the new data.
#[derive(Debug)]
pub struct MessageParser {
    state: RecvState,
    buffer: Vec<u8>,
}

impl MessageParser {
    pub fn new() -> Self {
        Self {
            state: RecvState::Header,
            buffer: Vec::with_capacity(HEADER_SIZE),
        }
    }

    /// Drop any partially received frame.
    pub fn reset(&mut self) {
        self.state = RecvState::Header;
        self.buffer.clear();
    }

    /// Bytes still needed to complete the current header or payload.
    pub fn pending(&self) -> usize {
        self.barrier() - self.buffer.len()
    }

    fn barrier(&self) -> usize {
        match self.state {
            RecvState::Header => HEADER_SIZE,
            RecvState::Payload { size, .. } => size,
        }
    }

    /// Consume `data`, returning the messages it completes.
    ///
    /// On error the parser is reset and the remaining bytes of `data` are
    /// discarded; messages completed before the error are lost as well.
    pub fn feed(&mut self, mut data: &[u8]) -> Result<Vec<Message>, ProtocolError> {
        let mut messages = Vec::new();
        loop {
            let take = self.pending().min(data.len());
            self.buffer.extend_from_slice(&data[..take]);
            data = &data[take..];

            if self.pending() > 0 {
                return Ok(messages);
            }
            match self.advance() {
                Ok(Some(message)) => messages.push(message),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "protocol violation, resetting parser");
                    self.reset();
                    return Err(e);
                }
            }
        }
    }

    /// Handle a complete header or payload sitting in the buffer.
    fn advance(&mut self) -> Result<Option<Message>, ProtocolError> {
        match self.state {
            RecvState::Header => {
                let raw_class = u32::from_le_bytes([
                    self.buffer[0],
                    self.buffer[1],
                    self.buffer[2],
                    self.buffer[3],
                ]);
                let size = u32::from_le_bytes([
                    self.buffer[4],
                    self.buffer[5],
                    self.buffer[6],
                    self.buffer[7],
                ]);
                let class =
                    MessageClass::from_u32(raw_class).ok_or(ProtocolError::UnknownClass(raw_class))?;
                if size > MAX_MESSAGE_SIZE {
                    return Err(ProtocolError::TooLarge {
                        size: size as usize,
                        max: MAX_MESSAGE_SIZE,
                    });
                }
                self.buffer.clear();
                self.state = RecvState::Payload {
                    class,
                    size: size as usize,
                };
                Ok(None)
            }
            RecvState::Payload { class, .. } => {
                let message = decode_payload(class, &self.buffer)?;
                self.buffer.clear();
                self.state = RecvState::Header;
                Ok(Some(message))
            }
        }
    }
}

impl Default for MessageParser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{LinkControl, WorldCommand, WorldCommandResponse};
    use worldsim_common::ObjectId;
    use worldsim_kernel::{
        Brush, OperationDelta, OperationFailure, WorldOperation, WorldOperationResult,
    };

    fn raise() -> Message {
        Message::WorldCommand(WorldCommand {
            token: 4,
            op: WorldOperation::TerraformRaise {
                brush: Brush::uniform(10.0, 10.0, 3, 1.0),
            },
        })
    }

    #[test]
    fn header_layout() {
        let frame = encode_frame(&raise()).unwrap();
        assert_eq!(&frame[0..4], &1u32.to_le_bytes());
        let size = u32::from_le_bytes([frame[4], frame[5], frame[6], frame[7]]) as usize;
        assert_eq!(size, frame.len() - HEADER_SIZE);
    }

    #[test]
    fn whole_frame_parses() {
        let mut parser = MessageParser::new();
        let frame = encode_frame(&raise()).unwrap();
        assert_eq!(parser.feed(&frame).unwrap(), vec![raise()]);
        assert_eq!(parser.pending(), HEADER_SIZE);
    }

    #[test]
    fn byte_at_a_time() {
        let response = Message::WorldCommandResponse(WorldCommandResponse {
            token: 4,
            result: WorldOperationResult::Failure(OperationFailure::NoSuchObject(ObjectId(2))),
        });
        let frame = encode_frame(&response).unwrap();
        let mut parser = MessageParser::new();
        let mut out = Vec::new();
        for b in &frame {
            out.extend(parser.feed(std::slice::from_ref(b)).unwrap());
        }
        assert_eq!(out, vec![response]);
    }

    #[test]
    fn several_frames_in_one_chunk() {
        let ping = Message::LinkControl(LinkControl::Ping { seq: 7 });
        let done = Message::WorldCommandResponse(WorldCommandResponse {
            token: 1,
            result: WorldOperationResult::Success(OperationDelta::None),
        });
        let mut data = encode_frame(&ping).unwrap();
        data.extend(encode_frame(&raise()).unwrap());
        data.extend(encode_frame(&done).unwrap());
        let split = data.len() - 3;

        let mut parser = MessageParser::new();
        assert_eq!(parser.feed(&data[..split]).unwrap(), vec![ping, raise()]);
        assert_eq!(parser.feed(&data[split..]).unwrap(), vec![done]);
    }

    #[test]
    fn unknown_class_resets() {
        let mut parser = MessageParser::new();
        let mut frame = 9u32.to_le_bytes().to_vec();
        frame.extend(0u32.to_le_bytes());
        assert!(matches!(parser.feed(&frame), Err(ProtocolError::UnknownClass(9))));
        assert_eq!(parser.pending(), HEADER_SIZE);

        let good = encode_frame(&raise()).unwrap();
        assert_eq!(parser.feed(&good).unwrap().len(), 1);
    }

    #[test]
    fn oversize_frame_is_rejected() {
        let mut parser = MessageParser::new();
        let mut frame = 1u32.to_le_bytes().to_vec();
        frame.extend((MAX_MESSAGE_SIZE + 1).to_le_bytes());
        assert!(matches!(
            parser.feed(&frame),
            Err(ProtocolError::TooLarge { .. })
        ));
    }

    #[test]
    fn garbage_payload_is_a_decode_error() {
        let mut parser = MessageParser::new();
        let mut frame = 1u32.to_le_bytes().to_vec();
        frame.extend(2u32.to_le_bytes());
        frame.extend([0xff, 0xff]);
        assert!(matches!(parser.feed(&frame), Err(ProtocolError::CborDecode(_))));
    }

    #[test]
    fn max_message_size_value() {
        assert_eq!(MAX_MESSAGE_SIZE, 231_424);
    }
}
