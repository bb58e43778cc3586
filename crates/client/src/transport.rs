use crossbeam_channel::{Receiver, Sender, TryRecvError, unbounded};
use parking_lot::Mutex;
use std::io::Write;
use std::sync::Arc;
use worldsim_protocol::{Message, MessageParser, WorldCommand, WorldCommandResponse, encode_frame};
use worldsim_server::Server;

use crate::TransportError;

/// Carries commands to a simulation backend and responses back.
pub trait Transport: Send + Sync {
    fn send(&self, cmd: WorldCommand) -> Result<(), TransportError>;

    /// Responses received since the last call. Never blocks.
    fn poll_responses(&self) -> Result<Vec<WorldCommandResponse>, TransportError>;
}

/// Transport to a [`Server`] in the same process.
pub struct LocalTransport {
    server: Arc<Server>,
    responses_tx: Sender<WorldCommandResponse>,
    responses_rx: Receiver<WorldCommandResponse>,
}

impl LocalTransport {
    pub fn new(server: Arc<Server>) -> Self {
        let (responses_tx, responses_rx) = unbounded();
        Self {
            server,
            responses_tx,
            responses_rx,
        }
    }

    pub fn server(&self) -> &Arc<Server> {
        &self.server
    }
}

impl Transport for LocalTransport {
    fn send(&self, cmd: WorldCommand) -> Result<(), TransportError> {
        self.server.submit(cmd, &self.responses_tx);
        Ok(())
    }

    fn poll_responses(&self) -> Result<Vec<WorldCommandResponse>, TransportError> {
        let mut out = Vec::new();
        loop {
            match self.responses_rx.try_recv() {
                Ok(response) => out.push(response),
                Err(TryRecvError::Empty) => return Ok(out),
                Err(TryRecvError::Disconnected) => return Err(TransportError::Disconnected),
            }
        }
    }
}

/// Transport writing frames to a byte stream.
///
/// Outgoing commands are framed and written to `W`. Incoming bytes, read by
/// whoever owns the other half of the connection, are handed to
/// [`StreamTransport::receive_bytes`].
pub struct StreamTransport<W> {
    writer: Mutex<W>,
    parser: Mutex<MessageParser>,
    inbox: Mutex<Vec<WorldCommandResponse>>,
}

impl<W: Write + Send> StreamTransport<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
            parser: Mutex::new(MessageParser::new()),
            inbox: Mutex::new(Vec::new()),
        }
    }

    /// Feed bytes received from the backend.
    pub fn receive_bytes(&self, data: &[u8]) -> Result<(), TransportError> {
        let messages = self.parser.lock().feed(data)?;
        let mut inbox = self.inbox.lock();
        for message in messages {
            match message {
                Message::WorldCommandResponse(response) => inbox.push(response),
                other => tracing::debug!(class = ?other.class(), "ignoring non-response message"),
            }
        }
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl<W: Write + Send> Transport for StreamTransport<W> {
    fn send(&self, cmd: WorldCommand) -> Result<(), TransportError> {
        let frame = encode_frame(&Message::WorldCommand(cmd))?;
        let mut writer = self.writer.lock();
        writer.write_all(&frame)?;
        writer.flush()?;
        Ok(())
    }

    fn poll_responses(&self) -> Result<Vec<WorldCommandResponse>, TransportError> {
        Ok(std::mem::take(&mut *self.inbox.lock()))
    }
}
