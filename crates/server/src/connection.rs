use crossbeam_channel::{Receiver, Sender, unbounded};
use std::io::{ErrorKind, Read, Write};
use std::sync::Arc;
use worldsim_protocol::{
    LinkControl, Message, MessageParser, WorldCommandResponse, encode_frame,
};

use crate::ServerError;
use crate::server::Server;

/// Server end of a framed byte stream.
///
/// Incoming [`Message::WorldCommand`]s are submitted to the [`Server`] and
/// their responses framed back to the peer; pings are answered with pongs.
/// A protocol violation is returned to the caller, who is expected to drop
/// the connection.
pub struct Connection<W> {
    server: Arc<Server>,
    writer: W,
    parser: MessageParser,
    responses_tx: Sender<WorldCommandResponse>,
    responses_rx: Receiver<WorldCommandResponse>,
}

impl<W: Write> Connection<W> {
    pub fn new(server: Arc<Server>, writer: W) -> Self {
        let (responses_tx, responses_rx) = unbounded();
        Self {
            server,
            writer,
            parser: MessageParser::new(),
            responses_tx,
            responses_rx,
        }
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    /// Handle bytes received from the peer. Returns the number of complete
    /// messages they contained.
    pub fn receive_bytes(&mut self, data: &[u8]) -> Result<usize, ServerError> {
        let messages = self.parser.feed(data)?;
        let count = messages.len();
        for message in messages {
            match message {
                Message::WorldCommand(cmd) => {
                    tracing::trace!(token = cmd.token, op = cmd.op.name(), "command received");
                    self.server.submit(cmd, &self.responses_tx);
                }
                Message::LinkControl(LinkControl::Ping { seq }) => {
                    self.send(&Message::LinkControl(LinkControl::Pong { seq }))?;
                }
                other => {
                    tracing::debug!(class = ?other.class(), "ignoring unexpected message");
                }
            }
        }
        Ok(count)
    }

    /// Write every response produced since the last call. Never blocks on
    /// the simulation.
    pub fn flush_responses(&mut self) -> Result<usize, ServerError> {
        let mut sent = 0;
        while let Ok(response) = self.responses_rx.try_recv() {
            self.send(&Message::WorldCommandResponse(response))?;
            sent += 1;
        }
        Ok(sent)
    }

    /// Read from `reader` until end of stream, handling messages and
    /// flushing responses after every read.
    ///
    /// Responses to commands still queued when the stream ends are dropped.
    pub fn serve<R: Read>(&mut self, mut reader: R) -> Result<(), ServerError> {
        let mut buf = vec![0u8; 4096];
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            self.receive_bytes(&buf[..n])?;
            self.flush_responses()?;
        }
        self.flush_responses()?;
        tracing::debug!("peer closed the connection");
        Ok(())
    }

    fn send(&mut self, message: &Message) -> Result<(), ServerError> {
        let frame = encode_frame(message)?;
        self.writer.write_all(&frame)?;
        self.writer.flush()?;
        Ok(())
    }
}
