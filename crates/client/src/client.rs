use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use worldsim_common::{NO_TOKEN, Token};
use worldsim_kernel::{WorldOperation, WorldOperationResult};
use worldsim_protocol::{WorldCommand, WorldCommandResponse};

use crate::TransportError;
use crate::transport::Transport;

/// One-shot handler for the result of a command.
pub type ResultCallback = Box<dyn FnOnce(WorldOperationResult) + Send>;

/// Sends world operations and routes their results to callbacks.
///
/// Each client owns its token counter. Tokens start at 1; [`NO_TOKEN`] marks
/// commands sent without a callback. A callback runs at most once, for the
/// first response carrying its token.
pub struct Client<T: Transport> {
    transport: T,
    next_token: AtomicU64,
    callbacks: Mutex<HashMap<Token, ResultCallback>>,
}

impl<T: Transport> Client<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            next_token: AtomicU64::new(1),
            callbacks: Mutex::new(HashMap::new()),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Send `op`, registering `callback` for its result if given.
    ///
    /// Returns the token assigned to the command, or [`NO_TOKEN`].
    pub fn send_command(
        &self,
        op: WorldOperation,
        callback: Option<ResultCallback>,
    ) -> Result<Token, TransportError> {
        let Some(callback) = callback else {
            self.transport.send(WorldCommand::tokenless(op))?;
            return Ok(NO_TOKEN);
        };

        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.callbacks.lock().insert(token, callback);
        if let Err(e) = self.transport.send(WorldCommand { token, op }) {
            self.callbacks.lock().remove(&token);
            return Err(e);
        }
        Ok(token)
    }

    /// Shorthand for [`Client::send_command`] with a callback.
    pub fn execute<F>(&self, op: WorldOperation, callback: F) -> Result<Token, TransportError>
    where
        F: FnOnce(WorldOperationResult) + Send + 'static,
    {
        self.send_command(op, Some(Box::new(callback)))
    }

    /// Dispatch a response to its callback. Returns false if no callback
    /// was waiting for the token.
    pub fn recv_response(&self, response: WorldCommandResponse) -> bool {
        let callback = self.callbacks.lock().remove(&response.token);
        match callback {
            Some(callback) => {
                callback(response.result);
                true
            }
            None => {
                tracing::warn!(token = response.token, "dropping response for unknown token");
                false
            }
        }
    }

    /// Dispatch every response the transport has received so far.
    pub fn pump_responses(&self) -> Result<usize, TransportError> {
        let responses = self.transport.poll_responses()?;
        let count = responses.len();
        for response in responses {
            self.recv_response(response);
        }
        Ok(count)
    }

    /// Pump responses until no callback is pending or `timeout` elapses.
    /// Returns whether all callbacks ran.
    pub fn wait_idle(&self, timeout: Duration) -> Result<bool, TransportError> {
        let deadline = Instant::now() + timeout;
        loop {
            self.pump_responses()?;
            if self.pending() == 0 {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    /// Number of callbacks waiting for a response.
    pub fn pending(&self) -> usize {
        self.callbacks.lock().len()
    }
}
