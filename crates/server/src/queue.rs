use crossbeam_channel::Sender;
use parking_lot::Mutex;
use worldsim_common::Token;
use worldsim_kernel::WorldOperation;
use worldsim_protocol::WorldCommandResponse;

/// Where to deliver the result of an operation.
#[derive(Debug, Clone)]
pub struct ReplyTo {
    pub token: Token,
    pub sender: Sender<WorldCommandResponse>,
}

#[derive(Debug)]
pub struct QueuedOperation {
    pub op: WorldOperation,
    pub reply: Option<ReplyTo>,
}

impl From<WorldOperation> for QueuedOperation {
    fn from(op: WorldOperation) -> Self {
        Self { op, reply: None }
    }
}

/// Inbound operations waiting for the next frame.
///
/// Producers append under a short-lived mutex. The simulation thread swaps
/// the whole inbound vector with its (empty) frame buffer, so producers never
/// wait for operations to execute.
#[derive(Debug, Default)]
pub struct OperationQueue {
    inbound: Mutex<Vec<QueuedOperation>>,
}

impl OperationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, op: QueuedOperation) {
        self.inbound.lock().push(op);
    }

    /// Append all of `ops` under one lock acquisition, so they are
    /// picked up by the same frame.
    pub fn push_all<I>(&self, ops: I)
    where
        I: IntoIterator<Item = QueuedOperation>,
    {
        let ops: Vec<_> = ops.into_iter().collect();
        self.inbound.lock().extend(ops);
    }

    /// Exchange the inbound operations with `buffer`, which must be empty.
    pub fn swap_into(&self, buffer: &mut Vec<QueuedOperation>) {
        debug_assert!(buffer.is_empty());
        std::mem::swap(&mut *self.inbound.lock(), buffer);
    }

    pub fn len(&self) -> usize {
        self.inbound.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level(h: f32) -> QueuedOperation {
        WorldOperation::FluidOceanLevelSetHeight { height: h }.into()
    }

    #[test]
    fn swap_takes_everything_in_order() {
        let queue = OperationQueue::new();
        queue.push(level(1.0));
        queue.push_all([level(2.0), level(3.0)]);
        assert_eq!(queue.len(), 3);

        let mut buffer = Vec::new();
        queue.swap_into(&mut buffer);
        assert!(queue.is_empty());
        let heights: Vec<_> = buffer
            .iter()
            .map(|q| match q.op {
                WorldOperation::FluidOceanLevelSetHeight { height } => height,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(heights, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn concurrent_producers() {
        let queue = std::sync::Arc::new(OperationQueue::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let queue = queue.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        queue.push(WorldOperation::FluidReset.into());
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let mut buffer = Vec::new();
        queue.swap_into(&mut buffer);
        assert_eq!(buffer.len(), 400);
    }
}
