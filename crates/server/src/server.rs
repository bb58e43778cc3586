use crossbeam_channel::Sender;
use parking_lot::{Condvar, Mutex, RwLock, RwLockReadGuard};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use worldsim_kernel::{AsyncSubsystem, StepCompletion, WorldMutator, WorldOperation, WorldState};
use worldsim_protocol::{WorldCommand, WorldCommandResponse};

use crate::ServerError;
use crate::config::ServerConfig;
use crate::queue::{OperationQueue, QueuedOperation, ReplyTo};
use crate::stats::{FrameStats, FrameTimer};

/// Blocks the simulation thread until the background step started by the
/// previous frame has finished.
///
/// Called without the interframe lock held.
pub trait StepWait: Send + Sync {
    fn wait_for(&self);
}

impl StepWait for StepCompletion {
    fn wait_for(&self) {
        StepCompletion::wait_for(self);
    }
}

/// State shared between the [`Server`] handle and the simulation thread.
struct Shared {
    /// The interframe lock. Written only by the simulation thread.
    world: RwLock<WorldState>,
    queue: OperationQueue,
    /// Waits for the fluid step without touching the interframe lock.
    step: Arc<dyn StepWait>,
    terminated: AtomicBool,
    timer: Mutex<FrameTimer>,
    frame_done: Condvar,
}

/// Owns the world and runs the fixed-tick simulation on its own thread.
///
/// The thread starts on construction and is stopped and joined on drop.
/// Other threads feed it through [`Server::enqueue_op`] and observe the
/// world through [`Server::sync_safe_point`].
pub struct Server {
    shared: Arc<Shared>,
    config: ServerConfig,
    thread: Option<JoinHandle<()>>,
}

impl Server {
    /// Start a server over a fresh world of `config.terrain_size`.
    pub fn new(config: ServerConfig) -> Result<Self, ServerError> {
        config.validate()?;
        let world = WorldState::new(config.terrain_size)?;
        Self::with_world(config, world)
    }

    /// Start a server over an existing world.
    pub fn with_world(config: ServerConfig, world: WorldState) -> Result<Self, ServerError> {
        let step = Arc::new(world.fluid().completion());
        Self::start(config, world, step)
    }

    fn start(
        config: ServerConfig,
        world: WorldState,
        step: Arc<dyn StepWait>,
    ) -> Result<Self, ServerError> {
        config.validate()?;
        let shared = Arc::new(Shared {
            step,
            world: RwLock::new(world),
            queue: OperationQueue::new(),
            terminated: AtomicBool::new(false),
            timer: Mutex::new(FrameTimer::new(
                config.frame_history,
                config.overrun_threshold(),
            )),
            frame_done: Condvar::new(),
        });

        let thread_shared = Arc::clone(&shared);
        let thread_config = config.clone();
        let thread = thread::Builder::new()
            .name("simulation".into())
            .spawn(move || run(&thread_shared, &thread_config))?;

        tracing::info!(
            tick_interval_us = config.tick_interval_us,
            terrain_size = config.terrain_size,
            "simulation server started"
        );
        Ok(Self {
            shared,
            config,
            thread: Some(thread),
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Queue `op` for the next frame. Never waits for a frame to run.
    pub fn enqueue_op(&self, op: WorldOperation) {
        self.shared.queue.push(op.into());
    }

    /// Queue all of `ops` so that they execute in the same frame.
    pub fn enqueue_ops<I>(&self, ops: I)
    where
        I: IntoIterator<Item = WorldOperation>,
    {
        self.shared
            .queue
            .push_all(ops.into_iter().map(QueuedOperation::from));
    }

    /// Queue a command. Tokened commands get their result sent to `reply`
    /// after execution; tokenless ones are fire-and-forget.
    pub fn submit(&self, cmd: WorldCommand, reply: &Sender<WorldCommandResponse>) {
        let reply = cmd.wants_response().then(|| ReplyTo {
            token: cmd.token,
            sender: reply.clone(),
        });
        self.shared.queue.push(QueuedOperation { op: cmd.op, reply });
    }

    /// Shared access to the world between frames.
    ///
    /// The next frame cannot start mutating until the guard is dropped, so
    /// hold it briefly.
    pub fn sync_safe_point(&self) -> RwLockReadGuard<'_, WorldState> {
        self.shared.world.read()
    }

    pub fn stats(&self) -> FrameStats {
        self.shared.timer.lock().stats()
    }

    /// Block until `n` more frames have completed or `timeout` elapses.
    /// Returns whether the frames completed.
    pub fn wait_for_frames(&self, n: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut timer = self.shared.timer.lock();
        let target = timer.stats().frames + n;
        while timer.stats().frames < target {
            if self
                .shared
                .frame_done
                .wait_until(&mut timer, deadline)
                .timed_out()
            {
                return timer.stats().frames >= target;
            }
        }
        true
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shared.terminated.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("simulation thread panicked");
            }
        }
        tracing::info!(frames = self.stats().frames, "simulation server stopped");
    }
}

/// The tick loop.
///
/// Frame deadlines advance by exactly one interval per frame, so a late frame
/// does not move later deadlines. Frames whose deadline passed during an
/// overrun run back to back until the loop is on schedule again.
fn run(shared: &Shared, config: &ServerConfig) {
    let interval = config.tick_interval();
    let margin = config.busywait_margin();
    let mut buffer = Vec::new();
    let mut tnext_frame = Instant::now() + interval;

    while !shared.terminated.load(Ordering::Acquire) {
        let now = Instant::now();
        if now < tnext_frame {
            let remaining = tnext_frame - now;
            if remaining > margin {
                thread::sleep(remaining - margin);
            } else {
                std::hint::spin_loop();
            }
            continue;
        }

        let started = Instant::now();
        let (executed, failed) = game_frame(shared, &mut buffer);
        let elapsed = started.elapsed();
        tnext_frame += interval;

        let mut timer = shared.timer.lock();
        if timer.record(elapsed, executed, failed) {
            tracing::warn!(
                frame = timer.stats().frames,
                elapsed_us = elapsed.as_micros() as u64,
                budget_us = timer.budget().as_micros() as u64,
                "frame overran its budget"
            );
        }
        drop(timer);
        shared.frame_done.notify_all();
    }

    shared.step.wait_for();
}

/// Run one frame. Returns the number of operations executed and failed.
fn game_frame(shared: &Shared, buffer: &mut Vec<QueuedOperation>) -> (u64, u64) {
    let _span = tracing::debug_span!("game_frame").entered();

    // observers may keep reading the previous frame meanwhile
    shared.step.wait_for();

    let mut world = shared.world.write();
    shared.queue.swap_into(buffer);
    if !buffer.is_empty() {
        tracing::debug!(ops = buffer.len(), "executing operation batch");
    }

    let mut failed = 0;
    {
        let mut mutator = WorldMutator::new(&mut world);
        for queued in buffer.iter() {
            let result = queued.op.execute(&mut mutator);
            tracing::trace!(op = queued.op.name(), ?result, "operation executed");
            if !result.is_success() {
                failed += 1;
            }
            if let Some(reply) = &queued.reply {
                let response = WorldCommandResponse {
                    token: reply.token,
                    result,
                };
                if reply.sender.send(response).is_err() {
                    tracing::warn!(token = reply.token, "response receiver is gone");
                }
            }
        }
    }

    world.post_step();
    let executed = buffer.len() as u64;
    buffer.clear();

    world.fluid_mut().start();
    (executed, failed)
}
