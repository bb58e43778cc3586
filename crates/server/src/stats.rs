use std::time::Duration;

/// Counters published by the simulation thread after every frame.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameStats {
    pub frames: u64,
    pub ops_executed: u64,
    pub ops_failed: u64,
    /// Frames which took longer than the overrun budget.
    pub overruns: u64,
    pub last_frame_time: Duration,
    /// Average over the timer's history window.
    pub avg_frame_time: Duration,
    /// Maximum over the timer's history window.
    pub max_frame_time: Duration,
}

/// Frame accounting for the simulation thread.
///
/// Keeps the durations of the last `window` frames in a ring and folds every
/// recorded frame into a [`FrameStats`] snapshot. Frames slower than
/// `budget` count as overruns.
#[derive(Debug)]
pub struct FrameTimer {
    ring: Vec<Duration>,
    window: usize,
    next: usize,
    budget: Duration,
    stats: FrameStats,
}

impl FrameTimer {
    /// `window` is raised to 1 if zero.
    pub fn new(window: usize, budget: Duration) -> Self {
        let window = window.max(1);
        Self {
            ring: Vec::with_capacity(window),
            window,
            next: 0,
            budget,
            stats: FrameStats::default(),
        }
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Account for a finished frame. Returns whether it overran the budget.
    pub fn record(&mut self, elapsed: Duration, executed: u64, failed: u64) -> bool {
        if self.ring.len() < self.window {
            self.ring.push(elapsed);
        } else {
            self.ring[self.next] = elapsed;
        }
        self.next = (self.next + 1) % self.window;

        let overran = elapsed > self.budget;
        let stats = &mut self.stats;
        stats.frames += 1;
        stats.ops_executed += executed;
        stats.ops_failed += failed;
        stats.overruns += u64::from(overran);
        stats.last_frame_time = elapsed;
        stats.avg_frame_time = self.ring.iter().sum::<Duration>() / self.ring.len() as u32;
        stats.max_frame_time = self.ring.iter().copied().max().unwrap_or_default();
        overran
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    /// Number of frames in the history window.
    pub fn window_len(&self) -> usize {
        self.ring.len()
    }
}
