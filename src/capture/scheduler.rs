//! Tick scheduling abstraction.
//!
//! The capture loop never owns a clock. It asks a `TickScheduler` to arm
//! the next tick and the host decides what a tick is: a repaint callback, a
//! timer, or a test harness stepping the loop by hand. This keeps the state
//! machine identical under any event loop.

use std::time::{Duration, Instant};

/// Cooperative tick source driving the capture loop.
pub trait TickScheduler {
    /// Arm the next tick. Idempotent while a tick is already pending.
    fn schedule_tick(&mut self);

    /// Discard any pending tick.
    fn cancel_tick(&mut self);

    /// True when a tick is armed and not yet delivered.
    fn tick_pending(&self) -> bool;
}

/// Scheduler stepped by hand. Used by tests and by hosts that already have
/// their own cadence.
#[derive(Default)]
pub struct ManualScheduler {
    pending: bool,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume the pending tick, if any. The caller then invokes the loop's
    /// tick handler.
    pub fn take_tick(&mut self) -> bool {
        std::mem::take(&mut self.pending)
    }
}

impl TickScheduler for ManualScheduler {
    fn schedule_tick(&mut self) {
        self.pending = true;
    }

    fn cancel_tick(&mut self) {
        self.pending = false;
    }

    fn tick_pending(&self) -> bool {
        self.pending
    }
}

/// Plain-timer scheduler for non-GUI hosts: ticks fire at a fixed interval
/// derived from the configured frame rate.
pub struct IntervalScheduler {
    interval: Duration,
    due: Option<Instant>,
}

impl IntervalScheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            due: None,
        }
    }

    /// Interval derived from a target frame rate; zero fps means 10 ticks
    /// per second.
    pub fn from_fps(target_fps: u32) -> Self {
        let millis = if target_fps == 0 {
            100
        } else {
            (1000 / target_fps).max(1) as u64
        };
        Self::new(Duration::from_millis(millis))
    }

    /// Sleep until the armed tick is due, then consume it. Returns false
    /// when no tick is armed.
    pub fn wait_tick(&mut self) -> bool {
        let Some(due) = self.due.take() else {
            return false;
        };
        let now = Instant::now();
        if due > now {
            std::thread::sleep(due - now);
        }
        true
    }
}

impl TickScheduler for IntervalScheduler {
    fn schedule_tick(&mut self) {
        if self.due.is_none() {
            self.due = Some(Instant::now() + self.interval);
        }
    }

    fn cancel_tick(&mut self) {
        self.due = None;
    }

    fn tick_pending(&self) -> bool {
        self.due.is_some()
    }
}
