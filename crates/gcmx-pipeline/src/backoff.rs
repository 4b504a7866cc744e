//! # gcmx-pipeline: Idle Policy
//!
//! What the polling thread does after a poll that made no progress.

use std::time::Duration;

/// ## Performance Guarantee
/// Decisions are $O(1)$ with zero heap allocations on the hot path.
pub trait IdleStrategy: Send + Sync {
    /// Called after `misses` consecutive empty polls (starting at 1).
    fn idle(&self, misses: u32);
}

/// Fixed sleep between empty polls. A zero interval yields the time slice instead.
pub struct SleepIdle {
    interval: Duration,
}

impl SleepIdle {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl IdleStrategy for SleepIdle {
    fn idle(&self, _misses: u32) {
        if self.interval.is_zero() {
            std::thread::yield_now();
        } else {
            std::thread::sleep(self.interval);
        }
    }
}

/// Spins for the first `spins` empty polls, then sleeps.
pub struct SpinThenSleep {
    spins: u32,
    sleep: SleepIdle,
}

impl SpinThenSleep {
    pub fn new(spins: u32, interval: Duration) -> Self {
        Self {
            spins,
            sleep: SleepIdle::new(interval),
        }
    }
}

impl IdleStrategy for SpinThenSleep {
    fn idle(&self, misses: u32) {
        if misses <= self.spins {
            core::hint::spin_loop();
        } else {
            self.sleep.idle(misses);
        }
    }
}

/// Never gives up the core.
pub struct BusySpin;

impl IdleStrategy for BusySpin {
    fn idle(&self, _misses: u32) {
        core::hint::spin_loop();
    }
}

/// Policy for a poll interval and spin budget as found in the bench config.
pub fn idle_strategy_for(interval: Duration, spin_polls: u32) -> Box<dyn IdleStrategy> {
    if spin_polls == 0 {
        Box::new(SleepIdle::new(interval))
    } else {
        Box::new(SpinThenSleep::new(spin_polls, interval))
    }
}
