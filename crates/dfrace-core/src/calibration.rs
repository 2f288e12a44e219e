//! Sweep of the mutator's pre-write delay.
//!
//! The distance between a target's validation read and its consumption read
//! is not known up front, so the delay is stepped by one microsecond per
//! cycle and wrapped back to 1 once it reaches the bound.

use std::time::{Duration, Instant};

/// How the mutator waits out the calibrated delay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DelayMode {
    /// `thread::sleep`. Coarse; granularity depends on the platform timer.
    #[default]
    Sleep,
    /// Busy-wait on a monotonic clock until the deadline.
    Spin,
}

impl DelayMode {
    pub fn wait(self, delay: Duration) {
        match self {
            DelayMode::Sleep => std::thread::sleep(delay),
            DelayMode::Spin => {
                let deadline = Instant::now() + delay;
                while Instant::now() < deadline {
                    std::hint::spin_loop();
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayCalibration {
    current_us: u64,
    bound_us: u64,
}

impl DelayCalibration {
    /// `bound_us` is clamped to at least 1.
    pub fn new(initial_us: u64, bound_us: u64) -> Self {
        Self {
            current_us: initial_us,
            bound_us: bound_us.max(1),
        }
    }

    pub fn current_us(&self) -> u64 {
        self.current_us
    }

    pub fn bound_us(&self) -> u64 {
        self.bound_us
    }

    pub fn current(&self) -> Duration {
        Duration::from_micros(self.current_us)
    }

    /// Step to the next delay and return it.
    pub fn advance(&mut self) -> u64 {
        self.current_us = if self.current_us >= self.bound_us {
            1
        } else {
            self.current_us + 1
        };
        self.current_us
    }
}

impl Iterator for DelayCalibration {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        Some(self.advance())
    }
}
