//! Reconnect backoff schedule

use std::time::Duration;

/// Default delay ladder between reconnect attempts, in seconds
pub const DEFAULT_SCHEDULE_SECS: [u64; 4] = [1, 5, 15, 30];

/// Default ceiling on consecutive failed attempts
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Capped delay ladder with a bounded attempt budget
///
/// `next_delay` walks the ladder and sticks at the last rung; once the
/// budget is spent it returns `None` and the caller gives up. A reset
/// after a successful connect starts the ladder over.
#[derive(Debug, Clone)]
pub struct ReconnectSchedule {
    delays: Vec<Duration>,
    max_attempts: u32,
    attempt: u32,
}

impl ReconnectSchedule {
    pub fn new(delays_secs: &[u64], max_attempts: u32) -> Self {
        let delays = if delays_secs.is_empty() {
            DEFAULT_SCHEDULE_SECS.to_vec()
        } else {
            delays_secs.to_vec()
        };

        Self {
            delays: delays.into_iter().map(Duration::from_secs).collect(),
            max_attempts,
            attempt: 0,
        }
    }

    /// Delay before the next attempt, `None` once the budget is spent
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_attempts {
            return None;
        }

        let index = (self.attempt as usize).min(self.delays.len() - 1);
        self.attempt += 1;
        Some(self.delays[index])
    }

    /// Attempts consumed since the last reset
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Forget past failures after a successful connect
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
