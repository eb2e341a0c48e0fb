//! Retry budget and delay schedule
//!
//! Retries are always an iterative loop with an explicit attempt counter.
//! `Backoff` only answers "how long before attempt N+1".

use std::time::Duration;

/// Delay schedule between attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backoff {
    /// Same pause before every retry.
    Fixed(Duration),
    /// Explicit per-retry delays; the last entry repeats once the table runs out.
    Table(Vec<Duration>),
}

impl Backoff {
    /// Doubling table starting at `initial`, `steps` entries long, capped at `max`.
    pub fn exponential(initial: Duration, max: Duration, steps: usize) -> Self {
        let mut table = Vec::with_capacity(steps);
        let mut delay = initial;
        for _ in 0..steps {
            table.push(delay.min(max));
            delay = delay.saturating_mul(2);
        }
        Backoff::Table(table)
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self {
            Backoff::Fixed(delay) => *delay,
            Backoff::Table(table) => {
                let idx = (attempt.saturating_sub(1) as usize).min(table.len().saturating_sub(1));
                table.get(idx).copied().unwrap_or(Duration::ZERO)
            }
        }
    }
}

/// Attempt budget plus delay schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// A budget of 0 is treated as a single attempt.
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self::new(max_attempts, Backoff::Fixed(delay))
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// True when another attempt may follow failed attempt `attempt`.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}
