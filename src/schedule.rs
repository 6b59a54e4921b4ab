use core::fmt;
use std::time::{Duration, Instant};

/// Fixed-period trigger for the polling loop.
///
/// Due on the first check and then whenever at least `period` has passed
/// since it last fired. Late checks do not accumulate a backlog.
#[derive(Debug, Clone, Copy)]
pub struct Interval {
    period: Duration,
    last: Option<Instant>,
}

impl Interval {
    pub const fn new(period: Duration) -> Self {
        Self { period, last: None }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn due(&mut self, now: Instant) -> bool {
        let fire = match self.last {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.period,
        };
        if fire {
            self.last = Some(now);
        }
        fire
    }
}

/// Running count of attempts and failures for one sensor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub reads: u32,
    pub failures: u32,
}

impl Tally {
    pub fn record<T, E>(&mut self, outcome: &Result<T, E>) {
        self.reads = self.reads.wrapping_add(1);
        if outcome.is_err() {
            self.failures = self.failures.wrapping_add(1);
        }
    }
}

impl fmt::Display for Tally {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} failed", self.failures, self.reads)
    }
}
