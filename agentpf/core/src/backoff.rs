use std::time::Duration;

/// Capped exponential backoff.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Backoff {
    pub min: Duration,
    pub max: Duration,
}

/// The delays of a [`Backoff`], doubling from `min` until they reach `max`.
#[derive(Clone, Debug)]
pub struct Delays {
    backoff: Backoff,
    next: Duration,
}

// === impl Backoff ===

impl Default for Backoff {
    fn default() -> Self {
        Self {
            min: Duration::from_millis(100),
            max: Duration::from_secs(15),
        }
    }
}

impl Backoff {
    pub fn delays(&self) -> Delays {
        Delays {
            backoff: *self,
            next: self.min.min(self.max),
        }
    }
}

// === impl Delays ===

impl Delays {
    pub fn reset(&mut self) {
        self.next = self.backoff.min.min(self.backoff.max);
    }
}

impl Iterator for Delays {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let delay = self.next;
        self.next = delay.saturating_mul(2).min(self.backoff.max);
        Some(delay)
    }
}
