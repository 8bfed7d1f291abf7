//! Exponential backoff for failed tracker announces (spec 5, "Cancellation
//! and timeouts").
use std::time::Duration;

const INITIAL: Duration = Duration::from_secs(15);
const CAP: Duration = Duration::from_secs(15 * 60);

/// Tracks the next retry delay after a run of failed announces.
///
/// Starts at 15s and doubles on every consecutive failure, capped at the
/// tracker's advertised `interval` (once known) or 15 minutes, whichever
/// applies. [`Backoff::reset`] on a successful announce.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    next: Duration,
    cap: Duration,
}

impl Backoff {
    pub fn new() -> Self {
        Backoff {
            next: INITIAL,
            cap: CAP,
        }
    }

    /// Narrows the cap to the tracker's advertised re-announce interval,
    /// once one has been observed.
    pub fn set_interval_cap(&mut self, interval: Duration) {
        if interval > Duration::ZERO {
            self.cap = interval.min(CAP);
        }
    }

    pub fn reset(&mut self) {
        self.next = INITIAL;
    }

    /// Returns the delay to wait before the next retry, then doubles it
    /// (capped) for next time.
    pub fn advance(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(self.cap);
        delay
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}
