//! Reconnect backoff.

use embassy_time::Duration;

/// Delay before the first reconnect attempt.
pub const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
/// Upper bound for the reconnect delay.
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Exponential backoff: 1 s, 2 s, 4 s, ... capped at 60 s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    next: Duration,
}

impl Backoff {
    pub const fn new() -> Self {
        Self {
            next: INITIAL_BACKOFF,
        }
    }

    /// Returns the delay for the current failure and doubles the following one.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = if delay >= MAX_BACKOFF / 2 {
            MAX_BACKOFF
        } else {
            delay * 2
        };
        delay
    }

    /// Back to the initial delay, after a successful connection.
    pub fn reset(&mut self) {
        self.next = INITIAL_BACKOFF;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_up_to_the_cap() {
        let mut backoff = Backoff::new();
        let secs: [u64; 9] = core::array::from_fn(|_| backoff.next_delay().as_secs());
        assert_eq!(secs, [1, 2, 4, 8, 16, 32, 60, 60, 60]);
    }

    #[test]
    fn reset_restarts_at_one_second() {
        let mut backoff = Backoff::new();
        for _ in 0..10 {
            backoff.next_delay();
        }
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_secs(2));
    }
}
