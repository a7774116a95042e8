//! Geometric backoff between server-error retries.

use std::time::Duration;

/// First backoff delay in milliseconds
pub const INITIAL_BACKOFF_MS: u64 = 7_000;

/// Growth factor applied after every wait
pub const BACKOFF_FACTOR: u64 = 7;

/// Upper bound of a single wait in milliseconds
pub const MAX_BACKOFF_MS: u64 = 300_000;

/// Backoff state of one call
///
/// Yields 7 s, 49 s, then 300 s for every later attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    current_ms: u64,
}

impl Backoff {
    /// Start a fresh sequence
    #[must_use]
    pub const fn new() -> Self {
        Self {
            current_ms: INITIAL_BACKOFF_MS,
        }
    }

    /// Delay to wait now, without advancing
    #[must_use]
    pub const fn current(&self) -> Duration {
        Duration::from_millis(self.current_ms)
    }

    /// Return the current delay and advance to the next one
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current();
        self.current_ms = self
            .current_ms
            .saturating_mul(BACKOFF_FACTOR)
            .min(MAX_BACKOFF_MS);
        delay
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
    fn test_sequence_grows_then_caps() {
        let mut backoff = Backoff::new();
        let delays: Vec<u64> = (0..5)
            .map(|_| u64::try_from(backoff.next_delay().as_millis()).unwrap())
            .collect();
        assert_eq!(delays, vec![7_000, 49_000, 300_000, 300_000, 300_000]);
    }

    #[test]
    fn test_current_does_not_advance() {
        let backoff = Backoff::default();
        assert_eq!(backoff.current(), Duration::from_secs(7));
        assert_eq!(backoff.current(), Duration::from_secs(7));
    }
}
