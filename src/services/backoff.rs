//! Retry delay sequencing for failed calls
//!
//! Prefers the server-supplied Retry-After hint; without one, falls back to
//! an indefinite exponential sequence. The sequencer only remembers a mode
//! and an attempt counter; any retry ceiling is the caller's job.

use std::time::Duration;
use tracing::debug;

const BACKOFF_FACTOR: u32 = 2;

/// Stateful delay generator for failed calls
#[derive(Debug)]
pub struct BackoffSequencer {
    base: Duration,
    attempt: u32,
}

impl BackoffSequencer {
    pub fn new(base: Duration) -> Self {
        Self { base, attempt: 0 }
    }

    /// Delay to sleep before the next retry.
    ///
    /// A hinted failure yields exactly the hint and resets the exponential
    /// counter, so a later non-hinted failure starts back at the base
    /// delay. A non-hinted failure yields base * 2^attempt and keeps
    /// growing across consecutive non-hinted failures.
    pub fn next_delay(&mut self, retry_after: Option<Duration>) -> Duration {
        match retry_after {
            Some(hint) => {
                debug!("Backoff: honoring Retry-After hint of {:?}", hint);
                self.attempt = 0;
                hint
            }
            None => {
                let factor = BACKOFF_FACTOR.saturating_pow(self.attempt);
                let delay = self.base.saturating_mul(factor);
                self.attempt = self.attempt.saturating_add(1);
                debug!("Backoff: exponential delay {:?} (attempt {})", delay, self.attempt);
                delay
            }
        }
    }

    /// A successful call ends the failure streak
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_growth() {
        let mut backoff = BackoffSequencer::new(Duration::from_millis(100));
        assert_eq!(backoff.next_delay(None), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(None), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(None), Duration::from_millis(400));
        assert_eq!(backoff.next_delay(None), Duration::from_millis(800));
    }

    #[test]
    fn test_hint_taken_verbatim_then_base_resumes() {
        let mut backoff = BackoffSequencer::new(Duration::from_secs(1));
        // 429 with Retry-After: 5
        assert_eq!(
            backoff.next_delay(Some(Duration::from_secs(5))),
            Duration::from_secs(5)
        );
        // an immediate non-hinted failure restarts the exponential
        // sequence from the base, never repeating the hint
        assert_eq!(backoff.next_delay(None), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(None), Duration::from_secs(2));
    }

    #[test]
    fn test_hint_resets_mid_sequence() {
        let mut backoff = BackoffSequencer::new(Duration::from_secs(1));
        backoff.next_delay(None);
        backoff.next_delay(None);
        assert_eq!(backoff.next_delay(None), Duration::from_secs(4));

        backoff.next_delay(Some(Duration::from_secs(30)));
        assert_eq!(backoff.next_delay(None), Duration::from_secs(1));
    }

    #[test]
    fn test_reset_on_success() {
        let mut backoff = BackoffSequencer::new(Duration::from_secs(1));
        backoff.next_delay(None);
        backoff.next_delay(None);
        backoff.reset();
        assert_eq!(backoff.next_delay(None), Duration::from_secs(1));
    }

    #[test]
    fn test_sequence_is_unbounded() {
        let mut backoff = BackoffSequencer::new(Duration::from_secs(1));
        let mut last = Duration::ZERO;
        for _ in 0..20 {
            let next = backoff.next_delay(None);
            assert!(next >= last);
            last = next;
        }
        assert!(last >= Duration::from_secs(1 << 19));
    }
}
