//! Reconnection with a fixed retry interval for serial link failures.
//!
//! The button box is a user-facing device: when the microcontroller is
//! unplugged or resets, the link must come back as soon as the port
//! reappears. Retries therefore use a short fixed interval and never give up.

use std::time::{Duration, Instant};

use crate::serial::{PortOpener, SerialTransport};

/// Default interval between reconnection attempts.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Reconnection state machine with a fixed retry interval.
#[derive(Debug)]
pub struct ReconnectState {
    interval: Duration,
    last_attempt: Option<Instant>,
    consecutive_failures: u32,
}

impl ReconnectState {
    /// Create a new reconnection state retrying every `interval`.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_attempt: None,
            consecutive_failures: 0,
        }
    }

    /// Create a new reconnection state with the default interval.
    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_RETRY_INTERVAL)
    }

    /// Check if enough time has elapsed to attempt reconnection.
    ///
    /// Returns `true` if no attempt has been made yet, or if the
    /// retry interval has elapsed since the last attempt.
    pub fn should_attempt(&self) -> bool {
        match self.last_attempt {
            None => true,
            Some(last) => last.elapsed() >= self.interval,
        }
    }

    /// Time left before the next attempt is allowed.
    pub fn remaining(&self) -> Duration {
        match self.last_attempt {
            None => Duration::ZERO,
            Some(last) => self.interval.saturating_sub(last.elapsed()),
        }
    }

    /// Record a failed reconnection attempt.
    pub fn record_failure(&mut self) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_attempt = Some(Instant::now());
    }

    /// Record a successful reconnection and reset the state.
    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.last_attempt = None;
    }

    /// Number of consecutive failed attempts.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Delay between attempts.
    pub fn interval(&self) -> Duration {
        self.interval
    }
}

/// Attempt to reopen the serial port, respecting the retry interval.
///
/// - Returns `None` without attempting if the interval hasn't elapsed.
/// - On success, records success and returns the new transport.
/// - On failure, records failure, logs the retry schedule, and returns `None`.
pub fn try_reopen<O: PortOpener>(
    state: &mut ReconnectState,
    opener: &mut O,
) -> Option<Box<dyn SerialTransport>> {
    if !state.should_attempt() {
        return None;
    }
    match opener.open() {
        Ok(transport) => {
            state.record_success();
            Some(transport)
        }
        Err(e) => {
            state.record_failure();
            // First failure at warn, the rest at debug so an unplugged box doesn't flood the log
            if state.consecutive_failures() == 1 {
                log::warn!(
                    "[serial] connect failed: {e} (retrying every {:.1}s)",
                    state.interval().as_secs_f64()
                );
            } else {
                log::debug!(
                    "[serial] connect failed: {e} (attempt {})",
                    state.consecutive_failures()
                );
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::mock::{MockOpener, MockTransport};

    #[test]
    fn default_interval() {
        let state = ReconnectState::with_defaults();
        assert_eq!(state.interval(), Duration::from_secs(1));
    }

    #[test]
    fn initial_should_attempt_is_true() {
        let state = ReconnectState::with_defaults();
        assert!(state.should_attempt());
        assert_eq!(state.consecutive_failures(), 0);
        assert_eq!(state.remaining(), Duration::ZERO);
    }

    #[test]
    fn interval_stays_fixed_across_failures() {
        let mut state = ReconnectState::new(Duration::from_millis(100));
        for n in 1..=5 {
            state.record_failure();
            assert_eq!(state.consecutive_failures(), n);
            assert_eq!(state.interval(), Duration::from_millis(100));
        }
    }

    #[test]
    fn should_attempt_false_immediately_after_failure() {
        let mut state = ReconnectState::new(Duration::from_secs(60));
        state.record_failure();
        assert!(!state.should_attempt());
        assert!(state.remaining() > Duration::from_secs(50));
    }

    #[test]
    fn should_attempt_true_after_interval_elapses() {
        let mut state = ReconnectState::new(Duration::from_millis(1));
        state.record_failure();
        std::thread::sleep(Duration::from_millis(10));
        assert!(state.should_attempt());
    }

    #[test]
    fn success_resets_state() {
        let mut state = ReconnectState::with_defaults();
        state.record_failure();
        state.record_failure();
        state.record_success();
        assert_eq!(state.consecutive_failures(), 0);
        assert!(state.should_attempt());
    }

    #[test]
    fn try_reopen_success_returns_transport() {
        let mut state = ReconnectState::new(Duration::from_secs(60));
        let mut opener = MockOpener::new(vec![Ok(MockTransport::new())]);
        assert!(try_reopen(&mut state, &mut opener).is_some());
        assert_eq!(state.consecutive_failures(), 0);
    }

    #[test]
    fn try_reopen_failure_waits_for_interval() {
        let mut state = ReconnectState::new(Duration::from_secs(60));
        let mut opener = MockOpener::new(vec![]);
        assert!(try_reopen(&mut state, &mut opener).is_none());
        assert_eq!(state.consecutive_failures(), 1);
        assert_eq!(opener.attempts(), 1);

        // Interval not elapsed: no second open attempt
        assert!(try_reopen(&mut state, &mut opener).is_none());
        assert_eq!(opener.attempts(), 1);
    }
}
