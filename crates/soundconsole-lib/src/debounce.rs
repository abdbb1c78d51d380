//! Debouncing for mechanical inputs.
//!
//! - [`PressDebouncer`] applies a per-button time window to press events.
//! - [`StableDebouncer`] commits a sampled value only after it has been seen
//!   for a number of consecutive samples (used for the rotary switch).

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Default press debounce window.
pub const DEFAULT_PRESS_WINDOW: Duration = Duration::from_millis(80);

/// Per-button time-window debouncer.
///
/// A press for button X is suppressed if another *accepted* press for X
/// happened less than `window` ago. Buttons are fully independent.
#[derive(Debug)]
pub struct PressDebouncer {
    window: Duration,
    last_accepted: HashMap<u8, Instant>,
}

impl PressDebouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_accepted: HashMap::new(),
        }
    }

    /// Returns `true` if the press is accepted (and records it).
    pub fn accept(&mut self, button_id: u8, at: Instant) -> bool {
        if let Some(&last) = self.last_accepted.get(&button_id)
            && at.saturating_duration_since(last) < self.window
        {
            return false;
        }
        self.last_accepted.insert(button_id, at);
        true
    }
}

impl Default for PressDebouncer {
    fn default() -> Self {
        Self::new(DEFAULT_PRESS_WINDOW)
    }
}

/// Consecutive-sample stability filter.
///
/// Feed one sample per tick. A sample different from the committed value
/// becomes a candidate; the candidate is committed once it has been seen
/// `threshold` times in a row. Samples equal to the committed value clear
/// any candidate. `None` samples (unreadable / indeterminate) are ignored
/// for commit purposes but break a candidate's streak.
#[derive(Debug)]
pub struct StableDebouncer<T> {
    threshold: u32,
    current: Option<T>,
    pending: Option<T>,
    stable: u32,
}

impl<T: Copy + PartialEq> StableDebouncer<T> {
    /// Create a debouncer with the given threshold (clamped to at least 1)
    /// and initial committed value.
    pub fn new(threshold: u32, initial: Option<T>) -> Self {
        StableDebouncer {
            threshold: threshold.max(1),
            current: initial,
            pending: None,
            stable: 0,
        }
    }

    /// Feed a sample. Returns `Some(value)` when a new value is committed.
    pub fn update(&mut self, sample: Option<T>) -> Option<T> {
        let Some(value) = sample else {
            self.pending = None;
            self.stable = 0;
            return None;
        };
        if Some(value) == self.current {
            self.pending = None;
            self.stable = 0;
            return None;
        }
        if Some(value) == self.pending {
            self.stable += 1;
        } else {
            self.pending = Some(value);
            self.stable = 1;
        }
        if self.stable >= self.threshold {
            self.current = Some(value);
            self.pending = None;
            self.stable = 0;
            return Some(value);
        }
        None
    }

    /// Currently committed value.
    pub fn current(&self) -> Option<T> {
        self.current
    }
}
