//! Rotary channel selector monitoring.
//!
//! The selector drives exactly one of N inputs when it rests on a position.
//! [`ChannelMonitor`] samples the inputs on a fixed tick, classifies each
//! reading, and commits a new channel only after it has been stable for a
//! configured number of ticks. Committed values are published through the
//! shared [`ChannelState`] cell, which the profile resolver reads on every
//! press.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Duration;

use crate::debounce::StableDebouncer;
use crate::gpio::ChannelInputs;
use crate::protocol;

/// Lock-free shared channel cell. `0` encodes "no channel yet".
#[derive(Debug, Clone, Default)]
pub struct ChannelState {
    inner: Arc<AtomicU8>,
}

impl ChannelState {
    pub fn new(initial: Option<u8>) -> Self {
        let state = Self::default();
        state.set(initial);
        state
    }

    /// Currently committed channel.
    pub fn get(&self) -> Option<u8> {
        match self.inner.load(Ordering::Acquire) {
            0 => None,
            ch => Some(ch),
        }
    }

    /// Publish a channel. Out-of-range values are stored as "none".
    ///
    /// Only the channel monitor writes this in a running pipeline.
    pub fn set(&self, channel: Option<u8>) {
        let raw = channel.filter(|&c| protocol::is_valid_channel(c)).unwrap_or(0);
        self.inner.store(raw, Ordering::Release);
    }
}

/// A committed channel transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelChanged {
    pub from: Option<u8>,
    pub to: u8,
}

/// Map raw input levels to a channel.
///
/// Returns `Some(n)` (1-based) iff exactly one input is asserted. Zero or
/// several asserted inputs are indeterminate (switch between detents, or a
/// wiring fault) and return `None`.
pub fn classify(levels: &[bool], active_low: bool) -> Option<u8> {
    let mut asserted = levels
        .iter()
        .enumerate()
        .filter(|&(_, &level)| level != active_low)
        .map(|(i, _)| i);
    let first = asserted.next()?;
    if asserted.next().is_some() {
        return None;
    }
    u8::try_from(first + 1).ok()
}

/// Default sampling interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default number of identical consecutive samples required to commit.
pub const DEFAULT_STABLE_TICKS: u32 = 2;

/// Samples channel inputs and publishes debounced channel changes.
pub struct ChannelMonitor<I: ChannelInputs> {
    inputs: I,
    active_low: bool,
    debouncer: StableDebouncer<u8>,
    state: ChannelState,
    read_failing: bool,
}

impl<I: ChannelInputs> ChannelMonitor<I> {
    /// Create a monitor publishing into `state`. Whatever `state` already
    /// holds (e.g. a configured initial channel) is the starting value.
    pub fn new(inputs: I, active_low: bool, stable_ticks: u32, state: ChannelState) -> Self {
        let debouncer = StableDebouncer::new(stable_ticks, state.get());
        Self {
            inputs,
            active_low,
            debouncer,
            state,
            read_failing: false,
        }
    }

    pub fn state(&self) -> &ChannelState {
        &self.state
    }

    /// Take one sample. Returns the transition if this sample committed one.
    pub fn tick(&mut self) -> Option<ChannelChanged> {
        let levels = match self.inputs.read_levels() {
            Ok(levels) => {
                if self.read_failing {
                    log::info!("[channel] inputs readable again");
                    self.read_failing = false;
                }
                levels
            }
            Err(e) => {
                if !self.read_failing {
                    log::warn!("[channel] read failed: {e}");
                    self.read_failing = true;
                }
                // Treated as indeterminate: the previous channel is retained
                self.debouncer.update(None);
                return None;
            }
        };

        let from = self.debouncer.current();
        let sample = classify(&levels, self.active_low);
        if sample.is_none() {
            log::trace!("[channel] indeterminate reading {levels:?}");
        }
        let to = self.debouncer.update(sample)?;
        self.state.set(Some(to));
        let change = ChannelChanged { from, to };
        match from {
            Some(prev) => log::info!("[channel] channel {prev} -> {to}"),
            None => log::info!("[channel] channel {to}"),
        }
        Some(change)
    }

    /// Sample every `poll` until `running` is cleared, passing each committed
    /// transition to `on_change`.
    pub fn run(
        &mut self,
        poll: Duration,
        running: &AtomicBool,
        mut on_change: impl FnMut(ChannelChanged),
    ) {
        log::debug!("[channel] polling every {}ms", poll.as_millis());
        while running.load(Ordering::SeqCst) {
            if let Some(change) = self.tick() {
                on_change(change);
            }
            std::thread::sleep(poll);
        }
        log::debug!("[channel] monitor stopped");
    }
}
