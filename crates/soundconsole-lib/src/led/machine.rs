//! LED state machine: pure logic, explicit time.
//!
//! The machine never reads the clock itself: callers pass `now` to every
//! method, so transitions and waveforms are deterministic under test.

use std::time::{Duration, Instant};

use super::pattern::{self, LedTiming};
use crate::bus::LedEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedState {
    /// Slow pulse: system ready.
    Idle,
    /// Rapid on/off: a sound was just triggered.
    Flashing,
}

/// Idle/Flashing machine with a bounded flash duration.
#[derive(Debug)]
pub struct LedStateMachine {
    timing: LedTiming,
    state: LedState,
    /// Start of the current pulse or flash phase.
    phase_start: Instant,
    flash_button: Option<u8>,
}

impl LedStateMachine {
    /// Start in Idle with the pulse at its floor.
    pub fn new(timing: LedTiming, now: Instant) -> Self {
        Self {
            timing,
            state: LedState::Idle,
            phase_start: now,
            flash_button: None,
        }
    }

    pub fn state(&self) -> LedState {
        self.state
    }

    /// Button whose press started the current flash.
    pub fn flash_button(&self) -> Option<u8> {
        self.flash_button
    }

    fn enter_idle(&mut self, now: Instant) {
        self.state = LedState::Idle;
        self.phase_start = now;
        self.flash_button = None;
    }

    /// Apply a bus event.
    ///
    /// `Flash` always (re)starts the flash phase; `Stop` returns to Idle from
    /// Flashing and is ignored in Idle.
    pub fn on_event(&mut self, event: LedEvent, now: Instant) {
        match event {
            LedEvent::Flash(id) => {
                log::debug!("[led] flash for button {id}");
                self.state = LedState::Flashing;
                self.phase_start = now;
                self.flash_button = Some(id);
            }
            LedEvent::Stop if self.state == LedState::Flashing => {
                log::debug!("[led] stop, back to idle");
                self.enter_idle(now);
            }
            LedEvent::Stop => {}
        }
    }

    /// Revert a flash that outlived the maximum duration. Returns `true` if
    /// the watchdog fired.
    pub fn check_watchdog(&mut self, now: Instant) -> bool {
        if self.state != LedState::Flashing {
            return false;
        }
        let flashing_for = now.saturating_duration_since(self.phase_start);
        if flashing_for < self.timing.max_flash {
            return false;
        }
        log::warn!(
            "[led] no stop after {:.1}s, reverting to idle",
            flashing_for.as_secs_f64()
        );
        self.enter_idle(now);
        true
    }

    /// The event source went away: nothing will ever stop a flash now.
    pub fn source_lost(&mut self, now: Instant) {
        if self.state == LedState::Flashing {
            self.enter_idle(now);
        }
    }

    /// Duty cycle to render at `now`, percent.
    pub fn duty_at(&self, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.phase_start);
        match self.state {
            LedState::Idle => pattern::pulse_duty(elapsed, &self.timing),
            LedState::Flashing => pattern::flash_duty(elapsed, &self.timing),
        }
    }

    /// Time spent in the current phase.
    pub fn phase_elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.phase_start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn machine() -> (LedStateMachine, Instant) {
        let t0 = Instant::now();
        (LedStateMachine::new(LedTiming::default(), t0), t0)
    }

    #[test]
    fn starts_idle_at_pulse_floor() {
        let (m, t0) = machine();
        assert_eq!(m.state(), LedState::Idle);
        assert_eq!(m.duty_at(t0), 20.0);
    }

    #[test]
    fn flash_enters_flashing_from_idle() {
        let (mut m, t0) = machine();
        m.on_event(LedEvent::Flash(4), t0 + ms(1000));
        assert_eq!(m.state(), LedState::Flashing);
        assert_eq!(m.flash_button(), Some(4));
        assert_eq!(m.duty_at(t0 + ms(1000)), 100.0);
        assert_eq!(m.duty_at(t0 + ms(1150)), 0.0);
    }

    #[test]
    fn repeated_flash_restarts_phase() {
        let (mut m, t0) = machine();
        m.on_event(LedEvent::Flash(1), t0);
        // 150ms in: off half of the first period
        assert_eq!(m.duty_at(t0 + ms(150)), 0.0);
        m.on_event(LedEvent::Flash(2), t0 + ms(150));
        assert_eq!(m.duty_at(t0 + ms(150)), 100.0);
        assert_eq!(m.flash_button(), Some(2));
    }

    #[test]
    fn stop_returns_to_idle_with_pulse_restarted() {
        let (mut m, t0) = machine();
        m.on_event(LedEvent::Flash(1), t0);
        m.on_event(LedEvent::Stop, t0 + ms(700));
        assert_eq!(m.state(), LedState::Idle);
        assert_eq!(m.duty_at(t0 + ms(700)), 20.0);
        assert_eq!(m.phase_elapsed(t0 + ms(700)), Duration::ZERO);
    }

    #[test]
    fn stop_in_idle_is_noop() {
        let (mut m, t0) = machine();
        let before = m.duty_at(t0 + ms(1000));
        m.on_event(LedEvent::Stop, t0 + ms(900));
        assert_eq!(m.state(), LedState::Idle);
        // Pulse phase not restarted
        assert_eq!(m.duty_at(t0 + ms(1000)), before);
    }

    #[test]
    fn watchdog_reverts_long_flash() {
        let (mut m, t0) = machine();
        m.on_event(LedEvent::Flash(9), t0);
        assert!(!m.check_watchdog(t0 + ms(29_999)));
        assert_eq!(m.state(), LedState::Flashing);
        assert!(m.check_watchdog(t0 + ms(30_000)));
        assert_eq!(m.state(), LedState::Idle);
    }

    #[test]
    fn watchdog_measured_from_latest_flash() {
        let (mut m, t0) = machine();
        m.on_event(LedEvent::Flash(1), t0);
        m.on_event(LedEvent::Flash(1), t0 + ms(20_000));
        assert!(!m.check_watchdog(t0 + ms(40_000)));
        assert!(m.check_watchdog(t0 + ms(50_000)));
    }

    #[test]
    fn watchdog_idle_never_fires() {
        let (mut m, t0) = machine();
        assert!(!m.check_watchdog(t0 + ms(100_000)));
    }

    #[test]
    fn source_lost_reverts_flash_only() {
        let (mut m, t0) = machine();
        m.source_lost(t0 + ms(10));
        assert_eq!(m.phase_elapsed(t0 + ms(10)), ms(10));
        m.on_event(LedEvent::Flash(3), t0 + ms(20));
        m.source_lost(t0 + ms(30));
        assert_eq!(m.state(), LedState::Idle);
    }

    #[test]
    fn flash_then_stop_sequence_matches_press_lifecycle() {
        let (mut m, t0) = machine();
        let events = [
            (0, LedEvent::Flash(1)),
            (10, LedEvent::Flash(2)),
            (500, LedEvent::Stop),
            (600, LedEvent::Stop),
        ];
        let mut states = Vec::new();
        for (at, ev) in events {
            m.on_event(ev, t0 + ms(at));
            states.push(m.state());
        }
        assert_eq!(
            states,
            vec![
                LedState::Flashing,
                LedState::Flashing,
                LedState::Idle,
                LedState::Idle
            ]
        );
    }
}
