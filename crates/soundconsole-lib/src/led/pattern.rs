//! Duty-cycle waveforms for the status LED.

use std::time::Duration;

/// Timing and levels for both LED behaviors.
#[derive(Debug, Clone, PartialEq)]
pub struct LedTiming {
    /// Idle pulse floor, percent.
    pub idle_min_duty: f64,
    /// Idle pulse peak, percent.
    pub idle_max_duty: f64,
    /// Full floor → peak → floor cycle.
    pub pulse_cycle: Duration,
    pub flash_on: Duration,
    pub flash_off: Duration,
    /// Longest time Flashing may last without a fresh `Flash`.
    pub max_flash: Duration,
}

impl Default for LedTiming {
    fn default() -> Self {
        Self {
            idle_min_duty: 20.0,
            idle_max_duty: 100.0,
            pulse_cycle: Duration::from_millis(5000),
            flash_on: Duration::from_millis(100),
            flash_off: Duration::from_millis(100),
            max_flash: Duration::from_secs(30),
        }
    }
}

/// Position within a repeating period, `0.0..1.0`.
fn cycle_position(elapsed: Duration, period: Duration) -> f64 {
    let period_ns = period.as_nanos();
    if period_ns == 0 {
        return 0.0;
    }
    (elapsed.as_nanos() % period_ns) as f64 / period_ns as f64
}

/// Triangular pulse: floor at phase 0, peak at half cycle, back to floor.
pub fn pulse_duty(elapsed: Duration, timing: &LedTiming) -> f64 {
    let pos = cycle_position(elapsed, timing.pulse_cycle);
    let ramp = if pos < 0.5 { pos * 2.0 } else { (1.0 - pos) * 2.0 };
    let span = timing.idle_max_duty - timing.idle_min_duty;
    timing.idle_min_duty + span * ramp
}

/// Square wave: full on for `flash_on`, off for `flash_off`, starting on.
pub fn flash_duty(elapsed: Duration, timing: &LedTiming) -> f64 {
    let period = timing.flash_on + timing.flash_off;
    if period.is_zero() {
        return 100.0;
    }
    let pos = Duration::from_nanos((elapsed.as_nanos() % period.as_nanos()) as u64);
    if pos < timing.flash_on { 100.0 } else { 0.0 }
}
