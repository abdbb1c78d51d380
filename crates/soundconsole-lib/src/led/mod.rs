//! Status LED: idle pulse / flash state machine and its render loop.

mod machine;
mod pattern;

pub use machine::{LedState, LedStateMachine};
pub use pattern::{LedTiming, flash_duty, pulse_duty};

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::bus::{BusRecv, LedEventSource};
use crate::gpio::PwmOutput;

/// Default render interval.
pub const DEFAULT_RENDER_INTERVAL: Duration = Duration::from_millis(20);

/// Consume bus events and render the LED until `running` clears.
///
/// Events are applied as they arrive; the output is refreshed once per
/// `render` interval. The loop keeps pulsing when the producer is absent,
/// and drives the output to 0 on exit.
pub fn run_led_loop<S, P>(
    machine: &mut LedStateMachine,
    source: &mut S,
    pwm: &mut P,
    render: Duration,
    running: &AtomicBool,
) where
    S: LedEventSource + ?Sized,
    P: PwmOutput + ?Sized,
{
    let render = render.max(Duration::from_millis(1));
    let mut source_up = true;
    let mut pwm_failing = false;

    log::debug!("[led] render loop started ({}ms)", render.as_millis());
    while running.load(Ordering::SeqCst) {
        let deadline = Instant::now() + render;
        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            match source.recv_timeout(deadline - now) {
                BusRecv::Event(ev) => {
                    if !source_up {
                        log::info!("[led] event source back");
                        source_up = true;
                    }
                    machine.on_event(ev, Instant::now());
                }
                BusRecv::Timeout => {}
                BusRecv::Disconnected => {
                    if source_up {
                        log::warn!("[led] event source lost, idling");
                        source_up = false;
                    }
                    machine.source_lost(Instant::now());
                    std::thread::sleep(deadline.saturating_duration_since(Instant::now()));
                    break;
                }
            }
        }

        let now = Instant::now();
        machine.check_watchdog(now);
        match pwm.set_duty(machine.duty_at(now)) {
            Ok(()) => pwm_failing = false,
            Err(e) if !pwm_failing => {
                log::warn!("[led] PWM write failed: {e}");
                pwm_failing = true;
            }
            Err(_) => {}
        }
    }

    if let Err(e) = pwm.set_duty(0.0) {
        log::warn!("[led] could not switch LED off: {e}");
    }
    log::debug!("[led] render loop stopped");
}
