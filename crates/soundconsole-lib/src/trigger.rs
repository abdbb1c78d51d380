//! Press handling: serial events through debounce, resolution and playback.
//!
//! [`TriggerPipeline`] is the I/O-free core: one call per press, returning
//! what happened. [`run_trigger_loop`] is the thin adapter that feeds it
//! from the serial link and mirrors playback onto the firmware button LEDs.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::debounce::PressDebouncer;
use crate::playback::{PlaybackController, PlaybackEnded, PlaybackError};
use crate::resolver::{ProfileResolver, Resolution};
use crate::serial::{ButtonEvent, PortOpener, SerialLink};
use crate::store::AssignmentStore;

/// Result of handling one press.
#[derive(Debug)]
pub enum PressOutcome {
    /// Suppressed by the per-button debounce window.
    Debounced,
    /// Playback started.
    Played { resolution: Resolution },
    /// The player could not be started; the controller is idle.
    Failed {
        resolution: Resolution,
        error: PlaybackError,
    },
}

pub struct TriggerPipeline<S: AssignmentStore> {
    debouncer: PressDebouncer,
    resolver: ProfileResolver<S>,
    controller: PlaybackController,
}

impl<S: AssignmentStore> TriggerPipeline<S> {
    pub fn new(
        debouncer: PressDebouncer,
        resolver: ProfileResolver<S>,
        controller: PlaybackController,
    ) -> Self {
        Self {
            debouncer,
            resolver,
            controller,
        }
    }

    pub fn handle_press(&mut self, event: ButtonEvent) -> PressOutcome {
        let id = event.button_id;
        if !self.debouncer.accept(id, event.timestamp) {
            log::debug!("[serial] button {id} debounced");
            return PressOutcome::Debounced;
        }
        let resolution = self.resolver.resolve(id);
        match self.controller.play(id, &resolution.path) {
            Ok(()) => PressOutcome::Played { resolution },
            Err(error) => PressOutcome::Failed { resolution, error },
        }
    }

    pub fn controller(&self) -> &PlaybackController {
        &self.controller
    }

    /// Stop any playback (shutdown).
    pub fn shutdown(&self) {
        self.controller.stop();
    }
}

fn clear_overrides<O: PortOpener>(
    link: &mut SerialLink<O>,
    ended: Vec<PlaybackEnded>,
    led_override: bool,
) {
    for end in ended {
        log::debug!("[playback] button {} ended: {:?}", end.button_id, end.reason);
        if led_override && let Err(e) = link.set_led_override(end.button_id, false) {
            log::debug!("[serial] LED override off for {}: {e}", end.button_id);
        }
    }
}

/// Read presses until `running` clears, then stop playback.
///
/// With `led_override`, the pressed button's firmware LED is held on while
/// its sound plays and released when the sound ends or is interrupted.
pub fn run_trigger_loop<O, S>(
    link: &mut SerialLink<O>,
    pipeline: &mut TriggerPipeline<S>,
    led_override: bool,
    running: &AtomicBool,
) where
    O: PortOpener,
    S: AssignmentStore,
{
    log::info!("[serial] waiting for presses");
    while running.load(Ordering::SeqCst) {
        let played = match link.poll_event() {
            Some(event) => match pipeline.handle_press(event) {
                PressOutcome::Played { .. } => Some(event.button_id),
                PressOutcome::Failed { error, .. } => {
                    log::debug!("[playback] press {} not played: {error}", event.button_id);
                    None
                }
                PressOutcome::Debounced => None,
            },
            None => None,
        };

        // Release superseded LEDs before lighting the new one
        clear_overrides(link, pipeline.controller().drain_ended(), led_override);
        if led_override
            && let Some(id) = played
            && let Err(e) = link.set_led_override(id, true)
        {
            log::debug!("[serial] LED override on for {id}: {e}");
        }
    }

    pipeline.shutdown();
    clear_overrides(link, pipeline.controller().drain_ended(), led_override);
    log::info!("[serial] trigger loop stopped");
}
