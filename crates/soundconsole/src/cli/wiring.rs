//! Construction of pipeline components from configuration.
//!
//! Hardware backends degrade to simulation when GPIO is unavailable, so
//! the daemons keep running on a development machine.

use std::sync::Arc;
use std::time::Duration;

use soundconsole_lib::bus::LedSignalSink;
use soundconsole_lib::channel::{self, ChannelMonitor, ChannelState};
use soundconsole_lib::debounce::PressDebouncer;
use soundconsole_lib::gpio::{self, ChannelInputs, PwmOutput};
use soundconsole_lib::playback::{CommandBackend, PlaybackController};
use soundconsole_lib::resolver::ProfileResolver;
use soundconsole_lib::serial::{SerialLink, SerialPortOpener};
use soundconsole_lib::store::JsonStore;
use soundconsole_lib::trigger::TriggerPipeline;

use super::Config;

pub(super) fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

pub(super) fn open_channel_inputs(config: &Config) -> Box<dyn ChannelInputs> {
    let ch = &config.channels;
    let simulated = || -> Box<dyn ChannelInputs> {
        let selected = ch.initial_channel().or(Some(1));
        Box::new(gpio::SimulatedInputs::new(ch.pins.len(), selected, ch.active_low))
    };
    if config.simulate {
        return simulated();
    }
    #[cfg(target_os = "linux")]
    {
        match gpio::RpiInputs::new(&ch.pins) {
            Ok(inputs) => return Box::new(inputs),
            Err(e) => log::warn!("[channel] {e}; using simulated inputs"),
        }
    }
    #[cfg(not(target_os = "linux"))]
    log::warn!("[channel] no GPIO on this platform; using simulated inputs");
    simulated()
}

pub(super) fn open_pwm(config: &Config) -> Box<dyn PwmOutput> {
    if config.simulate {
        return Box::new(gpio::SimulatedPwm::new());
    }
    #[cfg(target_os = "linux")]
    {
        match gpio::RpiPwm::new(config.led.pin, config.led.pwm_frequency_hz) {
            Ok(pwm) => return Box::new(pwm),
            Err(e) => log::warn!("[led] {e}; using simulated LED"),
        }
    }
    #[cfg(not(target_os = "linux"))]
    log::warn!("[led] no GPIO on this platform; using simulated LED");
    Box::new(gpio::SimulatedPwm::new())
}

/// Read the selector once (diagnostics), falling back to the configured
/// initial channel.
pub(super) fn sample_channel(config: &Config) -> Option<u8> {
    let mut inputs = open_channel_inputs(config);
    match inputs.read_levels() {
        Ok(levels) => channel::classify(&levels, config.channels.active_low)
            .or(config.channels.initial_channel()),
        Err(e) => {
            log::warn!("[channel] {e}");
            config.channels.initial_channel()
        }
    }
}

pub(super) fn channel_monitor(
    config: &Config,
    state: ChannelState,
) -> ChannelMonitor<Box<dyn ChannelInputs>> {
    ChannelMonitor::new(
        open_channel_inputs(config),
        config.channels.active_low,
        config.channels.stable_ticks,
        state,
    )
}

pub(super) fn serial_link(config: &Config) -> SerialLink<SerialPortOpener> {
    let s = &config.serial;
    let opener = SerialPortOpener::new(&s.port, s.baud_rate, ms(s.read_timeout_ms));
    SerialLink::new(opener, ms(s.reconnect_interval_ms))
}

pub(super) fn resolver(config: &Config, state: ChannelState) -> ProfileResolver<JsonStore> {
    ProfileResolver::new(
        JsonStore::new(&config.playback.mappings_path),
        state,
        &config.playback.fallback_sound,
    )
}

pub(super) fn pipeline(
    config: &Config,
    state: ChannelState,
    sink: Arc<dyn LedSignalSink>,
) -> TriggerPipeline<JsonStore> {
    let p = &config.playback;
    let backend = CommandBackend::new(&p.player, p.player_args.clone(), &p.audio_device);
    let controller = PlaybackController::new(Arc::new(backend), sink, ms(p.monitor_poll_ms));
    TriggerPipeline::new(
        PressDebouncer::new(ms(config.serial.debounce_ms)),
        resolver(config, state),
        controller,
    )
}

/// One-line startup summary.
pub(super) fn banner(config: &Config, mode: &str) {
    println!(
        "soundconsole {} ({mode}): serial {} @ {} baud, mappings {}{}",
        env!("CARGO_PKG_VERSION"),
        config.serial.port,
        config.serial.baud_rate,
        config.playback.mappings_path.display(),
        if config.simulate { " [simulated GPIO]" } else { "" }
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simulated() -> Config {
        Config {
            simulate: true,
            ..Config::default()
        }
    }

    #[test]
    fn simulated_inputs_select_initial_channel() {
        let mut config = simulated();
        config.channels.initial = 3;
        assert_eq!(sample_channel(&config), Some(3));
    }

    #[test]
    fn simulated_inputs_default_to_channel_one() {
        assert_eq!(sample_channel(&simulated()), Some(1));
    }

    #[test]
    fn monitor_commits_simulated_channel() {
        let config = simulated();
        let state = ChannelState::new(None);
        let mut monitor = channel_monitor(&config, state.clone());
        monitor.tick();
        monitor.tick();
        assert_eq!(state.get(), Some(1));
    }
}
