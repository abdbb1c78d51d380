//! `trigger` subcommand: serial, channel selector and playback, with LED
//! events sent to a separately running `led` daemon.

use std::path::Path;
use std::sync::Arc;

use soundconsole_lib::bus::{LedSignalSink, NullSink};
use soundconsole_lib::channel::ChannelState;
use soundconsole_lib::trigger;

use super::wiring::{self, ms};
use super::{Config, RUNNING, Result};

fn led_sink(config: &Config) -> Arc<dyn LedSignalSink> {
    #[cfg(unix)]
    {
        let path = &config.led.bus_path;
        match soundconsole_lib::bus::DatagramSink::new(path, ms(config.led.bus_write_timeout_ms)) {
            Ok(sink) => {
                log::info!("[bus] LED events to {}", path.display());
                return Arc::new(sink);
            }
            Err(e) => log::warn!("[bus] cannot create socket: {e}; LED events disabled"),
        }
    }
    #[cfg(not(unix))]
    log::warn!(
        "[bus] socket bus needs a Unix platform; LED events disabled ({})",
        config.led.bus_path.display()
    );
    Arc::new(NullSink)
}

pub(super) fn cmd_trigger(config_path: Option<&Path>) -> Result<()> {
    let config = super::load_config(config_path);
    config.check()?;
    wiring::banner(&config, "trigger");

    let state = ChannelState::new(config.channels.initial_channel());
    let mut pipeline = wiring::pipeline(&config, state.clone(), led_sink(&config));
    let mut link = wiring::serial_link(&config);
    let mut monitor = wiring::channel_monitor(&config, state);

    let poll = ms(config.channels.poll_ms);
    std::thread::scope(|s| {
        s.spawn(|| monitor.run(poll, &RUNNING, |_| {}));
        trigger::run_trigger_loop(
            &mut link,
            &mut pipeline,
            config.serial.led_override,
            &RUNNING,
        );
    });

    println!("Stopped.");
    Ok(())
}
