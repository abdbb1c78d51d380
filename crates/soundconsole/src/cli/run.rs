//! `run` subcommand: the whole pipeline in one process.
//!
//! Serial reading, channel polling and LED rendering each get a thread;
//! playback and the LED state machine talk over the in-process bus.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use soundconsole_lib::bus;
use soundconsole_lib::channel::ChannelState;
use soundconsole_lib::led::{self, LedStateMachine};
use soundconsole_lib::trigger;

use super::wiring::{self, ms};
use super::{RUNNING, Result};

pub(super) fn cmd_run(config_path: Option<&Path>) -> Result<()> {
    let config = super::load_config(config_path);
    config.check()?;
    wiring::banner(&config, "run");

    let (sink, mut source) = bus::channel();
    let state = ChannelState::new(config.channels.initial_channel());
    let mut pipeline = wiring::pipeline(&config, state.clone(), Arc::new(sink));
    let mut link = wiring::serial_link(&config);
    let mut monitor = wiring::channel_monitor(&config, state);
    let mut pwm = wiring::open_pwm(&config);
    let mut machine = LedStateMachine::new(config.led.timing(), Instant::now());

    let poll = ms(config.channels.poll_ms);
    let render = ms(config.led.render_ms);
    std::thread::scope(|s| {
        s.spawn(|| monitor.run(poll, &RUNNING, |_| {}));
        s.spawn(|| led::run_led_loop(&mut machine, &mut source, &mut pwm, render, &RUNNING));
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
