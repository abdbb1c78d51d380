//! `led` subcommand: LED daemon fed by the bus socket.
//!
//! Keeps pulsing while no `trigger` process is running.

use std::path::Path;

use super::{Result, load_config};

#[cfg(unix)]
pub(super) fn cmd_led(config_path: Option<&Path>) -> Result<()> {
    use std::time::Instant;

    use soundconsole_lib::bus::DatagramSource;
    use soundconsole_lib::led::{self, LedStateMachine};

    use super::RUNNING;
    use super::wiring::{self, ms};

    let config = load_config(config_path);
    config.check()?;

    let mut source = DatagramSource::bind(&config.led.bus_path)?;
    println!(
        "soundconsole {} (led): GPIO {}, listening on {}",
        env!("CARGO_PKG_VERSION"),
        config.led.pin,
        config.led.bus_path.display()
    );

    let mut pwm = wiring::open_pwm(&config);
    let mut machine = LedStateMachine::new(config.led.timing(), Instant::now());
    led::run_led_loop(
        &mut machine,
        &mut source,
        &mut pwm,
        ms(config.led.render_ms),
        &RUNNING,
    );

    println!("Stopped.");
    Ok(())
}

#[cfg(not(unix))]
pub(super) fn cmd_led(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path);
    Err(super::ConsoleError::Config(format!(
        "the LED bus socket ({}) needs a Unix platform; use `run` instead",
        config.led.bus_path.display()
    )))
}
