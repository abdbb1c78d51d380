//! `config` subcommand: show current configuration, file path and problems.

use std::path::Path;

use super::{Config, ConfigOutput, Result, kv, kv_indent, kv_width, print_json};

fn ms_label(n: u64) -> String {
    format!("{n} ms")
}

pub(super) fn cmd_config(json: bool, custom_path: Option<&Path>) -> Result<()> {
    let config = super::load_config(custom_path);
    let config_path = custom_path.map(|p| p.to_path_buf()).or_else(Config::path);
    let config_exists = config_path.as_ref().is_some_and(|p| p.exists());
    let problems: Vec<String> = match config.validate() {
        Ok(()) => Vec::new(),
        Err(errors) => errors.iter().map(ToString::to_string).collect(),
    };

    if json {
        return print_json(&ConfigOutput {
            config_file: config_path.as_ref().map(|p| p.display().to_string()),
            config_file_exists: config_exists,
            problems,
            settings: config,
        });
    }

    let w = kv_width(
        &["Config file:", "Simulate:"],
        &[
            "reconnect_interval:",
            "fallback_sound:",
            "bus_write_timeout:",
            "mappings_path:",
        ],
    );

    match &config_path {
        Some(p) if config_exists => kv("Config file:", format_args!("{} (loaded)", p.display()), w),
        Some(p) => kv(
            "Config file:",
            format_args!("{} (not found, using defaults)", p.display()),
            w,
        ),
        None => kv("Config file:", "(no config directory)", w),
    }
    kv("Simulate:", config.simulate, w);
    println!();

    let s = &config.serial;
    println!("Serial:");
    kv_indent("port:", &s.port, w);
    kv_indent("baud_rate:", s.baud_rate, w);
    kv_indent("read_timeout:", ms_label(s.read_timeout_ms), w);
    kv_indent("reconnect_interval:", ms_label(s.reconnect_interval_ms), w);
    kv_indent("debounce:", ms_label(s.debounce_ms), w);
    kv_indent("led_override:", s.led_override, w);
    println!();

    let c = &config.channels;
    println!("Channels:");
    let pins: Vec<String> = c.pins.iter().map(|p| format!("GPIO{p}")).collect();
    kv_indent("pins:", pins.join(", "), w);
    kv_indent("active_low:", c.active_low, w);
    kv_indent("poll:", ms_label(c.poll_ms), w);
    kv_indent("stable_ticks:", c.stable_ticks, w);
    match c.initial_channel() {
        Some(ch) => kv_indent("initial:", ch, w),
        None => kv_indent("initial:", "(none)", w),
    }
    println!();

    let p = &config.playback;
    println!("Playback:");
    kv_indent("mappings_path:", p.mappings_path.display(), w);
    kv_indent("fallback_sound:", p.fallback_sound.display(), w);
    kv_indent(
        "player:",
        format_args!("{} {}", p.player, p.player_args.join(" ")),
        w,
    );
    kv_indent("audio_device:", &p.audio_device, w);
    println!();

    let l = &config.led;
    println!("LED:");
    kv_indent("pin:", format_args!("GPIO{} @ {} Hz", l.pin, l.pwm_frequency_hz), w);
    kv_indent(
        "idle_pulse:",
        format_args!(
            "{}-{}% over {}",
            l.idle_min_duty,
            l.idle_max_duty,
            ms_label(l.pulse_cycle_ms)
        ),
        w,
    );
    kv_indent(
        "flash:",
        format_args!(
            "{} on / {} off, max {}",
            ms_label(l.flash_on_ms),
            ms_label(l.flash_off_ms),
            ms_label(l.max_flash_ms)
        ),
        w,
    );
    kv_indent("bus_path:", l.bus_path.display(), w);
    kv_indent("bus_write_timeout:", ms_label(l.bus_write_timeout_ms), w);

    if !problems.is_empty() {
        println!();
        println!("Problems:");
        for problem in &problems {
            println!("  {problem}");
        }
    }
    Ok(())
}
