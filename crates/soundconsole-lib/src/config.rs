//! Application configuration: TOML-based, platform-aware paths.
//!
//! One section per component; each section is handed to its component at
//! construction. Missing keys take defaults, so an empty file is valid.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::channel::{DEFAULT_POLL_INTERVAL, DEFAULT_STABLE_TICKS};
use crate::debounce::DEFAULT_PRESS_WINDOW;
use crate::led::{DEFAULT_RENDER_INTERVAL, LedTiming};
use crate::playback::DEFAULT_MONITOR_POLL;
use crate::protocol::{self, DEFAULT_BAUD_RATE, MAX_CHANNELS};

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Allowed press debounce window, milliseconds.
pub const DEBOUNCE_RANGE_MS: std::ops::RangeInclusive<u64> = 20..=200;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Preferred device path. If it does not exist, by-id links and then
    /// `/dev/ttyACM*` are tried.
    pub port: String,
    pub baud_rate: u32,
    /// Upper bound on one blocking read.
    pub read_timeout_ms: u64,
    pub reconnect_interval_ms: u64,
    /// Per-button press debounce window.
    pub debounce_ms: u64,
    /// Hold the pressed button's own LED on while its sound plays.
    pub led_override: bool,
}

impl Default for SerialConfig {
    fn default() -> Self {
        SerialConfig {
            port: "/dev/ttyACM0".into(),
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout_ms: 50,
            reconnect_interval_ms: 1000,
            debounce_ms: millis(DEFAULT_PRESS_WINDOW),
            led_override: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// BCM pin per channel position, channel 1 first.
    pub pins: Vec<u8>,
    /// Inputs are pulled up and the selector grounds the active one.
    pub active_low: bool,
    pub poll_ms: u64,
    /// Identical consecutive samples required before a change is committed.
    pub stable_ticks: u32,
    /// Channel assumed before the first stable reading (0 = none).
    pub initial: u8,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        ChannelConfig {
            pins: vec![22, 23, 24, 25],
            active_low: true,
            poll_ms: millis(DEFAULT_POLL_INTERVAL),
            stable_ticks: DEFAULT_STABLE_TICKS,
            initial: 0,
        }
    }
}

impl ChannelConfig {
    pub fn initial_channel(&self) -> Option<u8> {
        Some(self.initial).filter(|&c| protocol::is_valid_channel(c))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// JSON mappings exported by the management tooling.
    pub mappings_path: PathBuf,
    /// Clip played when a press has no usable assignment.
    pub fallback_sound: PathBuf,
    pub player: String,
    /// Argument template; `{device}` and `{file}` are substituted.
    pub player_args: Vec<String>,
    pub audio_device: String,
    pub monitor_poll_ms: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        PlaybackConfig {
            mappings_path: Config::dir()
                .map(|d| d.join("mappings.json"))
                .unwrap_or_else(|| PathBuf::from("mappings.json")),
            fallback_sound: PathBuf::from("/usr/share/soundconsole/unassigned.wav"),
            player: crate::playback::DEFAULT_PLAYER.into(),
            player_args: crate::playback::DEFAULT_PLAYER_ARGS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            audio_device: "default".into(),
            monitor_poll_ms: millis(DEFAULT_MONITOR_POLL),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedConfig {
    /// BCM pin driving the status LED.
    pub pin: u8,
    pub pwm_frequency_hz: f64,
    pub idle_min_duty: f64,
    pub idle_max_duty: f64,
    pub pulse_cycle_ms: u64,
    pub flash_on_ms: u64,
    pub flash_off_ms: u64,
    /// Flashing reverts to idle after this long without a new press.
    pub max_flash_ms: u64,
    pub render_ms: u64,
    /// Socket path connecting `trigger` and `led` when run separately.
    pub bus_path: PathBuf,
    pub bus_write_timeout_ms: u64,
}

impl Default for LedConfig {
    fn default() -> Self {
        let timing = LedTiming::default();
        LedConfig {
            pin: 13,
            pwm_frequency_hz: 1000.0,
            idle_min_duty: timing.idle_min_duty,
            idle_max_duty: timing.idle_max_duty,
            pulse_cycle_ms: millis(timing.pulse_cycle),
            flash_on_ms: millis(timing.flash_on),
            flash_off_ms: millis(timing.flash_off),
            max_flash_ms: millis(timing.max_flash),
            render_ms: millis(DEFAULT_RENDER_INTERVAL),
            bus_path: std::env::temp_dir().join("soundconsole-led.sock"),
            bus_write_timeout_ms: 50,
        }
    }
}

impl LedConfig {
    pub fn timing(&self) -> LedTiming {
        LedTiming {
            idle_min_duty: self.idle_min_duty,
            idle_max_duty: self.idle_max_duty,
            pulse_cycle: Duration::from_millis(self.pulse_cycle_ms),
            flash_on: Duration::from_millis(self.flash_on_ms),
            flash_off: Duration::from_millis(self.flash_off_ms),
            max_flash: Duration::from_millis(self.max_flash_ms),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Run without GPIO: fixed channel inputs and a logging LED.
    pub simulate: bool,
    pub serial: SerialConfig,
    pub channels: ChannelConfig,
    pub playback: PlaybackConfig,
    pub led: LedConfig,
}

/// Validation errors that [`Config::validate`] can return.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// `serial.debounce_ms` outside the allowed window.
    DebounceOutOfRange(u64),
    /// Wrong number of channel pins.
    ChannelPinCount(usize),
    DuplicatePin(u8),
    /// A timing field is zero (`field` names it).
    ZeroInterval { field: &'static str },
    /// A duty cycle outside 0..=100 (`field` names it).
    DutyOutOfRange { field: &'static str, value: f64 },
    /// Idle pulse floor above its peak.
    DutyInverted { min: f64, max: f64 },
    EmptyPlayer,
    InvalidInitialChannel(u8),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::DebounceOutOfRange(ms) => write!(
                f,
                "serial.debounce_ms = {ms} is outside {}..={}",
                DEBOUNCE_RANGE_MS.start(),
                DEBOUNCE_RANGE_MS.end()
            ),
            ValidationError::ChannelPinCount(n) => {
                write!(f, "channels.pins has {n} entries (expected 1..={MAX_CHANNELS})")
            }
            ValidationError::DuplicatePin(p) => write!(f, "GPIO {p} is used more than once"),
            ValidationError::ZeroInterval { field } => write!(f, "{field} must be greater than 0"),
            ValidationError::DutyOutOfRange { field, value } => {
                write!(f, "{field} = {value} is outside 0..=100")
            }
            ValidationError::DutyInverted { min, max } => {
                write!(f, "led.idle_min_duty ({min}) is above led.idle_max_duty ({max})")
            }
            ValidationError::EmptyPlayer => write!(f, "playback.player cannot be empty"),
            ValidationError::InvalidInitialChannel(c) => {
                write!(f, "channels.initial = {c} (expected 0..={MAX_CHANNELS})")
            }
        }
    }
}

impl Config {
    /// Platform-specific config directory.
    pub fn dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("soundconsole"))
    }

    /// Full path to config file.
    pub fn path() -> Option<PathBuf> {
        Self::dir().map(|d| d.join("config.toml"))
    }

    /// Load config from disk, or return defaults if not found.
    pub fn load() -> Self {
        let (config, warnings) = Self::load_with_warnings();
        for w in &warnings {
            log::warn!("{w}");
        }
        config
    }

    /// Load config from an arbitrary path, returning the config and any parse warnings.
    ///
    /// Returns `(defaults, [])` if the file doesn't exist.
    /// Returns `(defaults, [warning])` if the file exists but can't be parsed.
    pub fn load_from(path: &Path) -> (Self, Vec<String>) {
        match std::fs::read_to_string(path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => (config, vec![]),
                Err(e) => {
                    let warning = format!(
                        "config parse error ({}), using defaults: {e}",
                        path.display()
                    );
                    (Self::default(), vec![warning])
                }
            },
            Err(_) => (Self::default(), vec![]),
        }
    }

    /// Load config from the default path, returning the config and any parse warnings.
    pub fn load_with_warnings() -> (Self, Vec<String>) {
        let Some(path) = Self::path() else {
            return (Self::default(), vec![]);
        };
        Self::load_from(&path)
    }

    /// Validate the entire config, collecting all errors.
    pub fn validate(&self) -> std::result::Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if !DEBOUNCE_RANGE_MS.contains(&self.serial.debounce_ms) {
            errors.push(ValidationError::DebounceOutOfRange(self.serial.debounce_ms));
        }

        let pins = &self.channels.pins;
        if pins.is_empty() || pins.len() > usize::from(MAX_CHANNELS) {
            errors.push(ValidationError::ChannelPinCount(pins.len()));
        }
        let mut seen: Vec<u8> = Vec::new();
        for &p in pins.iter().chain(std::iter::once(&self.led.pin)) {
            if seen.contains(&p) {
                errors.push(ValidationError::DuplicatePin(p));
            } else {
                seen.push(p);
            }
        }
        if self.channels.initial != 0 && self.channels.initial_channel().is_none() {
            errors.push(ValidationError::InvalidInitialChannel(self.channels.initial));
        }

        let intervals = [
            ("serial.read_timeout_ms", self.serial.read_timeout_ms),
            ("serial.reconnect_interval_ms", self.serial.reconnect_interval_ms),
            ("channels.poll_ms", self.channels.poll_ms),
            ("channels.stable_ticks", u64::from(self.channels.stable_ticks)),
            ("playback.monitor_poll_ms", self.playback.monitor_poll_ms),
            ("led.pulse_cycle_ms", self.led.pulse_cycle_ms),
            ("led.flash_on_ms", self.led.flash_on_ms),
            ("led.max_flash_ms", self.led.max_flash_ms),
            ("led.render_ms", self.led.render_ms),
            ("led.bus_write_timeout_ms", self.led.bus_write_timeout_ms),
        ];
        for (field, value) in intervals {
            if value == 0 {
                errors.push(ValidationError::ZeroInterval { field });
            }
        }
        if self.led.pwm_frequency_hz <= 0.0 || self.led.pwm_frequency_hz.is_nan() {
            errors.push(ValidationError::ZeroInterval {
                field: "led.pwm_frequency_hz",
            });
        }

        let duties = [
            ("led.idle_min_duty", self.led.idle_min_duty),
            ("led.idle_max_duty", self.led.idle_max_duty),
        ];
        for (field, value) in duties {
            if !(0.0..=100.0).contains(&value) {
                errors.push(ValidationError::DutyOutOfRange { field, value });
            }
        }
        if self.led.idle_min_duty > self.led.idle_max_duty {
            errors.push(ValidationError::DutyInverted {
                min: self.led.idle_min_duty,
                max: self.led.idle_max_duty,
            });
        }

        if self.playback.player.trim().is_empty() {
            errors.push(ValidationError::EmptyPlayer);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// [`validate`](Self::validate) folded into a single crate error.
    pub fn check(&self) -> crate::error::Result<()> {
        self.validate().map_err(|errors| {
            let joined: Vec<String> = errors.iter().map(ToString::to_string).collect();
            crate::ConsoleError::Config(joined.join("; "))
        })
    }
}
