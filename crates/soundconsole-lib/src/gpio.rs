//! GPIO access: channel selector inputs and the PWM status LED.
//!
//! Hardware is reached through two small traits so the channel monitor and
//! LED state machine can run against the Raspberry Pi backend, a simulation
//! backend (no GPIO present), or the scripted mocks used in tests.

use std::fmt;

/// GPIO errors.
#[derive(Debug)]
pub enum GpioError {
    /// The GPIO peripheral cannot be opened (not a Pi, no permission).
    Unavailable(String),
    /// A pin could not be claimed or configured.
    PinSetup(String),
    /// A read or write on a configured pin failed.
    Io(String),
}

impl fmt::Display for GpioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpioError::Unavailable(e) => write!(f, "GPIO unavailable: {e}"),
            GpioError::PinSetup(e) => write!(f, "GPIO pin setup failed: {e}"),
            GpioError::Io(e) => write!(f, "GPIO I/O failed: {e}"),
        }
    }
}

impl std::error::Error for GpioError {}

pub type Result<T> = std::result::Result<T, GpioError>;

// ── Traits ──

/// A bank of digital inputs, one per rotary channel position.
pub trait ChannelInputs: Send {
    /// Raw levels of every input (`true` = high), in channel order.
    fn read_levels(&mut self) -> Result<Vec<bool>>;
}

/// A PWM-capable output driving the status LED.
pub trait PwmOutput: Send {
    /// Set the duty cycle in percent (`0.0..=100.0`, clamped).
    fn set_duty(&mut self, percent: f64) -> Result<()>;
}

impl<T: ChannelInputs + ?Sized> ChannelInputs for Box<T> {
    fn read_levels(&mut self) -> Result<Vec<bool>> {
        (**self).read_levels()
    }
}

impl<T: PwmOutput + ?Sized> PwmOutput for Box<T> {
    fn set_duty(&mut self, percent: f64) -> Result<()> {
        (**self).set_duty(percent)
    }
}

fn clamp_duty(percent: f64) -> f64 {
    if percent.is_nan() {
        0.0
    } else {
        percent.clamp(0.0, 100.0)
    }
}

// ── Simulation backends ──

/// Inputs that always report a fixed channel as selected (active-low wiring),
/// or nothing selected.
#[derive(Debug)]
pub struct SimulatedInputs {
    levels: Vec<bool>,
}

impl SimulatedInputs {
    pub fn new(pin_count: usize, selected: Option<u8>, active_low: bool) -> Self {
        let levels = (0..pin_count)
            .map(|i| {
                let asserted = selected.is_some_and(|ch| usize::from(ch) == i + 1);
                asserted != active_low
            })
            .collect();
        Self { levels }
    }
}

impl ChannelInputs for SimulatedInputs {
    fn read_levels(&mut self) -> Result<Vec<bool>> {
        Ok(self.levels.clone())
    }
}

/// PWM output that only tracks the last duty (and logs large changes at trace).
#[derive(Debug, Default)]
pub struct SimulatedPwm {
    duty: f64,
}

impl SimulatedPwm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn duty(&self) -> f64 {
        self.duty
    }
}

impl PwmOutput for SimulatedPwm {
    fn set_duty(&mut self, percent: f64) -> Result<()> {
        let percent = clamp_duty(percent);
        if (percent - self.duty).abs() >= 50.0 {
            log::trace!("[led] simulated duty {percent:.0}%");
        }
        self.duty = percent;
        Ok(())
    }
}

// ── Raspberry Pi backend ──

#[cfg(target_os = "linux")]
pub use self::rpi::{RpiInputs, RpiPwm};

#[cfg(target_os = "linux")]
mod rpi {
    use super::*;
    use rppal::gpio::{Gpio, InputPin, OutputPin};

    fn gpio() -> Result<Gpio> {
        Gpio::new().map_err(|e| GpioError::Unavailable(e.to_string()))
    }

    /// Channel inputs on BCM pins with internal pull-ups.
    pub struct RpiInputs {
        pins: Vec<InputPin>,
    }

    impl RpiInputs {
        pub fn new(bcm_pins: &[u8]) -> Result<Self> {
            let gpio = gpio()?;
            let pins = bcm_pins
                .iter()
                .map(|&n| {
                    gpio.get(n)
                        .map(|p| p.into_input_pullup())
                        .map_err(|e| GpioError::PinSetup(format!("GPIO {n}: {e}")))
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(Self { pins })
        }
    }

    impl ChannelInputs for RpiInputs {
        fn read_levels(&mut self) -> Result<Vec<bool>> {
            Ok(self.pins.iter().map(|p| p.is_high()).collect())
        }
    }

    /// Software PWM on one BCM pin.
    pub struct RpiPwm {
        pin: OutputPin,
        frequency_hz: f64,
        duty: Option<f64>,
    }

    impl RpiPwm {
        pub fn new(bcm_pin: u8, frequency_hz: f64) -> Result<Self> {
            let gpio = gpio()?;
            let pin = gpio
                .get(bcm_pin)
                .map_err(|e| GpioError::PinSetup(format!("GPIO {bcm_pin}: {e}")))?
                .into_output_low();
            Ok(Self {
                pin,
                frequency_hz,
                duty: None,
            })
        }
    }

    impl PwmOutput for RpiPwm {
        fn set_duty(&mut self, percent: f64) -> Result<()> {
            let percent = clamp_duty(percent);
            // Re-arming software PWM resets its period; skip no-op updates
            if self.duty == Some(percent) {
                return Ok(());
            }
            self.pin
                .set_pwm_frequency(self.frequency_hz, percent / 100.0)
                .map_err(|e| GpioError::Io(e.to_string()))?;
            self.duty = Some(percent);
            Ok(())
        }
    }

    impl Drop for RpiPwm {
        fn drop(&mut self) {
            let _ = self.pin.clear_pwm();
            self.pin.set_low();
        }
    }
}

// ── Test doubles ──

pub mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Inputs that replay a script of level vectors, repeating the last one.
    pub struct ScriptedInputs {
        script: VecDeque<Result<Vec<bool>>>,
        last: Vec<bool>,
    }

    impl ScriptedInputs {
        pub fn new(script: Vec<Vec<bool>>) -> Self {
            Self {
                script: script.into_iter().map(Ok).collect(),
                last: Vec::new(),
            }
        }

        /// Queue a read failure.
        pub fn push_error(&mut self) {
            self.script
                .push_back(Err(GpioError::Io("mock read failure".into())));
        }
    }

    impl ChannelInputs for ScriptedInputs {
        fn read_levels(&mut self) -> Result<Vec<bool>> {
            match self.script.pop_front() {
                Some(Ok(levels)) => {
                    self.last = levels.clone();
                    Ok(levels)
                }
                Some(Err(e)) => Err(e),
                None => Ok(self.last.clone()),
            }
        }
    }

    /// PWM output recording every duty written.
    #[derive(Clone, Default)]
    pub struct RecordingPwm {
        duties: Arc<Mutex<Vec<f64>>>,
    }

    impl RecordingPwm {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn duties(&self) -> Vec<f64> {
            self.duties.lock().map(|d| d.clone()).unwrap_or_default()
        }

        pub fn last(&self) -> Option<f64> {
            self.duties.lock().ok().and_then(|d| d.last().copied())
        }
    }

    impl PwmOutput for RecordingPwm {
        fn set_duty(&mut self, percent: f64) -> Result<()> {
            if let Ok(mut d) = self.duties.lock() {
                d.push(clamp_duty(percent));
            }
            Ok(())
        }
    }
}
