//! Wire formats for the button box.
//!
//! ## Serial link (host <-> microcontroller)
//!
//! Newline-delimited ASCII:
//! - Inbound press: `P,<button_id>\n`, with `button_id` in `1..=16`.
//! - Outbound LED override: `L,<button_id>,<0|1>\n`. This drives the
//!   firmware-local indicator under each button, not the host PWM LED.
//!
//! ## LED signal bus (playback -> LED daemon)
//!
//! One ASCII frame per event: a positive button id means Flash, `0` means Stop.

use std::fmt;

use crate::bus::LedEvent;

/// Lowest valid button id.
pub const MIN_BUTTON_ID: u8 = 1;

/// Highest valid button id.
pub const MAX_BUTTON_ID: u8 = 16;

/// Number of rotary channel positions.
pub const MAX_CHANNELS: u8 = 4;

/// Default serial baud rate of the firmware's USB CDC port.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Frames longer than this are treated as line noise and discarded.
pub const MAX_FRAME_LEN: usize = 64;

/// LED bus frame meaning "playback finished".
const STOP_FRAME: u8 = 0;

/// Frame-level parse failures. Always discarded at the parsing boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    Empty,
    UnknownFrame(String),
    BadButtonId(String),
    BadLedEvent(String),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::Empty => write!(f, "empty frame"),
            ProtocolError::UnknownFrame(s) => write!(f, "unknown frame: {s:?}"),
            ProtocolError::BadButtonId(s) => write!(f, "invalid button id: {s:?}"),
            ProtocolError::BadLedEvent(s) => write!(f, "invalid LED event: {s:?}"),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Whether `id` is a valid physical button.
pub fn is_valid_button(id: u8) -> bool {
    (MIN_BUTTON_ID..=MAX_BUTTON_ID).contains(&id)
}

/// Whether `channel` is a valid rotary position.
pub fn is_valid_channel(channel: u8) -> bool {
    (1..=MAX_CHANNELS).contains(&channel)
}

/// Plain decimal digits only: `u8::from_str` alone would also take `+3`.
fn parse_digits(s: &str) -> Option<u8> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

fn parse_button_id(s: &str) -> Result<u8, ProtocolError> {
    match parse_digits(s) {
        Some(id) if is_valid_button(id) => Ok(id),
        _ => Err(ProtocolError::BadButtonId(s.to_string())),
    }
}

/// Parse one inbound serial line (trailing `\r`/`\n` and spaces tolerated)
/// into a button id.
pub fn parse_press(line: &str) -> Result<u8, ProtocolError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(ProtocolError::Empty);
    }
    match line.split_once(',') {
        Some(("P", id)) => parse_button_id(id.trim()),
        _ => Err(ProtocolError::UnknownFrame(line.to_string())),
    }
}

/// Format an outbound LED override frame.
pub fn format_led_override(button_id: u8, on: bool) -> String {
    format!("L,{button_id},{}\n", u8::from(on))
}

/// Encode an LED bus event as a newline-terminated ASCII frame.
pub fn encode_led_event(event: LedEvent) -> String {
    match event {
        LedEvent::Flash(id) => format!("{id}\n"),
        LedEvent::Stop => format!("{STOP_FRAME}\n"),
    }
}

/// Decode an LED bus frame. `0` is Stop, any positive integer is Flash.
pub fn decode_led_event(frame: &str) -> Result<LedEvent, ProtocolError> {
    let s = frame.trim();
    let id = parse_digits(s).ok_or_else(|| ProtocolError::BadLedEvent(s.to_string()))?;
    if id == STOP_FRAME {
        Ok(LedEvent::Stop)
    } else {
        Ok(LedEvent::Flash(id))
    }
}
