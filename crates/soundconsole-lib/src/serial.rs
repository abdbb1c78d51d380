//! Serial link to the button box microcontroller.
//!
//! [`SerialLink`] owns the port, frames incoming bytes into lines, parses
//! `P,<id>` presses into [`ButtonEvent`]s and writes LED override frames. Any
//! open, read or write failure drops the port and falls back to
//! fixed-interval reconnection; the link never gives up and never panics on
//! bad input. It is the only reader and writer of the port.

use std::collections::VecDeque;
use std::fmt;
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::protocol::{self, MAX_FRAME_LEN};
use crate::reconnect::{self, ReconnectState};

// ── Error type ──

/// Serial link errors.
///
/// String payloads follow the convention **"context: details"**.
#[derive(Debug)]
pub enum SerialError {
    /// No candidate serial device exists.
    NoPort(String),
    OpenFailed(String),
    ReadFailed(String),
    WriteFailed(String),
    /// Operation attempted while the port is closed.
    Disconnected,
}

impl fmt::Display for SerialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SerialError::NoPort(p) => write!(f, "No serial device found (configured: {p})"),
            SerialError::OpenFailed(e) => write!(f, "Failed to open serial port: {e}"),
            SerialError::ReadFailed(e) => write!(f, "Serial read failed: {e}"),
            SerialError::WriteFailed(e) => write!(f, "Serial write failed: {e}"),
            SerialError::Disconnected => write!(f, "Serial port not connected"),
        }
    }
}

impl std::error::Error for SerialError {}

pub type Result<T> = std::result::Result<T, SerialError>;

// ── Events ──

/// A button press reported by the microcontroller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ButtonEvent {
    /// Physical button, `1..=16`.
    pub button_id: u8,
    /// Host time at which the frame was parsed.
    pub timestamp: Instant,
}

impl ButtonEvent {
    pub fn new(button_id: u8, timestamp: Instant) -> Self {
        Self {
            button_id,
            timestamp,
        }
    }
}

// ── Transport traits ──

/// A connected byte stream to the microcontroller.
pub trait SerialTransport: Send {
    /// Read whatever bytes are available, waiting at most the transport's
    /// read timeout. `Ok(0)` means nothing arrived; `Err` means the link is
    /// broken and must be reopened.
    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write one complete frame and flush it.
    fn write_frame(&mut self, frame: &[u8]) -> io::Result<()>;

    /// Human-readable port name for logging.
    fn name(&self) -> &str;
}

/// Opens (and reopens) the transport.
pub trait PortOpener {
    fn open(&mut self) -> Result<Box<dyn SerialTransport>>;
}

// ── Line framing ──

/// Splits a byte stream into newline-terminated lines.
///
/// Partial lines are carried across reads. A trailing `\r` is stripped.
/// A line that grows past [`MAX_FRAME_LEN`] without a newline is line noise:
/// it is dropped along with everything up to the next newline.
#[derive(Debug, Default)]
pub struct LineFramer {
    buffer: Vec<u8>,
    discarding: bool,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes, returning every line completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &b in bytes {
            if b == b'\n' {
                if !self.discarding {
                    if self.buffer.last() == Some(&b'\r') {
                        self.buffer.pop();
                    }
                    lines.push(String::from_utf8_lossy(&self.buffer).into_owned());
                }
                self.buffer.clear();
                self.discarding = false;
            } else if !self.discarding {
                self.buffer.push(b);
                if self.buffer.len() > MAX_FRAME_LEN {
                    log::debug!("[serial] discarding over-long frame");
                    self.buffer.clear();
                    self.discarding = true;
                }
            }
        }
        lines
    }

    /// Drop any partial line (e.g. after a reconnect).
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.discarding = false;
    }
}

// ── Link ──

/// Longest single sleep while waiting to reconnect, so callers stay responsive.
const RECONNECT_SLICE: Duration = Duration::from_millis(100);

/// Persistent, self-healing connection to the microcontroller.
pub struct SerialLink<O: PortOpener> {
    opener: O,
    transport: Option<Box<dyn SerialTransport>>,
    reconnect: ReconnectState,
    framer: LineFramer,
    pending: VecDeque<String>,
    read_buf: Vec<u8>,
}

impl<O: PortOpener> SerialLink<O> {
    /// Create a link that is not yet connected; the first poll opens the port.
    pub fn new(opener: O, retry_interval: Duration) -> Self {
        Self {
            opener,
            transport: None,
            reconnect: ReconnectState::new(retry_interval),
            framer: LineFramer::new(),
            pending: VecDeque::new(),
            read_buf: vec![0; 256],
        }
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    /// Drop the port; the next poll starts reconnecting.
    fn disconnect(&mut self, reason: &str) {
        if let Some(t) = self.transport.take() {
            log::warn!("[serial] {} lost: {reason}; reconnecting", t.name());
        }
        self.framer.reset();
        self.pending.clear();
    }

    fn ensure_connected(&mut self) -> bool {
        if self.transport.is_some() {
            return true;
        }
        match reconnect::try_reopen(&mut self.reconnect, &mut self.opener) {
            Some(t) => {
                log::info!("[serial] connected to {}", t.name());
                self.transport = Some(t);
                true
            }
            None => false,
        }
    }

    /// Wait (bounded by the read timeout or a short reconnect slice) for the
    /// next press. Returns `None` when nothing valid arrived in this round.
    ///
    /// Malformed frames are logged and discarded. Presses that happen while
    /// the port is down are never generated.
    pub fn poll_event(&mut self) -> Option<ButtonEvent> {
        loop {
            while let Some(line) = self.pending.pop_front() {
                match protocol::parse_press(&line) {
                    Ok(id) => return Some(ButtonEvent::new(id, Instant::now())),
                    Err(protocol::ProtocolError::Empty) => {}
                    Err(e) => log::debug!("[serial] discarded frame: {e}"),
                }
            }

            if !self.ensure_connected() {
                std::thread::sleep(self.reconnect.remaining().min(RECONNECT_SLICE));
                return None;
            }

            let Some(transport) = self.transport.as_mut() else {
                return None;
            };
            match transport.read_chunk(&mut self.read_buf) {
                Ok(0) => return None,
                Ok(n) => {
                    let lines = self.framer.push(&self.read_buf[..n]);
                    self.pending.extend(lines);
                }
                Err(e) => {
                    self.disconnect(&e.to_string());
                    return None;
                }
            }
        }
    }

    /// Lazy, infinite stream of presses that survives reconnects. Ends only
    /// when `running` is cleared.
    pub fn events<'a>(
        &'a mut self,
        running: &'a AtomicBool,
    ) -> impl Iterator<Item = ButtonEvent> + 'a {
        std::iter::from_fn(move || {
            while running.load(Ordering::SeqCst) {
                if let Some(ev) = self.poll_event() {
                    return Some(ev);
                }
            }
            None
        })
    }

    /// Send an `L,<id>,<0|1>` override for a button's firmware LED.
    ///
    /// A write failure drops the port into the reconnect path.
    pub fn set_led_override(&mut self, button_id: u8, on: bool) -> Result<()> {
        let Some(transport) = self.transport.as_mut() else {
            return Err(SerialError::Disconnected);
        };
        let frame = protocol::format_led_override(button_id, on);
        if let Err(e) = transport.write_frame(frame.as_bytes()) {
            let msg = e.to_string();
            self.disconnect(&msg);
            return Err(SerialError::WriteFailed(format!("L,{button_id}: {msg}")));
        }
        Ok(())
    }
}

// ── Port resolution ──

/// Find a usable serial device path.
///
/// Tries the configured path first; if it is missing, tries stable
/// `/dev/serial/by-id` links (Pico/RP2040 names first); finally falls back to
/// the first `/dev/ttyACM*`.
pub fn resolve_port(preferred: &str) -> Option<String> {
    resolve_port_in(
        preferred,
        Path::new("/dev/serial/by-id"),
        Path::new("/dev"),
    )
}

fn sorted_entries(dir: &Path, filter: impl Fn(&str) -> bool) -> Vec<std::path::PathBuf> {
    let Ok(rd) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut paths: Vec<_> = rd
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| filter(n))
        })
        .collect();
    paths.sort();
    paths
}

pub(crate) fn resolve_port_in(preferred: &str, by_id: &Path, dev: &Path) -> Option<String> {
    let preferred = preferred.trim();
    if !preferred.is_empty() && Path::new(preferred).exists() {
        return Some(preferred.to_string());
    }

    let by_id_entries = sorted_entries(by_id, |_| true);
    let is_pico = |p: &std::path::PathBuf| {
        p.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.contains("Pico") || n.contains("RP2040"))
    };
    if let Some(p) = by_id_entries
        .iter()
        .find(|p| is_pico(p))
        .or_else(|| by_id_entries.first())
    {
        return Some(p.display().to_string());
    }

    sorted_entries(dev, |n| n.starts_with("ttyACM"))
        .first()
        .map(|p| p.display().to_string())
}

// ── serialport backend ──

/// Transport over a real serial device (USB CDC).
pub struct SerialPortTransport {
    port: Box<dyn serialport::SerialPort>,
    name: String,
}

impl SerialTransport for SerialPortTransport {
    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.port.read(buf) {
            // Timeouts are reported as errors; a zero-length read is a hangup.
            Ok(0) => Err(io::Error::new(io::ErrorKind::UnexpectedEof, "port closed")),
            Ok(n) => Ok(n),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(0)
            }
            Err(e) => Err(e),
        }
    }

    fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        self.port.write_all(frame)?;
        self.port.flush()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Opens the configured port (or the best available candidate).
pub struct SerialPortOpener {
    configured: String,
    baud_rate: u32,
    read_timeout: Duration,
}

impl SerialPortOpener {
    pub fn new(configured: &str, baud_rate: u32, read_timeout: Duration) -> Self {
        Self {
            configured: configured.to_string(),
            baud_rate,
            read_timeout,
        }
    }
}

impl PortOpener for SerialPortOpener {
    fn open(&mut self) -> Result<Box<dyn SerialTransport>> {
        let path =
            resolve_port(&self.configured).ok_or_else(|| SerialError::NoPort(self.configured.clone()))?;
        let port = serialport::new(&path, self.baud_rate)
            .timeout(self.read_timeout)
            .open()
            .map_err(|e| SerialError::OpenFailed(format!("{path}: {e}")))?;
        // Discard whatever the firmware printed while nobody was listening
        let _ = port.clear(serialport::ClearBuffer::Input);
        Ok(Box::new(SerialPortTransport { port, name: path }))
    }
}

// ── Test doubles ──

/// Scriptable transports for unit and integration tests.
pub mod mock {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Transport that replays a script of read results and records writes.
    ///
    /// Once the script is exhausted, reads report "no data".
    pub struct MockTransport {
        reads: VecDeque<io::Result<Vec<u8>>>,
        pub written: Arc<Mutex<Vec<String>>>,
        pub fail_writes: Arc<AtomicBool>,
    }

    impl Default for MockTransport {
        fn default() -> Self {
            Self::new()
        }
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self {
                reads: VecDeque::new(),
                written: Arc::new(Mutex::new(Vec::new())),
                fail_writes: Arc::new(AtomicBool::new(false)),
            }
        }

        /// Queue bytes to be returned by a future read.
        pub fn with_bytes(mut self, bytes: &[u8]) -> Self {
            self.reads.push_back(Ok(bytes.to_vec()));
            self
        }

        /// Queue a read error (simulates unplugging the device).
        pub fn with_error(mut self, kind: io::ErrorKind) -> Self {
            self.reads.push_back(Err(io::Error::new(kind, "mock failure")));
            self
        }
    }

    impl SerialTransport for MockTransport {
        fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.reads.pop_front() {
                Some(Ok(bytes)) => {
                    let n = bytes.len().min(buf.len());
                    buf[..n].copy_from_slice(&bytes[..n]);
                    Ok(n)
                }
                Some(Err(e)) => Err(e),
                None => Ok(0),
            }
        }

        fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "mock write failure"));
            }
            if let Ok(mut w) = self.written.lock() {
                w.push(String::from_utf8_lossy(frame).into_owned());
            }
            Ok(())
        }

        fn name(&self) -> &str {
            "mock://pico"
        }
    }

    /// Opener that hands out queued transports in order, then fails.
    pub struct MockOpener {
        transports: VecDeque<Result<MockTransport>>,
        attempts: u32,
    }

    impl MockOpener {
        pub fn new(transports: Vec<Result<MockTransport>>) -> Self {
            Self {
                transports: transports.into(),
                attempts: 0,
            }
        }

        /// Number of times `open` was called.
        pub fn attempts(&self) -> u32 {
            self.attempts
        }
    }

    impl PortOpener for MockOpener {
        fn open(&mut self) -> Result<Box<dyn SerialTransport>> {
            self.attempts += 1;
            match self.transports.pop_front() {
                Some(Ok(t)) => Ok(Box::new(t)),
                Some(Err(e)) => Err(e),
                None => Err(SerialError::NoPort("mock://pico".into())),
            }
        }
    }
}
