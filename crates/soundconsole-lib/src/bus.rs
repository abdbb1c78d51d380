//! LED signal bus: ordered, best-effort events from playback to the LED.
//!
//! The producer (playback controller) must never stall on the bus: every
//! send is bounded by a short timeout or is non-blocking, and a failed send
//! is logged and dropped. A lost `Stop` only degrades visual feedback; the
//! LED state machine's watchdog recovers from it.
//!
//! Two transports are provided:
//! - an in-process bounded channel, when both ends live in one process;
//! - a Unix datagram socket at a well-known path, one frame per datagram,
//!   when the LED daemon runs as its own process.

use std::sync::Mutex;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::time::Duration;

/// Event carried from the playback controller to the LED state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedEvent {
    /// A press started playback for this button.
    Flash(u8),
    /// Playback finished naturally.
    Stop,
}

impl std::fmt::Display for LedEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LedEvent::Flash(id) => write!(f, "Flash({id})"),
            LedEvent::Stop => write!(f, "Stop"),
        }
    }
}

/// Result of waiting on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusRecv {
    Event(LedEvent),
    /// Nothing arrived in time (or only malformed frames did).
    Timeout,
    /// The transport is gone; the consumer should fall back to idle.
    Disconnected,
}

/// Writing side of the bus. Sends never block beyond a short bound.
pub trait LedSignalSink: Send + Sync {
    fn send(&self, event: LedEvent);
}

/// Reading side of the bus.
pub trait LedEventSource: Send {
    fn recv_timeout(&mut self, timeout: Duration) -> BusRecv;
}

/// Sink that discards everything (no LED attached).
#[derive(Debug, Default)]
pub struct NullSink;

impl LedSignalSink for NullSink {
    fn send(&self, _event: LedEvent) {}
}

// ── In-process transport ──

/// Queue depth of the in-process bus. The LED consumer drains it every
/// render tick, so this only fills if the consumer is wedged.
const CHANNEL_DEPTH: usize = 64;

pub struct ChannelSink {
    tx: SyncSender<LedEvent>,
}

pub struct ChannelSource {
    rx: Receiver<LedEvent>,
}

/// Create a connected in-process sink/source pair.
pub fn channel() -> (ChannelSink, ChannelSource) {
    let (tx, rx) = mpsc::sync_channel(CHANNEL_DEPTH);
    (ChannelSink { tx }, ChannelSource { rx })
}

impl LedSignalSink for ChannelSink {
    fn send(&self, event: LedEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => log::warn!("[bus] queue full, dropped {event}"),
            Err(TrySendError::Disconnected(_)) => {
                log::debug!("[bus] no LED consumer, dropped {event}")
            }
        }
    }
}

impl LedEventSource for ChannelSource {
    fn recv_timeout(&mut self, timeout: Duration) -> BusRecv {
        match self.rx.recv_timeout(timeout) {
            Ok(ev) => BusRecv::Event(ev),
            Err(RecvTimeoutError::Timeout) => BusRecv::Timeout,
            Err(RecvTimeoutError::Disconnected) => BusRecv::Disconnected,
        }
    }
}

// ── Unix datagram transport ──

#[cfg(unix)]
pub use self::unix::{DatagramSink, DatagramSource};

#[cfg(unix)]
mod unix {
    use super::*;
    use std::io;
    use std::os::unix::net::UnixDatagram;
    use std::path::{Path, PathBuf};

    use crate::protocol;

    /// Writer end: an unbound socket sending to the reader's path.
    pub struct DatagramSink {
        socket: UnixDatagram,
        path: PathBuf,
        /// Whether the last send failed; repeats are logged at debug only.
        failing: Mutex<bool>,
    }

    impl DatagramSink {
        pub fn new(path: &Path, write_timeout: Duration) -> io::Result<Self> {
            let socket = UnixDatagram::unbound()?;
            socket.set_write_timeout(Some(write_timeout.max(Duration::from_millis(1))))?;
            Ok(Self {
                socket,
                path: path.to_path_buf(),
                failing: Mutex::new(false),
            })
        }

        fn note_result(&self, event: LedEvent, result: io::Result<usize>) {
            let Ok(mut failing) = self.failing.lock() else {
                return;
            };
            match result {
                Ok(_) => {
                    if *failing {
                        log::info!("[bus] LED daemon reachable again at {}", self.path.display());
                    }
                    *failing = false;
                }
                Err(e) if !*failing => {
                    log::warn!(
                        "[bus] dropped {event}: {} unavailable ({e})",
                        self.path.display()
                    );
                    *failing = true;
                }
                Err(e) => log::debug!("[bus] dropped {event}: {e}"),
            }
        }
    }

    impl LedSignalSink for DatagramSink {
        fn send(&self, event: LedEvent) {
            let frame = protocol::encode_led_event(event);
            let result = self.socket.send_to(frame.as_bytes(), &self.path);
            self.note_result(event, result);
        }
    }

    /// Reader end: owns the socket path for its lifetime.
    pub struct DatagramSource {
        socket: UnixDatagram,
        path: PathBuf,
    }

    impl DatagramSource {
        /// Bind the bus path, replacing a stale socket left by a previous run.
        pub fn bind(path: &Path) -> io::Result<Self> {
            if path.exists() {
                std::fs::remove_file(path)?;
            }
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir)?;
            }
            let socket = UnixDatagram::bind(path)?;
            Ok(Self {
                socket,
                path: path.to_path_buf(),
            })
        }
    }

    impl Drop for DatagramSource {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.path);
        }
    }

    impl LedEventSource for DatagramSource {
        fn recv_timeout(&mut self, timeout: Duration) -> BusRecv {
            // A zero timeout means "block forever" to the socket API
            let timeout = timeout.max(Duration::from_millis(1));
            if let Err(e) = self.socket.set_read_timeout(Some(timeout)) {
                log::warn!("[bus] cannot set read timeout: {e}");
                return BusRecv::Disconnected;
            }
            let mut buf = [0u8; 32];
            match self.socket.recv(&mut buf) {
                Ok(n) => {
                    let frame = String::from_utf8_lossy(&buf[..n]);
                    match protocol::decode_led_event(&frame) {
                        Ok(ev) => BusRecv::Event(ev),
                        Err(e) => {
                            log::debug!("[bus] discarded frame: {e}");
                            BusRecv::Timeout
                        }
                    }
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock
                            | io::ErrorKind::TimedOut
                            | io::ErrorKind::Interrupted
                    ) =>
                {
                    BusRecv::Timeout
                }
                Err(e) => {
                    log::warn!("[bus] receive failed: {e}");
                    BusRecv::Disconnected
                }
            }
        }
    }
}

// ── Test doubles ──

pub mod mock {
    use super::*;
    use std::sync::Arc;

    /// Sink that records every event in order.
    #[derive(Clone, Default)]
    pub struct RecordingSink {
        events: Arc<Mutex<Vec<LedEvent>>>,
    }

    impl RecordingSink {
        pub fn new() -> Self {
            Self::default()
        }

        /// Snapshot of the events sent so far.
        pub fn events(&self) -> Vec<LedEvent> {
            self.events.lock().map(|e| e.clone()).unwrap_or_default()
        }

        pub fn clear(&self) {
            if let Ok(mut e) = self.events.lock() {
                e.clear();
            }
        }
    }

    impl LedSignalSink for RecordingSink {
        fn send(&self, event: LedEvent) {
            if let Ok(mut e) = self.events.lock() {
                e.push(event);
            }
        }
    }
}
