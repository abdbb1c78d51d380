//! soundconsole: host pipeline for a serial button box: presses in, sounds
//! and LED feedback out.

pub mod bus;
pub mod channel;
pub mod config;
pub mod debounce;
pub mod error;
pub mod gpio;
pub mod led;
pub mod playback;
pub mod protocol;
pub mod reconnect;
pub mod resolver;
pub mod serial;
pub mod store;
pub mod trigger;

pub use error::ConsoleError;
