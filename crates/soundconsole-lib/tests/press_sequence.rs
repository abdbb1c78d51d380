//! Integration tests: presses travelling from the serial link through
//! debounce, resolution and playback to the LED state machine, using the
//! in-crate mocks for every piece of hardware.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use soundconsole_lib::bus::{self, BusRecv, ChannelSource, LedEvent, LedEventSource};
use soundconsole_lib::channel::{ChannelMonitor, ChannelState};
use soundconsole_lib::debounce::PressDebouncer;
use soundconsole_lib::gpio::mock::ScriptedInputs;
use soundconsole_lib::led::{LedState, LedStateMachine, LedTiming};
use soundconsole_lib::playback::PlaybackController;
use soundconsole_lib::playback::mock::MockBackend;
use soundconsole_lib::resolver::ProfileResolver;
use soundconsole_lib::serial::mock::{MockOpener, MockTransport};
use soundconsole_lib::serial::{ButtonEvent, SerialLink};
use soundconsole_lib::store::mock::MemoryStore;
use soundconsole_lib::trigger::{PressOutcome, TriggerPipeline};

const FALLBACK: &str = "/usr/share/soundconsole/unassigned.wav";

struct Console {
    pipeline: TriggerPipeline<MemoryStore>,
    backend: MockBackend,
    store: MemoryStore,
    channel: ChannelState,
    source: ChannelSource,
    led: LedStateMachine,
    dir: tempfile::TempDir,
}

impl Console {
    fn new(channel: Option<u8>) -> Self {
        let (sink, source) = bus::channel();
        let backend = MockBackend::new();
        let store = MemoryStore::new();
        let channel = ChannelState::new(channel);
        let controller = PlaybackController::new(
            Arc::new(backend.clone()),
            Arc::new(sink),
            Duration::from_millis(2),
        );
        let resolver = ProfileResolver::new(store.clone(), channel.clone(), FALLBACK);
        let pipeline = TriggerPipeline::new(PressDebouncer::default(), resolver, controller);
        Console {
            pipeline,
            backend,
            store,
            channel,
            source,
            led: LedStateMachine::new(LedTiming::default(), Instant::now()),
            dir: tempfile::tempdir().unwrap(),
        }
    }

    /// Create a real file and assign it.
    fn assign(&self, channel: u8, button: u8, name: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, b"RIFF").unwrap();
        self.store.assign(channel, button, &path);
        path
    }

    /// Drain the bus into the LED machine, returning what arrived.
    fn pump_led(&mut self) -> Vec<LedEvent> {
        let mut seen = Vec::new();
        while let BusRecv::Event(ev) = self.source.recv_timeout(Duration::from_millis(20)) {
            self.led.on_event(ev, Instant::now());
            seen.push(ev);
        }
        seen
    }

    fn wait_idle(&self) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while self.pipeline.controller().is_playing() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(2));
        }
        assert!(!self.pipeline.controller().is_playing());
    }
}

#[test]
fn unassigned_press_plays_fallback_flashes_then_stops() {
    let mut c = Console::new(Some(1));
    let outcome = c.pipeline.handle_press(ButtonEvent::new(3, Instant::now()));
    assert!(matches!(outcome, PressOutcome::Played { .. }));
    assert_eq!(c.backend.processes()[0].path, PathBuf::from(FALLBACK));

    assert_eq!(c.pump_led(), vec![LedEvent::Flash(3)]);
    assert_eq!(c.led.state(), LedState::Flashing);

    c.backend.finish_last(0);
    c.wait_idle();
    assert_eq!(c.pump_led(), vec![LedEvent::Stop]);
    assert_eq!(c.led.state(), LedState::Idle);
}

#[test]
fn second_button_ten_ms_later_supersedes_first() {
    let mut c = Console::new(Some(1));
    let one = c.assign(1, 1, "one.wav");
    let two = c.assign(1, 2, "two.wav");
    let t0 = Instant::now();

    assert!(matches!(
        c.pipeline.handle_press(ButtonEvent::new(1, t0)),
        PressOutcome::Played { .. }
    ));
    assert!(matches!(
        c.pipeline
            .handle_press(ButtonEvent::new(2, t0 + Duration::from_millis(10))),
        PressOutcome::Played { .. }
    ));

    let procs = c.backend.processes();
    assert_eq!(procs[0].path, one);
    assert_eq!(procs[1].path, two);
    assert!(procs[0].killed);
    assert_eq!(c.backend.max_live(), 1);

    // Superseded monitor must stay silent
    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(c.pump_led(), vec![LedEvent::Flash(1), LedEvent::Flash(2)]);

    c.backend.finish(1, 0);
    c.wait_idle();
    assert_eq!(c.pump_led(), vec![LedEvent::Stop]);
    assert_eq!(c.led.state(), LedState::Idle);
}

#[test]
fn bounce_within_window_plays_once() {
    let mut c = Console::new(Some(1));
    c.assign(1, 5, "five.wav");
    let t0 = Instant::now();
    let outcomes: Vec<_> = [0u64, 15, 40, 79]
        .iter()
        .map(|&ms| {
            c.pipeline
                .handle_press(ButtonEvent::new(5, t0 + Duration::from_millis(ms)))
        })
        .collect();
    assert!(matches!(outcomes[0], PressOutcome::Played { .. }));
    assert!(
        outcomes[1..]
            .iter()
            .all(|o| matches!(o, PressOutcome::Debounced))
    );
    assert_eq!(c.backend.spawned(), 1);
}

#[test]
fn channel_change_redirects_next_press() {
    let mut c = Console::new(None);
    let ch2 = c.assign(2, 4, "ch2.wav");

    // Selector settles on channel 2 (active-low, input 2 grounded)
    let level = vec![true, false, true, true];
    let mut monitor = ChannelMonitor::new(
        ScriptedInputs::new(vec![level.clone(), level]),
        true,
        2,
        c.channel.clone(),
    );
    monitor.tick();
    let t0 = Instant::now();
    c.pipeline.handle_press(ButtonEvent::new(4, t0));
    assert_eq!(c.backend.processes()[0].path, PathBuf::from(FALLBACK));

    assert!(monitor.tick().is_some());
    c.pipeline
        .handle_press(ButtonEvent::new(4, t0 + Duration::from_millis(200)));
    assert_eq!(c.backend.processes()[1].path, ch2);
}

#[test]
fn store_edits_apply_to_very_next_press() {
    let mut c = Console::new(Some(1));
    let t0 = Instant::now();
    c.pipeline.handle_press(ButtonEvent::new(6, t0));
    let new = c.assign(1, 6, "new.wav");
    c.pipeline
        .handle_press(ButtonEvent::new(6, t0 + Duration::from_millis(100)));
    assert_eq!(c.backend.processes()[1].path, new);
}

#[test]
fn store_outage_still_produces_sound() {
    let mut c = Console::new(Some(1));
    c.assign(1, 1, "one.wav");
    c.store.set_failing(true);
    c.pipeline.handle_press(ButtonEvent::new(1, Instant::now()));
    assert_eq!(c.backend.processes()[0].path, PathBuf::from(FALLBACK));
    assert_eq!(c.pump_led(), vec![LedEvent::Flash(1)]);
}

#[test]
fn serial_stream_survives_garbage_and_reconnect() {
    let first = MockTransport::new()
        .with_bytes(b"hello\nP,2\nP,99\n")
        .with_error(std::io::ErrorKind::BrokenPipe);
    let second = MockTransport::new().with_bytes(b"P,7\r\n");
    let opener = MockOpener::new(vec![Ok(first), Ok(second)]);
    let mut link = SerialLink::new(opener, Duration::from_millis(5));

    let running = std::sync::atomic::AtomicBool::new(true);
    let ids: Vec<u8> = link.events(&running).take(2).map(|e| e.button_id).collect();
    assert_eq!(ids, vec![2, 7]);
}

#[test]
fn spawn_failure_returns_led_to_idle_and_next_press_retries() {
    let mut c = Console::new(Some(1));
    c.backend.set_fail_spawn(true);
    let t0 = Instant::now();
    assert!(matches!(
        c.pipeline.handle_press(ButtonEvent::new(8, t0)),
        PressOutcome::Failed { .. }
    ));
    assert_eq!(c.pump_led(), vec![LedEvent::Flash(8), LedEvent::Stop]);
    assert_eq!(c.led.state(), LedState::Idle);

    c.backend.set_fail_spawn(false);
    assert!(matches!(
        c.pipeline
            .handle_press(ButtonEvent::new(8, t0 + Duration::from_millis(100))),
        PressOutcome::Played { .. }
    ));
    assert_eq!(c.pump_led(), vec![LedEvent::Flash(8)]);
}

#[test]
fn failed_interrupt_does_not_leave_led_flashing() {
    let mut c = Console::new(Some(1));
    c.assign(1, 1, "one.wav");
    let t0 = Instant::now();
    c.pipeline.handle_press(ButtonEvent::new(1, t0));
    c.backend.set_fail_spawn(true);
    assert!(matches!(
        c.pipeline
            .handle_press(ButtonEvent::new(2, t0 + Duration::from_millis(10))),
        PressOutcome::Failed { .. }
    ));

    assert!(!c.pipeline.controller().is_playing());
    assert_eq!(c.backend.live(), 0);
    assert_eq!(
        c.pump_led(),
        vec![LedEvent::Flash(1), LedEvent::Flash(2), LedEvent::Stop]
    );
    assert_eq!(c.led.state(), LedState::Idle);
}
