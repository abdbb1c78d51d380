//! Playback control: at most one sound at a time, newest press wins.
//!
//! [`PlaybackController`] owns the single live [`PlaybackSession`]. Starting
//! a new sound hard-kills and reaps the previous player, emits `Flash` on the
//! LED bus and spawns the next one, all under the session lock. A failed
//! spawn is answered with `Stop`. Each session gets a completion monitor thread; a monitor
//! whose session was superseded exits without emitting anything, so a late
//! `Stop` can never follow a newer `Flash`.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::bus::{LedEvent, LedSignalSink};

/// Playback errors.
#[derive(Debug)]
pub enum PlaybackError {
    /// The player process could not be started.
    SpawnFailed(String),
    /// The previous player could not be terminated.
    KillFailed(String),
}

impl fmt::Display for PlaybackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaybackError::SpawnFailed(e) => write!(f, "Failed to start playback: {e}"),
            PlaybackError::KillFailed(e) => write!(f, "Failed to stop playback: {e}"),
        }
    }
}

impl std::error::Error for PlaybackError {}

pub type Result<T> = std::result::Result<T, PlaybackError>;

/// Exit status of a finished player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackStatus {
    /// Exit code, `None` if the player died from a signal.
    pub code: Option<i32>,
}

impl PlaybackStatus {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl fmt::Display for PlaybackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(c) => write!(f, "exit code {c}"),
            None => write!(f, "terminated by signal"),
        }
    }
}

// ── Backend traits ──

/// A running player.
pub trait PlaybackProcess: Send {
    /// Non-blocking exit check.
    fn try_wait(&mut self) -> io::Result<Option<PlaybackStatus>>;
    /// Hard-stop and reap.
    fn kill(&mut self) -> io::Result<()>;
}

/// Something that can start a player for a file.
pub trait PlaybackBackend: Send + Sync {
    fn spawn(&self, path: &Path) -> Result<Box<dyn PlaybackProcess>>;
}

// ── External command backend ──

/// Default player program.
pub const DEFAULT_PLAYER: &str = "aplay";

/// Default player argument template.
pub const DEFAULT_PLAYER_ARGS: [&str; 4] = ["-q", "-D", "{device}", "{file}"];

/// Runs an external player, e.g. `aplay -q -D <device> <file>`.
///
/// `{device}` and `{file}` in the argument template are substituted per
/// spawn; if no argument mentions `{file}`, the path is appended.
#[derive(Debug, Clone)]
pub struct CommandBackend {
    program: String,
    args: Vec<String>,
    device: String,
}

impl CommandBackend {
    pub fn new(program: impl Into<String>, args: Vec<String>, device: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args,
            device: device.into(),
        }
    }

    /// `aplay` on the given ALSA device.
    pub fn aplay(device: impl Into<String>) -> Self {
        Self::new(
            DEFAULT_PLAYER,
            DEFAULT_PLAYER_ARGS.iter().map(|s| s.to_string()).collect(),
            device,
        )
    }

    /// Arguments for one invocation.
    pub fn render_args(&self, path: &Path) -> Vec<String> {
        let file = path.to_string_lossy();
        let mut args: Vec<String> = self
            .args
            .iter()
            .map(|a| a.replace("{device}", &self.device).replace("{file}", &file))
            .collect();
        if !self.args.iter().any(|a| a.contains("{file}")) {
            args.push(file.into_owned());
        }
        args
    }
}

impl PlaybackBackend for CommandBackend {
    fn spawn(&self, path: &Path) -> Result<Box<dyn PlaybackProcess>> {
        let child = Command::new(&self.program)
            .args(self.render_args(path))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .spawn()
            .map_err(|e| PlaybackError::SpawnFailed(format!("{}: {e}", self.program)))?;
        Ok(Box::new(ChildProcess { child }))
    }
}

struct ChildProcess {
    child: Child,
}

impl PlaybackProcess for ChildProcess {
    fn try_wait(&mut self) -> io::Result<Option<PlaybackStatus>> {
        Ok(self
            .child
            .try_wait()?
            .map(|s| PlaybackStatus { code: s.code() }))
    }

    fn kill(&mut self) -> io::Result<()> {
        match self.child.kill() {
            Ok(()) => {}
            // Already exited: still needs reaping
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => {}
            Err(e) => return Err(e),
        }
        self.child.wait().map(|_| ())
    }
}

// ── Controller ──

/// Default completion poll interval.
pub const DEFAULT_MONITOR_POLL: Duration = Duration::from_millis(20);

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// The player exited by itself.
    Completed(PlaybackStatus),
    /// A newer press killed it.
    Superseded,
    /// Shut down via [`PlaybackController::stop`].
    Stopped,
}

/// Notification that a session is over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackEnded {
    pub button_id: u8,
    pub reason: EndReason,
}

/// The one live playback.
pub struct PlaybackSession {
    process: Box<dyn PlaybackProcess>,
    pub button_id: u8,
    pub path: PathBuf,
    pub started_at: Instant,
    generation: u64,
}

#[derive(Default)]
struct SessionSlot {
    session: Option<PlaybackSession>,
    generation: u64,
}

fn lock(slot: &Mutex<SessionSlot>) -> MutexGuard<'_, SessionSlot> {
    // A panicked monitor must not take playback down with it
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct PlaybackController {
    backend: Arc<dyn PlaybackBackend>,
    sink: Arc<dyn LedSignalSink>,
    slot: Arc<Mutex<SessionSlot>>,
    poll: Duration,
    ended_tx: Sender<PlaybackEnded>,
    ended_rx: Receiver<PlaybackEnded>,
}

impl PlaybackController {
    pub fn new(
        backend: Arc<dyn PlaybackBackend>,
        sink: Arc<dyn LedSignalSink>,
        poll: Duration,
    ) -> Self {
        let (ended_tx, ended_rx) = mpsc::channel();
        Self {
            backend,
            sink,
            slot: Arc::new(Mutex::new(SessionSlot::default())),
            poll: poll.max(Duration::from_millis(1)),
            ended_tx,
            ended_rx,
        }
    }

    /// Interrupt whatever is playing and start `path` for `button_id`.
    ///
    /// `Flash` goes out before the player starts. On spawn failure it is
    /// followed by `Stop`, so the LED returns to idle with the controller.
    pub fn play(&self, button_id: u8, path: &Path) -> Result<()> {
        let mut slot = lock(&self.slot);
        slot.generation += 1;
        let generation = slot.generation;

        if let Some(mut old) = slot.session.take() {
            log::debug!(
                "[playback] interrupting button {} after {}ms",
                old.button_id,
                old.started_at.elapsed().as_millis()
            );
            if let Err(e) = old.process.kill() {
                log::warn!("[playback] kill failed for button {}: {e}", old.button_id);
            }
            let _ = self.ended_tx.send(PlaybackEnded {
                button_id: old.button_id,
                reason: EndReason::Superseded,
            });
        }

        self.sink.send(LedEvent::Flash(button_id));
        let process = match self.backend.spawn(path) {
            Ok(p) => p,
            Err(e) => {
                self.sink.send(LedEvent::Stop);
                log::warn!("[playback] button {button_id}: {e}");
                return Err(e);
            }
        };
        slot.session = Some(PlaybackSession {
            process,
            button_id,
            path: path.to_path_buf(),
            started_at: Instant::now(),
            generation,
        });
        drop(slot);

        log::info!("[playback] button {button_id}: {}", path.display());
        self.spawn_monitor(generation);
        Ok(())
    }

    fn spawn_monitor(&self, generation: u64) {
        let slot = Arc::clone(&self.slot);
        let sink = Arc::clone(&self.sink);
        let ended = self.ended_tx.clone();
        let poll = self.poll;
        let spawned = std::thread::Builder::new()
            .name(format!("playback-monitor-{generation}"))
            .spawn(move || monitor_session(&slot, sink.as_ref(), &ended, generation, poll));
        if let Err(e) = spawned {
            log::warn!("[playback] cannot start completion monitor: {e}");
        }
    }

    /// Kill any live session (shutdown path). Emits `Stop` if something was playing.
    pub fn stop(&self) {
        let mut slot = lock(&self.slot);
        slot.generation += 1;
        if let Some(mut session) = slot.session.take() {
            if let Err(e) = session.process.kill() {
                log::warn!("[playback] kill failed: {e}");
            }
            self.sink.send(LedEvent::Stop);
            let _ = self.ended_tx.send(PlaybackEnded {
                button_id: session.button_id,
                reason: EndReason::Stopped,
            });
        }
    }

    pub fn is_playing(&self) -> bool {
        lock(&self.slot).session.is_some()
    }

    pub fn current_button(&self) -> Option<u8> {
        lock(&self.slot).session.as_ref().map(|s| s.button_id)
    }

    /// Drain session-end notifications accumulated since the last call.
    pub fn drain_ended(&self) -> Vec<PlaybackEnded> {
        self.ended_rx.try_iter().collect()
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        self.stop();
    }
}

fn monitor_session(
    slot: &Mutex<SessionSlot>,
    sink: &dyn LedSignalSink,
    ended: &Sender<PlaybackEnded>,
    generation: u64,
    poll: Duration,
) {
    loop {
        std::thread::sleep(poll);
        let mut guard = lock(slot);
        let current = match guard.session.as_mut() {
            Some(s) if s.generation == generation => s,
            // Superseded or stopped: the newer owner handles signalling
            _ => return,
        };
        let status = match current.process.try_wait() {
            Ok(None) => continue,
            Ok(Some(status)) => status,
            Err(e) => {
                log::warn!("[playback] lost track of player: {e}");
                if let Err(e) = current.process.kill() {
                    log::debug!("[playback] kill after lost track: {e}");
                }
                PlaybackStatus { code: None }
            }
        };
        let Some(session) = guard.session.take() else {
            return;
        };
        sink.send(LedEvent::Stop);
        // Queued under the lock so it cannot trail a newer press's session
        let _ = ended.send(PlaybackEnded {
            button_id: session.button_id,
            reason: EndReason::Completed(status),
        });
        drop(guard);

        if status.success() {
            log::debug!("[playback] button {} finished", session.button_id);
        } else {
            log::warn!("[playback] button {} player {status}", session.button_id);
        }
        return;
    }
}

// ── Test doubles ──

pub mod mock {
    use super::*;

    #[derive(Debug, Clone)]
    pub struct MockProcessInfo {
        pub path: PathBuf,
        pub exit: Option<PlaybackStatus>,
        pub killed: bool,
        /// `try_wait` fails while set.
        pub lost: bool,
    }

    #[derive(Default)]
    struct Inner {
        processes: Vec<MockProcessInfo>,
        fail_spawn: bool,
        max_live: usize,
    }

    impl Inner {
        fn live(&self) -> usize {
            self.processes
                .iter()
                .filter(|p| !p.killed && p.exit.is_none())
                .count()
        }
    }

    /// Backend whose processes run until the test finishes them.
    #[derive(Clone, Default)]
    pub struct MockBackend {
        inner: Arc<Mutex<Inner>>,
    }

    impl MockBackend {
        pub fn new() -> Self {
            Self::default()
        }

        fn with<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> R {
            let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
            f(&mut inner)
        }

        /// Make subsequent spawns fail (or succeed again).
        pub fn set_fail_spawn(&self, fail: bool) {
            self.with(|i| i.fail_spawn = fail);
        }

        /// Let the `index`-th spawned process exit with `code`.
        pub fn finish(&self, index: usize, code: i32) {
            self.with(|i| {
                if let Some(p) = i.processes.get_mut(index) {
                    p.exit = Some(PlaybackStatus { code: Some(code) });
                }
            });
        }

        /// Make status checks on the `index`-th process fail.
        pub fn lose_track(&self, index: usize) {
            self.with(|i| {
                if let Some(p) = i.processes.get_mut(index) {
                    p.lost = true;
                }
            });
        }

        /// Finish the most recent process.
        pub fn finish_last(&self, code: i32) {
            let n = self.spawned();
            if n > 0 {
                self.finish(n - 1, code);
            }
        }

        pub fn spawned(&self) -> usize {
            self.with(|i| i.processes.len())
        }

        pub fn processes(&self) -> Vec<MockProcessInfo> {
            self.with(|i| i.processes.clone())
        }

        pub fn live(&self) -> usize {
            self.with(|i| i.live())
        }

        /// Highest number of simultaneously live processes ever observed.
        pub fn max_live(&self) -> usize {
            self.with(|i| i.max_live)
        }
    }

    struct MockProcess {
        index: usize,
        inner: Arc<Mutex<Inner>>,
    }

    impl PlaybackProcess for MockProcess {
        fn try_wait(&mut self) -> io::Result<Option<PlaybackStatus>> {
            let inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
            match inner.processes.get(self.index) {
                Some(p) if p.lost => Err(io::Error::other("mock wait failure")),
                p => Ok(p.and_then(|p| p.exit)),
            }
        }

        fn kill(&mut self) -> io::Result<()> {
            let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
            if let Some(p) = inner.processes.get_mut(self.index) {
                p.killed = true;
            }
            Ok(())
        }
    }

    impl PlaybackBackend for MockBackend {
        fn spawn(&self, path: &Path) -> Result<Box<dyn PlaybackProcess>> {
            self.with(|i| {
                if i.fail_spawn {
                    return Err(PlaybackError::SpawnFailed("mock player missing".into()));
                }
                i.processes.push(MockProcessInfo {
                    path: path.to_path_buf(),
                    exit: None,
                    killed: false,
                    lost: false,
                });
                i.max_live = i.max_live.max(i.live());
                Ok(Box::new(MockProcess {
                    index: i.processes.len() - 1,
                    inner: Arc::clone(&self.inner),
                }) as Box<dyn PlaybackProcess>)
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockBackend;
    use super::*;
    use crate::bus::mock::RecordingSink;
    use crate::led::{LedState, LedStateMachine, LedTiming};

    fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        cond()
    }

    fn controller() -> (PlaybackController, MockBackend, RecordingSink) {
        let backend = MockBackend::new();
        let sink = RecordingSink::new();
        let ctl = PlaybackController::new(
            Arc::new(backend.clone()),
            Arc::new(sink.clone()),
            Duration::from_millis(2),
        );
        (ctl, backend, sink)
    }

    #[test]
    fn play_emits_flash_immediately() {
        let (ctl, backend, sink) = controller();
        ctl.play(3, Path::new("/a.wav")).unwrap();
        assert_eq!(sink.events(), vec![LedEvent::Flash(3)]);
        assert!(ctl.is_playing());
        assert_eq!(ctl.current_button(), Some(3));
        assert_eq!(backend.spawned(), 1);
    }

    #[test]
    fn natural_completion_emits_stop() {
        let (ctl, backend, sink) = controller();
        ctl.play(3, Path::new("/a.wav")).unwrap();
        backend.finish(0, 0);
        assert!(wait_until(|| !ctl.is_playing()));
        assert!(wait_until(|| sink.events().len() == 2));
        assert_eq!(sink.events(), vec![LedEvent::Flash(3), LedEvent::Stop]);
        assert!(wait_until(|| !ctl.drain_ended().is_empty()));
    }

    #[test]
    fn completion_reports_status() {
        let (ctl, backend, _sink) = controller();
        ctl.play(9, Path::new("/a.wav")).unwrap();
        backend.finish(0, 1);
        let mut ended = Vec::new();
        assert!(wait_until(|| {
            ended.extend(ctl.drain_ended());
            !ended.is_empty()
        }));
        assert_eq!(
            ended,
            vec![PlaybackEnded {
                button_id: 9,
                reason: EndReason::Completed(PlaybackStatus { code: Some(1) }),
            }]
        );
    }

    #[test]
    fn new_press_kills_previous_and_suppresses_its_stop() {
        let (ctl, backend, sink) = controller();
        ctl.play(3, Path::new("/a.wav")).unwrap();
        ctl.play(7, Path::new("/b.wav")).unwrap();

        let procs = backend.processes();
        assert!(procs[0].killed);
        assert!(!procs[1].killed);
        assert_eq!(backend.max_live(), 1);
        assert_eq!(ctl.current_button(), Some(7));

        // Give the superseded monitor time to notice
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(sink.events(), vec![LedEvent::Flash(3), LedEvent::Flash(7)]);
        assert_eq!(
            ctl.drain_ended(),
            vec![PlaybackEnded {
                button_id: 3,
                reason: EndReason::Superseded,
            }]
        );

        backend.finish(1, 0);
        assert!(wait_until(|| sink.events().len() == 3));
        assert_eq!(
            sink.events(),
            vec![LedEvent::Flash(3), LedEvent::Flash(7), LedEvent::Stop]
        );
    }

    #[test]
    fn rapid_presses_never_overlap() {
        let (ctl, backend, sink) = controller();
        for id in 1..=16u8 {
            ctl.play(id, Path::new("/x.wav")).unwrap();
        }
        assert_eq!(backend.max_live(), 1);
        assert_eq!(backend.live(), 1);
        std::thread::sleep(Duration::from_millis(20));
        let events = sink.events();
        assert_eq!(events.len(), 16);
        assert!(events.iter().all(|e| matches!(e, LedEvent::Flash(_))));
    }

    #[test]
    fn spawn_failure_flashes_then_stops() {
        let (ctl, backend, sink) = controller();
        backend.set_fail_spawn(true);
        let err = ctl.play(2, Path::new("/a.wav")).unwrap_err();
        assert!(matches!(err, PlaybackError::SpawnFailed(_)));
        assert!(!ctl.is_playing());
        assert_eq!(sink.events(), vec![LedEvent::Flash(2), LedEvent::Stop]);

        // Next press tries again independently
        backend.set_fail_spawn(false);
        ctl.play(2, Path::new("/a.wav")).unwrap();
        assert_eq!(
            sink.events(),
            vec![LedEvent::Flash(2), LedEvent::Stop, LedEvent::Flash(2)]
        );
    }

    #[test]
    fn spawn_failure_still_kills_previous() {
        let (ctl, backend, sink) = controller();
        ctl.play(1, Path::new("/a.wav")).unwrap();
        backend.set_fail_spawn(true);
        assert!(ctl.play(2, Path::new("/b.wav")).is_err());
        assert!(backend.processes()[0].killed);
        assert!(!ctl.is_playing());
        assert_eq!(backend.live(), 0);

        let now = Instant::now();
        let mut led = LedStateMachine::new(LedTiming::default(), now);
        for ev in sink.events() {
            led.on_event(ev, now);
        }
        assert_eq!(led.state(), LedState::Idle);
        assert_eq!(
            sink.events(),
            vec![LedEvent::Flash(1), LedEvent::Flash(2), LedEvent::Stop]
        );
    }

    #[test]
    fn completion_is_reported_before_session_clears() {
        let (ctl, backend, _sink) = controller();
        ctl.play(4, Path::new("/a.wav")).unwrap();
        backend.finish(0, 0);
        assert!(wait_until(|| !ctl.is_playing()));
        // Already queued once the slot is free, so a repeat press of the
        // same button cannot be followed by this session's end
        assert_eq!(
            ctl.drain_ended(),
            vec![PlaybackEnded {
                button_id: 4,
                reason: EndReason::Completed(PlaybackStatus { code: Some(0) }),
            }]
        );
    }

    #[test]
    fn lost_player_is_killed_and_reported() {
        let (ctl, backend, sink) = controller();
        ctl.play(6, Path::new("/a.wav")).unwrap();
        backend.lose_track(0);
        assert!(wait_until(|| !ctl.is_playing()));
        assert!(backend.processes()[0].killed);
        assert_eq!(sink.events(), vec![LedEvent::Flash(6), LedEvent::Stop]);
        assert_eq!(
            ctl.drain_ended(),
            vec![PlaybackEnded {
                button_id: 6,
                reason: EndReason::Completed(PlaybackStatus { code: None }),
            }]
        );
    }

    #[test]
    fn stop_kills_and_emits_stop() {
        let (ctl, backend, sink) = controller();
        ctl.play(5, Path::new("/a.wav")).unwrap();
        ctl.stop();
        assert!(backend.processes()[0].killed);
        assert_eq!(sink.events(), vec![LedEvent::Flash(5), LedEvent::Stop]);
        assert!(!ctl.is_playing());
        ctl.stop();
        assert_eq!(sink.events().len(), 2);
    }

    #[test]
    fn render_args_substitutes_placeholders() {
        let backend = CommandBackend::aplay("hw:1,0");
        assert_eq!(
            backend.render_args(Path::new("/s/a.wav")),
            vec!["-q", "-D", "hw:1,0", "/s/a.wav"]
        );
    }

    #[test]
    fn render_args_appends_file_without_placeholder() {
        let backend = CommandBackend::new("paplay", vec!["--volume=65536".into()], "");
        assert_eq!(
            backend.render_args(Path::new("/s/a.wav")),
            vec!["--volume=65536", "/s/a.wav"]
        );
    }

    #[test]
    fn command_backend_missing_binary() {
        let backend = CommandBackend::new("/nonexistent/soundconsole-player", vec![], "");
        let err = backend.spawn(Path::new("/a.wav")).err().unwrap();
        assert!(err.to_string().starts_with("Failed to start playback:"));
    }

    #[cfg(unix)]
    #[test]
    fn command_backend_real_process_completes() {
        let backend = CommandBackend::new("sh", vec!["-c".into(), "exit 0".into()], "");
        let sink = RecordingSink::new();
        let ctl = PlaybackController::new(
            Arc::new(backend),
            Arc::new(sink.clone()),
            Duration::from_millis(5),
        );
        ctl.play(1, Path::new("/dev/null")).unwrap();
        assert!(wait_until(|| !ctl.is_playing()));
        assert!(wait_until(|| sink.events().len() == 2));
        assert_eq!(sink.events(), vec![LedEvent::Flash(1), LedEvent::Stop]);
    }

    #[cfg(unix)]
    #[test]
    fn command_backend_real_process_is_killed() {
        let backend = CommandBackend::new("sh", vec!["-c".into(), "exec sleep 5".into()], "");
        let mut process = backend.spawn(Path::new("")).unwrap();
        assert_eq!(process.try_wait().unwrap(), None);
        process.kill().unwrap();
    }
}
