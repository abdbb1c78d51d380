//! Assignment store: the source of truth for `(channel, button) -> file`.
//!
//! The store is owned by external management tooling and may change between
//! presses, so every lookup goes back to it. [`JsonStore`] reads the mappings
//! document the tooling exports:
//!
//! ```json
//! {
//!   "activeProfile": "default",
//!   "profiles": {
//!     "default": { "baseDir": "~/sounds", "buttons": { "1": "horn.wav" } },
//!     "party":   { "baseDir": "/srv/party", "buttons": { "1": "/abs/air.wav" } }
//!   },
//!   "channels": { "1": "default", "2": "party" }
//! }
//! ```
//!
//! Channels missing from `channels` use `activeProfile`.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Assignment store errors.
#[derive(Debug)]
pub enum StoreError {
    /// The store cannot be reached (file missing or unreadable).
    Unavailable(String),
    /// The store answered with something that cannot be interpreted.
    Malformed(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Unavailable(e) => write!(f, "Assignment store unavailable: {e}"),
            StoreError::Malformed(e) => write!(f, "Assignment store malformed: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Read-only view of the audio assignments.
pub trait AssignmentStore: Send + Sync {
    /// File assigned to `button_id` on `channel`, if any.
    fn resolve_assignment(&self, channel: u8, button_id: u8) -> Result<Option<PathBuf>>;

    /// Every assignment on `channel`, keyed by button.
    fn current_channel_assignments(&self, channel: u8) -> Result<BTreeMap<u8, PathBuf>>;
}

impl<T: AssignmentStore + ?Sized> AssignmentStore for std::sync::Arc<T> {
    fn resolve_assignment(&self, channel: u8, button_id: u8) -> Result<Option<PathBuf>> {
        (**self).resolve_assignment(channel, button_id)
    }

    fn current_channel_assignments(&self, channel: u8) -> Result<BTreeMap<u8, PathBuf>> {
        (**self).current_channel_assignments(channel)
    }
}

// ── JSON mappings document ──

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MappingsDocument {
    #[serde(default)]
    active_profile: Option<String>,
    #[serde(default)]
    profiles: HashMap<String, ProfileEntry>,
    #[serde(default)]
    channels: HashMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileEntry {
    #[serde(default)]
    base_dir: Option<String>,
    #[serde(default)]
    buttons: HashMap<String, String>,
}

impl MappingsDocument {
    fn profile_for(&self, channel: u8) -> Result<Option<(&str, &ProfileEntry)>> {
        let name = self
            .channels
            .get(&channel.to_string())
            .or(self.active_profile.as_ref());
        let Some(name) = name else {
            return Ok(None);
        };
        match self.profiles.get(name) {
            Some(profile) => Ok(Some((name.as_str(), profile))),
            None => Err(StoreError::Malformed(format!(
                "channel {channel}: unknown profile '{name}'"
            ))),
        }
    }
}

impl ProfileEntry {
    fn base_dir(&self) -> PathBuf {
        match self.base_dir.as_deref() {
            None | Some("") => PathBuf::from("."),
            Some(dir) => expand_home(dir),
        }
    }

    /// Button map with keys parsed. Non-numeric keys and empty values are
    /// skipped, matching what the management tooling tolerates.
    fn buttons(&self) -> BTreeMap<u8, PathBuf> {
        let base = self.base_dir();
        self.buttons
            .iter()
            .filter(|(_, file)| !file.trim().is_empty())
            .filter_map(|(key, file)| {
                let id = key.trim().parse::<u8>().ok()?;
                Some((id, base.join(expand_home(file))))
            })
            .collect()
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    PathBuf::from(path)
}

/// Store backed by a JSON mappings file, re-read on every query.
#[derive(Debug, Clone)]
pub struct JsonStore {
    path: PathBuf,
}

impl JsonStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<MappingsDocument> {
        let text = std::fs::read_to_string(&self.path)
            .map_err(|e| StoreError::Unavailable(format!("{}: {e}", self.path.display())))?;
        serde_json::from_str(&text)
            .map_err(|e| StoreError::Malformed(format!("{}: {e}", self.path.display())))
    }
}

impl AssignmentStore for JsonStore {
    fn resolve_assignment(&self, channel: u8, button_id: u8) -> Result<Option<PathBuf>> {
        let doc = self.load()?;
        let Some((_, profile)) = doc.profile_for(channel)? else {
            return Ok(None);
        };
        Ok(profile.buttons().remove(&button_id))
    }

    fn current_channel_assignments(&self, channel: u8) -> Result<BTreeMap<u8, PathBuf>> {
        let doc = self.load()?;
        match doc.profile_for(channel)? {
            Some((name, profile)) => {
                log::debug!("[playback] channel {channel} uses profile '{name}'");
                Ok(profile.buttons())
            }
            None => Ok(BTreeMap::new()),
        }
    }
}

// ── Test doubles ──

pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    /// In-memory store with an injectable outage and a query counter.
    #[derive(Clone, Default)]
    pub struct MemoryStore {
        entries: Arc<Mutex<HashMap<(u8, u8), PathBuf>>>,
        failing: Arc<AtomicBool>,
        queries: Arc<AtomicU32>,
    }

    impl MemoryStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn assign(&self, channel: u8, button_id: u8, path: impl Into<PathBuf>) {
            if let Ok(mut e) = self.entries.lock() {
                e.insert((channel, button_id), path.into());
            }
        }

        pub fn unassign(&self, channel: u8, button_id: u8) {
            if let Ok(mut e) = self.entries.lock() {
                e.remove(&(channel, button_id));
            }
        }

        /// Make every subsequent query fail (or succeed again).
        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        pub fn queries(&self) -> u32 {
            self.queries.load(Ordering::SeqCst)
        }

        fn check(&self) -> Result<()> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("memory store offline".into()));
            }
            Ok(())
        }
    }

    impl AssignmentStore for MemoryStore {
        fn resolve_assignment(&self, channel: u8, button_id: u8) -> Result<Option<PathBuf>> {
            self.check()?;
            Ok(self
                .entries
                .lock()
                .ok()
                .and_then(|e| e.get(&(channel, button_id)).cloned()))
        }

        fn current_channel_assignments(&self, channel: u8) -> Result<BTreeMap<u8, PathBuf>> {
            self.check()?;
            Ok(self
                .entries
                .lock()
                .map(|e| {
                    e.iter()
                        .filter(|((ch, _), _)| *ch == channel)
                        .map(|((_, id), p)| (*id, p.clone()))
                        .collect()
                })
                .unwrap_or_default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"{
        "activeProfile": "default",
        "profiles": {
            "default": { "baseDir": "/srv/sounds", "buttons": { "1": "horn.wav", "2": "", "x": "bad.wav" } },
            "party": { "baseDir": "/srv/party", "buttons": { "1": "/abs/air.wav", "16": "end.wav" } }
        },
        "channels": { "2": "party", "3": "ghost" }
    }"#;

    fn store_with(text: &str) -> (tempfile::TempDir, JsonStore) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mappings.json");
        std::fs::write(&path, text).unwrap();
        (dir, JsonStore::new(path))
    }

    #[test]
    fn resolves_relative_against_base_dir() {
        let (_dir, store) = store_with(DOC);
        assert_eq!(
            store.resolve_assignment(1, 1).unwrap(),
            Some(PathBuf::from("/srv/sounds/horn.wav"))
        );
    }

    #[test]
    fn absolute_file_ignores_base_dir() {
        let (_dir, store) = store_with(DOC);
        assert_eq!(
            store.resolve_assignment(2, 1).unwrap(),
            Some(PathBuf::from("/abs/air.wav"))
        );
    }

    #[test]
    fn unlisted_channel_uses_active_profile() {
        let (_dir, store) = store_with(DOC);
        assert_eq!(
            store.resolve_assignment(4, 1).unwrap(),
            Some(PathBuf::from("/srv/sounds/horn.wav"))
        );
    }

    #[test]
    fn empty_and_missing_buttons_are_unassigned() {
        let (_dir, store) = store_with(DOC);
        assert_eq!(store.resolve_assignment(1, 2).unwrap(), None);
        assert_eq!(store.resolve_assignment(1, 9).unwrap(), None);
    }

    #[test]
    fn unknown_profile_is_malformed() {
        let (_dir, store) = store_with(DOC);
        assert!(matches!(
            store.resolve_assignment(3, 1),
            Err(StoreError::Malformed(_))
        ));
    }

    #[test]
    fn no_profile_at_all_is_unassigned() {
        let (_dir, store) = store_with(r#"{ "profiles": {} }"#);
        assert_eq!(store.resolve_assignment(1, 1).unwrap(), None);
        assert!(store.current_channel_assignments(1).unwrap().is_empty());
    }

    #[test]
    fn channel_assignments_skip_invalid_keys() {
        let (_dir, store) = store_with(DOC);
        let all = store.current_channel_assignments(1).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[&1], PathBuf::from("/srv/sounds/horn.wav"));
        let party = store.current_channel_assignments(2).unwrap();
        assert_eq!(party.keys().copied().collect::<Vec<_>>(), vec![1, 16]);
    }

    #[test]
    fn missing_file_is_unavailable() {
        let store = JsonStore::new("/nonexistent/soundconsole/mappings.json");
        assert!(matches!(
            store.resolve_assignment(1, 1),
            Err(StoreError::Unavailable(_))
        ));
    }

    #[test]
    fn malformed_json_is_malformed() {
        let (_dir, store) = store_with("{ not json");
        assert!(matches!(
            store.resolve_assignment(1, 1),
            Err(StoreError::Malformed(_))
        ));
    }

    #[test]
    fn edits_are_visible_on_next_query() {
        let (_dir, store) = store_with(DOC);
        assert!(store.resolve_assignment(1, 5).unwrap().is_none());
        std::fs::write(
            store.path(),
            r#"{ "activeProfile": "a", "profiles": { "a": { "baseDir": "/x", "buttons": { "5": "new.wav" } } } }"#,
        )
        .unwrap();
        assert_eq!(
            store.resolve_assignment(1, 5).unwrap(),
            Some(PathBuf::from("/x/new.wav"))
        );
    }

    #[test]
    fn memory_store_failure_and_counter() {
        let store = mock::MemoryStore::new();
        store.assign(1, 3, "/a.wav");
        assert_eq!(store.resolve_assignment(1, 3).unwrap(), Some("/a.wav".into()));
        store.set_failing(true);
        assert!(store.resolve_assignment(1, 3).is_err());
        assert_eq!(store.queries(), 2);
    }
}
