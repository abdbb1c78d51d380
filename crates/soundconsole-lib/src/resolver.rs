//! Press → audio file resolution.
//!
//! Every press must produce audible feedback, so the resolver never fails:
//! when there is no active channel, no assignment, a dangling file, or the
//! store is down, it answers with the configured fallback clip and says why.

use std::fmt;
use std::path::PathBuf;

use crate::channel::ChannelState;
use crate::store::AssignmentStore;

/// Why the fallback clip was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    NoChannel,
    Unassigned,
    MissingFile,
    StoreError,
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FallbackReason::NoChannel => "no active channel",
            FallbackReason::Unassigned => "not assigned",
            FallbackReason::MissingFile => "file missing",
            FallbackReason::StoreError => "store unavailable",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionSource {
    Assigned,
    Fallback(FallbackReason),
}

/// Outcome of resolving one press.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub path: PathBuf,
    pub source: ResolutionSource,
    /// Channel the lookup was made against.
    pub channel: Option<u8>,
}

impl Resolution {
    pub fn is_fallback(&self) -> bool {
        matches!(self.source, ResolutionSource::Fallback(_))
    }
}

/// Resolves presses against the live channel and the assignment store.
pub struct ProfileResolver<S: AssignmentStore> {
    store: S,
    channel: ChannelState,
    fallback: PathBuf,
}

impl<S: AssignmentStore> ProfileResolver<S> {
    pub fn new(store: S, channel: ChannelState, fallback: impl Into<PathBuf>) -> Self {
        Self {
            store,
            channel,
            fallback: fallback.into(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Resolve with the channel currently published by the channel monitor.
    pub fn resolve(&self, button_id: u8) -> Resolution {
        self.resolve_on(self.channel.get(), button_id)
    }

    /// Resolve against an explicit channel (diagnostics, tests).
    pub fn resolve_on(&self, channel: Option<u8>, button_id: u8) -> Resolution {
        let Some(ch) = channel else {
            return self.fall_back(None, button_id, FallbackReason::NoChannel);
        };
        match self.store.resolve_assignment(ch, button_id) {
            Ok(Some(path)) if path.is_file() => Resolution {
                path,
                source: ResolutionSource::Assigned,
                channel,
            },
            Ok(Some(path)) => {
                log::warn!(
                    "[playback] channel {ch} button {button_id}: {} does not exist",
                    path.display()
                );
                self.fall_back(channel, button_id, FallbackReason::MissingFile)
            }
            Ok(None) => self.fall_back(channel, button_id, FallbackReason::Unassigned),
            Err(e) => {
                log::warn!("[playback] lookup failed: {e}");
                self.fall_back(channel, button_id, FallbackReason::StoreError)
            }
        }
    }

    fn fall_back(&self, channel: Option<u8>, button_id: u8, reason: FallbackReason) -> Resolution {
        log::info!("[playback] button {button_id}: {reason}, using fallback");
        Resolution {
            path: self.fallback.clone(),
            source: ResolutionSource::Fallback(reason),
            channel,
        }
    }
}
