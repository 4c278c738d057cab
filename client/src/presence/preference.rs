//! Persisted status preference.
//!
//! The preference is what the user picked, independent of connectivity: it
//! survives restarts and is re-applied when the next session connects.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::model::PresenceState;

pub trait PreferenceStore: Send + Sync {
    fn load(&self) -> Option<PresenceState>;
    /// Persistence failures are logged, never fatal.
    fn save(&self, state: PresenceState);
}

impl<P: PreferenceStore> PreferenceStore for Arc<P> {
    fn load(&self) -> Option<PresenceState> {
        (**self).load()
    }

    fn save(&self, state: PresenceState) {
        (**self).save(state)
    }
}

/// In-memory preference, for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryPreferences {
    state: Mutex<Option<PresenceState>>,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for MemoryPreferences {
    fn load(&self) -> Option<PresenceState> {
        match self.state.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn save(&self, state: PresenceState) {
        match self.state.lock() {
            Ok(mut guard) => *guard = Some(state),
            Err(poisoned) => *poisoned.into_inner() = Some(state),
        }
    }
}

/// Preference stored as one line in a file.
pub struct FilePreferences {
    path: PathBuf,
}

impl FilePreferences {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl PreferenceStore for FilePreferences {
    fn load(&self) -> Option<PresenceState> {
        let raw = std::fs::read_to_string(&self.path).ok()?;
        let state = PresenceState::parse(raw.trim());
        if state.is_none() {
            warn!(path = %self.path.display(), "unreadable status preference file");
        }
        state
    }

    fn save(&self, state: PresenceState) {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
            && let Err(err) = std::fs::create_dir_all(parent)
        {
            warn!(error = %err, path = %self.path.display(), "failed to create preference dir");
            return;
        }
        if let Err(err) = std::fs::write(&self.path, state.as_str()) {
            warn!(error = %err, path = %self.path.display(), "failed to save status preference");
        }
    }
}
