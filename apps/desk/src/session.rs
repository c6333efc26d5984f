use std::{fs, path::PathBuf};

use client_core::{PersistedSession, SessionStore};
use tracing::warn;

/// Session persistence for the CLI: one JSON file, created on login and
/// removed on logout or session expiry.
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl SessionStore for FileSessionStore {
    fn load(&self) -> Option<PersistedSession> {
        let raw = fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str(&raw) {
            Ok(session) => Some(session),
            Err(err) => {
                warn!("ignoring unreadable session file {}: {err}", self.path.display());
                None
            }
        }
    }

    fn save(&self, session: &PersistedSession) {
        match serde_json::to_string_pretty(session) {
            Ok(raw) => {
                if let Err(err) = fs::write(&self.path, raw) {
                    warn!("failed to persist session to {}: {err}", self.path.display());
                }
            }
            Err(err) => warn!("failed to serialize session: {err}"),
        }
    }

    fn clear(&self) {
        if self.path.exists() {
            if let Err(err) = fs::remove_file(&self.path) {
                warn!("failed to remove session file {}: {err}", self.path.display());
            }
        }
    }
}
