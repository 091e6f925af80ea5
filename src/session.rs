// session.rs - Persisted "is authenticated" flag
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::warn;

const SESSION_FILE: &str = "session_authenticated";

/// One persisted boolean: whether the user authenticated in some session.
/// Read once at open, written through synchronously on every change. No
/// expiry and no cross-process synchronization.
pub struct SessionStore {
    path: PathBuf,
    value: AtomicBool,
}

impl SessionStore {
    /// Open the store rooted at the given state directory. Missing or
    /// unreadable state means logged out.
    pub fn open(state_dir: impl AsRef<Path>) -> Self {
        let path = state_dir.as_ref().join(SESSION_FILE);
        let value = match fs::read_to_string(&path) {
            Ok(contents) => contents.trim() == "1",
            Err(_) => false,
        };
        Self {
            path,
            value: AtomicBool::new(value),
        }
    }

    pub fn get(&self) -> bool {
        self.value.load(Ordering::SeqCst)
    }

    /// Update the flag and persist it immediately. Persistence failures are
    /// logged but do not fail the caller; the in-memory value still changes.
    pub fn set(&self, authenticated: bool) {
        self.value.store(authenticated, Ordering::SeqCst);
        if let Some(parent) = self.path.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                warn!("Failed to create state directory {}: {}", parent.display(), e);
                return;
            }
        }
        if let Err(e) = fs::write(&self.path, if authenticated { "1" } else { "0" }) {
            warn!("Failed to persist session flag to {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("guide-ai-session-{}", Uuid::new_v4()))
    }

    #[test]
    fn test_defaults_to_logged_out() {
        let store = SessionStore::open(scratch_dir());
        assert!(!store.get());
    }

    #[test]
    fn test_set_persists_across_opens() {
        let dir = scratch_dir();
        let store = SessionStore::open(&dir);
        store.set(true);
        assert!(store.get());

        let reopened = SessionStore::open(&dir);
        assert!(reopened.get());

        reopened.set(false);
        let reopened_again = SessionStore::open(&dir);
        assert!(!reopened_again.get());

        let _ = fs::remove_dir_all(&dir);
    }
}
