//! Client-side session value, lifecycle states, and persistence.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::error::ClientError;
use crate::db::UserProfile;

/// The token pair and identity snapshot held by a signed-in client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub user: Option<UserProfile>,
    pub authenticated: bool,
}

/// Lifecycle of the client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No tokens held
    Anonymous,
    /// Login, registration, OAuth completion, or restore in progress
    Authenticating,
    /// Holding a token pair
    Authenticated,
    /// A refresh is in flight; other requests wait for it
    Refreshing,
}

impl SessionState {
    /// Whether the session manager may move from `self` to `next`.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Anonymous, Authenticating)
                | (Authenticating, Authenticated)
                | (Authenticating, Anonymous)
                | (Authenticated, Refreshing)
                | (Authenticated, Anonymous)
                | (Refreshing, Authenticated)
                | (Refreshing, Anonymous)
        )
    }
}

/// Notifications broadcast by the session manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    SignedIn,
    Refreshed,
    SignedOut,
    /// Refresh failed; the user has to sign in again
    Expired,
}

/// Persistence for the client session across restarts.
pub trait SessionStore: Send + Sync {
    fn load(&self) -> Result<Option<Session>, ClientError>;
    fn save(&self, session: &Session) -> Result<(), ClientError>;
    fn clear(&self) -> Result<(), ClientError>;
}

/// Keeps the session in memory only.
#[derive(Default)]
pub struct MemorySessionStore {
    session: Mutex<Option<Session>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with a session already stored.
    pub fn with_session(session: Session) -> Self {
        Self {
            session: Mutex::new(Some(session)),
        }
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> Result<Option<Session>, ClientError> {
        Ok(self
            .session
            .lock()
            .map(|s| s.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone()))
    }

    fn save(&self, session: &Session) -> Result<(), ClientError> {
        let mut guard = self
            .session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Some(session.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), ClientError> {
        let mut guard = self
            .session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = None;
        Ok(())
    }
}

/// Stores the session as a JSON file.
///
/// Writes go to a sibling temporary file first and are renamed into place.
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl SessionStore for FileSessionStore {
    fn load(&self) -> Result<Option<Session>, ClientError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_slice(&bytes) {
            Ok(session) => Ok(Some(session)),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Ignoring unreadable session file");
                Ok(None)
            }
        }
    }

    fn save(&self, session: &Session) -> Result<(), ClientError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.tmp_path();
        std::fs::write(&tmp, serde_json::to_vec(session)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn clear(&self) -> Result<(), ClientError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session {
            access_token: "access".into(),
            refresh_token: "refresh".into(),
            user: None,
            authenticated: true,
        }
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("tokengate-{}-{}.json", name, std::process::id()))
    }

    #[test]
    fn test_state_transitions() {
        use SessionState::*;
        assert!(Anonymous.can_transition_to(Authenticating));
        assert!(Authenticating.can_transition_to(Authenticated));
        assert!(Authenticating.can_transition_to(Anonymous));
        assert!(Authenticated.can_transition_to(Refreshing));
        assert!(Refreshing.can_transition_to(Authenticated));
        assert!(Refreshing.can_transition_to(Anonymous));

        assert!(!Anonymous.can_transition_to(Authenticated));
        assert!(!Anonymous.can_transition_to(Refreshing));
        assert!(!Refreshing.can_transition_to(Refreshing));
        assert!(!Authenticating.can_transition_to(Refreshing));
    }

    #[test]
    fn test_session_json_is_camel_case() {
        let json = serde_json::to_value(session()).unwrap();
        assert_eq!(json["accessToken"], "access");
        assert_eq!(json["refreshToken"], "refresh");
        assert_eq!(json["authenticated"], true);
    }

    #[test]
    fn test_memory_store() {
        let store = MemorySessionStore::new();
        assert!(store.load().unwrap().is_none());
        store.save(&session()).unwrap();
        assert_eq!(store.load().unwrap(), Some(session()));
        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_file_store_round_trip() {
        let path = temp_path("round-trip");
        let store = FileSessionStore::new(&path);

        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());

        store.save(&session()).unwrap();
        let reopened = FileSessionStore::new(&path);
        assert_eq!(reopened.load().unwrap(), Some(session()));

        reopened.clear().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_file_store_ignores_corrupt_file() {
        let path = temp_path("corrupt");
        std::fs::write(&path, b"{not json").unwrap();

        let store = FileSessionStore::new(&path);
        assert!(store.load().unwrap().is_none());
        store.clear().unwrap();
    }
}
