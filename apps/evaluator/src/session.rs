//! Session persistence over an opaque key-value store.
//!
//! The session is the `(token, tenant_id)` pair issued by `/auth/token`.
//! Both entries must be present and non-empty; a half-written session is
//! treated as no session at all.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::{ClientError, ClientResult};

pub const AUTH_TOKEN_KEY: &str = "authToken";
pub const TENANT_ID_KEY: &str = "tenantId";

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub tenant_id: String,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("token", &"<redacted>")
            .field("tenant_id", &self.tenant_id)
            .finish()
    }
}

/// Minimal get/set/remove storage. Browser local storage in the web client,
/// a JSON file for the CLI, a map in tests.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> ClientResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> ClientResult<()>;
    fn remove(&self, key: &str) -> ClientResult<()>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> ClientResult<std::sync::MutexGuard<'_, BTreeMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| ClientError::Store("memory store lock poisoned".to_string()))
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> ClientResult<Option<String>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> ClientResult<()> {
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> ClientResult<()> {
        self.lock()?.remove(key);
        Ok(())
    }
}

/// Key-value entries persisted as a flat JSON object on disk.
/// A missing or unreadable file reads as empty.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    guard: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            guard: Mutex::new(()),
        }
    }

    fn load(&self) -> BTreeMap<String, String> {
        std::fs::read_to_string(&self.path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default()
    }

    fn save(&self, entries: &BTreeMap<String, String>) -> ClientResult<()> {
        if entries.is_empty() {
            return match std::fs::remove_file(&self.path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(ClientError::Store(format!(
                    "failed to remove {}: {e}",
                    self.path.display()
                ))),
            };
        }
        let raw = serde_json::to_string_pretty(entries)?;
        std::fs::write(&self.path, raw).map_err(|e| {
            ClientError::Store(format!("failed to write {}: {e}", self.path.display()))
        })
    }

    fn update(&self, f: impl FnOnce(&mut BTreeMap<String, String>)) -> ClientResult<()> {
        let _guard = self
            .guard
            .lock()
            .map_err(|_| ClientError::Store("file store lock poisoned".to_string()))?;
        let mut entries = self.load();
        f(&mut entries);
        self.save(&entries)
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> ClientResult<Option<String>> {
        Ok(self.load().remove(key))
    }

    fn set(&self, key: &str, value: &str) -> ClientResult<()> {
        self.update(|entries| {
            entries.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> ClientResult<()> {
        self.update(|entries| {
            entries.remove(key);
        })
    }
}

/// Reads and writes the session through a [`KeyValueStore`].
pub struct SessionStore<S: KeyValueStore> {
    store: S,
}

impl<S: KeyValueStore> SessionStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Returns the session only when both token and tenant are present.
    pub fn get(&self) -> ClientResult<Option<Session>> {
        let token = self.store.get(AUTH_TOKEN_KEY)?.filter(|v| !v.is_empty());
        let tenant_id = self.store.get(TENANT_ID_KEY)?.filter(|v| !v.is_empty());
        match (token, tenant_id) {
            (Some(token), Some(tenant_id)) => Ok(Some(Session { token, tenant_id })),
            (token, tenant) => {
                debug!(
                    has_token = token.is_some(),
                    has_tenant = tenant.is_some(),
                    "no complete session in store"
                );
                Ok(None)
            }
        }
    }

    /// Like [`get`](Self::get) but a missing session is an error, which callers
    /// answer by sending the user back to login.
    pub fn require(&self) -> ClientResult<Session> {
        self.get()?.ok_or(ClientError::SessionMissing)
    }

    pub fn set(&self, session: &Session) -> ClientResult<()> {
        self.store.set(AUTH_TOKEN_KEY, &session.token)?;
        self.store.set(TENANT_ID_KEY, &session.tenant_id)?;
        info!(tenant_id = %session.tenant_id, "session stored");
        Ok(())
    }

    pub fn clear(&self) -> ClientResult<()> {
        self.store.remove(AUTH_TOKEN_KEY)?;
        self.store.remove(TENANT_ID_KEY)?;
        info!("session cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session {
            token: "tok-123".to_string(),
            tenant_id: "acme".to_string(),
        }
    }

    #[test]
    fn test_round_trip_through_memory_store() {
        let sessions = SessionStore::new(MemoryStore::new());
        assert_eq!(sessions.get().unwrap(), None);

        sessions.set(&session()).unwrap();
        assert_eq!(sessions.get().unwrap(), Some(session()));

        sessions.clear().unwrap();
        assert_eq!(sessions.get().unwrap(), None);
    }

    #[test]
    fn test_token_without_tenant_is_absent() {
        let store = MemoryStore::new();
        store.set(AUTH_TOKEN_KEY, "tok-123").unwrap();
        let sessions = SessionStore::new(store);

        assert_eq!(sessions.get().unwrap(), None);
        assert!(matches!(sessions.require(), Err(ClientError::SessionMissing)));
    }

    #[test]
    fn test_empty_values_are_absent() {
        let store = MemoryStore::new();
        store.set(AUTH_TOKEN_KEY, "").unwrap();
        store.set(TENANT_ID_KEY, "acme").unwrap();
        assert_eq!(SessionStore::new(store).get().unwrap(), None);
    }

    #[test]
    fn test_file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");

        SessionStore::new(FileStore::new(&path))
            .set(&session())
            .unwrap();
        let reopened = SessionStore::new(FileStore::new(&path));
        assert_eq!(reopened.get().unwrap(), Some(session()));

        reopened.clear().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_file_store_treats_garbage_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "not json").unwrap();

        let store = FileStore::new(&path);
        assert_eq!(store.get(AUTH_TOKEN_KEY).unwrap(), None);
    }

    #[test]
    fn test_debug_redacts_token() {
        let rendered = format!("{:?}", session());
        assert!(!rendered.contains("tok-123"));
        assert!(rendered.contains("acme"));
    }
}
