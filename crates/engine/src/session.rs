//! Anonymous session identity and its durable client-side store.
//!
//! A [`SessionToken`] identifies the owner of an anonymous cart. It is
//! created lazily on the first cart interaction without an authenticated
//! identity, persisted in a [`SessionStore`], and never mutated. The server
//! may rotate it, in which case the rotated value replaces the stored one.
//!
//! Storage failures never propagate: the provider drops into an in-memory
//! mode for the rest of the process lifetime and logs a warning.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use cartsync_core::define_id;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

define_id!(SessionToken);

impl SessionToken {
    /// Generate a fresh random token.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(format!("sess_{}", Uuid::new_v4().simple()))
    }

    /// Whether the token carries no usable value.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.as_str().trim().is_empty()
    }
}

/// Keys used in the session store.
pub mod keys {
    /// Key for the anonymous session token.
    pub const SESSION_ID: &str = "sessionId";

    /// Key for the locally persisted user record (JSON object).
    pub const USER: &str = "user";
}

/// Errors raised by a [`SessionStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reading or writing the backing file failed.
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The backing file is not a valid JSON object.
    #[error("Storage parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Durable key-value storage for client-side identity data.
pub trait SessionStore: Send + Sync {
    /// Read a value.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write a value.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Delete a value. Deleting a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// MemoryStore
// =============================================================================

/// Process-local store. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(lock(&self.entries).get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        lock(&self.entries).insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        lock(&self.entries).remove(key);
        Ok(())
    }
}

// =============================================================================
// FileStore
// =============================================================================

/// Store backed by a single JSON object on disk.
///
/// Writes go to a sibling temporary file that is renamed over the original,
/// so a crash mid-write leaves the previous contents intact.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Create a store at `path`. The file is created on first write.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<HashMap<String, String>, StoreError> {
        match fs::read_to_string(&self.path) {
            Ok(contents) if contents.trim().is_empty() => Ok(HashMap::new()),
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_all(&self, entries: &HashMap<String, String>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(entries)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl SessionStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let _guard = lock(&self.write_lock);
        let mut entries = self.read_all()?;
        entries.insert(key.to_owned(), value.to_owned());
        self.write_all(&entries)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let _guard = lock(&self.write_lock);
        let mut entries = self.read_all()?;
        if entries.remove(key).is_some() {
            self.write_all(&entries)?;
        }
        Ok(())
    }
}

// =============================================================================
// SessionIdentityProvider
// =============================================================================

#[derive(Debug, Default)]
struct ProviderState {
    /// Mirror of the persisted token; the only copy once degraded.
    token: Option<SessionToken>,
    degraded: bool,
}

/// Issues and persists the anonymous session token.
///
/// Cheap to share behind an `Arc`; all methods take `&self`.
pub struct SessionIdentityProvider {
    store: Arc<dyn SessionStore>,
    state: Mutex<ProviderState>,
}

impl std::fmt::Debug for SessionIdentityProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionIdentityProvider")
            .field("degraded", &lock(&self.state).degraded)
            .finish_non_exhaustive()
    }
}

impl SessionIdentityProvider {
    /// Create a provider on top of a durable store.
    #[must_use]
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self {
            store,
            state: Mutex::new(ProviderState::default()),
        }
    }

    /// Create a provider that never persists beyond the process.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Whether storage has failed and the provider is memory-only.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        lock(&self.state).degraded
    }

    /// Read the current token without creating one.
    #[must_use]
    pub fn get_session_token(&self) -> Option<SessionToken> {
        let mut state = lock(&self.state);
        self.read_token(&mut state)
    }

    /// Return the existing token, or generate and persist a new one.
    ///
    /// Idempotent: every call after the first returns the same token until
    /// the server rotates it or it is cleared.
    #[must_use]
    pub fn get_or_create_session_token(&self) -> SessionToken {
        let mut state = lock(&self.state);
        if let Some(token) = self.read_token(&mut state) {
            return token;
        }

        let token = SessionToken::generate();
        debug!("Created anonymous session token");
        self.write_token(&mut state, &token);
        token
    }

    /// Adopt a token handed back by the server.
    ///
    /// Returns `true` if the stored token changed.
    pub fn persist_session_token(&self, token: &SessionToken) -> bool {
        if token.is_blank() {
            return false;
        }
        let mut state = lock(&self.state);
        if self.read_token(&mut state).as_ref() == Some(token) {
            return false;
        }
        debug!("Adopting rotated session token");
        self.write_token(&mut state, token);
        true
    }

    /// Forget the anonymous session token.
    pub fn clear_session_token(&self) {
        let mut state = lock(&self.state);
        state.token = None;
        if !state.degraded
            && let Err(e) = self.store.remove(keys::SESSION_ID)
        {
            Self::degrade(&mut state, &e);
        }
    }

    /// The locally persisted user record, if one exists and is valid JSON.
    #[must_use]
    pub fn stored_user_record(&self) -> Option<serde_json::Value> {
        let mut state = lock(&self.state);
        if state.degraded {
            return None;
        }
        match self.store.get(keys::USER) {
            Ok(Some(raw)) => serde_json::from_str(&raw)
                .inspect_err(|e| debug!(error = %e, "Ignoring malformed stored user record"))
                .ok(),
            Ok(None) => None,
            Err(e) => {
                Self::degrade(&mut state, &e);
                None
            }
        }
    }

    /// Persist the user record locally. Failures only degrade the provider.
    pub fn store_user_record(&self, record: &serde_json::Value) {
        let mut state = lock(&self.state);
        if state.degraded {
            return;
        }
        if let Err(e) = self.store.set(keys::USER, &record.to_string()) {
            Self::degrade(&mut state, &e);
        }
    }

    /// Forget the locally persisted user record.
    pub fn clear_user_record(&self) {
        let mut state = lock(&self.state);
        if !state.degraded
            && let Err(e) = self.store.remove(keys::USER)
        {
            Self::degrade(&mut state, &e);
        }
    }

    fn read_token(&self, state: &mut ProviderState) -> Option<SessionToken> {
        if state.degraded {
            return state.token.clone();
        }
        match self.store.get(keys::SESSION_ID) {
            Ok(Some(raw)) => {
                let token = SessionToken::new(raw);
                if token.is_blank() {
                    return state.token.clone();
                }
                state.token = Some(token.clone());
                Some(token)
            }
            Ok(None) => state.token.clone(),
            Err(e) => {
                Self::degrade(state, &e);
                state.token.clone()
            }
        }
    }

    fn write_token(&self, state: &mut ProviderState, token: &SessionToken) {
        state.token = Some(token.clone());
        if !state.degraded
            && let Err(e) = self.store.set(keys::SESSION_ID, token.as_str())
        {
            Self::degrade(state, &e);
        }
    }

    fn degrade(state: &mut ProviderState, error: &StoreError) {
        if !state.degraded {
            warn!(error = %error, "Session storage unavailable, continuing in memory only");
        }
        state.degraded = true;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    /// Store whose every operation fails.
    struct BrokenStore;

    impl SessionStore for BrokenStore {
        fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
            Err(std::io::Error::other("disk gone").into())
        }

        fn set(&self, _key: &str, _value: &str) -> Result<(), StoreError> {
            Err(std::io::Error::other("disk gone").into())
        }

        fn remove(&self, _key: &str) -> Result<(), StoreError> {
            Err(std::io::Error::other("disk gone").into())
        }
    }

    #[test]
    fn test_get_session_token_does_not_create() {
        let provider = SessionIdentityProvider::in_memory();
        assert!(provider.get_session_token().is_none());
    }

    #[test]
    fn test_get_or_create_is_idempotent() {
        let provider = SessionIdentityProvider::in_memory();
        let first = provider.get_or_create_session_token();
        let second = provider.get_or_create_session_token();
        assert_eq!(first, second);
        assert_eq!(provider.get_session_token(), Some(first));
    }

    #[test]
    fn test_generated_tokens_are_distinct() {
        let a = SessionIdentityProvider::in_memory().get_or_create_session_token();
        let b = SessionIdentityProvider::in_memory().get_or_create_session_token();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("sess_"));
    }

    #[test]
    fn test_token_survives_provider_restart_with_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("session.json");

        let first = SessionIdentityProvider::new(Arc::new(FileStore::new(&path)))
            .get_or_create_session_token();
        let reloaded = SessionIdentityProvider::new(Arc::new(FileStore::new(&path)));

        assert_eq!(reloaded.get_session_token(), Some(first));
    }

    #[test]
    fn test_broken_store_degrades_to_memory() {
        let provider = SessionIdentityProvider::new(Arc::new(BrokenStore));
        let first = provider.get_or_create_session_token();
        let second = provider.get_or_create_session_token();

        assert!(provider.is_degraded());
        assert_eq!(first, second);
    }

    #[test]
    fn test_persist_rotated_token() {
        let provider = SessionIdentityProvider::in_memory();
        let original = provider.get_or_create_session_token();
        let rotated = SessionToken::new("sess_rotated");

        assert!(provider.persist_session_token(&rotated));
        assert!(!provider.persist_session_token(&rotated));
        assert_ne!(provider.get_or_create_session_token(), original);
        assert_eq!(provider.get_session_token(), Some(rotated));
    }

    #[test]
    fn test_blank_rotation_is_ignored() {
        let provider = SessionIdentityProvider::in_memory();
        assert!(!provider.persist_session_token(&SessionToken::new("  ")));
        assert!(provider.get_session_token().is_none());
    }

    #[test]
    fn test_clear_session_token() {
        let provider = SessionIdentityProvider::in_memory();
        let first = provider.get_or_create_session_token();
        provider.clear_session_token();
        assert!(provider.get_session_token().is_none());
        assert_ne!(provider.get_or_create_session_token(), first);
    }

    #[test]
    fn test_user_record_roundtrip() {
        let provider = SessionIdentityProvider::in_memory();
        assert!(provider.stored_user_record().is_none());

        provider.store_user_record(&serde_json::json!({"_id": "u-7", "name": "Sam"}));
        let record = provider.stored_user_record().unwrap();
        assert_eq!(record["_id"], "u-7");

        provider.clear_user_record();
        assert!(provider.stored_user_record().is_none());
    }

    #[test]
    fn test_corrupt_file_store_degrades() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        fs::write(&path, "not json").unwrap();

        let provider = SessionIdentityProvider::new(Arc::new(FileStore::new(&path)));
        let token = provider.get_or_create_session_token();

        assert!(provider.is_degraded());
        assert_eq!(provider.get_session_token(), Some(token));
    }
}
