//! Credential Store
//!
//! All authentication state lives behind two key-value stores: a durable one
//! that survives restarts (tokens, PKCE verifier) and a session-scoped one
//! that dies with the tab or process (the callback-processing flag). Every
//! key is named once in [`StorageKey`]; callers go through the typed
//! operations of [`CredentialStore`] rather than touching keys directly.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use std::sync::{Arc, Mutex};

use crate::auth::{PkceSession, TokenRecord, UserInfo};
use crate::error::StorageError;

/// Backend for one storage scope
pub trait KeyValueStore: Send + Sync + std::fmt::Debug {
    /// Read a value
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Write a value, overwriting any previous one
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be written.
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Remove a value; removing a missing key is not an error
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be written.
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Lifetime of a stored value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageScope {
    /// Survives restarts
    Durable,
    /// Cleared when the tab or process ends
    Session,
}

/// Every key owned by this crate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKey {
    /// Bearer access token
    AccessToken,
    /// Refresh token
    RefreshToken,
    /// Access token expiry, epoch milliseconds
    TokenExpiration,
    /// Cached user profile JSON
    UserInfo,
    /// PKCE code verifier of the pending login attempt
    PkceVerifier,
    /// Start time of the pending login attempt, epoch milliseconds
    AuthStartedAt,
    /// Set while a callback is being processed
    CallbackProcessing,
}

impl StorageKey {
    /// All keys
    pub const ALL: [StorageKey; 7] = [
        StorageKey::AccessToken,
        StorageKey::RefreshToken,
        StorageKey::TokenExpiration,
        StorageKey::UserInfo,
        StorageKey::PkceVerifier,
        StorageKey::AuthStartedAt,
        StorageKey::CallbackProcessing,
    ];

    /// Key name in the backing store
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AccessToken => "access_token",
            Self::RefreshToken => "refresh_token",
            Self::TokenExpiration => "token_expiration",
            Self::UserInfo => "user_info",
            Self::PkceVerifier => "pkce_code_verifier",
            Self::AuthStartedAt => "oauth_start_time",
            Self::CallbackProcessing => "oauth_callback_processing",
        }
    }

    /// Which store holds the key
    #[must_use]
    pub fn scope(self) -> StorageScope {
        match self {
            Self::CallbackProcessing => StorageScope::Session,
            _ => StorageScope::Durable,
        }
    }
}

const TOKEN_KEYS: [StorageKey; 4] = [
    StorageKey::AccessToken,
    StorageKey::RefreshToken,
    StorageKey::TokenExpiration,
    StorageKey::UserInfo,
];

/// Typed access to the authentication state
#[derive(Debug, Clone)]
pub struct CredentialStore {
    durable: Arc<dyn KeyValueStore>,
    session: Arc<dyn KeyValueStore>,
    // Serializes the check-then-set on the processing flag across clones
    processing_lock: Arc<Mutex<()>>,
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl CredentialStore {
    /// Combine a durable and a session-scoped backend
    #[must_use]
    pub fn new(durable: Arc<dyn KeyValueStore>, session: Arc<dyn KeyValueStore>) -> Self {
        Self {
            durable,
            session,
            processing_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Both scopes held in memory
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()), Arc::new(MemoryStore::new()))
    }

    fn backend(&self, key: StorageKey) -> &dyn KeyValueStore {
        match key.scope() {
            StorageScope::Durable => &*self.durable,
            StorageScope::Session => &*self.session,
        }
    }

    /// Read a raw value
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub fn get(&self, key: StorageKey) -> Result<Option<String>, StorageError> {
        self.backend(key).get(key.as_str())
    }

    /// Write a raw value
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub fn set(&self, key: StorageKey, value: &str) -> Result<(), StorageError> {
        self.backend(key).set(key.as_str(), value)
    }

    /// Remove a raw value
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub fn remove(&self, key: StorageKey) -> Result<(), StorageError> {
        self.backend(key).remove(key.as_str())
    }

    fn set_or_remove(&self, key: StorageKey, value: Option<&str>) -> Result<(), StorageError> {
        match value {
            Some(value) => self.set(key, value),
            None => self.remove(key),
        }
    }

    fn get_millis(&self, key: StorageKey) -> Result<Option<u64>, StorageError> {
        self.get(key)?
            .map(|raw| {
                raw.trim().parse::<u64>().map_err(|e| StorageError::Corrupted {
                    key: key.as_str(),
                    reason: e.to_string(),
                })
            })
            .transpose()
    }

    /// Load the Token Record, `None` when no access token is stored
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Corrupted` if the expiry or user info cannot be
    /// decoded.
    pub fn token_record(&self) -> Result<Option<TokenRecord>, StorageError> {
        let Some(access_token) = self.get(StorageKey::AccessToken)? else {
            return Ok(None);
        };

        let user_info = self
            .get(StorageKey::UserInfo)?
            .map(|raw| {
                serde_json::from_str::<UserInfo>(&raw).map_err(|e| StorageError::Corrupted {
                    key: StorageKey::UserInfo.as_str(),
                    reason: e.to_string(),
                })
            })
            .transpose()?;

        Ok(Some(TokenRecord {
            access_token,
            refresh_token: self.get(StorageKey::RefreshToken)?,
            expires_at: self.get_millis(StorageKey::TokenExpiration)?,
            user_info,
        }))
    }

    /// Replace the Token Record
    ///
    /// Fields absent from `record` are removed so that nothing from an older
    /// session is mixed in.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub fn save_token_record(&self, record: &TokenRecord) -> Result<(), StorageError> {
        let user_info = record
            .user_info
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        self.set(StorageKey::AccessToken, &record.access_token)?;
        self.set_or_remove(StorageKey::RefreshToken, record.refresh_token.as_deref())?;
        self.set_or_remove(
            StorageKey::TokenExpiration,
            record.expires_at.map(|at| at.to_string()).as_deref(),
        )?;
        self.set_or_remove(StorageKey::UserInfo, user_info.as_deref())
    }

    /// Overwrite the tokens after a refresh, keeping the cached user info
    ///
    /// The refresh token and expiry are only replaced when a new value is given.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub fn update_tokens(
        &self,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_at: Option<u64>,
    ) -> Result<(), StorageError> {
        self.set(StorageKey::AccessToken, access_token)?;
        if let Some(refresh_token) = refresh_token {
            self.set(StorageKey::RefreshToken, refresh_token)?;
        }
        if let Some(expires_at) = expires_at {
            self.set(StorageKey::TokenExpiration, &expires_at.to_string())?;
        }
        Ok(())
    }

    /// Remove the Token Record
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub fn clear_token_record(&self) -> Result<(), StorageError> {
        TOKEN_KEYS.iter().try_for_each(|key| self.remove(*key))
    }

    /// Purge token fields left behind without an access token
    ///
    /// [`token_record`](Self::token_record) reads such residue as no session.
    /// Returns `true` if anything was removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub fn purge_partial_token_record(&self) -> Result<bool, StorageError> {
        if self.get(StorageKey::AccessToken)?.is_some() {
            return Ok(false);
        }
        let mut partial = false;
        for key in TOKEN_KEYS {
            if self.get(key)?.is_some() {
                partial = true;
                break;
            }
        }
        if partial {
            self.clear_token_record()?;
        }
        Ok(partial)
    }

    /// Load the pending PKCE Session, `None` when no verifier is stored
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Corrupted` if the start time cannot be decoded.
    pub fn pkce_session(&self) -> Result<Option<PkceSession>, StorageError> {
        let Some(verifier) = self.get(StorageKey::PkceVerifier)? else {
            return Ok(None);
        };
        Ok(Some(PkceSession {
            verifier,
            started_at: self.get_millis(StorageKey::AuthStartedAt)?,
        }))
    }

    /// Persist the PKCE Session of a new login attempt
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub fn save_pkce_session(&self, session: &PkceSession) -> Result<(), StorageError> {
        self.set(StorageKey::PkceVerifier, &session.verifier)?;
        self.set_or_remove(
            StorageKey::AuthStartedAt,
            session.started_at.map(|at| at.to_string()).as_deref(),
        )
    }

    /// Remove the PKCE verifier and start time
    ///
    /// The processing flag is owned by [`ProcessingGuard`] and released when
    /// the guard drops.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub fn clear_pkce_session(&self) -> Result<(), StorageError> {
        self.remove(StorageKey::PkceVerifier)?;
        self.remove(StorageKey::AuthStartedAt)
    }

    /// Remove every key in both scopes
    ///
    /// Keeps going after a failing key so that as much as possible is purged;
    /// the first error is returned.
    ///
    /// # Errors
    ///
    /// Returns the first backend error encountered.
    pub fn clear_all(&self) -> Result<(), StorageError> {
        let mut first_error = None;
        for key in StorageKey::ALL {
            if let Err(e) = self.remove(key) {
                tracing::error!(key = key.as_str(), "Failed to purge credential: {e}");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Whether a callback is currently being processed in this session
    ///
    /// # Errors
    ///
    /// Returns an error if the session backend fails.
    pub fn is_processing(&self) -> Result<bool, StorageError> {
        Ok(self
            .get(StorageKey::CallbackProcessing)?
            .is_some_and(|flag| flag == "true"))
    }

    /// Take the callback-processing flag
    ///
    /// Returns `None` if the flag is already held. The flag is released when
    /// the returned guard is dropped.
    ///
    /// The check and the write are atomic among this store and its clones.
    /// Separate `CredentialStore`s over the same session backend are not
    /// coordinated; a session backend is expected to have a single owning
    /// store per process.
    ///
    /// # Errors
    ///
    /// Returns an error if the session backend fails or the lock is poisoned.
    pub fn try_acquire_processing(&self) -> Result<Option<ProcessingGuard>, StorageError> {
        let _lock = self
            .processing_lock
            .lock()
            .map_err(|_| StorageError::Poisoned)?;
        if self.is_processing()? {
            return Ok(None);
        }
        self.set(StorageKey::CallbackProcessing, "true")?;
        Ok(Some(ProcessingGuard {
            store: self.clone(),
        }))
    }
}

/// Holds the callback-processing flag; clears it on drop
#[derive(Debug)]
#[must_use = "the processing flag is released as soon as the guard is dropped"]
pub struct ProcessingGuard {
    store: CredentialStore,
}

impl Drop for ProcessingGuard {
    fn drop(&mut self) {
        if let Err(e) = self.store.remove(StorageKey::CallbackProcessing) {
            tracing::error!("Failed to release callback processing flag: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_record() -> TokenRecord {
        TokenRecord {
            access_token: "access".into(),
            refresh_token: Some("refresh".into()),
            expires_at: Some(10_000),
            user_info: Some(serde_json::from_value(json!({"id": 1, "branch_id": 4})).unwrap()),
        }
    }

    #[test]
    fn test_key_scopes() {
        assert_eq!(StorageKey::CallbackProcessing.scope(), StorageScope::Session);
        assert!(
            StorageKey::ALL
                .iter()
                .filter(|key| **key != StorageKey::CallbackProcessing)
                .all(|key| key.scope() == StorageScope::Durable)
        );
    }

    #[test]
    fn test_token_record_round_trip() {
        let store = CredentialStore::in_memory();
        assert!(store.token_record().unwrap().is_none());

        store.save_token_record(&sample_record()).unwrap();
        assert_eq!(store.token_record().unwrap(), Some(sample_record()));
    }

    #[test]
    fn test_save_token_record_drops_stale_fields() {
        let store = CredentialStore::in_memory();
        store.save_token_record(&sample_record()).unwrap();

        let bare = TokenRecord {
            access_token: "new".into(),
            refresh_token: None,
            expires_at: None,
            user_info: None,
        };
        store.save_token_record(&bare).unwrap();
        assert_eq!(store.token_record().unwrap(), Some(bare));
    }

    #[test]
    fn test_update_tokens_keeps_user_info() {
        let store = CredentialStore::in_memory();
        store.save_token_record(&sample_record()).unwrap();
        store.update_tokens("fresh", None, Some(20_000)).unwrap();

        let record = store.token_record().unwrap().unwrap();
        assert_eq!(record.access_token, "fresh");
        assert_eq!(record.refresh_token.as_deref(), Some("refresh"));
        assert_eq!(record.expires_at, Some(20_000));
        assert!(record.user_info.is_some());
    }

    #[test]
    fn test_corrupted_expiry() {
        let store = CredentialStore::in_memory();
        store.set(StorageKey::AccessToken, "a").unwrap();
        store.set(StorageKey::TokenExpiration, "soon").unwrap();
        assert!(matches!(
            store.token_record(),
            Err(StorageError::Corrupted {
                key: "token_expiration",
                ..
            })
        ));
    }

    #[test]
    fn test_pkce_session() {
        let store = CredentialStore::in_memory();
        assert!(store.pkce_session().unwrap().is_none());

        let session = PkceSession {
            verifier: "v".repeat(64),
            started_at: Some(123),
        };
        store.save_pkce_session(&session).unwrap();
        assert_eq!(store.pkce_session().unwrap(), Some(session));

        store.clear_pkce_session().unwrap();
        assert!(store.pkce_session().unwrap().is_none());
        assert!(store.get(StorageKey::AuthStartedAt).unwrap().is_none());
    }

    #[test]
    fn test_processing_guard_released_on_drop() {
        let store = CredentialStore::in_memory();
        {
            let guard = store.try_acquire_processing().unwrap();
            assert!(guard.is_some());
            assert!(store.is_processing().unwrap());
            assert!(store.try_acquire_processing().unwrap().is_none());
        }
        assert!(!store.is_processing().unwrap());
        assert!(store.try_acquire_processing().unwrap().is_some());
    }

    #[test]
    fn test_processing_guard_released_on_panic() {
        let store = CredentialStore::in_memory();
        let inner = store.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _guard = inner.try_acquire_processing().unwrap();
            panic!("handler blew up");
        }));
        assert!(result.is_err());
        assert!(!store.is_processing().unwrap());
    }

    #[test]
    fn test_processing_flag_taken_once_under_contention() {
        use std::sync::Barrier;
        use std::sync::atomic::{AtomicUsize, Ordering};

        const THREADS: usize = 16;
        let store = CredentialStore::in_memory();
        let barrier = Arc::new(Barrier::new(THREADS));
        let acquired = Arc::new(AtomicUsize::new(0));
        let release = Arc::new(Barrier::new(THREADS));

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let store = store.clone();
                let barrier = barrier.clone();
                let acquired = acquired.clone();
                let release = release.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    let guard = store.try_acquire_processing().unwrap();
                    if guard.is_some() {
                        acquired.fetch_add(1, Ordering::SeqCst);
                    }
                    // Hold every guard until all threads have tried
                    release.wait();
                    drop(guard);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(acquired.load(Ordering::SeqCst), 1);
        assert!(!store.is_processing().unwrap());
    }

    #[test]
    fn test_purge_partial_token_record() {
        let store = CredentialStore::in_memory();
        assert!(!store.purge_partial_token_record().unwrap());

        store.save_token_record(&sample_record()).unwrap();
        assert!(!store.purge_partial_token_record().unwrap());
        assert!(store.token_record().unwrap().is_some());

        store.remove(StorageKey::AccessToken).unwrap();
        assert!(store.token_record().unwrap().is_none());
        assert!(store.purge_partial_token_record().unwrap());
        for key in TOKEN_KEYS {
            assert!(store.get(key).unwrap().is_none(), "{key:?} survived");
        }

        // Residue that would not even decode is purged too
        store.set(StorageKey::TokenExpiration, "soon").unwrap();
        assert!(store.purge_partial_token_record().unwrap());
        assert!(store.get(StorageKey::TokenExpiration).unwrap().is_none());
    }

    #[test]
    fn test_clear_all() {
        let store = CredentialStore::in_memory();
        store.save_token_record(&sample_record()).unwrap();
        store
            .save_pkce_session(&PkceSession {
                verifier: "v".into(),
                started_at: Some(1),
            })
            .unwrap();
        store.set(StorageKey::CallbackProcessing, "true").unwrap();

        store.clear_all().unwrap();
        for key in StorageKey::ALL {
            assert!(store.get(key).unwrap().is_none(), "{key:?} survived");
        }
        // Idempotent on an empty store
        store.clear_all().unwrap();
    }
}
