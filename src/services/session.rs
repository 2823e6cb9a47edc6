//! Session store
//!
//! Encrypted, expiring sessions keyed by an opaque random token.
//!
//! - Tokens carry 256 bits of randomness, URL-safe base64 encoded
//! - Payloads are encrypted before they reach the backend
//! - Every read bumps `last_activity`, re-encrypts the payload and resets
//!   the time-to-live to the configured default (sliding expiration)
//!
//! # Concurrency
//!
//! `update` is read-merge-write and is not serialized against other
//! updates of the same token: the last writer wins. Callers that need more
//! use `update_if_unchanged`, which refuses the write if the record moved
//! on since the caller read it.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use std::sync::Arc;
use std::time::Duration;

use crate::config::SessionConfig;
use crate::models::{
    token_prefix, DeleteOutcome, SessionPayload, SessionRecord, StoredSession,
};
use crate::services::cipher::{Cipher, CipherError};
use crate::store::SessionBackend;

/// Random bytes per session token
const TOKEN_BYTES: usize = 32;

/// Default storage key prefix
pub const DEFAULT_KEY_PREFIX: &str = "session:";

/// Error types for session store operations
#[derive(Debug, thiserror::Error)]
pub enum SessionStoreError {
    /// No live session under the token
    #[error("Session not found")]
    SessionNotFound,

    /// The record changed since the caller observed it
    #[error("Session was modified concurrently")]
    Conflict,

    /// Payload could not be encrypted
    #[error("Session encryption failed: {0}")]
    Encryption(#[from] CipherError),

    /// Record could not be serialized
    #[error("Session serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backing store failure
    #[error("Session backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

/// Encrypted session store over a pluggable backend
pub struct SessionStore {
    backend: Arc<dyn SessionBackend>,
    cipher: Arc<Cipher>,
    default_ttl: Duration,
    key_prefix: String,
}

/// A stored record that decrypted cleanly, together with its raw form
struct Loaded {
    raw: String,
    stored: StoredSession,
    payload: SessionPayload,
}

impl SessionStore {
    /// Create a store with the default key prefix
    pub fn new(backend: Arc<dyn SessionBackend>, cipher: Arc<Cipher>, default_ttl: Duration) -> Self {
        Self {
            backend,
            cipher,
            default_ttl,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }

    /// Create a store from the session configuration section
    pub fn from_config(
        backend: Arc<dyn SessionBackend>,
        cipher: Arc<Cipher>,
        config: &SessionConfig,
    ) -> Self {
        Self::new(backend, cipher, config.ttl()).with_key_prefix(config.key_prefix.clone())
    }

    /// Use another storage key prefix
    pub fn with_key_prefix(mut self, key_prefix: impl Into<String>) -> Self {
        self.key_prefix = key_prefix.into();
        self
    }

    /// Time-to-live applied on create and refreshed on every read
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    fn key(&self, token: &str) -> String {
        format!("{}{}", self.key_prefix, token)
    }

    fn generate_token() -> String {
        let mut bytes = [0u8; TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }

    fn seal(
        &self,
        user_id: String,
        payload: &SessionPayload,
        created_at: DateTime<Utc>,
        last_activity: DateTime<Utc>,
    ) -> Result<String, SessionStoreError> {
        let stored = StoredSession {
            user_id,
            encrypted_payload: self.cipher.encrypt_json(payload)?,
            created_at,
            last_activity,
        };
        Ok(serde_json::to_string(&stored)?)
    }

    /// Fetch and decrypt the raw record.
    ///
    /// Unreadable records are logged and reported as absent; they are left
    /// in place to expire.
    async fn load(&self, token: &str) -> Result<Option<Loaded>, SessionStoreError> {
        let Some(raw) = self.backend.get(&self.key(token)).await? else {
            return Ok(None);
        };

        let stored: StoredSession = match serde_json::from_str(&raw) {
            Ok(stored) => stored,
            Err(e) => {
                tracing::error!(
                    token = %token_prefix(token),
                    error = %e,
                    "Stored session record is malformed"
                );
                return Ok(None);
            }
        };

        let payload: SessionPayload = match self.cipher.decrypt_json(&stored.encrypted_payload) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(
                    token = %token_prefix(token),
                    user_id = %stored.user_id,
                    error = %e,
                    "Session payload failed integrity check"
                );
                return Ok(None);
            }
        };

        Ok(Some(Loaded { raw, stored, payload }))
    }

    /// Create a session and return its token
    ///
    /// `ttl` overrides the configured default for the first expiry window;
    /// reads refresh to the default.
    pub async fn create(
        &self,
        user_id: &str,
        payload: &SessionPayload,
        ttl: Option<Duration>,
    ) -> Result<String, SessionStoreError> {
        let token = Self::generate_token();
        let now = Utc::now();
        let value = self.seal(user_id.to_string(), payload, now, now)?;

        self.backend
            .set(&self.key(&token), value, ttl.unwrap_or(self.default_ttl))
            .await?;

        tracing::info!(
            token = %token_prefix(&token),
            user_id = %user_id,
            "Session created"
        );
        Ok(token)
    }

    /// Look up a session, sliding its expiry
    ///
    /// Returns `Ok(None)` when the session is absent, expired, unreadable or
    /// deleted while this read was in flight.
    pub async fn get(&self, token: &str) -> Result<Option<SessionRecord>, SessionStoreError> {
        let Some(Loaded { stored, payload, .. }) = self.load(token).await? else {
            tracing::warn!(token = %token_prefix(token), "Session not found or expired");
            return Ok(None);
        };

        let last_activity = Utc::now();
        let value = self.seal(stored.user_id.clone(), &payload, stored.created_at, last_activity)?;

        // Only rewrite a record that still exists, so a concurrent delete wins
        if !self
            .backend
            .replace(&self.key(token), value, self.default_ttl)
            .await?
        {
            tracing::warn!(token = %token_prefix(token), "Session deleted during read");
            return Ok(None);
        }

        Ok(Some(SessionRecord {
            token: token.to_string(),
            user_id: stored.user_id,
            payload,
            created_at: stored.created_at,
            last_activity,
        }))
    }

    /// Shallow-merge `partial` into the session payload
    ///
    /// Last writer wins against concurrent updates of the same token.
    ///
    /// # Errors
    ///
    /// `SessionNotFound` if there is no live, readable session.
    pub async fn update(
        &self,
        token: &str,
        partial: SessionPayload,
    ) -> Result<SessionRecord, SessionStoreError> {
        let Loaded { stored, mut payload, .. } = self
            .load(token)
            .await?
            .ok_or(SessionStoreError::SessionNotFound)?;

        payload.extend(partial);
        let last_activity = Utc::now();
        let value = self.seal(stored.user_id.clone(), &payload, stored.created_at, last_activity)?;

        if !self
            .backend
            .replace(&self.key(token), value, self.default_ttl)
            .await?
        {
            return Err(SessionStoreError::SessionNotFound);
        }

        tracing::debug!(token = %token_prefix(token), "Session updated");
        Ok(SessionRecord {
            token: token.to_string(),
            user_id: stored.user_id,
            payload,
            created_at: stored.created_at,
            last_activity,
        })
    }

    /// Shallow-merge `partial` only if the session's `last_activity` still
    /// equals `expected_last_activity`
    ///
    /// Any read or write in between moves `last_activity`, so the caller
    /// re-reads and retries on `Conflict`.
    pub async fn update_if_unchanged(
        &self,
        token: &str,
        expected_last_activity: DateTime<Utc>,
        partial: SessionPayload,
    ) -> Result<SessionRecord, SessionStoreError> {
        let Loaded {
            raw,
            stored,
            mut payload,
        } = self
            .load(token)
            .await?
            .ok_or(SessionStoreError::SessionNotFound)?;

        if stored.last_activity != expected_last_activity {
            return Err(SessionStoreError::Conflict);
        }

        payload.extend(partial);
        let last_activity = Utc::now();
        let value = self.seal(stored.user_id.clone(), &payload, stored.created_at, last_activity)?;
        let key = self.key(token);

        if !self
            .backend
            .replace_if(&key, &raw, value, self.default_ttl)
            .await?
        {
            return match self.backend.get(&key).await? {
                Some(_) => Err(SessionStoreError::Conflict),
                None => Err(SessionStoreError::SessionNotFound),
            };
        }

        Ok(SessionRecord {
            token: token.to_string(),
            user_id: stored.user_id,
            payload,
            created_at: stored.created_at,
            last_activity,
        })
    }

    /// Delete a session; deleting an absent session is a no-op
    pub async fn delete(&self, token: &str) -> Result<DeleteOutcome, SessionStoreError> {
        if self.backend.delete(&self.key(token)).await? {
            tracing::info!(token = %token_prefix(token), "Session deleted");
            Ok(DeleteOutcome::Deleted)
        } else {
            tracing::debug!(token = %token_prefix(token), "Session already absent");
            Ok(DeleteOutcome::AlreadyAbsent)
        }
    }

    /// Check that the backing store answers
    pub async fn ping(&self) -> Result<(), SessionStoreError> {
        Ok(self.backend.ping().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::cipher::KEY_LEN;
    use crate::store::MemoryBackend;
    use serde_json::json;

    const HOUR: Duration = Duration::from_secs(3600);

    fn payload(value: serde_json::Value) -> SessionPayload {
        match value {
            serde_json::Value::Object(map) => map,
            other => panic!("not an object: {}", other),
        }
    }

    fn store_with(backend: Arc<MemoryBackend>, default_ttl: Duration) -> SessionStore {
        SessionStore::new(backend, Arc::new(Cipher::new(&[3u8; KEY_LEN])), default_ttl)
    }

    fn store() -> (Arc<MemoryBackend>, SessionStore) {
        let backend = Arc::new(MemoryBackend::new());
        (backend.clone(), store_with(backend, HOUR))
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let (_, store) = store();
        let token = store
            .create("alice", &payload(json!({"city": "Paris"})), None)
            .await
            .unwrap();

        let record = store.get(&token).await.unwrap().unwrap();
        assert_eq!(record.user_id, "alice");
        assert_eq!(record.get("city"), Some(&json!("Paris")));
        assert_eq!(record.token, token);
        assert!(record.last_activity >= record.created_at);
    }

    #[tokio::test]
    async fn test_tokens_are_random_and_url_safe() {
        let (_, store) = store();
        let a = store.create("alice", &SessionPayload::new(), None).await.unwrap();
        let b = store.create("alice", &SessionPayload::new(), None).await.unwrap();

        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[tokio::test]
    async fn test_payload_is_never_stored_in_plaintext() {
        let (backend, store) = store();
        let token = store
            .create("alice", &payload(json!({"secret": "hunter2"})), None)
            .await
            .unwrap();

        let raw = backend.get(&format!("session:{}", token)).await.unwrap().unwrap();
        assert!(!raw.contains("hunter2"));

        let stored: StoredSession = serde_json::from_str(&raw).unwrap();
        assert_eq!(stored.user_id, "alice");
        assert_eq!(stored.created_at, stored.last_activity);
    }

    #[tokio::test]
    async fn test_get_missing_is_none() {
        let (_, store) = store();
        assert!(store.get("no-such-token").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_bumps_last_activity() {
        let (_, store) = store();
        let token = store.create("alice", &SessionPayload::new(), None).await.unwrap();

        let first = store.get(&token).await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = store.get(&token).await.unwrap().unwrap();

        assert!(second.last_activity > first.last_activity);
        assert_eq!(second.created_at, first.created_at);
    }

    #[tokio::test]
    async fn test_reads_slide_the_expiry() {
        let backend = Arc::new(MemoryBackend::new());
        let store = store_with(backend, Duration::from_millis(400));
        let token = store.create("alice", &SessionPayload::new(), None).await.unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(store.get(&token).await.unwrap().is_some());

        // Past the original expiry, within the refreshed one
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(store.get(&token).await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(store.get(&token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_per_call_ttl_overrides_default() {
        let (_, store) = store();
        let token = store
            .create("alice", &SessionPayload::new(), Some(Duration::from_millis(50)))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(store.get(&token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_tampered_record_reads_as_absent() {
        let (backend, store) = store();
        let token = store
            .create("alice", &payload(json!({"city": "Paris"})), None)
            .await
            .unwrap();
        let key = format!("session:{}", token);

        let raw = backend.get(&key).await.unwrap().unwrap();
        let mut stored: StoredSession = serde_json::from_str(&raw).unwrap();
        let mut sealed = URL_SAFE_NO_PAD.decode(&stored.encrypted_payload).unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        stored.encrypted_payload = URL_SAFE_NO_PAD.encode(sealed);
        backend
            .set(&key, serde_json::to_string(&stored).unwrap(), HOUR)
            .await
            .unwrap();

        assert!(store.get(&token).await.unwrap().is_none());
        assert!(matches!(
            store.update(&token, SessionPayload::new()).await,
            Err(SessionStoreError::SessionNotFound)
        ));
    }

    #[tokio::test]
    async fn test_record_under_another_key_reads_as_absent() {
        let backend = Arc::new(MemoryBackend::new());
        let writer = store_with(backend.clone(), HOUR);
        let reader =
            SessionStore::new(backend, Arc::new(Cipher::new(&[4u8; KEY_LEN])), HOUR);

        let token = writer.create("alice", &SessionPayload::new(), None).await.unwrap();
        assert!(reader.get(&token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_garbage_record_reads_as_absent() {
        let (backend, store) = store();
        backend
            .set("session:junk", "not json".to_string(), HOUR)
            .await
            .unwrap();

        assert!(store.get("junk").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_merges_shallowly() {
        let (_, store) = store();
        let token = store
            .create(
                "alice",
                &payload(json!({"city": "Paris", "prefs": {"lang": "fr", "theme": "dark"}})),
                None,
            )
            .await
            .unwrap();

        let updated = store
            .update(&token, payload(json!({"prefs": {"lang": "en"}, "grade": 15})))
            .await
            .unwrap();
        assert_eq!(updated.get("city"), Some(&json!("Paris")));
        assert_eq!(updated.get("prefs"), Some(&json!({"lang": "en"})));

        let record = store.get(&token).await.unwrap().unwrap();
        assert_eq!(record.payload, updated.payload);
        assert_eq!(record.get("grade"), Some(&json!(15)));
    }

    #[tokio::test]
    async fn test_update_missing_session() {
        let (_, store) = store();
        assert!(matches!(
            store.update("missing", SessionPayload::new()).await,
            Err(SessionStoreError::SessionNotFound)
        ));
    }

    #[tokio::test]
    async fn test_update_if_unchanged_detects_interleaving() {
        let (_, store) = store();
        let token = store
            .create("alice", &payload(json!({"step": 1})), None)
            .await
            .unwrap();

        let seen = store.get(&token).await.unwrap().unwrap();
        let updated = store
            .update_if_unchanged(&token, seen.last_activity, payload(json!({"step": 2})))
            .await
            .unwrap();
        assert_eq!(updated.get("step"), Some(&json!(2)));

        // A stale observation is refused and the record is untouched
        let result = store
            .update_if_unchanged(&token, seen.last_activity, payload(json!({"step": 3})))
            .await;
        assert!(matches!(result, Err(SessionStoreError::Conflict)));
        assert_eq!(
            store.get(&token).await.unwrap().unwrap().get("step"),
            Some(&json!(2))
        );

        store.delete(&token).await.unwrap();
        assert!(matches!(
            store
                .update_if_unchanged(&token, updated.last_activity, SessionPayload::new())
                .await,
            Err(SessionStoreError::SessionNotFound)
        ));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let (_, store) = store();
        let token = store.create("alice", &SessionPayload::new(), None).await.unwrap();

        assert_eq!(store.delete(&token).await.unwrap(), DeleteOutcome::Deleted);
        assert_eq!(store.delete(&token).await.unwrap(), DeleteOutcome::AlreadyAbsent);
        assert!(store.get(&token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_key_prefix() {
        let backend = Arc::new(MemoryBackend::new());
        let store = store_with(backend.clone(), HOUR).with_key_prefix("satchel:s:");
        let token = store.create("alice", &SessionPayload::new(), None).await.unwrap();

        assert!(backend
            .get(&format!("satchel:s:{}", token))
            .await
            .unwrap()
            .is_some());
        assert!(store.ping().await.is_ok());
    }
}
