//! Session model
//!
//! A session is identified by an opaque random token. The persisted form
//! (`StoredSession`) only ever carries the payload as ciphertext; the
//! decrypted form (`SessionRecord`) exists in process memory only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Structured session payload: upstream credentials plus cached facts.
///
/// Updates are shallow merges, so the payload is always a JSON object.
pub type SessionPayload = Map<String, Value>;

/// Persisted session layout, one per token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredSession {
    /// Owner of the session, fixed at creation
    pub user_id: String,
    /// Cipher token of the JSON-serialized payload
    pub encrypted_payload: String,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last read or write
    pub last_activity: DateTime<Utc>,
}

/// Decrypted session as handed to callers
#[derive(Clone, PartialEq, Serialize)]
pub struct SessionRecord {
    /// Session token (storage key without prefix)
    pub token: String,
    /// Owner of the session
    pub user_id: String,
    /// Decrypted payload
    pub payload: SessionPayload,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last read or write
    pub last_activity: DateTime<Utc>,
}

impl SessionRecord {
    /// Look up a payload field
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }
}

// Payload values may hold upstream secrets; only the keys are printed.
impl fmt::Debug for SessionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRecord")
            .field("token", &token_prefix(&self.token))
            .field("user_id", &self.user_id)
            .field("payload_keys", &self.payload.keys().collect::<Vec<_>>())
            .field("created_at", &self.created_at)
            .field("last_activity", &self.last_activity)
            .finish()
    }
}

/// Outcome of a session deletion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// A live session was removed
    Deleted,
    /// Nothing was stored under the token
    AlreadyAbsent,
}

/// Shortened form of a token that is safe to log
pub fn token_prefix(token: &str) -> String {
    let end = token
        .char_indices()
        .nth(10)
        .map(|(index, _)| index)
        .unwrap_or(token.len());
    format!("{}...", &token[..end])
}
