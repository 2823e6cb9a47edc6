//! Access credential model

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::SessionRecord;

/// Claim names caller-supplied claims may not use: the issuer's own claims
/// plus the registered ones that verification would otherwise act on
pub const RESERVED_CLAIMS: &[&str] = &[
    "user_id",
    "session_token",
    "iat",
    "exp",
    "jti",
    "aud",
    "iss",
    "sub",
    "nbf",
];

/// Claim set carried by a signed access credential
///
/// The credential references its session by token and never embeds the
/// session payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Authenticated user
    pub user_id: String,
    /// Token of the referenced session record
    pub session_token: String,
    /// Issue time (unix seconds)
    #[serde(rename = "iat")]
    pub issued_at: i64,
    /// Expiry time (unix seconds)
    #[serde(rename = "exp")]
    pub expires_at: i64,
    /// Unique id for audit and replay correlation
    #[serde(rename = "jti")]
    pub credential_id: String,
    /// Caller-supplied claims
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Result of a successful login or refresh
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginGrant {
    /// Signed bearer credential
    pub access_credential: String,
    /// Session the credential points at
    pub session_token: String,
    /// Always `bearer`
    pub token_type: String,
    /// Credential lifetime in seconds
    pub expires_in: u64,
}

impl LoginGrant {
    pub fn bearer(access_credential: String, session_token: String, expires_in: u64) -> Self {
        Self {
            access_credential,
            session_token,
            token_type: "bearer".to_string(),
            expires_in,
        }
    }
}

/// A live credential together with the session it references
#[derive(Debug, Clone)]
pub struct ValidatedSession {
    /// Decrypted session record
    pub session: SessionRecord,
    /// Verified claims of the presented credential
    pub claims: AccessClaims,
}

impl ValidatedSession {
    pub fn user_id(&self) -> &str {
        &self.claims.user_id
    }

    pub fn session_token(&self) -> &str {
        &self.claims.session_token
    }
}
