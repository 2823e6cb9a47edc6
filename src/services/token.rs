//! Token issuer
//!
//! Signs and verifies access credentials (HMAC JWTs). Verification is purely
//! structural: signature and expiry. Whether the referenced session still
//! exists is the credential service's concern.

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde_json::{Map, Value};
use std::time::Duration;
use uuid::Uuid;

use crate::config::{SigningAlgorithm, TokenConfig};
use crate::models::{AccessClaims, RESERVED_CLAIMS};

/// Error types for token issuer operations
///
/// Invalid credentials are not errors: `verify` and `refresh` report them
/// as `None`.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    /// No signing secret configured
    #[error("Signing secret is empty")]
    MissingSecret,

    /// The claim set could not be signed
    #[error("Failed to sign credential: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
}

/// Issues and verifies signed access credentials
pub struct TokenIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    algorithm: Algorithm,
    lifetime: Duration,
}

impl std::fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("algorithm", &self.algorithm)
            .field("lifetime", &self.lifetime)
            .finish_non_exhaustive()
    }
}

impl From<SigningAlgorithm> for Algorithm {
    fn from(algorithm: SigningAlgorithm) -> Self {
        match algorithm {
            SigningAlgorithm::HS256 => Algorithm::HS256,
            SigningAlgorithm::HS384 => Algorithm::HS384,
            SigningAlgorithm::HS512 => Algorithm::HS512,
        }
    }
}

impl TokenIssuer {
    /// Create an issuer
    ///
    /// # Errors
    ///
    /// `MissingSecret` if `secret` is empty. This is a startup failure.
    pub fn new(
        secret: &str,
        algorithm: SigningAlgorithm,
        lifetime: Duration,
    ) -> Result<Self, TokenError> {
        if secret.is_empty() {
            return Err(TokenError::MissingSecret);
        }

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            algorithm: algorithm.into(),
            lifetime,
        })
    }

    pub fn from_config(
        secret: &str,
        algorithm: SigningAlgorithm,
        config: &TokenConfig,
    ) -> Result<Self, TokenError> {
        Self::new(secret, algorithm, config.lifetime())
    }

    /// Lifetime of freshly issued credentials
    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    /// Sign a new credential referencing `session_token`
    ///
    /// Extra claims named like a reserved claim are dropped.
    pub fn create(
        &self,
        user_id: &str,
        session_token: &str,
        extra_claims: Option<&Map<String, Value>>,
    ) -> Result<String, TokenError> {
        let issued_at = Utc::now().timestamp();
        let lifetime = i64::try_from(self.lifetime.as_secs()).unwrap_or(i64::MAX);

        let extra: Map<String, Value> = extra_claims
            .map(|claims| {
                claims
                    .iter()
                    .filter(|(name, _)| !RESERVED_CLAIMS.contains(&name.as_str()))
                    .map(|(name, value)| (name.clone(), value.clone()))
                    .collect()
            })
            .unwrap_or_default();

        let claims = AccessClaims {
            user_id: user_id.to_string(),
            session_token: session_token.to_string(),
            issued_at,
            expires_at: issued_at.saturating_add(lifetime),
            credential_id: Uuid::new_v4().to_string(),
            extra,
        };

        Ok(encode(&Header::new(self.algorithm), &claims, &self.encoding_key)?)
    }

    /// Check signature and expiry
    ///
    /// Returns `None` for malformed, forged or expired credentials.
    pub fn verify(&self, credential: &str) -> Option<AccessClaims> {
        let mut validation = Validation::new(self.algorithm);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);

        let claims = match decode::<AccessClaims>(credential, &self.decoding_key, &validation) {
            Ok(data) => data.claims,
            Err(e) => {
                tracing::debug!(error = %e, "Credential rejected");
                return None;
            }
        };

        // Expired at the exact second too
        if claims.expires_at <= Utc::now().timestamp() {
            tracing::debug!(credential_id = %claims.credential_id, "Credential expired");
            return None;
        }

        Some(claims)
    }

    /// Re-sign a live credential with fresh timestamps and id
    ///
    /// Keeps user, session reference and extra claims. Does not look at the
    /// session store.
    pub fn refresh(&self, credential: &str) -> Result<Option<String>, TokenError> {
        let Some(claims) = self.verify(credential) else {
            return Ok(None);
        };

        self.create(&claims.user_id, &claims.session_token, Some(&claims.extra))
            .map(Some)
    }
}
