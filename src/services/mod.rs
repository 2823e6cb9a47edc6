//! Services layer
//!
//! This module contains the credential and session logic of Satchel:
//! - Payload encryption and the encrypted session store
//! - Signed access credentials and the credential service built on both
//! - Retry, login throttling and the portal gateway around the upstream

pub mod cipher;
pub mod credential;
pub mod gateway;
pub mod rate_limiter;
pub mod retry;
pub mod session;
pub mod token;

pub use cipher::{Cipher, CipherError};
pub use credential::CredentialService;
pub use gateway::{PortalGateway, PortalSession};
pub use rate_limiter::LoginRateLimiter;
pub use retry::{RetryError, RetryPolicy};
pub use session::{SessionStore, SessionStoreError};
pub use token::{TokenError, TokenIssuer};

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::config::Config;
use crate::store::create_backend;

/// Build the credential service described by `config`
///
/// Connects the session backend. Fails on an unusable encryption key or
/// signing secret; there is no fallback key.
pub async fn create_credential_service(config: &Config) -> Result<CredentialService> {
    let cipher = Cipher::from_base64_key(&config.security.encryption_key)
        .context("Invalid session encryption key")?;
    let issuer = TokenIssuer::from_config(
        &config.security.signing_secret,
        config.security.algorithm,
        &config.token,
    )
    .context("Invalid token signing configuration")?;

    let backend = create_backend(&config.session).await?;
    let store = SessionStore::from_config(backend, Arc::new(cipher), &config.session);

    Ok(CredentialService::new(Arc::new(store), Arc::new(issuer)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SessionPayload;

    fn config() -> Config {
        let mut config = Config::default();
        config.security.signing_secret = "s".repeat(48);
        config.security.encryption_key = Cipher::generate_key();
        config
    }

    #[tokio::test]
    async fn test_create_credential_service() {
        let service = create_credential_service(&config()).await.unwrap();

        let grant = service.login("alice", &SessionPayload::new()).await.unwrap();
        assert_eq!(grant.expires_in, 86_400);
        assert!(service.validate(&grant.access_credential).await.unwrap().is_some());
        assert!(service.health().await);
    }

    #[tokio::test]
    async fn test_missing_key_is_fatal() {
        let mut config = config();
        config.security.encryption_key = String::new();

        let err = create_credential_service(&config).await.err().unwrap();
        assert!(err.to_string().contains("encryption key"));
    }

    #[tokio::test]
    async fn test_missing_secret_is_fatal() {
        let mut config = config();
        config.security.signing_secret = String::new();

        assert!(create_credential_service(&config).await.is_err());
    }
}
