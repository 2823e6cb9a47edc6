//! Credential service
//!
//! Combines the session store and the token issuer:
//! - login: store the session, sign a credential pointing at it
//! - validate: verify the credential, then require its session to exist
//! - refresh: re-sign a live credential without touching upstream
//! - logout: delete the referenced session
//!
//! A credential is revoked by deleting its session. `validate` checks the
//! store on every call and never caches a verdict, so a dangling credential
//! is indistinguishable from a forged one.

use serde_json::{Map, Value};
use std::sync::Arc;

use crate::error::AuthError;
use crate::models::{
    token_prefix, DeleteOutcome, LoginGrant, SessionPayload, SessionRecord, ValidatedSession,
};
use crate::services::session::{SessionStore, SessionStoreError};
use crate::services::token::TokenIssuer;

/// Login, validation and revocation of bearer credentials
pub struct CredentialService {
    store: Arc<SessionStore>,
    issuer: Arc<TokenIssuer>,
}

impl CredentialService {
    pub fn new(store: Arc<SessionStore>, issuer: Arc<TokenIssuer>) -> Self {
        Self { store, issuer }
    }

    /// Underlying session store
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Underlying token issuer
    pub fn issuer(&self) -> &TokenIssuer {
        &self.issuer
    }

    fn grant(&self, access_credential: String, session_token: String) -> LoginGrant {
        LoginGrant::bearer(access_credential, session_token, self.issuer.lifetime().as_secs())
    }

    /// Open a session for `user_id` and issue a credential for it
    ///
    /// If signing fails after the session was stored, the session is left
    /// to expire on its own; nothing can reach it without a credential.
    pub async fn login(
        &self,
        user_id: &str,
        payload: &SessionPayload,
    ) -> Result<LoginGrant, AuthError> {
        self.login_with_claims(user_id, payload, None).await
    }

    /// `login` with caller-supplied credential claims
    pub async fn login_with_claims(
        &self,
        user_id: &str,
        payload: &SessionPayload,
        extra_claims: Option<&Map<String, Value>>,
    ) -> Result<LoginGrant, AuthError> {
        let session_token = self.store.create(user_id, payload, None).await?;
        let access_credential = self.issuer.create(user_id, &session_token, extra_claims)?;

        tracing::info!(
            user_id = %user_id,
            session = %token_prefix(&session_token),
            "Credential issued"
        );
        Ok(self.grant(access_credential, session_token))
    }

    /// Resolve a credential to its live session
    ///
    /// Returns `Ok(None)` for invalid or expired credentials and for
    /// credentials whose session is gone. Only backend failures are errors.
    pub async fn validate(
        &self,
        access_credential: &str,
    ) -> Result<Option<ValidatedSession>, AuthError> {
        let Some(claims) = self.issuer.verify(access_credential) else {
            tracing::warn!("Invalid or expired credential presented");
            return Ok(None);
        };

        let Some(session) = self.store.get(&claims.session_token).await? else {
            tracing::warn!(
                user_id = %claims.user_id,
                session = %token_prefix(&claims.session_token),
                "Credential references a missing session"
            );
            return Ok(None);
        };

        if session.user_id != claims.user_id {
            tracing::error!(
                session = %token_prefix(&claims.session_token),
                "Credential user does not own the referenced session"
            );
            return Ok(None);
        }

        Ok(Some(ValidatedSession { session, claims }))
    }

    /// Issue a fresh credential for a live one
    ///
    /// Purely a re-signing step; the session is not consulted, so a
    /// refreshed credential may still dangle.
    pub async fn refresh(&self, access_credential: &str) -> Result<Option<LoginGrant>, AuthError> {
        let Some(claims) = self.issuer.verify(access_credential) else {
            return Ok(None);
        };

        let refreshed =
            self.issuer
                .create(&claims.user_id, &claims.session_token, Some(&claims.extra))?;

        tracing::info!(user_id = %claims.user_id, "Credential refreshed");
        Ok(Some(self.grant(refreshed, claims.session_token)))
    }

    /// Merge `partial` into the session behind a live credential
    ///
    /// Last writer wins, like `SessionStore::update`.
    pub async fn update_session(
        &self,
        access_credential: &str,
        partial: SessionPayload,
    ) -> Result<SessionRecord, AuthError> {
        let claims = self
            .issuer
            .verify(access_credential)
            .ok_or(AuthError::InvalidCredential)?;

        match self.store.update(&claims.session_token, partial).await {
            Ok(record) => Ok(record),
            Err(SessionStoreError::SessionNotFound) => Err(AuthError::InvalidCredential),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete the session behind a credential
    ///
    /// Malformed or expired credentials delete nothing. Repeated calls are
    /// no-ops.
    pub async fn logout(&self, access_credential: &str) -> Result<DeleteOutcome, AuthError> {
        let Some(claims) = self.issuer.verify(access_credential) else {
            tracing::debug!("Logout with an invalid credential, nothing to delete");
            return Ok(DeleteOutcome::AlreadyAbsent);
        };

        let outcome = self.store.delete(&claims.session_token).await?;
        if outcome == DeleteOutcome::Deleted {
            tracing::info!(user_id = %claims.user_id, "User logged out");
        }
        Ok(outcome)
    }

    /// Whether the session backend answers
    pub async fn health(&self) -> bool {
        match self.store.ping().await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Session backend health check failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SigningAlgorithm;
    use crate::services::cipher::{Cipher, KEY_LEN};
    use crate::store::MemoryBackend;
    use serde_json::json;
    use std::time::Duration;

    const SECRET: &str = "credential-service-test-secret-000000";
    const DAY: Duration = Duration::from_secs(86_400);

    fn service_with_lifetime(lifetime: Duration) -> CredentialService {
        let store = SessionStore::new(
            Arc::new(MemoryBackend::new()),
            Arc::new(Cipher::new(&[9u8; KEY_LEN])),
            DAY,
        );
        let issuer = TokenIssuer::new(SECRET, SigningAlgorithm::HS256, lifetime).unwrap();
        CredentialService::new(Arc::new(store), Arc::new(issuer))
    }

    fn service() -> CredentialService {
        service_with_lifetime(DAY)
    }

    fn paris() -> SessionPayload {
        let mut payload = SessionPayload::new();
        payload.insert("city".to_string(), json!("Paris"));
        payload
    }

    #[tokio::test]
    async fn test_login_validate_logout_scenario() {
        let service = service();

        let grant = service.login("alice", &paris()).await.unwrap();
        assert_eq!(grant.token_type, "bearer");
        assert_eq!(grant.expires_in, 86_400);

        let validated = service.validate(&grant.access_credential).await.unwrap().unwrap();
        assert_eq!(validated.user_id(), "alice");
        assert_eq!(validated.session_token(), grant.session_token);
        assert_eq!(validated.session.get("city"), Some(&json!("Paris")));

        assert_eq!(
            service.logout(&grant.access_credential).await.unwrap(),
            DeleteOutcome::Deleted
        );
        assert!(service.validate(&grant.access_credential).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_logout_twice_is_a_noop() {
        let service = service();
        let grant = service.login("alice", &paris()).await.unwrap();

        service.logout(&grant.access_credential).await.unwrap();
        assert_eq!(
            service.logout(&grant.access_credential).await.unwrap(),
            DeleteOutcome::AlreadyAbsent
        );
        assert_eq!(
            service.logout("garbage").await.unwrap(),
            DeleteOutcome::AlreadyAbsent
        );
    }

    #[tokio::test]
    async fn test_dangling_credential_is_invalid() {
        let service = service();
        let grant = service.login("alice", &paris()).await.unwrap();

        service.store().delete(&grant.session_token).await.unwrap();

        // Structurally fine, but the session is gone
        assert!(service.issuer().verify(&grant.access_credential).is_some());
        assert!(service.validate(&grant.access_credential).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalid_credentials() {
        let service = service();
        assert!(service.validate("").await.unwrap().is_none());
        assert!(service.validate("a.b.c").await.unwrap().is_none());

        let expired = service_with_lifetime(Duration::ZERO);
        let grant = expired.login("alice", &paris()).await.unwrap();
        assert!(expired.validate(&grant.access_credential).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_credential_for_foreign_session_is_invalid() {
        let service = service();
        let grant = service.login("alice", &paris()).await.unwrap();

        let forged = service
            .issuer()
            .create("mallory", &grant.session_token, None)
            .unwrap();
        assert!(service.validate(&forged).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_refresh_keeps_session() {
        let service = service();
        let grant = service.login("alice", &paris()).await.unwrap();

        let refreshed = service.refresh(&grant.access_credential).await.unwrap().unwrap();
        assert_eq!(refreshed.session_token, grant.session_token);
        assert_ne!(refreshed.access_credential, grant.access_credential);

        let claims = service.issuer().verify(&refreshed.access_credential).unwrap();
        assert_eq!(claims.user_id, "alice");

        // Both credentials stay usable until their own expiry
        assert!(service.validate(&refreshed.access_credential).await.unwrap().is_some());
        assert!(service.validate(&grant.access_credential).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_refresh_succeeds_for_deleted_session() {
        let service = service();
        let grant = service.login("alice", &paris()).await.unwrap();
        service.store().delete(&grant.session_token).await.unwrap();

        let refreshed = service.refresh(&grant.access_credential).await.unwrap().unwrap();
        assert!(service.validate(&refreshed.access_credential).await.unwrap().is_none());

        assert!(service.refresh("tampered").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_login_with_claims() {
        let service = service();
        let mut extra = Map::new();
        extra.insert("school".to_string(), json!("Lycée Victor Hugo"));

        let grant = service
            .login_with_claims("alice", &paris(), Some(&extra))
            .await
            .unwrap();
        let validated = service.validate(&grant.access_credential).await.unwrap().unwrap();
        assert_eq!(validated.claims.extra.get("school"), Some(&json!("Lycée Victor Hugo")));
    }

    #[tokio::test]
    async fn test_audience_claim_does_not_break_validation() {
        let service = service();
        let mut extra = Map::new();
        extra.insert("aud".to_string(), json!("pronote-app"));

        let grant = service
            .login_with_claims("alice", &SessionPayload::new(), Some(&extra))
            .await
            .unwrap();
        let validated = service.validate(&grant.access_credential).await.unwrap().unwrap();
        assert!(validated.claims.extra.get("aud").is_none());
    }

    #[tokio::test]
    async fn test_update_session() {
        let service = service();
        let grant = service.login("alice", &paris()).await.unwrap();

        let mut partial = SessionPayload::new();
        partial.insert("class".to_string(), json!("2nde B"));
        let record = service
            .update_session(&grant.access_credential, partial.clone())
            .await
            .unwrap();
        assert_eq!(record.get("city"), Some(&json!("Paris")));
        assert_eq!(record.get("class"), Some(&json!("2nde B")));

        service.logout(&grant.access_credential).await.unwrap();
        assert!(matches!(
            service.update_session(&grant.access_credential, partial).await,
            Err(AuthError::InvalidCredential)
        ));
    }

    #[tokio::test]
    async fn test_health() {
        assert!(service().health().await);
    }
}
