//! Portal gateway
//!
//! Fronts the upstream portal with bearer credentials:
//! - `login` authenticates upstream and opens a session holding everything
//!   needed to log in again
//! - `fetch` resolves a credential, logs in upstream again (the portal
//!   client cannot resume a session) and reads records
//!
//! Every upstream call goes through the retry policy. Only transient
//! failures are retried; rejected credentials and unsupported identity
//! providers fail at once. Each `fetch` therefore costs one upstream login
//! plus one read, and fails like a login does when the portal is down.

use chrono::Local;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::Config;
use crate::error::AuthError;
use crate::models::{
    FetchResult, LoginGrant, LoginMode, PortalLogin, PortalPayload, PortalQuery, SessionFacts,
    ValidatedSession,
};
use crate::services::credential::CredentialService;
use crate::services::rate_limiter::LoginRateLimiter;
use crate::services::retry::{RetryError, RetryPolicy};
use crate::upstream::{find_provider, Portal, UpstreamError};

/// Result of a successful portal login
#[derive(Debug, Clone, Serialize)]
pub struct PortalSession {
    /// Bearer credential and session token
    #[serde(flatten)]
    pub grant: LoginGrant,
    /// Derived user id bound into the credential
    pub user_id: String,
    /// Facts reported by the portal
    pub session_info: SessionFacts,
}

/// Credentialed access to the upstream portal
pub struct PortalGateway {
    credentials: Arc<CredentialService>,
    portal: Arc<dyn Portal>,
    retry: RetryPolicy,
    deadline: Option<Duration>,
    limiter: Arc<LoginRateLimiter>,
}

impl PortalGateway {
    /// Create a gateway with the default retry policy and no deadline
    pub fn new(credentials: Arc<CredentialService>, portal: Arc<dyn Portal>) -> Self {
        Self {
            credentials,
            portal,
            retry: RetryPolicy::default(),
            deadline: None,
            limiter: Arc::new(LoginRateLimiter::default()),
        }
    }

    /// Create a gateway from the retry and rate limit sections
    pub fn from_config(
        credentials: Arc<CredentialService>,
        portal: Arc<dyn Portal>,
        config: &Config,
    ) -> Self {
        Self::new(credentials, portal)
            .with_retry(RetryPolicy::from_config(&config.retry))
            .with_deadline(config.retry.deadline_ms.map(Duration::from_millis))
            .with_rate_limiter(Arc::new(LoginRateLimiter::from_config(&config.rate_limit)))
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Bound every upstream call sequence by `deadline` from its start
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<LoginRateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn credentials(&self) -> &CredentialService {
        &self.credentials
    }

    /// Run an upstream call under the retry policy
    async fn call<T, F, Fut>(&self, operation: &str, op: F) -> Result<T, AuthError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
    {
        match self.deadline {
            Some(deadline) => self
                .retry
                .run_until(Instant::now() + deadline, operation, UpstreamError::is_transient, op)
                .await
                .map_err(|e| match e {
                    RetryError::Failed(e) => e.into(),
                    RetryError::DeadlineElapsed { attempts, .. } => {
                        AuthError::DeadlineElapsed { attempts }
                    }
                }),
            None => self
                .retry
                .run(operation, UpstreamError::is_transient, op)
                .await
                .map_err(AuthError::from),
        }
    }

    /// Log in upstream and open a session
    ///
    /// # Errors
    ///
    /// - `Rejected` for malformed requests, unsupported identity providers
    ///   and credentials the portal refuses
    /// - `RateLimited` after too many refusals for the username
    /// - `Unavailable` / `DeadlineElapsed` when the portal stays down
    pub async fn login(&self, login: PortalLogin) -> Result<PortalSession, AuthError> {
        login.validate().map_err(AuthError::Rejected)?;

        if let LoginMode::Cas { provider } = &login.mode {
            if find_provider(provider).is_none() {
                tracing::warn!(provider = %provider, "Unsupported identity provider");
                return Err(AuthError::Rejected(format!(
                    "Unsupported identity provider: {}",
                    provider
                )));
            }
        }

        if self.limiter.is_limited(&login.username).await {
            tracing::warn!(username = %login.username, "Login rate limited");
            return Err(AuthError::RateLimited);
        }

        let facts = match self
            .call("portal login", || self.portal.authenticate(&login))
            .await
        {
            Ok(facts) => facts,
            Err(e) => {
                if let AuthError::Rejected(reason) = &e {
                    tracing::warn!(username = %login.username, reason = %reason, "Portal rejected login");
                    self.limiter.record_failure(&login.username).await;
                }
                return Err(e);
            }
        };
        self.limiter.clear(&login.username).await;

        let user_id = login.user_id_for(&facts);
        let payload = PortalPayload::new(login, facts.clone())
            .to_session_payload()
            .map_err(|e| AuthError::Internal(e.into()))?;
        let grant = self.credentials.login(&user_id, &payload).await?;

        tracing::info!(user_id = %user_id, "Portal login succeeded");
        Ok(PortalSession {
            grant,
            user_id,
            session_info: facts,
        })
    }

    /// Log in upstream again with the credentials kept in the session
    pub async fn reconnect(&self, validated: &ValidatedSession) -> Result<SessionFacts, AuthError> {
        let payload = PortalPayload::from_session(&validated.session).map_err(|e| {
            tracing::warn!(
                user_id = %validated.user_id(),
                error = %e,
                "Session holds no portal credentials"
            );
            AuthError::InvalidCredential
        })?;

        let login = payload.login();
        self.call("portal reconnect", || self.portal.authenticate(&login))
            .await
    }

    /// Read records for `query` on behalf of a credential
    ///
    /// Missing date bounds are filled in relative to the local date. A query
    /// whose default end date falls off the calendar is `Rejected` before
    /// anything reaches the portal.
    pub async fn fetch(
        &self,
        access_credential: &str,
        query: PortalQuery,
    ) -> Result<FetchResult, AuthError> {
        let validated = self
            .credentials
            .validate(access_credential)
            .await?
            .ok_or(AuthError::InvalidCredential)?;

        let query = query
            .with_defaults(Local::now().date_naive())
            .map_err(AuthError::Rejected)?;
        let facts = self.reconnect(&validated).await?;
        let kind = query.kind();

        let records = self
            .call(kind, || self.portal.fetch(&facts, &query))
            .await?;

        tracing::debug!(user_id = %validated.user_id(), kind, count = records.len(), "Fetched records");
        Ok(FetchResult::new(kind, records))
    }
}
