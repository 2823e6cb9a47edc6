//! Service-level errors
//!
//! `AuthError` is what the credential service and the portal gateway return.
//! Only its `ResponseCategory` is meant to cross into a transport layer: the
//! category carries a fixed public message, so internal error text never
//! reaches a caller.

use crate::services::session::SessionStoreError;
use crate::services::token::TokenError;
use crate::upstream::UpstreamError;

/// Terminal failures of credential and gateway operations
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Bad signature, expired, malformed, or pointing at a missing session
    #[error("Invalid or expired credential")]
    InvalidCredential,

    /// The upstream portal (or request validation) refused the credentials
    #[error("Authentication failed: {0}")]
    Rejected(String),

    /// Too many rejected logins for this identity
    #[error("Too many failed login attempts")]
    RateLimited,

    /// The upstream portal stayed unavailable after all attempts
    #[error("Upstream unavailable: {0}")]
    Unavailable(String),

    /// The caller's deadline elapsed between attempts
    #[error("Upstream deadline elapsed after {attempts} attempt(s)")]
    DeadlineElapsed { attempts: u32 },

    /// Session store failure
    #[error(transparent)]
    Store(#[from] SessionStoreError),

    /// Credential signing failure
    #[error(transparent)]
    Token(#[from] TokenError),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<UpstreamError> for AuthError {
    fn from(err: UpstreamError) -> Self {
        match err {
            UpstreamError::Rejected(reason) => AuthError::Rejected(reason),
            UpstreamError::Unavailable(reason) => AuthError::Unavailable(reason),
        }
    }
}

/// Closed set of outcomes a transport layer may expose
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseCategory {
    Unauthorized,
    TooManyRequests,
    ServiceUnavailable,
    Internal,
}

impl ResponseCategory {
    /// Matching HTTP status code
    pub fn status_code(self) -> u16 {
        match self {
            ResponseCategory::Unauthorized => 401,
            ResponseCategory::TooManyRequests => 429,
            ResponseCategory::ServiceUnavailable => 503,
            ResponseCategory::Internal => 500,
        }
    }

    /// Message safe to show to a caller
    pub fn public_message(self) -> &'static str {
        match self {
            ResponseCategory::Unauthorized => "Invalid or expired credentials",
            ResponseCategory::TooManyRequests => "Too many attempts, try again later",
            ResponseCategory::ServiceUnavailable => "School portal is unavailable, try again later",
            ResponseCategory::Internal => "Internal server error",
        }
    }
}

impl AuthError {
    pub fn category(&self) -> ResponseCategory {
        match self {
            AuthError::InvalidCredential | AuthError::Rejected(_) => ResponseCategory::Unauthorized,
            AuthError::RateLimited => ResponseCategory::TooManyRequests,
            AuthError::Unavailable(_) | AuthError::DeadlineElapsed { .. } => {
                ResponseCategory::ServiceUnavailable
            }
            AuthError::Store(SessionStoreError::SessionNotFound) => ResponseCategory::Unauthorized,
            AuthError::Store(_) | AuthError::Token(_) | AuthError::Internal(_) => {
                ResponseCategory::Internal
            }
        }
    }
}
