//! Data models
//!
//! This module contains the data structures shared across Satchel:
//! - Session records, in their persisted and decrypted forms
//! - Access credential claims and login grants
//! - Upstream portal requests, facts and queries

mod credential;
mod portal;
mod session;

pub use credential::{AccessClaims, LoginGrant, ValidatedSession, RESERVED_CLAIMS};
pub use portal::{
    FetchResult, LoginMode, PortalLogin, PortalPayload, PortalQuery, SessionFacts,
    DEFAULT_ACCOUNT_TYPE,
};
pub use session::{token_prefix, DeleteOutcome, SessionPayload, SessionRecord, StoredSession};
