//! Rate limiter for upstream login attempts
//!
//! Counts rejected logins per username in a sliding window. Once the limit
//! is reached, further logins for that username fail fast without reaching
//! the portal, until old failures leave the window.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::RateLimitConfig;

/// Failure timestamps plus the time of the last full sweep
struct FailureLog {
    by_user: HashMap<String, Vec<DateTime<Utc>>>,
    last_sweep: DateTime<Utc>,
}

impl FailureLog {
    fn prune(&mut self, cutoff: DateTime<Utc>) {
        self.by_user.retain(|_, times| {
            times.retain(|time| *time > cutoff);
            !times.is_empty()
        });
    }
}

/// Login rate limiter
///
/// Usernames whose failures all left the window are dropped as the limiter
/// is used: on lookup, and by a full sweep at most once per window when a
/// failure is recorded.
pub struct LoginRateLimiter {
    /// Failed login attempts by lowercased username
    failures: Arc<RwLock<FailureLog>>,
    max_failures: usize,
    window: Duration,
}

impl LoginRateLimiter {
    /// Create a limiter allowing `max_failures` rejections per `window`
    pub fn new(max_failures: usize, window: Duration) -> Self {
        Self {
            failures: Arc::new(RwLock::new(FailureLog {
                by_user: HashMap::new(),
                last_sweep: Utc::now(),
            })),
            max_failures,
            window,
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.max_failures, Duration::seconds(config.window_seconds))
    }

    /// Check if username is rate limited
    pub async fn is_limited(&self, username: &str) -> bool {
        let mut failures = self.failures.write().await;
        let cutoff = Utc::now() - self.window;
        let key = username.to_lowercase();

        let Some(times) = failures.by_user.get_mut(&key) else {
            return false;
        };

        // Remove old attempts
        times.retain(|time| *time > cutoff);
        if times.is_empty() {
            failures.by_user.remove(&key);
            return false;
        }
        times.len() >= self.max_failures
    }

    /// Record a rejected login for username
    pub async fn record_failure(&self, username: &str) {
        let now = Utc::now();
        let mut failures = self.failures.write().await;

        if now - failures.last_sweep >= self.window {
            failures.prune(now - self.window);
            failures.last_sweep = now;
        }

        failures
            .by_user
            .entry(username.to_lowercase())
            .or_default()
            .push(now);
    }

    /// Clear failed attempts for username (on successful login)
    pub async fn clear(&self, username: &str) {
        let mut failures = self.failures.write().await;
        failures.by_user.remove(&username.to_lowercase());
    }

    /// Drop usernames whose failures all left the window
    pub async fn cleanup(&self) {
        let now = Utc::now();
        let mut failures = self.failures.write().await;
        failures.prune(now - self.window);
        failures.last_sweep = now;
    }

    /// Number of usernames currently tracked
    pub async fn tracked(&self) -> usize {
        self.failures.read().await.by_user.len()
    }
}

impl Default for LoginRateLimiter {
    fn default() -> Self {
        Self::from_config(&RateLimitConfig::default())
    }
}
