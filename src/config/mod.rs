//! Configuration management
//!
//! This module handles loading and parsing configuration for the Satchel
//! credential gateway. Configuration can be loaded from:
//! - config.yml file
//! - Environment variables (override file settings)
//!
//! Missing optional values are filled with sensible defaults. The signing
//! secret and the encryption key have no defaults: `Config::validate` rejects
//! a configuration without them and the process refuses to start.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Minimum accepted length of the signing secret, in characters
pub const MIN_SIGNING_SECRET_LEN: usize = 32;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Key material
    #[serde(default)]
    pub security: SecurityConfig,
    /// Access credential settings
    #[serde(default)]
    pub token: TokenConfig,
    /// Session store settings
    #[serde(default)]
    pub session: SessionConfig,
    /// Upstream retry policy
    #[serde(default)]
    pub retry: RetryConfig,
    /// Failed-login throttling
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

/// Secret material, loaded once at startup and never mutated
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Secret used to sign access credentials
    #[serde(default)]
    pub signing_secret: String,
    /// URL-safe base64 encoding of the 32-byte payload encryption key
    #[serde(default)]
    pub encryption_key: String,
    /// Signature algorithm for access credentials
    #[serde(default)]
    pub algorithm: SigningAlgorithm,
}

impl std::fmt::Debug for SecurityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityConfig")
            .field("signing_secret", &redact(&self.signing_secret))
            .field("encryption_key", &redact(&self.encryption_key))
            .field("algorithm", &self.algorithm)
            .finish()
    }
}

fn redact(value: &str) -> &'static str {
    if value.is_empty() {
        "<unset>"
    } else {
        "<redacted>"
    }
}

/// HMAC algorithm used to sign access credentials
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum SigningAlgorithm {
    /// HMAC-SHA256 (default)
    #[default]
    HS256,
    /// HMAC-SHA384
    HS384,
    /// HMAC-SHA512
    HS512,
}

impl SigningAlgorithm {
    fn parse(value: &str) -> Option<Self> {
        match value.to_uppercase().as_str() {
            "HS256" => Some(Self::HS256),
            "HS384" => Some(Self::HS384),
            "HS512" => Some(Self::HS512),
            _ => None,
        }
    }
}

/// Access credential configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    /// Lifetime of an access credential in seconds
    #[serde(default = "default_token_lifetime")]
    pub lifetime_seconds: u64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            lifetime_seconds: default_token_lifetime(),
        }
    }
}

impl TokenConfig {
    pub fn lifetime(&self) -> Duration {
        Duration::from_secs(self.lifetime_seconds)
    }
}

fn default_token_lifetime() -> u64 {
    24 * 3600
}

/// Session store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Backing store driver (memory or redis)
    #[serde(default)]
    pub driver: StoreDriver,
    /// Redis connection URL (optional)
    #[serde(default)]
    pub redis_url: Option<String>,
    /// Default session time-to-live in seconds, refreshed on every read
    #[serde(default = "default_session_ttl")]
    pub ttl_seconds: u64,
    /// Maximum number of sessions kept by the in-memory driver
    #[serde(default = "default_max_capacity")]
    pub max_capacity: u64,
    /// Prefix prepended to session tokens to form storage keys
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            driver: StoreDriver::default(),
            redis_url: None,
            ttl_seconds: default_session_ttl(),
            max_capacity: default_max_capacity(),
            key_prefix: default_key_prefix(),
        }
    }
}

impl SessionConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

fn default_session_ttl() -> u64 {
    86_400
}

fn default_max_capacity() -> u64 {
    10_000
}

fn default_key_prefix() -> String {
    "session:".to_string()
}

/// Session store driver type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreDriver {
    /// In-process store (default)
    #[default]
    Memory,
    /// Redis store
    Redis,
}

/// Retry policy for upstream portal calls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base delay in milliseconds; attempt `n` waits `base * n` before retrying
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Optional overall deadline for one upstream operation, in milliseconds
    #[serde(default)]
    pub deadline_ms: Option<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            deadline_ms: None,
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    2_000
}

/// Failed-login throttling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Rejected logins tolerated per username inside the window
    #[serde(default = "default_max_failures")]
    pub max_failures: usize,
    /// Sliding window length in seconds
    #[serde(default = "default_window_seconds")]
    pub window_seconds: i64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_failures: default_max_failures(),
            window_seconds: default_window_seconds(),
        }
    }
}

fn default_max_failures() -> usize {
    5
}

fn default_window_seconds() -> i64 {
    15 * 60
}

/// Error type for configuration parsing
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    FileRead {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{path}': {message}")]
    ParseError {
        path: String,
        message: String,
    },
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

impl Config {
    /// Load configuration from file
    ///
    /// If the file doesn't exist, returns default configuration.
    /// If the file exists but is invalid YAML, returns an error with details.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.display().to_string(),
            source: e,
        })?;

        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Config = serde_yaml::from_str(&content).map_err(|e| {
            ConfigError::ParseError {
                path: path.display().to_string(),
                message: format_yaml_error(&e),
            }
        })?;

        Ok(config)
    }

    /// Load configuration from file with environment variable overrides
    ///
    /// Environment variables follow the pattern:
    /// - SATCHEL_SECURITY_SIGNING_SECRET
    /// - SATCHEL_SECURITY_ENCRYPTION_KEY
    /// - SATCHEL_SECURITY_ALGORITHM
    /// - SATCHEL_TOKEN_LIFETIME_SECONDS
    /// - SATCHEL_SESSION_DRIVER
    /// - SATCHEL_SESSION_REDIS_URL
    /// - SATCHEL_SESSION_TTL_SECONDS
    /// - SATCHEL_RETRY_MAX_ATTEMPTS
    /// - SATCHEL_RETRY_BASE_DELAY_MS
    pub fn load_with_env(path: &std::path::Path) -> anyhow::Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Check everything that must hold before the service may start.
    ///
    /// Only the shape of the key material is checked here; the cipher
    /// decodes the key itself when it is constructed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.security.signing_secret.len() < MIN_SIGNING_SECRET_LEN {
            errors.push(format!(
                "security.signing_secret must be at least {} characters",
                MIN_SIGNING_SECRET_LEN
            ));
        }
        if self.security.encryption_key.trim().is_empty() {
            errors.push("security.encryption_key is required".to_string());
        }
        if self.token.lifetime_seconds == 0 {
            errors.push("token.lifetime_seconds must be positive".to_string());
        }
        if self.session.ttl_seconds == 0 {
            errors.push("session.ttl_seconds must be positive".to_string());
        }
        if self.session.max_capacity == 0 {
            errors.push("session.max_capacity must be positive".to_string());
        }
        if self.session.driver == StoreDriver::Redis && self.session.redis_url.is_none() {
            errors.push("session.redis_url is required with the redis driver".to_string());
        }
        if self.retry.max_attempts == 0 {
            errors.push("retry.max_attempts must be at least 1".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::ValidationError(errors.join("; ")))
        }
    }

    fn apply_env_overrides(&mut self) {
        // Security
        if let Ok(secret) = std::env::var("SATCHEL_SECURITY_SIGNING_SECRET") {
            self.security.signing_secret = secret;
        }
        if let Ok(key) = std::env::var("SATCHEL_SECURITY_ENCRYPTION_KEY") {
            self.security.encryption_key = key;
        }
        if let Ok(algorithm) = std::env::var("SATCHEL_SECURITY_ALGORITHM") {
            if let Some(algorithm) = SigningAlgorithm::parse(&algorithm) {
                self.security.algorithm = algorithm;
            }
        }

        // Token
        if let Ok(lifetime) = std::env::var("SATCHEL_TOKEN_LIFETIME_SECONDS") {
            if let Ok(lifetime) = lifetime.parse::<u64>() {
                self.token.lifetime_seconds = lifetime;
            }
        }

        // Session store
        if let Ok(driver) = std::env::var("SATCHEL_SESSION_DRIVER") {
            match driver.to_lowercase().as_str() {
                "memory" => self.session.driver = StoreDriver::Memory,
                "redis" => self.session.driver = StoreDriver::Redis,
                _ => {} // Ignore invalid values
            }
        }
        if let Ok(redis_url) = std::env::var("SATCHEL_SESSION_REDIS_URL") {
            self.session.redis_url = Some(redis_url);
        }
        if let Ok(ttl) = std::env::var("SATCHEL_SESSION_TTL_SECONDS") {
            if let Ok(ttl) = ttl.parse::<u64>() {
                self.session.ttl_seconds = ttl;
            }
        }

        // Retry
        if let Ok(attempts) = std::env::var("SATCHEL_RETRY_MAX_ATTEMPTS") {
            if let Ok(attempts) = attempts.parse::<u32>() {
                self.retry.max_attempts = attempts;
            }
        }
        if let Ok(delay) = std::env::var("SATCHEL_RETRY_BASE_DELAY_MS") {
            if let Ok(delay) = delay.parse::<u64>() {
                self.retry.base_delay_ms = delay;
            }
        }
    }
}

/// Format YAML parsing error with location and context
fn format_yaml_error(e: &serde_yaml::Error) -> String {
    if let Some(location) = e.location() {
        format!(
            "at line {}, column {}: {}",
            location.line(),
            location.column(),
            e
        )
    } else {
        e.to_string()
    }
}

#[cfg(test)]
static CONFIG_ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());
