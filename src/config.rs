//! Application configuration management.
//!
//! Configuration is loaded once at process bootstrap from environment variables
//! (optionally seeded from a `.env` file) using the `envy` crate, then validated.
//! Nothing downstream re-reads the environment: the encryption secret in particular
//! is turned into a [`CryptoEngine`](crate::crypto::CryptoEngine) exactly once.

use std::fmt;
use std::time::Duration;

use serde::Deserialize;

use crate::crypto::MIN_SECRET_LEN;

/// Fatal startup errors. The process must not start when one of these occurs.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("failed to read configuration from the environment: {0}")]
    Env(#[from] envy::Error),

    #[error("CREDENTIAL_ENCRYPTION_SECRET is not set")]
    MissingEncryptionSecret,

    #[error("CREDENTIAL_ENCRYPTION_SECRET must be at least {MIN_SECRET_LEN} characters")]
    EncryptionSecretTooShort,

    #[error("invalid configuration value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Where the login rate limiter keeps its sliding windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateLimitBackend {
    /// Process-local counters. Correct only for a single replica.
    Memory,
    /// `login_attempts` table, shared by every replica.
    Database,
}

/// Application configuration loaded from environment variables.
///
/// # Environment Variables
///
/// - `DATABASE_URL` (required): PostgreSQL connection string
/// - `CREDENTIAL_ENCRYPTION_SECRET` (required): at least 32 characters
/// - `CREDENTIAL_ENCRYPTION_SECRET_PREVIOUS` (optional): only read by `rekey`
/// - `SERVER_PORT` (optional): defaults to 3000
/// - `SESSION_TTL_MINUTES`, `LOGIN_MAX_ATTEMPTS`, `LOGIN_WINDOW_SECS`,
///   `RATE_LIMIT_BACKEND`, `PROVIDER_TEST_TIMEOUT_SECS` (optional)
/// - `OPENAI_BASE_URL`, `ANTHROPIC_BASE_URL`, `GEMINI_BASE_URL`,
///   `MISTRAL_BASE_URL` (optional): override provider endpoints
#[derive(Clone, Deserialize)]
pub struct Config {
    pub database_url: String,

    #[serde(default = "default_port")]
    pub server_port: u16,

    #[serde(default)]
    pub credential_encryption_secret: Option<String>,

    #[serde(default)]
    pub credential_encryption_secret_previous: Option<String>,

    #[serde(default = "default_session_ttl_minutes")]
    pub session_ttl_minutes: i64,

    #[serde(default = "default_login_max_attempts")]
    pub login_max_attempts: u32,

    #[serde(default = "default_login_window_secs")]
    pub login_window_secs: u64,

    #[serde(default = "default_rate_limit_backend")]
    pub rate_limit_backend: RateLimitBackend,

    #[serde(default = "default_provider_test_timeout_secs")]
    pub provider_test_timeout_secs: u64,

    #[serde(default)]
    pub openai_base_url: Option<String>,

    #[serde(default)]
    pub anthropic_base_url: Option<String>,

    #[serde(default)]
    pub gemini_base_url: Option<String>,

    #[serde(default)]
    pub mistral_base_url: Option<String>,
}

const MAX_SESSION_TTL_MINUTES: i64 = 60 * 24 * 30;
const MAX_LOGIN_WINDOW_SECS: u64 = 60 * 60 * 24;

fn default_port() -> u16 {
    3000
}

fn default_session_ttl_minutes() -> i64 {
    480
}

fn default_login_max_attempts() -> u32 {
    5
}

fn default_login_window_secs() -> u64 {
    900
}

fn default_rate_limit_backend() -> RateLimitBackend {
    RateLimitBackend::Memory
}

fn default_provider_test_timeout_secs() -> u64 {
    15
}

impl Config {
    /// Load and validate configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigurationError`] if:
    /// - Required environment variables are missing (e.g., DATABASE_URL)
    /// - The encryption secret is absent or shorter than the minimum length
    /// - Numeric settings are zero or a base URL override does not parse
    pub fn from_env() -> Result<Self, ConfigurationError> {
        // Try to load .env file if it exists (does nothing if not found)
        dotenvy::dotenv().ok();

        let config = envy::from_env::<Config>()?;
        config.validate()?;
        Ok(config)
    }

    /// Check the invariants `envy` cannot express.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.encryption_secret()?;

        if !(1..=MAX_SESSION_TTL_MINUTES).contains(&self.session_ttl_minutes) {
            return Err(ConfigurationError::Invalid {
                field: "SESSION_TTL_MINUTES",
                reason: format!("must be between 1 and {MAX_SESSION_TTL_MINUTES}"),
            });
        }
        if self.login_max_attempts == 0 {
            return Err(ConfigurationError::Invalid {
                field: "LOGIN_MAX_ATTEMPTS",
                reason: "must be positive".to_string(),
            });
        }
        if !(1..=MAX_LOGIN_WINDOW_SECS).contains(&self.login_window_secs) {
            return Err(ConfigurationError::Invalid {
                field: "LOGIN_WINDOW_SECS",
                reason: format!("must be between 1 and {MAX_LOGIN_WINDOW_SECS}"),
            });
        }
        if self.provider_test_timeout_secs == 0 {
            return Err(ConfigurationError::Invalid {
                field: "PROVIDER_TEST_TIMEOUT_SECS",
                reason: "a bounded, non-zero timeout is required".to_string(),
            });
        }

        for (field, value) in [
            ("OPENAI_BASE_URL", &self.openai_base_url),
            ("ANTHROPIC_BASE_URL", &self.anthropic_base_url),
            ("GEMINI_BASE_URL", &self.gemini_base_url),
            ("MISTRAL_BASE_URL", &self.mistral_base_url),
        ] {
            if let Some(raw) = value {
                url::Url::parse(raw).map_err(|e| ConfigurationError::Invalid {
                    field,
                    reason: e.to_string(),
                })?;
            }
        }

        Ok(())
    }

    /// The validated encryption secret.
    pub fn encryption_secret(&self) -> Result<&str, ConfigurationError> {
        check_secret(self.credential_encryption_secret.as_deref())
    }

    pub fn session_ttl(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.session_ttl_minutes.clamp(1, MAX_SESSION_TTL_MINUTES))
    }

    pub fn login_window(&self) -> chrono::Duration {
        // bounded by validate()
        chrono::Duration::seconds(self.login_window_secs.min(MAX_LOGIN_WINDOW_SECS) as i64)
    }

    pub fn provider_test_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_test_timeout_secs)
    }
}

/// Shared length check for the current and the previous encryption secret.
pub fn check_secret(secret: Option<&str>) -> Result<&str, ConfigurationError> {
    match secret {
        None => Err(ConfigurationError::MissingEncryptionSecret),
        Some(s) if s.trim().is_empty() => Err(ConfigurationError::MissingEncryptionSecret),
        Some(s) if s.chars().count() < MIN_SECRET_LEN => {
            Err(ConfigurationError::EncryptionSecretTooShort)
        }
        Some(s) => Ok(s),
    }
}

// Secrets must never reach logs through `{:?}`.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_url", &"<redacted>")
            .field("server_port", &self.server_port)
            .field(
                "credential_encryption_secret",
                &self.credential_encryption_secret.as_ref().map(|_| "<redacted>"),
            )
            .field(
                "credential_encryption_secret_previous",
                &self
                    .credential_encryption_secret_previous
                    .as_ref()
                    .map(|_| "<redacted>"),
            )
            .field("session_ttl_minutes", &self.session_ttl_minutes)
            .field("login_max_attempts", &self.login_max_attempts)
            .field("login_window_secs", &self.login_window_secs)
            .field("rate_limit_backend", &self.rate_limit_backend)
            .field("provider_test_timeout_secs", &self.provider_test_timeout_secs)
            .field("openai_base_url", &self.openai_base_url)
            .field("anthropic_base_url", &self.anthropic_base_url)
            .field("gemini_base_url", &self.gemini_base_url)
            .field("mistral_base_url", &self.mistral_base_url)
            .finish()
    }
}
