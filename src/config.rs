//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration file (config/local.toml)
//! 3. Environment variables (override)

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::data::Platform;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub security: SecurityConfig,
    #[serde(default)]
    pub platforms: PlatformsConfig,
    pub sync: SyncConfig,
    pub timeline: TimelineConfig,
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Port number (e.g., 8080)
    pub port: u16,
    /// Public base URL of this API, used to build OAuth redirect URIs
    pub public_url: String,
    /// Where the browser lands after an OAuth callback
    pub frontend_url: String,
}

impl ServerConfig {
    /// OAuth redirect URI registered with a platform
    pub fn oauth_callback_url(&self, platform: Platform) -> String {
        format!(
            "{}/api/v1/auth/{}/callback",
            self.public_url.trim_end_matches('/'),
            platform.as_str()
        )
    }
}

/// Database configuration (SQLite only)
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    pub path: PathBuf,
}

/// Secrets used by the credential vault
///
/// Changing any of these invalidates every stored token: the derived
/// encryption key changes and existing ciphertexts no longer decrypt.
#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    /// Application secret the token encryption key is derived from (32+ bytes)
    pub encryption_secret: String,
    /// Fixed salt for key derivation (8+ bytes)
    pub kdf_salt: String,
    /// Key derivation passes
    pub kdf_iterations: u32,
    /// Key derivation memory cost in KiB
    pub kdf_memory_kib: u32,
}

/// OAuth client credentials for one platform
#[derive(Debug, Clone, Deserialize, Default)]
pub struct PlatformOAuthConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    /// Override for the platform API base (tests, proxies)
    pub api_base: Option<String>,
    /// Override for the OAuth authorize/token base
    pub auth_base: Option<String>,
}

impl PlatformOAuthConfig {
    /// Client id and secret, if both are set and non-empty
    pub fn credentials(&self) -> Option<(&str, &str)> {
        let id = self.client_id.as_deref().map(str::trim).filter(|v| !v.is_empty())?;
        let secret = self
            .client_secret
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())?;
        Some((id, secret))
    }
}

/// Per-platform OAuth configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct PlatformsConfig {
    #[serde(default)]
    pub github: PlatformOAuthConfig,
    #[serde(default)]
    pub reddit: PlatformOAuthConfig,
    #[serde(default)]
    pub twitter: PlatformOAuthConfig,
    #[serde(default)]
    pub youtube: PlatformOAuthConfig,
}

impl PlatformsConfig {
    /// OAuth settings for a platform; `None` for platforms without OAuth
    pub fn get(&self, platform: Platform) -> Option<&PlatformOAuthConfig> {
        match platform {
            Platform::Github => Some(&self.github),
            Platform::Reddit => Some(&self.reddit),
            Platform::Twitter => Some(&self.twitter),
            Platform::Youtube => Some(&self.youtube),
            Platform::Tasks => None,
        }
    }
}

/// Fetch, breaker and background tuning
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Per-request deadline for provider calls
    pub fetch_timeout_seconds: u64,
    /// Upper bound on pages followed per fetch
    pub max_pages: usize,
    /// Snapshots younger than this are served without a provider call
    pub snapshot_ttl_seconds: i64,
    /// Cool-down after the first failure; doubles per further failure
    pub breaker_base_cooldown_seconds: i64,
    /// Cap for the exponential cool-down
    pub breaker_max_cooldown_seconds: i64,
    /// Bounded queue size for background jobs
    pub background_queue_capacity: usize,
    /// Lifetime of an OAuth state capsule
    pub oauth_state_ttl_seconds: i64,
}

impl SyncConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_seconds.max(1))
    }
}

/// Timeline pagination limits
#[derive(Debug, Clone, Deserialize)]
pub struct TimelineConfig {
    pub default_limit: usize,
    pub max_limit: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
}

impl AppConfig {
    /// Load configuration from file and environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (CHRONOFEED__*)
    ///
    /// # Errors
    /// Returns error if configuration is invalid
    pub fn load() -> Result<Self, crate::error::AppError> {
        use config::{Config, Environment, File};

        let config = Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("server.public_url", "http://localhost:8080")?
            .set_default("server.frontend_url", "http://localhost:3000")?
            .set_default("database.path", "data/chronofeed.db")?
            .set_default("security.kdf_salt", "chronofeed-token-vault")?
            .set_default("security.kdf_iterations", 3)?
            .set_default("security.kdf_memory_kib", 19456)?
            .set_default("sync.fetch_timeout_seconds", 10)?
            .set_default("sync.max_pages", 3)?
            .set_default("sync.snapshot_ttl_seconds", 300)?
            .set_default("sync.breaker_base_cooldown_seconds", 60)?
            .set_default("sync.breaker_max_cooldown_seconds", 3600)?
            .set_default("sync.background_queue_capacity", 256)?
            .set_default("sync.oauth_state_ttl_seconds", 600)?
            .set_default("timeline.default_limit", 20)?
            .set_default("timeline.max_limit", 100)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(
                Environment::with_prefix("CHRONOFEED")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;

        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;
        app_config.validate()?;
        Ok(app_config)
    }

    pub(crate) fn validate(&self) -> Result<(), crate::error::AppError> {
        use crate::error::AppError;

        const MIN_SECRET_BYTES: usize = 32;
        const MIN_SALT_BYTES: usize = 8;

        if self.security.encryption_secret.len() < MIN_SECRET_BYTES {
            return Err(AppError::Config(format!(
                "security.encryption_secret must be at least {} bytes",
                MIN_SECRET_BYTES
            )));
        }

        if self.security.kdf_salt.len() < MIN_SALT_BYTES {
            return Err(AppError::Config(format!(
                "security.kdf_salt must be at least {} bytes",
                MIN_SALT_BYTES
            )));
        }

        if self.security.kdf_iterations == 0 {
            return Err(AppError::Config(
                "security.kdf_iterations must be greater than 0".to_string(),
            ));
        }

        if self.timeline.default_limit == 0 || self.timeline.max_limit < self.timeline.default_limit
        {
            return Err(AppError::Config(
                "timeline limits must satisfy 0 < default_limit <= max_limit".to_string(),
            ));
        }

        if self.sync.breaker_base_cooldown_seconds <= 0
            || self.sync.breaker_max_cooldown_seconds < self.sync.breaker_base_cooldown_seconds
        {
            return Err(AppError::Config(
                "sync breaker cool-downs must satisfy 0 < base <= max".to_string(),
            ));
        }

        for platform in Platform::ALL {
            let Some(platform_config) = self.platforms.get(platform) else {
                continue;
            };
            if platform_config.client_id.is_some() && platform_config.credentials().is_none() {
                tracing::warn!(
                    platform = platform.as_str(),
                    "OAuth client id set without a client secret; platform stays disabled"
                );
            }
        }

        Ok(())
    }
}
