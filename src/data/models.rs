//! Data models
//!
//! Rust structs representing database entities.
//! All models use ULID for IDs and chrono for timestamps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// =============================================================================
// ID Types
// =============================================================================

/// Entity ID wrapper (ULID format, 26 characters)
///
/// Example: "01ARZ3NDEKTSV4RRFFQ69G5FAV"
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    /// Generate a new ULID
    pub fn new() -> Self {
        Self(ulid::Ulid::new().to_string())
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Platform
// =============================================================================

/// External platform an account is connected to
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Platform {
    /// Code hosting
    Github,
    Reddit,
    Twitter,
    /// Video platform
    Youtube,
    /// The product's own task tracker
    Tasks,
}

impl Platform {
    pub const ALL: [Platform; 5] = [
        Platform::Github,
        Platform::Reddit,
        Platform::Twitter,
        Platform::Youtube,
        Platform::Tasks,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Github => "github",
            Self::Reddit => "reddit",
            Self::Twitter => "twitter",
            Self::Youtube => "youtube",
            Self::Tasks => "tasks",
        }
    }

    /// Whether accounts on this platform are connected through OAuth
    pub fn uses_oauth(&self) -> bool {
        !matches!(self, Self::Tasks)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = crate::error::AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Platform::ALL
            .into_iter()
            .find(|platform| platform.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| crate::error::AppError::BadRequest(format!("Unknown platform '{}'", s)))
    }
}

// =============================================================================
// Users and API keys
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// API key record; only the keyed hash of the key is stored
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ApiKey {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub key_hash: String,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Profile
// =============================================================================

/// A named, shareable view over a subset of a user's accounts
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Profile {
    pub id: String,
    pub user_id: String,
    /// Unique per user
    pub slug: String,
    pub name: String,
    pub description: Option<String>,
    pub theme: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Account
// =============================================================================

/// A connected platform account
///
/// Unique on (profile_id, platform, platform_user_id). Disconnecting
/// normally clears `is_active` instead of deleting the row.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Account {
    pub id: String,
    pub profile_id: String,
    pub platform: Platform,
    pub platform_user_id: String,
    pub platform_username: Option<String>,
    /// Vault ciphertext (base64 IV + ciphertext)
    #[serde(skip_serializing)]
    pub access_token_encrypted: Option<String>,
    #[serde(skip_serializing)]
    pub refresh_token_encrypted: Option<String>,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// True once the access token has expired and a refresh token is present
    pub fn needs_token_refresh(&self, now: DateTime<Utc>) -> bool {
        self.refresh_token_encrypted.is_some()
            && self.token_expires_at.is_some_and(|expires| expires <= now)
    }
}

// =============================================================================
// Filters
// =============================================================================

/// Include (whitelist) or exclude (blacklist)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum FilterType {
    Include,
    Exclude,
}

/// What a filter value is matched against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum FilterKey {
    Repo,
    Subreddit,
    Keyword,
    TwitterAccount,
}

impl FilterKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Repo => "repo",
            Self::Subreddit => "subreddit",
            Self::Keyword => "keyword",
            Self::TwitterAccount => "twitter_account",
        }
    }

    /// Keys are only meaningful for their owning account's platform
    pub fn valid_for(&self, platform: Platform) -> bool {
        match self {
            Self::Keyword => true,
            Self::Repo => platform == Platform::Github,
            Self::Subreddit => platform == Platform::Reddit,
            Self::TwitterAccount => platform == Platform::Twitter,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Filter {
    pub id: String,
    pub account_id: String,
    pub filter_type: FilterType,
    pub filter_key: FilterKey,
    pub filter_value: String,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Rate limiting and snapshots
// =============================================================================

/// Circuit breaker state for one account
///
/// `consecutive_failures` only grows until a success resets it to zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct RateLimitState {
    pub account_id: String,
    pub consecutive_failures: i64,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub circuit_open_until: Option<DateTime<Utc>>,
}

impl RateLimitState {
    /// Fresh, closed state
    pub fn new(account_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            consecutive_failures: 0,
            last_failure_at: None,
            last_success_at: None,
            circuit_open_until: None,
        }
    }
}

/// Last successful raw payload of an account
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AccountSnapshot {
    pub account_id: String,
    /// Serialized `RawPayload`
    pub payload: String,
    pub fetched_at: DateTime<Utc>,
}

// =============================================================================
// Task tracker
// =============================================================================

/// A task in the product's own tracker
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Task {
    pub id: String,
    pub user_id: String,
    pub project: Option<String>,
    pub title: String,
    pub description: Option<String>,
    /// todo, in_progress, done
    pub status: String,
    /// low, medium, high
    pub priority: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
