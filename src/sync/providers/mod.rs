//! Platform providers
//!
//! A provider turns an account's identity and token into a [`RawPayload`].
//! Live providers talk to the platform APIs over HTTP; [`MemoryProvider`]
//! serves scripted pages for tests and local runs.

mod github;
mod http;
mod memory;
mod reddit;
mod tasks;
mod twitter;
mod youtube;

pub use github::GithubProvider;
pub use memory::MemoryProvider;
pub use reddit::RedditProvider;
pub use tasks::TasksProvider;
pub use twitter::TwitterProvider;
pub use youtube::YoutubeProvider;

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use super::item::RawPayload;
use crate::config::AppConfig;
use crate::data::{Database, Platform};

/// Everything a provider needs to fetch one account
#[derive(Clone, Default)]
pub struct FetchContext {
    pub account_id: String,
    pub platform_user_id: String,
    pub platform_username: Option<String>,
    /// Decrypted access token
    pub token: Option<String>,
}

impl FetchContext {
    /// Username if known, otherwise the platform user id
    pub fn handle(&self) -> &str {
        self.platform_username
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or(&self.platform_user_id)
    }

    pub(crate) fn require_token(&self) -> Result<&str, ProviderError> {
        self.token
            .as_deref()
            .filter(|token| !token.is_empty())
            .ok_or_else(|| ProviderError::BadRequest("account has no access token".to_string()))
    }
}

impl fmt::Debug for FetchContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchContext")
            .field("account_id", &self.account_id)
            .field("platform_user_id", &self.platform_user_id)
            .field("platform_username", &self.platform_username)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Provider failure
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// Non-success upstream response, network failure or timeout
    #[error("upstream error {status}: {message}")]
    ApiError {
        status: u16,
        message: String,
        /// Seconds the upstream asked us to wait
        retry_after: Option<u64>,
    },

    /// The request could not be built (unknown platform, missing identity)
    #[error("bad request: {0}")]
    BadRequest(String),
}

impl ProviderError {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::ApiError {
            status,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::ApiError { .. } => "api_error",
            Self::BadRequest(_) => "bad_request",
        }
    }

    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Self::ApiError { retry_after, .. } => *retry_after,
            Self::BadRequest(_) => None,
        }
    }
}

/// Fetches raw activity for one platform
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Provider: Send + Sync {
    fn platform(&self) -> Platform;

    /// Fetch recent activity, following pagination up to the configured page cap
    async fn fetch(&self, ctx: &FetchContext) -> Result<RawPayload, ProviderError>;
}

/// Providers keyed by platform
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<Platform, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live HTTP providers for every platform
    pub fn live(config: &AppConfig, client: reqwest::Client, db: Arc<Database>) -> Self {
        let timeout = config.sync.fetch_timeout();
        let max_pages = config.sync.max_pages.max(1);
        let api_base = |platform: Platform| {
            config
                .platforms
                .get(platform)
                .and_then(|p| p.api_base.clone())
        };

        let mut registry = Self::new();
        registry.register(Arc::new(GithubProvider::new(
            client.clone(),
            api_base(Platform::Github),
            timeout,
            max_pages,
        )));
        registry.register(Arc::new(RedditProvider::new(
            client.clone(),
            api_base(Platform::Reddit),
            timeout,
            max_pages,
        )));
        registry.register(Arc::new(TwitterProvider::new(
            client.clone(),
            api_base(Platform::Twitter),
            timeout,
            max_pages,
        )));
        registry.register(Arc::new(YoutubeProvider::new(
            client,
            api_base(Platform::Youtube),
            timeout,
            max_pages,
        )));
        registry.register(Arc::new(TasksProvider::new(db, max_pages)));
        registry
    }

    /// Add or replace the provider for its platform
    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        self.providers.insert(provider.platform(), provider);
    }

    pub fn get(&self, platform: Platform) -> Option<Arc<dyn Provider>> {
        self.providers.get(&platform).cloned()
    }

    /// Resolve a provider by platform name
    ///
    /// # Errors
    /// `BadRequest` for an unknown or unregistered platform
    pub fn resolve(&self, platform: &str) -> Result<Arc<dyn Provider>, ProviderError> {
        let parsed: Platform = platform
            .parse()
            .map_err(|_| ProviderError::BadRequest(format!("unknown platform '{}'", platform)))?;
        self.get(parsed).ok_or_else(|| {
            ProviderError::BadRequest(format!("no provider registered for '{}'", parsed))
        })
    }

    pub fn platforms(&self) -> Vec<Platform> {
        let mut platforms: Vec<Platform> = self.providers.keys().copied().collect();
        platforms.sort();
        platforms
    }
}
