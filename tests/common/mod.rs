//! Common test utilities for E2E tests
#![allow(dead_code)]

use async_trait::async_trait;
use chronofeed::auth::{self, CredentialVault, OAuthClient, PlatformIdentity, TokenSet};
use chronofeed::data::{Database, Platform, User};
use chronofeed::error::AppError;
use chronofeed::sync::{MemoryProvider, ProviderRegistry};
use chronofeed::{AppState, config};
use serde_json::{Value, json};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::net::TcpListener;

/// Consent page the stub OAuth client redirects to
pub const CONSENT_BASE: &str = "https://consent.test";
pub const FRONTEND_URL: &str = "https://app.test";

/// OAuth client that never leaves the process
///
/// Codes starting with `bad` fail the exchange; everything else yields
/// `access-<code>` for the identity `stub-<platform>`.
pub struct StubOAuthClient;

#[async_trait]
impl OAuthClient for StubOAuthClient {
    fn is_configured(&self, platform: Platform) -> bool {
        platform != Platform::Tasks
    }

    fn authorize_url(
        &self,
        platform: Platform,
        state: &str,
        code_challenge: Option<String>,
    ) -> Result<String, AppError> {
        let mut url = url::Url::parse(&format!("{}/{}", CONSENT_BASE, platform.as_str()))
            .map_err(|e| AppError::Internal(e.into()))?;
        url.query_pairs_mut().append_pair("state", state);
        if let Some(challenge) = code_challenge {
            url.query_pairs_mut()
                .append_pair("code_challenge", &challenge)
                .append_pair("code_challenge_method", "S256");
        }
        Ok(url.into())
    }

    async fn exchange_code(
        &self,
        _platform: Platform,
        code: &str,
        _code_verifier: Option<String>,
    ) -> Result<TokenSet, AppError> {
        if code.starts_with("bad") {
            return Err(AppError::TokenExchangeFailed("code rejected".to_string()));
        }
        Ok(TokenSet {
            access_token: format!("access-{}", code),
            refresh_token: Some(format!("refresh-{}", code)),
            expires_at: None,
        })
    }

    async fn refresh_token(
        &self,
        _platform: Platform,
        refresh_token: &str,
    ) -> Result<TokenSet, AppError> {
        Ok(TokenSet {
            access_token: format!("renewed-{}", refresh_token),
            refresh_token: None,
            expires_at: None,
        })
    }

    async fn fetch_identity(
        &self,
        platform: Platform,
        _access_token: &str,
    ) -> Result<PlatformIdentity, AppError> {
        Ok(PlatformIdentity {
            platform_user_id: format!("stub-{}", platform.as_str()),
            username: Some("stub".to_string()),
        })
    }
}

/// Test server instance
pub struct TestServer {
    pub addr: String,
    pub state: AppState,
    pub user: User,
    pub api_key: String,
    pub _temp_dir: TempDir,
    pub client: reqwest::Client,
}

pub fn test_config(db_path: std::path::PathBuf) -> config::AppConfig {
    config::AppConfig {
        server: config::ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0, // Let OS assign port
            public_url: "http://127.0.0.1".to_string(),
            frontend_url: FRONTEND_URL.to_string(),
        },
        database: config::DatabaseConfig { path: db_path },
        security: config::SecurityConfig {
            encryption_secret: "test-encryption-secret-32-bytes!!".to_string(),
            kdf_salt: "test-salt".to_string(),
            kdf_iterations: 1,
            kdf_memory_kib: 64,
        },
        platforms: config::PlatformsConfig::default(),
        sync: config::SyncConfig {
            fetch_timeout_seconds: 5,
            max_pages: 1,
            snapshot_ttl_seconds: 300,
            breaker_base_cooldown_seconds: 60,
            breaker_max_cooldown_seconds: 3600,
            background_queue_capacity: 16,
            oauth_state_ttl_seconds: 600,
        },
        timeline: config::TimelineConfig {
            default_limit: 20,
            max_limit: 100,
        },
        logging: config::LoggingConfig {
            level: "info".to_string(),
            format: "pretty".to_string(),
        },
    }
}

impl TestServer {
    /// Server with no providers registered
    pub async fn new() -> Self {
        Self::with_providers(Vec::new()).await
    }

    /// Server whose platforms are served by the given doubles
    pub async fn with_providers(providers: Vec<Arc<MemoryProvider>>) -> Self {
        chronofeed::metrics::init_metrics();

        // Create temporary directory for test database
        let temp_dir = TempDir::new().unwrap();
        let config = test_config(temp_dir.path().join("test.db"));

        let db = Arc::new(Database::connect(&config.database.path).await.unwrap());
        let vault = Arc::new(CredentialVault::from_config(&config.security).unwrap());

        let mut registry = ProviderRegistry::new();
        for provider in providers {
            registry.register(provider);
        }

        let (state, _background) = AppState::assemble(
            config,
            db.clone(),
            vault.clone(),
            Arc::new(registry),
            Arc::new(StubOAuthClient),
        );

        let user = db.create_user("tester").await.unwrap();
        let api_key = auth::issue_api_key(&db, &vault, &user.id, "e2e")
            .await
            .unwrap();

        // Redirects are asserted on, never followed
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap();

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let addr_str = format!("http://{}", addr);

        let app = chronofeed::build_router(state.clone());

        // Spawn server in background
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr: addr_str,
            state,
            user,
            api_key,
            _temp_dir: temp_dir,
            client,
        }
    }

    /// Get base URL for API requests
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }

    pub fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.client.get(self.url(path)).bearer_auth(&self.api_key)
    }

    pub fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.client.post(self.url(path)).bearer_auth(&self.api_key)
    }

    pub fn put(&self, path: &str) -> reqwest::RequestBuilder {
        self.client.put(self.url(path)).bearer_auth(&self.api_key)
    }

    pub fn patch(&self, path: &str) -> reqwest::RequestBuilder {
        self.client.patch(self.url(path)).bearer_auth(&self.api_key)
    }

    pub fn delete(&self, path: &str) -> reqwest::RequestBuilder {
        self.client.delete(self.url(path)).bearer_auth(&self.api_key)
    }

    /// Create a profile through the API and return its body
    pub async fn create_profile(&self, slug: &str) -> Value {
        let response = self
            .post("/api/v1/profiles")
            .json(&json!({ "slug": slug, "name": slug }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 201);
        response.json().await.unwrap()
    }

    /// Connect an account with a manual token and return its body
    pub async fn connect(&self, profile_id: &str, platform: &str, platform_user_id: &str) -> Value {
        let response = self
            .post(&format!("/api/v1/profiles/{}/connections", profile_id))
            .json(&json!({
                "platform": platform,
                "platform_user_id": platform_user_id,
                "platform_username": platform_user_id,
                "access_token": "manual-token",
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 201);
        response.json().await.unwrap()
    }

    /// Second user with its own API key
    pub async fn other_user_key(&self) -> String {
        let other = self.state.db.create_user("intruder").await.unwrap();
        auth::issue_api_key(&self.state.db, &self.state.vault, &other.id, "e2e")
            .await
            .unwrap()
    }
}

/// GitHub events page with one single-commit push per entry
pub fn github_page(events: &[(&str, &str, &str)]) -> Value {
    let events: Vec<Value> = events
        .iter()
        .map(|(id, repo, created_at)| {
            json!({
                "id": id,
                "type": "PushEvent",
                "created_at": created_at,
                "repo": {"name": repo},
                "payload": {
                    "ref": "refs/heads/main",
                    "head": format!("sha{}", id),
                    "commits": [{"sha": format!("sha{}", id), "message": format!("change {}", id)}]
                }
            })
        })
        .collect();
    json!({ "events": events })
}

/// Ids of every item across a timeline page's date groups
pub fn item_ids(page: &Value) -> Vec<String> {
    page["groups"]
        .as_array()
        .unwrap()
        .iter()
        .flat_map(|group| group["items"].as_array().unwrap().iter())
        .map(|item| item["id"].as_str().unwrap().to_string())
        .collect()
}
