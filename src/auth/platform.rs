//! Platform OAuth 2.0 client
//!
//! Builds authorization URLs and talks to each platform's token and
//! identity endpoints. Twitter requires PKCE (S256); the verifier travels
//! inside the sealed state capsule.

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use reqwest::{Client, header};
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use url::Url;

use crate::config::{PlatformsConfig, ServerConfig};
use crate::data::Platform;
use crate::error::AppError;

/// State extra holding the PKCE verifier
pub const CODE_VERIFIER_KEY: &str = "code_verifier";

/// Tokens returned by a code exchange or refresh
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// The connected account as the platform knows it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformIdentity {
    pub platform_user_id: String,
    pub username: Option<String>,
}

/// OAuth operations against a platform
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OAuthClient: Send + Sync {
    /// Whether client credentials are configured for the platform
    fn is_configured(&self, platform: Platform) -> bool;

    /// URL the browser is sent to for consent
    fn authorize_url(
        &self,
        platform: Platform,
        state: &str,
        code_challenge: Option<String>,
    ) -> Result<String, AppError>;

    async fn exchange_code(
        &self,
        platform: Platform,
        code: &str,
        code_verifier: Option<String>,
    ) -> Result<TokenSet, AppError>;

    async fn refresh_token(
        &self,
        platform: Platform,
        refresh_token: &str,
    ) -> Result<TokenSet, AppError>;

    async fn fetch_identity(
        &self,
        platform: Platform,
        access_token: &str,
    ) -> Result<PlatformIdentity, AppError>;
}

/// Whether the platform's authorization flow uses PKCE
pub fn requires_pkce(platform: Platform) -> bool {
    platform == Platform::Twitter
}

/// Random PKCE code verifier (43 URL-safe characters)
pub fn generate_code_verifier() -> String {
    let mut bytes = [0_u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// S256 code challenge for a verifier
pub fn code_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

// =============================================================================
// Endpoints
// =============================================================================

struct Endpoints {
    authorize: String,
    token: String,
    identity: String,
    scope: &'static str,
    /// Client credentials go in a Basic header instead of the form
    basic_auth: bool,
    extra_authorize_params: &'static [(&'static str, &'static str)],
}

fn endpoints(
    platform: Platform,
    auth_base: Option<&str>,
    api_base: Option<&str>,
) -> Option<Endpoints> {
    // (default authorize URL, default token URL, override authorize path, override token path)
    let (authorize, token, authorize_path, token_path) = match platform {
        Platform::Github => (
            "https://github.com/login/oauth/authorize",
            "https://github.com/login/oauth/access_token",
            "/login/oauth/authorize",
            "/login/oauth/access_token",
        ),
        Platform::Reddit => (
            "https://www.reddit.com/api/v1/authorize",
            "https://www.reddit.com/api/v1/access_token",
            "/api/v1/authorize",
            "/api/v1/access_token",
        ),
        Platform::Twitter => (
            "https://twitter.com/i/oauth2/authorize",
            "https://api.twitter.com/2/oauth2/token",
            "/i/oauth2/authorize",
            "/2/oauth2/token",
        ),
        Platform::Youtube => (
            "https://accounts.google.com/o/oauth2/v2/auth",
            "https://oauth2.googleapis.com/token",
            "/o/oauth2/v2/auth",
            "/token",
        ),
        Platform::Tasks => return None,
    };

    let (default_api, identity_path) = match platform {
        Platform::Github => ("https://api.github.com", "/user"),
        Platform::Reddit => ("https://oauth.reddit.com", "/api/v1/me"),
        Platform::Twitter => ("https://api.twitter.com", "/2/users/me"),
        _ => (
            "https://www.googleapis.com",
            "/youtube/v3/channels?part=snippet&mine=true",
        ),
    };

    let (authorize, token) = match auth_base.map(|b| b.trim_end_matches('/')) {
        Some(base) => (
            format!("{}{}", base, authorize_path),
            format!("{}{}", base, token_path),
        ),
        None => (authorize.to_string(), token.to_string()),
    };
    let identity = format!(
        "{}{}",
        api_base.unwrap_or(default_api).trim_end_matches('/'),
        identity_path
    );

    let (scope, basic_auth, extra_authorize_params): (_, _, &'static [(&str, &str)]) =
        match platform {
            Platform::Github => ("read:user repo", false, &[]),
            Platform::Reddit => ("identity history read", true, &[("duration", "permanent")]),
            Platform::Twitter => ("tweet.read users.read offline.access", true, &[]),
            _ => (
                "https://www.googleapis.com/auth/youtube.readonly",
                false,
                &[("access_type", "offline"), ("prompt", "consent")],
            ),
        };

    Some(Endpoints {
        authorize,
        token,
        identity,
        scope,
        basic_auth,
        extra_authorize_params,
    })
}

// =============================================================================
// HTTP client
// =============================================================================

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    error: Option<String>,
    error_description: Option<String>,
}

impl TokenResponse {
    fn into_token_set(self, now: DateTime<Utc>) -> Result<TokenSet, String> {
        match self.access_token.filter(|t| !t.is_empty()) {
            Some(access_token) => Ok(TokenSet {
                access_token,
                refresh_token: self.refresh_token.filter(|t| !t.is_empty()),
                expires_at: self
                    .expires_in
                    .filter(|secs| *secs > 0)
                    .map(|secs| now + Duration::seconds(secs)),
            }),
            None => Err(self
                .error_description
                .or(self.error)
                .unwrap_or_else(|| "no access token in response".to_string())),
        }
    }
}

/// Live OAuth client
pub struct HttpOAuthClient {
    client: Client,
    platforms: PlatformsConfig,
    server: ServerConfig,
    timeout: std::time::Duration,
}

impl HttpOAuthClient {
    pub fn new(
        client: Client,
        platforms: PlatformsConfig,
        server: ServerConfig,
        timeout: std::time::Duration,
    ) -> Self {
        Self {
            client,
            platforms,
            server,
            timeout,
        }
    }

    fn resolve(&self, platform: Platform) -> Result<(Endpoints, &str, &str), AppError> {
        let config = self
            .platforms
            .get(platform)
            .ok_or_else(|| AppError::BadRequest(format!("{} does not use OAuth", platform)))?;
        let (client_id, client_secret) = config
            .credentials()
            .ok_or_else(|| AppError::BadRequest(format!("{} OAuth is not configured", platform)))?;
        let endpoints = endpoints(
            platform,
            config.auth_base.as_deref(),
            config.api_base.as_deref(),
        )
        .ok_or_else(|| AppError::BadRequest(format!("{} does not use OAuth", platform)))?;

        Ok((endpoints, client_id, client_secret))
    }

    async fn token_request(
        &self,
        platform: Platform,
        mut form: Vec<(&'static str, String)>,
    ) -> Result<TokenSet, AppError> {
        let (endpoints, client_id, client_secret) = self.resolve(platform)?;

        let mut request = self
            .client
            .post(&endpoints.token)
            .timeout(self.timeout)
            .header(header::ACCEPT, "application/json")
            .header(header::USER_AGENT, crate::sync::USER_AGENT);
        if endpoints.basic_auth {
            request = request.basic_auth(client_id, Some(client_secret));
            form.push(("client_id", client_id.to_string()));
        } else {
            form.push(("client_id", client_id.to_string()));
            form.push(("client_secret", client_secret.to_string()));
        }

        let response = request
            .form(&form)
            .send()
            .await
            .map_err(|e| AppError::TokenExchangeFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(platform = platform.as_str(), status = status.as_u16(), "Token endpoint rejected request");
            return Err(AppError::TokenExchangeFailed(format!(
                "{} token endpoint returned {}",
                platform, status
            )));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| AppError::TokenExchangeFailed(e.to_string()))?;
        body.into_token_set(Utc::now())
            .map_err(AppError::TokenExchangeFailed)
    }
}

#[async_trait]
impl OAuthClient for HttpOAuthClient {
    fn is_configured(&self, platform: Platform) -> bool {
        self.resolve(platform).is_ok()
    }

    fn authorize_url(
        &self,
        platform: Platform,
        state: &str,
        code_challenge: Option<String>,
    ) -> Result<String, AppError> {
        let (endpoints, client_id, _) = self.resolve(platform)?;
        let redirect_uri = self.server.oauth_callback_url(platform);

        let mut params: Vec<(&str, &str)> = vec![
            ("client_id", client_id),
            ("redirect_uri", &redirect_uri),
            ("response_type", "code"),
            ("scope", endpoints.scope),
            ("state", state),
        ];
        params.extend_from_slice(endpoints.extra_authorize_params);
        if let Some(challenge) = code_challenge.as_deref() {
            params.push(("code_challenge", challenge));
            params.push(("code_challenge_method", "S256"));
        }

        let url = Url::parse_with_params(&endpoints.authorize, &params)
            .map_err(|e| AppError::Config(format!("invalid authorize URL: {}", e)))?;
        Ok(url.into())
    }

    async fn exchange_code(
        &self,
        platform: Platform,
        code: &str,
        code_verifier: Option<String>,
    ) -> Result<TokenSet, AppError> {
        let mut form = vec![
            ("grant_type", "authorization_code".to_string()),
            ("code", code.to_string()),
            ("redirect_uri", self.server.oauth_callback_url(platform)),
        ];
        if let Some(verifier) = code_verifier {
            form.push(("code_verifier", verifier));
        }

        self.token_request(platform, form).await
    }

    async fn refresh_token(
        &self,
        platform: Platform,
        refresh_token: &str,
    ) -> Result<TokenSet, AppError> {
        let form = vec![
            ("grant_type", "refresh_token".to_string()),
            ("refresh_token", refresh_token.to_string()),
        ];

        self.token_request(platform, form).await
    }

    async fn fetch_identity(
        &self,
        platform: Platform,
        access_token: &str,
    ) -> Result<PlatformIdentity, AppError> {
        let (endpoints, _, _) = self.resolve(platform)?;

        let response = self
            .client
            .get(&endpoints.identity)
            .timeout(self.timeout)
            .bearer_auth(access_token)
            .header(header::ACCEPT, "application/json")
            .header(header::USER_AGENT, crate::sync::USER_AGENT)
            .send()
            .await
            .map_err(|e| AppError::UserFetchFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::UserFetchFailed(format!(
                "{} identity endpoint returned {}",
                platform, status
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| AppError::UserFetchFailed(e.to_string()))?;
        parse_identity(platform, &body).ok_or_else(|| {
            AppError::UserFetchFailed(format!("{} identity response has no user id", platform))
        })
    }
}

/// Extract the account identity from a platform's "who am I" response
fn parse_identity(platform: Platform, body: &Value) -> Option<PlatformIdentity> {
    let (id_pointer, name_pointer) = match platform {
        Platform::Github => ("/id", "/login"),
        Platform::Reddit => ("/id", "/name"),
        Platform::Twitter => ("/data/id", "/data/username"),
        Platform::Youtube => ("/items/0/id", "/items/0/snippet/title"),
        Platform::Tasks => return None,
    };

    let platform_user_id = match body.pointer(id_pointer)? {
        Value::String(s) if !s.is_empty() => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    let username = body
        .pointer(name_pointer)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    Some(PlatformIdentity {
        platform_user_id,
        username,
    })
}
