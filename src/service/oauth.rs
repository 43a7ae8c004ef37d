//! OAuth connect flow
//!
//! `authorize` seals a state capsule and builds the platform consent URL.
//! `callback` never fails: every outcome, good or bad, becomes a redirect
//! to the frontend carrying a success or error code, since the browser is
//! mid-redirect when it arrives.

use chrono::{Duration, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::connection::ConnectionService;
use crate::auth::platform::{self, CODE_VERIFIER_KEY};
use crate::auth::{CredentialVault, OAuthClient, oauth_state};
use crate::data::{Account, Database, Platform};
use crate::error::AppError;
use crate::metrics::OAUTH_CALLBACKS_TOTAL;
use crate::sync::{BackgroundDispatcher, BackgroundJob};

/// Query parameters a platform sends back
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    /// Set when the user declined or the platform refused
    pub error: Option<String>,
}

/// OAuth service
pub struct OAuthService {
    db: Arc<Database>,
    vault: Arc<CredentialVault>,
    oauth: Arc<dyn OAuthClient>,
    connections: Arc<ConnectionService>,
    background: Arc<BackgroundDispatcher>,
    frontend_url: String,
    state_ttl: Duration,
}

impl OAuthService {
    /// Create new OAuth service
    pub fn new(
        db: Arc<Database>,
        vault: Arc<CredentialVault>,
        oauth: Arc<dyn OAuthClient>,
        connections: Arc<ConnectionService>,
        background: Arc<BackgroundDispatcher>,
        frontend_url: &str,
        state_ttl: Duration,
    ) -> Self {
        Self {
            db,
            vault,
            oauth,
            connections,
            background,
            frontend_url: frontend_url.trim_end_matches('/').to_string(),
            state_ttl,
        }
    }

    /// Build the consent URL for connecting a platform to a profile
    ///
    /// # Errors
    /// * `BadRequest` - unknown platform, or no OAuth credentials configured
    /// * `NotFound` - profile not owned by the user
    pub async fn authorize(
        &self,
        user_id: &str,
        platform: &str,
        profile_id: &str,
    ) -> Result<String, AppError> {
        let platform: Platform = platform.parse()?;
        if !platform.uses_oauth() || !self.oauth.is_configured(platform) {
            return Err(AppError::BadRequest(format!(
                "{} OAuth is not configured",
                platform
            )));
        }

        let profile = self
            .db
            .get_profile_for_user(user_id, profile_id)
            .await?
            .ok_or(AppError::NotFound)?;

        let mut extra = BTreeMap::new();
        let challenge = if platform::requires_pkce(platform) {
            let verifier = platform::generate_code_verifier();
            let challenge = platform::code_challenge(&verifier);
            extra.insert(CODE_VERIFIER_KEY.to_string(), verifier);
            Some(challenge)
        } else {
            None
        };

        let state = oauth_state::encode(user_id, &profile.id, extra, self.vault.key())?;
        self.oauth.authorize_url(platform, &state, challenge)
    }

    /// Complete the round trip
    ///
    /// # Returns
    /// Frontend URL to redirect the browser to
    pub async fn callback(&self, platform: &str, params: CallbackParams) -> String {
        let label = platform
            .parse::<Platform>()
            .map(|p| p.as_str())
            .unwrap_or("unknown");

        match self.complete(platform, params).await {
            Ok(account) => {
                OAUTH_CALLBACKS_TOTAL
                    .with_label_values(&[label, "success"])
                    .inc();
                tracing::info!(
                    account_id = %account.id,
                    platform = label,
                    profile_id = %account.profile_id,
                    "OAuth connection stored"
                );
                format!(
                    "{}/connections?success={}&profile={}",
                    self.frontend_url,
                    account.platform.as_str(),
                    urlencoding::encode(&account.profile_id)
                )
            }
            Err(code) => {
                OAUTH_CALLBACKS_TOTAL.with_label_values(&[label, code]).inc();
                format!("{}/connections?error={}", self.frontend_url, code)
            }
        }
    }

    async fn complete(&self, platform: &str, params: CallbackParams) -> Result<Account, &'static str> {
        let platform = platform
            .parse::<Platform>()
            .ok()
            .filter(Platform::uses_oauth)
            .ok_or("unknown_platform")?;

        if let Some(error) = params.error.as_deref() {
            tracing::info!(platform = platform.as_str(), error, "OAuth consent declined");
            return Err("access_denied");
        }
        let (Some(code), Some(state)) = (
            params.code.filter(|c| !c.is_empty()),
            params.state.filter(|s| !s.is_empty()),
        ) else {
            return Err("missing_params");
        };

        let required: &[&str] = if platform::requires_pkce(platform) {
            &[CODE_VERIFIER_KEY]
        } else {
            &[]
        };
        let state = oauth_state::decode(&state, required, self.vault.key()).map_err(|e| {
            tracing::warn!(platform = platform.as_str(), error = %e, "Rejected OAuth state");
            e.redirect_code()
        })?;

        let now = Utc::now();
        if state.is_expired(now, self.state_ttl) {
            return Err("state_expired");
        }
        if !self
            .db
            .consume_oauth_nonce(&state.nonce)
            .await
            .map_err(|e| log_failure(platform, "db_error", &e))?
        {
            tracing::warn!(platform = platform.as_str(), "OAuth state replayed");
            return Err("state_replayed");
        }

        self.background
            .dispatch(BackgroundJob::PruneOAuthNonces {
                older_than: now - self.state_ttl,
            })
            .await;

        self.db
            .get_profile_for_user(&state.user_id, &state.profile_id)
            .await
            .map_err(|e| log_failure(platform, "db_error", &e))?
            .ok_or("profile_not_found")?;

        let verifier = state.extra(CODE_VERIFIER_KEY).map(str::to_string);
        let tokens = self
            .oauth
            .exchange_code(platform, &code, verifier)
            .await
            .map_err(|e| log_failure(platform, "token_exchange_failed", &e))?;
        let identity = self
            .oauth
            .fetch_identity(platform, &tokens.access_token)
            .await
            .map_err(|e| log_failure(platform, "user_fetch_failed", &e))?;

        let account = self
            .connections
            .upsert_oauth(&state.profile_id, platform, identity, tokens)
            .await
            .map_err(|e| match e {
                AppError::EncryptionFailed(_) => log_failure(platform, "encryption_failed", &e),
                _ => log_failure(platform, "db_error", &e),
            })?;

        self.background
            .dispatch(BackgroundJob::RefreshAccount {
                account_id: account.id.clone(),
            })
            .await;

        Ok(account)
    }
}

fn log_failure(platform: Platform, code: &'static str, error: &AppError) -> &'static str {
    tracing::warn!(platform = platform.as_str(), code, error = %error, "OAuth callback failed");
    code
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::platform::MockOAuthClient;
    use crate::auth::{PlatformIdentity, TokenSet};
    use crate::service::AccountFetcher;
    use crate::service::testing::Harness;
    use crate::sync::{JobRunner, MemoryProvider};
    use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
    use url::Url;

    const FRONTEND: &str = "http://localhost:3000";

    fn service(harness: &Harness, oauth: MockOAuthClient) -> OAuthService {
        let oauth: Arc<dyn OAuthClient> = Arc::new(oauth);
        let fetcher = Arc::new(AccountFetcher::new(
            harness.db.clone(),
            harness.vault.clone(),
            harness.registry(vec![Arc::new(MemoryProvider::new(Platform::Github))]),
            oauth.clone(),
            Default::default(),
            Duration::minutes(5),
        ));
        let runner: Arc<dyn JobRunner> = fetcher.clone();
        let background = Arc::new(BackgroundDispatcher::inline(runner));
        let connections = Arc::new(ConnectionService::new(
            harness.db.clone(),
            harness.vault.clone(),
            fetcher,
            background.clone(),
        ));

        OAuthService::new(
            harness.db.clone(),
            harness.vault.clone(),
            oauth,
            connections,
            background,
            FRONTEND,
            Duration::minutes(10),
        )
    }

    /// Client that accepts any code and reports a fixed identity
    fn accepting_client() -> MockOAuthClient {
        let mut client = MockOAuthClient::new();
        client.expect_is_configured().return_const(true);
        client
            .expect_authorize_url()
            .returning(|_, state, _| Ok(format!("https://github.com/login/oauth/authorize?state={}", state)));
        client.expect_exchange_code().returning(|_, _, _| {
            Ok(TokenSet {
                access_token: "gho_access".to_string(),
                refresh_token: Some("ghr_refresh".to_string()),
                expires_at: None,
            })
        });
        client.expect_fetch_identity().returning(|_, _| {
            Ok(PlatformIdentity {
                platform_user_id: "42".to_string(),
                username: Some("alice".to_string()),
            })
        });
        client
    }

    fn state_from(url: &str) -> String {
        Url::parse(url)
            .unwrap()
            .query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.into_owned())
            .unwrap()
    }

    fn params(code: &str, state: &str) -> CallbackParams {
        CallbackParams {
            code: Some(code.to_string()),
            state: Some(state.to_string()),
            error: None,
        }
    }

    #[tokio::test]
    async fn round_trip_stores_encrypted_account() {
        let harness = Harness::new().await;
        let service = service(&harness, accepting_client());

        let url = service
            .authorize(&harness.user.id, "github", &harness.profile.id)
            .await
            .unwrap();
        let redirect = service.callback("github", params("code", &state_from(&url))).await;

        assert_eq!(
            redirect,
            format!(
                "{}/connections?success=github&profile={}",
                FRONTEND, harness.profile.id
            )
        );
        let accounts = harness.db.list_accounts(&harness.profile.id, false).await.unwrap();
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].platform_user_id, "42");
        let stored = accounts[0].access_token_encrypted.as_deref().unwrap();
        assert_eq!(harness.vault.decrypt(stored).unwrap(), "gho_access");
    }

    #[tokio::test]
    async fn tampered_state_redirects_without_writing() {
        let harness = Harness::new().await;
        let service = service(&harness, accepting_client());

        let url = service
            .authorize(&harness.user.id, "github", &harness.profile.id)
            .await
            .unwrap();
        let mut bytes = URL_SAFE_NO_PAD.decode(state_from(&url)).unwrap();
        let middle = bytes.len() / 2;
        bytes[middle] ^= 0x01;
        let tampered = URL_SAFE_NO_PAD.encode(bytes);

        let redirect = service.callback("github", params("code", &tampered)).await;
        assert_eq!(redirect, format!("{}/connections?error=invalid_state", FRONTEND));
        assert!(harness.db.list_accounts(&harness.profile.id, true).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn replayed_state_is_rejected() {
        let harness = Harness::new().await;
        let service = service(&harness, accepting_client());

        let url = service
            .authorize(&harness.user.id, "github", &harness.profile.id)
            .await
            .unwrap();
        let state = state_from(&url);

        assert!(service.callback("github", params("c1", &state)).await.contains("success="));
        assert!(
            service
                .callback("github", params("c2", &state))
                .await
                .ends_with("error=state_replayed")
        );
    }

    #[tokio::test]
    async fn failure_codes() {
        let harness = Harness::new().await;
        let mut client = MockOAuthClient::new();
        client.expect_is_configured().return_const(true);
        client
            .expect_authorize_url()
            .returning(|_, state, _| Ok(format!("https://example.test/?state={}", state)));
        client
            .expect_exchange_code()
            .returning(|_, _, _| Err(AppError::TokenExchangeFailed("bad code".to_string())));
        let service = service(&harness, client);

        let declined = CallbackParams {
            error: Some("access_denied".to_string()),
            ..Default::default()
        };
        assert!(service.callback("github", declined).await.ends_with("error=access_denied"));
        assert!(
            service
                .callback("github", CallbackParams::default())
                .await
                .ends_with("error=missing_params")
        );
        assert!(
            service
                .callback("myspace", params("c", "s"))
                .await
                .ends_with("error=unknown_platform")
        );
        assert!(
            service
                .callback("tasks", params("c", "s"))
                .await
                .ends_with("error=unknown_platform")
        );

        let url = service
            .authorize(&harness.user.id, "github", &harness.profile.id)
            .await
            .unwrap();
        assert!(
            service
                .callback("github", params("c", &state_from(&url)))
                .await
                .ends_with("error=token_exchange_failed")
        );
    }

    #[tokio::test]
    async fn twitter_state_carries_pkce_verifier() {
        let harness = Harness::new().await;
        let mut client = MockOAuthClient::new();
        client.expect_is_configured().return_const(true);
        client
            .expect_authorize_url()
            .withf(|platform, _, challenge| *platform == Platform::Twitter && challenge.is_some())
            .returning(|_, state, _| Ok(format!("https://twitter.com/i/oauth2/authorize?state={}", state)));
        let service = service(&harness, client);

        let url = service
            .authorize(&harness.user.id, "twitter", &harness.profile.id)
            .await
            .unwrap();
        let state = oauth_state::decode(
            &state_from(&url),
            &[CODE_VERIFIER_KEY],
            harness.vault.key(),
        )
        .unwrap();
        assert_eq!(state.extra(CODE_VERIFIER_KEY).unwrap().len(), 43);
        assert_eq!(state.profile_id, harness.profile.id);
    }

    #[tokio::test]
    async fn authorize_requires_configuration_and_ownership() {
        let harness = Harness::new().await;
        let mut client = MockOAuthClient::new();
        client
            .expect_is_configured()
            .returning(|platform| platform == Platform::Github);
        let service = service(&harness, client);

        assert!(matches!(
            service
                .authorize(&harness.user.id, "reddit", &harness.profile.id)
                .await,
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            service
                .authorize(&harness.user.id, "tasks", &harness.profile.id)
                .await,
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            service.authorize(&harness.user.id, "github", "missing").await,
            Err(AppError::NotFound)
        ));
    }
}
