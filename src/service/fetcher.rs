//! Per-account fetch pipeline
//!
//! Loads one account's items for a timeline: fresh snapshot, circuit check,
//! stale snapshot, then a live fetch. Every failure is contained in the
//! returned [`AccountSlice`]. Also runs background refresh jobs.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

use crate::auth::{CredentialVault, OAuthClient};
use crate::data::{Account, AccountSnapshot, Database, Platform, RateLimitState};
use crate::error::AppError;
use crate::metrics::{
    CIRCUIT_SKIPS_TOTAL, PROVIDER_FETCHES_TOTAL, PROVIDER_FETCH_DURATION_SECONDS,
    SNAPSHOT_HITS_TOTAL,
};
use crate::sync::circuit_breaker::{self, BreakerPolicy};
use crate::sync::{
    AccountSettings, BackgroundJob, FetchContext, JobRunner, ProfileFilterEngine, ProviderError,
    ProviderRegistry, RawPayload, TimelineItem, normalize,
};

/// Upper bound honoured for an upstream Retry-After
const MAX_RETRY_AFTER_SECS: u64 = 86_400;

/// How an account's slice was produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SliceStatus {
    /// Fetched live during this request
    Ok,
    /// Served from the stored snapshot
    Cached { stale: bool },
    /// Circuit open; items come from the last snapshot, if any
    Skipped { retry_at: DateTime<Utc> },
    Error { kind: String, message: String },
}

/// One account's contribution to a timeline
#[derive(Debug, Clone)]
pub struct AccountSlice {
    pub account_id: String,
    pub platform: Platform,
    pub status: SliceStatus,
    pub items: Vec<TimelineItem>,
}

impl AccountSlice {
    /// A stale snapshot was served and a refresh should follow
    pub fn needs_refresh(&self) -> bool {
        matches!(self.status, SliceStatus::Cached { stale: true })
    }
}

/// Why a fetch did not produce a payload
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("circuit open until {until}")]
    CircuitOpen { until: DateTime<Utc> },

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    App(#[from] AppError),
}

impl FetchError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CircuitOpen { .. } => "circuit_open",
            Self::Provider(e) => e.kind(),
            Self::App(e) => e.kind(),
        }
    }

    fn public_message(&self) -> String {
        match self {
            Self::App(e) => e.public_message(),
            other => other.to_string(),
        }
    }

    fn into_status(self) -> SliceStatus {
        SliceStatus::Error {
            kind: self.kind().to_string(),
            message: self.public_message(),
        }
    }
}

impl From<FetchError> for AppError {
    fn from(error: FetchError) -> Self {
        match error {
            FetchError::CircuitOpen { until } => AppError::ApiError {
                status: 503,
                message: format!("circuit open until {}", until.to_rfc3339()),
            },
            FetchError::Provider(ProviderError::ApiError {
                status, message, ..
            }) => AppError::ApiError { status, message },
            FetchError::Provider(ProviderError::BadRequest(message)) => {
                AppError::BadRequest(message)
            }
            FetchError::App(e) => e,
        }
    }
}

/// Fetches, caches and normalizes account activity
pub struct AccountFetcher {
    db: Arc<Database>,
    vault: Arc<CredentialVault>,
    providers: Arc<ProviderRegistry>,
    oauth: Arc<dyn OAuthClient>,
    policy: BreakerPolicy,
    snapshot_ttl: Duration,
}

impl AccountFetcher {
    pub fn new(
        db: Arc<Database>,
        vault: Arc<CredentialVault>,
        providers: Arc<ProviderRegistry>,
        oauth: Arc<dyn OAuthClient>,
        policy: BreakerPolicy,
        snapshot_ttl: Duration,
    ) -> Self {
        Self {
            db,
            vault,
            providers,
            oauth,
            policy,
            snapshot_ttl,
        }
    }

    /// Load an account's items for a timeline
    ///
    /// Never fails: errors become an empty slice with `SliceStatus::Error`.
    pub async fn load_slice(
        &self,
        account: &Account,
        filters: &ProfileFilterEngine,
        now: DateTime<Utc>,
    ) -> AccountSlice {
        let (status, raw) = match self.resolve_payload(account, now).await {
            Ok(resolved) => resolved,
            Err(error) => {
                tracing::warn!(
                    account_id = %account.id,
                    platform = account.platform.as_str(),
                    kind = error.kind(),
                    error = %error,
                    "Account slice failed"
                );
                (error.into_status(), None)
            }
        };

        self.finish_slice(account, filters, status, raw).await
    }

    /// Fetch an account now, ignoring snapshot freshness
    ///
    /// The circuit is still honoured: an open circuit yields `Skipped`.
    pub async fn refresh(
        &self,
        account: &Account,
        filters: &ProfileFilterEngine,
        now: DateTime<Utc>,
    ) -> AccountSlice {
        let (status, raw) = match self.fetch_and_store(account, now).await {
            Ok(raw) => (SliceStatus::Ok, Some(raw)),
            Err(FetchError::CircuitOpen { until }) => {
                CIRCUIT_SKIPS_TOTAL
                    .with_label_values(&[account.platform.as_str()])
                    .inc();
                (SliceStatus::Skipped { retry_at: until }, None)
            }
            Err(error) => (error.into_status(), None),
        };

        self.finish_slice(account, filters, status, raw).await
    }

    async fn finish_slice(
        &self,
        account: &Account,
        filters: &ProfileFilterEngine,
        status: SliceStatus,
        raw: Option<RawPayload>,
    ) -> AccountSlice {
        let items = match raw {
            Some(raw) => match self.settings(account).await {
                Ok(settings) => prepare_items(&account.id, &raw, &settings, filters),
                Err(error) => {
                    let error = FetchError::from(error);
                    return AccountSlice {
                        account_id: account.id.clone(),
                        platform: account.platform,
                        status: error.into_status(),
                        items: Vec::new(),
                    };
                }
            },
            None => Vec::new(),
        };

        AccountSlice {
            account_id: account.id.clone(),
            platform: account.platform,
            status,
            items,
        }
    }

    async fn settings(&self, account: &Account) -> Result<AccountSettings, AppError> {
        let pairs = self.db.get_account_settings(&account.id).await?;
        Ok(AccountSettings::from_pairs(account.platform, &pairs))
    }

    async fn resolve_payload(
        &self,
        account: &Account,
        now: DateTime<Utc>,
    ) -> Result<(SliceStatus, Option<RawPayload>), FetchError> {
        let snapshot = self.load_snapshot(&account.id).await?;

        if let Some((raw, fetched_at)) = &snapshot {
            if now - *fetched_at < self.snapshot_ttl {
                SNAPSHOT_HITS_TOTAL.with_label_values(&["fresh"]).inc();
                return Ok((SliceStatus::Cached { stale: false }, Some(raw.clone())));
            }
        }

        let state = self.db.get_rate_limit(&account.id).await?;
        if !circuit_breaker::should_fetch(state.as_ref(), now) {
            CIRCUIT_SKIPS_TOTAL
                .with_label_values(&[account.platform.as_str()])
                .inc();
            let retry_at = state
                .as_ref()
                .and_then(|s| s.circuit_open_until)
                .unwrap_or(now);
            tracing::debug!(account_id = %account.id, %retry_at, "Circuit open; skipping fetch");
            return Ok((
                SliceStatus::Skipped { retry_at },
                snapshot.map(|(raw, _)| raw),
            ));
        }

        if let Some((raw, _)) = snapshot {
            SNAPSHOT_HITS_TOTAL.with_label_values(&["stale"]).inc();
            return Ok((SliceStatus::Cached { stale: true }, Some(raw)));
        }

        let raw = self.fetch_with_state(account, state, now).await?;
        Ok((SliceStatus::Ok, Some(raw)))
    }

    /// Stored snapshot, if present and readable
    async fn load_snapshot(
        &self,
        account_id: &str,
    ) -> Result<Option<(RawPayload, DateTime<Utc>)>, AppError> {
        let Some(snapshot) = self.db.get_snapshot(account_id).await? else {
            return Ok(None);
        };

        match serde_json::from_str::<RawPayload>(&snapshot.payload) {
            Ok(raw) => Ok(Some((raw, snapshot.fetched_at))),
            Err(e) => {
                tracing::warn!(account_id, error = %e, "Discarding unreadable snapshot");
                Ok(None)
            }
        }
    }

    /// Call the provider and persist the outcome
    ///
    /// # Errors
    /// * `CircuitOpen` - the breaker refused the call; nothing is recorded
    /// * any other error has already been recorded as a breaker failure
    pub async fn fetch_and_store(
        &self,
        account: &Account,
        now: DateTime<Utc>,
    ) -> Result<RawPayload, FetchError> {
        let state = self.db.get_rate_limit(&account.id).await?;
        self.fetch_with_state(account, state, now).await
    }

    async fn fetch_with_state(
        &self,
        account: &Account,
        state: Option<RateLimitState>,
        now: DateTime<Utc>,
    ) -> Result<RawPayload, FetchError> {
        if !circuit_breaker::should_fetch(state.as_ref(), now) {
            let until = state
                .as_ref()
                .and_then(|s| s.circuit_open_until)
                .unwrap_or(now);
            return Err(FetchError::CircuitOpen { until });
        }

        let platform = account.platform.as_str();
        let current = state.unwrap_or_else(|| RateLimitState::new(account.id.as_str()));

        match self.attempt(account, now).await {
            Ok(raw) => {
                PROVIDER_FETCHES_TOTAL
                    .with_label_values(&[platform, "ok"])
                    .inc();
                self.db
                    .upsert_rate_limit(&circuit_breaker::update_on_success(&current, now))
                    .await?;

                let payload = serde_json::to_string(&raw)
                    .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?;
                self.db
                    .upsert_snapshot(&AccountSnapshot {
                        account_id: account.id.clone(),
                        payload,
                        fetched_at: now,
                    })
                    .await?;

                tracing::debug!(account_id = %account.id, platform, "Account fetched");
                Ok(raw)
            }
            Err(error) => {
                PROVIDER_FETCHES_TOTAL
                    .with_label_values(&[platform, "error"])
                    .inc();
                let retry_after = match &error {
                    FetchError::Provider(e) => e
                        .retry_after()
                        .map(|secs| now + Duration::seconds(secs.min(MAX_RETRY_AFTER_SECS) as i64)),
                    _ => None,
                };
                let next = circuit_breaker::update_on_failure(&current, now, &self.policy, retry_after);

                tracing::warn!(
                    account_id = %account.id,
                    platform,
                    failures = next.consecutive_failures,
                    open_until = ?next.circuit_open_until,
                    error = %error,
                    "Account fetch failed"
                );
                self.db.upsert_rate_limit(&next).await?;
                Err(error)
            }
        }
    }

    async fn attempt(&self, account: &Account, now: DateTime<Utc>) -> Result<RawPayload, FetchError> {
        let provider = self.providers.resolve(account.platform.as_str())?;
        let ctx = self.context(account, now).await?;

        let timer = PROVIDER_FETCH_DURATION_SECONDS
            .with_label_values(&[account.platform.as_str()])
            .start_timer();
        let result = provider.fetch(&ctx).await;
        timer.observe_duration();

        Ok(result?)
    }

    /// Decrypt credentials, refreshing an expired access token first
    async fn context(&self, account: &Account, now: DateTime<Utc>) -> Result<FetchContext, AppError> {
        let token = if account.needs_token_refresh(now) {
            Some(self.refresh_tokens(account).await?)
        } else {
            account
                .access_token_encrypted
                .as_deref()
                .map(|ciphertext| self.vault.decrypt(ciphertext))
                .transpose()?
        };

        Ok(FetchContext {
            account_id: account.id.clone(),
            platform_user_id: account.platform_user_id.clone(),
            platform_username: account.platform_username.clone(),
            token,
        })
    }

    async fn refresh_tokens(&self, account: &Account) -> Result<String, AppError> {
        let ciphertext = account
            .refresh_token_encrypted
            .as_deref()
            .ok_or_else(|| AppError::TokenExchangeFailed("no refresh token stored".to_string()))?;
        let refresh_token = self.vault.decrypt(ciphertext)?;

        let tokens = self
            .oauth
            .refresh_token(account.platform, &refresh_token)
            .await?;

        let access_encrypted = self.vault.encrypt(&tokens.access_token)?;
        let refresh_encrypted = self
            .vault
            .encrypt_optional(tokens.refresh_token.as_deref())?;
        self.db
            .update_account_tokens(
                &account.id,
                &access_encrypted,
                refresh_encrypted.as_deref(),
                tokens.expires_at,
            )
            .await?;

        tracing::info!(
            account_id = %account.id,
            platform = account.platform.as_str(),
            "Access token refreshed"
        );
        Ok(tokens.access_token)
    }
}

/// normalize → settings → account filters
fn prepare_items(
    account_id: &str,
    raw: &RawPayload,
    settings: &AccountSettings,
    filters: &ProfileFilterEngine,
) -> Vec<TimelineItem> {
    let items = settings.apply(normalize(raw));
    filters.apply(account_id, items)
}

#[async_trait]
impl JobRunner for AccountFetcher {
    async fn run(&self, job: BackgroundJob) -> Result<(), AppError> {
        match job {
            BackgroundJob::RefreshAccount { account_id } => {
                let Some(account) = self
                    .db
                    .get_account(&account_id)
                    .await?
                    .filter(|account| account.is_active)
                else {
                    tracing::debug!(%account_id, "Refresh skipped; account gone or inactive");
                    return Ok(());
                };

                match self.fetch_and_store(&account, Utc::now()).await {
                    Ok(_) | Err(FetchError::CircuitOpen { .. }) => Ok(()),
                    Err(error) => Err(error.into()),
                }
            }
            BackgroundJob::PruneOAuthNonces { older_than } => {
                let pruned = self.db.prune_oauth_nonces(older_than).await?;
                tracing::debug!(pruned, "Pruned consumed OAuth nonces");
                Ok(())
            }
        }
    }
}
