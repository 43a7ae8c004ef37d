//! Connection service
//!
//! Connected accounts of a profile: manual and OAuth connect, disconnect,
//! refresh, per-account settings and filters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

use super::fetcher::AccountFetcher;
use super::timeline::AccountStatus;
use crate::auth::{CredentialVault, PlatformIdentity, TokenSet};
use crate::data::{Account, Database, EntityId, Filter, FilterKey, FilterType, Platform, Profile};
use crate::error::AppError;
use crate::sync::circuit_breaker::{self, CircuitPhase};
use crate::sync::settings::{self, SettingKey};
use crate::sync::{AccountSettings, BackgroundDispatcher, BackgroundJob, ProfileFilterEngine};

const MAX_FILTER_VALUE_LEN: usize = 200;

/// A connection with its breaker health
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionView {
    #[serde(flatten)]
    pub account: Account,
    pub circuit: CircuitPhase,
    pub consecutive_failures: i64,
    pub circuit_open_until: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
}

/// Connect without OAuth: a personal token, or the task tracker
#[derive(Debug, Clone, Deserialize)]
pub struct ManualConnection {
    pub platform: Platform,
    #[serde(default)]
    pub platform_user_id: Option<String>,
    #[serde(default)]
    pub platform_username: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewFilter {
    pub filter_type: FilterType,
    pub filter_key: FilterKey,
    pub filter_value: String,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Connection service
pub struct ConnectionService {
    db: Arc<Database>,
    vault: Arc<CredentialVault>,
    fetcher: Arc<AccountFetcher>,
    background: Arc<BackgroundDispatcher>,
}

impl ConnectionService {
    /// Create new connection service
    pub fn new(
        db: Arc<Database>,
        vault: Arc<CredentialVault>,
        fetcher: Arc<AccountFetcher>,
        background: Arc<BackgroundDispatcher>,
    ) -> Self {
        Self {
            db,
            vault,
            fetcher,
            background,
        }
    }

    async fn profile(&self, user_id: &str, profile_id: &str) -> Result<Profile, AppError> {
        self.db
            .get_profile_for_user(user_id, profile_id)
            .await?
            .ok_or(AppError::NotFound)
    }

    async fn account(&self, user_id: &str, account_id: &str) -> Result<Account, AppError> {
        self.db
            .get_account_for_user(user_id, account_id)
            .await?
            .ok_or(AppError::NotFound)
    }

    /// List a profile's connections, disconnected ones included
    pub async fn list(
        &self,
        user_id: &str,
        profile_id: &str,
    ) -> Result<Vec<ConnectionView>, AppError> {
        let profile = self.profile(user_id, profile_id).await?;
        let accounts = self.db.list_accounts(&profile.id, true).await?;
        let now = Utc::now();

        let mut views = Vec::with_capacity(accounts.len());
        for account in accounts {
            let state = self.db.get_rate_limit(&account.id).await?;
            let view = match state {
                Some(state) => ConnectionView {
                    circuit: circuit_breaker::phase(&state, now),
                    consecutive_failures: state.consecutive_failures,
                    circuit_open_until: state.circuit_open_until,
                    last_success_at: state.last_success_at,
                    account,
                },
                None => ConnectionView {
                    account,
                    circuit: CircuitPhase::Closed,
                    consecutive_failures: 0,
                    circuit_open_until: None,
                    last_success_at: None,
                },
            };
            views.push(view);
        }
        Ok(views)
    }

    /// Connect an account without the OAuth round trip
    ///
    /// The task tracker needs no token; its account is the user itself.
    /// Other platforms require a platform user id and an access token.
    ///
    /// # Errors
    /// * `NotFound` - profile not owned by the user
    /// * `BadRequest` - missing identity or token
    pub async fn create(
        &self,
        user_id: &str,
        profile_id: &str,
        input: ManualConnection,
    ) -> Result<Account, AppError> {
        let profile = self.profile(user_id, profile_id).await?;
        let now = Utc::now();

        let account = if input.platform == Platform::Tasks {
            Account {
                id: EntityId::new().0,
                profile_id: profile.id,
                platform: Platform::Tasks,
                platform_user_id: user_id.to_string(),
                platform_username: non_empty(input.platform_username),
                access_token_encrypted: None,
                refresh_token_encrypted: None,
                token_expires_at: None,
                is_active: true,
                created_at: now,
                updated_at: now,
            }
        } else {
            let platform_user_id = non_empty(input.platform_user_id).ok_or_else(|| {
                AppError::BadRequest("platform_user_id is required".to_string())
            })?;
            let access_token = non_empty(input.access_token)
                .ok_or_else(|| AppError::BadRequest("access_token is required".to_string()))?;
            let refresh_token = non_empty(input.refresh_token);

            Account {
                id: EntityId::new().0,
                profile_id: profile.id,
                platform: input.platform,
                platform_user_id,
                platform_username: non_empty(input.platform_username),
                access_token_encrypted: Some(self.vault.encrypt(&access_token)?),
                refresh_token_encrypted: self.vault.encrypt_optional(refresh_token.as_deref())?,
                token_expires_at: input.token_expires_at,
                is_active: true,
                created_at: now,
                updated_at: now,
            }
        };

        let stored = self.db.upsert_account(&account).await?;
        tracing::info!(
            account_id = %stored.id,
            platform = stored.platform.as_str(),
            "Connection created"
        );
        Ok(stored)
    }

    /// Store an OAuth-connected account
    ///
    /// Inserts, or refreshes in place the row keyed by (profile, platform,
    /// platform user id), re-activating it.
    pub async fn upsert_oauth(
        &self,
        profile_id: &str,
        platform: Platform,
        identity: PlatformIdentity,
        tokens: TokenSet,
    ) -> Result<Account, AppError> {
        let now = Utc::now();
        let account = Account {
            id: EntityId::new().0,
            profile_id: profile_id.to_string(),
            platform,
            platform_user_id: identity.platform_user_id,
            platform_username: identity.username,
            access_token_encrypted: Some(self.vault.encrypt(&tokens.access_token)?),
            refresh_token_encrypted: self
                .vault
                .encrypt_optional(tokens.refresh_token.as_deref())?,
            token_expires_at: tokens.expires_at,
            is_active: true,
            created_at: now,
            updated_at: now,
        };

        self.db.upsert_account(&account).await
    }

    /// Disconnect an account
    ///
    /// # Arguments
    /// * `hard` - Delete the row and everything hanging off it instead of
    ///   clearing `is_active`
    pub async fn disconnect(
        &self,
        user_id: &str,
        account_id: &str,
        hard: bool,
    ) -> Result<(), AppError> {
        let account = self.account(user_id, account_id).await?;

        let changed = if hard {
            self.db.delete_account(&account.id).await?
        } else {
            self.db.set_account_active(&account.id, false).await?
        };
        if !changed {
            return Err(AppError::NotFound);
        }

        tracing::info!(account_id = %account.id, hard, "Connection disconnected");
        Ok(())
    }

    /// Fetch one account now
    pub async fn refresh(&self, user_id: &str, account_id: &str) -> Result<AccountStatus, AppError> {
        let account = self.account(user_id, account_id).await?;
        if !account.is_active {
            return Err(AppError::BadRequest(
                "Connection is disconnected".to_string(),
            ));
        }

        let filters = self.db.list_filters(&account.id).await?;
        let slice = self
            .fetcher
            .refresh(&account, &ProfileFilterEngine::new(&filters), Utc::now())
            .await;

        Ok(AccountStatus {
            account_id: slice.account_id,
            platform: slice.platform,
            status: slice.status,
            item_count: slice.items.len(),
        })
    }

    /// Queue a refresh of every active account of a profile
    ///
    /// # Returns
    /// Ids of the accounts handed to the background dispatcher
    pub async fn refresh_all(
        &self,
        user_id: &str,
        profile_id: &str,
    ) -> Result<Vec<String>, AppError> {
        let profile = self.profile(user_id, profile_id).await?;
        let accounts = self.db.list_accounts(&profile.id, false).await?;

        let mut dispatched = Vec::with_capacity(accounts.len());
        for account in accounts {
            self.background
                .dispatch(BackgroundJob::RefreshAccount {
                    account_id: account.id.clone(),
                })
                .await;
            dispatched.push(account.id);
        }
        Ok(dispatched)
    }

    // =========================================================================
    // Settings
    // =========================================================================

    pub async fn get_settings(
        &self,
        user_id: &str,
        account_id: &str,
    ) -> Result<AccountSettings, AppError> {
        let account = self.account(user_id, account_id).await?;
        let pairs = self.db.get_account_settings(&account.id).await?;
        Ok(AccountSettings::from_pairs(account.platform, &pairs))
    }

    /// Apply a batch of setting changes
    ///
    /// Every entry is validated before anything is written. A `null` value
    /// resets the key to its default.
    ///
    /// # Returns
    /// The effective settings after the update
    pub async fn update_settings(
        &self,
        user_id: &str,
        account_id: &str,
        changes: Map<String, Value>,
    ) -> Result<AccountSettings, AppError> {
        let account = self.account(user_id, account_id).await?;

        let mut writes: Vec<(String, Option<String>)> = Vec::with_capacity(changes.len());
        for (key, value) in &changes {
            let stored = if value.is_null() {
                SettingKey::parse(key)
                    .filter(|k| k.valid_for(account.platform))
                    .ok_or_else(|| {
                        AppError::BadRequest(format!(
                            "Setting '{}' does not apply to {} accounts",
                            key, account.platform
                        ))
                    })?;
                None
            } else {
                Some(settings::validate(account.platform, key, value)?)
            };
            writes.push((key.clone(), stored));
        }

        self.db.apply_account_settings(&account.id, &writes).await?;

        let pairs = self.db.get_account_settings(&account.id).await?;
        Ok(AccountSettings::from_pairs(account.platform, &pairs))
    }

    // =========================================================================
    // Filters
    // =========================================================================

    pub async fn list_filters(
        &self,
        user_id: &str,
        account_id: &str,
    ) -> Result<Vec<Filter>, AppError> {
        let account = self.account(user_id, account_id).await?;
        self.db.list_filters(&account.id).await
    }

    /// Add an include or exclude filter
    ///
    /// # Errors
    /// `BadRequest` if the key does not apply to the account's platform or
    /// the value is empty or too long
    pub async fn add_filter(
        &self,
        user_id: &str,
        account_id: &str,
        input: NewFilter,
    ) -> Result<Filter, AppError> {
        let account = self.account(user_id, account_id).await?;

        if !input.filter_key.valid_for(account.platform) {
            return Err(AppError::BadRequest(format!(
                "Filter key '{}' does not apply to {} accounts",
                input.filter_key.as_str(),
                account.platform
            )));
        }
        let value = input.filter_value.trim();
        if value.is_empty() || value.chars().count() > MAX_FILTER_VALUE_LEN {
            return Err(AppError::BadRequest(format!(
                "filter_value must be 1-{} characters",
                MAX_FILTER_VALUE_LEN
            )));
        }

        let filter = Filter {
            id: EntityId::new().0,
            account_id: account.id,
            filter_type: input.filter_type,
            filter_key: input.filter_key,
            filter_value: value.to_string(),
            created_at: Utc::now(),
        };
        self.db.insert_filter(&filter).await?;
        Ok(filter)
    }

    pub async fn remove_filter(
        &self,
        user_id: &str,
        account_id: &str,
        filter_id: &str,
    ) -> Result<(), AppError> {
        let account = self.account(user_id, account_id).await?;
        if !self.db.delete_filter(&account.id, filter_id).await? {
            return Err(AppError::NotFound);
        }
        Ok(())
    }
}
