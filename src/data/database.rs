//! SQLite database operations
//!
//! All database access goes through this module.
//! Account, rate-limit and snapshot writes are single-row upserts so
//! concurrent requests resolve as last-writer-wins per account.

use chrono::{DateTime, Utc};
use sqlx::{Pool, QueryBuilder, Sqlite, SqlitePool};
use std::path::Path;

use super::models::*;
use crate::error::AppError;

fn is_unique_violation(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Database(db_error) => db_error.is_unique_violation(),
        _ => false,
    }
}

/// Database connection pool wrapper.
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    // =========================================================================
    // Connection
    // =========================================================================

    /// Connect to SQLite database
    ///
    /// Creates the database file if it doesn't exist.
    /// Runs pending migrations automatically.
    ///
    /// # Errors
    /// Returns error if connection or migration fails
    pub async fn connect(path: &Path) -> Result<Self, AppError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AppError::Database(sqlx::Error::Io(e)))?;
        }

        let connection_string = format!("sqlite:{}?mode=rwc", path.display());
        let pool = SqlitePool::connect(&connection_string).await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| {
                tracing::error!("Migration failed: {}", e);
                AppError::Internal(anyhow::anyhow!("Migration failed: {}", e))
            })?;

        tracing::info!("Database connected and migrated successfully");

        Ok(Self { pool })
    }

    // =========================================================================
    // Users and API keys
    // =========================================================================

    pub async fn create_user(&self, name: &str) -> Result<User, AppError> {
        let user = User {
            id: EntityId::new().0,
            name: name.to_string(),
            created_at: Utc::now(),
        };

        sqlx::query("INSERT INTO users (id, name, created_at) VALUES (?, ?, ?)")
            .bind(&user.id)
            .bind(&user.name)
            .bind(user.created_at)
            .execute(&self.pool)
            .await?;

        Ok(user)
    }

    pub async fn get_user(&self, id: &str) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(user)
    }

    /// Store an API key record (hash only)
    pub async fn insert_api_key(&self, key: &ApiKey) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO api_keys (id, user_id, name, key_hash, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&key.id)
        .bind(&key.user_id)
        .bind(&key.name)
        .bind(&key.key_hash)
        .bind(key.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Resolve the user owning an API key, looked up by its hash
    pub async fn get_user_by_api_key_hash(&self, key_hash: &str) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT users.* FROM users
            JOIN api_keys ON api_keys.user_id = users.id
            WHERE api_keys.key_hash = ?
            "#,
        )
        .bind(key_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    // =========================================================================
    // Profiles
    // =========================================================================

    /// Insert a profile
    ///
    /// # Errors
    /// `Conflict` if the user already has a profile with this slug
    pub async fn insert_profile(&self, profile: &Profile) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO profiles (id, user_id, slug, name, description, theme, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&profile.id)
        .bind(&profile.user_id)
        .bind(&profile.slug)
        .bind(&profile.name)
        .bind(&profile.description)
        .bind(&profile.theme)
        .bind(profile.created_at)
        .bind(profile.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            if is_unique_violation(&error) {
                AppError::Conflict(format!("Profile slug '{}' already exists", profile.slug))
            } else {
                AppError::Database(error)
            }
        })?;

        Ok(())
    }

    /// Get a profile owned by the given user
    pub async fn get_profile_for_user(
        &self,
        user_id: &str,
        profile_id: &str,
    ) -> Result<Option<Profile>, AppError> {
        let profile =
            sqlx::query_as::<_, Profile>("SELECT * FROM profiles WHERE id = ? AND user_id = ?")
                .bind(profile_id)
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(profile)
    }

    pub async fn list_profiles(&self, user_id: &str) -> Result<Vec<Profile>, AppError> {
        let profiles = sqlx::query_as::<_, Profile>(
            "SELECT * FROM profiles WHERE user_id = ? ORDER BY created_at ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(profiles)
    }

    /// Update mutable profile fields
    pub async fn update_profile(&self, profile: &Profile) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE profiles
            SET slug = ?, name = ?, description = ?, theme = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&profile.slug)
        .bind(&profile.name)
        .bind(&profile.description)
        .bind(&profile.theme)
        .bind(profile.updated_at)
        .bind(&profile.id)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            if is_unique_violation(&error) {
                AppError::Conflict(format!("Profile slug '{}' already exists", profile.slug))
            } else {
                AppError::Database(error)
            }
        })?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete a profile; accounts and their dependents cascade
    pub async fn delete_profile(&self, profile_id: &str) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM profiles WHERE id = ?")
            .bind(profile_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Accounts
    // =========================================================================

    pub async fn get_account(&self, id: &str) -> Result<Option<Account>, AppError> {
        let account = sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(account)
    }

    /// Get an account if it belongs to one of the user's profiles
    pub async fn get_account_for_user(
        &self,
        user_id: &str,
        account_id: &str,
    ) -> Result<Option<Account>, AppError> {
        let account = sqlx::query_as::<_, Account>(
            r#"
            SELECT accounts.* FROM accounts
            JOIN profiles ON profiles.id = accounts.profile_id
            WHERE accounts.id = ? AND profiles.user_id = ?
            "#,
        )
        .bind(account_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(account)
    }

    /// List accounts of a profile
    ///
    /// # Arguments
    /// * `include_inactive` - Also return disconnected accounts
    pub async fn list_accounts(
        &self,
        profile_id: &str,
        include_inactive: bool,
    ) -> Result<Vec<Account>, AppError> {
        let sql = if include_inactive {
            "SELECT * FROM accounts WHERE profile_id = ? ORDER BY created_at ASC"
        } else {
            "SELECT * FROM accounts WHERE profile_id = ? AND is_active = 1 ORDER BY created_at ASC"
        };

        let accounts = sqlx::query_as::<_, Account>(sql)
            .bind(profile_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(accounts)
    }

    /// Insert an account, or refresh it in place
    ///
    /// Keyed by (profile_id, platform, platform_user_id). An existing row
    /// keeps its id and creation time, gets the new tokens and is
    /// re-activated.
    ///
    /// # Returns
    /// The stored row
    pub async fn upsert_account(&self, account: &Account) -> Result<Account, AppError> {
        let stored = sqlx::query_as::<_, Account>(
            r#"
            INSERT INTO accounts (
                id, profile_id, platform, platform_user_id, platform_username,
                access_token_encrypted, refresh_token_encrypted, token_expires_at,
                is_active, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (profile_id, platform, platform_user_id) DO UPDATE SET
                platform_username = excluded.platform_username,
                access_token_encrypted = excluded.access_token_encrypted,
                refresh_token_encrypted = COALESCE(excluded.refresh_token_encrypted, accounts.refresh_token_encrypted),
                token_expires_at = excluded.token_expires_at,
                is_active = excluded.is_active,
                updated_at = excluded.updated_at
            RETURNING *
            "#,
        )
        .bind(&account.id)
        .bind(&account.profile_id)
        .bind(account.platform)
        .bind(&account.platform_user_id)
        .bind(&account.platform_username)
        .bind(&account.access_token_encrypted)
        .bind(&account.refresh_token_encrypted)
        .bind(account.token_expires_at)
        .bind(account.is_active)
        .bind(account.created_at)
        .bind(account.updated_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(stored)
    }

    /// Replace the stored tokens of an account after a refresh
    pub async fn update_account_tokens(
        &self,
        account_id: &str,
        access_token_encrypted: &str,
        refresh_token_encrypted: Option<&str>,
        token_expires_at: Option<DateTime<Utc>>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET access_token_encrypted = ?,
                refresh_token_encrypted = COALESCE(?, refresh_token_encrypted),
                token_expires_at = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(access_token_encrypted)
        .bind(refresh_token_encrypted)
        .bind(token_expires_at)
        .bind(Utc::now())
        .bind(account_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Flip the active flag (soft disconnect / reconnect)
    pub async fn set_account_active(&self, account_id: &str, active: bool) -> Result<bool, AppError> {
        let result = sqlx::query("UPDATE accounts SET is_active = ?, updated_at = ? WHERE id = ?")
            .bind(active)
            .bind(Utc::now())
            .bind(account_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Remove an account row together with its dependents
    pub async fn delete_account(&self, account_id: &str) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM accounts WHERE id = ?")
            .bind(account_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // =========================================================================
    // Account settings
    // =========================================================================

    pub async fn get_account_settings(
        &self,
        account_id: &str,
    ) -> Result<Vec<(String, String)>, AppError> {
        let settings = sqlx::query_as::<_, (String, String)>(
            "SELECT key, value FROM account_settings WHERE account_id = ? ORDER BY key ASC",
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(settings)
    }

    pub async fn set_account_setting(
        &self,
        account_id: &str,
        key: &str,
        value: &str,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO account_settings (account_id, key, value, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (account_id, key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(account_id)
        .bind(key)
        .bind(value)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Write a batch of settings in one transaction
    ///
    /// `None` removes the key. Either every change is stored or none is.
    pub async fn apply_account_settings(
        &self,
        account_id: &str,
        changes: &[(String, Option<String>)],
    ) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        for (key, value) in changes {
            match value {
                Some(value) => {
                    sqlx::query(
                        r#"
                        INSERT INTO account_settings (account_id, key, value, updated_at)
                        VALUES (?, ?, ?, ?)
                        ON CONFLICT (account_id, key) DO UPDATE SET
                            value = excluded.value,
                            updated_at = excluded.updated_at
                        "#,
                    )
                    .bind(account_id)
                    .bind(key)
                    .bind(value)
                    .bind(now)
                    .execute(&mut *tx)
                    .await?;
                }
                None => {
                    sqlx::query("DELETE FROM account_settings WHERE account_id = ? AND key = ?")
                        .bind(account_id)
                        .bind(key)
                        .execute(&mut *tx)
                        .await?;
                }
            }
        }

        tx.commit().await?;
        Ok(())
    }

    // =========================================================================
    // Filters
    // =========================================================================

    pub async fn insert_filter(&self, filter: &Filter) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO filters (id, account_id, filter_type, filter_key, filter_value, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&filter.id)
        .bind(&filter.account_id)
        .bind(filter.filter_type)
        .bind(filter.filter_key)
        .bind(&filter.filter_value)
        .bind(filter.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn list_filters(&self, account_id: &str) -> Result<Vec<Filter>, AppError> {
        let filters = sqlx::query_as::<_, Filter>(
            "SELECT * FROM filters WHERE account_id = ? ORDER BY created_at ASC",
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(filters)
    }

    /// Filters for a batch of accounts in one query
    pub async fn list_filters_for_accounts(
        &self,
        account_ids: &[String],
    ) -> Result<Vec<Filter>, AppError> {
        if account_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder = QueryBuilder::<Sqlite>::new("SELECT * FROM filters WHERE account_id IN (");
        {
            let mut separated = builder.separated(", ");
            for account_id in account_ids {
                separated.push_bind(account_id);
            }
        }
        builder.push(") ORDER BY created_at ASC");

        let filters = builder
            .build_query_as::<Filter>()
            .fetch_all(&self.pool)
            .await?;

        Ok(filters)
    }

    /// Delete a filter scoped to its account
    pub async fn delete_filter(&self, account_id: &str, filter_id: &str) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM filters WHERE id = ? AND account_id = ?")
            .bind(filter_id)
            .bind(account_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Rate limit state
    // =========================================================================

    pub async fn get_rate_limit(&self, account_id: &str) -> Result<Option<RateLimitState>, AppError> {
        let state =
            sqlx::query_as::<_, RateLimitState>("SELECT * FROM rate_limits WHERE account_id = ?")
                .bind(account_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(state)
    }

    pub async fn upsert_rate_limit(&self, state: &RateLimitState) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO rate_limits (
                account_id, consecutive_failures, last_failure_at, last_success_at, circuit_open_until
            ) VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (account_id) DO UPDATE SET
                consecutive_failures = excluded.consecutive_failures,
                last_failure_at = excluded.last_failure_at,
                last_success_at = excluded.last_success_at,
                circuit_open_until = excluded.circuit_open_until
            "#,
        )
        .bind(&state.account_id)
        .bind(state.consecutive_failures)
        .bind(state.last_failure_at)
        .bind(state.last_success_at)
        .bind(state.circuit_open_until)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    pub async fn get_snapshot(&self, account_id: &str) -> Result<Option<AccountSnapshot>, AppError> {
        let snapshot = sqlx::query_as::<_, AccountSnapshot>(
            "SELECT * FROM account_snapshots WHERE account_id = ?",
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(snapshot)
    }

    pub async fn upsert_snapshot(&self, snapshot: &AccountSnapshot) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO account_snapshots (account_id, payload, fetched_at)
            VALUES (?, ?, ?)
            ON CONFLICT (account_id) DO UPDATE SET
                payload = excluded.payload,
                fetched_at = excluded.fetched_at
            "#,
        )
        .bind(&snapshot.account_id)
        .bind(&snapshot.payload)
        .bind(snapshot.fetched_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // =========================================================================
    // OAuth nonces
    // =========================================================================

    /// Record a state nonce as used
    ///
    /// # Returns
    /// `true` on first use, `false` if the nonce was already consumed
    pub async fn consume_oauth_nonce(&self, nonce: &str) -> Result<bool, AppError> {
        let result =
            sqlx::query("INSERT OR IGNORE INTO oauth_nonces (nonce, consumed_at) VALUES (?, ?)")
                .bind(nonce)
                .bind(Utc::now())
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Drop nonces older than the state lifetime; they can no longer replay
    ///
    /// Timestamps are stored as RFC 3339 UTC text, which orders lexically.
    pub async fn prune_oauth_nonces(&self, older_than: DateTime<Utc>) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM oauth_nonces WHERE consumed_at < ?")
            .bind(older_than)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    // =========================================================================
    // Tasks
    // =========================================================================

    pub async fn insert_task(&self, task: &Task) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO tasks (id, user_id, project, title, description, status, priority, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&task.id)
        .bind(&task.user_id)
        .bind(&task.project)
        .bind(&task.title)
        .bind(&task.description)
        .bind(&task.status)
        .bind(&task.priority)
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Most recently updated tasks of a user
    pub async fn get_recent_tasks(
        &self,
        user_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Task>, AppError> {
        let tasks = sqlx::query_as::<_, Task>(
            "SELECT * FROM tasks WHERE user_id = ? ORDER BY updated_at DESC, id ASC LIMIT ? OFFSET ?",
        )
        .bind(user_id)
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(tasks)
    }
}
