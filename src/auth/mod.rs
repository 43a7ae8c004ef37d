//! Credentials and caller authentication
//!
//! Handles:
//! - Token encryption at rest and API key hashing (vault)
//! - Opaque OAuth state capsules
//! - Platform OAuth client (authorize, exchange, refresh, identity)
//! - API key authentication extractor

mod middleware;
pub mod oauth_state;
pub mod platform;
pub mod vault;

pub use middleware::CurrentUser;
pub use oauth_state::{OAuthState, StateError};
pub use platform::{HttpOAuthClient, OAuthClient, PlatformIdentity, TokenSet};
pub use vault::{CredentialVault, VaultKey};

use chrono::Utc;

use crate::data::{ApiKey, Database, EntityId};
use crate::error::AppError;

/// Issue an API key for a user
///
/// # Returns
/// The plaintext key. Only its hash is stored, so it cannot be shown again.
pub async fn issue_api_key(
    db: &Database,
    vault: &CredentialVault,
    user_id: &str,
    name: &str,
) -> Result<String, AppError> {
    let (plaintext, key_hash) = vault.generate_api_key()?;
    db.insert_api_key(&ApiKey {
        id: EntityId::new().0,
        user_id: user_id.to_string(),
        name: name.to_string(),
        key_hash,
        created_at: Utc::now(),
    })
    .await?;

    tracing::info!(user_id, key_name = name, "API key issued");
    Ok(plaintext)
}
