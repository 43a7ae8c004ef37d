//! Profile service
//!
//! Profiles are named views over a subset of a user's accounts.

use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;

use crate::data::{Database, EntityId, Profile};
use crate::error::AppError;

const MAX_SLUG_LEN: usize = 64;
const MAX_NAME_LEN: usize = 100;

fn normalize_optional_text(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Lowercase ASCII letters, digits and '-', 1..=64 characters
fn validate_slug(slug: &str) -> Result<String, AppError> {
    let slug = slug.trim();
    let valid = !slug.is_empty()
        && slug.len() <= MAX_SLUG_LEN
        && !slug.starts_with('-')
        && slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');

    if valid {
        Ok(slug.to_string())
    } else {
        Err(AppError::BadRequest(format!(
            "slug must be 1-{} lowercase letters, digits or '-'",
            MAX_SLUG_LEN
        )))
    }
}

fn validate_name(name: &str) -> Result<String, AppError> {
    let name = name.trim();
    if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
        return Err(AppError::BadRequest(format!(
            "name must be 1-{} characters",
            MAX_NAME_LEN
        )));
    }
    Ok(name.to_string())
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewProfile {
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub theme: Option<String>,
}

/// Partial update; an empty description or theme clears it
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfilePatch {
    pub slug: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub theme: Option<String>,
}

/// Profile service
pub struct ProfileService {
    db: Arc<Database>,
}

impl ProfileService {
    /// Create new profile service
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub async fn list(&self, user_id: &str) -> Result<Vec<Profile>, AppError> {
        self.db.list_profiles(user_id).await
    }

    pub async fn get(&self, user_id: &str, profile_id: &str) -> Result<Profile, AppError> {
        self.db
            .get_profile_for_user(user_id, profile_id)
            .await?
            .ok_or(AppError::NotFound)
    }

    /// Create a profile
    ///
    /// # Errors
    /// * `BadRequest` - invalid slug or name
    /// * `Conflict` - the user already has a profile with this slug
    pub async fn create(&self, user_id: &str, input: NewProfile) -> Result<Profile, AppError> {
        let now = Utc::now();
        let profile = Profile {
            id: EntityId::new().0,
            user_id: user_id.to_string(),
            slug: validate_slug(&input.slug)?,
            name: validate_name(&input.name)?,
            description: input.description.and_then(normalize_optional_text),
            theme: input.theme.and_then(normalize_optional_text),
            created_at: now,
            updated_at: now,
        };

        self.db.insert_profile(&profile).await?;
        tracing::info!(profile_id = %profile.id, slug = %profile.slug, "Profile created");
        Ok(profile)
    }

    pub async fn update(
        &self,
        user_id: &str,
        profile_id: &str,
        patch: ProfilePatch,
    ) -> Result<Profile, AppError> {
        let mut profile = self.get(user_id, profile_id).await?;

        if let Some(slug) = patch.slug {
            profile.slug = validate_slug(&slug)?;
        }
        if let Some(name) = patch.name {
            profile.name = validate_name(&name)?;
        }
        if let Some(description) = patch.description {
            profile.description = normalize_optional_text(description);
        }
        if let Some(theme) = patch.theme {
            profile.theme = normalize_optional_text(theme);
        }
        profile.updated_at = Utc::now();

        if !self.db.update_profile(&profile).await? {
            return Err(AppError::NotFound);
        }
        Ok(profile)
    }

    /// Delete a profile with its accounts, filters and cached state
    pub async fn delete(&self, user_id: &str, profile_id: &str) -> Result<(), AppError> {
        let profile = self.get(user_id, profile_id).await?;
        if !self.db.delete_profile(&profile.id).await? {
            return Err(AppError::NotFound);
        }
        tracing::info!(profile_id = %profile.id, "Profile deleted");
        Ok(())
    }
}
