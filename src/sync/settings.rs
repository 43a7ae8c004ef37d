//! Per-account display settings
//!
//! Stored as string key/value rows. Unknown keys and unparseable values
//! are ignored on read; writes are validated against the account's
//! platform.

use serde::Serialize;
use serde_json::Value;

use super::item::{ItemPayload, TaskStatus, TimelineItem};
use crate::data::Platform;
use crate::error::AppError;

pub const MAX_ITEMS_LIMIT: u64 = 500;

/// Known setting keys
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingKey {
    IncludeComments,
    IncludePullRequests,
    IncludeIssues,
    IncludeCompleted,
    MaxItems,
}

impl SettingKey {
    pub const ALL: [SettingKey; 5] = [
        SettingKey::IncludeComments,
        SettingKey::IncludePullRequests,
        SettingKey::IncludeIssues,
        SettingKey::IncludeCompleted,
        SettingKey::MaxItems,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IncludeComments => "include_comments",
            Self::IncludePullRequests => "include_pull_requests",
            Self::IncludeIssues => "include_issues",
            Self::IncludeCompleted => "include_completed",
            Self::MaxItems => "max_items",
        }
    }

    pub fn parse(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == key)
    }

    pub fn valid_for(&self, platform: Platform) -> bool {
        match self {
            Self::IncludeComments => platform == Platform::Reddit,
            Self::IncludePullRequests | Self::IncludeIssues => platform == Platform::Github,
            Self::IncludeCompleted => platform == Platform::Tasks,
            Self::MaxItems => true,
        }
    }
}

/// Effective settings of one account
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountSettings {
    pub include_comments: bool,
    pub include_pull_requests: bool,
    pub include_issues: bool,
    pub include_completed: bool,
    pub max_items: Option<usize>,
}

impl Default for AccountSettings {
    fn default() -> Self {
        Self {
            include_comments: true,
            include_pull_requests: true,
            include_issues: true,
            include_completed: true,
            max_items: None,
        }
    }
}

impl AccountSettings {
    /// Build from stored rows, skipping anything unknown or malformed
    pub fn from_pairs(platform: Platform, pairs: &[(String, String)]) -> Self {
        let mut settings = Self::default();
        for (key, value) in pairs {
            let Some(key) = SettingKey::parse(key).filter(|k| k.valid_for(platform)) else {
                continue;
            };
            let flag = match key {
                SettingKey::MaxItems => {
                    settings.max_items = value
                        .parse::<u64>()
                        .ok()
                        .filter(|n| (1..=MAX_ITEMS_LIMIT).contains(n))
                        .map(|n| n as usize)
                        .or(settings.max_items);
                    continue;
                }
                SettingKey::IncludeComments => &mut settings.include_comments,
                SettingKey::IncludePullRequests => &mut settings.include_pull_requests,
                SettingKey::IncludeIssues => &mut settings.include_issues,
                SettingKey::IncludeCompleted => &mut settings.include_completed,
            };
            if let Ok(enabled) = value.parse::<bool>() {
                *flag = enabled;
            }
        }
        settings
    }

    /// Drop items the settings hide, then cap the count
    pub fn apply(&self, items: Vec<TimelineItem>) -> Vec<TimelineItem> {
        let visible = items.into_iter().filter(|item| match &item.payload {
            ItemPayload::Comment { .. } => self.include_comments,
            ItemPayload::PullRequest { .. } => self.include_pull_requests,
            ItemPayload::Issue { .. } => self.include_issues,
            ItemPayload::Task { status, .. } => {
                self.include_completed || *status != TaskStatus::Done
            }
            _ => true,
        });

        match self.max_items {
            Some(max) => visible.take(max).collect(),
            None => visible.collect(),
        }
    }
}

/// Validate a setting write and render it for storage
///
/// # Errors
/// `BadRequest` for unknown keys, keys not applicable to the platform, or
/// values of the wrong type or range
pub fn validate(platform: Platform, key: &str, value: &Value) -> Result<String, AppError> {
    let setting = SettingKey::parse(key)
        .ok_or_else(|| AppError::BadRequest(format!("Unknown setting '{}'", key)))?;
    if !setting.valid_for(platform) {
        return Err(AppError::BadRequest(format!(
            "Setting '{}' does not apply to {} accounts",
            key, platform
        )));
    }

    match setting {
        SettingKey::MaxItems => {
            let n = value
                .as_u64()
                .filter(|n| (1..=MAX_ITEMS_LIMIT).contains(n))
                .ok_or_else(|| {
                    AppError::BadRequest(format!(
                        "'max_items' must be an integer between 1 and {}",
                        MAX_ITEMS_LIMIT
                    ))
                })?;
            Ok(n.to_string())
        }
        _ => value
            .as_bool()
            .map(|b| b.to_string())
            .ok_or_else(|| AppError::BadRequest(format!("'{}' must be a boolean", key))),
    }
}
