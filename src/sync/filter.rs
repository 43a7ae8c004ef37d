//! Profile filter engine
//!
//! Filters belong to an account and only see that account's items. If an
//! account has any include filter, its items must match at least one
//! include filter to survive. An item matching any exclude filter is
//! dropped regardless of includes.
//!
//! `twitter_account` rules match the accounts a tweet retweets, quotes or
//! replies to, and an original tweet by its author.

use std::collections::HashMap;

use super::item::TimelineItem;
use crate::data::{Filter, FilterKey, FilterType};

/// A single normalized rule
#[derive(Debug, Clone, PartialEq, Eq)]
struct Rule {
    key: FilterKey,
    /// Lowercased and stripped of decoration (`r/`, `@`)
    value: String,
}

impl Rule {
    fn new(key: FilterKey, raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        let value = match key {
            FilterKey::Subreddit => {
                let lower = trimmed.to_lowercase();
                lower
                    .strip_prefix("/r/")
                    .or_else(|| lower.strip_prefix("r/"))
                    .unwrap_or(&lower)
                    .to_string()
            }
            FilterKey::TwitterAccount => trimmed.trim_start_matches('@').to_lowercase(),
            FilterKey::Repo | FilterKey::Keyword => trimmed.to_lowercase(),
        };
        (!value.is_empty()).then_some(Self { key, value })
    }

    fn matches(&self, item: &TimelineItem) -> bool {
        match self.key {
            FilterKey::Repo => item
                .payload
                .repo()
                .is_some_and(|repo| repo_matches(&self.value, repo)),
            FilterKey::Subreddit => item.payload.subreddit().is_some_and(|subreddit| {
                subreddit.trim_start_matches("r/").to_lowercase() == self.value
            }),
            FilterKey::TwitterAccount => item
                .payload
                .twitter_accounts()
                .iter()
                .any(|handle| handle.trim_start_matches('@').to_lowercase() == self.value),
            FilterKey::Keyword => {
                item.title.to_lowercase().contains(&self.value)
                    || item
                        .payload
                        .text_fields()
                        .iter()
                        .any(|text| text.to_lowercase().contains(&self.value))
            }
        }
    }
}

/// Repository match
///
/// `owner/name` matches exactly (case-insensitive), a bare `name` matches
/// any owner's repository of that name, and a value ending in `/` or `/*`
/// matches every repository under that owner.
fn repo_matches(pattern: &str, repo: &str) -> bool {
    let repo = repo.to_lowercase();

    if let Some(owner) = pattern
        .strip_suffix("/*")
        .or_else(|| pattern.strip_suffix('/'))
    {
        return repo
            .split_once('/')
            .is_some_and(|(repo_owner, _)| repo_owner == owner);
    }

    if pattern.contains('/') {
        return repo == pattern;
    }

    repo.rsplit('/').next() == Some(pattern)
}

#[derive(Debug, Default, Clone)]
struct AccountRules {
    include: Vec<Rule>,
    exclude: Vec<Rule>,
}

impl AccountRules {
    fn keep(&self, item: &TimelineItem) -> bool {
        if self.exclude.iter().any(|rule| rule.matches(item)) {
            return false;
        }
        self.include.is_empty() || self.include.iter().any(|rule| rule.matches(item))
    }
}

/// Per-account include/exclude rules for one profile
#[derive(Debug, Default, Clone)]
pub struct ProfileFilterEngine {
    accounts: HashMap<String, AccountRules>,
}

impl ProfileFilterEngine {
    pub fn new(filters: &[Filter]) -> Self {
        let mut accounts: HashMap<String, AccountRules> = HashMap::new();
        for filter in filters {
            let Some(rule) = Rule::new(filter.filter_key, &filter.filter_value) else {
                continue;
            };
            let rules = accounts.entry(filter.account_id.clone()).or_default();
            match filter.filter_type {
                FilterType::Include => rules.include.push(rule),
                FilterType::Exclude => rules.exclude.push(rule),
            }
        }
        Self { accounts }
    }

    /// Whether an item of the given account survives filtering
    pub fn keep(&self, account_id: &str, item: &TimelineItem) -> bool {
        self.accounts
            .get(account_id)
            .is_none_or(|rules| rules.keep(item))
    }

    /// Filter one account's items, preserving order
    pub fn apply(&self, account_id: &str, items: Vec<TimelineItem>) -> Vec<TimelineItem> {
        match self.accounts.get(account_id) {
            Some(rules) => items.into_iter().filter(|item| rules.keep(item)).collect(),
            None => items,
        }
    }
}

/// Apply one account's filters to its items
pub fn apply(account_id: &str, items: Vec<TimelineItem>, filters: &[Filter]) -> Vec<TimelineItem> {
    ProfileFilterEngine::new(filters).apply(account_id, items)
}
