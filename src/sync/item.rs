//! Canonical timeline model
//!
//! Every platform payload is normalized into [`TimelineItem`]. Item ids are
//! platform-prefixed and derived from upstream ids only, so normalizing the
//! same payload twice yields identical items and ids double as dedup keys.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::data::Platform;

/// Raw provider output, stored verbatim in snapshots
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPayload {
    pub platform: Platform,
    pub fetched_at: DateTime<Utc>,
    pub data: serde_json::Value,
}

impl RawPayload {
    pub fn new(platform: Platform, data: serde_json::Value) -> Self {
        Self {
            platform,
            fetched_at: Utc::now(),
            data,
        }
    }
}

/// Task tracker status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Done,
    Unknown,
}

/// Task tracker priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
    Unknown,
}

/// One commit inside a grouped push
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRef {
    pub sha: Option<String>,
    pub message: String,
}

/// Type-specific part of a timeline item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ItemPayload {
    /// A push, folding all of its commits into one entry
    Commit {
        repo: String,
        branch: Option<String>,
        commit_count: u32,
        commits: Vec<CommitRef>,
    },
    PullRequest {
        repo: String,
        number: Option<u64>,
        action: Option<String>,
        state: Option<String>,
        merged: bool,
    },
    Issue {
        repo: String,
        number: Option<u64>,
        action: Option<String>,
    },
    Post {
        subreddit: String,
        author: Option<String>,
        score: i64,
        comment_count: i64,
        content: Option<String>,
    },
    Comment {
        subreddit: String,
        author: Option<String>,
        score: i64,
        body: String,
        parent_title: Option<String>,
    },
    Tweet {
        author: Option<String>,
        text: String,
        likes: i64,
        retweets: i64,
        replies: i64,
        /// Handles of retweeted, quoted and replied-to accounts
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        referenced_accounts: Vec<String>,
    },
    Video {
        channel: Option<String>,
        description: Option<String>,
        thumbnail_url: Option<String>,
    },
    Task {
        project: Option<String>,
        status: TaskStatus,
        priority: TaskPriority,
        description: Option<String>,
    },
}

impl ItemPayload {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Commit { .. } => "commit",
            Self::PullRequest { .. } => "pull_request",
            Self::Issue { .. } => "issue",
            Self::Post { .. } => "post",
            Self::Comment { .. } => "comment",
            Self::Tweet { .. } => "tweet",
            Self::Video { .. } => "video",
            Self::Task { .. } => "task",
        }
    }

    /// Repository full name ("owner/name") for code-hosting items
    pub fn repo(&self) -> Option<&str> {
        match self {
            Self::Commit { repo, .. } | Self::PullRequest { repo, .. } | Self::Issue { repo, .. } => {
                Some(repo)
            }
            _ => None,
        }
    }

    pub fn subreddit(&self) -> Option<&str> {
        match self {
            Self::Post { subreddit, .. } | Self::Comment { subreddit, .. } => Some(subreddit),
            _ => None,
        }
    }

    pub fn author(&self) -> Option<&str> {
        match self {
            Self::Post { author, .. } | Self::Comment { author, .. } | Self::Tweet { author, .. } => {
                author.as_deref()
            }
            _ => None,
        }
    }

    /// Accounts a tweet is about
    ///
    /// The referenced accounts of a retweet, quote or reply, otherwise the
    /// author of an original tweet.
    pub fn twitter_accounts(&self) -> Vec<&str> {
        match self {
            Self::Tweet {
                author,
                referenced_accounts,
                ..
            } => {
                if referenced_accounts.is_empty() {
                    author.as_deref().into_iter().collect()
                } else {
                    referenced_accounts.iter().map(String::as_str).collect()
                }
            }
            _ => Vec::new(),
        }
    }

    /// Free text beyond the title that keyword filters search
    pub fn text_fields(&self) -> Vec<&str> {
        match self {
            Self::Commit { commits, .. } => commits.iter().map(|c| c.message.as_str()).collect(),
            Self::Post { content, .. } => content.as_deref().into_iter().collect(),
            Self::Comment {
                body, parent_title, ..
            } => std::iter::once(body.as_str())
                .chain(parent_title.as_deref())
                .collect(),
            Self::Tweet { text, .. } => vec![text.as_str()],
            Self::Video { description, .. } | Self::Task { description, .. } => {
                description.as_deref().into_iter().collect()
            }
            Self::PullRequest { .. } | Self::Issue { .. } => Vec::new(),
        }
    }
}

/// Canonical, platform-agnostic timeline entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineItem {
    /// Platform-prefixed stable id, also the dedup key
    pub id: String,
    pub platform: Platform,
    pub timestamp: DateTime<Utc>,
    pub title: String,
    pub url: Option<String>,
    #[serde(flatten)]
    pub payload: ItemPayload,
}

impl TimelineItem {
    pub fn item_type(&self) -> &'static str {
        self.payload.type_name()
    }
}

/// Global timeline order: newest first, then platform name, then id
pub fn compare_items(a: &TimelineItem, b: &TimelineItem) -> Ordering {
    compare_keys(
        (&a.timestamp, a.platform.as_str(), &a.id),
        (&b.timestamp, b.platform.as_str(), &b.id),
    )
}

/// Same order over bare sort keys (used by pagination cursors)
pub fn compare_keys(
    a: (&DateTime<Utc>, &str, &str),
    b: (&DateTime<Utc>, &str, &str),
) -> Ordering {
    b.0.cmp(a.0).then_with(|| a.1.cmp(b.1)).then_with(|| a.2.cmp(b.2))
}

/// Sort a slice into global timeline order
pub fn sort_items(items: &mut [TimelineItem]) {
    items.sort_by(compare_items);
}
