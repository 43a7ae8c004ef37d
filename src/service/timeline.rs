//! Timeline service
//!
//! Assembles a profile's timeline: one concurrent slice per account,
//! combined into global order, paginated by cursor and grouped by day.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Ordering;
use std::sync::Arc;

use super::fetcher::{AccountFetcher, SliceStatus};
use crate::config::TimelineConfig;
use crate::data::{Database, Platform};
use crate::error::AppError;
use crate::sync::item::compare_keys;
use crate::sync::{
    BackgroundDispatcher, BackgroundJob, DateGroup, ProfileFilterEngine, TimelineItem, combine,
    group_by_date,
};

/// Position of the last item of a page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelineCursor {
    pub timestamp: DateTime<Utc>,
    pub platform: Platform,
    pub id: String,
}

impl TimelineCursor {
    pub fn after(item: &TimelineItem) -> Self {
        Self {
            timestamp: item.timestamp,
            platform: item.platform,
            id: item.id.clone(),
        }
    }

    /// base64url of `<rfc3339>|<platform>|<id>`
    pub fn encode(&self) -> String {
        let raw = format!(
            "{}|{}|{}",
            self.timestamp.to_rfc3339(),
            self.platform.as_str(),
            self.id
        );
        URL_SAFE_NO_PAD.encode(raw)
    }

    /// # Errors
    /// `BadRequest` if the cursor was not produced by [`encode`](Self::encode)
    pub fn decode(cursor: &str) -> Result<Self, AppError> {
        let invalid = || AppError::BadRequest("Invalid cursor".to_string());

        let bytes = URL_SAFE_NO_PAD.decode(cursor.trim()).map_err(|_| invalid())?;
        let raw = String::from_utf8(bytes).map_err(|_| invalid())?;

        let mut parts = raw.splitn(3, '|');
        let (Some(timestamp), Some(platform), Some(id)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };
        if id.is_empty() {
            return Err(invalid());
        }

        Ok(Self {
            timestamp: DateTime::parse_from_rfc3339(timestamp)
                .map_err(|_| invalid())?
                .with_timezone(&Utc),
            platform: platform.parse().map_err(|_| invalid())?,
            id: id.to_string(),
        })
    }

    /// Whether `item` sorts strictly after this position
    pub fn precedes(&self, item: &TimelineItem) -> bool {
        compare_keys(
            (&self.timestamp, self.platform.as_str(), &self.id),
            (&item.timestamp, item.platform.as_str(), &item.id),
        ) == Ordering::Less
    }
}

/// Fetch outcome of one account in a timeline response
#[derive(Debug, Clone, Serialize)]
pub struct AccountStatus {
    pub account_id: String,
    pub platform: Platform,
    #[serde(flatten)]
    pub status: SliceStatus,
    pub item_count: usize,
}

/// One page of a profile timeline
#[derive(Debug, Clone, Serialize)]
pub struct TimelinePage {
    pub profile_id: String,
    pub groups: Vec<DateGroup>,
    pub next_cursor: Option<String>,
    pub accounts: Vec<AccountStatus>,
}

/// Timeline service
pub struct TimelineService {
    db: Arc<Database>,
    fetcher: Arc<AccountFetcher>,
    background: Arc<BackgroundDispatcher>,
    config: TimelineConfig,
}

impl TimelineService {
    /// Create new timeline service
    pub fn new(
        db: Arc<Database>,
        fetcher: Arc<AccountFetcher>,
        background: Arc<BackgroundDispatcher>,
        config: TimelineConfig,
    ) -> Self {
        Self {
            db,
            fetcher,
            background,
            config,
        }
    }

    /// Get a profile's timeline
    ///
    /// Accounts are loaded concurrently; a failing account contributes an
    /// empty slice and an error status. Accounts served from a stale
    /// snapshot get a background refresh.
    ///
    /// # Arguments
    /// * `cursor` - `next_cursor` of the previous page
    /// * `limit` - Maximum items (default and cap from configuration)
    ///
    /// # Errors
    /// `NotFound` if the user does not own the profile, `BadRequest` for a
    /// malformed cursor
    pub async fn get_timeline(
        &self,
        user_id: &str,
        profile_id: &str,
        cursor: Option<&str>,
        limit: Option<usize>,
    ) -> Result<TimelinePage, AppError> {
        let profile = self
            .db
            .get_profile_for_user(user_id, profile_id)
            .await?
            .ok_or(AppError::NotFound)?;

        let cursor = cursor
            .filter(|c| !c.trim().is_empty())
            .map(TimelineCursor::decode)
            .transpose()?;
        let limit = limit
            .unwrap_or(self.config.default_limit)
            .clamp(1, self.config.max_limit);

        let accounts = self.db.list_accounts(&profile.id, false).await?;
        let account_ids: Vec<String> = accounts.iter().map(|a| a.id.clone()).collect();
        let filters = self.db.list_filters_for_accounts(&account_ids).await?;
        let engine = ProfileFilterEngine::new(&filters);

        let now = Utc::now();
        let slices = futures::future::join_all(
            accounts
                .iter()
                .map(|account| self.fetcher.load_slice(account, &engine, now)),
        )
        .await;

        for slice in slices.iter().filter(|slice| slice.needs_refresh()) {
            self.background
                .dispatch(BackgroundJob::RefreshAccount {
                    account_id: slice.account_id.clone(),
                })
                .await;
        }

        let mut statuses = Vec::with_capacity(slices.len());
        let mut lists = Vec::with_capacity(slices.len());
        for slice in slices {
            statuses.push(AccountStatus {
                account_id: slice.account_id,
                platform: slice.platform,
                status: slice.status,
                item_count: slice.items.len(),
            });
            lists.push(slice.items);
        }

        let (page, next_cursor) = paginate(combine(lists), cursor.as_ref(), limit);

        tracing::debug!(
            profile_id = %profile.id,
            accounts = statuses.len(),
            items = page.len(),
            "Timeline assembled"
        );

        Ok(TimelinePage {
            profile_id: profile.id,
            groups: group_by_date(page),
            next_cursor,
            accounts: statuses,
        })
    }
}

/// Items strictly after the cursor, at most `limit`, plus the next cursor
fn paginate(
    items: Vec<TimelineItem>,
    cursor: Option<&TimelineCursor>,
    limit: usize,
) -> (Vec<TimelineItem>, Option<String>) {
    let mut page: Vec<TimelineItem> = items
        .into_iter()
        .filter(|item| cursor.is_none_or(|c| c.precedes(item)))
        .take(limit + 1)
        .collect();

    let has_more = page.len() > limit;
    page.truncate(limit);
    let next_cursor = if has_more {
        page.last().map(|item| TimelineCursor::after(item).encode())
    } else {
        None
    };

    (page, next_cursor)
}
