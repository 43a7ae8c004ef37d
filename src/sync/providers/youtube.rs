//! YouTube uploads provider

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use std::time::Duration;

use super::http::{array_at, send_json};
use super::{FetchContext, Provider, ProviderError};
use crate::data::Platform;
use crate::sync::item::RawPayload;

const DEFAULT_API_BASE: &str = "https://www.googleapis.com";
const PAGE_SIZE: &str = "50";

/// Fetches the authenticated channel's own videos via the search endpoint
///
/// Payload shape: `{"videos": [...search results...]}`.
pub struct YoutubeProvider {
    client: Client,
    api_base: String,
    timeout: Duration,
    max_pages: usize,
}

impl YoutubeProvider {
    pub fn new(
        client: Client,
        api_base: Option<String>,
        timeout: Duration,
        max_pages: usize,
    ) -> Self {
        Self {
            client,
            api_base: api_base
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string())
                .trim_end_matches('/')
                .to_string(),
            timeout,
            max_pages,
        }
    }
}

#[async_trait]
impl Provider for YoutubeProvider {
    fn platform(&self) -> Platform {
        Platform::Youtube
    }

    async fn fetch(&self, ctx: &FetchContext) -> Result<RawPayload, ProviderError> {
        let token = ctx.require_token()?;
        let url = format!("{}/youtube/v3/search", self.api_base);
        let mut videos: Vec<Value> = Vec::new();
        let mut page_token: Option<String> = None;

        for _ in 0..self.max_pages {
            let mut query = vec![
                ("part", "snippet".to_string()),
                ("forMine", "true".to_string()),
                ("type", "video".to_string()),
                ("order", "date".to_string()),
                ("maxResults", PAGE_SIZE.to_string()),
            ];
            if let Some(cursor) = page_token.as_ref() {
                query.push(("pageToken", cursor.clone()));
            }

            let body = send_json(
                self.client
                    .get(&url)
                    .timeout(self.timeout)
                    .bearer_auth(token)
                    .query(&query),
            )
            .await?;

            videos.extend(array_at(&body, "items").iter().cloned());
            page_token = body
                .get("nextPageToken")
                .and_then(Value::as_str)
                .map(str::to_string);
            if page_token.is_none() {
                break;
            }
        }

        tracing::debug!(channel = %ctx.platform_user_id, videos = videos.len(), "Fetched videos");
        Ok(RawPayload::new(Platform::Youtube, json!({ "videos": videos })))
    }
}
