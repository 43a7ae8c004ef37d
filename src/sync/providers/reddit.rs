//! Reddit submissions and comments provider

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use std::time::Duration;

use super::http::{array_at, send_json};
use super::{FetchContext, Provider, ProviderError};
use crate::data::Platform;
use crate::sync::item::RawPayload;

const DEFAULT_API_BASE: &str = "https://oauth.reddit.com";
const PAGE_SIZE: &str = "100";

/// Fetches a user's submissions and comments
///
/// Payload shape: `{"posts": [...], "comments": [...]}`, each element the
/// `data` object of a listing child.
pub struct RedditProvider {
    client: Client,
    api_base: String,
    timeout: Duration,
    max_pages: usize,
}

impl RedditProvider {
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

    /// Follow a listing's `after` cursor
    async fn listing(&self, url: &str, token: &str) -> Result<Vec<Value>, ProviderError> {
        let mut children = Vec::new();
        let mut after: Option<String> = None;

        for _ in 0..self.max_pages {
            let mut query = vec![("limit", PAGE_SIZE.to_string()), ("raw_json", "1".to_string())];
            if let Some(cursor) = after.as_ref() {
                query.push(("after", cursor.clone()));
            }

            let body = send_json(
                self.client
                    .get(url)
                    .timeout(self.timeout)
                    .bearer_auth(token)
                    .query(&query),
            )
            .await?;

            let listing = body.get("data").cloned().unwrap_or(Value::Null);
            children.extend(
                array_at(&listing, "children")
                    .iter()
                    .filter_map(|child| child.get("data").cloned()),
            );

            after = listing
                .get("after")
                .and_then(Value::as_str)
                .filter(|cursor| !cursor.is_empty())
                .map(str::to_string);
            if after.is_none() {
                break;
            }
        }

        Ok(children)
    }
}

#[async_trait]
impl Provider for RedditProvider {
    fn platform(&self) -> Platform {
        Platform::Reddit
    }

    async fn fetch(&self, ctx: &FetchContext) -> Result<RawPayload, ProviderError> {
        let token = ctx.require_token()?;
        let username = ctx.handle();
        if username.is_empty() {
            return Err(ProviderError::BadRequest(
                "reddit account has no username".to_string(),
            ));
        }
        let user = urlencoding::encode(username);

        let posts = self
            .listing(&format!("{}/user/{}/submitted", self.api_base, user), token)
            .await?;
        let comments = self
            .listing(&format!("{}/user/{}/comments", self.api_base, user), token)
            .await?;

        tracing::debug!(
            username,
            posts = posts.len(),
            comments = comments.len(),
            "Fetched Reddit activity"
        );
        Ok(RawPayload::new(
            Platform::Reddit,
            json!({ "posts": posts, "comments": comments }),
        ))
    }
}
