//! Twitter (X) user timeline provider

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Map, Value, json};
use std::time::Duration;

use super::http::{array_at, send_json};
use super::{FetchContext, Provider, ProviderError};
use crate::data::Platform;
use crate::sync::item::RawPayload;

const DEFAULT_API_BASE: &str = "https://api.twitter.com";
const PAGE_SIZE: &str = "100";
const TWEET_FIELDS: &str =
    "created_at,public_metrics,conversation_id,referenced_tweets,in_reply_to_user_id";
const EXPANSIONS: &str = "referenced_tweets.id.author_id,in_reply_to_user_id";
const USER_FIELDS: &str = "username";

/// Fetches `/2/users/{id}/tweets` following `pagination_token`
///
/// Payload shape: `{"username": "...", "tweets": [...], "users": {id:
/// username}, "referenced": {tweet_id: author_id}}`. The two maps come from
/// the expanded `includes` of every page.
pub struct TwitterProvider {
    client: Client,
    api_base: String,
    timeout: Duration,
    max_pages: usize,
}

impl TwitterProvider {
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
impl Provider for TwitterProvider {
    fn platform(&self) -> Platform {
        Platform::Twitter
    }

    async fn fetch(&self, ctx: &FetchContext) -> Result<RawPayload, ProviderError> {
        let token = ctx.require_token()?;
        if ctx.platform_user_id.is_empty() {
            return Err(ProviderError::BadRequest(
                "twitter account has no user id".to_string(),
            ));
        }

        let url = format!(
            "{}/2/users/{}/tweets",
            self.api_base,
            urlencoding::encode(&ctx.platform_user_id)
        );
        let mut tweets: Vec<Value> = Vec::new();
        let mut users = Map::new();
        let mut referenced = Map::new();
        let mut pagination_token: Option<String> = None;

        for _ in 0..self.max_pages {
            let mut query = vec![
                ("max_results", PAGE_SIZE.to_string()),
                ("tweet.fields", TWEET_FIELDS.to_string()),
                ("expansions", EXPANSIONS.to_string()),
                ("user.fields", USER_FIELDS.to_string()),
            ];
            if let Some(cursor) = pagination_token.as_ref() {
                query.push(("pagination_token", cursor.clone()));
            }

            let body = send_json(
                self.client
                    .get(&url)
                    .timeout(self.timeout)
                    .bearer_auth(token)
                    .query(&query),
            )
            .await?;

            tweets.extend(array_at(&body, "data").iter().cloned());
            let includes = body.get("includes").cloned().unwrap_or(Value::Null);
            for user in array_at(&includes, "users") {
                if let (Some(id), Some(username)) = (user.get("id"), user.get("username")) {
                    users.insert(json_key(id), username.clone());
                }
            }
            for tweet in array_at(&includes, "tweets") {
                if let (Some(id), Some(author_id)) = (tweet.get("id"), tweet.get("author_id")) {
                    referenced.insert(json_key(id), author_id.clone());
                }
            }
            pagination_token = body
                .pointer("/meta/next_token")
                .and_then(Value::as_str)
                .map(str::to_string);
            if pagination_token.is_none() {
                break;
            }
        }

        tracing::debug!(
            user_id = %ctx.platform_user_id,
            tweets = tweets.len(),
            "Fetched tweets"
        );
        Ok(RawPayload::new(
            Platform::Twitter,
            json!({
                "username": ctx.platform_username,
                "tweets": tweets,
                "users": users,
                "referenced": referenced,
            }),
        ))
    }
}

fn json_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::normalize::normalize;
    use crate::sync::providers::http::stub;
    use axum::extract::{Path, Query};
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::{Json, Router};
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Page 1: an original tweet; page 2: a retweet of bob; page 3: a reply to carol
    fn page(token: Option<&str>) -> Value {
        match token {
            None => json!({
                "data": [{"id": "1", "text": "hello", "created_at": "2024-03-01T09:00:00Z"}],
                "meta": {"next_token": "p2"}
            }),
            Some("p2") => json!({
                "data": [{"id": "2", "text": "RT @bob: news", "created_at": "2024-03-01T10:00:00Z",
                          "referenced_tweets": [{"type": "retweeted", "id": "900"}]}],
                "includes": {
                    "users": [{"id": "20", "username": "bob"}],
                    "tweets": [{"id": "900", "author_id": "20"}]
                },
                "meta": {"next_token": "p3"}
            }),
            _ => json!({
                "data": [{"id": "3", "text": "@carol sure", "created_at": "2024-03-01T11:00:00Z",
                          "in_reply_to_user_id": "30"}],
                "includes": {"users": [{"id": "30", "username": "carol"}]},
                "meta": {}
            }),
        }
    }

    async fn twitter_upstream(requests: Arc<AtomicUsize>) -> String {
        let handler = move |Path(user_id): Path<String>,
                            Query(query): Query<HashMap<String, String>>| {
            let requests = requests.clone();
            async move {
                requests.fetch_add(1, Ordering::SeqCst);
                let expanded = query.get("expansions").map(String::as_str) == Some(EXPANSIONS)
                    && query.get("user.fields").map(String::as_str) == Some(USER_FIELDS);
                if user_id != "42" || !expanded {
                    return StatusCode::BAD_REQUEST.into_response();
                }
                Json(page(query.get("pagination_token").map(String::as_str))).into_response()
            }
        };
        stub::serve(Router::new().route("/2/users/:id/tweets", get(handler))).await
    }

    fn alice() -> FetchContext {
        FetchContext {
            account_id: "acc".to_string(),
            platform_user_id: "42".to_string(),
            platform_username: Some("alice".to_string()),
            token: Some("twitter-token".to_string()),
        }
    }

    #[tokio::test]
    async fn follows_pagination_token_and_merges_includes() {
        let requests = Arc::new(AtomicUsize::new(0));
        let base = twitter_upstream(requests.clone()).await;
        let provider = TwitterProvider::new(stub::client(), Some(base), stub::TIMEOUT, 5);

        let payload = provider.fetch(&alice()).await.unwrap();

        assert_eq!(requests.load(Ordering::SeqCst), 3);
        assert_eq!(payload.data["tweets"].as_array().unwrap().len(), 3);
        assert_eq!(payload.data["users"], json!({"20": "bob", "30": "carol"}));
        assert_eq!(payload.data["referenced"], json!({"900": "20"}));

        let items = normalize(&payload);
        let accounts: Vec<(String, Vec<&str>)> = items
            .iter()
            .map(|item| (item.id.clone(), item.payload.twitter_accounts()))
            .collect();
        assert_eq!(
            accounts,
            vec![
                ("twitter:3".to_string(), vec!["carol"]),
                ("twitter:2".to_string(), vec!["bob"]),
                ("twitter:1".to_string(), vec!["alice"]),
            ]
        );
    }

    #[tokio::test]
    async fn stops_at_the_page_cap() {
        let requests = Arc::new(AtomicUsize::new(0));
        let base = twitter_upstream(requests.clone()).await;
        let provider = TwitterProvider::new(stub::client(), Some(base), stub::TIMEOUT, 2);

        let payload = provider.fetch(&alice()).await.unwrap();

        assert_eq!(requests.load(Ordering::SeqCst), 2);
        assert_eq!(payload.data["tweets"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn rate_limit_carries_retry_after() {
        let provider =
            TwitterProvider::new(stub::client(), Some(stub::throttled().await), stub::TIMEOUT, 2);

        let error = provider.fetch(&alice()).await.unwrap_err();

        assert_eq!(error.retry_after(), Some(120));
        assert!(matches!(error, ProviderError::ApiError { status: 429, .. }));
    }
}
