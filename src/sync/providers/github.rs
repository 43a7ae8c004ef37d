//! GitHub public events provider

use async_trait::async_trait;
use reqwest::{Client, header};
use serde_json::Value;
use std::time::Duration;

use super::http::send_json;
use super::{FetchContext, Provider, ProviderError};
use crate::data::Platform;
use crate::sync::item::RawPayload;

const DEFAULT_API_BASE: &str = "https://api.github.com";
const PAGE_SIZE: usize = 100;

/// Fetches `/users/{login}/events`, page by page
///
/// Payload shape: `{"events": [...]}` in API order.
pub struct GithubProvider {
    client: Client,
    api_base: String,
    timeout: Duration,
    max_pages: usize,
}

impl GithubProvider {
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
impl Provider for GithubProvider {
    fn platform(&self) -> Platform {
        Platform::Github
    }

    async fn fetch(&self, ctx: &FetchContext) -> Result<RawPayload, ProviderError> {
        let login = ctx.handle();
        if login.is_empty() {
            return Err(ProviderError::BadRequest(
                "github account has no login".to_string(),
            ));
        }

        let url = format!("{}/users/{}/events", self.api_base, urlencoding::encode(login));
        let mut events: Vec<Value> = Vec::new();

        for page in 1..=self.max_pages {
            let mut request = self
                .client
                .get(&url)
                .timeout(self.timeout)
                .header(header::ACCEPT, "application/vnd.github+json")
                .query(&[("per_page", PAGE_SIZE.to_string()), ("page", page.to_string())]);
            if let Some(token) = ctx.token.as_deref() {
                request = request.bearer_auth(token);
            }

            let body = send_json(request).await?;
            let batch = body.as_array().cloned().unwrap_or_default();
            let batch_len = batch.len();
            events.extend(batch);

            if batch_len < PAGE_SIZE {
                break;
            }
        }

        tracing::debug!(login, events = events.len(), "Fetched GitHub events");
        Ok(RawPayload::new(
            Platform::Github,
            serde_json::json!({ "events": events }),
        ))
    }
}
