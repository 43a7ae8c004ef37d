//! In-memory provider double
//!
//! Serves scripted pages with configurable latency and failures. Pages use
//! the same shape the live provider for the platform produces; array
//! fields of successive pages are concatenated, as paging would.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

use super::{FetchContext, Provider, ProviderError};
use crate::data::Platform;
use crate::sync::item::RawPayload;

pub struct MemoryProvider {
    platform: Platform,
    pages: Vec<Value>,
    latency: Duration,
    deadline: Option<Duration>,
    scripted_failures: Mutex<VecDeque<ProviderError>>,
    permanent_failure: Option<ProviderError>,
    calls: AtomicUsize,
}

impl MemoryProvider {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            pages: Vec::new(),
            latency: Duration::ZERO,
            deadline: None,
            scripted_failures: Mutex::new(VecDeque::new()),
            permanent_failure: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_page(mut self, page: Value) -> Self {
        self.pages.push(page);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fail with a 504 when latency exceeds this deadline
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Fail the next call (queued in order) before serving pages again
    pub fn fail_next(mut self, error: ProviderError) -> Self {
        self.scripted_failures.get_mut().push_back(error);
        self
    }

    /// Fail every call
    pub fn fail_always(mut self, error: ProviderError) -> Self {
        self.permanent_failure = Some(error);
        self
    }

    /// Number of fetches attempted so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for MemoryProvider {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn fetch(&self, _ctx: &FetchContext) -> Result<RawPayload, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        match self.deadline {
            Some(deadline) if self.latency > deadline => {
                tokio::time::sleep(deadline).await;
                return Err(ProviderError::api(504, "request timed out"));
            }
            _ if !self.latency.is_zero() => tokio::time::sleep(self.latency).await,
            _ => {}
        }

        if let Some(error) = self.scripted_failures.lock().await.pop_front() {
            return Err(error);
        }
        if let Some(error) = self.permanent_failure.clone() {
            return Err(error);
        }

        Ok(RawPayload::new(self.platform, merge_pages(&self.pages)))
    }
}

/// Concatenate array fields across pages; scalars keep the first value
fn merge_pages(pages: &[Value]) -> Value {
    if pages.iter().all(Value::is_array) && !pages.is_empty() {
        return Value::Array(
            pages
                .iter()
                .filter_map(Value::as_array)
                .flatten()
                .cloned()
                .collect(),
        );
    }

    let mut merged = Map::new();
    for page in pages.iter().filter_map(Value::as_object) {
        for (key, value) in page {
            match (merged.get_mut(key), value) {
                (Some(Value::Array(existing)), Value::Array(more)) => {
                    existing.extend(more.iter().cloned())
                }
                (Some(Value::Null), _) | (None, _) => {
                    merged.insert(key.clone(), value.clone());
                }
                _ => {}
            }
        }
    }
    Value::Object(merged)
}
