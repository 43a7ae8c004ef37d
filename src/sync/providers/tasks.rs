//! Task tracker provider
//!
//! Reads the product's own `tasks` table; `platform_user_id` is the owning
//! user's id.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

use super::{FetchContext, Provider, ProviderError};
use crate::data::{Database, Platform};
use crate::sync::item::RawPayload;

const PAGE_SIZE: usize = 100;

pub struct TasksProvider {
    db: Arc<Database>,
    max_pages: usize,
}

impl TasksProvider {
    pub fn new(db: Arc<Database>, max_pages: usize) -> Self {
        Self { db, max_pages }
    }
}

#[async_trait]
impl Provider for TasksProvider {
    fn platform(&self) -> Platform {
        Platform::Tasks
    }

    async fn fetch(&self, ctx: &FetchContext) -> Result<RawPayload, ProviderError> {
        let mut tasks = Vec::new();

        for page in 0..self.max_pages {
            let batch = self
                .db
                .get_recent_tasks(&ctx.platform_user_id, PAGE_SIZE, page * PAGE_SIZE)
                .await
                .map_err(|e| ProviderError::api(500, e.to_string()))?;
            let batch_len = batch.len();
            tasks.extend(batch);
            if batch_len < PAGE_SIZE {
                break;
            }
        }

        Ok(RawPayload::new(Platform::Tasks, json!({ "tasks": tasks })))
    }
}
