//! Background job dispatch
//!
//! Jobs go to a bounded queue drained by a single executor task. When the
//! queue is full or the executor is gone, the job runs inline on the
//! caller's task instead. Job failures are logged and counted, never
//! surfaced to the caller.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::AppError;
use crate::metrics::BACKGROUND_JOBS_TOTAL;

/// Deferred work
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackgroundJob {
    /// Fetch an account and store a fresh snapshot
    RefreshAccount { account_id: String },
    /// Drop consumed OAuth nonces older than the cut-off
    PruneOAuthNonces { older_than: chrono::DateTime<chrono::Utc> },
}

impl BackgroundJob {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RefreshAccount { .. } => "refresh_account",
            Self::PruneOAuthNonces { .. } => "prune_oauth_nonces",
        }
    }
}

/// Executes background jobs
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, job: BackgroundJob) -> Result<(), AppError>;
}

/// Dispatches jobs to the executor, falling back to inline execution
pub struct BackgroundDispatcher {
    sender: Option<mpsc::Sender<BackgroundJob>>,
    runner: Arc<dyn JobRunner>,
}

impl BackgroundDispatcher {
    /// Start the executor task
    ///
    /// # Returns
    /// The dispatcher and the executor's handle; the executor exits once
    /// every dispatcher clone is dropped.
    pub fn spawn(runner: Arc<dyn JobRunner>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (sender, mut receiver) = mpsc::channel::<BackgroundJob>(capacity.max(1));
        let executor_runner = Arc::clone(&runner);

        let handle = tokio::spawn(async move {
            while let Some(job) = receiver.recv().await {
                execute(executor_runner.as_ref(), job, "queued").await;
            }
            tracing::debug!("Background executor stopped");
        });

        (
            Self {
                sender: Some(sender),
                runner,
            },
            handle,
        )
    }

    /// Dispatcher without a queue; every job runs inline
    pub fn inline(runner: Arc<dyn JobRunner>) -> Self {
        Self {
            sender: None,
            runner,
        }
    }

    /// Hand off a job
    ///
    /// Returns once the job is queued, or after it ran inline.
    pub async fn dispatch(&self, job: BackgroundJob) {
        let job = match &self.sender {
            Some(sender) => match sender.try_send(job) {
                Ok(()) => return,
                Err(mpsc::error::TrySendError::Full(job)) => {
                    tracing::warn!(kind = job.kind(), "Background queue full; running inline");
                    job
                }
                Err(mpsc::error::TrySendError::Closed(job)) => {
                    tracing::warn!(kind = job.kind(), "Background executor gone; running inline");
                    job
                }
            },
            None => job,
        };

        execute(self.runner.as_ref(), job, "inline").await;
    }
}

async fn execute(runner: &dyn JobRunner, job: BackgroundJob, mode: &'static str) {
    let kind = job.kind();
    let started = Instant::now();

    match runner.run(job).await {
        Ok(()) => {
            BACKGROUND_JOBS_TOTAL.with_label_values(&[kind, "ok"]).inc();
            tracing::debug!(
                kind,
                mode,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Background job finished"
            );
        }
        Err(e) => {
            BACKGROUND_JOBS_TOTAL.with_label_values(&[kind, "error"]).inc();
            tracing::warn!(kind, mode, error = %e, "Background job failed");
        }
    }
}
