use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::store::QueueStore;
use super::types::{Job, JobStatus};

/// Boxed async handler for one job type.
pub(crate) type JobHandler =
    Arc<dyn Fn(Value) -> BoxFuture<'static, Result<()>> + Send + Sync + 'static>;

/// Background worker draining one queue under a concurrency cap.
pub(crate) struct QueueWorker {
    store: Arc<QueueStore>,
    worker_id: String,
    handlers: HashMap<String, JobHandler>,
    semaphore: Arc<Semaphore>,
    idle_poll: Duration,
}

impl QueueWorker {
    pub(crate) fn new(store: Arc<QueueStore>, concurrency: usize) -> Self {
        Self {
            store,
            worker_id: format!("worker-{}", Uuid::new_v4()),
            handlers: HashMap::new(),
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
            idle_poll: Duration::from_millis(1000),
        }
    }

    /// Register a handler for a job type. A job whose type has no handler
    /// fails with a clear error instead of being silently dropped.
    pub(crate) fn register_handler(&mut self, job_type: impl Into<String>, handler: JobHandler) {
        let job_type = job_type.into();
        info!(queue = %self.store.queue_name(), %job_type, "registered job handler");
        self.handlers.insert(job_type, handler);
    }

    pub(crate) async fn run(self: Arc<Self>) {
        info!(
            queue = %self.store.queue_name(),
            worker_id = %self.worker_id,
            concurrency = self.semaphore.available_permits(),
            "starting queue worker"
        );

        loop {
            let permit = match Arc::clone(&self.semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };

            let job = match self.store.acquire(&self.worker_id).await {
                Ok(Some(job)) => job,
                Ok(None) => {
                    drop(permit);
                    sleep(self.idle_poll).await;
                    continue;
                }
                Err(err) => {
                    error!(error = %err, "failed to acquire job");
                    drop(permit);
                    sleep(Duration::from_secs(5)).await;
                    continue;
                }
            };

            let worker = Arc::clone(&self);
            tokio::spawn(async move {
                let _permit = permit;
                worker.process_job(job).await;
            });
        }
    }

    async fn process_job(&self, job: Job) {
        let job_id = job.id;
        info!(
            %job_id,
            job_type = %job.job_type,
            attempts = job.attempts,
            "processing job"
        );

        let Some(handler) = self.handlers.get(&job.job_type) else {
            let message = format!("no handler registered for job type: {}", job.job_type);
            error!(%job_id, job_type = %job.job_type, "missing job handler");
            if let Err(err) = self.store.fail(job_id, &message).await {
                error!(%job_id, error = %err, "failed to fail handler-less job");
            }
            return;
        };

        match handler(job.payload.clone()).await {
            Ok(()) => {
                if let Err(err) = self.store.complete(job_id).await {
                    error!(%job_id, error = %err, "failed to mark job completed");
                } else {
                    info!(%job_id, "job completed");
                }
            }
            Err(err) => {
                let message = format!("{err:#}");
                match self.store.fail(job_id, &message).await {
                    Ok(JobStatus::Failed) => {
                        error!(%job_id, error = %message, "job moved to dead letter");
                    }
                    Ok(_) => {
                        warn!(%job_id, error = %message, "job failed, retry scheduled");
                    }
                    Err(store_err) => {
                        error!(%job_id, error = %store_err, "failed to mark job failed");
                    }
                }
            }
        }
    }
}

/// Helper to box an async closure as a [`JobHandler`].
pub(crate) fn handler<F, Fut>(f: F) -> JobHandler
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move |payload| Box::pin(f(payload)))
}

/// Convenience handler that always fails; used in tests.
#[cfg(test)]
pub(crate) fn failing_handler(message: &'static str) -> JobHandler {
    handler(move |_| async move { Err(anyhow::anyhow!(message)) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[tokio::test]
    async fn handler_helper_boxes_closures() {
        let h = handler(|payload: Value| async move {
            if payload["ok"].as_bool().unwrap_or(false) {
                Ok(())
            } else {
                Err(anyhow!("payload not ok"))
            }
        });

        assert!(h(serde_json::json!({"ok": true})).await.is_ok());
        assert!(h(serde_json::json!({"ok": false})).await.is_err());
    }

    #[tokio::test]
    async fn failing_handler_returns_error() {
        let h = failing_handler("boom");
        let err = h(Value::Null).await.expect_err("should fail");
        assert_eq!(err.to_string(), "boom");
    }
}
