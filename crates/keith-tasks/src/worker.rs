use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use keith_bus::BusPublisher;
use keith_schema::{AgentTask, BusMessage, TaskPayload, TaskResult, TaskStatus};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::store::TaskStore;

/// Result error recorded when the handler panics instead of returning.
pub const HANDLER_PANICKED: &str = "worker panicked";

const FINISH_ATTEMPTS: u32 = 3;
const FINISH_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Computes the reply for one claimed task. An `Err` marks the task failed
/// with the error's message.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, payload: &TaskPayload) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    pub assigned_agent: String,
    pub poll_interval: Duration,
    pub batch_size: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", std::process::id()),
            assigned_agent: keith_schema::DEFAULT_ASSIGNED_AGENT.to_string(),
            poll_interval: Duration::from_secs(2),
            batch_size: 16,
        }
    }
}

/// Worker side of the task protocol: claims pending tasks addressed to its
/// agent and writes exactly one terminal state for each claim it wins.
#[derive(Clone)]
pub struct TaskWorker {
    store: Arc<dyn TaskStore>,
    handler: Arc<dyn TaskHandler>,
    config: WorkerConfig,
    bus: Option<BusPublisher>,
}

impl TaskWorker {
    pub fn new(
        store: Arc<dyn TaskStore>,
        handler: Arc<dyn TaskHandler>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            store,
            handler,
            config,
            bus: None,
        }
    }

    pub fn with_bus(mut self, bus: BusPublisher) -> Self {
        self.bus = Some(bus);
        self
    }

    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!(
            worker = %self.config.worker_id,
            agent = %self.config.assigned_agent,
            interval_ms = self.config.poll_interval.as_millis() as u64,
            "task worker started"
        );
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once().await {
                        tracing::warn!(error = %e, "task poll failed");
                    }
                }
            }
        }
        tracing::info!(worker = %self.config.worker_id, "task worker stopped");
    }

    /// Claims every pending task visible now and processes the winners
    /// concurrently. Returns the number of claims won.
    pub async fn poll_once(&self) -> Result<usize> {
        let pending = self
            .store
            .list_pending(&self.config.assigned_agent, self.config.batch_size)
            .await?;

        let mut running = JoinSet::new();
        for task in pending {
            match self.store.claim(&task.id, &self.config.worker_id).await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::debug!(task_id = %task.id, "claim lost to another worker");
                    continue;
                }
                Err(e) => {
                    // Left pending; the next poll retries it.
                    tracing::warn!(task_id = %task.id, error = %e, "claim failed");
                    continue;
                }
            }
            tracing::info!(task_id = %task.id, worker = %self.config.worker_id, "task claimed");
            self.publish(BusMessage::TaskClaimed {
                task_id: task.id.clone(),
                worker: self.config.worker_id.clone(),
            })
            .await;

            let worker = self.clone();
            running.spawn(async move { worker.process(task).await });
        }

        let mut won = 0;
        while let Some(joined) = running.join_next().await {
            if let Err(e) = joined {
                tracing::warn!(error = %e, "task processing panicked");
            }
            won += 1;
        }
        Ok(won)
    }

    async fn process(&self, task: AgentTask) {
        let handler = Arc::clone(&self.handler);
        let payload = task.payload.clone();
        let handled = tokio::spawn(async move { handler.handle(&payload).await }).await;
        let (status, result) = match handled {
            Ok(Ok(response)) => (TaskStatus::Completed, TaskResult::response(response)),
            Ok(Err(e)) => (TaskStatus::Failed, TaskResult::error(e.to_string())),
            Err(e) => {
                tracing::error!(task_id = %task.id, error = %e, "task handler panicked");
                (TaskStatus::Failed, TaskResult::error(HANDLER_PANICKED))
            }
        };
        let error = result.error.clone();

        match self.finish_with_retry(&task.id, status, result).await {
            Ok(true) => {
                tracing::info!(task_id = %task.id, status = status.as_str(), "task finished");
                let msg = match error {
                    Some(error) => BusMessage::TaskFailed {
                        task_id: task.id.clone(),
                        error,
                    },
                    None => BusMessage::TaskCompleted {
                        task_id: task.id.clone(),
                    },
                };
                self.publish(msg).await;
            }
            Ok(false) => {
                tracing::warn!(task_id = %task.id, "task left processing before result was written");
            }
            Err(e) => {
                tracing::warn!(task_id = %task.id, error = %e, "failed to write task result");
            }
        }
    }

    async fn finish_with_retry(
        &self,
        id: &str,
        status: TaskStatus,
        result: TaskResult,
    ) -> Result<bool> {
        let mut attempt = 1;
        loop {
            match self.store.finish(id, status, result.clone()).await {
                Err(e) if attempt < FINISH_ATTEMPTS => {
                    tracing::debug!(task_id = %id, attempt, error = %e, "retrying task result write");
                    tokio::time::sleep(FINISH_RETRY_DELAY * attempt).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn publish(&self, msg: BusMessage) {
        if let Some(bus) = &self.bus {
            let _ = bus.publish(msg).await;
        }
    }
}
