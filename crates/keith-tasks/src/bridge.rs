use std::sync::Arc;
use std::time::Duration;

use keith_bus::BusPublisher;
use keith_schema::{AgentTask, BusMessage, NewTask, TaskStatus};
use tokio::time::Instant;

use crate::error::TaskError;
use crate::store::TaskStore;

/// How a submitter waits for a task to reach a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub interval: Duration,
    pub deadline: Duration,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            deadline: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed(String),
    Failed(String),
    /// Deadline passed; the task itself is left untouched.
    TimedOut,
}

/// Submitter side of the task protocol.
#[derive(Clone)]
pub struct TaskBridge {
    store: Arc<dyn TaskStore>,
    bus: Option<BusPublisher>,
}

impl TaskBridge {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self { store, bus: None }
    }

    pub fn with_bus(mut self, bus: BusPublisher) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn store(&self) -> Arc<dyn TaskStore> {
        Arc::clone(&self.store)
    }

    pub async fn submit(&self, task: NewTask) -> Result<AgentTask, TaskError> {
        let record = self.store.create(task).await?;
        tracing::info!(task_id = %record.id, agent = %record.assigned_agent, "task submitted");
        if let Some(bus) = &self.bus {
            let _ = bus
                .publish(BusMessage::TaskSubmitted {
                    task_id: record.id.clone(),
                    assigned_agent: record.assigned_agent.clone(),
                })
                .await;
        }
        Ok(record)
    }

    pub async fn poll(&self, id: &str) -> Result<AgentTask, TaskError> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| TaskError::NotFound(id.to_string()))
    }

    /// Polls at a fixed interval until the task is terminal or the deadline
    /// passes. Store hiccups during the wait are logged and retried.
    pub async fn wait_for_result(
        &self,
        id: &str,
        policy: WaitPolicy,
    ) -> Result<TaskOutcome, TaskError> {
        let deadline = Instant::now() + policy.deadline;
        loop {
            match self.poll(id).await {
                Ok(task) => {
                    if let Some(outcome) = outcome_of(&task) {
                        return Ok(outcome);
                    }
                }
                Err(TaskError::NotFound(id)) => return Err(TaskError::NotFound(id)),
                Err(e) => tracing::warn!(task_id = %id, error = %e, "task poll failed, retrying"),
            }

            let now = Instant::now();
            if now >= deadline {
                tracing::info!(task_id = %id, "gave up waiting for task");
                return Ok(TaskOutcome::TimedOut);
            }
            tokio::time::sleep(policy.interval.min(deadline - now)).await;
        }
    }
}

fn outcome_of(task: &AgentTask) -> Option<TaskOutcome> {
    let result = task.result.clone().unwrap_or_default();
    match task.status {
        TaskStatus::Completed => Some(TaskOutcome::Completed(result.response.unwrap_or_default())),
        TaskStatus::Failed => Some(TaskOutcome::Failed(
            result.error.unwrap_or_else(|| "unknown error".to_string()),
        )),
        TaskStatus::Pending | TaskStatus::Processing => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteTaskStore;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use keith_bus::{EventBus, Topic};
    use keith_schema::TaskResult;

    struct DownStore;

    #[async_trait]
    impl TaskStore for DownStore {
        async fn create(&self, _task: NewTask) -> Result<AgentTask> {
            Err(anyhow!("unable to open database file"))
        }
        async fn get(&self, _id: &str) -> Result<Option<AgentTask>> {
            Err(anyhow!("unable to open database file"))
        }
        async fn list_pending(&self, _agent: &str, _limit: usize) -> Result<Vec<AgentTask>> {
            Err(anyhow!("unable to open database file"))
        }
        async fn claim(&self, _id: &str, _worker: &str) -> Result<bool> {
            Err(anyhow!("unable to open database file"))
        }
        async fn finish(&self, _id: &str, _s: TaskStatus, _r: TaskResult) -> Result<bool> {
            Err(anyhow!("unable to open database file"))
        }
    }

    fn bridge() -> TaskBridge {
        TaskBridge::new(Arc::new(SqliteTaskStore::open_in_memory().unwrap()))
    }

    #[tokio::test]
    async fn submit_returns_fresh_pending_ids() {
        let bridge = bridge();
        let a = bridge.submit(NewTask::message("one")).await.unwrap();
        let b = bridge.submit(NewTask::message("two")).await.unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(bridge.poll(&a.id).await.unwrap().status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn submit_publishes_on_bus() {
        let bus = EventBus::new(4);
        let mut rx = bus.subscribe(Topic::TaskSubmitted).await;
        let bridge = bridge().with_bus(bus.publisher());

        let task = bridge.submit(NewTask::message("hello")).await.unwrap();

        match rx.recv().await.unwrap() {
            BusMessage::TaskSubmitted { task_id, .. } => assert_eq!(task_id, task.id),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn poll_unknown_is_not_found() {
        let err = bridge().poll("nope").await.unwrap_err();
        assert!(matches!(err, TaskError::NotFound(id) if id == "nope"));
    }

    #[tokio::test]
    async fn submit_against_down_store_is_unavailable() {
        let bridge = TaskBridge::new(Arc::new(DownStore));
        let err = bridge.submit(NewTask::message("x")).await.unwrap_err();
        assert!(matches!(err, TaskError::StoreUnavailable(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_times_out_without_touching_task() {
        let bridge = bridge();
        let task = bridge.submit(NewTask::message("slow")).await.unwrap();

        let outcome = bridge
            .wait_for_result(&task.id, WaitPolicy::default())
            .await
            .unwrap();

        assert_eq!(outcome, TaskOutcome::TimedOut);
        assert_eq!(bridge.poll(&task.id).await.unwrap().status, TaskStatus::Pending);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_returns_completed_result() {
        let bridge = bridge();
        let store = bridge.store();
        let task = bridge.submit(NewTask::message("hi")).await.unwrap();

        let id = task.id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            store.claim(&id, "w").await.unwrap();
            store
                .finish(&id, TaskStatus::Completed, TaskResult::response("hello back"))
                .await
                .unwrap();
        });

        let outcome = bridge
            .wait_for_result(&task.id, WaitPolicy::default())
            .await
            .unwrap();
        assert_eq!(outcome, TaskOutcome::Completed("hello back".into()));
    }

    #[tokio::test]
    async fn wait_reports_failure_error() {
        let bridge = bridge();
        let store = bridge.store();
        let task = bridge.submit(NewTask::message("")).await.unwrap();
        store.claim(&task.id, "w").await.unwrap();
        store
            .finish(
                &task.id,
                TaskStatus::Failed,
                TaskResult::error("No message in payload"),
            )
            .await
            .unwrap();

        let outcome = bridge
            .wait_for_result(&task.id, WaitPolicy::default())
            .await
            .unwrap();
        assert_eq!(outcome, TaskOutcome::Failed("No message in payload".into()));
    }

    #[tokio::test]
    async fn wait_on_unknown_id_is_not_found() {
        let err = bridge()
            .wait_for_result("ghost", WaitPolicy::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::NotFound(_)));
    }
}
