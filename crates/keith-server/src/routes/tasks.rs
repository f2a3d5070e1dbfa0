use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use keith_schema::{AgentTask, NewTask, TaskStatus};
use keith_tasks::TaskError;
use serde::{Deserialize, Serialize};

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SubmitBody {
    pub message: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub assigned_agent: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub id: String,
    pub status: TaskStatus,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(submit_task))
        .route("/{id}", get(get_task))
}

fn status_for(err: &TaskError) -> StatusCode {
    match err {
        TaskError::NotFound(_) => StatusCode::NOT_FOUND,
        TaskError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

pub async fn submit_task(
    State(state): State<AppState>,
    Json(body): Json<SubmitBody>,
) -> Result<(StatusCode, Json<SubmitResponse>), StatusCode> {
    if body.message.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let mut task = NewTask::message(body.message);
    if let Some(title) = body.title.filter(|t| !t.trim().is_empty()) {
        task = task.with_title(title);
    }
    if let Some(agent) = body.assigned_agent.filter(|a| !a.trim().is_empty()) {
        task = task.assigned_to(agent);
    }

    let record = state.tasks.submit(task).await.map_err(|e| {
        tracing::warn!(error = %e, "task submit failed");
        status_for(&e)
    })?;

    Ok((
        StatusCode::CREATED,
        Json(SubmitResponse {
            id: record.id,
            status: record.status,
        }),
    ))
}

pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AgentTask>, StatusCode> {
    state
        .tasks
        .poll(&id)
        .await
        .map(Json)
        .map_err(|e| status_for(&e))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anyhow::{anyhow, Result};
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use keith_bus::EventBus;
    use keith_core::LocalRoom;
    use keith_schema::{AgentTask, NewTask, TaskResult, TaskStatus};
    use keith_tasks::{SqliteTaskStore, TaskBridge, TaskStore};
    use tower::ServiceExt;

    use super::router;
    use crate::state::AppState;

    fn state_with(store: Arc<dyn TaskStore>) -> AppState {
        let (room, _events) = LocalRoom::new("test-room");
        AppState {
            bus: Arc::new(EventBus::new(16)),
            tasks: TaskBridge::new(store),
            room,
        }
    }

    fn setup_state() -> AppState {
        state_with(Arc::new(SqliteTaskStore::open_in_memory().unwrap()))
    }

    fn post_json(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn submit_returns_created_pending_task() {
        let state = setup_state();
        let app = router().with_state(state.clone());

        let response = app
            .oneshot(post_json(r#"{"message":"I need food assistance"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let body = json_body(response).await;
        assert_eq!(body["status"], "pending");
        let id = body["id"].as_str().unwrap();

        let stored = state.tasks.poll(id).await.unwrap();
        assert_eq!(stored.payload.message, "I need food assistance");
        assert_eq!(stored.assigned_agent, "Keith");
    }

    #[tokio::test]
    async fn submit_honours_title_and_agent() {
        let state = setup_state();
        let app = router().with_state(state.clone());

        let response = app
            .oneshot(post_json(
                r#"{"message":"system test","title":"Catalog check","assigned_agent":"Night Shift"}"#,
            ))
            .await
            .unwrap();
        let body = json_body(response).await;
        let stored = state.tasks.poll(body["id"].as_str().unwrap()).await.unwrap();
        assert_eq!(stored.title, "Catalog check");
        assert_eq!(stored.assigned_agent, "Night Shift");
    }

    #[tokio::test]
    async fn submit_rejects_blank_message() {
        let app = router().with_state(setup_state());
        let response = app.oneshot(post_json(r#"{"message":"   "}"#)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn get_returns_snapshot_and_404_for_unknown() {
        let state = setup_state();
        let record = state
            .tasks
            .submit(NewTask::message("I need housing"))
            .await
            .unwrap();
        let app = router().with_state(state);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/{}", record.id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["id"], record.id.as_str());
        assert_eq!(body["status"], "pending");

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/does-not-exist")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    struct DownStore;

    #[async_trait::async_trait]
    impl TaskStore for DownStore {
        async fn create(&self, _task: NewTask) -> Result<AgentTask> {
            Err(anyhow!("database is locked"))
        }
        async fn get(&self, _id: &str) -> Result<Option<AgentTask>> {
            Err(anyhow!("database is locked"))
        }
        async fn list_pending(&self, _agent: &str, _limit: usize) -> Result<Vec<AgentTask>> {
            Err(anyhow!("database is locked"))
        }
        async fn claim(&self, _id: &str, _worker: &str) -> Result<bool> {
            Err(anyhow!("database is locked"))
        }
        async fn finish(&self, _id: &str, _status: TaskStatus, _result: TaskResult) -> Result<bool> {
            Err(anyhow!("database is locked"))
        }
    }

    #[tokio::test]
    async fn store_outage_maps_to_503() {
        let app = router().with_state(state_with(Arc::new(DownStore)));
        let response = app
            .oneshot(post_json(r#"{"message":"I need food"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
