//! Errors surfaced by the task bridge to submitters.

/// Errors from submitting or polling tasks.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("task store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("task not found: {0}")]
    NotFound(String),
}

impl From<anyhow::Error> for TaskError {
    fn from(err: anyhow::Error) -> Self {
        TaskError::StoreUnavailable(format!("{err:#}"))
    }
}
