use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Worker name tasks are addressed to unless the submitter says otherwise.
pub const DEFAULT_ASSIGNED_AGENT: &str = "Keith";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskPayload {
    #[serde(default)]
    pub message: String,
}

/// Terminal output of a task: `response` for completed tasks, `error` for failed ones.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskResult {
    pub fn response(text: impl Into<String>) -> Self {
        Self {
            response: Some(text.into()),
            error: None,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            response: None,
            error: Some(text.into()),
        }
    }
}

/// Task record as persisted by the task bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentTask {
    pub id: String,
    pub title: String,
    pub assigned_agent: String,
    pub status: TaskStatus,
    pub payload: TaskPayload,
    #[serde(default)]
    pub result: Option<TaskResult>,
    #[serde(default)]
    pub claimed_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    pub title: String,
    pub assigned_agent: String,
    pub payload: TaskPayload,
}

impl NewTask {
    pub fn message(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            title: title_for(&message),
            assigned_agent: DEFAULT_ASSIGNED_AGENT.to_string(),
            payload: TaskPayload { message },
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn assigned_to(mut self, agent: impl Into<String>) -> Self {
        self.assigned_agent = agent.into();
        self
    }
}

fn title_for(message: &str) -> String {
    const MAX_TITLE_CHARS: usize = 48;
    let trimmed = message.trim();
    if trimmed.chars().count() <= MAX_TITLE_CHARS {
        trimmed.to_string()
    } else {
        let cut: String = trimmed.chars().take(MAX_TITLE_CHARS).collect();
        format!("{cut}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings_roundtrip() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Processing,
            TaskStatus::Completed,
            TaskStatus::Failed,
        ] {
            assert_eq!(TaskStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(TaskStatus::parse("in-progress"), None);
    }

    #[test]
    fn only_completed_and_failed_are_terminal() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Processing.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
    }

    #[test]
    fn new_task_defaults_to_keith() {
        let task = NewTask::message("hello");
        assert_eq!(task.assigned_agent, "Keith");
        assert_eq!(task.title, "hello");
        assert_eq!(task.payload.message, "hello");
    }

    #[test]
    fn long_messages_get_truncated_titles() {
        let task = NewTask::message("x".repeat(100));
        assert_eq!(task.title.chars().count(), 51);
        assert!(task.title.ends_with("..."));
    }

    #[test]
    fn task_result_omits_empty_fields() {
        let json = serde_json::to_string(&TaskResult::response("hi")).unwrap();
        assert_eq!(json, r#"{"response":"hi"}"#);
        let json = serde_json::to_string(&TaskResult::error("boom")).unwrap();
        assert_eq!(json, r#"{"error":"boom"}"#);
    }
}
