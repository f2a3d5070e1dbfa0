//! SQLite-backed task records.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keith_schema::{AgentTask, NewTask, TaskResult, TaskStatus};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Persistence seam for task records.
///
/// `claim` and `finish` are conditional updates: they report `false` when the
/// record was not in the expected prior state, so concurrent workers never
/// both win.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create(&self, task: NewTask) -> Result<AgentTask>;
    async fn get(&self, id: &str) -> Result<Option<AgentTask>>;
    async fn list_pending(&self, assigned_agent: &str, limit: usize) -> Result<Vec<AgentTask>>;
    /// `pending` → `processing`.
    async fn claim(&self, id: &str, worker: &str) -> Result<bool>;
    /// `processing` → `completed` | `failed`.
    async fn finish(&self, id: &str, status: TaskStatus, result: TaskResult) -> Result<bool>;
}

pub struct SqliteTaskStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteTaskStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)
            .with_context(|| format!("failed to open task store {}", db_path.display()))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        run_migrations(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        run_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn create(&self, task: NewTask) -> Result<AgentTask> {
        let now = Utc::now();
        let record = AgentTask {
            id: Uuid::new_v4().to_string(),
            title: task.title,
            assigned_agent: task.assigned_agent,
            status: TaskStatus::Pending,
            payload: task.payload,
            result: None,
            claimed_by: None,
            created_at: now,
            updated_at: now,
        };

        let conn = self.conn.lock().await;
        conn.execute(
            r#"INSERT INTO agent_tasks
               (id, title, assigned_agent, status, payload, result, claimed_by, created_at, updated_at)
               VALUES (?1, ?2, ?3, ?4, ?5, NULL, NULL, ?6, ?7)"#,
            params![
                record.id,
                record.title,
                record.assigned_agent,
                record.status.as_str(),
                serde_json::to_string(&record.payload)?,
                record.created_at.to_rfc3339(),
                record.updated_at.to_rfc3339(),
            ],
        )
        .context("failed to insert task")?;
        Ok(record)
    }

    async fn get(&self, id: &str) -> Result<Option<AgentTask>> {
        let conn = self.conn.lock().await;
        let task = conn
            .query_row(
                r#"SELECT id, title, assigned_agent, status, payload, result, claimed_by, created_at, updated_at
                   FROM agent_tasks WHERE id = ?1"#,
                [id],
                row_to_task,
            )
            .optional()?;
        Ok(task)
    }

    async fn list_pending(&self, assigned_agent: &str, limit: usize) -> Result<Vec<AgentTask>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            r#"SELECT id, title, assigned_agent, status, payload, result, claimed_by, created_at, updated_at
               FROM agent_tasks
               WHERE status = 'pending' AND assigned_agent = ?1
               ORDER BY created_at ASC, rowid ASC
               LIMIT ?2"#,
        )?;
        let rows = stmt.query_map(
            params![assigned_agent, i64::try_from(limit).unwrap_or(i64::MAX)],
            row_to_task,
        )?;

        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row?);
        }
        Ok(tasks)
    }

    async fn claim(&self, id: &str, worker: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            r#"UPDATE agent_tasks
               SET status = 'processing', claimed_by = ?2, updated_at = ?3
               WHERE id = ?1 AND status = 'pending'"#,
            params![id, worker, Utc::now().to_rfc3339()],
        )?;
        Ok(changed == 1)
    }

    async fn finish(&self, id: &str, status: TaskStatus, result: TaskResult) -> Result<bool> {
        if !status.is_terminal() {
            bail!("cannot finish task {id} with non-terminal status {}", status.as_str());
        }
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            r#"UPDATE agent_tasks
               SET status = ?2, result = ?3, updated_at = ?4
               WHERE id = ?1 AND status = 'processing'"#,
            params![
                id,
                status.as_str(),
                serde_json::to_string(&result)?,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(changed == 1)
    }
}

fn row_to_task(row: &Row<'_>) -> rusqlite::Result<AgentTask> {
    let status: String = row.get(3)?;
    let payload: String = row.get(4)?;
    let result: Option<String> = row.get(5)?;
    Ok(AgentTask {
        id: row.get(0)?,
        title: row.get(1)?,
        assigned_agent: row.get(2)?,
        status: TaskStatus::parse(&status).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                3,
                Type::Text,
                format!("unknown task status: {status}").into(),
            )
        })?,
        payload: serde_json::from_str(&payload)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?,
        result: result
            .map(|raw| serde_json::from_str(&raw))
            .transpose()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?,
        claimed_by: row.get(6)?,
        created_at: parse_ts(row, 7)?,
        updated_at: parse_ts(row, 8)?,
    })
}

fn parse_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"CREATE TABLE IF NOT EXISTS __tasks_schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );"#,
    )?;

    let applied: std::collections::HashSet<i64> = {
        let mut stmt = conn.prepare("SELECT version FROM __tasks_schema_version")?;
        let rows = stmt.query_map([], |row| row.get::<_, i64>(0))?;
        rows.filter_map(|r| r.ok()).collect()
    };

    let migrations: Vec<(i64, &str)> = vec![(
        1,
        r#"
        CREATE TABLE IF NOT EXISTS agent_tasks (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            assigned_agent TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            payload TEXT NOT NULL,
            result TEXT,
            claimed_by TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_agent_tasks_pending ON agent_tasks(status, assigned_agent, created_at);
        "#,
    )];

    for (version, sql) in migrations {
        if applied.contains(&version) {
            continue;
        }
        conn.execute_batch(sql)?;
        conn.execute(
            "INSERT INTO __tasks_schema_version(version) VALUES (?1)",
            [version],
        )?;
    }

    Ok(())
}
