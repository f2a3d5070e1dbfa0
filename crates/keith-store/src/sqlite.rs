use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keith_schema::{ContactInfo, Resource, MAX_SECONDARY_CATEGORIES};
use rusqlite::functions::FunctionFlags;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::task;
use uuid::Uuid;

use crate::{ResourceQuery, ResourceStore};

const SELECT_COLUMNS: &str = "SELECT r.id, r.name, r.category, r.description, r.secondary_categories, \
     r.programs, r.contact_email, r.contact_website, r.service_area, r.created_at FROM resources r";

/// Resource catalog persisted in SQLite.
#[derive(Clone)]
pub struct SqliteResourceStore {
    db: Arc<Mutex<Connection>>,
}

impl SqliteResourceStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        register_functions(&conn)?;
        run_migrations(&conn)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        register_functions(&conn)?;
        run_migrations(&conn)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            f(&conn)
        })
        .await?
    }
}

#[async_trait]
impl ResourceStore for SqliteResourceStore {
    async fn search(&self, query: &ResourceQuery) -> Result<Vec<Resource>> {
        let term = query.term.trim().to_lowercase();
        if term.is_empty() || query.limit == 0 {
            return Ok(Vec::new());
        }
        let pattern = format!("%{}%", escape_like(&term));
        let category = query.category.as_deref().and_then(normalize_category);
        let limit = i64::try_from(query.limit).unwrap_or(i64::MAX);

        self.with_conn(move |conn| {
            let sql = format!(
                r#"{SELECT_COLUMNS}
                WHERE unicode_lower(r.description) LIKE ?1 ESCAPE '\'
                  AND (?2 IS NULL
                       OR r.category = ?2
                       OR EXISTS (SELECT 1 FROM json_each(r.secondary_categories) WHERE json_each.value = ?2))
                ORDER BY r.rowid
                LIMIT ?3"#
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![pattern, category, limit], row_to_resource)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
        .await
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<Resource>> {
        let name = name.trim().to_lowercase();
        if name.is_empty() {
            return Ok(None);
        }
        self.with_conn(move |conn| {
            let exact = conn
                .query_row(
                    &format!("{SELECT_COLUMNS} WHERE unicode_lower(r.name) = ?1 ORDER BY r.rowid LIMIT 1"),
                    params![name],
                    row_to_resource,
                )
                .optional()?;
            if exact.is_some() {
                return Ok(exact);
            }
            let pattern = format!("%{}%", escape_like(&name));
            let partial = conn
                .query_row(
                    &format!(
                        r#"{SELECT_COLUMNS} WHERE unicode_lower(r.name) LIKE ?1 ESCAPE '\' ORDER BY r.rowid LIMIT 1"#
                    ),
                    params![pattern],
                    row_to_resource,
                )
                .optional()?;
            Ok(partial)
        })
        .await
    }

    async fn count(&self) -> Result<usize> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM resources", [], |row| row.get(0))?;
            Ok(n as usize)
        })
        .await
    }

    async fn categories(&self) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT category FROM resources WHERE category IS NOT NULL ORDER BY category",
            )?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
        .await
    }

    async fn recent(&self, limit: usize) -> Result<Vec<Resource>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "{SELECT_COLUMNS} ORDER BY r.created_at DESC, r.rowid DESC LIMIT ?1"
            ))?;
            let rows = stmt.query_map(params![limit], row_to_resource)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
        .await
    }

    async fn insert(&self, resource: Resource) -> Result<Resource> {
        let resource = normalize(resource)?;
        let stored = resource.clone();
        self.with_conn(move |conn| {
            conn.execute(
                r#"INSERT INTO resources (
                    id, name, category, description, secondary_categories, programs,
                    contact_email, contact_website, service_area, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"#,
                params![
                    resource.id,
                    resource.name,
                    resource.category,
                    resource.description,
                    serde_json::to_string(&resource.secondary_categories)?,
                    serde_json::to_string(&resource.programs)?,
                    resource.contact_info.email,
                    resource.contact_info.website,
                    resource.contact_info.service_area,
                    resource.created_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await?;
        tracing::debug!(id = %stored.id, name = %stored.name, "resource stored");
        Ok(stored)
    }
}

fn normalize(mut resource: Resource) -> Result<Resource> {
    resource.name = resource.name.trim().to_string();
    if resource.name.is_empty() {
        bail!("resource name must not be empty");
    }
    if resource.id.trim().is_empty() {
        resource.id = Uuid::new_v4().to_string();
    }
    resource.category = resource.category.as_deref().and_then(normalize_category);
    resource.secondary_categories = resource
        .secondary_categories
        .iter()
        .filter_map(|c| normalize_category(c))
        .take(MAX_SECONDARY_CATEGORIES)
        .collect();
    Ok(resource)
}

fn normalize_category(raw: &str) -> Option<String> {
    let tag = raw.trim().to_lowercase();
    (!tag.is_empty()).then_some(tag)
}

/// SQLite's `lower()` and `LIKE` fold ASCII only; matching goes through
/// `unicode_lower` so accented text compares case-insensitively.
fn register_functions(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(
        "unicode_lower",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| Ok(ctx.get::<Option<String>>(0)?.map(|s| s.to_lowercase())),
    )?;
    Ok(())
}

fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn json_column<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn row_to_resource(row: &Row<'_>) -> rusqlite::Result<Resource> {
    let created_at: String = row.get(9)?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(9, Type::Text, Box::new(e)))?;
    Ok(Resource {
        id: row.get(0)?,
        name: row.get(1)?,
        category: row.get(2)?,
        description: row.get(3)?,
        secondary_categories: json_column(row, 4)?,
        programs: json_column(row, 5)?,
        contact_info: ContactInfo {
            email: row.get(6)?,
            website: row.get(7)?,
            service_area: row.get(8)?,
        },
        created_at,
    })
}

fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"CREATE TABLE IF NOT EXISTS __resources_schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );"#,
    )?;

    let applied: std::collections::HashSet<i64> = {
        let mut stmt = conn.prepare("SELECT version FROM __resources_schema_version")?;
        let rows = stmt.query_map([], |row| row.get::<_, i64>(0))?;
        rows.filter_map(|r| r.ok()).collect()
    };

    let migrations: Vec<(i64, &str)> = vec![(
        1,
        r#"
        CREATE TABLE IF NOT EXISTS resources (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            category TEXT,
            description TEXT NOT NULL,
            secondary_categories TEXT NOT NULL DEFAULT '[]',
            programs TEXT NOT NULL DEFAULT '[]',
            contact_email TEXT,
            contact_website TEXT,
            service_area TEXT,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_resources_category ON resources(category);
        CREATE INDEX IF NOT EXISTS idx_resources_created ON resources(created_at DESC);
        "#,
    )];

    for (version, sql) in migrations {
        if applied.contains(&version) {
            continue;
        }
        conn.execute_batch(sql)?;
        conn.execute(
            "INSERT INTO __resources_schema_version(version) VALUES (?1)",
            [version],
        )?;
    }

    Ok(())
}
