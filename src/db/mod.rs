use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, ToSql};
use serde::Serialize;
use thiserror::Error;

use self::models::{ErrorDetails, IngestionStatus, Message, Project, SyncState, TeamMember};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("message {0} already exists")]
    Duplicate(String),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error("json serialization: {0}")]
    Json(#[from] serde_json::Error),

    #[error("filesystem: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("{0}")]
    Config(String),
}

pub mod migrations;
pub mod models;
pub mod schema;

const MESSAGE_COLUMNS: &str = r#"
    provider_message_id, thread_id, project_id, user_id, sender, recipients, cc_recipients,
    sent_at, subject, body_text, raw_content_pointer, ingestion_status, analysis_status,
    assignment_status, relevance_score, retry_count, error_details, provider_metadata, ingested_at
"#;

#[derive(Debug, Clone, Default)]
pub struct MessageFilters {
    pub project_id: Option<String>,
    pub status: Option<IngestionStatus>,
    pub thread_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub ids: Vec<String>,
    /// Zero means no limit.
    pub limit: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusCount {
    pub status: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectMessageCount {
    pub project_id: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatabaseStats {
    pub total_projects: i64,
    pub total_members: i64,
    pub total_messages: i64,
    pub messages_by_status: Vec<StatusCount>,
    pub messages_by_project: Vec<ProjectMessageCount>,
}

/// Sqlite-backed message store.
///
/// Cloning shares the underlying connection. The lock is held for single
/// statements or short transactions only, never across an `.await`.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

pub fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn is_unique_violation(error: &rusqlite::Error) -> bool {
    matches!(
        error,
        rusqlite::Error::SqliteFailure(err, _)
            if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}

impl Database {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        Self::from_connection(conn, path.to_path_buf())
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, PathBuf::from(":memory:"))
    }

    fn from_connection(mut conn: Connection, path: PathBuf) -> Result<Self, StoreError> {
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        migrations::migrate(&mut conn)
            .map_err(|e| StoreError::Config(format!("migration failed: {e}")))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    pub fn default_db_path() -> Result<PathBuf, StoreError> {
        let home = dirs::home_dir()
            .ok_or_else(|| StoreError::Config("failed to determine home directory".to_string()))?;
        Ok(home.join(".remail").join("remail.db"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Config("database connection lock poisoned".to_string()))
    }

    pub fn insert_project(&self, project: &Project) -> Result<(), StoreError> {
        let keywords = serde_json::to_string(&project.keywords)?;
        let mailbox = project.mailbox.trim().to_ascii_lowercase();

        self.lock()?.execute(
            r#"
            INSERT INTO projects (project_id, name, user_id, mailbox, keywords)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(project_id) DO UPDATE SET
                name = excluded.name,
                mailbox = excluded.mailbox,
                keywords = excluded.keywords
            "#,
            params![
                project.project_id,
                project.name,
                project.user_id,
                mailbox,
                keywords
            ],
        )?;
        Ok(())
    }

    pub fn get_project(&self, project_id: &str) -> Result<Option<Project>, StoreError> {
        let conn = self.lock()?;
        let project = conn
            .query_row(
                r#"
                SELECT project_id, name, user_id, mailbox, keywords, created_at
                FROM projects WHERE project_id = ? LIMIT 1
                "#,
                [project_id],
                Project::from_row,
            )
            .optional()?;
        Ok(project)
    }

    pub fn find_project_by_mailbox(&self, mailbox: &str) -> Result<Option<Project>, StoreError> {
        let conn = self.lock()?;
        let project = conn
            .query_row(
                r#"
                SELECT project_id, name, user_id, mailbox, keywords, created_at
                FROM projects WHERE mailbox = ? ORDER BY created_at ASC LIMIT 1
                "#,
                [mailbox.trim().to_ascii_lowercase()],
                Project::from_row,
            )
            .optional()?;
        Ok(project)
    }

    pub fn list_projects(&self) -> Result<Vec<Project>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT project_id, name, user_id, mailbox, keywords, created_at
            FROM projects ORDER BY project_id ASC
            "#,
        )?;
        let projects = stmt
            .query_map([], Project::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(projects)
    }

    pub fn upsert_team_member(&self, member: &TeamMember) -> Result<(), StoreError> {
        self.lock()?.execute(
            r#"
            INSERT INTO team_members (project_id, email_address, display_name, side)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(project_id, email_address) DO UPDATE SET
                display_name = excluded.display_name,
                side = excluded.side
            "#,
            params![
                member.project_id,
                member.email_address.trim().to_ascii_lowercase(),
                member.display_name,
                member.side.to_string(),
            ],
        )?;
        Ok(())
    }

    pub fn remove_team_member(&self, project_id: &str, email: &str) -> Result<usize, StoreError> {
        let removed = self.lock()?.execute(
            "DELETE FROM team_members WHERE project_id = ? AND email_address = ?",
            params![project_id, email.trim().to_ascii_lowercase()],
        )?;
        Ok(removed)
    }

    pub fn list_team_members(&self, project_id: &str) -> Result<Vec<TeamMember>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT project_id, email_address, display_name, side
            FROM team_members WHERE project_id = ?
            ORDER BY side ASC, email_address ASC
            "#,
        )?;
        let members = stmt
            .query_map([project_id], TeamMember::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(members)
    }

    pub fn message_exists(&self, provider_message_id: &str) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM messages WHERE provider_message_id = ? LIMIT 1",
                [provider_message_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn get_message(&self, provider_message_id: &str) -> Result<Option<Message>, StoreError> {
        let conn = self.lock()?;
        let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE provider_message_id = ?");
        let message = conn
            .query_row(&sql, [provider_message_id], Message::from_row)
            .optional()?;
        Ok(message)
    }

    /// Inserts a new message row. A concurrent writer that got there first
    /// surfaces as [`StoreError::Duplicate`].
    pub fn insert_message(&self, message: &Message) -> Result<(), StoreError> {
        let conn = self.lock()?;
        insert_message_row(&conn, message).map_err(|error| match error {
            StoreError::Sqlite(ref sqlite) if is_unique_violation(sqlite) => {
                StoreError::Duplicate(message.provider_message_id.clone())
            }
            other => other,
        })
    }

    /// Promotes a pending retry row to its completed content.
    pub fn complete_pending(&self, message: &Message) -> Result<(), StoreError> {
        let recipients = serde_json::to_string(&message.recipients)?;
        let cc_recipients = serde_json::to_string(&message.cc_recipients)?;
        let provider_metadata = message
            .provider_metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let updated = self.lock()?.execute(
            r#"
            UPDATE messages SET
                thread_id = ?, sender = ?, recipients = ?, cc_recipients = ?, sent_at = ?,
                subject = ?, body_text = ?, raw_content_pointer = ?, ingestion_status = 'completed',
                error_details = NULL, provider_metadata = ?, ingested_at = ?
            WHERE provider_message_id = ? AND ingestion_status = 'pending'
            "#,
            params![
                message.thread_id,
                message.sender,
                recipients,
                cc_recipients,
                message.sent_at.as_ref().map(format_timestamp),
                message.subject,
                message.body_text,
                message.raw_content_pointer,
                provider_metadata,
                message.ingested_at,
                message.provider_message_id,
            ],
        )?;

        if updated == 0 {
            return Err(StoreError::Duplicate(message.provider_message_id.clone()));
        }
        Ok(())
    }

    /// Records a failed ingestion attempt for `stub`.
    ///
    /// Every call counts one attempt, capped at `max_retries`. The row turns
    /// `failed` once the cap is reached or the failure is permanent. Completed
    /// and already failed rows are returned untouched.
    pub fn record_failure(
        &self,
        stub: &Message,
        details: &ErrorDetails,
        permanent: bool,
        max_retries: u32,
    ) -> Result<Message, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE provider_message_id = ?");
        let existing = tx
            .query_row(&sql, [stub.provider_message_id.as_str()], Message::from_row)
            .optional()?;

        let max_retries = max_retries.max(1);
        let result = match existing {
            Some(row) if row.ingestion_status != IngestionStatus::Pending => row,
            Some(mut row) => {
                row.retry_count = (row.retry_count + 1).min(max_retries);
                row.ingestion_status = failure_status(row.retry_count, permanent, max_retries);
                row.error_details = Some(details.clone());
                tx.execute(
                    r#"
                    UPDATE messages SET retry_count = ?, ingestion_status = ?, error_details = ?
                    WHERE provider_message_id = ?
                    "#,
                    params![
                        row.retry_count,
                        row.ingestion_status.to_string(),
                        serde_json::to_string(details)?,
                        row.provider_message_id,
                    ],
                )?;
                row
            }
            None => {
                let mut row = stub.clone();
                row.retry_count = 1;
                row.ingestion_status = failure_status(1, permanent, max_retries);
                row.error_details = Some(details.clone());
                row.raw_content_pointer = None;
                insert_message_row(&tx, &row)?;
                row
            }
        };

        tx.commit()?;
        Ok(result)
    }

    pub fn list_messages(&self, filters: &MessageFilters) -> Result<Vec<Message>, StoreError> {
        let mut sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE 1 = 1");
        let mut params_vec: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(project_id) = &filters.project_id {
            sql.push_str(" AND project_id = ?");
            params_vec.push(Box::new(project_id.clone()));
        }

        if let Some(status) = filters.status {
            sql.push_str(" AND ingestion_status = ?");
            params_vec.push(Box::new(status.to_string()));
        }

        if let Some(thread_id) = &filters.thread_id {
            sql.push_str(" AND thread_id = ?");
            params_vec.push(Box::new(thread_id.clone()));
        }

        if let Some(since) = &filters.since {
            sql.push_str(" AND sent_at >= ?");
            params_vec.push(Box::new(format_timestamp(since)));
        }

        if let Some(until) = &filters.until {
            sql.push_str(" AND sent_at <= ?");
            params_vec.push(Box::new(format_timestamp(until)));
        }

        if !filters.ids.is_empty() {
            let placeholders = vec!["?"; filters.ids.len()].join(", ");
            sql.push_str(&format!(" AND provider_message_id IN ({placeholders})"));
            for id in &filters.ids {
                params_vec.push(Box::new(id.clone()));
            }
        }

        sql.push_str(" ORDER BY sent_at ASC, provider_message_id ASC");
        if filters.limit > 0 {
            sql.push_str(" LIMIT ?");
            params_vec.push(Box::new(filters.limit as i64));
        }

        let params_refs: Vec<&dyn ToSql> = params_vec.iter().map(|v| v.as_ref()).collect();
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let messages = stmt
            .query_map(params_refs.as_slice(), Message::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(messages)
    }

    pub fn count_messages(&self, project_id: &str) -> Result<i64, StoreError> {
        let count = self.lock()?.query_row(
            "SELECT COUNT(*) FROM messages WHERE project_id = ?",
            [project_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Stores a score produced by the external relevance scorer.
    pub fn set_relevance_score(
        &self,
        provider_message_id: &str,
        score: f64,
    ) -> Result<(), StoreError> {
        if !(0.0..=1.0).contains(&score) {
            return Err(StoreError::InvalidValue(format!(
                "relevance score {score} is outside [0, 1]"
            )));
        }

        let updated = self.lock()?.execute(
            "UPDATE messages SET relevance_score = ? WHERE provider_message_id = ?",
            params![score, provider_message_id],
        )?;
        if updated == 0 {
            return Err(StoreError::InvalidValue(format!(
                "no message with id {provider_message_id}"
            )));
        }
        Ok(())
    }

    pub fn get_sync_state(&self, key: &str) -> Result<Option<SyncState>, StoreError> {
        let conn = self.lock()?;
        let state = conn
            .query_row(
                "SELECT key, value, updated_at FROM sync_state WHERE key = ? LIMIT 1",
                [key],
                SyncState::from_row,
            )
            .optional()?;
        Ok(state)
    }

    pub fn set_sync_state(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let conn = self.lock()?;
        upsert_sync_state(&conn, key, value)
    }

    pub fn delete_sync_state(&self, key: &str) -> Result<usize, StoreError> {
        let deleted = self
            .lock()?
            .execute("DELETE FROM sync_state WHERE key = ?", [key])?;
        Ok(deleted)
    }

    pub fn get_cursor(&self, key: &str) -> Result<Option<u64>, StoreError> {
        Ok(self
            .get_sync_state(key)?
            .and_then(|state| state.value)
            .and_then(|value| value.trim().parse::<u64>().ok()))
    }

    /// Moves a numeric cursor forward and returns the stored value. A cursor
    /// never moves backwards, whatever order callers arrive in.
    pub fn advance_cursor(&self, key: &str, cursor: u64) -> Result<u64, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let current: Option<String> = tx
            .query_row(
                "SELECT value FROM sync_state WHERE key = ? LIMIT 1",
                [key],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        let current = current.and_then(|value| value.trim().parse::<u64>().ok());

        let next = current.map_or(cursor, |stored| stored.max(cursor));
        if current != Some(next) {
            upsert_sync_state(&tx, key, &next.to_string())?;
        }

        tx.commit()?;
        Ok(next)
    }

    pub fn get_stats(&self) -> Result<DatabaseStats, StoreError> {
        let conn = self.lock()?;
        let total_projects: i64 =
            conn.query_row("SELECT COUNT(*) FROM projects", [], |row| row.get(0))?;
        let total_members: i64 =
            conn.query_row("SELECT COUNT(*) FROM team_members", [], |row| row.get(0))?;
        let total_messages: i64 =
            conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;

        let mut stmt = conn.prepare(
            "SELECT ingestion_status, COUNT(*) AS count FROM messages GROUP BY ingestion_status ORDER BY ingestion_status",
        )?;
        let messages_by_status = stmt
            .query_map([], |row| {
                Ok(StatusCount {
                    status: row.get(0)?,
                    count: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut stmt = conn.prepare(
            "SELECT project_id, COUNT(*) AS count FROM messages GROUP BY project_id ORDER BY count DESC",
        )?;
        let messages_by_project = stmt
            .query_map([], |row| {
                Ok(ProjectMessageCount {
                    project_id: row.get(0)?,
                    count: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(DatabaseStats {
            total_projects,
            total_members,
            total_messages,
            messages_by_status,
            messages_by_project,
        })
    }
}

fn failure_status(retry_count: u32, permanent: bool, max_retries: u32) -> IngestionStatus {
    if permanent || retry_count >= max_retries {
        IngestionStatus::Failed
    } else {
        IngestionStatus::Pending
    }
}

fn insert_message_row(conn: &Connection, message: &Message) -> Result<(), StoreError> {
    let recipients = serde_json::to_string(&message.recipients)?;
    let cc_recipients = serde_json::to_string(&message.cc_recipients)?;
    let error_details = message
        .error_details
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    let provider_metadata = message
        .provider_metadata
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    conn.execute(
        r#"
        INSERT INTO messages (
            provider_message_id, thread_id, project_id, user_id, sender, recipients, cc_recipients,
            sent_at, subject, body_text, raw_content_pointer, ingestion_status, analysis_status,
            assignment_status, relevance_score, retry_count, error_details, provider_metadata, ingested_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        params![
            message.provider_message_id,
            message.thread_id,
            message.project_id,
            message.user_id,
            message.sender,
            recipients,
            cc_recipients,
            message.sent_at.as_ref().map(format_timestamp),
            message.subject,
            message.body_text,
            message.raw_content_pointer,
            message.ingestion_status.to_string(),
            message.analysis_status,
            message.assignment_status,
            message.relevance_score,
            message.retry_count,
            error_details,
            provider_metadata,
            message.ingested_at,
        ],
    )?;

    Ok(())
}

fn upsert_sync_state(conn: &Connection, key: &str, value: &str) -> Result<(), StoreError> {
    conn.execute(
        r#"
        INSERT INTO sync_state (key, value, updated_at)
        VALUES (?, ?, strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
        ON CONFLICT(key) DO UPDATE SET
            value = excluded.value,
            updated_at = excluded.updated_at
        "#,
        params![key, value],
    )?;
    Ok(())
}
