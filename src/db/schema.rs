use anyhow::Result;
use rusqlite::Connection;

pub fn create_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS projects (
            project_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            user_id TEXT NOT NULL,
            mailbox TEXT NOT NULL,
            keywords TEXT,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
        );

        CREATE TABLE IF NOT EXISTS team_members (
            project_id TEXT NOT NULL REFERENCES projects(project_id) ON DELETE CASCADE,
            email_address TEXT NOT NULL,
            display_name TEXT,
            side TEXT NOT NULL CHECK(side IN ('contractor', 'homeowner', 'other')),
            PRIMARY KEY (project_id, email_address)
        );

        CREATE TABLE IF NOT EXISTS messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            provider_message_id TEXT NOT NULL UNIQUE,
            thread_id TEXT,
            project_id TEXT NOT NULL REFERENCES projects(project_id),
            user_id TEXT NOT NULL,
            sender TEXT NOT NULL,
            recipients TEXT,
            cc_recipients TEXT,
            sent_at TEXT,
            subject TEXT,
            body_text TEXT,
            raw_content_pointer TEXT,
            ingestion_status TEXT NOT NULL
                CHECK(ingestion_status IN ('pending', 'completed', 'failed')),
            analysis_status TEXT,
            assignment_status TEXT,
            relevance_score REAL CHECK(relevance_score IS NULL OR (relevance_score >= 0 AND relevance_score <= 1)),
            retry_count INTEGER NOT NULL DEFAULT 0 CHECK(retry_count >= 0),
            error_details TEXT,
            provider_metadata TEXT,
            ingested_at TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_messages_project_id ON messages(project_id);
        CREATE INDEX IF NOT EXISTS idx_messages_thread_id ON messages(thread_id);
        CREATE INDEX IF NOT EXISTS idx_messages_sent_at ON messages(sent_at);
        CREATE INDEX IF NOT EXISTS idx_messages_status ON messages(ingestion_status);
        CREATE INDEX IF NOT EXISTS idx_projects_mailbox ON projects(mailbox);
        "#,
    )?;

    Ok(())
}
