use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Transaction};

use crate::db::schema;

const SCHEMA_VERSION_KEY: &str = "schema_version";

type MigrationFn = fn(&Transaction<'_>) -> Result<()>;

/// Ordered schema steps; the last entry's version is the latest schema.
const MIGRATIONS: &[(u32, MigrationFn)] = &[(1, apply_v1)];

pub fn latest_version() -> u32 {
    MIGRATIONS.last().map(|(version, _)| *version).unwrap_or(0)
}

pub fn migrate(conn: &mut Connection) -> Result<()> {
    ensure_sync_state_table(conn)?;

    let current_version = current_schema_version(conn)?;
    let latest = latest_version();
    if current_version > latest {
        return Err(anyhow!(
            "database schema version {current_version} is newer than supported version {latest}"
        ));
    }

    for (version, apply) in MIGRATIONS
        .iter()
        .filter(|(version, _)| *version > current_version)
    {
        let tx = conn
            .transaction()
            .with_context(|| format!("begin schema migration v{version}"))?;
        apply(&tx).with_context(|| format!("apply schema migration v{version}"))?;
        set_schema_version(&tx, *version)?;
        tx.commit()
            .with_context(|| format!("commit schema migration v{version}"))?;
    }

    Ok(())
}

fn ensure_sync_state_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS sync_state (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
        );
        "#,
    )
    .context("ensure sync_state table for migration tracking")?;

    Ok(())
}

fn current_schema_version(conn: &Connection) -> Result<u32> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value FROM sync_state WHERE key = ?1 LIMIT 1",
            params![SCHEMA_VERSION_KEY],
            |row| row.get(0),
        )
        .optional()
        .context("read current schema version from sync_state")?;

    match raw {
        None => Ok(0),
        Some(version) => version
            .parse::<u32>()
            .with_context(|| format!("invalid schema version in database: {version}")),
    }
}

fn set_schema_version(conn: &Connection, version: u32) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO sync_state (key, value, updated_at)
        VALUES (?1, ?2, strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
        ON CONFLICT(key) DO UPDATE SET
            value = excluded.value,
            updated_at = excluded.updated_at
        "#,
        params![SCHEMA_VERSION_KEY, version.to_string()],
    )
    .with_context(|| format!("set schema version to {version}"))?;

    Ok(())
}

fn apply_v1(tx: &Transaction<'_>) -> Result<()> {
    schema::create_schema(tx)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use anyhow::Result;
    use rusqlite::Connection;
    use uuid::Uuid;

    use super::{current_schema_version, latest_version, migrate, set_schema_version};

    fn temp_db_path() -> PathBuf {
        std::env::temp_dir().join(format!("remail-migrations-{}.db", Uuid::new_v4()))
    }

    #[test]
    fn fresh_database_reaches_latest_version_and_stays_there() -> Result<()> {
        let db_path = temp_db_path();
        let mut conn = Connection::open(&db_path)?;

        migrate(&mut conn)?;
        assert_eq!(current_schema_version(&conn)?, latest_version());
        migrate(&mut conn)?;
        assert_eq!(current_schema_version(&conn)?, latest_version());

        let tables: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('projects', 'team_members', 'messages')",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(tables, 3);

        let _ = std::fs::remove_file(db_path);
        Ok(())
    }

    #[test]
    fn newer_schema_is_rejected() -> Result<()> {
        let db_path = temp_db_path();
        let mut conn = Connection::open(&db_path)?;

        migrate(&mut conn)?;
        set_schema_version(&conn, latest_version() + 1)?;
        assert!(migrate(&mut conn).is_err());

        let _ = std::fs::remove_file(db_path);
        Ok(())
    }
}
