use anyhow::{Context, Result};
use duckdb::Connection;
use tracing::warn;

pub fn run(conn: &Connection) -> Result<()> {
    // Simple migration system: ensure a schema version table and apply migrations sequentially.
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        );
        "#,
    )
    .context("creating schema_migrations table")?;

    let current = current_version(conn)?;
    let mut migrations_applied = false;

    if current < 1 {
        apply_v1(conn)?;
        set_version(conn, 1)?;
        migrations_applied = true;
    }

    if current < 2 {
        apply_v2(conn)?;
        set_version(conn, 2)?;
        migrations_applied = true;
    }

    // Merge the WAL so schema changes are not replayed on the next open.
    if migrations_applied {
        if let Err(err) = conn.execute_batch("FORCE CHECKPOINT;") {
            warn!("Checkpoint after migrations failed: {}", err);
        }
    }

    Ok(())
}

pub fn current_version(conn: &Connection) -> Result<i64> {
    let mut stmt = conn.prepare("SELECT COALESCE(MAX(version), 0) FROM schema_migrations")?;
    let v: i64 = stmt.query_row([], |row| row.get(0))?;
    Ok(v)
}

fn set_version(conn: &Connection, v: i64) -> Result<()> {
    conn.execute("INSERT INTO schema_migrations (version) VALUES (?)", [v])?;
    Ok(())
}

fn apply_v1(conn: &Connection) -> Result<()> {
    // Semantic memory: one row per embedded text, plus store-wide settings.
    conn.execute_batch(
        r#"
        CREATE SEQUENCE IF NOT EXISTS memories_id_seq START 1;

        CREATE TABLE IF NOT EXISTS memories (
            id BIGINT PRIMARY KEY DEFAULT nextval('memories_id_seq'),
            content TEXT NOT NULL,
            embedding TEXT NOT NULL,
            metadata TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS store_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        "#,
    )
    .context("applying v1 schema (memories)")
}

fn apply_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE SEQUENCE IF NOT EXISTS tool_log_id_seq START 1;

        CREATE TABLE IF NOT EXISTS tool_log (
            id BIGINT PRIMARY KEY DEFAULT nextval('tool_log_id_seq'),
            run_id TEXT NOT NULL,
            tool_name TEXT NOT NULL,
            argument TEXT NOT NULL,
            observation TEXT NOT NULL,
            success BOOLEAN NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_tool_log_run ON tool_log(run_id);
        "#,
    )
    .context("applying v2 schema (tool log)")
}
