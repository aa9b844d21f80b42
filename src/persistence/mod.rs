pub mod migrations;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use directories::BaseDirs;
use duckdb::{params, Connection};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::types::{MemoryId, MemoryRecord, Metadata, ToolLogEntry};

const DIMENSION_KEY: &str = "embedding_dimension";

#[derive(Clone)]
pub struct Persistence {
    conn: Arc<Mutex<Connection>>,
}

impl Persistence {
    /// Create or open the database at the provided path and run migrations.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = expand_tilde(db_path.as_ref())?;
        if let Some(dir) = db_path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir).context("creating DB directory")?;
            }
        }
        let conn = Connection::open(&db_path).context("opening DuckDB")?;
        Self::from_connection(conn)
    }

    /// Open a throwaway in-memory database.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("opening in-memory DuckDB")?;
        Self::from_connection(conn)
    }

    /// Creates or opens the default database at ~/.ondevice-ai/memory.duckdb
    pub fn new_default() -> Result<Self> {
        let base = BaseDirs::new().context("base directories not available")?;
        let path = base.home_dir().join(".ondevice-ai").join("memory.duckdb");
        Self::new(path)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        migrations::run(&conn).context("running migrations")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Checkpoint the database so all WAL data lands in the main file.
    pub fn checkpoint(&self) -> Result<()> {
        let conn = self.conn();
        conn.execute_batch("CHECKPOINT;")
            .context("checkpointing database")
    }

    /// Exclusive access to the shared connection.
    pub fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .expect("database connection mutex poisoned")
    }

    // ---------- Store settings ----------

    pub fn embedding_dimension(&self) -> Result<Option<usize>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT value FROM store_meta WHERE key = ?")?;
        let mut rows = stmt.query(params![DIMENSION_KEY])?;
        match rows.next()? {
            Some(row) => {
                let value: String = row.get(0)?;
                let dimension = value
                    .parse::<usize>()
                    .with_context(|| format!("invalid stored embedding dimension '{}'", value))?;
                Ok(Some(dimension))
            }
            None => Ok(None),
        }
    }

    // ---------- Memories ----------

    pub fn insert_memory(
        &self,
        content: &str,
        embedding: &[f32],
        metadata: &Metadata,
        created_at: DateTime<Utc>,
    ) -> Result<MemoryId> {
        let conn = self.conn();
        insert_memory_row(&conn, content, embedding, metadata, created_at)
    }

    /// Insert the first memory and record its dimension in one transaction.
    pub fn insert_first_memory(
        &self,
        content: &str,
        embedding: &[f32],
        metadata: &Metadata,
        created_at: DateTime<Utc>,
    ) -> Result<MemoryId> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("starting transaction")?;
        tx.execute(
            "INSERT OR REPLACE INTO store_meta (key, value) VALUES (?, ?)",
            params![DIMENSION_KEY, embedding.len().to_string()],
        )
        .context("storing embedding dimension")?;
        let id = insert_memory_row(&tx, content, embedding, metadata, created_at)?;
        tx.commit().context("committing first memory")?;
        Ok(id)
    }

    pub fn get_memory(&self, id: MemoryId) -> Result<Option<MemoryRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, content, embedding, metadata, created_at FROM memories WHERE id = ?",
        )?;
        let mut rows = stmt.query(params![id])?;
        match rows.next()? {
            Some(row) => Ok(Some(memory_from_row(row)?)),
            None => Ok(None),
        }
    }

    /// Every stored memory, in insertion order.
    pub fn all_memories(&self) -> Result<Vec<MemoryRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, content, embedding, metadata, created_at FROM memories ORDER BY id ASC",
        )?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(memory_from_row(row)?);
        }
        Ok(out)
    }

    /// Newest-first page of memories.
    pub fn list_memories(&self, limit: usize, offset: usize) -> Result<Vec<MemoryRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, content, embedding, metadata, created_at FROM memories ORDER BY id DESC LIMIT ? OFFSET ?",
        )?;
        let mut rows = stmt.query(params![limit as i64, offset as i64])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(memory_from_row(row)?);
        }
        Ok(out)
    }

    pub fn delete_memory(&self, id: MemoryId) -> Result<bool> {
        let conn = self.conn();
        let changed = conn
            .execute("DELETE FROM memories WHERE id = ?", params![id])
            .context("deleting memory")?;
        Ok(changed > 0)
    }

    pub fn count_memories(&self) -> Result<u64> {
        let conn = self.conn();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    // ---------- Tool Log ----------

    pub fn log_tool(
        &self,
        run_id: &str,
        tool_name: &str,
        argument: &str,
        observation: &str,
        success: bool,
    ) -> Result<i64> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "INSERT INTO tool_log (run_id, tool_name, argument, observation, success, created_at) VALUES (?, ?, ?, ?, ?, ?) RETURNING id",
        )?;
        let id: i64 = stmt.query_row(
            params![
                run_id,
                tool_name,
                argument,
                observation,
                success,
                Utc::now().to_rfc3339()
            ],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub fn list_tool_log(&self, run_id: &str) -> Result<Vec<ToolLogEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, run_id, tool_name, argument, observation, success, created_at FROM tool_log WHERE run_id = ? ORDER BY id ASC",
        )?;
        let mut rows = stmt.query(params![run_id])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let created_at: String = row.get(6)?;
            out.push(ToolLogEntry {
                id: row.get(0)?,
                run_id: row.get(1)?,
                tool_name: row.get(2)?,
                argument: row.get(3)?,
                observation: row.get(4)?,
                success: row.get(5)?,
                created_at: parse_timestamp(&created_at)?,
            });
        }
        Ok(out)
    }
}

fn insert_memory_row(
    conn: &Connection,
    content: &str,
    embedding: &[f32],
    metadata: &Metadata,
    created_at: DateTime<Utc>,
) -> Result<MemoryId> {
    let embedding_json = serde_json::to_string(embedding)?;
    let metadata_json = serde_json::to_string(metadata)?;
    let mut stmt = conn.prepare(
        "INSERT INTO memories (content, embedding, metadata, created_at) VALUES (?, ?, ?, ?) RETURNING id",
    )?;
    let id: i64 = stmt.query_row(
        params![content, embedding_json, metadata_json, created_at.to_rfc3339()],
        |row| row.get(0),
    )?;
    Ok(id)
}

fn memory_from_row(row: &duckdb::Row) -> Result<MemoryRecord> {
    let id: i64 = row.get(0)?;
    let content: String = row.get(1)?;
    let embedding_text: String = row.get(2)?;
    let metadata_text: String = row.get(3)?;
    let created_at: String = row.get(4)?;

    let embedding: Vec<f32> = serde_json::from_str(&embedding_text)
        .with_context(|| format!("decoding embedding of memory {}", id))?;
    let metadata: Metadata = serde_json::from_str(&metadata_text)
        .with_context(|| format!("decoding metadata of memory {}", id))?;

    Ok(MemoryRecord {
        id,
        content,
        embedding,
        metadata,
        created_at: parse_timestamp(&created_at)?,
    })
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .with_context(|| format!("invalid timestamp '{}'", value))
}

fn expand_tilde(path: &Path) -> Result<PathBuf> {
    let path_str = path.to_string_lossy();
    if path_str == "~" {
        let base = BaseDirs::new().context("base directories not available")?;
        Ok(base.home_dir().to_path_buf())
    } else if let Some(stripped) = path_str.strip_prefix("~/") {
        let base = BaseDirs::new().context("base directories not available")?;
        Ok(base.home_dir().join(stripped))
    } else {
        Ok(path.to_path_buf())
    }
}
