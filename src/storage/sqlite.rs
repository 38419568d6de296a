//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the [`Store`] trait,
//! plus run tracking and the read queries used for statistics.
//!
//! All access goes through a single connection behind a mutex. Trait calls run
//! on the blocking pool so the async runtime never waits on disk I/O.

use crate::catalog::{InstallInstructionRecord, ToolRecord};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Store, StorageError, StorageResult};
use crate::storage::{RunCounts, RunRecord, RunStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

const TOOL_COLUMNS: &str = "id, slug, name, tagline, description, language, license, \
     code_repository, date_published, created_at, updated_at";

const RUN_COLUMNS: &str = "id, started_at, finished_at, config_hash, status, processed, total, \
     fetch_failures, persistence_failures, error_message";

/// SQLite storage backend
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Creates a new SqliteStore instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStore)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA busy_timeout = 5000;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        lock_connection(&self.conn)
    }

    /// Runs `op` against the connection on the blocking pool
    ///
    /// Refuses to start once the token is cancelled; an operation that has
    /// already started always runs to completion.
    async fn with_connection<T, F>(&self, token: &CancellationToken, op: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> StorageResult<T> + Send + 'static,
    {
        if token.is_cancelled() {
            return Err(StorageError::Cancelled);
        }

        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = lock_connection(&conn)?;
            op(&guard)
        })
        .await?
    }

    // ===== Run Management =====

    /// Records the start of an update run
    ///
    /// # Returns
    ///
    /// The ID of the newly created run
    pub fn begin_run(&self, config_hash: &str) -> StorageResult<i64> {
        let conn = self.lock()?;
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO update_runs (started_at, config_hash, status) VALUES (?1, ?2, ?3)",
            params![now, config_hash, RunStatus::Running.to_db_string()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Records how an update run ended
    pub fn finish_run(
        &self,
        run_id: i64,
        status: RunStatus,
        counts: &RunCounts,
        error_message: Option<&str>,
    ) -> StorageResult<()> {
        let conn = self.lock()?;
        let now = Utc::now().to_rfc3339();
        let updated = conn.execute(
            "UPDATE update_runs SET status = ?1, finished_at = ?2, processed = ?3, total = ?4,
             fetch_failures = ?5, persistence_failures = ?6, error_message = ?7 WHERE id = ?8",
            params![
                status.to_db_string(),
                now,
                counts.processed as i64,
                counts.total as i64,
                counts.fetch_failures as i64,
                counts.persistence_failures as i64,
                error_message,
                run_id
            ],
        )?;

        if updated == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    /// Gets a run by ID
    pub fn get_run(&self, run_id: i64) -> StorageResult<RunRecord> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {} FROM update_runs WHERE id = ?1", RUN_COLUMNS),
            params![run_id],
            run_from_row,
        )
        .optional()?
        .ok_or(StorageError::RunNotFound(run_id))
    }

    /// Gets the most recent runs, newest first
    pub fn latest_runs(&self, limit: usize) -> StorageResult<Vec<RunRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM update_runs ORDER BY id DESC LIMIT ?1",
            RUN_COLUMNS
        ))?;

        let runs = stmt
            .query_map(params![limit as i64], run_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(runs)
    }

    // ===== Queries =====

    /// Gets a tool by its slug
    pub fn get_tool_by_slug(&self, slug: &str) -> StorageResult<Option<ToolRecord>> {
        let conn = self.lock()?;
        let tool = conn
            .query_row(
                &format!("SELECT {} FROM tools WHERE slug = ?1", TOOL_COLUMNS),
                params![slug],
                tool_from_row,
            )
            .optional()?;
        Ok(tool)
    }

    /// Gets every install instruction for a tool, ordered by platform key
    pub fn instructions_for_tool(&self, tool_id: &str) -> StorageResult<Vec<InstallInstructionRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, tool_id, platform_key, command, created_at
             FROM install_instructions WHERE tool_id = ?1 ORDER BY platform_key",
        )?;

        let instructions = stmt
            .query_map(params![tool_id], |row| {
                Ok(InstallInstructionRecord {
                    id: row.get(0)?,
                    tool_id: row.get(1)?,
                    platform_key: row.get(2)?,
                    command: row.get(3)?,
                    created_at: timestamp(row, 4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(instructions)
    }

    pub fn count_tools(&self) -> StorageResult<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM tools", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn count_instructions(&self) -> StorageResult<usize> {
        let conn = self.lock()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM install_instructions", [], |row| {
                row.get(0)
            })?;
        Ok(count as usize)
    }

    /// Instruction counts per platform key, most common first
    pub fn platform_breakdown(&self, limit: usize) -> StorageResult<Vec<(String, usize)>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT platform_key, COUNT(*) AS n FROM install_instructions
             GROUP BY platform_key ORDER BY n DESC, platform_key ASC LIMIT ?1",
        )?;

        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn upsert_tool(
        &self,
        token: &CancellationToken,
        tool: &ToolRecord,
    ) -> StorageResult<String> {
        let tool = tool.clone();

        self.with_connection(token, move |conn| {
            let id = conn.query_row(
                "INSERT INTO tools (id, slug, name, tagline, description, language, license,
                 code_repository, date_published, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT(slug) DO UPDATE SET
                    name = excluded.name,
                    tagline = excluded.tagline,
                    description = excluded.description,
                    language = excluded.language,
                    license = excluded.license,
                    code_repository = excluded.code_repository,
                    date_published = excluded.date_published,
                    updated_at = excluded.updated_at
                 RETURNING id",
                params![
                    tool.id,
                    tool.slug,
                    tool.name,
                    tool.tagline,
                    tool.description,
                    tool.language,
                    tool.license,
                    tool.code_repository,
                    tool.date_published,
                    tool.created_at.to_rfc3339(),
                    tool.updated_at.to_rfc3339()
                ],
                |row| row.get::<_, String>(0),
            )?;
            Ok(id)
        })
        .await
    }

    async fn upsert_install_instruction(
        &self,
        token: &CancellationToken,
        instruction: &InstallInstructionRecord,
    ) -> StorageResult<()> {
        let instruction = instruction.clone();

        self.with_connection(token, move |conn| {
            conn.execute(
                "INSERT INTO install_instructions (id, tool_id, platform_key, command, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(tool_id, platform_key) DO UPDATE SET command = excluded.command",
                params![
                    instruction.id,
                    instruction.tool_id,
                    instruction.platform_key,
                    instruction.command,
                    instruction.created_at.to_rfc3339()
                ],
            )?;
            Ok(())
        })
        .await
    }
}

fn lock_connection(conn: &Mutex<Connection>) -> StorageResult<MutexGuard<'_, Connection>> {
    conn.lock()
        .map_err(|_| StorageError::Database("connection lock poisoned".to_string()))
}

fn timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn tool_from_row(row: &Row<'_>) -> rusqlite::Result<ToolRecord> {
    Ok(ToolRecord {
        id: row.get(0)?,
        slug: row.get(1)?,
        name: row.get(2)?,
        tagline: row.get(3)?,
        description: row.get(4)?,
        language: row.get(5)?,
        license: row.get(6)?,
        code_repository: row.get(7)?,
        date_published: row.get(8)?,
        created_at: timestamp(row, 9)?,
        updated_at: timestamp(row, 10)?,
    })
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    Ok(RunRecord {
        id: row.get(0)?,
        started_at: row.get(1)?,
        finished_at: row.get(2)?,
        config_hash: row.get(3)?,
        status: RunStatus::from_db_string(&row.get::<_, String>(4)?).unwrap_or(RunStatus::Failed),
        counts: RunCounts {
            processed: row.get::<_, i64>(5)? as usize,
            total: row.get::<_, i64>(6)? as usize,
            fetch_failures: row.get::<_, i64>(7)? as usize,
            persistence_failures: row.get::<_, i64>(8)? as usize,
        },
        error_message: row.get(9)?,
    })
}
