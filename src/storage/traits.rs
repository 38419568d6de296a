//! Storage traits and error types
//!
//! This module defines the trait interface the update pipeline writes through
//! and the associated error types.

use crate::catalog::{InstallInstructionRecord, ToolRecord};
use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("Storage operation cancelled")]
    Cancelled,

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Write interface the update pipeline persists through
///
/// Both operations must be idempotent: writing the same tool or instruction
/// twice leaves one row.
#[async_trait]
pub trait Store: Send + Sync {
    /// Inserts or updates a tool, keyed by slug
    ///
    /// # Returns
    ///
    /// The id the tool is persisted under. For an existing slug this is the
    /// id of the first insert, not `tool.id`.
    async fn upsert_tool(&self, token: &CancellationToken, tool: &ToolRecord)
        -> StorageResult<String>;

    /// Inserts or updates an install instruction, keyed by tool and platform key
    async fn upsert_install_instruction(
        &self,
        token: &CancellationToken,
        instruction: &InstallInstructionRecord,
    ) -> StorageResult<()>;
}
