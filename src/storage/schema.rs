//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the Catalog-Mirror database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- One row per catalog tool, identified by slug
CREATE TABLE IF NOT EXISTS tools (
    id TEXT PRIMARY KEY,
    slug TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    tagline TEXT,
    description TEXT NOT NULL DEFAULT '',
    language TEXT,
    license TEXT,
    code_repository TEXT,
    date_published TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tools_name ON tools(name);

-- Install commands, one per tool and platform key
CREATE TABLE IF NOT EXISTS install_instructions (
    id TEXT PRIMARY KEY,
    tool_id TEXT NOT NULL REFERENCES tools(id) ON DELETE CASCADE,
    platform_key TEXT NOT NULL,
    command TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE(tool_id, platform_key)
);

CREATE INDEX IF NOT EXISTS idx_install_instructions_tool ON install_instructions(tool_id);
CREATE INDEX IF NOT EXISTS idx_install_instructions_platform ON install_instructions(platform_key);

-- Track update runs
CREATE TABLE IF NOT EXISTS update_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    config_hash TEXT NOT NULL,
    status TEXT NOT NULL,
    processed INTEGER NOT NULL DEFAULT 0,
    total INTEGER NOT NULL DEFAULT 0,
    fetch_failures INTEGER NOT NULL DEFAULT 0,
    persistence_failures INTEGER NOT NULL DEFAULT 0,
    error_message TEXT
);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
