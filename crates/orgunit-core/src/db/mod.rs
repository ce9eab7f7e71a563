//! SQLite store for organisational units.
//!
//! Connections opened here share the same runtime pragmas:
//! - `journal_mode = WAL` so readers never block the single writer
//! - `busy_timeout` from [`StoreConfig`] so competing writers queue instead of failing
//! - `foreign_keys = ON` so a parent link always points at a stored unit

pub mod migrations;
pub mod query;
pub mod schema;

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::{path::Path, time::Duration};

use crate::config::StoreConfig;

/// Busy timeout used when no config is supplied.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open (or create) the unit store at `path`, apply runtime pragmas, and
/// migrate the schema to the latest version.
///
/// # Errors
///
/// Returns an error if opening, configuring or migrating the database fails.
pub fn open_store(path: &Path, config: &StoreConfig) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create store directory {}", parent.display()))?;
    }

    let mut conn =
        Connection::open(path).with_context(|| format!("open unit store {}", path.display()))?;

    configure_connection(&conn, config.busy_timeout()).context("configure sqlite pragmas")?;
    migrations::migrate(&mut conn).context("apply store migrations")?;

    tracing::debug!(path = %path.display(), "unit store ready");
    Ok(conn)
}

/// Open a private in-memory store, migrated to the latest schema.
///
/// # Errors
///
/// Returns an error if SQLite cannot allocate the database.
pub fn open_in_memory_store() -> Result<Connection> {
    let mut conn = Connection::open_in_memory().context("open in-memory unit store")?;
    configure_connection(&conn, DEFAULT_BUSY_TIMEOUT).context("configure sqlite pragmas")?;
    migrations::migrate(&mut conn).context("apply store migrations")?;
    Ok(conn)
}

/// Apply the runtime pragmas every store connection shares.
///
/// # Errors
///
/// Returns an error if SQLite rejects a pragma, e.g. inside an open
/// transaction.
pub fn configure_connection(conn: &Connection, busy_timeout: Duration) -> rusqlite::Result<()> {
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    let _journal_mode: String =
        conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.busy_timeout(busy_timeout)?;
    Ok(())
}
