//! Versioned schema migrations for the unit store.
//!
//! `PRAGMA user_version` is the source of truth; `hierarchy_meta` follows it.
//! After the last step the required indexes are checked, since the sibling
//! uniqueness guarantee lives in one of them.

use anyhow::{Context, Result, bail};
use rusqlite::{Connection, OptionalExtension, types::Type};

use super::schema;

/// Latest schema version understood by this build.
pub const LATEST_SCHEMA_VERSION: u32 = 2;

struct Migration {
    version: u32,
    summary: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        summary: "units table and metadata",
        sql: schema::MIGRATION_V1_SQL,
    },
    Migration {
        version: 2,
        summary: "parent, entity and sibling uniqueness indexes",
        sql: schema::MIGRATION_V2_SQL,
    },
];

/// Read `PRAGMA user_version` as a `u32`.
///
/// # Errors
///
/// Returns an error if querying SQLite fails or the stored value is negative.
pub fn current_schema_version(conn: &Connection) -> rusqlite::Result<u32> {
    let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    u32::try_from(version).map_err(|error| {
        rusqlite::Error::FromSqlConversionFailure(0, Type::Integer, Box::new(error))
    })
}

/// Bring the store up to [`LATEST_SCHEMA_VERSION`] and return the version
/// it ends at.
///
/// Pending steps run oldest first, one transaction each, so a failure
/// leaves the store at the last completed version. A store written by a
/// newer build is refused rather than touched.
///
/// # Errors
///
/// Returns an error if a step fails, the store is newer than this build, or
/// a required index is missing afterwards.
pub fn migrate(conn: &mut Connection) -> Result<u32> {
    let start = current_schema_version(conn).context("read schema version")?;
    if start > LATEST_SCHEMA_VERSION {
        bail!("store schema v{start} is newer than supported v{LATEST_SCHEMA_VERSION}");
    }

    for step in MIGRATIONS.iter().filter(|m| m.version > start) {
        let tx = conn.transaction()?;
        tx.execute_batch(step.sql)
            .with_context(|| format!("migration v{} ({})", step.version, step.summary))?;
        tx.pragma_update(None, "user_version", i64::from(step.version))?;
        tx.execute(
            "UPDATE hierarchy_meta SET schema_version = ?1 WHERE id = 1",
            [i64::from(step.version)],
        )?;
        tx.commit()?;
        tracing::info!(version = step.version, summary = step.summary, "migrated unit store");
    }

    verify_required_indexes(conn)?;
    Ok(LATEST_SCHEMA_VERSION)
}

/// Fail when any index in [`schema::REQUIRED_INDEXES`] is absent.
///
/// # Errors
///
/// Names the first missing index.
pub fn verify_required_indexes(conn: &Connection) -> Result<()> {
    let mut stmt =
        conn.prepare_cached("SELECT 1 FROM sqlite_master WHERE type = 'index' AND name = ?1")?;
    for index in schema::REQUIRED_INDEXES {
        let present = stmt
            .query_row([index], |_| Ok(()))
            .optional()
            .with_context(|| format!("look up index {index}"))?
            .is_some();
        if !present {
            bail!("unit store is missing required index {index}");
        }
    }
    tracing::debug!(indexes = schema::REQUIRED_INDEXES.len(), "required indexes present");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{LATEST_SCHEMA_VERSION, current_schema_version, migrate, verify_required_indexes};
    use crate::db::schema;
    use rusqlite::{Connection, params};

    fn sqlite_object_exists(
        conn: &Connection,
        object_type: &str,
        object_name: &str,
    ) -> rusqlite::Result<bool> {
        conn.query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = ?1 AND name = ?2
            )",
            params![object_type, object_name],
            |row| row.get(0),
        )
    }

    fn insert_raw(
        conn: &Connection,
        id: &str,
        parent_id: Option<&str>,
        entity_id: &str,
        deleted_at_us: Option<i64>,
    ) -> rusqlite::Result<usize> {
        conn.execute(
            "INSERT INTO organisational_units \
             (id, parent_id, entity_type, entity_id, deleted_at_us, created_at_us, updated_at_us) \
             VALUES (?1, ?2, 'Team', ?3, ?4, 1000, 1000)",
            params![id, parent_id, entity_id, deleted_at_us],
        )
    }

    #[test]
    fn migrate_empty_db_to_latest() -> anyhow::Result<()> {
        let mut conn = Connection::open_in_memory()?;

        let applied = migrate(&mut conn)?;
        assert_eq!(applied, LATEST_SCHEMA_VERSION);
        assert_eq!(current_schema_version(&conn)?, LATEST_SCHEMA_VERSION);

        assert!(sqlite_object_exists(&conn, "table", schema::UNITS_TABLE)?);
        assert!(sqlite_object_exists(&conn, "table", "hierarchy_meta")?);

        for index in schema::REQUIRED_INDEXES {
            assert!(
                sqlite_object_exists(&conn, "index", index)?,
                "missing expected index {index}"
            );
        }

        Ok(())
    }

    #[test]
    fn migrate_is_idempotent() -> anyhow::Result<()> {
        let mut conn = Connection::open_in_memory()?;

        assert_eq!(migrate(&mut conn)?, LATEST_SCHEMA_VERSION);
        assert_eq!(migrate(&mut conn)?, LATEST_SCHEMA_VERSION);

        let meta_rows: i64 =
            conn.query_row("SELECT COUNT(*) FROM hierarchy_meta", [], |row| row.get(0))?;
        assert_eq!(meta_rows, 1);

        let schema_version: i64 = conn.query_row(
            "SELECT schema_version FROM hierarchy_meta WHERE id = 1",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(schema_version, i64::from(LATEST_SCHEMA_VERSION));

        Ok(())
    }

    #[test]
    fn migrate_upgrades_from_v1_with_existing_rows() -> anyhow::Result<()> {
        let mut conn = Connection::open_in_memory()?;
        conn.execute_batch(schema::MIGRATION_V1_SQL)?;
        conn.pragma_update(None, "user_version", 1_i64)?;
        insert_raw(&conn, "root", None, "1", None)?;
        insert_raw(&conn, "child", Some("root"), "2", None)?;

        assert_eq!(migrate(&mut conn)?, LATEST_SCHEMA_VERSION);

        let rows: i64 = conn.query_row(
            "SELECT COUNT(*) FROM organisational_units",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(rows, 2);
        Ok(())
    }

    #[test]
    fn sibling_index_rejects_active_duplicates_only() -> anyhow::Result<()> {
        let mut conn = Connection::open_in_memory()?;
        migrate(&mut conn)?;

        insert_raw(&conn, "root", None, "1", None)?;
        insert_raw(&conn, "a", Some("root"), "2", None)?;
        assert!(insert_raw(&conn, "b", Some("root"), "2", None).is_err());

        // a soft-deleted duplicate does not count
        insert_raw(&conn, "c", Some("root"), "3", Some(5))?;
        insert_raw(&conn, "d", Some("root"), "3", None)?;

        // roots form a single sibling group despite NULL parents
        assert!(insert_raw(&conn, "e", None, "1", None).is_err());
        Ok(())
    }

    #[test]
    fn self_parent_rows_are_rejected() -> anyhow::Result<()> {
        let mut conn = Connection::open_in_memory()?;
        migrate(&mut conn)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        assert!(insert_raw(&conn, "loop", Some("loop"), "1", None).is_err());
        Ok(())
    }

    #[test]
    fn newer_store_is_refused() -> anyhow::Result<()> {
        let mut conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "user_version", i64::from(LATEST_SCHEMA_VERSION) + 1)?;

        let err = migrate(&mut conn).unwrap_err();
        assert!(err.to_string().contains("newer than supported"), "got {err:#}");
        assert!(!sqlite_object_exists(&conn, "table", schema::UNITS_TABLE)?);
        Ok(())
    }

    #[test]
    fn dropped_sibling_index_is_reported() -> anyhow::Result<()> {
        let mut conn = Connection::open_in_memory()?;
        migrate(&mut conn)?;
        conn.execute_batch("DROP INDEX uq_units_sibling_entity")?;

        let err = verify_required_indexes(&conn).unwrap_err();
        assert!(err.to_string().contains("uq_units_sibling_entity"), "got {err:#}");
        assert!(migrate(&mut conn).is_err());
        Ok(())
    }
}
