//! SQLite schema for the organisational unit store.
//!
//! - `organisational_units` holds one row per unit; `parent_id` references
//!   another row in the same table
//! - sibling uniqueness is a partial unique index over active rows, with the
//!   root level folded into one group via `COALESCE(parent_id, '')`
//! - `hierarchy_meta` mirrors `PRAGMA user_version` for tooling that cannot
//!   read pragmas

/// Table holding every unit.
pub const UNITS_TABLE: &str = "organisational_units";

/// Migration v1: units table plus metadata.
pub const MIGRATION_V1_SQL: &str = r"
CREATE TABLE IF NOT EXISTS organisational_units (
    id TEXT PRIMARY KEY,
    parent_id TEXT REFERENCES organisational_units(id),
    entity_type TEXT NOT NULL CHECK (length(trim(entity_type)) > 0),
    entity_id TEXT NOT NULL,
    deleted_at_us INTEGER,
    created_at_us INTEGER NOT NULL,
    updated_at_us INTEGER NOT NULL,
    CHECK (parent_id IS NULL OR parent_id <> id)
);

CREATE TABLE IF NOT EXISTS hierarchy_meta (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    schema_version INTEGER NOT NULL
);

INSERT OR IGNORE INTO hierarchy_meta (id, schema_version) VALUES (1, 1);
";

/// Migration v2: children lookup, entity scope and sibling uniqueness indexes.
pub const MIGRATION_V2_SQL: &str = r"
CREATE INDEX IF NOT EXISTS idx_units_parent
    ON organisational_units(parent_id);

CREATE INDEX IF NOT EXISTS idx_units_entity
    ON organisational_units(entity_type, entity_id);

CREATE UNIQUE INDEX IF NOT EXISTS uq_units_sibling_entity
    ON organisational_units(COALESCE(parent_id, ''), entity_type, entity_id)
    WHERE deleted_at_us IS NULL;
";

/// Indexes every migrated database must have.
pub const REQUIRED_INDEXES: &[&str] = &[
    "idx_units_parent",
    "idx_units_entity",
    "uq_units_sibling_entity",
];
