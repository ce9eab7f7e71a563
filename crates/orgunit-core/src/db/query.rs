//! SQLite-backed [`NodeRepository`].

use anyhow::Context;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params, types::Type};

use crate::error::{HierarchyError, HierarchyResult};
use crate::model::{EntityRef, Node, NodeChanges, NodeId};
use crate::repository::NodeRepository;

const NODE_COLUMNS: &str =
    "id, parent_id, entity_type, entity_id, deleted_at_us, created_at_us, updated_at_us";

/// Repository over a borrowed connection.
///
/// A [`rusqlite::Transaction`] derefs to [`Connection`], so the same type
/// serves both plain reads and transactional mutations.
#[derive(Debug, Clone, Copy)]
pub struct SqliteNodeRepository<'c> {
    conn: &'c Connection,
}

impl<'c> SqliteNodeRepository<'c> {
    #[must_use]
    pub const fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    fn query_nodes<P: rusqlite::Params>(
        &self,
        sql: &str,
        params: P,
        what: &str,
    ) -> HierarchyResult<Vec<Node>> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .with_context(|| format!("prepare {what} query"))?;
        let rows = stmt
            .query_map(params, row_to_node)
            .with_context(|| format!("execute {what} query"))?;
        let nodes = rows
            .collect::<rusqlite::Result<Vec<_>>>()
            .with_context(|| format!("read {what} rows"))?;
        Ok(nodes)
    }

    fn count_query<P: rusqlite::Params>(
        &self,
        sql: &str,
        params: P,
        what: &str,
    ) -> HierarchyResult<usize> {
        let count: i64 = self
            .conn
            .query_row(sql, params, |row| row.get(0))
            .with_context(|| format!("{what} query"))?;
        let count = usize::try_from(count).with_context(|| format!("{what} out of range"))?;
        Ok(count)
    }

    fn require(&self, id: &NodeId) -> HierarchyResult<Node> {
        self.find_by_id(id, true)?
            .ok_or_else(|| HierarchyError::NotFound(id.clone()))
    }
}

impl NodeRepository for SqliteNodeRepository<'_> {
    fn insert(&self, node: &Node) -> HierarchyResult<()> {
        let result = self.conn.execute(
            "INSERT INTO organisational_units \
             (id, parent_id, entity_type, entity_id, deleted_at_us, created_at_us, updated_at_us) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                node.id.as_str(),
                node.parent_id.as_ref().map(NodeId::as_str),
                node.entity.entity_type,
                node.entity.entity_id,
                node.deleted_at.map(|ts| ts.timestamp_micros()),
                node.created_at.timestamp_micros(),
                node.updated_at.timestamp_micros(),
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(HierarchyError::UniquenessViolation {
                parent_id: node.parent_id.clone(),
                entity: node.entity.clone(),
            }),
            Err(e) => Err(anyhow::Error::new(e)
                .context(format!("insert unit '{}'", node.id))
                .into()),
        }
    }

    fn find_by_id(&self, id: &NodeId, include_deleted: bool) -> HierarchyResult<Option<Node>> {
        let sql = if include_deleted {
            format!("SELECT {NODE_COLUMNS} FROM organisational_units WHERE id = ?1")
        } else {
            format!(
                "SELECT {NODE_COLUMNS} FROM organisational_units \
                 WHERE id = ?1 AND deleted_at_us IS NULL"
            )
        };

        let node = self
            .conn
            .query_row(&sql, params![id.as_str()], row_to_node)
            .optional()
            .with_context(|| format!("find unit '{id}'"))?;
        Ok(node)
    }

    fn children_of(
        &self,
        parent: Option<&NodeId>,
        include_deleted: bool,
    ) -> HierarchyResult<Vec<Node>> {
        let Some(parent) = parent else {
            return self.roots_query(include_deleted);
        };
        let sql = if include_deleted {
            format!(
                "SELECT {NODE_COLUMNS} FROM organisational_units \
                 WHERE parent_id = ?1 ORDER BY rowid"
            )
        } else {
            format!(
                "SELECT {NODE_COLUMNS} FROM organisational_units \
                 WHERE parent_id = ?1 AND deleted_at_us IS NULL ORDER BY rowid"
            )
        };
        self.query_nodes(&sql, params![parent.as_str()], "children")
    }

    fn count_children(&self, parent: &NodeId, include_deleted: bool) -> HierarchyResult<usize> {
        let sql = if include_deleted {
            "SELECT COUNT(*) FROM organisational_units WHERE parent_id = ?1"
        } else {
            "SELECT COUNT(*) FROM organisational_units \
             WHERE parent_id = ?1 AND deleted_at_us IS NULL"
        };
        self.count_query(sql, params![parent.as_str()], "count children")
    }

    fn update(&self, id: &NodeId, changes: &NodeChanges) -> HierarchyResult<()> {
        let current = self.require(id)?;
        let parent_id = changes
            .parent_id
            .clone()
            .unwrap_or_else(|| current.parent_id.clone());
        let entity = changes
            .entity
            .clone()
            .unwrap_or_else(|| current.entity.clone());

        let result = self.conn.execute(
            "UPDATE organisational_units \
             SET parent_id = ?2, entity_type = ?3, entity_id = ?4, updated_at_us = ?5 \
             WHERE id = ?1",
            params![
                id.as_str(),
                parent_id.as_ref().map(NodeId::as_str),
                entity.entity_type,
                entity.entity_id,
                changes.updated_at.timestamp_micros(),
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => {
                Err(HierarchyError::UniquenessViolation { parent_id, entity })
            }
            Err(e) => Err(anyhow::Error::new(e)
                .context(format!("update unit '{id}'"))
                .into()),
        }
    }

    fn soft_delete(&self, id: &NodeId, at: DateTime<Utc>) -> HierarchyResult<()> {
        let micros = at.timestamp_micros();
        let changed = self
            .conn
            .execute(
                "UPDATE organisational_units SET deleted_at_us = ?2, updated_at_us = ?2 \
                 WHERE id = ?1",
                params![id.as_str(), micros],
            )
            .with_context(|| format!("soft delete unit '{id}'"))?;
        if changed == 0 {
            return Err(HierarchyError::NotFound(id.clone()));
        }
        Ok(())
    }

    fn restore(&self, id: &NodeId, at: DateTime<Utc>) -> HierarchyResult<()> {
        let current = self.require(id)?;
        let result = self.conn.execute(
            "UPDATE organisational_units SET deleted_at_us = NULL, updated_at_us = ?2 \
             WHERE id = ?1",
            params![id.as_str(), at.timestamp_micros()],
        );

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(HierarchyError::UniquenessViolation {
                parent_id: current.parent_id,
                entity: current.entity,
            }),
            Err(e) => Err(anyhow::Error::new(e)
                .context(format!("restore unit '{id}'"))
                .into()),
        }
    }

    fn hard_delete(&self, id: &NodeId) -> HierarchyResult<()> {
        let changed = self
            .conn
            .execute(
                "DELETE FROM organisational_units WHERE id = ?1",
                params![id.as_str()],
            )
            .with_context(|| format!("delete unit '{id}'"))?;
        if changed == 0 {
            return Err(HierarchyError::NotFound(id.clone()));
        }
        Ok(())
    }

    fn roots_query(&self, include_deleted: bool) -> HierarchyResult<Vec<Node>> {
        let sql = if include_deleted {
            format!(
                "SELECT {NODE_COLUMNS} FROM organisational_units \
                 WHERE parent_id IS NULL ORDER BY rowid"
            )
        } else {
            format!(
                "SELECT {NODE_COLUMNS} FROM organisational_units \
                 WHERE parent_id IS NULL AND deleted_at_us IS NULL ORDER BY rowid"
            )
        };
        self.query_nodes(&sql, [], "roots")
    }

    fn all_nodes(&self, include_deleted: bool) -> HierarchyResult<Vec<Node>> {
        let sql = if include_deleted {
            format!("SELECT {NODE_COLUMNS} FROM organisational_units ORDER BY rowid")
        } else {
            format!(
                "SELECT {NODE_COLUMNS} FROM organisational_units \
                 WHERE deleted_at_us IS NULL ORDER BY rowid"
            )
        };
        self.query_nodes(&sql, [], "all units")
    }

    fn subtree_nodes(&self, root: &NodeId, include_deleted: bool) -> HierarchyResult<Vec<Node>> {
        // UNION (not UNION ALL) drops revisited ids, so a corrupt loop in the
        // stored links still terminates.
        let active = if include_deleted {
            ""
        } else {
            " AND deleted_at_us IS NULL"
        };
        let sql = format!(
            "WITH RECURSIVE subtree(id) AS ( \
                 SELECT id FROM organisational_units WHERE id = ?1{active} \
                 UNION \
                 SELECT u.id FROM organisational_units u \
                 JOIN subtree s ON u.parent_id = s.id \
                 WHERE 1 = 1{active} \
             ) \
             SELECT {NODE_COLUMNS} FROM organisational_units \
             WHERE id IN (SELECT id FROM subtree) ORDER BY rowid"
        );
        self.query_nodes(&sql, params![root.as_str()], "subtree")
    }

    fn find_by_entity_type(
        &self,
        entity_type: &str,
        include_deleted: bool,
    ) -> HierarchyResult<Vec<Node>> {
        let sql = if include_deleted {
            format!(
                "SELECT {NODE_COLUMNS} FROM organisational_units \
                 WHERE entity_type = ?1 ORDER BY rowid"
            )
        } else {
            format!(
                "SELECT {NODE_COLUMNS} FROM organisational_units \
                 WHERE entity_type = ?1 AND deleted_at_us IS NULL ORDER BY rowid"
            )
        };
        self.query_nodes(&sql, params![entity_type], "entity type")
    }

    fn count(&self, include_deleted: bool) -> HierarchyResult<usize> {
        let sql = if include_deleted {
            "SELECT COUNT(*) FROM organisational_units"
        } else {
            "SELECT COUNT(*) FROM organisational_units WHERE deleted_at_us IS NULL"
        };
        self.count_query(sql, [], "count units")
    }
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

fn row_to_node(row: &Row<'_>) -> rusqlite::Result<Node> {
    let parent_id: Option<String> = row.get(1)?;
    let deleted_at_us: Option<i64> = row.get(4)?;
    Ok(Node {
        id: NodeId::from(row.get::<_, String>(0)?),
        parent_id: parent_id.map(NodeId::from),
        entity: EntityRef {
            entity_type: row.get(2)?,
            entity_id: row.get(3)?,
        },
        deleted_at: deleted_at_us.map(|us| micros_to_datetime(4, us)).transpose()?,
        created_at: micros_to_datetime(5, row.get(5)?)?,
        updated_at: micros_to_datetime(6, row.get(6)?)?,
    })
}

fn micros_to_datetime(column: usize, micros: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_micros(micros).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            column,
            Type::Integer,
            format!("timestamp {micros}us out of range").into(),
        )
    })
}
