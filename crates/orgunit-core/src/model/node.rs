use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::{fmt, str::FromStr};

/// Identifier of an organisational unit.
///
/// Fresh ids are UUID v4 strings; ids read back from storage are taken as-is.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Generate a fresh random id.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for NodeId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Tagged reference to an entity owned outside the hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub entity_type: String,
    pub entity_id: String,
}

impl EntityRef {
    pub fn new(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.entity_type, self.entity_id)
    }
}

/// Lifecycle status of a stored unit.
///
/// A purged unit has no status: it no longer exists in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Active,
    SoftDeleted,
}

/// An organisational unit: one node of the forest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub parent_id: Option<NodeId>,
    #[serde(flatten)]
    pub entity: EntityRef,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Node {
    #[must_use]
    pub const fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    #[must_use]
    pub const fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    #[must_use]
    pub const fn status(&self) -> NodeStatus {
        if self.is_deleted() {
            NodeStatus::SoftDeleted
        } else {
            NodeStatus::Active
        }
    }

    /// Read one field as a JSON value. Absent optionals become `null`.
    #[must_use]
    pub fn field(&self, field: NodeField) -> Value {
        match field {
            NodeField::Id => Value::String(self.id.to_string()),
            NodeField::ParentId => self
                .parent_id
                .as_ref()
                .map_or(Value::Null, |p| Value::String(p.to_string())),
            NodeField::EntityType => Value::String(self.entity.entity_type.clone()),
            NodeField::EntityId => Value::String(self.entity.entity_id.clone()),
            NodeField::DeletedAt => self.deleted_at.map_or(Value::Null, timestamp_value),
            NodeField::CreatedAt => timestamp_value(self.created_at),
            NodeField::UpdatedAt => timestamp_value(self.updated_at),
        }
    }

    /// Project the requested fields into a partial record.
    #[must_use]
    pub fn project(&self, fields: &[NodeField]) -> PartialRecord {
        fields.iter().map(|&f| (f, self.field(f))).collect()
    }

    /// `true` when every condition field equals its required value.
    #[must_use]
    pub fn matches(&self, conditions: &[(NodeField, Value)]) -> bool {
        conditions
            .iter()
            .all(|(field, expected)| self.field(*field) == *expected)
    }
}

fn timestamp_value(ts: DateTime<Utc>) -> Value {
    Value::String(ts.to_rfc3339_opts(SecondsFormat::Micros, true))
}

/// Request to create a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewNode {
    pub parent_id: Option<NodeId>,
    pub entity: EntityRef,
}

impl NewNode {
    #[must_use]
    pub const fn root(entity: EntityRef) -> Self {
        Self {
            parent_id: None,
            entity,
        }
    }

    #[must_use]
    pub const fn child_of(parent_id: NodeId, entity: EntityRef) -> Self {
        Self {
            parent_id: Some(parent_id),
            entity,
        }
    }
}

/// Partial update of a unit's mutable columns. `None` leaves a column as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeChanges {
    /// `Some(None)` detaches to the root level.
    pub parent_id: Option<Option<NodeId>>,
    pub entity: Option<EntityRef>,
    pub updated_at: DateTime<Utc>,
}

/// Fields that can be projected or matched by conditional search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeField {
    Id,
    ParentId,
    EntityType,
    EntityId,
    DeletedAt,
    CreatedAt,
    UpdatedAt,
}

impl NodeField {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::ParentId => "parent_id",
            Self::EntityType => "entity_type",
            Self::EntityId => "entity_id",
            Self::DeletedAt => "deleted_at",
            Self::CreatedAt => "created_at",
            Self::UpdatedAt => "updated_at",
        }
    }
}

impl fmt::Display for NodeField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeField {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "id" => Ok(Self::Id),
            "parent_id" | "parent" => Ok(Self::ParentId),
            "entity_type" | "type" => Ok(Self::EntityType),
            "entity_id" => Ok(Self::EntityId),
            "deleted_at" => Ok(Self::DeletedAt),
            "created_at" => Ok(Self::CreatedAt),
            "updated_at" => Ok(Self::UpdatedAt),
            other => anyhow::bail!(
                "unknown field '{other}': expected one of id, parent_id, entity_type, entity_id, deleted_at, created_at, updated_at"
            ),
        }
    }
}

/// Field → value map produced by conditional search.
pub type PartialRecord = BTreeMap<NodeField, Value>;
