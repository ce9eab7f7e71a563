//! Error taxonomy for the hierarchy engine.
//!
//! [`HierarchyError`] is the single error type returned by every engine,
//! repository and traversal function. Each variant maps to a stable
//! [`ErrorCode`] so callers (and agents) can branch on a machine-readable
//! identifier instead of parsing messages.

use std::fmt;

use crate::model::node::{EntityRef, NodeId};

/// Machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NodeNotFound,
    InvalidEntityType,
    SelfParent,
    CycleDetected,
    UniquenessViolation,
    CorruptHierarchy,
    TreeTooLarge,
    EntityLoaderMissing,
    EntityLoadFailed,
    StoreFailure,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::NodeNotFound => "E2001",
            Self::InvalidEntityType => "E2002",
            Self::SelfParent => "E2003",
            Self::CycleDetected => "E2004",
            Self::UniquenessViolation => "E2005",
            Self::CorruptHierarchy => "E3001",
            Self::TreeTooLarge => "E3002",
            Self::EntityLoaderMissing => "E4001",
            Self::EntityLoadFailed => "E4002",
            Self::StoreFailure => "E5001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::NodeNotFound => "Organisational unit not found",
            Self::InvalidEntityType => "Entity type is not registered",
            Self::SelfParent => "Unit cannot be its own parent",
            Self::CycleDetected => "Move would create a cycle",
            Self::UniquenessViolation => "Entity already attached under this parent",
            Self::CorruptHierarchy => "Stored hierarchy is corrupt",
            Self::TreeTooLarge => "Tree exceeds configured limits",
            Self::EntityLoaderMissing => "No entity loader configured",
            Self::EntityLoadFailed => "Entity load failed",
            Self::StoreFailure => "Storage failure",
        }
    }

    /// Optional remediation hint for operators.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::NodeNotFound | Self::SelfParent => None,
            Self::InvalidEntityType => {
                Some("Register the entity type in [registry] entity_types or the registry.")
            }
            Self::CycleDetected => Some("Pick a parent outside the moved unit's subtree."),
            Self::UniquenessViolation => {
                Some("Reuse the existing unit or attach the entity under another parent.")
            }
            Self::CorruptHierarchy => {
                Some("Inspect parent_id links for loops or dangling references.")
            }
            Self::TreeTooLarge => Some("Raise [limits] max_depth / max_fan_out if intended."),
            Self::EntityLoaderMissing => {
                Some("Attach a loader with HierarchyEngine::with_entity_loader.")
            }
            Self::EntityLoadFailed => None,
            Self::StoreFailure => Some("Retry once. If persistent, check the database file."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Which traversal limit was exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeLimit {
    Depth,
    FanOut,
}

impl fmt::Display for TreeLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Depth => f.write_str("depth"),
            Self::FanOut => f.write_str("fan-out"),
        }
    }
}

/// Errors raised by hierarchy operations.
#[derive(Debug, thiserror::Error)]
pub enum HierarchyError {
    /// The entity type is not known to the registry.
    #[error("invalid entity type '{0}'")]
    InvalidEntityType(String),

    /// A unit was asked to become its own parent.
    #[error("unit '{0}' cannot be its own parent")]
    SelfParent(NodeId),

    /// The proposed parent lies inside the moved unit's subtree.
    #[error("moving '{node_id}' under '{proposed_parent}' would create a cycle")]
    Cycle {
        node_id: NodeId,
        proposed_parent: NodeId,
    },

    /// Another active sibling already references the same entity.
    #[error("{entity} is already attached under {}", display_parent(.parent_id.as_ref()))]
    UniquenessViolation {
        parent_id: Option<NodeId>,
        entity: EntityRef,
    },

    /// The unit does not exist (or is soft-deleted where active units are required).
    #[error("unit not found: '{0}'")]
    NotFound(NodeId),

    /// Stored parent links violate acyclicity or point nowhere.
    #[error("corrupt hierarchy at '{node_id}': {detail}")]
    CorruptHierarchy { node_id: NodeId, detail: String },

    /// A traversal exceeded the configured depth or fan-out.
    #[error("tree too large at '{node_id}': {limit} exceeds {max}")]
    TreeTooLarge {
        node_id: NodeId,
        limit: TreeLimit,
        max: usize,
    },

    /// Entities were requested but no loader is attached.
    #[error("entity loading requested but no entity loader is configured")]
    EntityLoaderMissing,

    /// The entity loader failed for a referenced entity.
    #[error("failed to load {entity}: {source:#}")]
    EntityLoad {
        entity: EntityRef,
        #[source]
        source: anyhow::Error,
    },

    /// An underlying storage error.
    #[error("storage error: {0:#}")]
    Store(#[from] anyhow::Error),
}

fn display_parent(parent_id: Option<&NodeId>) -> String {
    parent_id.map_or_else(|| "the root level".to_string(), |id| format!("'{id}'"))
}

impl HierarchyError {
    /// Machine-readable code associated with this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidEntityType(_) => ErrorCode::InvalidEntityType,
            Self::SelfParent(_) => ErrorCode::SelfParent,
            Self::Cycle { .. } => ErrorCode::CycleDetected,
            Self::UniquenessViolation { .. } => ErrorCode::UniquenessViolation,
            Self::NotFound(_) => ErrorCode::NodeNotFound,
            Self::CorruptHierarchy { .. } => ErrorCode::CorruptHierarchy,
            Self::TreeTooLarge { .. } => ErrorCode::TreeTooLarge,
            Self::EntityLoaderMissing => ErrorCode::EntityLoaderMissing,
            Self::EntityLoad { .. } => ErrorCode::EntityLoadFailed,
            Self::Store(_) => ErrorCode::StoreFailure,
        }
    }

    /// Optional remediation hint for operators.
    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }

    /// `true` for the rejections a move can produce because the target sits
    /// inside the moved subtree (including the unit itself).
    #[must_use]
    pub const fn is_cycle_rejection(&self) -> bool {
        matches!(self, Self::SelfParent(_) | Self::Cycle { .. })
    }
}

/// Result alias used across the crate.
pub type HierarchyResult<T> = Result<T, HierarchyError>;
