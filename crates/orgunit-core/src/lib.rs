//! Organisational unit hierarchy engine.
//!
//! A forest of units, each attached to an externally owned entity by a
//! `(type, id)` reference, stored in SQLite. The engine keeps the forest
//! acyclic, keeps entity references unique among active siblings, and
//! cascades soft delete, restore and permanent delete through subtrees.
//!
//! # Conventions
//!
//! - **Errors**: [`HierarchyError`] for every public operation; `anyhow`
//!   with context inside storage and config code.
//! - **Logging**: `tracing` macros; [`logging::init_tracing`] installs a
//!   subscriber for embedding binaries.
//!
//! ```no_run
//! use std::sync::Arc;
//! use orgunit_core::{EntityRef, HierarchyEngine, NewNode, StaticRegistry};
//!
//! # fn main() -> Result<(), orgunit_core::HierarchyError> {
//! let registry = Arc::new(StaticRegistry::new(["Company", "Department"]));
//! let mut engine = HierarchyEngine::open_in_memory(registry)?;
//!
//! let company = engine.create(NewNode::root(EntityRef::new("Company", "1")))?;
//! let sales = engine.create(NewNode::child_of(
//!     company.id.clone(),
//!     EntityRef::new("Department", "7"),
//! ))?;
//!
//! assert_eq!(engine.ancestor_chain(&sales.id)?.len(), 1);
//! assert_eq!(engine.soft_delete(&company.id)?, 2);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod hierarchy;
pub mod logging;
pub mod model;
pub mod registry;
pub mod repository;

pub use config::{EngineConfig, TreeLimits};
pub use engine::HierarchyEngine;
pub use error::{ErrorCode, HierarchyError, HierarchyResult, TreeLimit};
pub use hierarchy::{Forest, Navigator, TreeNode};
pub use model::{EntityRef, NewNode, Node, NodeField, NodeId, NodeStatus, PartialRecord};
pub use registry::{EntityLoader, EntityTypeRegistry, StaticRegistry};
pub use repository::NodeRepository;
