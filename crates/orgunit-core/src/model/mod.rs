//! Data model for organisational units.

pub mod node;

pub use node::{
    EntityRef, NewNode, Node, NodeChanges, NodeField, NodeId, NodeStatus, PartialRecord,
};
