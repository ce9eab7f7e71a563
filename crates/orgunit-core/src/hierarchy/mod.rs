//! Structural operations over the unit forest.
//!
//! Everything here works against [`crate::repository::NodeRepository`] and
//! leaves transaction handling to the caller.

pub mod builder;
pub mod cascade;
pub mod mover;
pub mod navigator;
pub mod validator;

pub use builder::{Forest, TreeNode};
pub use navigator::Navigator;
pub use validator::TypeValidator;
