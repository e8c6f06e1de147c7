//! Polyhedral data structures.
//!
//! This module provides the constraint-system representation shared by the
//! whole analyzer:
//! - Affine relations (tagged-integer constraint matrices)
//! - Unions of relations
//! - Named column layouts for composed constraint systems

pub mod layout;
pub mod relation;

pub use layout::{Block, ColumnLayout, SystemBuilder};
pub use relation::{AffineRelation, Precision, RelationUnion};
