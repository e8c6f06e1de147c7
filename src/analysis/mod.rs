//! Analysis passes: dependence computation, legality checking, distance
//! vectors, and the per-pass bookkeeping they share.

pub mod ddv;
pub mod dependence;
pub mod labels;
pub mod scop;
pub mod violation;

pub use ddv::{extract_in_loop, loops_are_permutable, DistanceKind, DistanceVector};
pub use dependence::{
    attach_dependences, dependences, dependences_single, gcd_test, Dependence, DependenceKind,
};
pub use labels::{LabelMapping, ScopInfo, StatementInfo};
pub use scop::{
    statements_commute, Access, AccessKind, Scop, Statement, StatementKind,
};
pub use violation::{violation_system, violations, violations_single, Violation};
