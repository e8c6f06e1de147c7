//! # polydep - Polyhedral Dependence Analysis
//!
//! A dependence-analysis and loop-transformation legality-checking engine
//! for static control parts (SCoPs):
//! - Data dependence computation with RAW/WAR/WAW/RAR classification
//! - Legality checking of candidate schedules (violation detection)
//! - Exact last-writer computation for scalar privatization and expansion
//! - Dependence distance vectors and loop permutability
//!
//! All analyses reduce to integer feasibility queries over parametric
//! polyhedra, answered by the built-in parametric integer programming
//! solver behind the adapter in [`pip`].
//!
//! ## Example
//!
//! ```rust
//! use polydep::prelude::*;
//!
//! // for i = 0 .. N-1 { S0: A[i] = ...; S1: ... = A[i]; }
//! let mut scop = Scop::new(AffineRelation::context(1));
//! let sub_i = vec![1, 0, 0];
//! scop.statements.push(Statement::new(
//!     parametric_domain(1, 0, 1),
//!     identity_scattering(1, &[0, 0], 1),
//!     vec![Access::write(array_access(1, 1, &[sub_i.clone()], 1))],
//! ));
//! scop.statements.push(Statement::new(
//!     parametric_domain(1, 0, 1),
//!     identity_scattering(1, &[0, 1], 1),
//!     vec![Access::read(array_access(1, 1, &[sub_i], 1))],
//! ));
//!
//! let deps = polydep::dependences(&mut scop, &AnalysisOptions::default()).unwrap();
//! assert_eq!(deps.len(), 1);
//! assert_eq!(deps[0].kind, DependenceKind::Raw);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod analysis;
pub mod pip;
pub mod polyhedral;
pub mod utils;

use serde::{Deserialize, Serialize};

/// Convenient re-exports of commonly used types and functions.
pub mod prelude {
    //! The types most callers need.

    pub use crate::analysis::ddv::{DistanceKind, DistanceVector};
    pub use crate::analysis::dependence::{Dependence, DependenceKind};
    pub use crate::analysis::labels::{LabelMapping, ScopInfo};
    pub use crate::analysis::scop::{
        array_access, identity_scattering, parametric_domain, Access, AccessKind, Scop,
        Statement, StatementKind,
    };
    pub use crate::analysis::violation::Violation;
    pub use crate::polyhedral::relation::{AffineRelation, Precision, RelationUnion};
    pub use crate::utils::errors::AnalysisError;
    pub use crate::AnalysisOptions;
}

/// Options steering the analyses.
///
/// The dependence kind switches select which edges are computed; the scalar
/// options enable the scalar analysis suite; `outscop`, `autocorrect`,
/// `view` and `structure` are carried for the surrounding tooling and do
/// not change the analyses themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisOptions {
    /// Compute read-after-write dependences.
    pub raw: bool,
    /// Compute write-after-read dependences.
    pub war: bool,
    /// Compute write-after-write dependences.
    pub waw: bool,
    /// Compute read-after-read dependences.
    pub rar: bool,
    /// Drop dependences between commuting statements.
    pub commute: bool,
    /// Report every violation instead of stopping at the first one.
    pub fullcheck: bool,
    /// Rename scalars whose DEF-USE webs are independent.
    pub scalar_renaming: bool,
    /// Detect privatizable scalars and prune their dependences.
    pub scalar_privatization: bool,
    /// Expand privatizable scalars with one subscript per loop level.
    pub scalar_expansion: bool,
    /// Refine dependences to the last writer of each cell.
    pub lastwriter: bool,
    /// Narrate the analysis on the log at info level.
    pub verbose: bool,
    /// Ask the surrounding tooling to print the annotated SCoP.
    pub outscop: bool,
    /// Ask the surrounding tooling to correct the candidate SCoP.
    pub autocorrect: bool,
    /// Expand relation unions into separate statements first.
    pub unions: bool,
    /// Ask the surrounding tooling to display the dependence graph.
    pub view: bool,
    /// Ask the surrounding tooling to print the graph structure.
    pub structure: bool,
    /// Remove duplicate dependences from the result.
    pub prune_dups: bool,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            raw: true,
            war: true,
            waw: true,
            rar: false,
            commute: false,
            fullcheck: false,
            scalar_renaming: false,
            scalar_privatization: false,
            scalar_expansion: false,
            lastwriter: false,
            verbose: false,
            outscop: false,
            autocorrect: false,
            unions: false,
            view: false,
            structure: false,
            prune_dups: false,
        }
    }
}

pub use analysis::dependence::{attach_dependences, dependences};
pub use analysis::violation::violations;

/// Version information.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
