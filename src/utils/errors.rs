//! Error types for the dependence analyzer.
//!
//! Every error in this enum is a configuration error: the input relations or
//! statement metadata are unusable and the analysis stops immediately.
//! Negative analysis results (no dependence, no violation) are empty outputs,
//! not errors.

use thiserror::Error;

use crate::polyhedral::relation::Precision;

/// Fatal analysis errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnalysisError {
    /// A relation's precision tag does not match the solver build.
    #[error("precision {found:?} is not compatible with the solver build ({expected:?})")]
    PrecisionMismatch {
        /// Precision the solver was built for.
        expected: Precision,
        /// Precision carried by the offending relation.
        found: Precision,
    },

    /// A relation row has the wrong number of columns.
    #[error("malformed relation: row {row} has {found} columns, expected {expected}")]
    MalformedRelation {
        /// Offending row index.
        row: usize,
        /// Column count implied by the relation's dimension counts.
        expected: usize,
        /// Column count actually present.
        found: usize,
    },

    /// A statement label was not found in the SCoP.
    #[error("statement label {label} not found in the scop")]
    UnknownLabel {
        /// The missing label.
        label: usize,
    },

    /// A dependence references an access index the statement does not have.
    #[error("statement {label} has no access with index {index}")]
    MissingAccess {
        /// Statement label.
        label: usize,
        /// Access index referenced by the dependence.
        index: usize,
    },

    /// A statement has no usable scattering relation.
    #[error("statement {label} has no scattering relation")]
    MissingScattering {
        /// Statement label.
        label: usize,
    },

    /// A scattering dimension expected to be a static constant is not.
    #[error("statement {label}: scattering dimension {dim} has no constant value")]
    NonConstantScattering {
        /// Statement label.
        label: usize,
        /// Scattering output dimension.
        dim: usize,
    },

    /// An access relation does not identify its array.
    #[error("access relation has no array identifier row")]
    MissingArrayId,

    /// The original and candidate SCoPs cannot be matched statement by statement.
    #[error("candidate scop has {found} statements, original has {expected}")]
    ScopMismatch {
        /// Statement count of the original SCoP.
        expected: usize,
        /// Statement count of the candidate SCoP.
        found: usize,
    },
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, AnalysisError>;
