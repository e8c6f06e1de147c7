//! The solver's native matrix request format.
//!
//! A `PipMatrix` is a plain tagged-integer matrix: column 0 is the row tag
//! (0 equality, nonzero inequality, -1 unused slot), the last column the
//! constant. The number of parameters is not stored in the matrix itself: it
//! is derived from the width of the context matrix accompanying a request,
//! the remaining columns being the unknowns.

use serde::{Deserialize, Serialize};

/// A matrix in the solver's request format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipMatrix {
    rows: Vec<Vec<i64>>,
    nb_columns: usize,
}

impl PipMatrix {
    /// Create an empty matrix with the given column count.
    pub fn new(nb_columns: usize) -> Self {
        Self { rows: Vec::new(), nb_columns }
    }

    /// Create a matrix from raw rows. All rows must share the width.
    pub fn from_rows(nb_columns: usize, rows: Vec<Vec<i64>>) -> Self {
        debug_assert!(rows.iter().all(|r| r.len() == nb_columns));
        Self { rows, nb_columns }
    }

    /// Number of rows.
    pub fn nb_rows(&self) -> usize {
        self.rows.len()
    }

    /// Number of columns, tag and constant included.
    pub fn nb_columns(&self) -> usize {
        self.nb_columns
    }

    /// Append a row.
    pub fn push_row(&mut self, row: Vec<i64>) {
        debug_assert_eq!(row.len(), self.nb_columns);
        self.rows.push(row);
    }

    /// Row `i`, tag included.
    pub fn row(&self, i: usize) -> &[i64] {
        &self.rows[i]
    }

    /// Iterate over rows.
    pub fn rows(&self) -> impl Iterator<Item = &[i64]> {
        self.rows.iter().map(|r| r.as_slice())
    }
}

/// Options of a solver invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipOptions {
    /// Normalize and deduplicate rows before the search.
    pub simplify: bool,
    /// Compute the lexicographic maximum instead of the minimum.
    pub maximize: bool,
    /// Require integer solutions. When false the search is rational.
    pub integer: bool,
    /// Allow parameters to take negative values.
    pub unrestricted_params: bool,
    /// Allow unknowns to take negative values.
    pub unrestricted_unknowns: bool,
}

impl Default for PipOptions {
    fn default() -> Self {
        Self {
            simplify: false,
            maximize: false,
            integer: true,
            unrestricted_params: false,
            unrestricted_unknowns: false,
        }
    }
}

impl PipOptions {
    /// The option set used by feasibility queries: simplification on,
    /// unrestricted signs everywhere.
    pub fn feasibility(integer: bool) -> Self {
        Self {
            simplify: true,
            maximize: false,
            integer,
            unrestricted_params: true,
            unrestricted_unknowns: true,
        }
    }
}
