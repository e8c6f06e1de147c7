//! Affine relations: tagged-integer constraint matrices.
//!
//! A relation is a conjunction of affine constraints over output dimensions,
//! input dimensions, local (existential) dimensions and parameters. Each row
//! is laid out as
//!
//! ```text
//! [ tag | output dims | input dims | local dims | parameters | constant ]
//! ```
//!
//! with `nb_columns = 1 + out + in + local + params + 1`. A tag of 0 marks an
//! equality (`expr = 0`), any nonzero tag an inequality (`expr >= 0`), and -1
//! a row slot that is not in use yet. A union of relations (logical OR of
//! polyhedra) is an owned list of parts.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::utils::errors::{AnalysisError, Result};

/// Row tag for an equality constraint.
pub const ROW_EQUALITY: i64 = 0;
/// Row tag for an inequality constraint.
pub const ROW_INEQUALITY: i64 = 1;
/// Row tag for a slot that has not been filled in yet.
pub const ROW_UNUSED: i64 = -1;

/// Numeric precision tag carried by every relation.
///
/// The solver in this crate is built for 64-bit integers; relations tagged
/// with another precision are refused at the solver boundary rather than
/// silently truncated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Precision {
    /// 32-bit fixed width.
    Single,
    /// 64-bit fixed width.
    Double,
    /// Arbitrary precision.
    Multiple,
}

impl Precision {
    /// The precision this solver build operates on.
    pub const NATIVE: Precision = Precision::Double;
}

/// A conjunction of affine constraints in the tagged-matrix convention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AffineRelation {
    /// Precision tag of the matrix entries.
    pub precision: Precision,
    /// Number of output dimensions.
    pub nb_output_dims: usize,
    /// Number of input dimensions.
    pub nb_input_dims: usize,
    /// Number of local (existentially quantified) dimensions.
    pub nb_local_dims: usize,
    /// Number of parameters.
    pub nb_parameters: usize,
    rows: Vec<Vec<i64>>,
}

impl AffineRelation {
    /// Create an empty relation (no constraints) with the given dimensions.
    pub fn new(out: usize, inp: usize, local: usize, params: usize) -> Self {
        Self {
            precision: Precision::NATIVE,
            nb_output_dims: out,
            nb_input_dims: inp,
            nb_local_dims: local,
            nb_parameters: params,
            rows: Vec::new(),
        }
    }

    /// Create a context relation: constraints over parameters only.
    pub fn context(params: usize) -> Self {
        Self::new(0, 0, 0, params)
    }

    /// Create a relation from raw rows, validating their widths.
    pub fn from_rows(
        out: usize,
        inp: usize,
        local: usize,
        params: usize,
        rows: Vec<Vec<i64>>,
    ) -> Result<Self> {
        let mut relation = Self::new(out, inp, local, params);
        relation.rows = rows;
        relation.validate()?;
        Ok(relation)
    }

    /// Total number of columns, including the tag and constant columns.
    pub fn nb_columns(&self) -> usize {
        1 + self.nb_output_dims + self.nb_input_dims + self.nb_local_dims + self.nb_parameters + 1
    }

    /// Number of constraint rows.
    pub fn nb_rows(&self) -> usize {
        self.rows.len()
    }

    /// Number of non-parameter, non-constant columns (all dimension columns).
    pub fn nb_dims(&self) -> usize {
        self.nb_output_dims + self.nb_input_dims + self.nb_local_dims
    }

    /// Check that every row has the width implied by the dimension counts.
    pub fn validate(&self) -> Result<()> {
        let expected = self.nb_columns();
        for (i, row) in self.rows.iter().enumerate() {
            if row.len() != expected {
                return Err(AnalysisError::MalformedRelation {
                    row: i,
                    expected,
                    found: row.len(),
                });
            }
        }
        Ok(())
    }

    /// Column index of output dimension `k`.
    pub fn col_output(&self, k: usize) -> usize {
        debug_assert!(k < self.nb_output_dims);
        1 + k
    }

    /// Column index of input dimension `k`.
    pub fn col_input(&self, k: usize) -> usize {
        debug_assert!(k < self.nb_input_dims);
        1 + self.nb_output_dims + k
    }

    /// Column index of local dimension `k`.
    pub fn col_local(&self, k: usize) -> usize {
        debug_assert!(k < self.nb_local_dims);
        1 + self.nb_output_dims + self.nb_input_dims + k
    }

    /// Column index of parameter `k`.
    pub fn col_param(&self, k: usize) -> usize {
        debug_assert!(k < self.nb_parameters);
        1 + self.nb_output_dims + self.nb_input_dims + self.nb_local_dims + k
    }

    /// Column index of the constant term.
    pub fn col_constant(&self) -> usize {
        self.nb_columns() - 1
    }

    /// Append a row with the given tag and body (everything but the tag).
    pub fn push(&mut self, tag: i64, body: &[i64]) {
        assert_eq!(body.len(), self.nb_columns() - 1);
        let mut row = Vec::with_capacity(self.nb_columns());
        row.push(tag);
        row.extend_from_slice(body);
        self.rows.push(row);
    }

    /// Append an equality row (`body = 0`).
    pub fn add_equality(&mut self, body: &[i64]) {
        self.push(ROW_EQUALITY, body);
    }

    /// Append an inequality row (`body >= 0`).
    pub fn add_inequality(&mut self, body: &[i64]) {
        self.push(ROW_INEQUALITY, body);
    }

    /// Append a pre-built full row (tag included).
    pub fn push_row(&mut self, row: Vec<i64>) {
        assert_eq!(row.len(), self.nb_columns());
        self.rows.push(row);
    }

    /// Full row `i`, tag included.
    pub fn row(&self, i: usize) -> &[i64] {
        &self.rows[i]
    }

    /// Mutable access to row `i`.
    pub fn row_mut(&mut self, i: usize) -> &mut Vec<i64> {
        &mut self.rows[i]
    }

    /// Iterate over all rows.
    pub fn rows(&self) -> impl Iterator<Item = &[i64]> {
        self.rows.iter().map(|r| r.as_slice())
    }

    /// Tag of row `i`.
    pub fn tag(&self, i: usize) -> i64 {
        self.rows[i][0]
    }

    /// True if row `i` is an equality.
    pub fn is_equality_row(&self, i: usize) -> bool {
        self.tag(i) == ROW_EQUALITY
    }

    /// True if row `i` is an inequality. Any nonzero tag other than the
    /// unused marker reads as an inequality.
    pub fn is_inequality_row(&self, i: usize) -> bool {
        let t = self.tag(i);
        t != ROW_EQUALITY && t != ROW_UNUSED
    }

    /// Matrix entry at row `i`, column `col`.
    pub fn get(&self, i: usize, col: usize) -> i64 {
        self.rows[i][col]
    }

    /// Set the matrix entry at row `i`, column `col`.
    pub fn set(&mut self, i: usize, col: usize, value: i64) {
        self.rows[i][col] = value;
    }

    /// Constant term of row `i`.
    pub fn constant(&self, i: usize) -> i64 {
        let col = self.col_constant();
        self.rows[i][col]
    }

    /// Insert an all-zero equality row at position `at`.
    pub fn insert_blank_row(&mut self, at: usize) {
        let row = vec![0; self.nb_columns()];
        self.rows.insert(at, row);
    }

    /// Insert an all-zero column at position `at` in every row.
    ///
    /// The caller is responsible for bumping the matching dimension count.
    pub fn insert_blank_column(&mut self, at: usize) {
        for row in &mut self.rows {
            row.insert(at, 0);
        }
    }

    /// Evaluate whether a point satisfies every used constraint row.
    ///
    /// `dims` covers output, input and local dimensions in column order;
    /// `params` the parameter values.
    pub fn contains_point(&self, dims: &[i64], params: &[i64]) -> bool {
        for i in 0..self.nb_rows() {
            if self.tag(i) == ROW_UNUSED {
                continue;
            }
            let mut value = self.constant(i);
            for (k, &v) in dims.iter().enumerate().take(self.nb_dims()) {
                value += self.rows[i][1 + k] * v;
            }
            for (k, &v) in params.iter().enumerate().take(self.nb_parameters) {
                value += self.rows[i][self.col_param(k)] * v;
            }
            let ok = if self.is_equality_row(i) { value == 0 } else { value >= 0 };
            if !ok {
                return false;
            }
        }
        true
    }

    /// First row with a nonzero coefficient on output dimension `k`.
    pub fn row_defining_output(&self, k: usize) -> Option<usize> {
        let col = self.col_output(k);
        (0..self.nb_rows()).find(|&i| self.rows[i][col] != 0)
    }

    /// The constant value of output dimension `k`, when a row pins it to a
    /// constant (`out_k = c` with no other dimension or parameter involved).
    pub fn constant_output_value(&self, k: usize) -> Option<i64> {
        let col = self.col_output(k);
        let cst = self.col_constant();
        'rows: for i in 0..self.nb_rows() {
            if !self.is_equality_row(i) {
                continue;
            }
            let coeff = self.rows[i][col];
            if coeff != 1 && coeff != -1 {
                continue;
            }
            for c in 1..cst {
                if c != col && self.rows[i][c] != 0 {
                    continue 'rows;
                }
            }
            // coeff * out_k + constant = 0
            return Some(-coeff * self.rows[i][cst]);
        }
        None
    }
}

impl fmt::Display for AffineRelation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "# rows={} cols={} (out={} in={} local={} params={})",
            self.nb_rows(),
            self.nb_columns(),
            self.nb_output_dims,
            self.nb_input_dims,
            self.nb_local_dims,
            self.nb_parameters
        )?;
        for row in &self.rows {
            write!(f, "  ")?;
            for (j, v) in row.iter().enumerate() {
                if j > 0 {
                    write!(f, " ")?;
                }
                write!(f, "{:>4}", v)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// A union of polyhedra: the logical OR of its parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationUnion {
    /// The individual polyhedra.
    pub parts: Vec<AffineRelation>,
}

impl RelationUnion {
    /// A union with a single part.
    pub fn single(relation: AffineRelation) -> Self {
        Self { parts: vec![relation] }
    }

    /// A union from a list of parts.
    pub fn from_parts(parts: Vec<AffineRelation>) -> Self {
        Self { parts }
    }

    /// True when more than one part is present.
    pub fn is_union(&self) -> bool {
        self.parts.len() > 1
    }

    /// The first part. Analyses that do not support unions read this after
    /// union removal; a remaining union is reported by the caller.
    pub fn first(&self) -> &AffineRelation {
        &self.parts[0]
    }

    /// Number of parts.
    pub fn nb_parts(&self) -> usize {
        self.parts.len()
    }
}

impl From<AffineRelation> for RelationUnion {
    fn from(relation: AffineRelation) -> Self {
        Self::single(relation)
    }
}
