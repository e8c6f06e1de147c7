//! The SCoP model consumed by the analyses.
//!
//! A SCoP is a context relation over the global parameters plus a list of
//! statements in program order. Each statement carries its iteration domain
//! (possibly a union), its scattering in the 2d+1 convention (odd output
//! dimensions are the iterators, even ones the static ordering constants),
//! and its access relations (output dimensions are the array identifier
//! followed by the subscripts, input dimensions the statement iterators).

use serde::{Deserialize, Serialize};

use crate::analysis::dependence::Dependence;
use crate::analysis::labels::LabelMapping;
use crate::polyhedral::relation::{AffineRelation, RelationUnion};
use crate::utils::errors::{AnalysisError, Result};

/// Direction of an access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessKind {
    /// The statement reads the cell.
    Read,
    /// The statement writes the cell.
    Write,
    /// The statement may write the cell.
    MayWrite,
}

impl AccessKind {
    /// True for definite and potential writes.
    pub fn is_write(&self) -> bool {
        !matches!(self, AccessKind::Read)
    }
}

/// One array access of a statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Access {
    /// Read or write.
    pub kind: AccessKind,
    /// The access relation; output dims are [array id, subscripts...].
    pub relation: RelationUnion,
}

impl Access {
    /// A read access.
    pub fn read(relation: AffineRelation) -> Self {
        Self { kind: AccessKind::Read, relation: relation.into() }
    }

    /// A write access.
    pub fn write(relation: AffineRelation) -> Self {
        Self { kind: AccessKind::Write, relation: relation.into() }
    }

    /// The accessed array's identifier, from the row pinning output
    /// dimension 0.
    pub fn array_id(&self) -> Result<i64> {
        self.relation
            .first()
            .constant_output_value(0)
            .ok_or(AnalysisError::MissingArrayId)
    }
}

/// How a statement updates its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatementKind {
    /// Plain assignment.
    Assignment,
    /// Additive accumulation (`x += e`).
    PlusReduction,
    /// Subtractive accumulation (`x -= e`).
    MinusReduction,
    /// Multiplicative accumulation (`x *= e`).
    TimesReduction,
}

impl StatementKind {
    /// True for the accumulation kinds.
    pub fn is_reduction(&self) -> bool {
        !matches!(self, StatementKind::Assignment)
    }
}

/// A statement of the SCoP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statement {
    /// Iteration domain, possibly a union of polyhedra.
    pub domain: RelationUnion,
    /// Scattering relation in the 2d+1 convention.
    pub scattering: AffineRelation,
    /// Access relations in statement order.
    pub accesses: Vec<Access>,
    /// Update kind, used by the commutativity analysis.
    pub kind: StatementKind,
}

impl Statement {
    /// Build a plain-assignment statement.
    pub fn new(domain: AffineRelation, scattering: AffineRelation, accesses: Vec<Access>) -> Self {
        Self {
            domain: domain.into(),
            scattering,
            accesses,
            kind: StatementKind::Assignment,
        }
    }

    /// Override the statement kind.
    pub fn with_kind(mut self, kind: StatementKind) -> Self {
        self.kind = kind;
        self
    }

    /// Loop depth: half the scattering's output dimension count.
    pub fn depth(&self) -> usize {
        self.scattering.nb_output_dims / 2
    }

    /// The static ordering constant at depth `j` (scattering output 2j).
    pub fn scattering_constant(&self, j: usize) -> Option<i64> {
        self.scattering.constant_output_value(2 * j)
    }

    /// The array written by this statement, if any.
    pub fn written_array(&self) -> Option<i64> {
        self.accesses
            .iter()
            .find(|a| a.kind.is_write())
            .and_then(|a| a.array_id().ok())
    }

    /// Access by index, as referenced from a dependence.
    pub fn access(&self, label: usize, index: usize) -> Result<&Access> {
        self.accesses
            .get(index)
            .ok_or(AnalysisError::MissingAccess { label, index })
    }
}

/// Do two statements commute?
///
/// Accumulations over the same array commute when both are additive
/// (including subtraction) or both multiplicative; a statement of a
/// reduction kind always commutes with itself.
pub fn statements_commute(s1: &Statement, label1: usize, s2: &Statement, label2: usize) -> bool {
    if !s1.kind.is_reduction() || !s2.kind.is_reduction() {
        return false;
    }
    let compatible = match (s1.kind, s2.kind) {
        (StatementKind::TimesReduction, StatementKind::TimesReduction) => true,
        (StatementKind::TimesReduction, _) | (_, StatementKind::TimesReduction) => false,
        _ => true,
    };
    if !compatible {
        return false;
    }
    if label1 == label2 {
        return true;
    }
    match (s1.written_array(), s2.written_array()) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// A static control part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scop {
    /// Constraints on the global parameters.
    pub context: AffineRelation,
    /// Parameter names, for reporting.
    pub parameters: Vec<String>,
    /// Statements in program order; a statement's label is its position.
    pub statements: Vec<Statement>,
    /// The dependence extension slot.
    pub dependences: Option<Vec<Dependence>>,
}

impl Scop {
    /// A SCoP with the given context and no statements.
    pub fn new(context: AffineRelation) -> Self {
        Self {
            context,
            parameters: Vec::new(),
            statements: Vec::new(),
            dependences: None,
        }
    }

    /// Number of global parameters.
    pub fn nb_parameters(&self) -> usize {
        self.context.nb_parameters
    }

    /// Statement by label.
    pub fn statement(&self, label: usize) -> Result<&Statement> {
        self.statements.get(label).ok_or(AnalysisError::UnknownLabel { label })
    }

    /// Check the structural preconditions of the analyses.
    pub fn validate(&self) -> Result<()> {
        self.context.validate()?;
        for (label, stmt) in self.statements.iter().enumerate() {
            if stmt.scattering.nb_output_dims == 0 {
                return Err(AnalysisError::MissingScattering { label });
            }
            stmt.scattering.validate()?;
            for part in &stmt.domain.parts {
                part.validate()?;
            }
            for access in &stmt.accesses {
                for part in &access.relation.parts {
                    part.validate()?;
                }
            }
        }
        Ok(())
    }

    /// Store a dependence list in the extension slot, discarding (and
    /// logging the discard of) any previous one.
    pub fn add_dependence_extension(&mut self, dependences: Vec<Dependence>) {
        if self.dependences.is_some() {
            log::info!("deleting old dependences found in the dependence extension");
        }
        self.dependences = Some(dependences);
    }

    /// Split every relation union into separate statements.
    ///
    /// Returns the expanded SCoP together with the mapping from new labels
    /// back to the original ones.
    pub fn remove_unions(&self) -> (Scop, LabelMapping) {
        let mut statements = Vec::new();
        let mut mapping = LabelMapping::new();

        for (label, stmt) in self.statements.iter().enumerate() {
            let mut variants: Vec<Statement> = stmt
                .domain
                .parts
                .iter()
                .map(|part| {
                    let mut v = stmt.clone();
                    v.domain = RelationUnion::single(part.clone());
                    v
                })
                .collect();

            // Split any remaining access union, one at a time.
            let mut i = 0;
            while i < variants.len() {
                let split_at = variants[i]
                    .accesses
                    .iter()
                    .position(|a| a.relation.is_union());
                match split_at {
                    Some(ai) => {
                        let v = variants.remove(i);
                        let parts = v.accesses[ai].relation.parts.clone();
                        for (off, part) in parts.into_iter().enumerate() {
                            let mut nv = v.clone();
                            nv.accesses[ai].relation = RelationUnion::single(part);
                            variants.insert(i + off, nv);
                        }
                    }
                    None => i += 1,
                }
            }

            for v in variants {
                mapping.push(label, statements.len());
                statements.push(v);
            }
        }

        let scop = Scop {
            context: self.context.clone(),
            parameters: self.parameters.clone(),
            statements,
            dependences: None,
        };
        (scop, mapping)
    }
}

/// The rectangular domain `0 <= i_k <= N - 1` for every dimension, bounded
/// by parameter `bound_param`.
pub fn parametric_domain(depth: usize, bound_param: usize, nparams: usize) -> AffineRelation {
    let mut r = AffineRelation::new(depth, 0, 0, nparams);
    let width = r.nb_columns() - 1;
    for k in 0..depth {
        let mut lower = vec![0; width];
        lower[k] = 1;
        r.add_inequality(&lower);
        let mut upper = vec![0; width];
        upper[k] = -1;
        upper[depth + bound_param] = 1;
        upper[width - 1] = -1;
        r.add_inequality(&upper);
    }
    r
}

/// An identity scattering in the 2d+1 convention: even output dimensions
/// carry the `betas` constants, odd ones the iterators. `betas` has
/// `depth + 1` entries.
pub fn identity_scattering(depth: usize, betas: &[i64], nparams: usize) -> AffineRelation {
    assert_eq!(betas.len(), depth + 1);
    let out = 2 * depth + 1;
    let mut r = AffineRelation::new(out, depth, 0, nparams);
    let width = r.nb_columns() - 1;
    for (j, &beta) in betas.iter().enumerate() {
        let mut body = vec![0; width];
        body[2 * j] = -1;
        body[width - 1] = beta;
        r.add_equality(&body);
    }
    for j in 0..depth {
        let mut body = vec![0; width];
        body[2 * j + 1] = -1;
        body[out + j] = 1;
        r.add_equality(&body);
    }
    r
}

/// An access relation for array `id`: one subscript row per entry of
/// `subscripts`, each given as `[iterator coeffs..., param coeffs...,
/// constant]`.
pub fn array_access(
    id: i64,
    depth: usize,
    subscripts: &[Vec<i64>],
    nparams: usize,
) -> AffineRelation {
    let out = 1 + subscripts.len();
    let mut r = AffineRelation::new(out, depth, 0, nparams);
    let width = r.nb_columns() - 1;

    let mut arr = vec![0; width];
    arr[0] = -1;
    arr[width - 1] = id;
    r.add_equality(&arr);

    for (k, sub) in subscripts.iter().enumerate() {
        assert_eq!(sub.len(), depth + nparams + 1);
        let mut body = vec![0; width];
        body[1 + k] = -1;
        for (j, &c) in sub.iter().take(depth).enumerate() {
            body[out + j] = c;
        }
        for (j, &c) in sub.iter().skip(depth).take(nparams).enumerate() {
            body[out + depth + j] = c;
        }
        body[width - 1] = sub[depth + nparams];
        r.add_equality(&body);
    }
    r
}
