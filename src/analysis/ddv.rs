//! Dependence distance vectors.
//!
//! A distance vector classifies, for each dimension of a loop, how the
//! source and target instances of a dependence relate: equal, strictly
//! ordered in either direction, at a constant distance, or unconstrained.
//! The classification drives the loop permutability test.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::analysis::dependence::{Dependence, DependenceKind};
use crate::analysis::labels::ScopInfo;
use crate::pip::adapter;
use crate::pip::matrix::PipOptions;
use crate::pip::quast::Quast;
use crate::polyhedral::relation::{AffineRelation, ROW_EQUALITY, ROW_INEQUALITY};
use crate::utils::errors::Result;

/// Per-dimension distance classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistanceKind {
    /// Constant distance.
    Scalar(i64),
    /// Source and target instances coincide on this dimension.
    Eq,
    /// Source strictly after target.
    Plus,
    /// Source strictly before target.
    Minus,
    /// Any direction.
    Star,
}

impl fmt::Display for DistanceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DistanceKind::Scalar(v) => write!(f, "{}", v),
            DistanceKind::Eq => write!(f, "="),
            DistanceKind::Plus => write!(f, ">"),
            DistanceKind::Minus => write!(f, "<"),
            DistanceKind::Star => write!(f, "*"),
        }
    }
}

/// The distance vector of one dependence inside one loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistanceVector {
    /// Identifier of the loop the vector was extracted for.
    pub loop_id: usize,
    /// Kind of the underlying dependence.
    pub kind: DependenceKind,
    /// One entry per dimension, outermost first.
    pub components: Vec<DistanceKind>,
}

impl fmt::Display for DistanceVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "loop_id={}, (", self.loop_id)?;
        for (i, c) in self.components.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", c)?;
        }
        write!(f, ")")
    }
}

/// Does the lexicographic minimum of the first variable resolve to one
/// integer constant on every region of the quast?
fn constant_distance(system: &AffineRelation, nb_par: usize) -> Result<Option<i64>> {
    let context = AffineRelation::context(nb_par);
    let opts = PipOptions {
        simplify: true,
        maximize: false,
        integer: false,
        unrestricted_params: true,
        unrestricted_unknowns: true,
    };
    let quast = adapter::solve_relation(system, Some(&context), &opts)?;
    if !quast.is_feasible() {
        return Ok(None);
    }
    let mut value = None;
    for leaf in quast.leaf_nodes() {
        match leaf {
            Quast::Empty => {}
            Quast::Unbounded => return Ok(None),
            Quast::Solution(exprs) => {
                let Some(e) = exprs.first() else { return Ok(None) };
                if !e.is_constant() || e.denominator != 1 {
                    return Ok(None);
                }
                match value {
                    None => value = Some(e.constant()),
                    Some(v) if v != e.constant() => return Ok(None),
                    _ => {}
                }
            }
            Quast::Branch { .. } => unreachable!("leaf_nodes returns leaves"),
        }
    }
    Ok(value)
}

/// Template for the probe systems: the dependence domain with one extra
/// leading variable column for the distance.
fn probe_base(dep: &Dependence) -> AffineRelation {
    let mat = &dep.domain;
    let mut rows = Vec::with_capacity(mat.nb_rows());
    for i in 0..mat.nb_rows() {
        let src = mat.row(i);
        let mut row = Vec::with_capacity(src.len() + 1);
        row.push(src[0]);
        row.push(0);
        row.extend_from_slice(&src[1..]);
        rows.push(row);
    }
    let mut base = AffineRelation::new(
        mat.nb_output_dims + 1,
        mat.nb_input_dims,
        mat.nb_local_dims,
        mat.nb_parameters,
    );
    for row in rows {
        base.push_row(row);
    }
    base
}

/// Classify the first `size` dimensions of a dependence.
fn distance_vector(dep: &Dependence, loop_id: usize, size: usize) -> Result<DistanceVector> {
    let src_block = dep.source_block();
    let nb_par = dep.domain.nb_parameters;
    let base = probe_base(dep);
    let width = base.nb_columns() - 1;

    let mut components = vec![DistanceKind::Star; size];
    for i in 1..=size {
        let probe = |tag: i64, delta: i64, s: i64, t: i64, cst: i64| {
            let mut body = vec![0; width];
            body[0] = delta;
            body[i] = s;
            body[i + src_block] = t;
            body[width - 1] = cst;
            let mut system = base.clone();
            system.push(tag, &body);
            system
        };

        let has_eq = adapter::has_rational_point(&probe(ROW_EQUALITY, 0, 1, -1, 0), None)?;
        let has_pos = adapter::has_rational_point(&probe(ROW_INEQUALITY, 0, 1, -1, -1), None)?;
        let has_neg = adapter::has_rational_point(&probe(ROW_INEQUALITY, 0, -1, 1, -1), None)?;

        // Constant distance: the minimum and the maximum of the difference
        // must agree.
        let min = constant_distance(&probe(ROW_EQUALITY, 1, -1, 1, 0), nb_par)?;
        let scalar = match min {
            Some(lo) => match constant_distance(&probe(ROW_EQUALITY, 1, 1, -1, 0), nb_par)? {
                Some(neg_hi) if lo == -neg_hi => Some(lo),
                _ => None,
            },
            None => None,
        };

        components[i - 1] = match scalar {
            Some(v) if v != 0 => DistanceKind::Scalar(v),
            _ if has_pos && has_neg => DistanceKind::Star,
            _ if has_pos => DistanceKind::Plus,
            _ if has_neg => DistanceKind::Minus,
            _ if has_eq => DistanceKind::Eq,
            _ => DistanceKind::Star,
        };
    }

    Ok(DistanceVector { loop_id, kind: dep.kind, components })
}

/// Distance vectors of every dependence lying within loop `loop_id`.
pub fn extract_in_loop(
    info: &ScopInfo,
    deps: &[Dependence],
    loop_id: usize,
) -> Result<Vec<DistanceVector>> {
    let mut vectors = Vec::new();
    for dep in deps {
        let s = info.stmt(dep.source);
        let t = info.stmt(dep.target);
        let m = s.depth.min(t.depth);
        let pos = (0..m).find(|&i| s.index[i] == t.index[i] && t.index[i] == loop_id);
        let Some(i) = pos else { continue };
        vectors.push(distance_vector(dep, loop_id, i + 1)?);
    }
    Ok(vectors)
}

/// Are two nested loops permutable?
///
/// Permutability fails when any distance component is unconstrained, when a
/// loop carries distances of both signs, or when the two loops carry
/// distances of opposite signs.
pub fn loops_are_permutable(
    info: &ScopInfo,
    deps: &[Dependence],
    loop_id1: usize,
    loop_id2: usize,
) -> Result<bool> {
    let l1 = extract_in_loop(info, deps, loop_id1)?;
    let l2 = extract_in_loop(info, deps, loop_id2)?;
    if l1.is_empty() || l2.is_empty() {
        return Ok(true);
    }

    let vectors = if l1[0].components.len() > l2[0].components.len() { &l1 } else { &l2 };

    let mut dim1 = None;
    let mut dim2 = None;
    for stmt in &info.statements {
        for (i, &idx) in stmt.index.iter().enumerate() {
            if idx == loop_id1 {
                dim1 = Some(i);
            } else if idx == loop_id2 {
                dim2 = Some(i);
            }
        }
        if dim1.is_some() && dim2.is_some() {
            break;
        }
    }
    let (Some(dim1), Some(dim2)) = (dim1, dim2) else {
        return Ok(true);
    };

    let mut pos1 = false;
    let mut neg1 = false;
    let mut pos2 = false;
    let mut neg2 = false;
    for dv in vectors {
        let mut classify = |dim: usize, pos: &mut bool, neg: &mut bool| -> bool {
            match dv.components.get(dim).copied().unwrap_or(DistanceKind::Star) {
                DistanceKind::Plus => *pos = true,
                DistanceKind::Minus => *neg = true,
                DistanceKind::Scalar(v) if v > 0 => *pos = true,
                DistanceKind::Scalar(v) if v < 0 => *neg = true,
                DistanceKind::Star => return true,
                _ => {}
            }
            false
        };
        let star = classify(dim1, &mut pos1, &mut neg1) | classify(dim2, &mut pos2, &mut neg2);
        if star || (pos1 && neg1) || (pos2 && neg2) {
            return Ok(false);
        }
    }

    Ok(!((pos1 && neg2) || (neg1 && pos2)))
}
