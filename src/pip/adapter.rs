//! Bridge between [`AffineRelation`] matrices and the solver's native
//! formats.
//!
//! The bridge refuses relations whose precision tag differs from the
//! solver build's native precision: a mismatch is a configuration error and
//! is reported immediately rather than silently truncated.

use crate::pip::matrix::{PipMatrix, PipOptions};
use crate::pip::quast::{Quast, QuastExpr};
use crate::pip::solver;
use crate::polyhedral::relation::{
    AffineRelation, Precision, ROW_EQUALITY, ROW_INEQUALITY,
};
use crate::utils::errors::{AnalysisError, Result};

/// Tag the solver historically puts on else-branch rows of a converted
/// quast; any nonzero tag reads back as an inequality.
const ELSE_BRANCH_TAG: i64 = 5;

/// Convert a relation into the solver's request format.
pub fn relation_to_matrix(relation: &AffineRelation) -> Result<PipMatrix> {
    if relation.precision != Precision::NATIVE {
        return Err(AnalysisError::PrecisionMismatch {
            expected: Precision::NATIVE,
            found: relation.precision,
        });
    }
    relation.validate()?;
    let mut matrix = PipMatrix::new(relation.nb_columns());
    for row in relation.rows() {
        matrix.push_row(row.to_vec());
    }
    Ok(matrix)
}

/// Run the parametric lexicographic search on a relation, with an optional
/// context over the parameters.
pub fn solve_relation(
    system: &AffineRelation,
    context: Option<&AffineRelation>,
    options: &PipOptions,
) -> Result<Quast> {
    let sys = relation_to_matrix(system)?;
    let ctx = context.map(relation_to_matrix).transpose()?;
    Ok(solver::solve(&sys, ctx.as_ref(), options))
}

/// Is there an integer point in `system`, under `context`?
///
/// The returned quast is inspected the way every caller of the solver does:
/// a solution list or an open parametric condition is a feasibility witness,
/// an entirely empty tree is infeasible.
pub fn has_integer_point(
    system: &AffineRelation,
    context: Option<&AffineRelation>,
) -> Result<bool> {
    let quast = solve_relation(system, context, &PipOptions::feasibility(true))?;
    Ok(quast.is_feasible())
}

/// Is there a rational point in `system`, under `context`? A cheaper,
/// relaxed rejection test.
pub fn has_rational_point(
    system: &AffineRelation,
    context: Option<&AffineRelation>,
) -> Result<bool> {
    let quast = solve_relation(system, context, &PipOptions::feasibility(false))?;
    Ok(quast.is_feasible())
}

fn empty_part(nvar: usize, npar: usize) -> AffineRelation {
    AffineRelation::new(nvar, 0, 0, npar)
}

/// Append `condition >= 0` to every part, over zeroed unknown columns.
fn append_condition(parts: &mut [AffineRelation], condition: &QuastExpr, nvar: usize, tag: i64) {
    for part in parts.iter_mut() {
        let mut body = vec![0; part.nb_columns() - 1];
        for (j, &c) in condition.coeffs.iter().enumerate() {
            body[nvar + j] = c;
        }
        part.push(tag, &body);
    }
}

/// Append the negation of `condition` (sign-flipped, constant decremented to
/// make the inequality strict) to every part.
fn append_negated_condition(
    parts: &mut [AffineRelation],
    condition: &QuastExpr,
    nvar: usize,
    tag: i64,
) {
    for part in parts.iter_mut() {
        let mut body = vec![0; part.nb_columns() - 1];
        for (j, &c) in condition.coeffs.iter().enumerate() {
            body[nvar + j] = -c;
        }
        let last = body.len() - 1;
        body[last] -= 1;
        part.push(tag, &body);
    }
}

/// Convert a quast into a union of polyhedra over `nvar` unknowns and
/// `npar` parameters.
///
/// A condition node appends its inequality to every polyhedron of the
/// then-subtree and its strict negation to every polyhedron of the
/// else-subtree, then unions the lists. A solution leaf pins each unknown to
/// its sign-flipped solved expression. A leaf without a solution list yields
/// one zero-row relation: no extra constraint.
pub fn quast_to_polyhedra(quast: &Quast, nvar: usize, npar: usize) -> Vec<AffineRelation> {
    match quast {
        Quast::Branch { condition, then_branch, else_branch } => {
            let mut tp = quast_to_polyhedra(then_branch, nvar, npar);
            let mut ep = quast_to_polyhedra(else_branch, nvar, npar);
            append_condition(&mut tp, condition, nvar, ROW_INEQUALITY);
            append_negated_condition(&mut ep, condition, nvar, ELSE_BRANCH_TAG);
            tp.extend(ep);
            tp
        }
        Quast::Solution(exprs) => {
            let mut part = empty_part(nvar, npar);
            for (i, expr) in exprs.iter().enumerate() {
                let mut body = vec![0; part.nb_columns() - 1];
                body[i] = expr.denominator;
                for (j, &c) in expr.param_coeffs().iter().enumerate() {
                    body[nvar + j] = -c;
                }
                let last = body.len() - 1;
                body[last] = -expr.constant();
                part.push(ROW_EQUALITY, &body);
            }
            vec![part]
        }
        Quast::Empty | Quast::Unbounded => vec![empty_part(nvar, npar)],
    }
}

/// The dual conversion: keep the regions of the quast where no solution
/// exists. Solution leaves contribute nothing; empty leaves become one
/// unconstrained relation; conditions are appended as in
/// [`quast_to_polyhedra`], the else-branch rows with the plain inequality
/// tag.
pub fn quast_no_solution_to_polyhedra(
    quast: &Quast,
    nvar: usize,
    npar: usize,
) -> Vec<AffineRelation> {
    match quast {
        Quast::Branch { condition, then_branch, else_branch } => {
            let mut tp = quast_no_solution_to_polyhedra(then_branch, nvar, npar);
            let mut ep = quast_no_solution_to_polyhedra(else_branch, nvar, npar);
            append_condition(&mut tp, condition, nvar, ROW_INEQUALITY);
            append_negated_condition(&mut ep, condition, nvar, ROW_INEQUALITY);
            tp.extend(ep);
            tp
        }
        Quast::Solution(_) => Vec::new(),
        Quast::Empty | Quast::Unbounded => vec![empty_part(nvar, npar)],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precision_mismatch_is_fatal() {
        let mut r = AffineRelation::new(1, 0, 0, 0);
        r.precision = Precision::Multiple;
        r.add_inequality(&[1, 0]);
        let err = has_integer_point(&r, None).unwrap_err();
        assert!(matches!(err, AnalysisError::PrecisionMismatch { .. }));
    }

    #[test]
    fn test_malformed_relation_is_fatal() {
        let r = AffineRelation::from_rows(2, 0, 0, 0, vec![vec![1, 1, 0]]);
        assert!(r.is_err());
    }

    #[test]
    fn test_integer_vs_rational() {
        // 2x = 3.
        let mut r = AffineRelation::new(1, 0, 0, 0);
        r.add_equality(&[2, -3]);
        assert!(!has_integer_point(&r, None).unwrap());
        assert!(has_rational_point(&r, None).unwrap());
    }

    #[test]
    fn test_quast_round_trip_single_point() {
        // x = 2, 1 <= y <= 2, y >= x: the single integer point is (2, 2).
        let mut r = AffineRelation::new(2, 0, 0, 0);
        r.add_equality(&[1, 0, -2]);
        r.add_inequality(&[0, 1, -1]);
        r.add_inequality(&[0, -1, 2]);
        r.add_inequality(&[-1, 1, 0]);
        let quast = solve_relation(&r, None, &PipOptions::default()).unwrap();
        let union = quast_to_polyhedra(&quast, 2, 0);
        assert!(!union.is_empty());
        for x in -3..6 {
            for y in -3..6 {
                let in_union = union.iter().any(|p| p.contains_point(&[x, y], &[]));
                let in_system = r.contains_point(&[x, y], &[]);
                if x == 2 && y == 2 {
                    assert!(in_union && in_system);
                } else {
                    assert!(!(in_union && in_system), "spurious point ({}, {})", x, y);
                }
            }
        }
    }

    #[test]
    fn test_condition_tags() {
        let quast = Quast::Branch {
            condition: QuastExpr::integral(vec![1, -1]),
            then_branch: Box::new(Quast::Solution(vec![QuastExpr::integral(vec![0, 0])])),
            else_branch: Box::new(Quast::Empty),
        };
        let union = quast_to_polyhedra(&quast, 1, 1);
        assert_eq!(union.len(), 2);
        // Then-part: solution row plus the condition.
        let then_part = &union[0];
        assert_eq!(then_part.tag(0), ROW_EQUALITY);
        assert_eq!(then_part.tag(1), ROW_INEQUALITY);
        // Else-part: the negated condition under the historical tag.
        let else_part = &union[1];
        assert_eq!(else_part.tag(0), ELSE_BRANCH_TAG);
        assert!(else_part.is_inequality_row(0));
        // Both tag readings describe the same region.
        let mut retagged = else_part.clone();
        retagged.set(0, 0, ROW_INEQUALITY);
        for p in -4..4 {
            assert_eq!(
                else_part.contains_point(&[0], &[p]),
                retagged.contains_point(&[0], &[p])
            );
        }
        // No-solution variant keeps the plain tag on its else rows.
        let no_sol = quast_no_solution_to_polyhedra(&quast, 1, 1);
        assert_eq!(no_sol.len(), 1);
        assert_eq!(no_sol[0].tag(0), ROW_INEQUALITY);
    }

    #[test]
    fn test_no_list_leaf_is_unconstrained() {
        let union = quast_to_polyhedra(&Quast::Empty, 2, 1);
        assert_eq!(union.len(), 1);
        assert_eq!(union[0].nb_rows(), 0);
        assert_eq!(union[0].nb_output_dims, 2);
        assert_eq!(union[0].nb_parameters, 1);
    }
}
