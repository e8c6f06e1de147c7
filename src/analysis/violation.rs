//! Legality checking of a candidate schedule.
//!
//! For every dependence of the original SCoP and every scattering dimension,
//! a violation system is assembled: the dependence polyhedron, both
//! candidate scatterings anchored on the dependence's own coordinate blocks,
//! equality of the scattering prefixes, and the reversed order at the
//! checked dimension. An integer point in that system is a schedule that
//! executes the target before the source it depends on.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::analysis::dependence::{dependences_single, remap, Dependence};
use crate::analysis::scop::Scop;
use crate::pip::adapter;
use crate::polyhedral::layout::{Block, ColumnLayout, SystemBuilder};
use crate::polyhedral::relation::{AffineRelation, ROW_EQUALITY, ROW_INEQUALITY};
use crate::utils::errors::{AnalysisError, Result};
use crate::AnalysisOptions;

/// A violated dependence at one scattering dimension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// Index of the violated dependence in the caller's dependence list.
    pub dependence: usize,
    /// The violated scattering dimension, starting at 1.
    pub dimension: usize,
    /// The set of instance pairs scheduled in the forbidden order.
    pub domain: AffineRelation,
    /// Output dimensions of the source scattering.
    pub source_nb_output_dims_scattering: usize,
    /// Output dimensions of the target scattering.
    pub target_nb_output_dims_scattering: usize,
    /// Local dimensions of the source scattering.
    pub source_nb_local_dims_scattering: usize,
    /// Local dimensions of the target scattering.
    pub target_nb_local_dims_scattering: usize,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "violation of dependence {} at dimension {}", self.dependence, self.dimension)
    }
}

/// Build the violation system for one dependence, one candidate scattering
/// pair and one dimension.
pub fn violation_system(
    dep: &Dependence,
    dep_index: usize,
    t_source: &AffineRelation,
    t_target: &AffineRelation,
    dimension: usize,
    nb_par: usize,
) -> Violation {
    let dep_out = dep.domain.nb_output_dims;
    let dep_in = dep.domain.nb_input_dims;
    let dep_source_local = dep.source_nb_local_dims_domain + dep.source_nb_local_dims_access;
    let dep_target_local = dep.target_nb_local_dims_domain + dep.target_nb_local_dims_access;

    let layout = ColumnLayout::new(vec![
        (Block::DepOutput, dep_out),
        (Block::SourceScattering, t_source.nb_output_dims),
        (Block::DepInput, dep_in),
        (Block::TargetScattering, t_target.nb_output_dims),
        (Block::DepSourceLocal, dep_source_local),
        (Block::SourceScatteringLocal, t_source.nb_local_dims),
        (Block::DepTargetLocal, dep_target_local),
        (Block::TargetScatteringLocal, t_target.nb_local_dims),
        (Block::Param, nb_par),
    ]);

    let nb_output_dims = dep_out + t_source.nb_output_dims;
    let nb_input_dims = dep_in + t_target.nb_output_dims;
    let nb_local_dims =
        dep.domain.nb_local_dims + t_source.nb_local_dims + t_target.nb_local_dims;
    let mut b =
        SystemBuilder::new(layout, nb_output_dims, nb_input_dims, nb_local_dims, nb_par);

    // 1. The dependence domain, its local block split between the source and
    // target halves.
    for i in 0..dep.domain.nb_rows() {
        let row = dep.domain.row(i);
        let outs = &row[1..1 + dep_out];
        let ins = &row[1 + dep_out..1 + dep_out + dep_in];
        let locals_start = 1 + dep_out + dep_in;
        let s_locals = &row[locals_start..locals_start + dep_source_local];
        let t_locals =
            &row[locals_start + dep_source_local..locals_start + dep_source_local + dep_target_local];
        let params_start = locals_start + dep_source_local + dep_target_local;
        let params = &row[params_start..row.len() - 1];
        let r = b.blank_row();
        b.set_tag(r, row[0]);
        b.copy(r, Block::DepOutput, outs);
        b.copy(r, Block::DepInput, ins);
        b.copy(r, Block::DepSourceLocal, s_locals);
        b.copy(r, Block::DepTargetLocal, t_locals);
        b.copy(r, Block::Param, params);
        b.set_constant(r, row[row.len() - 1]);
    }

    // 2. The source scattering; its inputs are the dependence's source
    // block.
    for i in 0..t_source.nb_rows() {
        let row = t_source.row(i);
        let out = t_source.nb_output_dims;
        let inp = t_source.nb_input_dims;
        let local = t_source.nb_local_dims;
        let r = b.blank_row();
        b.set_tag(r, row[0]);
        b.copy(r, Block::SourceScattering, &row[1..1 + out]);
        b.copy(r, Block::DepOutput, &row[1 + out..1 + out + inp]);
        b.copy(r, Block::SourceScatteringLocal, &row[1 + out + inp..1 + out + inp + local]);
        b.copy(r, Block::Param, &row[1 + out + inp + local..row.len() - 1]);
        b.set_constant(r, row[row.len() - 1]);
    }

    // 3. The target scattering, fully negated; its inputs are the
    // dependence's target block.
    for i in 0..t_target.nb_rows() {
        let row = t_target.row(i);
        let out = t_target.nb_output_dims;
        let inp = t_target.nb_input_dims;
        let local = t_target.nb_local_dims;
        let r = b.blank_row();
        b.set_tag(r, row[0]);
        b.copy_negated(r, Block::TargetScattering, &row[1..1 + out]);
        b.copy_negated(r, Block::DepInput, &row[1 + out..1 + out + inp]);
        b.copy_negated(
            r,
            Block::TargetScatteringLocal,
            &row[1 + out + inp..1 + out + inp + local],
        );
        b.copy_negated(r, Block::Param, &row[1 + out + inp + local..row.len() - 1]);
        b.set_constant(r, -row[row.len() - 1]);
    }

    // 4. Equal scattering prefixes below the checked dimension.
    for i in 0..dimension - 1 {
        let r = b.blank_row();
        b.set_tag(r, ROW_EQUALITY);
        b.set(r, Block::SourceScattering, i, 1);
        b.set(r, Block::TargetScattering, i, -1);
    }

    // 5. The violation condition: target scheduled strictly before source at
    // the checked dimension.
    let r = b.blank_row();
    b.set_tag(r, ROW_INEQUALITY);
    b.set(r, Block::SourceScattering, dimension - 1, 1);
    b.set(r, Block::TargetScattering, dimension - 1, -1);
    b.add_constant(r, -1);

    let mut system = b.finish();
    system.precision = dep.domain.precision;

    Violation {
        dependence: dep_index,
        dimension,
        domain: system,
        source_nb_output_dims_scattering: t_source.nb_output_dims,
        target_nb_output_dims_scattering: t_target.nb_output_dims,
        source_nb_local_dims_scattering: t_source.nb_local_dims,
        target_nb_local_dims_scattering: t_target.nb_local_dims,
    }
}

/// Check one dependence against one candidate scattering pair, at every
/// common dimension.
fn check_dependence(
    dep: &Dependence,
    dep_index: usize,
    t_source: &AffineRelation,
    t_target: &AffineRelation,
    context: &AffineRelation,
    nb_par: usize,
    options: &AnalysisOptions,
) -> Result<Vec<Violation>> {
    let max_dimension = t_source.nb_output_dims.min(t_target.nb_output_dims);
    let mut found = Vec::new();
    for dimension in 1..=max_dimension {
        let candidate = violation_system(dep, dep_index, t_source, t_target, dimension, nb_par);
        if adapter::has_integer_point(&candidate.domain, Some(context))? {
            found.push(candidate);
            if !options.fullcheck {
                return Ok(found);
            }
        }
    }
    Ok(found)
}

/// Check a precomputed dependence list against a candidate SCoP whose
/// statements match the original one to one.
pub fn violations_single(
    orig: &Scop,
    deps: &[Dependence],
    candidate: &Scop,
    options: &AnalysisOptions,
) -> Result<Vec<Violation>> {
    if candidate.statements.len() != orig.statements.len() {
        return Err(AnalysisError::ScopMismatch {
            expected: orig.statements.len(),
            found: candidate.statements.len(),
        });
    }
    let nb_par = orig.nb_parameters();
    let mut violations = Vec::new();
    for (dep_index, dep) in deps.iter().enumerate() {
        let t_source = &candidate.statement(dep.source)?.scattering;
        let t_target = &candidate.statement(dep.target)?.scattering;
        let found =
            check_dependence(dep, dep_index, t_source, t_target, &orig.context, nb_par, options)?;
        let stop = !found.is_empty() && !options.fullcheck;
        violations.extend(found);
        if stop {
            break;
        }
    }
    Ok(violations)
}

/// Compute the dependences of the original SCoP and the violations the
/// candidate scheduling introduces.
///
/// With the unions option, both SCoPs are union-expanded first and every
/// source/target scattering combination stemming from the same original
/// statement is checked.
pub fn violations(
    orig: &mut Scop,
    candidate: &Scop,
    options: &AnalysisOptions,
) -> Result<(Vec<Dependence>, Vec<Violation>)> {
    orig.validate()?;
    candidate.validate()?;

    if !options.unions {
        let deps = dependences_single(orig, options)?;
        let violations = violations_single(orig, &deps, candidate, options)?;
        return Ok((deps, violations));
    }

    let (mut orig_nounion, orig_mapping) = orig.remove_unions();
    let (cand_nounion, cand_mapping) = candidate.remove_unions();
    let mut deps = dependences_single(&mut orig_nounion, options)?;
    if options.scalar_renaming || options.scalar_expansion || options.scalar_privatization {
        crate::analysis::dependence::copy_access_back(orig, &orig_nounion, &orig_mapping);
    }

    let nb_par = orig.nb_parameters();
    let mut violations = Vec::new();
    'deps: for (dep_index, dep) in deps.iter().enumerate() {
        let orig_source = orig_mapping.find_original(dep.source).unwrap_or(dep.source);
        let orig_target = orig_mapping.find_original(dep.target).unwrap_or(dep.target);
        for mapped_source in cand_mapping.mapped_for(orig_source) {
            let t_source = &cand_nounion.statements[mapped_source].scattering;
            for mapped_target in cand_mapping.mapped_for(orig_target) {
                let t_target = &cand_nounion.statements[mapped_target].scattering;
                let found = check_dependence(
                    dep,
                    dep_index,
                    t_source,
                    t_target,
                    &orig.context,
                    nb_par,
                    options,
                )?;
                let stop = !found.is_empty() && !options.fullcheck;
                violations.extend(found);
                if stop {
                    break 'deps;
                }
            }
        }
    }

    remap(&mut deps, &orig_mapping);
    Ok((deps, violations))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::scop::{
        array_access, identity_scattering, parametric_domain, Access, Statement,
    };

    /// `for i { S0: A[i] = ...; S1: ... = A[i]; }` under parameter N.
    fn write_then_read_scop() -> Scop {
        let mut scop = Scop::new(AffineRelation::context(1));
        let sub_i = vec![1, 0, 0];
        scop.statements.push(Statement::new(
            parametric_domain(1, 0, 1),
            identity_scattering(1, &[0, 0], 1),
            vec![Access::write(array_access(1, 1, &[sub_i.clone()], 1))],
        ));
        scop.statements.push(Statement::new(
            parametric_domain(1, 0, 1),
            identity_scattering(1, &[0, 1], 1),
            vec![Access::read(array_access(1, 1, &[sub_i], 1))],
        ));
        scop
    }

    #[test]
    fn test_unchanged_schedule_is_legal() {
        let mut orig = write_then_read_scop();
        let candidate = orig.clone();
        let options = AnalysisOptions { fullcheck: true, ..AnalysisOptions::default() };
        let (deps, violations) = violations(&mut orig, &candidate, &options).unwrap();
        assert!(!deps.is_empty());
        assert!(violations.is_empty());
    }

    #[test]
    fn test_swapped_statements_violate() {
        let mut orig = write_then_read_scop();
        // The candidate schedules the reader before the writer.
        let mut candidate = orig.clone();
        candidate.statements[0].scattering = identity_scattering(1, &[0, 1], 1);
        candidate.statements[1].scattering = identity_scattering(1, &[0, 0], 1);
        let options = AnalysisOptions::default();
        let (deps, violations) = violations(&mut orig, &candidate, &options).unwrap();
        assert_eq!(deps.len(), 1);
        assert!(!violations.is_empty());
        let v = &violations[0];
        assert_eq!(v.dependence, 0);
        // The textual order flips at the innermost static dimension.
        assert_eq!(v.dimension, 3);
    }

    #[test]
    fn test_reversed_loop_violates_at_iterator_dimension() {
        let mut orig = write_then_read_scop();
        // Candidate runs the loop backwards for the reader only: its
        // iterator dimension becomes N - 1 - i.
        let mut candidate = orig.clone();
        let mut scat = identity_scattering(1, &[0, 1], 1);
        // Rewrite the c1 row from c1 = i to c1 = N - 1 - i.
        let row = scat.row_defining_output(1).unwrap();
        let col_in = scat.col_input(0);
        let col_n = scat.col_param(0);
        let col_c = scat.col_constant();
        scat.set(row, col_in, -1);
        scat.set(row, col_n, 1);
        scat.set(row, col_c, -1);
        candidate.statements[1].scattering = scat;
        let options = AnalysisOptions { fullcheck: true, ..AnalysisOptions::default() };
        let (_, violations) = violations(&mut orig, &candidate, &options).unwrap();
        assert!(violations.iter().any(|v| v.dimension == 2));
    }

    #[test]
    fn test_mismatched_candidate_is_fatal() {
        let mut orig = write_then_read_scop();
        let mut candidate = orig.clone();
        candidate.statements.pop();
        let options = AnalysisOptions::default();
        let err = violations(&mut orig, &candidate, &options).unwrap_err();
        assert!(matches!(err, AnalysisError::ScopMismatch { .. }));
    }

    #[test]
    fn test_violation_system_shape() {
        let mut orig = write_then_read_scop();
        let deps = dependences_single(&mut orig, &AnalysisOptions::default()).unwrap();
        let dep = &deps[0];
        let t_source = &orig.statements[0].scattering;
        let t_target = &orig.statements[1].scattering;
        let v = violation_system(dep, 0, t_source, t_target, 1, 1);
        // Columns: tag + dep out (3) + source scattering (3) + dep in (3)
        // + target scattering (3) + param + constant.
        assert_eq!(v.domain.nb_columns(), 1 + 3 + 3 + 3 + 3 + 1 + 1);
        assert_eq!(
            v.domain.nb_rows(),
            dep.domain.nb_rows() + t_source.nb_rows() + t_target.nb_rows() + 1
        );
        assert_eq!(v.source_nb_output_dims_scattering, 3);
        assert_eq!(v.target_nb_output_dims_scattering, 3);
    }
}
