//! Data dependence computation.
//!
//! For every ordered statement pair and every access pair on the same array,
//! a candidate dependence system is built:
//! `domain(source) ∧ domain(target) ∧ access equality ∧ precedence`. The
//! candidate is first screened by the GCD test, then decided exactly by the
//! solver; surviving systems become [`Dependence`] edges classified by the
//! access kinds. The module also hosts the scalar analysis suite
//! (privatization, expansion, renaming) and the last-writer refinement.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::analysis::labels::{LabelMapping, ScopInfo};
use crate::analysis::scop::{statements_commute, Scop, Statement};
use crate::pip::adapter;
use crate::pip::matrix::PipOptions;
use crate::pip::quast::Quast;
use crate::polyhedral::layout::{Block, ColumnLayout, SystemBuilder};
use crate::polyhedral::relation::{AffineRelation, ROW_EQUALITY, ROW_INEQUALITY};
use crate::utils::errors::Result;
use crate::utils::math::vector_gcd;
use crate::AnalysisOptions;

/// Classification of a dependence edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DependenceKind {
    /// Read after write (flow).
    Raw,
    /// Write after read (anti).
    War,
    /// Write after write (output).
    Waw,
    /// Read after read (input).
    Rar,
    /// Flow dependence on a scalar made loop-independent by privatization.
    RawScalarPriv,
}

impl DependenceKind {
    /// Conventional short name.
    pub fn short_name(&self) -> &'static str {
        match self {
            DependenceKind::Raw => "RAW",
            DependenceKind::War => "WAR",
            DependenceKind::Waw => "WAW",
            DependenceKind::Rar => "RAR",
            DependenceKind::RawScalarPriv => "RAW_SCALPRIV",
        }
    }
}

impl fmt::Display for DependenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

/// A data dependence between two statement instances.
///
/// The domain relates source and target instances: its output block covers
/// the source iterators and access dimensions, its input block the target
/// ones. The `*_nb_*` fields cache the sub-block widths needed to rebuild
/// the column layout later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependence {
    /// Source statement label.
    pub source: usize,
    /// Target statement label.
    pub target: usize,
    /// Index of the source reference in the source's access list.
    pub ref_source: usize,
    /// Index of the target reference in the target's access list.
    pub ref_target: usize,
    /// Dependence classification.
    pub kind: DependenceKind,
    /// Depth the dependence was built for.
    pub depth: usize,
    /// The dependence polyhedron.
    pub domain: AffineRelation,
    /// Output dimensions of the source domain.
    pub source_nb_output_dims_domain: usize,
    /// Output dimensions of the source access.
    pub source_nb_output_dims_access: usize,
    /// Output dimensions of the target domain.
    pub target_nb_output_dims_domain: usize,
    /// Output dimensions of the target access.
    pub target_nb_output_dims_access: usize,
    /// Local dimensions of the source domain.
    pub source_nb_local_dims_domain: usize,
    /// Local dimensions of the source access.
    pub source_nb_local_dims_access: usize,
    /// Local dimensions of the target domain.
    pub target_nb_local_dims_domain: usize,
    /// Local dimensions of the target access.
    pub target_nb_local_dims_access: usize,
}

impl Dependence {
    /// Width of the source column block of the domain.
    pub fn source_block(&self) -> usize {
        self.source_nb_output_dims_domain + self.source_nb_output_dims_access
    }

    /// Width of the target column block of the domain.
    pub fn target_block(&self) -> usize {
        self.target_nb_output_dims_domain + self.target_nb_output_dims_access
    }
}

impl fmt::Display for Dependence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "S{} -> S{} [{}] depth {}, ref {}->{}",
            self.source, self.target, self.kind, self.depth, self.ref_source, self.ref_target
        )
    }
}

/// Split a relation row into its named parts.
fn row_parts<'a>(
    r: &'a AffineRelation,
    i: usize,
) -> (i64, &'a [i64], &'a [i64], &'a [i64], &'a [i64], i64) {
    let row = r.row(i);
    let out = r.nb_output_dims;
    let inp = r.nb_input_dims;
    let local = r.nb_local_dims;
    let par = r.nb_parameters;
    let tag = row[0];
    let outs = &row[1..1 + out];
    let ins = &row[1 + out..1 + out + inp];
    let locals = &row[1 + out + inp..1 + out + inp + local];
    let params = &row[1 + out + inp + local..1 + out + inp + local + par];
    let cst = row[row.len() - 1];
    (tag, outs, ins, locals, params, cst)
}

/// The GCD screen: a cheap necessary condition for integer feasibility.
///
/// Every equality row without parameter coefficients and with a nonzero
/// constant must have the constant divisible by the gcd of its variable
/// coefficients; a variable-free row among them is an outright rejection.
pub fn gcd_test(system: &AffineRelation) -> bool {
    let nvars = system.nb_dims();
    for i in 0..system.nb_rows() {
        if !system.is_equality_row(i) {
            continue;
        }
        let row = system.row(i);
        let vars = &row[1..1 + nvars];
        let params = &row[1 + nvars..row.len() - 1];
        let cst = row[row.len() - 1];
        if cst == 0 || params.iter().any(|&c| c != 0) {
            continue;
        }
        let g = vector_gcd(vars);
        if g == 0 || cst.abs() % g != 0 {
            return false;
        }
    }
    true
}

/// Build the dependence system for one statement/access pair at one depth.
///
/// `strict_at_depth` makes the precedence strict at the last compared
/// dimension: required when the source is not textually before the target,
/// or when the compared depth lies inside the common loop nest.
#[allow(clippy::too_many_arguments)]
fn build_system(
    source: &Statement,
    target: &Statement,
    array_s: &AffineRelation,
    array_t: &AffineRelation,
    depth: usize,
    strict_at_depth: bool,
    nb_par: usize,
) -> AffineRelation {
    let s_dom = source.domain.first();
    let t_dom = target.domain.first();

    let s_local_domain = s_dom.nb_local_dims;
    let s_local_access = array_s.nb_local_dims;
    let t_local_domain = t_dom.nb_local_dims;
    let t_local_access = array_t.nb_local_dims;

    let layout = ColumnLayout::new(vec![
        (Block::SourceIter, s_dom.nb_output_dims),
        (Block::SourceAccess, array_s.nb_output_dims),
        (Block::TargetIter, t_dom.nb_output_dims),
        (Block::TargetAccess, array_t.nb_output_dims),
        (Block::SourceLocalDomain, s_local_domain),
        (Block::SourceLocalAccess, s_local_access),
        (Block::TargetLocalDomain, t_local_domain),
        (Block::TargetLocalAccess, t_local_access),
        (Block::Param, nb_par),
    ]);

    let nb_output_dims = s_dom.nb_output_dims + array_s.nb_output_dims;
    let nb_input_dims = t_dom.nb_output_dims + array_t.nb_output_dims;
    let nb_local_dims = s_local_domain + s_local_access + t_local_domain + t_local_access;
    let mut b =
        SystemBuilder::new(layout, nb_output_dims, nb_input_dims, nb_local_dims, nb_par);

    // 1. The source domain.
    for i in 0..s_dom.nb_rows() {
        let (tag, outs, _, locals, params, cst) = row_parts(s_dom, i);
        let row = b.blank_row();
        b.set_tag(row, tag);
        b.copy(row, Block::SourceIter, outs);
        b.copy(row, Block::SourceLocalDomain, locals);
        b.copy(row, Block::Param, params);
        b.set_constant(row, cst);
    }

    // 2. The target domain.
    for i in 0..t_dom.nb_rows() {
        let (tag, outs, _, locals, params, cst) = row_parts(t_dom, i);
        let row = b.blank_row();
        b.set_tag(row, tag);
        b.copy(row, Block::TargetIter, outs);
        b.copy(row, Block::TargetLocalDomain, locals);
        b.copy(row, Block::Param, params);
        b.set_constant(row, cst);
    }

    // 3. The source access; its inputs are the source iterators.
    for i in 0..array_s.nb_rows() {
        let (tag, outs, ins, locals, params, cst) = row_parts(array_s, i);
        let row = b.blank_row();
        b.set_tag(row, tag);
        b.copy(row, Block::SourceAccess, outs);
        b.copy(row, Block::SourceIter, ins);
        b.copy(row, Block::SourceLocalAccess, locals);
        b.copy(row, Block::Param, params);
        b.set_constant(row, cst);
    }

    // 4. The target access, fully negated.
    for i in 0..array_t.nb_rows() {
        let (tag, outs, ins, locals, params, cst) = row_parts(array_t, i);
        let row = b.blank_row();
        b.set_tag(row, tag);
        b.copy_negated(row, Block::TargetAccess, outs);
        b.copy_negated(row, Block::TargetIter, ins);
        b.copy_negated(row, Block::TargetLocalAccess, locals);
        b.copy_negated(row, Block::Param, params);
        b.set_constant(row, -cst);
    }

    // 5. Conflict equalities between the two access images.
    let min_access = array_s.nb_output_dims.min(array_t.nb_output_dims);
    for i in 0..min_access {
        let row = b.blank_row();
        b.set_tag(row, ROW_EQUALITY);
        b.set(row, Block::SourceAccess, i, -1);
        b.set(row, Block::TargetAccess, i, 1);
    }

    // 6. The precedence constraints.
    for i in 0..depth {
        let row = b.blank_row();
        b.set_tag(row, ROW_EQUALITY);
        b.set(row, Block::SourceIter, i, -1);
        b.set(row, Block::TargetIter, i, 1);
        if i == depth - 1 {
            b.set_tag(row, ROW_INEQUALITY);
            if strict_at_depth {
                b.set_constant(row, -1);
            }
        }
    }

    let mut system = b.finish();
    system.precision = s_dom.precision;
    system
}

/// Study one candidate: build the system, screen it, decide it.
#[allow(clippy::too_many_arguments)]
fn dependence_system(
    scop: &Scop,
    info: &ScopInfo,
    s_label: usize,
    t_label: usize,
    array_s: &AffineRelation,
    array_t: &AffineRelation,
    ref_s: usize,
    ref_t: usize,
    kind: DependenceKind,
    depth: usize,
) -> Result<Option<Dependence>> {
    // At depth 0 only textual order can carry a dependence.
    if s_label != t_label && depth == 0 && s_label > t_label {
        return Ok(None);
    }

    let source = &scop.statements[s_label];
    let target = &scop.statements[t_label];
    let common = info.common_loops(s_label, t_label);
    let strict_at_depth = s_label >= t_label || depth < common;

    let system = build_system(
        source,
        target,
        array_s,
        array_t,
        depth,
        strict_at_depth,
        scop.nb_parameters(),
    );

    if !gcd_test(&system) {
        return Ok(None);
    }
    if !adapter::has_integer_point(&system, Some(&scop.context))? {
        return Ok(None);
    }

    let s_dom = source.domain.first();
    let t_dom = target.domain.first();
    Ok(Some(Dependence {
        source: s_label,
        target: t_label,
        ref_source: ref_s,
        ref_target: ref_t,
        kind,
        depth,
        domain: system,
        source_nb_output_dims_domain: s_dom.nb_output_dims,
        source_nb_output_dims_access: array_s.nb_output_dims,
        target_nb_output_dims_domain: t_dom.nb_output_dims,
        target_nb_output_dims_access: array_t.nb_output_dims,
        source_nb_local_dims_domain: s_dom.nb_local_dims,
        source_nb_local_dims_access: array_s.nb_local_dims,
        target_nb_local_dims_domain: t_dom.nb_local_dims,
        target_nb_local_dims_access: array_t.nb_local_dims,
    }))
}

/// All dependences from statement `s_label` to statement `t_label`.
fn dependence_between(
    scop: &Scop,
    info: &ScopInfo,
    s_label: usize,
    t_label: usize,
    options: &AnalysisOptions,
) -> Result<Vec<Dependence>> {
    let source = &scop.statements[s_label];
    let target = &scop.statements[t_label];

    if options.commute && statements_commute(source, s_label, target, t_label) {
        return Ok(Vec::new());
    }

    let s_depth = info.stmt(s_label).depth;
    let t_depth = info.stmt(t_label).depth;
    let common = info.common_loops(s_label, t_label);
    // A self-dependence needs at least one loop around the statement; across
    // statements, depth 0 stands for "no shared loop".
    let (min_depth, max_depth) = if s_label == t_label {
        (1, s_depth)
    } else {
        let min = if s_depth > 0 && t_depth > 0 && common > 0 { 1 } else { 0 };
        (min, common)
    };

    let mut deps = Vec::new();
    for (ref_s, access_s) in source.accesses.iter().enumerate() {
        if access_s.relation.is_union() {
            log::warn!("statement {}: access {} still carries a union, using its first part", s_label, ref_s);
        }
        let src_id = access_s.array_id()?;
        let src_is_read = !access_s.kind.is_write();

        if src_is_read && !options.war && !options.rar {
            continue;
        }
        if !src_is_read && !options.raw && !options.waw {
            continue;
        }

        for (ref_t, access_t) in target.accesses.iter().enumerate() {
            let targ_id = access_t.array_id()?;
            if src_id != targ_id {
                continue;
            }
            let targ_is_read = !access_t.kind.is_write();
            let kind = match (src_is_read, targ_is_read) {
                (true, false) => DependenceKind::War,
                (true, true) => DependenceKind::Rar,
                (false, false) => DependenceKind::Waw,
                (false, true) => DependenceKind::Raw,
            };
            let enabled = match kind {
                DependenceKind::War => options.war,
                DependenceKind::Rar => options.rar,
                DependenceKind::Waw => options.waw,
                DependenceKind::Raw => options.raw,
                DependenceKind::RawScalarPriv => false,
            };
            if !enabled {
                continue;
            }
            for depth in min_depth..=max_depth {
                if let Some(dep) = dependence_system(
                    scop,
                    info,
                    s_label,
                    t_label,
                    access_s.relation.first(),
                    access_t.relation.first(),
                    ref_s,
                    ref_t,
                    kind,
                    depth,
                )? {
                    deps.push(dep);
                }
            }
        }
    }
    Ok(deps)
}

/// Build the dependence graph of a SCoP whose unions were already removed.
pub fn dependences_single(scop: &mut Scop, options: &AnalysisOptions) -> Result<Vec<Dependence>> {
    scop.validate()?;
    let mut info = ScopInfo::compute(scop)?;

    if options.scalar_privatization || options.scalar_expansion {
        analyze_scalars(scop, &mut info, options)?;
    }

    let n = scop.statements.len();
    let mut deps = Vec::new();
    for i in 0..n {
        deps.extend(dependence_between(scop, &info, i, i, options)?);
        for j in i + 1..n {
            deps.extend(dependence_between(scop, &info, i, j, options)?);
            deps.extend(dependence_between(scop, &info, j, i, options)?);
        }
    }

    let mut renamed = false;
    if options.scalar_renaming {
        renamed = scalar_renaming(scop, &mut info, options, &mut deps)?;
    }
    if !renamed && options.scalar_privatization {
        prune_with_privatization(scop, &mut info, options, &mut deps)?;
    }

    if options.lastwriter {
        compute_last_writer(&mut deps)?;
    }

    if options.prune_dups {
        prune_duplicates(&mut deps);
    }

    Ok(deps)
}

/// Build the dependence graph of a SCoP, removing relation unions first when
/// the options ask for it.
pub fn dependences(scop: &mut Scop, options: &AnalysisOptions) -> Result<Vec<Dependence>> {
    if !options.unions {
        return dependences_single(scop, options);
    }
    let (mut nounion, mapping) = scop.remove_unions();
    let mut deps = dependences_single(&mut nounion, options)?;
    if options.scalar_renaming || options.scalar_expansion || options.scalar_privatization {
        copy_access_back(scop, &nounion, &mapping);
    }
    remap(&mut deps, &mapping);
    Ok(deps)
}

/// Compute the dependence graph and store it in the SCoP's extension slot.
pub fn attach_dependences(scop: &mut Scop, options: &AnalysisOptions) -> Result<()> {
    let deps = dependences(scop, options)?;
    scop.add_dependence_extension(deps);
    Ok(())
}

/// Rewrite union-expanded labels back to the original ones.
pub fn remap(deps: &mut [Dependence], mapping: &LabelMapping) {
    for dep in deps.iter_mut() {
        if let Some(original) = mapping.find_original(dep.source) {
            dep.source = original;
        }
        if let Some(original) = mapping.find_original(dep.target) {
            dep.target = original;
        }
    }
}

/// Copy access relations (rewritten by the scalar analyses) from the
/// union-free SCoP back onto the original statements.
pub(crate) fn copy_access_back(scop: &mut Scop, nounion: &Scop, mapping: &LabelMapping) {
    for (original, stmt) in scop.statements.iter_mut().enumerate() {
        let mut first = None;
        for mapped in mapping.mapped_for(original) {
            let accesses = &nounion.statements[mapped].accesses;
            match first {
                None => first = Some(accesses.clone()),
                Some(ref kept) => {
                    if kept != accesses {
                        log::error!(
                            "statement {}: deunified parts disagree on access relations",
                            original
                        );
                    }
                }
            }
        }
        if let Some(accesses) = first {
            stmt.accesses = accesses;
        }
    }
}

/// Drop dependences identical in endpoints, references, kind, depth and
/// domain.
pub fn prune_duplicates(deps: &mut Vec<Dependence>) {
    let mut kept: Vec<Dependence> = Vec::with_capacity(deps.len());
    for dep in deps.drain(..) {
        let duplicate = kept.iter().any(|d| {
            d.source == dep.source
                && d.target == dep.target
                && d.ref_source == dep.ref_source
                && d.ref_target == dep.ref_target
                && d.kind == dep.kind
                && d.depth == dep.depth
                && d.domain == dep.domain
        });
        if !duplicate {
            kept.push(dep);
        }
    }
    *deps = kept;
}

/******************************************************************************
 *                       Loop-carried / loop-independent                      *
 ******************************************************************************/

fn zero_body(r: &AffineRelation) -> Vec<i64> {
    vec![0; r.nb_columns() - 1]
}

/// Is the dependence carried by loop `loop_id`?
///
/// All iterators above the loop are pinned equal; the loop's own iterators
/// must differ, probed with a strict inequality in each direction.
pub fn is_loop_carried(
    dep: &Dependence,
    info: &ScopInfo,
    loop_id: usize,
) -> Result<bool> {
    let s = info.stmt(dep.source);
    let t = info.stmt(dep.target);
    let i = s.index.iter().position(|&x| x == loop_id);
    let j = t.index.iter().position(|&x| x == loop_id);
    let (Some(i), Some(j)) = (i, j) else {
        return Ok(false);
    };
    if i != j {
        return Ok(false);
    }

    let src_block = dep.source_block();
    let mut base = dep.domain.clone();
    for k in 0..i {
        let mut body = zero_body(&base);
        body[k] = -1;
        body[src_block + k] = 1;
        base.add_equality(&body);
    }

    // Source strictly after target on the loop's dimension.
    let mut probe = base.clone();
    let mut body = zero_body(&probe);
    body[i] = 1;
    body[src_block + i] = -1;
    *body.last_mut().expect("constant column") = -1;
    probe.add_inequality(&body);
    if adapter::has_rational_point(&probe, None)? {
        return Ok(true);
    }

    // Then strictly before.
    let mut probe = base;
    let mut body = zero_body(&probe);
    body[i] = -1;
    body[src_block + i] = 1;
    *body.last_mut().expect("constant column") = -1;
    probe.add_inequality(&body);
    adapter::has_rational_point(&probe, None)
}

/// Is the dependence loop-independent? All corresponding iterator pairs are
/// pinned equal at once, so the solver runs a single time.
pub fn is_loop_independent(dep: &Dependence) -> Result<bool> {
    let n = dep
        .source_nb_output_dims_domain
        .min(dep.target_nb_output_dims_domain);
    let src_block = dep.source_block();
    let mut system = dep.domain.clone();
    for k in 0..n {
        let mut body = zero_body(&system);
        body[k] = 1;
        body[src_block + k] = -1;
        system.add_equality(&body);
    }
    let context = AffineRelation::context(dep.domain.nb_parameters);
    adapter::has_rational_point(&system, Some(&context))
}

/******************************************************************************
 *                          Scalar analysis functions                         *
 ******************************************************************************/

/// How a statement references a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarRef {
    /// Not referenced.
    Undefined,
    /// Read only.
    Used,
    /// Written only.
    Defined,
    /// Both written and read.
    DefinedUsed,
}

/// Reference kind of `var` in a statement.
pub fn var_is_ref(stmt: &Statement, var: i64) -> VarRef {
    let mut result = VarRef::Undefined;
    for access in &stmt.accesses {
        if access.kind.is_write() {
            continue;
        }
        if access.array_id().ok() == Some(var) {
            result = VarRef::Used;
            break;
        }
    }
    for access in &stmt.accesses {
        if !access.kind.is_write() {
            continue;
        }
        if access.array_id().ok() == Some(var) {
            result = if result == VarRef::Used {
                VarRef::DefinedUsed
            } else {
                VarRef::Defined
            };
            break;
        }
    }
    result
}

/// Is the variable a scalar throughout the SCoP? A scalar access has the
/// array identifier as its only output dimension, pinned to a constant.
pub fn var_is_scalar(scop: &Scop, var: i64) -> bool {
    for stmt in &scop.statements {
        for access in &stmt.accesses {
            for part in &access.relation.parts {
                if part.constant_output_value(0) != Some(var) {
                    continue;
                }
                if part.nb_output_dims > 1 {
                    return false;
                }
            }
        }
    }
    true
}

/// All scalar variables referenced in the SCoP.
pub fn extract_scalar_variables(scop: &Scop) -> Vec<i64> {
    let mut scalars = Vec::new();
    let mut checked = Vec::new();
    for stmt in &scop.statements {
        for access in &stmt.accesses {
            let Ok(id) = access.array_id() else { continue };
            if scalars.contains(&id) || checked.contains(&id) {
                continue;
            }
            if var_is_scalar(scop, id) {
                scalars.push(id);
            } else {
                checked.push(id);
            }
        }
    }
    scalars
}

/// Labels of the statements referencing `var`, starting at `dom` (or the
/// first statement), restricted to those sharing `level` loops with it.
pub fn refvar_chain(
    scop: &Scop,
    info: &ScopInfo,
    dom: Option<usize>,
    var: i64,
    level: usize,
) -> Vec<usize> {
    let start = dom.unwrap_or(0);
    if start >= scop.statements.len() {
        return Vec::new();
    }
    let dom_info = info.stmt(start);
    let mut chain = Vec::new();
    for label in start..scop.statements.len() {
        let stmt_info = info.stmt(label);
        if stmt_info.depth < level {
            continue;
        }
        let shared = stmt_info
            .index
            .iter()
            .zip(&dom_info.index)
            .take(level)
            .take_while(|(a, b)| a == b)
            .count();
        if shared < level {
            continue;
        }
        if var_is_ref(&scop.statements[label], var) != VarRef::Undefined {
            chain.push(label);
        }
    }
    chain
}

/// Lexicographic lower bound of variable `col` (1-based) in a polyhedron,
/// when it resolves to a constant.
fn compute_lb(domain: &AffineRelation, col: usize) -> Result<Option<i64>> {
    let opts = PipOptions {
        simplify: true,
        maximize: false,
        integer: true,
        unrestricted_params: true,
        unrestricted_unknowns: true,
    };
    let quast = adapter::solve_relation(domain, None, &opts)?;
    match quast {
        Quast::Solution(exprs) => Ok(exprs.get(col - 1).map(|e| e.constant())),
        _ => Ok(None),
    }
}

/// Do the `level` first iterators of `s1`'s domain cover those of `s2`'s?
pub fn check_domain_is_included(
    scop: &Scop,
    info: &ScopInfo,
    l1: usize,
    l2: usize,
    level: usize,
) -> Result<bool> {
    let s1 = &scop.statements[l1];
    let s2 = &scop.statements[l2];
    let d1 = info.stmt(l1).depth;
    let d2 = info.stmt(l2).depth;
    let max = level.min(d1).min(d2);

    let s1_dom = s1.domain.first();
    let s2_dom = s2.domain.first();

    // Pin the extra dimensions of s2 to their lower bound.
    let mut base = s2_dom.clone();
    for j in 0..d2 - max {
        let lb = compute_lb(s2_dom, j + 1 + max)?.unwrap_or_else(|| {
            log::debug!("no constant lower bound for dimension {}", j + max);
            0
        });
        let mut body = zero_body(&base);
        body[j + max] = -1;
        *body.last_mut().expect("constant column") = lb;
        base.add_equality(&body);
    }

    // One violated constraint of s1 is enough to disprove inclusion.
    for i in 0..s1_dom.nb_rows() {
        let row = s1_dom.row(i);
        if row[1 + max..1 + d1].iter().any(|&c| c != 0) {
            continue;
        }
        let mut probe = base.clone();
        let mut body = zero_body(&probe);
        for (j, v) in row[1..1 + max].iter().enumerate() {
            body[j] = -v;
        }
        // Parameters and constant, shifted into s2's column space.
        let width = body.len();
        let tail = &row[1 + d1..];
        for (j, v) in tail.iter().enumerate() {
            body[width - tail.len() + j] = -v;
        }
        *body.last_mut().expect("constant column") -= 1;
        probe.add_inequality(&body);
        if adapter::has_integer_point(&probe, Some(&scop.context))? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Expand a scalar: every access to it gains one subscript dimension
/// (`x` becomes `x[0]`).
fn expand_scalar(scop: &mut Scop, var: i64) {
    for stmt in &mut scop.statements {
        for access in &mut stmt.accesses {
            for part in &mut access.relation.parts {
                if part.constant_output_value(0) != Some(var) {
                    continue;
                }
                let at = 1 + part.nb_output_dims;
                part.insert_blank_column(at);
                part.nb_output_dims += 1;
                let row = part.nb_rows();
                part.insert_blank_row(row);
                part.set(row, at, -1);
            }
        }
    }
}

/// Is `(var, loop_id)` in the privatizable list, computing it on demand?
pub fn scalar_is_privatizable_at(
    scop: &mut Scop,
    info: &mut ScopInfo,
    options: &AnalysisOptions,
    var: i64,
    loop_id: usize,
) -> Result<bool> {
    if info.scalars_privatizable.is_none() {
        let mut opts = *options;
        opts.scalar_privatization = true;
        opts.scalar_expansion = false;
        analyze_scalars(scop, info, &opts)?;
    }
    let list = info.scalars_privatizable.as_deref().unwrap_or(&[]);
    Ok(list.iter().any(|&(v, l)| v == var && l == loop_id))
}

/// The scalar analysis: for every scalar and every loop level, decide
/// whether the scalar is private to one iteration of that loop, recording
/// the result and optionally expanding the scalar.
pub fn analyze_scalars(
    scop: &mut Scop,
    info: &mut ScopInfo,
    options: &AnalysisOptions,
) -> Result<()> {
    if options.scalar_privatization && info.scalars_privatizable.is_none() {
        info.scalars_privatizable = Some(Vec::new());
    }

    let scalars = extract_scalar_variables(scop);
    for var in scalars {
        let Some(first) = (0..scop.statements.len())
            .find(|&l| var_is_ref(&scop.statements[l], var) != VarRef::Undefined)
        else {
            continue;
        };

        let fullchain = refvar_chain(scop, info, Some(first), var, 0);
        if fullchain.is_empty() {
            continue;
        }
        let max = fullchain.iter().map(|&l| info.stmt(l).depth).max().unwrap_or(0);
        let last = *fullchain.last().expect("chain is non-empty");

        let mut offset = 0usize;
        let mut was_priv = false;

        for j in 1..=max {
            let mut s = fullchain[0];
            if was_priv {
                offset += 1;
                was_priv = false;
            }

            loop {
                let chain = refvar_chain(scop, info, Some(s), var, j);
                if chain.is_empty() {
                    break;
                }

                let mut c = 0usize;
                let mut is_priv = var_is_ref(&scop.statements[chain[0]], var) == VarRef::Defined;

                // The chain must contain a use at all.
                if !chain[1..]
                    .iter()
                    .any(|&l| var_is_ref(&scop.statements[l], var) == VarRef::Used)
                {
                    is_priv = false;
                }

                // Walk the leading definitions: each must cover the rest of
                // the chain.
                while c < chain.len()
                    && var_is_ref(&scop.statements[chain[c]], var) == VarRef::Defined
                {
                    let mut broke = false;
                    for k in c + 1..chain.len() {
                        if !check_domain_is_included(scop, info, chain[c], chain[k], j)? {
                            if c + 1 < chain.len()
                                && var_is_ref(&scop.statements[chain[c + 1]], var)
                                    != VarRef::Defined
                            {
                                is_priv = false;
                            }
                            broke = true;
                            break;
                        }
                    }
                    if !is_priv || !broke {
                        break;
                    }
                    c += 1;
                }

                if is_priv {
                    let loop_id = info.stmt(chain[0]).index[j - 1];
                    if options.verbose {
                        log::info!(
                            "scalar analysis: variable {} can be privatized at loop {}",
                            var,
                            loop_id
                        );
                    }

                    if options.scalar_expansion {
                        if offset == 0 && !was_priv {
                            expand_scalar(scop, var);
                        }
                        for &label in &chain[c..] {
                            let stmt = &mut scop.statements[label];
                            for access in &mut stmt.accesses {
                                for part in &mut access.relation.parts {
                                    if part.constant_output_value(0) != Some(var) {
                                        continue;
                                    }
                                    if let Some(row) = part.row_defining_output(offset + 1) {
                                        let col = part.col_input(j - 1);
                                        part.set(row, col, 1);
                                    }
                                }
                            }
                        }
                        was_priv = true;
                    }

                    if options.scalar_privatization {
                        if let Some(list) = info.scalars_privatizable.as_mut() {
                            list.push((var, loop_id));
                        }
                    }
                }

                let curlast = *chain.last().expect("chain is non-empty");
                if curlast == last {
                    break;
                }
                let pos = fullchain
                    .iter()
                    .position(|&x| x == curlast)
                    .expect("chain element comes from the full chain");
                s = fullchain[pos + 1];
            }
        }
    }
    Ok(())
}

/// Prune loop-carried dependences on scalars privatizable for that loop,
/// reclassifying the survivors.
pub fn prune_with_privatization(
    scop: &mut Scop,
    info: &mut ScopInfo,
    options: &AnalysisOptions,
    deps: &mut Vec<Dependence>,
) -> Result<()> {
    if options.verbose {
        log::info!("scalar analysis: remove loop-carried dependences on privatizable scalars");
    }
    if scop.statements.is_empty() {
        return Ok(());
    }

    let mut i = 0;
    while i < deps.len() {
        let (refs, reft) = {
            let dep = &deps[i];
            let src = scop.statement(dep.source)?;
            let tgt = scop.statement(dep.target)?;
            (
                src.access(dep.source, dep.ref_source)?.array_id()?,
                tgt.access(dep.target, dep.ref_target)?.array_id()?,
            )
        };

        let s_index = info.stmt(deps[i].source).index.clone();
        let t_index = info.stmt(deps[i].target).index.clone();

        let mut found: Option<(usize, usize)> = None;
        for (pos, &loop_id) in s_index.iter().enumerate() {
            if scalar_is_privatizable_at(scop, info, options, refs, loop_id)? {
                found = Some((loop_id, pos));
                break;
            }
        }
        if found.is_none() {
            for (pos, &loop_id) in t_index.iter().enumerate() {
                if scalar_is_privatizable_at(scop, info, options, reft, loop_id)? {
                    found = Some((loop_id, pos));
                    break;
                }
            }
        }

        let Some((loop_id, loop_pos)) = found else {
            i += 1;
            continue;
        };

        if !is_loop_carried(&deps[i], info, loop_id)? {
            i += 1;
            continue;
        }

        // Make the dependence loop-independent at that loop and re-decide.
        let src_block = deps[i].source_block();
        let dep = &mut deps[i];
        let mut body = zero_body(&dep.domain);
        body[loop_pos] = 1;
        body[src_block + loop_pos] = -1;
        dep.domain.add_equality(&body);
        if dep.kind == DependenceKind::Raw {
            dep.kind = DependenceKind::RawScalarPriv;
        }
        if !adapter::has_integer_point(&dep.domain, None)? {
            deps.remove(i);
            continue;
        }
        i += 1;
    }
    Ok(())
}

/// Rename scalars whose DEF-USE webs split into independent partitions.
/// Returns true when a renaming happened; the dependence analysis is then
/// rerun on the rewritten SCoP.
pub fn scalar_renaming(
    scop: &mut Scop,
    info: &mut ScopInfo,
    options: &AnalysisOptions,
    deps: &mut Vec<Dependence>,
) -> Result<bool> {
    if options.verbose {
        log::info!("scalar analysis: perform scalar renaming");
    }

    let nb_statements = scop.statements.len();
    let mut newvar = 0i64;
    for stmt in &scop.statements {
        for access in &stmt.accesses {
            if let Ok(id) = access.array_id() {
                newvar = newvar.max(id + 1);
            }
        }
    }

    let scalars = extract_scalar_variables(scop);
    let mut has_changed = false;

    for var in scalars {
        let chain = refvar_chain(scop, info, None, var, 0);
        if chain.is_empty() || var_is_ref(&scop.statements[chain[0]], var) != VarRef::Defined {
            continue;
        }

        let mut defs = Vec::new();
        let mut uses = Vec::new();
        for &label in &chain {
            match var_is_ref(&scop.statements[label], var) {
                VarRef::Used | VarRef::DefinedUsed => uses.push(label),
                VarRef::Defined => defs.push(label),
                VarRef::Undefined => {}
            }
        }

        // For each statement, the definition it currently sees.
        let mut current: Vec<Option<usize>> = vec![None; nb_statements];
        let mut last_def: Option<usize> = None;
        for &def in &defs {
            match last_def {
                None => last_def = Some(def),
                Some(prev) => {
                    let k = info.common_loops(prev, def);
                    if k > 0 && !check_domain_is_included(scop, info, prev, def, k + 1)? {
                        current[def] = Some(prev);
                        continue;
                    }
                    last_def = Some(def);
                }
            }
            for &use_label in &uses {
                if use_label > def {
                    current[use_label] = Some(def);
                }
            }
        }

        // Partition statements by the definition they see.
        let mut parts: Vec<Option<usize>> = vec![None; nb_statements];
        for (j, &def) in defs.iter().enumerate() {
            for k in 0..nb_statements {
                if current[k] == Some(def) || (k == def && current[def].is_none()) {
                    parts[k] = Some(j);
                }
            }
        }

        // Renaming is pointless when a single partition remains.
        let mut distinct = parts.iter().flatten().collect::<Vec<_>>();
        distinct.sort();
        distinct.dedup();
        if distinct.len() < 2 {
            continue;
        }

        for label in 0..nb_statements {
            let Some(part) = parts[label] else { continue };
            if part == 0 {
                // The first partition keeps the original name.
                continue;
            }
            has_changed = true;
            let renamed = newvar + part as i64;
            if options.verbose {
                log::info!(
                    "scalar analysis: renamed variable {} to {} at statement S{}",
                    var,
                    renamed,
                    label
                );
            }
            let stmt = &mut scop.statements[label];
            for access in &mut stmt.accesses {
                for rel in &mut access.relation.parts {
                    if rel.constant_output_value(0) != Some(var) {
                        continue;
                    }
                    set_array_id(rel, renamed);
                }
            }
        }
        newvar += defs.len() as i64;
    }

    if has_changed {
        let mut opts = *options;
        opts.scalar_renaming = false;
        info.scalars_privatizable = None;
        *deps = dependences_single(scop, &opts)?;
    }
    Ok(has_changed)
}

/// Point the access relation at another array.
fn set_array_id(relation: &mut AffineRelation, id: i64) {
    if let Some(row) = relation.row_defining_output(0) {
        let coeff = relation.get(row, relation.col_output(0));
        let col = relation.col_constant();
        relation.set(row, col, -coeff * id);
    }
}

/******************************************************************************
 *                               Last writer                                  *
 ******************************************************************************/

/// Restrict every non-anti dependence to the instances where the source
/// write is the last one observed by the target.
///
/// The parametric lexicographic maximum of the source block is taken with
/// the target block and the parameters as context; each polyhedron of the
/// converted quast, intersected with the dependence domain, yields one
/// refined dependence.
pub fn compute_last_writer(deps: &mut Vec<Dependence>) -> Result<()> {
    let mut i = 0;
    while i < deps.len() {
        if deps[i].kind == DependenceKind::War {
            i += 1;
            continue;
        }
        match last_writer_domains(&deps[i])? {
            None => i += 1,
            Some(domains) => {
                let template = deps[i].clone();
                let n = domains.len();
                let mut iter = domains.into_iter();
                deps[i].domain = iter.next().expect("at least one refined domain");
                for (off, domain) in iter.enumerate() {
                    let mut extra = template.clone();
                    extra.domain = domain;
                    deps.insert(i + 1 + off, extra);
                }
                i += n;
            }
        }
    }
    Ok(())
}

fn last_writer_domains(dep: &Dependence) -> Result<Option<Vec<AffineRelation>>> {
    let domain = &dep.domain;
    let nvar = dep.source_block();
    let ctx_npar = domain.nb_columns() - 2 - nvar;

    // The context keeps the rows that do not involve the source block,
    // projected onto the remaining columns.
    let mut context = AffineRelation::context(ctx_npar);
    for i in 0..domain.nb_rows() {
        let row = domain.row(i);
        if row[1..1 + nvar].iter().all(|&c| c == 0) {
            context.push(row[0], &row[1 + nvar..]);
        }
    }

    let opts = PipOptions {
        simplify: true,
        maximize: true,
        integer: true,
        unrestricted_params: false,
        unrestricted_unknowns: false,
    };
    let lexmax = adapter::solve_relation(domain, Some(&context), &opts)?;
    if !lexmax.is_feasible() {
        log::warn!("last writer failed on {}: keeping the dependence unrefined", dep);
        return Ok(None);
    }

    let parts = adapter::quast_to_polyhedra(&lexmax, nvar, ctx_npar);
    if parts.is_empty() {
        return Ok(None);
    }

    let mut domains = Vec::with_capacity(parts.len());
    for part in parts {
        let mut refined = domain.clone();
        for i in 0..part.nb_rows() {
            refined.push_row(part.row(i).to_vec());
        }
        domains.push(refined);
    }
    Ok(Some(domains))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::scop::{
        array_access, identity_scattering, parametric_domain, Access, StatementKind,
    };
    use crate::AnalysisOptions;

    /// `for i { S0: A[i] = ...; S1: ... = A[i]; }` under parameter N.
    fn write_then_read_scop() -> Scop {
        let mut scop = Scop::new(AffineRelation::context(1));
        let sub_i = vec![1, 0, 0]; // A[i]
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
    fn test_gcd_rejects_without_solver() {
        // 2x = 3 must die in the screen.
        let mut system = AffineRelation::new(1, 0, 0, 1);
        system.add_equality(&[2, 0, -3]);
        assert!(!gcd_test(&system));

        // 2x = 4 passes the screen.
        let mut system = AffineRelation::new(1, 0, 0, 1);
        system.add_equality(&[2, 0, -4]);
        assert!(gcd_test(&system));

        // 0 = 1 is rejected outright.
        let mut system = AffineRelation::new(1, 0, 0, 0);
        system.add_equality(&[0, 1]);
        assert!(!gcd_test(&system));
    }

    #[test]
    fn test_single_raw_dependence() {
        let mut scop = write_then_read_scop();
        let options = AnalysisOptions::default();
        let deps = dependences(&mut scop, &options).unwrap();

        assert_eq!(deps.len(), 1);
        let dep = &deps[0];
        assert_eq!(dep.kind, DependenceKind::Raw);
        assert_eq!(dep.source, 0);
        assert_eq!(dep.target, 1);
        assert_eq!(dep.depth, 1);

        // Domain is { i = i', 0 <= i < N }: dims are
        // [i, arr, sub, i', arr', sub'], parameter N.
        assert!(dep.domain.contains_point(&[2, 1, 2, 2, 1, 2], &[5]));
        assert!(!dep.domain.contains_point(&[1, 1, 1, 2, 1, 2], &[5]));
        assert!(!dep.domain.contains_point(&[5, 1, 5, 5, 1, 5], &[5]));
    }

    #[test]
    fn test_disabled_kinds_are_skipped() {
        let mut scop = write_then_read_scop();
        let options = AnalysisOptions {
            raw: false,
            ..AnalysisOptions::default()
        };
        let deps = dependences(&mut scop, &options).unwrap();
        assert!(deps.is_empty());
    }

    #[test]
    fn test_war_direction() {
        // S0 reads, S1 writes: the read must stay before the write.
        let mut scop = Scop::new(AffineRelation::context(1));
        let sub_i = vec![1, 0, 0];
        scop.statements.push(Statement::new(
            parametric_domain(1, 0, 1),
            identity_scattering(1, &[0, 0], 1),
            vec![Access::read(array_access(1, 1, &[sub_i.clone()], 1))],
        ));
        scop.statements.push(Statement::new(
            parametric_domain(1, 0, 1),
            identity_scattering(1, &[0, 1], 1),
            vec![Access::write(array_access(1, 1, &[sub_i], 1))],
        ));
        let deps = dependences(&mut scop, &AnalysisOptions::default()).unwrap();
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].kind, DependenceKind::War);
        assert_eq!(deps[0].source, 0);
        assert_eq!(deps[0].target, 1);
    }

    #[test]
    fn test_commute_prunes_reductions() {
        // A self-accumulating statement under the commute option.
        let mut scop = Scop::new(AffineRelation::context(1));
        let sub_zero = vec![0, 0, 0]; // c, expanded as c[0]
        scop.statements.push(
            Statement::new(
                parametric_domain(1, 0, 1),
                identity_scattering(1, &[0, 0], 1),
                vec![
                    Access::write(array_access(3, 1, &[sub_zero.clone()], 1)),
                    Access::read(array_access(3, 1, &[sub_zero], 1)),
                ],
            )
            .with_kind(StatementKind::PlusReduction),
        );
        let mut options = AnalysisOptions::default();
        let deps = dependences(&mut scop, &options).unwrap();
        assert!(!deps.is_empty());

        options.commute = true;
        let deps = dependences(&mut scop, &options).unwrap();
        assert!(deps.is_empty());
    }

    #[test]
    fn test_last_writer_pins_closest_write() {
        // S0 writes A[0] at every i; S1 reads A[0] at every i. The only
        // write observed by iteration i' is the one of i = i'.
        let mut scop = Scop::new(AffineRelation::context(1));
        let sub_zero = vec![0, 0, 0];
        scop.statements.push(Statement::new(
            parametric_domain(1, 0, 1),
            identity_scattering(1, &[0, 0], 1),
            vec![Access::write(array_access(1, 1, &[sub_zero.clone()], 1))],
        ));
        scop.statements.push(Statement::new(
            parametric_domain(1, 0, 1),
            identity_scattering(1, &[0, 1], 1),
            vec![Access::read(array_access(1, 1, &[sub_zero], 1))],
        ));

        let plain = dependences(&mut scop.clone(), &AnalysisOptions::default()).unwrap();
        let raw_plain: Vec<_> =
            plain.iter().filter(|d| d.kind == DependenceKind::Raw).collect();
        assert!(raw_plain
            .iter()
            .any(|d| d.domain.contains_point(&[1, 1, 0, 2, 1, 0], &[5])));

        let options = AnalysisOptions {
            lastwriter: true,
            ..AnalysisOptions::default()
        };
        let refined = dependences(&mut scop, &options).unwrap();
        let raw: Vec<_> = refined.iter().filter(|d| d.kind == DependenceKind::Raw).collect();
        assert!(!raw.is_empty());
        // (i, i') = (2, 2) survives, (1, 2) does not.
        assert!(raw
            .iter()
            .any(|d| d.domain.contains_point(&[2, 1, 0, 2, 1, 0], &[5])));
        assert!(!raw
            .iter()
            .any(|d| d.domain.contains_point(&[1, 1, 0, 2, 1, 0], &[5])));
    }

    #[test]
    fn test_prune_duplicates() {
        let mut scop = write_then_read_scop();
        let deps = dependences(&mut scop, &AnalysisOptions::default()).unwrap();
        let mut doubled = deps.clone();
        doubled.extend(deps.iter().cloned());
        prune_duplicates(&mut doubled);
        assert_eq!(doubled.len(), deps.len());
    }

    #[test]
    fn test_loop_independent_and_carried() {
        let mut scop = write_then_read_scop();
        let info = ScopInfo::compute(&scop).unwrap();
        let deps = dependences(&mut scop, &AnalysisOptions::default()).unwrap();
        let dep = &deps[0];
        // i = i': independent of the loop, not carried by it.
        assert!(is_loop_independent(dep).unwrap());
        let loop_id = info.stmt(0).index[0];
        assert!(!is_loop_carried(dep, &info, loop_id).unwrap());
    }

    #[test]
    fn test_scalar_detection() {
        let mut scop = Scop::new(AffineRelation::context(1));
        let sub_i: Vec<i64> = vec![1, 0, 0];
        // S0 writes scalar 2 and array 1.
        scop.statements.push(Statement::new(
            parametric_domain(1, 0, 1),
            identity_scattering(1, &[0, 0], 1),
            vec![
                Access::write(array_access(2, 1, &[], 1)),
                Access::read(array_access(1, 1, &[sub_i], 1)),
            ],
        ));
        assert!(var_is_scalar(&scop, 2));
        assert!(!var_is_scalar(&scop, 1));
        assert_eq!(extract_scalar_variables(&scop), vec![2]);
        assert_eq!(var_is_ref(&scop.statements[0], 2), VarRef::Defined);
        assert_eq!(var_is_ref(&scop.statements[0], 1), VarRef::Used);
        assert_eq!(var_is_ref(&scop.statements[0], 9), VarRef::Undefined);

        // The privatization list is computed on demand.
        let mut info = ScopInfo::compute(&scop).unwrap();
        let options = AnalysisOptions { scalar_privatization: true, ..AnalysisOptions::default() };
        analyze_scalars(&mut scop, &mut info, &options).unwrap();
        assert!(info.scalars_privatizable.is_some());
    }

    #[test]
    fn test_scalar_expansion_adds_subscript() {
        // for i { S0: t = A[i]; S1: B[i] = t; }  t becomes t[i].
        let mut scop = Scop::new(AffineRelation::context(1));
        let sub_i: Vec<i64> = vec![1, 0, 0];
        scop.statements.push(Statement::new(
            parametric_domain(1, 0, 1),
            identity_scattering(1, &[0, 0], 1),
            vec![
                Access::write(array_access(3, 1, &[], 1)),
                Access::read(array_access(1, 1, &[sub_i.clone()], 1)),
            ],
        ));
        scop.statements.push(Statement::new(
            parametric_domain(1, 0, 1),
            identity_scattering(1, &[0, 1], 1),
            vec![
                Access::read(array_access(3, 1, &[], 1)),
                Access::write(array_access(2, 1, &[sub_i], 1)),
            ],
        ));

        let mut info = ScopInfo::compute(&scop).unwrap();
        let options = AnalysisOptions { scalar_expansion: true, ..AnalysisOptions::default() };
        analyze_scalars(&mut scop, &mut info, &options).unwrap();

        let expanded = scop.statements[0].accesses[0].relation.first();
        assert_eq!(expanded.nb_output_dims, 2);
        // The new subscript row carries the loop iterator.
        let row = expanded.row_defining_output(1).unwrap();
        assert_eq!(expanded.get(row, expanded.col_input(0)), 1);
    }
}
