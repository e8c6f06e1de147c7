//! Parametric lexicographic optimization over integer polyhedra.
//!
//! The solver answers two kinds of requests. Feasibility ("is there an
//! integer/rational point") is decided exactly: equalities are eliminated
//! through the integer lattice (gcd reduction and symmetric-residue
//! substitution), inequalities by shadow elimination with splinter recursion
//! for the inexact cases. Lexicographic optimization returns a [`Quast`]:
//! the search projects the remaining unknowns away, resolves the sign of
//! every parameter-only consequence against the context (emitting a
//! condition node whenever the context does not decide it) and pins each
//! unknown in turn to its dominating bound.
//!
//! Requests arrive as [`PipMatrix`] values; rows tagged -1 are unused slots
//! and are skipped. The number of parameters is the width of the context
//! matrix minus two; the remaining system columns are the unknowns.

use crate::pip::matrix::{PipMatrix, PipOptions};
use crate::pip::quast::{Quast, QuastExpr};
use crate::utils::math::{ceil_div, floor_div, vector_gcd};

/// Row tag marking an unused slot in a request matrix.
const TAG_UNUSED: i64 = -1;
/// Row tag marking an equality.
const TAG_EQUALITY: i64 = 0;

/// One constraint over `[dims... , constant]`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Row {
    eq: bool,
    c: Vec<i64>,
}

impl Row {
    fn ineq(c: Vec<i64>) -> Self {
        Row { eq: false, c }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sign {
    NonNegative,
    Negative,
    Unknown,
}

/// Outcome of normalizing a single row.
enum RowState {
    Keep,
    Trivial,
    Infeasible,
}

/// Solve a parametric lexicographic optimization request.
///
/// `system` constrains unknowns and parameters; `context` constrains the
/// parameters alone and its width fixes how many trailing system columns are
/// parameters.
pub fn solve(system: &PipMatrix, context: Option<&PipMatrix>, options: &PipOptions) -> Quast {
    let npar = context.map(|c| c.nb_columns().saturating_sub(2)).unwrap_or(0);
    let total = system.nb_columns().saturating_sub(2);
    debug_assert!(total >= npar, "system narrower than its context");
    let nvar = total - npar;

    let mut rows = ingest(system);
    let mut ctx = context.map(ingest).unwrap_or_default();

    if !options.unrestricted_unknowns {
        for v in 0..nvar {
            let mut c = vec![0; total + 1];
            c[v] = 1;
            rows.push(Row::ineq(c));
        }
    }
    if !options.unrestricted_params {
        for p in 0..npar {
            let mut c = vec![0; npar + 1];
            c[p] = 1;
            ctx.push(Row::ineq(c));
        }
    }

    if options.simplify {
        dedup_rows(&mut rows);
        dedup_rows(&mut ctx);
    }

    // Exact feasibility gate over all dimensions at once; the tree below
    // never weakens this verdict.
    let mut combined = rows.clone();
    combined.extend(ctx.iter().map(|r| widen(r, nvar)));
    let feasible = if options.integer {
        integer_feasible(combined, total)
    } else {
        rational_feasible(combined, total)
    };
    if !feasible {
        return Quast::Empty;
    }

    search(rows, ctx, 0, Vec::new(), nvar, npar, options)
}

/// Decide whether a system over `ndim` existential integer dimensions has an
/// integer point.
pub(crate) fn integer_feasible(mut rows: Vec<Row>, mut ndim: usize) -> bool {
    loop {
        if !normalize_sweep(&mut rows, true) {
            return false;
        }
        let Some(ri) = find_equality_with_dim(&rows, ndim) else {
            break;
        };
        let eqrow = rows[ri].clone();
        if let Some(v) = (0..ndim).find(|&v| eqrow.c[v].abs() == 1) {
            rows.remove(ri);
            substitute_unit_eq(&mut rows, &eqrow, v);
        } else {
            // Symmetric-residue reduction: introduce a fresh dimension whose
            // defining equality has a unit coefficient on the chosen one.
            let k = (0..ndim)
                .filter(|&v| eqrow.c[v] != 0)
                .min_by_key(|&v| eqrow.c[v].abs())
                .expect("equality with a dimension coefficient");
            let m = eqrow.c[k].abs() + 1;
            for r in rows.iter_mut() {
                r.c.insert(ndim, 0);
            }
            let mut c = vec![0; ndim + 2];
            for (v, coeff) in c.iter_mut().enumerate().take(ndim) {
                *coeff = mod_hat(eqrow.c[v], m);
            }
            c[ndim] = -m;
            c[ndim + 1] = mod_hat(eqrow.c[ndim], m);
            let reduction = Row { eq: true, c };
            debug_assert_eq!(reduction.c[k].abs(), 1);
            ndim += 1;
            substitute_unit_eq(&mut rows, &reduction, k);
        }
    }
    ineq_integer_feasible(rows, ndim)
}

/// Decide whether a system over `ndim` existential rational dimensions has a
/// rational point.
pub(crate) fn rational_feasible(mut rows: Vec<Row>, ndim: usize) -> bool {
    loop {
        if !normalize_sweep(&mut rows, false) {
            return false;
        }
        let Some(ri) = find_equality_with_dim(&rows, ndim) else {
            break;
        };
        let eqrow = rows.remove(ri);
        let v = (0..ndim)
            .find(|&v| eqrow.c[v] != 0)
            .expect("equality with a dimension coefficient");
        substitute_eq(&mut rows, &eqrow, v);
    }
    for v in 0..ndim {
        if !normalize_sweep(&mut rows, false) {
            return false;
        }
        rows = fourier_motzkin(rows, v, false);
    }
    normalize_sweep(&mut rows, false)
}

fn ineq_integer_feasible(mut rows: Vec<Row>, ndim: usize) -> bool {
    if !normalize_sweep(&mut rows, true) {
        return false;
    }
    let Some(v) = choose_dim(&rows, ndim) else {
        return true;
    };

    let mut lows = Vec::new();
    let mut ups = Vec::new();
    let mut rest = Vec::new();
    for r in &rows {
        if r.c[v] > 0 {
            lows.push(r.clone());
        } else if r.c[v] < 0 {
            ups.push(r.clone());
        } else {
            rest.push(r.clone());
        }
    }
    if lows.is_empty() || ups.is_empty() {
        return ineq_integer_feasible(rest, ndim);
    }

    let exact =
        lows.iter().all(|r| r.c[v] == 1) || ups.iter().all(|r| r.c[v] == -1);
    if exact {
        let mut next = rest;
        for l in &lows {
            for u in &ups {
                next.push(shadow_row(l, u, v, 0));
            }
        }
        return ineq_integer_feasible(next, ndim);
    }

    // Dark shadow first; splinters complete the decision when it fails.
    let mut dark = rest;
    for l in &lows {
        for u in &ups {
            let slack = (l.c[v] - 1) * (-u.c[v] - 1);
            dark.push(shadow_row(l, u, v, slack));
        }
    }
    if ineq_integer_feasible(dark, ndim) {
        return true;
    }

    let bmax = ups.iter().map(|r| -r.c[v]).max().expect("upper bounds exist");
    for l in &lows {
        let a = l.c[v];
        let kmax = floor_div(a * bmax - a - bmax, bmax);
        for k in 0..=kmax {
            let mut eq = l.clone();
            eq.eq = true;
            let last = eq.c.len() - 1;
            eq.c[last] -= k;
            let mut sys = rows.clone();
            sys.push(eq);
            if integer_feasible(sys, ndim) {
                return true;
            }
        }
    }
    false
}

/// Combine a lower and an upper bound row on dimension `v`, subtracting
/// `slack` from the constant.
fn shadow_row(low: &Row, up: &Row, v: usize, slack: i64) -> Row {
    let a = low.c[v];
    let b = -up.c[v];
    debug_assert!(a > 0 && b > 0);
    let mut c: Vec<i64> = low
        .c
        .iter()
        .zip(&up.c)
        .map(|(&l, &u)| b * l + a * u)
        .collect();
    debug_assert_eq!(c[v], 0);
    let last = c.len() - 1;
    c[last] -= slack;
    Row::ineq(c)
}

/// Rational Fourier-Motzkin elimination of dimension `v`. Equalities must not
/// involve `v` anymore. With `tighten`, constants of combined rows are
/// floor-reduced by the row gcd afterwards (sound for integer systems).
fn fourier_motzkin(rows: Vec<Row>, v: usize, tighten: bool) -> Vec<Row> {
    let mut lows = Vec::new();
    let mut ups = Vec::new();
    let mut rest = Vec::new();
    for r in rows {
        debug_assert!(!(r.eq && r.c[v] != 0), "equality row left on eliminated dim");
        if r.c[v] > 0 {
            lows.push(r);
        } else if r.c[v] < 0 {
            ups.push(r);
        } else {
            rest.push(r);
        }
    }
    if lows.is_empty() || ups.is_empty() {
        return rest;
    }
    for l in &lows {
        for u in &ups {
            let mut row = shadow_row(l, u, v, 0);
            match normalize_row(&mut row, tighten) {
                RowState::Trivial => {}
                // Infeasible rows stay in place for the caller's sweep.
                RowState::Keep | RowState::Infeasible => rest.push(row),
            }
        }
    }
    rest
}

/// Replace dimension `v` using a unit-coefficient equality, exactly.
fn substitute_unit_eq(rows: &mut [Row], eqrow: &Row, v: usize) {
    let a = eqrow.c[v];
    debug_assert_eq!(a.abs(), 1);
    for r in rows.iter_mut() {
        let c = r.c[v];
        if c != 0 {
            for (x, &e) in r.c.iter_mut().zip(&eqrow.c) {
                *x -= c * a * e;
            }
            debug_assert_eq!(r.c[v], 0);
        }
    }
}

/// Replace dimension `v` using an arbitrary equality; inequality rows are
/// scaled by the positive pivot.
fn substitute_eq(rows: &mut [Row], eqrow: &Row, v: usize) {
    let a = eqrow.c[v];
    debug_assert!(a != 0);
    let a_abs = a.abs();
    let s = a.signum();
    for r in rows.iter_mut() {
        let c = r.c[v];
        if c != 0 {
            for (x, &e) in r.c.iter_mut().zip(&eqrow.c) {
                *x = a_abs * *x - c * s * e;
            }
            debug_assert_eq!(r.c[v], 0);
        }
    }
}

fn find_equality_with_dim(rows: &[Row], ndim: usize) -> Option<usize> {
    rows.iter()
        .position(|r| r.eq && r.c[..ndim].iter().any(|&c| c != 0))
}

fn choose_dim(rows: &[Row], ndim: usize) -> Option<usize> {
    let mut best: Option<(usize, usize)> = None;
    for v in 0..ndim {
        let lows = rows.iter().filter(|r| r.c[v] > 0).count();
        let ups = rows.iter().filter(|r| r.c[v] < 0).count();
        if lows + ups == 0 {
            continue;
        }
        let cost = lows * ups;
        if best.map_or(true, |(_, c)| cost < c) {
            best = Some((v, cost));
        }
    }
    best.map(|(v, _)| v)
}

/// Symmetric residue of `a` modulo `m`, in `(-m/2, m/2]`.
fn mod_hat(a: i64, m: i64) -> i64 {
    let r = a.rem_euclid(m);
    if 2 * r > m {
        r - m
    } else {
        r
    }
}

fn normalize_row(row: &mut Row, integer: bool) -> RowState {
    let n = row.c.len() - 1;
    let g = vector_gcd(&row.c[..n]);
    if g == 0 {
        let cst = row.c[n];
        if row.eq {
            return if cst == 0 { RowState::Trivial } else { RowState::Infeasible };
        }
        return if cst >= 0 { RowState::Trivial } else { RowState::Infeasible };
    }
    if g > 1 {
        if row.eq {
            if row.c[n] % g == 0 {
                for x in row.c.iter_mut() {
                    *x /= g;
                }
            } else if integer {
                // The lattice misses the hyperplane.
                return RowState::Infeasible;
            }
        } else if integer {
            for x in row.c[..n].iter_mut() {
                *x /= g;
            }
            row.c[n] = floor_div(row.c[n], g);
        } else {
            let g2 = num_integer::gcd(g, row.c[n].abs());
            if g2 > 1 {
                for x in row.c.iter_mut() {
                    *x /= g2;
                }
            }
        }
    }
    RowState::Keep
}

/// Normalize every row, dropping trivial ones. Returns false when a row is
/// infeasible on its own.
fn normalize_sweep(rows: &mut Vec<Row>, integer: bool) -> bool {
    let mut i = 0;
    while i < rows.len() {
        match normalize_row(&mut rows[i], integer) {
            RowState::Infeasible => return false,
            RowState::Trivial => {
                rows.swap_remove(i);
            }
            RowState::Keep => i += 1,
        }
    }
    true
}

fn dedup_rows(rows: &mut Vec<Row>) {
    let mut seen: Vec<Row> = Vec::with_capacity(rows.len());
    for r in rows.drain(..) {
        if !seen.contains(&r) {
            seen.push(r);
        }
    }
    *rows = seen;
}

fn ingest(matrix: &PipMatrix) -> Vec<Row> {
    let mut rows = Vec::with_capacity(matrix.nb_rows());
    for raw in matrix.rows() {
        let tag = raw[0];
        if tag == TAG_UNUSED {
            continue;
        }
        rows.push(Row { eq: tag == TAG_EQUALITY, c: raw[1..].to_vec() });
    }
    rows
}

/// Prefix a parameter-space row with `nvar` zero columns.
fn widen(row: &Row, nvar: usize) -> Row {
    let mut c = vec![0; nvar];
    c.extend_from_slice(&row.c);
    Row { eq: row.eq, c }
}

/// The parameter part `[params..., constant]` of a full-width row.
fn param_part(row: &Row, nvar: usize) -> Vec<i64> {
    row.c[nvar..].to_vec()
}

/// Negation of `expr >= 0` over integers: `-expr - 1 >= 0`.
fn negate_strict(prow: &[i64]) -> Vec<i64> {
    let mut c: Vec<i64> = prow.iter().map(|&x| -x).collect();
    let last = c.len() - 1;
    c[last] -= 1;
    c
}

fn ctx_feasible(ctx: &[Row], extra: Option<Vec<i64>>, npar: usize, integer: bool) -> bool {
    let mut rows: Vec<Row> = ctx.to_vec();
    if let Some(c) = extra {
        rows.push(Row::ineq(c));
    }
    if integer {
        integer_feasible(rows, npar)
    } else {
        rational_feasible(rows, npar)
    }
}

/// Sign of `prow` over the context region.
fn ctx_sign(ctx: &[Row], prow: &[i64], npar: usize, integer: bool) -> Sign {
    if !ctx_feasible(ctx, Some(negate_strict(prow)), npar, integer) {
        return Sign::NonNegative;
    }
    if !ctx_feasible(ctx, Some(prow.to_vec()), npar, integer) {
        return Sign::Negative;
    }
    Sign::Unknown
}

/// A parametric bound `num / den` on the unknown under optimization.
#[derive(Debug, Clone)]
struct Bound {
    den: i64,
    num: Vec<i64>,
}

#[allow(clippy::too_many_arguments)]
fn branch_on(
    prow: Vec<i64>,
    rows: Vec<Row>,
    ctx: &[Row],
    k: usize,
    solved: Vec<QuastExpr>,
    nvar: usize,
    npar: usize,
    options: &PipOptions,
) -> Quast {
    let mut then_ctx = ctx.to_vec();
    then_ctx.push(Row::ineq(prow.clone()));
    let mut else_ctx = ctx.to_vec();
    else_ctx.push(Row::ineq(negate_strict(&prow)));
    Quast::Branch {
        condition: QuastExpr::integral(prow),
        then_branch: Box::new(search(
            rows.clone(),
            then_ctx,
            k,
            solved.clone(),
            nvar,
            npar,
            options,
        )),
        else_branch: Box::new(search(rows, else_ctx, k, solved, nvar, npar, options)),
    }
}

/// The recursive lexicographic search. `rows` is the system with unknowns
/// `0..k` already substituted away; `solved` holds their expressions.
fn search(
    mut rows: Vec<Row>,
    ctx: Vec<Row>,
    k: usize,
    solved: Vec<QuastExpr>,
    nvar: usize,
    npar: usize,
    options: &PipOptions,
) -> Quast {
    if !normalize_sweep(&mut rows, options.integer) {
        return Quast::Empty;
    }

    // Resolve rows that only constrain the parameters.
    let mut i = 0;
    while i < rows.len() {
        let var_free = rows[i].c[..nvar].iter().all(|&c| c == 0);
        if !var_free {
            i += 1;
            continue;
        }
        let prow = param_part(&rows[i], nvar);
        let eq = rows[i].eq;
        match ctx_sign(&ctx, &prow, npar, options.integer) {
            Sign::Negative => return Quast::Empty,
            Sign::Unknown => return branch_on(prow, rows, &ctx, k, solved, nvar, npar, options),
            Sign::NonNegative => {
                if eq {
                    let neg: Vec<i64> = prow.iter().map(|&x| -x).collect();
                    match ctx_sign(&ctx, &neg, npar, options.integer) {
                        Sign::Negative => return Quast::Empty,
                        Sign::Unknown => {
                            return branch_on(neg, rows, &ctx, k, solved, nvar, npar, options)
                        }
                        Sign::NonNegative => {}
                    }
                }
                rows.remove(i);
            }
        }
    }

    if k == nvar {
        return Quast::Solution(solved);
    }

    // Project the deeper unknowns away to get bounds on unknown k alone.
    let mut projected: Vec<Row> = Vec::with_capacity(rows.len() * 2);
    for r in &rows {
        if r.eq {
            let neg: Vec<i64> = r.c.iter().map(|&x| -x).collect();
            projected.push(Row::ineq(r.c.clone()));
            projected.push(Row::ineq(neg));
        } else {
            projected.push(r.clone());
        }
    }
    for v in (k + 1)..nvar {
        projected = fourier_motzkin(projected, v, options.integer);
        if !normalize_sweep(&mut projected, options.integer) {
            return Quast::Empty;
        }
    }

    // Parameter-only consequences of the projection gate this region.
    for p in &projected {
        if p.c[..nvar].iter().any(|&c| c != 0) {
            continue;
        }
        let prow = param_part(p, nvar);
        match ctx_sign(&ctx, &prow, npar, options.integer) {
            Sign::NonNegative => {}
            Sign::Negative => return Quast::Empty,
            Sign::Unknown => return branch_on(prow, rows, &ctx, k, solved, nvar, npar, options),
        }
    }

    // Collect the bounds that constrain unknown k in the optimized direction.
    let mut bounds: Vec<Bound> = Vec::new();
    for p in &projected {
        let a = p.c[k];
        if options.maximize {
            if a < 0 {
                // -b x + g >= 0  =>  x <= g / b
                bounds.push(Bound { den: -a, num: param_part(p, nvar) });
            }
        } else if a > 0 {
            // a x + f >= 0  =>  x >= -f / a
            let num: Vec<i64> = param_part(p, nvar).iter().map(|&x| -x).collect();
            bounds.push(Bound { den: a, num });
        }
    }
    if bounds.is_empty() {
        return Quast::Unbounded;
    }

    // Keep the dominating bound, splitting on comparisons the context does
    // not decide.
    while bounds.len() > 1 {
        let b0 = &bounds[0];
        let b1 = &bounds[1];
        // minimize: keep the larger lower bound; maximize: the smaller upper.
        let cmp: Vec<i64> = if options.maximize {
            b0.num
                .iter()
                .zip(&b1.num)
                .map(|(&n0, &n1)| b0.den * n1 - b1.den * n0)
                .collect()
        } else {
            b0.num
                .iter()
                .zip(&b1.num)
                .map(|(&n0, &n1)| b1.den * n0 - b0.den * n1)
                .collect()
        };
        let mut cmp_row = Row::ineq(cmp);
        if let RowState::Infeasible = normalize_row(&mut cmp_row, false) {
            bounds.swap_remove(0);
            continue;
        }
        match ctx_sign(&ctx, &cmp_row.c, npar, options.integer) {
            Sign::NonNegative => {
                bounds.swap_remove(1);
            }
            Sign::Negative => {
                bounds.swap_remove(0);
            }
            Sign::Unknown => {
                return branch_on(cmp_row.c, rows, &ctx, k, solved, nvar, npar, options)
            }
        }
    }
    let bound = bounds.pop().expect("a dominating bound remains");

    let expr = integerize(bound, options);

    // Pin unknown k and continue with the next one.
    let mut next_rows = rows;
    for r in next_rows.iter_mut() {
        let c = r.c[k];
        if c == 0 {
            continue;
        }
        if expr.denominator > 1 {
            for x in r.c.iter_mut() {
                *x *= expr.denominator;
            }
        }
        let scaled = r.c[k];
        debug_assert_eq!(scaled, c * expr.denominator);
        for (j, &e) in expr.coeffs.iter().enumerate() {
            r.c[nvar + j] += c * e;
        }
        r.c[k] = 0;
    }
    let mut next_solved = solved;
    next_solved.push(expr);
    search(next_rows, ctx, k + 1, next_solved, nvar, npar, options)
}

/// Turn a dominating bound into the solution expression for one unknown.
fn integerize(bound: Bound, options: &PipOptions) -> QuastExpr {
    let Bound { den, num } = bound;
    if den == 1 {
        return QuastExpr::integral(num);
    }
    if num.iter().all(|&n| n % den == 0) {
        return QuastExpr::integral(num.iter().map(|&n| n / den).collect());
    }
    if !options.integer {
        // Rational mode keeps the exact value through the denominator.
        return QuastExpr { coeffs: num, denominator: den };
    }
    // Non-unit denominators would need a quotient parameter to stay exact;
    // the systems built by this crate always divide. Round the affine part.
    log::debug!("rounding a non-divisible bound with denominator {}", den);
    let last = num.len() - 1;
    let mut coeffs: Vec<i64> = num[..last].iter().map(|&n| floor_div(n, den)).collect();
    coeffs.push(if options.maximize {
        floor_div(num[last], den)
    } else {
        ceil_div(num[last], den)
    });
    QuastExpr::integral(coeffs)
}
