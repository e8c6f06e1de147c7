//! End-to-end tests of the analysis pipeline.

use polydep::analysis::ddv::loops_are_permutable;
use polydep::analysis::dependence::gcd_test;
use polydep::pip::{adapter, PipOptions};
use polydep::polyhedral::relation::RelationUnion;
use polydep::prelude::*;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// `for i = 0 .. N-1 { S0: A[i] = ...; S1: ... = A[i]; }`
fn write_then_read_scop() -> Scop {
    let mut scop = Scop::new(AffineRelation::context(1));
    scop.parameters.push("N".to_string());
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
fn single_raw_dependence_end_to_end() {
    init_logging();
    let mut scop = write_then_read_scop();
    let deps = polydep::dependences(&mut scop, &AnalysisOptions::default()).unwrap();

    assert_eq!(deps.len(), 1);
    let dep = &deps[0];
    assert_eq!(dep.kind, DependenceKind::Raw);
    assert_eq!(dep.source, 0);
    assert_eq!(dep.target, 1);
    assert_eq!(dep.depth, 1);
    assert_eq!(dep.ref_source, 0);
    assert_eq!(dep.ref_target, 0);
    assert_eq!(dep.source_nb_output_dims_domain, 1);
    assert_eq!(dep.source_nb_output_dims_access, 2);

    // The domain is { i = i', 0 <= i < N }; dimension order is
    // [i, arr, sub, i', arr', sub'] with parameter N.
    for i in 0..5 {
        assert!(dep.domain.contains_point(&[i, 1, i, i, 1, i], &[5]));
    }
    assert!(!dep.domain.contains_point(&[1, 1, 1, 3, 1, 3], &[5]));
    assert!(!dep.domain.contains_point(&[5, 1, 5, 5, 1, 5], &[5]));
}

#[test]
fn unchanged_schedule_has_no_violation() {
    init_logging();
    let mut orig = write_then_read_scop();
    let candidate = orig.clone();
    let options = AnalysisOptions { fullcheck: true, ..AnalysisOptions::default() };
    let (deps, violations) = polydep::violations(&mut orig, &candidate, &options).unwrap();
    assert_eq!(deps.len(), 1);
    assert!(violations.is_empty());
}

#[test]
fn reordering_dependent_statements_is_caught() {
    let mut orig = write_then_read_scop();
    let mut candidate = orig.clone();
    candidate.statements[0].scattering = identity_scattering(1, &[0, 1], 1);
    candidate.statements[1].scattering = identity_scattering(1, &[0, 0], 1);
    let (_, violations) =
        polydep::violations(&mut orig, &candidate, &AnalysisOptions::default()).unwrap();
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].dependence, 0);
    assert_eq!(violations[0].dimension, 3);
}

#[test]
fn reordering_independent_statements_is_legal() {
    // S0 and S1 touch different arrays; swapping them is fine.
    let mut orig = Scop::new(AffineRelation::context(1));
    let sub_i = vec![1, 0, 0];
    orig.statements.push(Statement::new(
        parametric_domain(1, 0, 1),
        identity_scattering(1, &[0, 0], 1),
        vec![Access::write(array_access(1, 1, &[sub_i.clone()], 1))],
    ));
    orig.statements.push(Statement::new(
        parametric_domain(1, 0, 1),
        identity_scattering(1, &[0, 1], 1),
        vec![Access::write(array_access(2, 1, &[sub_i], 1))],
    ));
    let mut candidate = orig.clone();
    candidate.statements[0].scattering = identity_scattering(1, &[0, 1], 1);
    candidate.statements[1].scattering = identity_scattering(1, &[0, 0], 1);
    let options = AnalysisOptions { fullcheck: true, ..AnalysisOptions::default() };
    let (deps, violations) = polydep::violations(&mut orig, &candidate, &options).unwrap();
    assert!(deps.is_empty());
    assert!(violations.is_empty());
}

#[test]
fn reversed_reader_loop_is_caught() {
    let mut orig = write_then_read_scop();
    let mut candidate = orig.clone();
    // The reader's iterator dimension becomes N - 1 - i.
    let scat = &mut candidate.statements[1].scattering;
    let row = scat.row_defining_output(1).unwrap();
    let col_in = scat.col_input(0);
    let col_n = scat.col_param(0);
    let col_c = scat.col_constant();
    scat.set(row, col_in, -1);
    scat.set(row, col_n, 1);
    scat.set(row, col_c, -1);
    let options = AnalysisOptions { fullcheck: true, ..AnalysisOptions::default() };
    let (_, violations) = polydep::violations(&mut orig, &candidate, &options).unwrap();
    assert!(violations.iter().any(|v| v.dimension == 2));
}

#[test]
fn gcd_screen_rejects_lattice_empty_rows() {
    // 2x = 3 dies in the screen, no solver involved.
    let mut system = AffineRelation::new(1, 0, 0, 0);
    system.add_equality(&[2, -3]);
    assert!(!gcd_test(&system));
}

#[test]
fn quast_round_trip_pins_the_single_point() {
    // x = 3 and x <= y <= 3: the single point is (3, 3).
    let mut system = AffineRelation::new(2, 0, 0, 0);
    system.add_equality(&[1, 0, -3]);
    system.add_inequality(&[-1, 1, 0]);
    system.add_inequality(&[0, -1, 3]);
    let quast = adapter::solve_relation(&system, None, &PipOptions::default()).unwrap();
    let union = adapter::quast_to_polyhedra(&quast, 2, 0);
    for x in -2..8 {
        for y in -2..8 {
            let inside = union.iter().any(|p| p.contains_point(&[x, y], &[]))
                && system.contains_point(&[x, y], &[]);
            assert_eq!(inside, x == 3 && y == 3);
        }
    }
}

#[test]
fn commutative_reduction_nest_is_permutable() {
    // for i for j { c += a[i][j] * b[j][i]; }
    let sub_zero = vec![0, 0, 0, 0];
    let sub_ij = vec![vec![1, 0, 0, 0], vec![0, 1, 0, 0]];
    let sub_ji = vec![vec![0, 1, 0, 0], vec![1, 0, 0, 0]];
    let make = |kind: StatementKind| {
        let mut scop = Scop::new(AffineRelation::context(1));
        scop.statements.push(
            Statement::new(
                parametric_domain(2, 0, 1),
                identity_scattering(2, &[0, 0, 0], 1),
                vec![
                    Access::write(array_access(3, 2, &[sub_zero.clone()], 1)),
                    Access::read(array_access(3, 2, &[sub_zero.clone()], 1)),
                    Access::read(array_access(1, 2, &sub_ij, 1)),
                    Access::read(array_access(2, 2, &sub_ji, 1)),
                ],
            )
            .with_kind(kind),
        );
        scop
    };
    let options = AnalysisOptions { commute: true, ..AnalysisOptions::default() };

    let mut commutative = make(StatementKind::PlusReduction);
    let info = ScopInfo::compute(&commutative).unwrap();
    let loops = info.stmt(0).index.clone();
    let deps = polydep::dependences(&mut commutative, &options).unwrap();
    assert!(loops_are_permutable(&info, &deps, loops[0], loops[1]).unwrap());

    let mut plain = make(StatementKind::Assignment);
    let deps = polydep::dependences(&mut plain, &options).unwrap();
    assert!(!loops_are_permutable(&info, &deps, loops[0], loops[1]).unwrap());
}

#[test]
fn rar_dependences_are_opt_in() {
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
        vec![Access::read(array_access(1, 1, &[sub_i], 1))],
    ));

    let deps = polydep::dependences(&mut scop, &AnalysisOptions::default()).unwrap();
    assert!(deps.is_empty());

    let options = AnalysisOptions { rar: true, ..AnalysisOptions::default() };
    let deps = polydep::dependences(&mut scop, &options).unwrap();
    assert_eq!(deps.len(), 1);
    assert_eq!(deps[0].kind, DependenceKind::Rar);
}

#[test]
fn last_writer_keeps_only_the_closest_write() {
    // S0 writes A[0] every iteration, S1 reads it right after: only the
    // same-iteration write is observed.
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

    let options = AnalysisOptions { lastwriter: true, ..AnalysisOptions::default() };
    let deps = polydep::dependences(&mut scop, &options).unwrap();
    let raw: Vec<_> = deps.iter().filter(|d| d.kind == DependenceKind::Raw).collect();
    assert!(!raw.is_empty());
    assert!(raw.iter().any(|d| d.domain.contains_point(&[3, 1, 0, 3, 1, 0], &[6])));
    assert!(!raw.iter().any(|d| d.domain.contains_point(&[1, 1, 0, 3, 1, 0], &[6])));
}

#[test]
fn union_domains_are_expanded_and_remapped() {
    let mut scop = Scop::new(AffineRelation::context(1));
    let sub_i = vec![1, 0, 0];

    // S0 writes A[i] over a domain split into i <= 4 and i >= 5.
    let mut low = AffineRelation::new(1, 0, 0, 1);
    low.add_inequality(&[1, 0, 0]);
    low.add_inequality(&[-1, 0, 4]);
    low.add_inequality(&[-1, 1, -1]);
    let mut high = AffineRelation::new(1, 0, 0, 1);
    high.add_inequality(&[1, 0, -5]);
    high.add_inequality(&[-1, 1, -1]);

    let mut writer = Statement::new(
        parametric_domain(1, 0, 1),
        identity_scattering(1, &[0, 0], 1),
        vec![Access::write(array_access(1, 1, &[sub_i.clone()], 1))],
    );
    writer.domain = RelationUnion::from_parts(vec![low, high]);
    scop.statements.push(writer);
    scop.statements.push(Statement::new(
        parametric_domain(1, 0, 1),
        identity_scattering(1, &[0, 1], 1),
        vec![Access::read(array_access(1, 1, &[sub_i], 1))],
    ));

    let options = AnalysisOptions { unions: true, ..AnalysisOptions::default() };
    let deps = polydep::dependences(&mut scop, &options).unwrap();
    assert!(deps.len() >= 2);
    assert!(deps.iter().all(|d| d.kind == DependenceKind::Raw));
    assert!(deps.iter().all(|d| d.source == 0 && d.target == 1));
}

#[test]
fn scalar_privatization_prunes_loop_carried_edges() {
    // for i { S0: t = A[i]; S1: B[i] = t; }  t is private to each iteration.
    let mut scop = Scop::new(AffineRelation::context(1));
    let sub_i = vec![1, 0, 0];
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

    let plain = polydep::dependences(&mut scop.clone(), &AnalysisOptions::default()).unwrap();
    assert!(plain.iter().any(|d| d.kind == DependenceKind::War));
    assert!(plain.iter().any(|d| d.kind == DependenceKind::Waw));

    let options = AnalysisOptions {
        scalar_privatization: true,
        ..AnalysisOptions::default()
    };
    let deps = polydep::dependences(&mut scop, &options).unwrap();
    // The loop-carried edges on t disappear; the flow edge survives as the
    // privatized variant, pinned loop-independent.
    assert_eq!(deps.len(), 1);
    assert_eq!(deps[0].kind, DependenceKind::RawScalarPriv);
    assert!(deps[0].domain.contains_point(&[2, 3, 2, 3], &[5]));
    assert!(!deps[0].domain.contains_point(&[1, 3, 2, 3], &[5]));
}

#[test]
fn dependence_extension_slot_is_replaced() {
    let mut scop = write_then_read_scop();
    polydep::attach_dependences(&mut scop, &AnalysisOptions::default()).unwrap();
    assert_eq!(scop.dependences.as_ref().map(|d| d.len()), Some(1));
    // A second attachment replaces the first.
    polydep::attach_dependences(&mut scop, &AnalysisOptions::default()).unwrap();
    assert_eq!(scop.dependences.as_ref().map(|d| d.len()), Some(1));
}

#[test]
fn precision_mismatch_fails_fast() {
    let mut scop = write_then_read_scop();
    scop.statements[0].domain.parts[0].precision = Precision::Multiple;
    let err = polydep::dependences(&mut scop, &AnalysisOptions::default()).unwrap_err();
    assert!(matches!(err, AnalysisError::PrecisionMismatch { .. }));
}
