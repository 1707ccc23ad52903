//! End-to-end tests of the multigrid hierarchy: construction, recursion depth, cycles and
//! the preconditioned outer solve.

use lamg::core::blas;
use lamg::{
    CycleType, Lattice, LatticeField, LinearOperator, MAX_LEVELS, MgError, MgFlags, MgOptions,
    Multigrid, NullSpaceSource, Precision, SiteSubset, SolutionType, SolveType, SolverKind,
    SourceKind, StencilOperator,
};
use std::sync::Arc;

fn residual_norm(op: &StencilOperator, x: &LatticeField, b: &LatticeField) -> f64 {
    let mut ax = LatticeField::new(op.param().clone());
    op.apply(&mut ax, x).unwrap();
    blas::xmy_norm(b, &mut ax).sqrt()
}

/// Cheap but effective setup for the small test problems.
fn setup_options(opts: &mut MgOptions) {
    for lo in opts.levels.iter_mut() {
        lo.setup_inv_type = SolverKind::Mr;
        lo.setup_maxiter = 20;
        lo.n_vec = 4;
    }
}

fn two_level(block: Vec<usize>) -> MgOptions {
    let mut opts = MgOptions::new(2);
    setup_options(&mut opts);
    opts.levels[0].geo_block_size = block;
    opts.levels[1].coarse_solver = SolverKind::Direct;
    opts
}

#[test]
fn exact_two_level_on_constant_near_kernel() {
    let lat = Lattice::new(&[4, 4]).unwrap();
    let op = StencilOperator::laplacian(lat, 0.5).unwrap();
    let mut opts = two_level(vec![2, 2]);
    opts.levels[0].n_vec = 1;
    opts.levels[0].smoother = None;
    // no vector file: the seed basis starts with the constant vector
    opts.null_space = NullSpaceSource::Load;
    opts.flags |= MgFlags::VERIFY;
    let mut mg = Multigrid::new(op.clone(), opts).unwrap();
    assert!(!mg.level(0).unwrap().has_presmoother());

    // A·1 = m·1, so the solution of a constant source lies in the coarse space
    let mut b = LatticeField::new(op.param().clone());
    b.source(SourceKind::Constant { spin: 0, color: 0 }).unwrap();
    let mut x = LatticeField::new(op.param().clone());
    mg.solve(&mut x, &b).unwrap();
    for z in x.data() {
        assert!((z.re - 2.0).abs() < 1e-12 && z.im.abs() < 1e-12);
    }
}

#[test]
fn exact_two_level_with_unit_blocks() {
    let lat = Lattice::new(&[4, 4]).unwrap();
    let op = StencilOperator::laplacian(lat, 3.0).unwrap();
    let mut opts = two_level(vec![1, 1]);
    opts.levels[0].n_vec = 1;
    opts.levels[0].smoother = None;
    opts.null_space = NullSpaceSource::Load;
    let mut mg = Multigrid::new(op.clone(), opts).unwrap();

    let mut b = LatticeField::new(op.param().clone());
    b.source(SourceKind::Random(3)).unwrap();
    let mut x = LatticeField::new(op.param().clone());
    mg.solve(&mut x, &b).unwrap();
    assert!(residual_norm(&op, &x, &b) < 1e-12 * blas::norm2(&b).sqrt());
}

#[test]
fn cycle_reduces_residual() {
    let lat = Lattice::new(&[8, 8]).unwrap();
    let op = StencilOperator::gauge_laplacian(lat, 2, 1, 0.1, 0.0, 3).unwrap();
    let mut mg = Multigrid::new(op.clone(), two_level(vec![4, 4])).unwrap();

    let mut b = LatticeField::new(op.param().clone());
    b.source(SourceKind::Random(9)).unwrap();
    let mut x = LatticeField::new(op.param().clone());
    let mut e = LatticeField::new(op.param().clone());
    let mut r = b.clone();
    let mut prev = blas::norm2(&b).sqrt();
    for _ in 0..4 {
        mg.solve(&mut e, &r).unwrap();
        blas::xpy(&e, &mut x);
        let now = residual_norm(&op, &x, &b);
        assert!(now < prev, "residual grew from {prev:e} to {now:e}");
        prev = now;
        op.apply(&mut r, &x).unwrap();
        blas::xmy_norm(&b, &mut r);
    }
}

#[test]
fn preconditioned_gcr_converges() {
    let lat = Lattice::new(&[8, 8]).unwrap();
    let op = StencilOperator::gauge_laplacian(lat, 2, 2, 0.05, 0.1, 4).unwrap();
    let mut opts = two_level(vec![4, 4]);
    opts.flags |= MgFlags::VERIFY;
    let mut mg = Multigrid::new(op.clone(), opts).unwrap();
    assert!(mg.is_ready());

    let mut b = LatticeField::new(op.param().clone());
    b.source(SourceKind::Random(10)).unwrap();
    let mut x = LatticeField::new(op.param().clone());
    let stats = mg.invert(&mut x, &b, 1e-10, 100).unwrap();
    assert!(stats.converged, "not converged: {:e}", stats.final_residual);
    assert!(residual_norm(&op, &x, &b) < 1e-9 * blas::norm2(&b).sqrt());
}

#[test]
fn three_levels_recurse_once() {
    let lat = Lattice::new(&[16, 16]).unwrap();
    let op = StencilOperator::gauge_laplacian(lat, 2, 1, 0.1, 0.0, 8).unwrap();
    let mut opts = MgOptions::new(3);
    setup_options(&mut opts);
    opts.levels[0].geo_block_size = vec![4, 4];
    opts.levels[1].geo_block_size = vec![2, 2];
    let mut mg = Multigrid::new(op.clone(), opts).unwrap();
    assert_eq!(mg.n_levels(), 3);

    let fine = mg.level(0).unwrap();
    assert!(fine.recurses());
    assert_eq!(fine.parent(), None);
    let mid = mg.level(1).unwrap();
    assert!(!mid.recurses());
    assert_eq!(mid.parent(), Some(0));
    assert_eq!(mid.operators().stencil.lattice().dims(), &[4, 4]);
    let last = mg.level(2).unwrap();
    assert!(last.transfer().is_none());
    assert!(last.coarse().is_none());
    assert!(last.null_vectors().is_empty());
    assert_eq!(last.operators().stencil.lattice().dims(), &[2, 2]);
    assert!(mg.level(3).is_none());

    let mut b = LatticeField::new(op.param().clone());
    b.source(SourceKind::Random(11)).unwrap();
    let mut x = LatticeField::new(op.param().clone());
    let stats = mg.invert(&mut x, &b, 1e-8, 100).unwrap();
    assert!(stats.converged);
}

#[test]
fn recursive_cycle_wraps_every_coarse_level() {
    let lat = Lattice::new(&[16, 16]).unwrap();
    let op = StencilOperator::gauge_laplacian(lat, 2, 1, 0.2, 0.0, 2).unwrap();
    let mut opts = MgOptions::new(3);
    setup_options(&mut opts);
    opts.cycle_type = CycleType::Recursive;
    opts.levels[0].geo_block_size = vec![4, 4];
    opts.levels[1].geo_block_size = vec![2, 2];
    let mg = Multigrid::new(op, opts).unwrap();
    assert!(!mg.level(0).unwrap().recurses());
    assert!(!mg.level(1).unwrap().recurses());
}

#[test]
fn too_deep_hierarchy_is_rejected() {
    let lat = Lattice::new(&[8, 8]).unwrap();
    let op = StencilOperator::laplacian(lat, 0.1).unwrap();
    let opts = MgOptions::new(MAX_LEVELS + 1);
    let res = Multigrid::new(op, opts);
    assert!(matches!(res, Err(MgError::Config(_))));
}

#[test]
fn even_odd_hierarchy_solves_full_system() {
    let lat = Lattice::new(&[8, 8]).unwrap();
    let op = StencilOperator::gauge_laplacian(lat, 2, 1, 0.1, 0.2, 12).unwrap();
    let mut opts = two_level(vec![4, 4]);
    opts.levels[0].smoother_solve_type = SolveType::DirectPc;
    opts.levels[0].coarse_grid_solution_type = SolutionType::MatPc;
    opts.flags |= MgFlags::VERIFY;
    let mut mg = Multigrid::new(op.clone(), opts).unwrap();
    let fine = mg.level(0).unwrap();
    assert!(fine.operators().is_parity_work());
    assert!(fine.operators().work.is_preconditioned());

    let mut b = LatticeField::new(op.param().clone());
    b.source(SourceKind::Random(13)).unwrap();
    let mut x = LatticeField::new(op.param().clone());
    let stats = mg.invert(&mut x, &b, 1e-10, 100).unwrap();
    assert!(stats.converged);
    assert!(residual_norm(&op, &x, &b) < 1e-9 * blas::norm2(&b).sqrt());
}

#[test]
fn parity_input_on_full_lattice_level_is_rejected() {
    let lat = Lattice::new(&[8, 8]).unwrap();
    let op = StencilOperator::laplacian(lat, 0.2).unwrap();
    let mut mg = Multigrid::new(op.clone(), two_level(vec![4, 4])).unwrap();
    assert!(!mg.level(0).unwrap().operators().is_parity_work());

    let even = op.param().clone().with_subset(SiteSubset::Parity(0));
    let mut b = LatticeField::new(even.clone());
    b.source(SourceKind::Random(19)).unwrap();
    let mut x = LatticeField::new(even);
    assert!(matches!(mg.solve(&mut x, &b), Err(MgError::Config(_))));
}

#[test]
fn parity_input_on_even_odd_level_solves_schur_system() {
    let lat = Lattice::new(&[8, 8]).unwrap();
    let op = StencilOperator::gauge_laplacian(lat, 2, 1, 0.1, 0.2, 20).unwrap();
    let mut opts = two_level(vec![4, 4]);
    opts.levels[0].smoother_solve_type = SolveType::DirectPc;
    opts.levels[0].coarse_grid_solution_type = SolutionType::MatPc;
    let mut mg = Multigrid::new(op.clone(), opts).unwrap();
    let work = Arc::clone(&mg.level(0).unwrap().operators().work);

    let mut b = LatticeField::new(op.param().clone());
    b.source(SourceKind::Random(21)).unwrap();
    let mut b_hat = LatticeField::new(work.param().clone());
    work.prepare(&mut b_hat, &b).unwrap();
    let mut x_hat = LatticeField::new(work.param().clone());
    let stats = mg.invert(&mut x_hat, &b_hat, 1e-10, 100).unwrap();
    assert!(stats.converged, "not converged: {:e}", stats.final_residual);

    let mut r = LatticeField::new(work.param().clone());
    work.apply(&mut r, &x_hat).unwrap();
    let res = blas::xmy_norm(&b_hat, &mut r).sqrt();
    assert!(res < 1e-9 * blas::norm2(&b_hat).sqrt());

    let mut x = LatticeField::new(op.param().clone());
    work.reconstruct(&x_hat, &b, &mut x).unwrap();
    assert!(residual_norm(&op, &x, &b) < 1e-8 * blas::norm2(&b).sqrt());
}

#[test]
fn reduced_precision_roles_pass_verification_and_converge() {
    let lat = Lattice::new(&[8, 8]).unwrap();
    let op = StencilOperator::gauge_laplacian(lat, 2, 1, 0.1, 0.0, 18).unwrap();
    let roles = [
        (Precision::Single, Precision::Single, Precision::Half),
        (Precision::Half, Precision::Half, Precision::Quarter),
    ];
    for (smoother, sloppy, null) in roles {
        let mut opts = two_level(vec![4, 4]);
        opts.precision.smoother = smoother;
        opts.precision.sloppy = sloppy;
        opts.levels[0].precision_null = null;
        opts.flags |= MgFlags::VERIFY;
        let mut mg = Multigrid::new(op.clone(), opts).unwrap();
        let fine = mg.level(0).unwrap();
        assert_eq!(fine.null_vectors()[0].precision(), null);
        assert_eq!(fine.operators().smoother.precision(), smoother);
        assert_eq!(fine.operators().smoother_sloppy.precision(), sloppy);

        let mut b = LatticeField::new(op.param().clone());
        b.source(SourceKind::Random(22)).unwrap();
        let mut x = LatticeField::new(op.param().clone());
        let stats = mg.invert(&mut x, &b, 1e-8, 100).unwrap();
        assert!(
            stats.converged,
            "{smoother}/{sloppy}/{null}: not converged, |r| = {:e}",
            stats.final_residual
        );
        assert!(residual_norm(&op, &x, &b) < 1e-7 * blas::norm2(&b).sqrt());
    }
}

#[test]
fn refresh_rebuilds_a_ready_hierarchy() {
    let lat = Lattice::new(&[8, 8]).unwrap();
    let op = StencilOperator::gauge_laplacian(lat, 2, 1, 0.1, 0.0, 14).unwrap();
    let mut opts = two_level(vec![4, 4]);
    opts.levels[0].setup_maxiter_refresh = 5;
    let mut mg = Multigrid::new(op.clone(), opts).unwrap();
    let before = mg.level(0).unwrap().null_vectors()[0].clone();
    mg.refresh().unwrap();
    assert!(mg.is_ready());
    let after = &mg.level(0).unwrap().null_vectors()[0];
    assert_ne!(before.data(), after.data());

    let mut b = LatticeField::new(op.param().clone());
    b.source(SourceKind::Random(15)).unwrap();
    let mut x = LatticeField::new(op.param().clone());
    assert!(mg.invert(&mut x, &b, 1e-8, 60).unwrap().converged);
}

#[test]
fn multigrid_setup_inverter_builds_the_hierarchy() {
    let lat = Lattice::new(&[8, 8]).unwrap();
    let op = StencilOperator::gauge_laplacian(lat, 2, 1, 0.1, 0.0, 16).unwrap();
    let mut opts = two_level(vec![4, 4]);
    opts.levels[0].setup_inv_type = SolverKind::Multigrid;
    opts.levels[0].setup_maxiter = 4;
    opts.levels[0].num_setup_iter = 2;
    let mut mg = Multigrid::new(op.clone(), opts).unwrap();
    assert!(mg.is_ready());
    assert!(mg.level(0).unwrap().transfer().is_some());

    let mut b = LatticeField::new(op.param().clone());
    b.source(SourceKind::Random(17)).unwrap();
    let mut x = LatticeField::new(op.param().clone());
    assert!(mg.invert(&mut x, &b, 1e-8, 60).unwrap().converged);
}
