//! Transfer operator and Galerkin coarse-operator identities.
//!
//! Near-kernel vectors are random (seeded), so the checks exercise the general block
//! orthonormalisation rather than any special structure of the operator.

use approx::assert_abs_diff_eq;
use lamg::core::blas;
use lamg::multigrid::build_coarse_operator;
use lamg::{
    FieldParam, Lattice, LatticeField, LinearOperator, MatPcType, MgError, Precision,
    SchurOperator, SiteSubset, StencilOperator, Transfer,
};
use rand::SeedableRng;
use rand::rngs::StdRng;

fn random_vectors(param: &FieldParam, n: usize, rng: &mut StdRng) -> Vec<LatticeField> {
    (0..n)
        .map(|_| {
            let mut v = LatticeField::new(param.clone());
            v.randomize(rng);
            v
        })
        .collect()
}

fn rel_diff(a: &LatticeField, b: &LatticeField) -> f64 {
    let mut d = b.clone();
    blas::xmy_norm(a, &mut d).sqrt() / blas::norm2(a).sqrt()
}

#[test]
fn restriction_undoes_prolongation() {
    let mut rng = StdRng::seed_from_u64(11);
    let param = FieldParam::new(Lattice::new(&[8, 4, 4]).unwrap(), 4, 2);
    let b = random_vectors(&param, 6, &mut rng);
    let t = Transfer::new(0, &b, 6, &[2, 2, 2], 2, Precision::Double, SiteSubset::Full).unwrap();
    assert_eq!(t.coarse_param().lattice.dims(), &[4, 2, 2]);
    assert_eq!(t.coarse_param().nspin, 2);
    assert_eq!(t.coarse_param().ncolor, 6);

    let mut eta = LatticeField::new(t.coarse_param().clone());
    eta.randomize(&mut rng);
    let mut fine = LatticeField::new(t.fine_param().clone());
    let mut back = LatticeField::new(t.coarse_param().clone());
    t.prolong(&mut fine, &eta).unwrap();
    t.restrict(&mut back, &fine).unwrap();
    assert!(rel_diff(&eta, &back) < 1e-12);
    // P is an isometry
    assert_abs_diff_eq!(blas::norm2(&fine), blas::norm2(&eta), epsilon = 1e-10);
}

#[test]
fn restriction_is_adjoint_of_prolongation() {
    let mut rng = StdRng::seed_from_u64(12);
    let param = FieldParam::new(Lattice::new(&[4, 4]).unwrap(), 2, 3);
    let b = random_vectors(&param, 3, &mut rng);
    let t = Transfer::new(0, &b, 3, &[2, 2], 1, Precision::Double, SiteSubset::Full).unwrap();
    let mut u = LatticeField::new(t.fine_param().clone());
    u.randomize(&mut rng);
    let mut v = LatticeField::new(t.coarse_param().clone());
    v.randomize(&mut rng);
    let mut pv = LatticeField::new(t.fine_param().clone());
    t.prolong(&mut pv, &v).unwrap();
    let mut ru = LatticeField::new(t.coarse_param().clone());
    t.restrict(&mut ru, &u).unwrap();
    let lhs = blas::cdot(&u, &pv);
    let rhs = blas::cdot(&ru, &v);
    assert_abs_diff_eq!(lhs.re, rhs.re, epsilon = 1e-10);
    assert_abs_diff_eq!(lhs.im, rhs.im, epsilon = 1e-10);
}

#[test]
fn near_kernel_vectors_lie_in_range() {
    let mut rng = StdRng::seed_from_u64(13);
    let param = FieldParam::new(Lattice::new(&[8, 8]).unwrap(), 2, 1);
    let b = random_vectors(&param, 4, &mut rng);
    let t = Transfer::new(0, &b, 4, &[4, 2], 1, Precision::Double, SiteSubset::Full).unwrap();
    let mut coarse = LatticeField::new(t.coarse_param().clone());
    let mut fine = LatticeField::new(t.fine_param().clone());
    for v in &b {
        t.restrict(&mut coarse, v).unwrap();
        t.prolong(&mut fine, &coarse).unwrap();
        assert!(rel_diff(v, &fine) < 1e-12);
    }
}

#[test]
fn single_precision_basis_stays_within_its_tolerance() {
    let mut rng = StdRng::seed_from_u64(14);
    let param = FieldParam::new(Lattice::new(&[4, 4]).unwrap(), 2, 2);
    let b = random_vectors(&param, 4, &mut rng);
    let t = Transfer::new(0, &b, 4, &[2, 2], 1, Precision::Single, SiteSubset::Full).unwrap();
    let mut eta = LatticeField::new(t.coarse_param().clone());
    eta.randomize(&mut rng);
    let mut fine = LatticeField::new(t.fine_param().clone());
    let mut back = LatticeField::new(t.coarse_param().clone());
    t.prolong(&mut fine, &eta).unwrap();
    t.restrict(&mut back, &fine).unwrap();
    let dev = rel_diff(&eta, &back);
    assert!(dev < Precision::Single.tolerance());
    assert!(dev > 0.0);
}

#[test]
fn too_few_vectors_is_a_configuration_error() {
    let mut rng = StdRng::seed_from_u64(15);
    let param = FieldParam::new(Lattice::new(&[4]).unwrap(), 1, 1);
    let b = random_vectors(&param, 1, &mut rng);
    let res = Transfer::new(0, &b, 2, &[2], 1, Precision::Double, SiteSubset::Full);
    assert!(matches!(res, Err(MgError::Config(_))));
}

#[test]
fn galerkin_operator_matches_triple_product() {
    let mut rng = StdRng::seed_from_u64(16);
    let lat = Lattice::new(&[8, 8]).unwrap();
    let op = StencilOperator::gauge_laplacian(lat, 2, 2, 0.1, 0.3, 5).unwrap();
    let b = random_vectors(op.param(), 4, &mut rng);
    let t = Transfer::new(0, &b, 4, &[2, 4], 1, Precision::Double, SiteSubset::Full).unwrap();
    let coarse = build_coarse_operator(&op, &t, 0.0).unwrap();

    let mut v = LatticeField::new(t.coarse_param().clone());
    v.randomize(&mut rng);
    let mut pv = LatticeField::new(t.fine_param().clone());
    let mut apv = LatticeField::new(t.fine_param().clone());
    let mut emulated = LatticeField::new(t.coarse_param().clone());
    let mut native = LatticeField::new(coarse.param().clone());
    t.prolong(&mut pv, &v).unwrap();
    op.apply(&mut apv, &pv).unwrap();
    t.restrict(&mut emulated, &apv).unwrap();
    coarse.apply(&mut native, &v).unwrap();
    assert!(rel_diff(&emulated, &native) < 1e-12);

    // the adjoint is coarsened consistently
    let mut apv_dag = LatticeField::new(t.fine_param().clone());
    op.apply_dagger(&mut apv_dag, &pv).unwrap();
    t.restrict(&mut emulated, &apv_dag).unwrap();
    coarse.apply_dagger(&mut native, &v).unwrap();
    assert!(rel_diff(&emulated, &native) < 1e-12);
}

#[test]
fn schur_complement_is_coarsened_on_its_parity() {
    let mut rng = StdRng::seed_from_u64(17);
    let lat = Lattice::new(&[8, 8]).unwrap();
    let op = StencilOperator::gauge_laplacian(lat, 2, 1, 0.2, 0.0, 6).unwrap();
    let schur = SchurOperator::new(&op, MatPcType::OddOdd).unwrap();
    let b = random_vectors(op.param(), 2, &mut rng);
    let t = Transfer::new(0, &b, 2, &[4, 4], 1, Precision::Double, SiteSubset::Parity(1))
        .unwrap();
    let coarse = build_coarse_operator(&schur, &t, 0.0).unwrap();

    let mut v = LatticeField::new(t.coarse_param().clone());
    v.randomize(&mut rng);
    let mut pv = LatticeField::new(schur.param().clone());
    let mut apv = LatticeField::new(schur.param().clone());
    let mut emulated = LatticeField::new(t.coarse_param().clone());
    let mut native = LatticeField::new(coarse.param().clone());
    t.prolong(&mut pv, &v).unwrap();
    schur.apply(&mut apv, &pv).unwrap();
    t.restrict(&mut emulated, &apv).unwrap();
    coarse.apply(&mut native, &v).unwrap();
    assert!(rel_diff(&emulated, &native) < 1e-12);
}
