use criterion::{Criterion, black_box, criterion_group, criterion_main};
use lamg::{
    Lattice, LatticeField, LinearOperator, MgOptions, Multigrid, SolverKind, SourceKind,
    StencilOperator,
};

fn bench_vcycle(c: &mut Criterion) {
    let lattice = Lattice::new(&[16, 16, 8]).unwrap();
    let op = StencilOperator::gauge_laplacian(lattice, 2, 2, 0.05, 0.02, 1).unwrap();
    let mut opts = MgOptions::new(3);
    for lo in opts.levels.iter_mut() {
        lo.n_vec = 8;
        lo.setup_inv_type = SolverKind::Mr;
        lo.setup_maxiter = 20;
    }
    opts.levels[0].geo_block_size = vec![4, 4, 2];
    opts.levels[1].geo_block_size = vec![2, 2, 2];
    let mut mg = Multigrid::new(op.clone(), opts).unwrap();

    let mut b = LatticeField::new(op.param().clone());
    b.source(SourceKind::Random(1)).unwrap();
    let mut x = LatticeField::new(op.param().clone());

    c.bench_function("lamg 3-level V-cycle", |ben| {
        ben.iter(|| {
            mg.solve(black_box(&mut x), black_box(&b)).unwrap();
        })
    });

    c.bench_function("lamg fine operator apply", |ben| {
        ben.iter(|| {
            op.apply(black_box(&mut x), black_box(&b)).unwrap();
        })
    });
}

criterion_group!(benches, bench_vcycle);
criterion_main!(benches);
