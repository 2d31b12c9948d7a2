use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use faer_core::Parallelism;
use pm_opt_rs::{
    gpmo_backtracking, gpmo_baseline, DipoleProblem, GpmoOptions, GpmoProblem, MwpgpOptions,
    MwpgpSolver, SpgOptions, SpgSolver,
};

struct Lcg {
    state: u64,
}

impl Lcg {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u32(&mut self) -> u32 {
        self.state = self
            .state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1);
        (self.state >> 32) as u32
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u32() as f64) / (u32::MAX as f64)
    }
}

struct DenseBuffers {
    a: Vec<f64>,
    b: Vec<f64>,
    atb: Vec<f64>,
    m_proxy: Vec<f64>,
    m_maxima: Vec<f64>,
    ngrid: usize,
    ndipoles: usize,
}

fn make_dense(seed: u64, ngrid: usize, ndipoles: usize) -> DenseBuffers {
    let mut rng = Lcg::new(seed);
    let ncols = 3 * ndipoles;
    let a: Vec<f64> = (0..ngrid * ncols)
        .map(|_| rng.next_f64() * 2.0 - 1.0)
        .collect();
    let b: Vec<f64> = (0..ngrid).map(|_| rng.next_f64() * 2.0 - 1.0).collect();
    let mut atb = vec![0.0; ncols];
    for j in 0..ncols {
        for i in 0..ngrid {
            atb[j] += a[i * ncols + j] * b[i];
        }
    }
    DenseBuffers {
        a,
        b,
        atb,
        m_proxy: vec![0.0; ncols],
        m_maxima: vec![1.0; ndipoles],
        ngrid,
        ndipoles,
    }
}

fn make_transposed(seed: u64, ngrid: usize, ndipoles: usize) -> (Vec<f64>, Vec<f64>) {
    let mut rng = Lcg::new(seed);
    let a_t: Vec<f64> = (0..3 * ndipoles * ngrid)
        .map(|_| rng.next_f64() * 2.0 - 1.0)
        .collect();
    let b: Vec<f64> = (0..ngrid).map(|_| rng.next_f64() * 4.0 - 2.0).collect();
    (a_t, b)
}

fn bench_mwpgp_dense(c: &mut Criterion) {
    let buffers = make_dense(0x5eed_u64, 64, 48);
    let problem = DipoleProblem::new(
        &buffers.a,
        &buffers.b,
        &buffers.atb,
        &buffers.m_proxy,
        &buffers.m_maxima,
        buffers.ngrid,
        buffers.ndipoles,
    )
    .unwrap();
    let alpha = 1.0 / (buffers.a.iter().map(|v| v * v).sum::<f64>() + 1.0);
    let options = MwpgpOptions {
        alpha,
        nu: 1e4,
        epsilon: 0.0,
        reg_l2: 1e-3,
        max_iter: 60,
        ..MwpgpOptions::default()
    };
    let mut solver = MwpgpSolver::new(buffers.ngrid, buffers.ndipoles, Parallelism::None).unwrap();
    let mut x = vec![0.0; 3 * buffers.ndipoles];
    c.bench_function("mwpgp_dense_64x48", |bench| {
        bench.iter(|| {
            x.iter_mut().for_each(|v| *v = 0.0);
            solver.solve(&problem, &mut x, &options, None).unwrap();
            black_box(&x);
        });
    });
}

fn bench_spg_dense(c: &mut Criterion) {
    let buffers = make_dense(0xfeed_u64, 64, 48);
    let problem = DipoleProblem::new(
        &buffers.a,
        &buffers.b,
        &buffers.atb,
        &buffers.m_proxy,
        &buffers.m_maxima,
        buffers.ngrid,
        buffers.ndipoles,
    )
    .unwrap();
    let options = SpgOptions {
        nu: 1e4,
        epsilon: 0.0,
        max_iter: 60,
        ..SpgOptions::default()
    };
    let mut solver = SpgSolver::new(buffers.ngrid, buffers.ndipoles, Parallelism::None).unwrap();
    let mut x = vec![0.0; 3 * buffers.ndipoles];
    c.bench_function("spg_dense_64x48", |bench| {
        bench.iter(|| {
            x.iter_mut().for_each(|v| *v = 0.0);
            solver.solve(&problem, &mut x, &options).unwrap();
            black_box(&x);
        });
    });
}

fn bench_gpmo_baseline(c: &mut Criterion) {
    let ngrid = 48;
    let ndipoles = 64;
    let (a_t, b) = make_transposed(0x6a11_u64, ngrid, ndipoles);
    let problem = GpmoProblem::new(&a_t, &b, ngrid, ndipoles).unwrap();
    let options = GpmoOptions {
        num_magnets: 24,
        ..GpmoOptions::default()
    };
    c.bench_function("gpmo_baseline_64_dipoles", |bench| {
        bench.iter(|| {
            let outcome = gpmo_baseline(&problem, &options, None).unwrap();
            black_box(outcome.x);
        });
    });
}

fn bench_gpmo_backtracking(c: &mut Criterion) {
    let ngrid = 48;
    let ndipoles = 64;
    let (a_t, b) = make_transposed(0xbac_u64, ngrid, ndipoles);
    let mut rng = Lcg::new(0x9e0_u64);
    let xyz: Vec<f64> = (0..3 * ndipoles).map(|_| rng.next_f64() * 10.0).collect();
    let problem = GpmoProblem::new(&a_t, &b, ngrid, ndipoles).unwrap();
    let options = GpmoOptions {
        num_magnets: 24,
        ..GpmoOptions::default()
    };
    c.bench_function("gpmo_backtracking_64_dipoles", |bench| {
        bench.iter(|| {
            let outcome = gpmo_backtracking(&problem, &xyz, 8, 5, &options, None).unwrap();
            black_box(outcome.x);
        });
    });
}

criterion_group! {
    name = benches;
    config = Criterion::default()
        .sample_size(10)
        .warm_up_time(Duration::from_millis(500))
        .measurement_time(Duration::from_millis(1500));
    targets =
        bench_mwpgp_dense,
        bench_spg_dense,
        bench_gpmo_baseline,
        bench_gpmo_backtracking
}
criterion_main!(benches);
