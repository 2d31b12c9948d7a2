use faer_core::Parallelism;
use pm_opt_rs::{
    DipoleProblem, MwpgpOptions, MwpgpSolver, PqnOptions, PqnSolver, SolveStatus, SpgOptions,
    SpgSolver,
};

struct DenseCase {
    a: Vec<f64>,
    b: Vec<f64>,
    atb: Vec<f64>,
    m_proxy: Vec<f64>,
    m_maxima: Vec<f64>,
    ngrid: usize,
    ndipoles: usize,
}

impl DenseCase {
    fn new(a: Vec<f64>, b: Vec<f64>, m_maxima: Vec<f64>, ngrid: usize, ndipoles: usize) -> Self {
        let ncols = 3 * ndipoles;
        assert_eq!(a.len(), ngrid * ncols);
        assert_eq!(b.len(), ngrid);
        assert_eq!(m_maxima.len(), ndipoles);
        let mut atb = vec![0.0; ncols];
        for j in 0..ncols {
            for i in 0..ngrid {
                atb[j] += a[i * ncols + j] * b[i];
            }
        }
        Self {
            a,
            b,
            atb,
            m_proxy: vec![0.0; ncols],
            m_maxima,
            ngrid,
            ndipoles,
        }
    }

    fn problem(&self) -> DipoleProblem<'_> {
        DipoleProblem::new(
            &self.a,
            &self.b,
            &self.atb,
            &self.m_proxy,
            &self.m_maxima,
            self.ngrid,
            self.ndipoles,
        )
        .unwrap()
    }
}

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

fn random_case(seed: u64, ngrid: usize, ndipoles: usize, radius: f64) -> DenseCase {
    let mut rng = Lcg::new(seed);
    let ncols = 3 * ndipoles;
    let a: Vec<f64> = (0..ngrid * ncols)
        .map(|_| rng.next_f64() * 2.0 - 1.0)
        .collect();
    let b: Vec<f64> = (0..ngrid).map(|_| rng.next_f64() * 2.0 - 1.0).collect();
    let m_maxima = vec![radius; ndipoles];
    DenseCase::new(a, b, m_maxima, ngrid, ndipoles)
}

fn frobenius2(a: &[f64]) -> f64 {
    a.iter().map(|v| v * v).sum()
}

fn s1_case() -> DenseCase {
    DenseCase::new(
        vec![1.0, 0.0, 0.0],
        vec![1.0],
        vec![1.0],
        1,
        1,
    )
}

// Single-dipole recovery: the minimizer is the target moment itself.
#[test]
fn mwpgp_recovers_trivial_moment() {
    let case = s1_case();
    let mut solver = MwpgpSolver::new(1, 1, Parallelism::None).unwrap();
    let mut x = vec![0.0; 3];
    let options = MwpgpOptions {
        alpha: 0.5,
        nu: 1e10,
        epsilon: 1e-12,
        max_iter: 50,
        ..MwpgpOptions::default()
    };
    let stats = solver
        .solve(&case.problem(), &mut x, &options, None)
        .unwrap();
    assert_eq!(stats.status, SolveStatus::Converged);
    assert!((x[0] - 1.0).abs() < 1e-6);
    assert!(x[1].abs() < 1e-6 && x[2].abs() < 1e-6);
}

// With b = 10 and a unit cap the ball saturates and the objective lands
// at 0.5 * 9^2.
#[test]
fn mwpgp_saturates_the_ball() {
    let case = DenseCase::new(vec![1.0, 0.0, 0.0], vec![10.0], vec![1.0], 1, 1);
    let mut solver = MwpgpSolver::new(1, 1, Parallelism::None).unwrap();
    let mut x = vec![0.0; 3];
    let options = MwpgpOptions {
        alpha: 0.5,
        nu: 1e10,
        epsilon: 1e-12,
        max_iter: 50,
        ..MwpgpOptions::default()
    };
    let stats = solver
        .solve(&case.problem(), &mut x, &options, None)
        .unwrap();
    assert!((x[0] - 1.0).abs() < 1e-6);
    let final_objective = *stats.history.objective.last().unwrap();
    assert!((final_objective - 40.5).abs() < 1e-6);
}

// Interior-dominated random problem: the objective history must be
// non-increasing up to floating-point noise.
#[test]
fn mwpgp_objective_is_monotone() {
    let case = random_case(7, 10, 12, 10.0);
    let alpha = 1.0 / (frobenius2(&case.a) + 1.0);
    let mut solver = MwpgpSolver::new(10, 12, Parallelism::None).unwrap();
    let mut x = vec![0.0; 36];
    let options = MwpgpOptions {
        alpha,
        nu: 1e3,
        epsilon: 0.0,
        reg_l2: 1e-3,
        max_iter: 100,
        ..MwpgpOptions::default()
    };
    let stats = solver
        .solve(&case.problem(), &mut x, &options, None)
        .unwrap();
    let objective = &stats.history.objective;
    assert!(objective.len() >= 2);
    for pair in objective.windows(2) {
        assert!(
            pair[1] <= pair[0] + 1e-9 * pair[0].abs() + 1e-12,
            "objective increased: {} -> {}",
            pair[0],
            pair[1]
        );
    }
}

// Tight caps: every iterate must stay inside its ball.
#[test]
fn mwpgp_iterates_stay_feasible() {
    let case = random_case(11, 8, 10, 0.05);
    let alpha = 1.0 / (frobenius2(&case.a) + 1.0);
    let mut solver = MwpgpSolver::new(8, 10, Parallelism::None).unwrap();
    let mut x = vec![0.0; 30];
    let options = MwpgpOptions {
        alpha,
        nu: 1e3,
        epsilon: 0.0,
        max_iter: 60,
        ..MwpgpOptions::default()
    };
    let stats = solver
        .solve(&case.problem(), &mut x, &options, None)
        .unwrap();
    assert!(matches!(
        stats.status,
        SolveStatus::Converged | SolveStatus::MaxIterations
    ));
    for snapshot in &stats.history.snapshots {
        for (i, moment) in snapshot.chunks(3).enumerate() {
            let norm = (moment[0] * moment[0] + moment[1] * moment[1] + moment[2] * moment[2])
                .sqrt();
            assert!(
                norm <= case.m_maxima[i] * (1.0 + 1e-9),
                "dipole {i} leaves its ball: {norm}"
            );
        }
    }
}

// A full-length run records exactly the advertised number of snapshots,
// in iteration order.
#[test]
fn mwpgp_history_cadence_is_fixed() {
    let case = random_case(3, 6, 8, 10.0);
    let alpha = 1.0 / (frobenius2(&case.a) + 1.0);
    let mut solver = MwpgpSolver::new(6, 8, Parallelism::None).unwrap();
    let mut x = vec![0.0; 24];
    let options = MwpgpOptions {
        alpha,
        nu: 1e6,
        epsilon: 0.0,
        max_iter: 100,
        ..MwpgpOptions::default()
    };
    let stats = solver
        .solve(&case.problem(), &mut x, &options, None)
        .unwrap();
    assert_eq!(stats.status, SolveStatus::MaxIterations);
    let iterations = &stats.history.iterations;
    assert_eq!(iterations.len(), 21);
    assert_eq!(iterations[0], 0);
    assert_eq!(*iterations.last().unwrap(), 99);
    assert!(iterations.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn mwpgp_stops_below_min_fb() {
    let case = s1_case();
    let mut solver = MwpgpSolver::new(1, 1, Parallelism::None).unwrap();
    let mut x = vec![0.0; 3];
    let options = MwpgpOptions {
        alpha: 0.5,
        nu: 1e10,
        epsilon: 1e-12,
        max_iter: 50,
        min_fb: 1e10,
        ..MwpgpOptions::default()
    };
    let stats = solver
        .solve(&case.problem(), &mut x, &options, None)
        .unwrap();
    assert_eq!(stats.status, SolveStatus::BelowMinFb);
    assert_eq!(stats.iterations, 1);
    assert_eq!(stats.history.len(), 1);
}

#[test]
fn mwpgp_detects_non_finite_inputs() {
    let mut case = s1_case();
    case.a[0] = f64::NAN;
    let mut solver = MwpgpSolver::new(1, 1, Parallelism::None).unwrap();
    let mut x = vec![0.0; 3];
    let stats = solver
        .solve(&case.problem(), &mut x, &MwpgpOptions::default(), None)
        .unwrap();
    assert_eq!(stats.status, SolveStatus::NumericalFailure);
}

#[test]
fn solvers_reject_mismatched_buffers() {
    assert!(MwpgpSolver::new(0, 1, Parallelism::None).is_err());
    assert!(SpgSolver::new(1, 0, Parallelism::None).is_err());

    let case = s1_case();
    let mut solver = MwpgpSolver::new(1, 1, Parallelism::None).unwrap();
    let mut short = vec![0.0; 2];
    assert!(solver
        .solve(&case.problem(), &mut short, &MwpgpOptions::default(), None)
        .is_err());

    let mut other = MwpgpSolver::new(2, 2, Parallelism::None).unwrap();
    let mut x = vec![0.0; 6];
    assert!(other
        .solve(&case.problem(), &mut x, &MwpgpOptions::default(), None)
        .is_err());
}

// PQN on the trivial problem takes the normalized gradient step straight
// to the solution and then certifies convergence.
#[test]
fn pqn_recovers_trivial_moment() {
    let case = s1_case();
    let mut solver = PqnSolver::new(1, 1, Parallelism::None).unwrap();
    let mut x = vec![0.0; 3];
    let options = PqnOptions {
        nu: 1e10,
        epsilon: 1e-6,
        max_iter: 50,
        ..PqnOptions::default()
    };
    let stats = solver
        .solve(&case.problem(), &mut x, &options, None)
        .unwrap();
    assert_eq!(stats.status, SolveStatus::Converged);
    assert!((x[0] - 1.0).abs() < 1e-6);
    assert!(!stats.history.is_empty());
}

// PQN and MwPGP solve the same convex problem and must agree.
#[test]
fn pqn_agrees_with_mwpgp() {
    let case = random_case(19, 9, 6, 10.0);
    let alpha = 1.0 / (frobenius2(&case.a) + 1.0);

    let mut mwpgp = MwpgpSolver::new(9, 6, Parallelism::None).unwrap();
    let mut x_mwpgp = vec![0.0; 18];
    let mwpgp_options = MwpgpOptions {
        alpha,
        nu: 1e4,
        epsilon: 1e-14,
        reg_l2: 1e-2,
        max_iter: 5000,
        ..MwpgpOptions::default()
    };
    mwpgp
        .solve(&case.problem(), &mut x_mwpgp, &mwpgp_options, None)
        .unwrap();

    let mut pqn = PqnSolver::new(9, 6, Parallelism::None).unwrap();
    let mut x_pqn = vec![0.0; 18];
    let pqn_options = PqnOptions {
        nu: 1e4,
        epsilon: 1e-10,
        reg_l2: 1e-2,
        max_iter: 200,
        ..PqnOptions::default()
    };
    pqn.solve(&case.problem(), &mut x_pqn, &pqn_options, None)
        .unwrap();

    for (a, b) in x_mwpgp.iter().zip(x_pqn.iter()) {
        assert!((a - b).abs() < 1e-3, "solutions diverge: {a} vs {b}");
    }
}

// S6: with A = I and b = 0 the objective is ||x||^2; SPG must drive it
// to zero and keep the BB step inside its clamp window.
#[test]
fn spg_drives_quadratic_to_zero() {
    let case = DenseCase::new(
        vec![
            1.0, 0.0, 0.0, //
            0.0, 1.0, 0.0, //
            0.0, 0.0, 1.0,
        ],
        vec![0.0, 0.0, 0.0],
        vec![1.0],
        3,
        1,
    );
    let mut solver = SpgSolver::new(3, 1, Parallelism::None).unwrap();
    let mut x = vec![0.5, 0.0, 0.0];
    let options = SpgOptions {
        nu: 1.0,
        max_iter: 100,
        ..SpgOptions::default()
    };
    let stats = solver.solve(&case.problem(), &mut x, &options).unwrap();
    assert_eq!(stats.status, SolveStatus::Converged);
    let norm = (x[0] * x[0] + x[1] * x[1] + x[2] * x[2]).sqrt();
    assert!(norm < 1e-4, "norm is {norm}");
    assert!(stats.alpha_bb >= options.alpha_min && stats.alpha_bb <= options.alpha_max);
}

// The BB step returned by one invocation seeds the next one.
#[test]
fn spg_carries_the_bb_step() {
    let case = random_case(23, 6, 4, 10.0);
    let mut solver = SpgSolver::new(6, 4, Parallelism::None).unwrap();
    let mut x = vec![0.0; 12];
    let first = solver
        .solve(
            &case.problem(),
            &mut x,
            &SpgOptions {
                max_iter: 3,
                epsilon: 0.0,
                nu: 1e4,
                ..SpgOptions::default()
            },
        )
        .unwrap();
    assert!(first.alpha_bb.is_finite());
    let second = solver
        .solve(
            &case.problem(),
            &mut x,
            &SpgOptions {
                max_iter: 3,
                epsilon: 0.0,
                nu: 1e4,
                alpha_bb: first.alpha_bb,
                ..SpgOptions::default()
            },
        )
        .unwrap();
    assert!(second.alpha_bb.is_finite());
}
