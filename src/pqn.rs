//! Projected quasi-Newton (PQN) driver.
//!
//! Each outer iteration asks SPG for an approximate minimizer of the
//! ball-constrained quadratic model and uses the displacement toward it
//! as the search direction, accepted through an Armijo backtracking line
//! search. For the quadratic objective solved here the model is exact,
//! so PQN and SPG agree; the driver exists for nonconvex extensions of
//! the smooth term.

use faer_core::Parallelism;
use rayon::prelude::*;

use crate::ball;
use crate::history::{HistoryRecorder, SolveHistory};
use crate::numerics::{self, dipole};
use crate::operator::DipoleOperator;
use crate::problem::{DipoleProblem, SolveError, ShapeError};
use crate::report::{emit_line, Reporter, ReporterSlot, SolveStatus};
use crate::spg::{SpgOptions, SpgSolver};

const HISTORY_SLOTS: usize = 20;
const SUFFICIENT_DECREASE: f64 = 1e-4;
const SPG_ITER_FACTOR: usize = 10;
const SPG_WINDOW: usize = 100;
const MAX_BACKTRACKS: usize = 50;

/// Options controlling a PQN solve.
#[derive(Debug, Clone)]
pub struct PqnOptions {
    /// Relax-and-split weight on the proximal term.
    pub nu: f64,
    /// Converge when the summed projected-gradient displacement drops
    /// below this.
    pub epsilon: f64,
    /// L0 weight, reported only.
    pub reg_l0: f64,
    /// L1 weight, reported only.
    pub reg_l1: f64,
    /// L2 weight on `||m||^2`.
    pub reg_l2: f64,
    /// Maximum number of outer iterations.
    pub max_iter: usize,
    /// Emit per-snapshot diagnostics to stdout by default.
    pub verbose: bool,
}

impl Default for PqnOptions {
    fn default() -> Self {
        Self {
            nu: 1e100,
            epsilon: 1e-4,
            reg_l0: 0.0,
            reg_l1: 0.0,
            reg_l2: 0.0,
            max_iter: 100,
            verbose: false,
        }
    }
}

/// Summary of a PQN solve.
#[derive(Debug, Clone)]
pub struct PqnStats {
    /// Termination status.
    pub status: SolveStatus,
    /// Number of completed outer iterations.
    pub iterations: usize,
    /// Recorded snapshots and loss values.
    pub history: SolveHistory,
}

/// PQN driver with an embedded SPG inner solver and preallocated
/// workspace for a fixed problem size.
pub struct PqnSolver {
    ngrid: usize,
    ndipoles: usize,
    parallelism: Parallelism,
    spg: SpgSolver,
    grad: Vec<f64>,
    direction: Vec<f64>,
    x_star: Vec<f64>,
    x_trial: Vec<f64>,
    atb_rs: Vec<f64>,
    field: Vec<f64>,
    conv_terms: Vec<f64>,
}

impl PqnSolver {
    /// Creates a solver for `ngrid` field samples and `ndipoles` dipoles.
    pub fn new(
        ngrid: usize,
        ndipoles: usize,
        parallelism: Parallelism,
    ) -> Result<Self, ShapeError> {
        if ngrid == 0 || ndipoles == 0 {
            return Err(ShapeError::EmptyDimensions { ngrid, ndipoles });
        }
        let ncols = 3 * ndipoles;
        Ok(Self {
            ngrid,
            ndipoles,
            parallelism,
            spg: SpgSolver::new(ngrid, ndipoles, parallelism)?,
            grad: vec![0.0; ncols],
            direction: vec![0.0; ncols],
            x_star: vec![0.0; ncols],
            x_trial: vec![0.0; ncols],
            atb_rs: vec![0.0; ncols],
            field: vec![0.0; ngrid],
            conv_terms: vec![0.0; ndipoles],
        })
    }

    /// Minimizes the composite objective over the product of L2 balls.
    ///
    /// `x` enters as the start iterate `m0` and leaves as the solution.
    pub fn solve(
        &mut self,
        problem: &DipoleProblem<'_>,
        x: &mut [f64],
        options: &PqnOptions,
        reporter: Option<&mut dyn Reporter>,
    ) -> Result<PqnStats, SolveError> {
        if problem.ngrid() != self.ngrid || problem.ndipoles() != self.ndipoles {
            return Err(SolveError::ProblemMismatch {
                solver: (self.ngrid, self.ndipoles),
                problem: (problem.ngrid(), problem.ndipoles()),
            });
        }
        let ncols = problem.ncols();
        if x.len() != ncols {
            return Err(SolveError::DimensionMismatch {
                expected: ncols,
                actual: x.len(),
            });
        }

        let op = problem.operator(self.parallelism);
        let m_maxima = problem.m_maxima();
        let shift = 2.0 * (options.reg_l2 + 1.0 / (2.0 * options.nu));

        let Self {
            spg,
            grad,
            direction,
            x_star,
            x_trial,
            atb_rs,
            field,
            conv_terms,
            ..
        } = self;

        atb_rs
            .par_iter_mut()
            .zip(problem.atb().par_iter())
            .zip(problem.m_proxy().par_iter())
            .for_each(|((t, &atb), &w)| *t = atb + w / options.nu);

        let mut recorder = HistoryRecorder::new(options.max_iter, HISTORY_SLOTS);
        let mut reporter = ReporterSlot::new(reporter, options.verbose);
        let mut alpha_bb = 0.1;
        let mut status = SolveStatus::MaxIterations;
        let mut iterations = options.max_iter;

        for k in 0..options.max_iter {
            let raw = problem.raw_loss(&op, x, field);
            let fk = raw.smooth_objective(options.nu, options.reg_l2);

            op.normal_apply(x, shift, field, grad);
            grad.iter_mut()
                .zip(atb_rs.iter())
                .for_each(|(gi, &t)| *gi -= t);

            if recorder.due(k) {
                let loss = raw.scaled(options.nu, options.reg_l0, options.reg_l1, options.reg_l2);
                recorder.record(k, x, loss.r2, loss.total);
                if let Some(r) = reporter.as_mut() {
                    r.on_iteration(&loss.report(k));
                }
            }

            if k == 0 {
                // First direction is a normalized steepest-descent step.
                let gnorm2 = numerics::par_norm2(grad);
                if gnorm2 <= 0.0 {
                    status = SolveStatus::Converged;
                    iterations = k;
                    break;
                }
                direction
                    .par_iter_mut()
                    .zip(grad.par_iter())
                    .for_each(|(d, &gi)| *d = -gi / gnorm2);
            } else {
                // The SPG minimizer of the quadratic model around x_k
                // provides the quasi-Newton direction.
                x_star.copy_from_slice(x);
                let spg_options = SpgOptions {
                    alpha_min: 1e-10,
                    alpha_max: 1e10,
                    alpha_bb,
                    history_window: SPG_WINDOW,
                    epsilon: options.epsilon,
                    reg_l2: options.reg_l2,
                    nu: options.nu,
                    max_iter: options.max_iter * SPG_ITER_FACTOR,
                    sufficient_decrease: SUFFICIENT_DECREASE,
                    verbose: false,
                };
                let spg_stats = spg.solve(problem, x_star, &spg_options)?;
                alpha_bb = spg_stats.alpha_bb;
                direction
                    .par_iter_mut()
                    .zip(x_star.par_iter())
                    .zip(x.par_iter())
                    .for_each(|((d, &xs), &xi)| *d = xs - xi);
            }

            {
                let x_now: &[f64] = x;
                conv_terms.par_iter_mut().enumerate().for_each(|(i, t)| {
                    let xi = dipole(x_now, i);
                    let gi = dipole(grad, i);
                    let proj = ball::project_l2_ball(
                        [xi[0] - gi[0], xi[1] - gi[1], xi[2] - gi[2]],
                        m_maxima[i],
                    );
                    let d = [proj[0] - xi[0], proj[1] - xi[1], proj[2] - xi[2]];
                    *t = numerics::norm2_3(d).sqrt();
                });
            }
            if conv_terms.iter().sum::<f64>() < options.epsilon {
                if options.verbose {
                    emit_line(&format!("PQN ended early, at iteration {k}"));
                }
                status = SolveStatus::Converged;
                iterations = k;
                break;
            }

            // Armijo backtracking along the quasi-Newton direction.
            let slope = numerics::par_dot(grad, direction);
            let mut alpha = 1.0;
            let mut f_trial = trial_objective(&op, problem, x, direction, alpha, x_trial, field, options);
            let mut backtracks = 0;
            while f_trial > fk + alpha * SUFFICIENT_DECREASE * slope && backtracks < MAX_BACKTRACKS
            {
                alpha = numerics::interp_step(alpha, f_trial, fk, slope);
                f_trial = trial_objective(&op, problem, x, direction, alpha, x_trial, field, options);
                backtracks += 1;
            }
            x.copy_from_slice(x_trial);

            if !(numerics::all_finite(x) && numerics::all_finite(grad)) {
                status = SolveStatus::NumericalFailure;
                iterations = k + 1;
                break;
            }
        }

        reporter.finish();
        Ok(PqnStats {
            status,
            iterations,
            history: recorder.into_history(),
        })
    }
}

#[allow(clippy::too_many_arguments)]
fn trial_objective(
    op: &DipoleOperator<'_>,
    problem: &DipoleProblem<'_>,
    x: &[f64],
    direction: &[f64],
    alpha: f64,
    x_trial: &mut [f64],
    field: &mut [f64],
    options: &PqnOptions,
) -> f64 {
    x_trial
        .par_iter_mut()
        .zip(x.par_iter())
        .zip(direction.par_iter())
        .for_each(|((t, &xi), &di)| *t = xi + alpha * di);
    problem
        .raw_loss(op, x_trial, field)
        .smooth_objective(options.nu, options.reg_l2)
}
