//! Spectral projected gradient (SPG) solver for the ball-constrained
//! quadratic model, with a Barzilai-Borwein trial step and a nonmonotone
//! (GLL) line search.

use faer_core::Parallelism;
use rayon::prelude::*;

use crate::ball;
use crate::numerics::{self, dipole, CHUNK_SIZE};
use crate::operator::DipoleOperator;
use crate::problem::{DipoleProblem, SolveError, ShapeError};
use crate::report::{emit_line, SolveStatus};

const MAX_BACKTRACKS: usize = 50;

/// Options controlling an SPG solve.
#[derive(Debug, Clone)]
pub struct SpgOptions {
    /// Lower clamp on the Barzilai-Borwein step.
    pub alpha_min: f64,
    /// Upper clamp on the Barzilai-Borwein step.
    pub alpha_max: f64,
    /// Barzilai-Borwein step carried in from a previous invocation.
    pub alpha_bb: f64,
    /// Nonmonotone line-search window length.
    pub history_window: usize,
    /// Converge when the summed projected-gradient displacement drops
    /// below this.
    pub epsilon: f64,
    /// L2 weight on `||x||^2`.
    pub reg_l2: f64,
    /// Relax-and-split weight on the proximal term.
    pub nu: f64,
    /// Maximum number of iterations.
    pub max_iter: usize,
    /// Sufficient-decrease parameter of the line search.
    pub sufficient_decrease: f64,
    /// Report early termination to stdout.
    pub verbose: bool,
}

impl Default for SpgOptions {
    fn default() -> Self {
        Self {
            alpha_min: 1e-10,
            alpha_max: 1e10,
            alpha_bb: 0.1,
            history_window: 10,
            epsilon: 1e-4,
            reg_l2: 0.0,
            nu: 1e100,
            max_iter: 100,
            sufficient_decrease: 1e-4,
            verbose: false,
        }
    }
}

/// Summary of an SPG solve.
#[derive(Debug, Clone)]
pub struct SpgStats {
    /// Termination status.
    pub status: SolveStatus,
    /// Number of completed iterations.
    pub iterations: usize,
    /// Final Barzilai-Borwein step, to be carried into the next call.
    pub alpha_bb: f64,
}

/// SPG solver with preallocated workspace for a fixed problem size.
pub struct SpgSolver {
    ngrid: usize,
    ndipoles: usize,
    parallelism: Parallelism,
    grad: Vec<f64>,
    grad_next: Vec<f64>,
    step: Vec<f64>,
    x_trial: Vec<f64>,
    atb_rs: Vec<f64>,
    field: Vec<f64>,
    conv_terms: Vec<f64>,
    q_history: Vec<f64>,
}

impl SpgSolver {
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
            grad: vec![0.0; ncols],
            grad_next: vec![0.0; ncols],
            step: vec![0.0; ncols],
            x_trial: vec![0.0; ncols],
            atb_rs: vec![0.0; ncols],
            field: vec![0.0; ngrid],
            conv_terms: vec![0.0; ndipoles],
            q_history: Vec::new(),
        })
    }

    /// Minimizes the quadratic model over the product of L2 balls.
    ///
    /// `x` enters as the start iterate and leaves as the solution; the
    /// returned stats carry the Barzilai-Borwein step for reuse.
    pub fn solve(
        &mut self,
        problem: &DipoleProblem<'_>,
        x: &mut [f64],
        options: &SpgOptions,
    ) -> Result<SpgStats, SolveError> {
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
            grad,
            grad_next,
            step,
            x_trial,
            atb_rs,
            field,
            conv_terms,
            q_history,
            ..
        } = self;

        atb_rs
            .par_iter_mut()
            .zip(problem.atb().par_iter())
            .zip(problem.m_proxy().par_iter())
            .for_each(|((t, &atb), &w)| *t = atb + w / options.nu);

        q_history.clear();
        q_history.reserve(options.max_iter);

        let mut alpha_bb = options.alpha_bb;
        let mut status = SolveStatus::MaxIterations;
        let mut iterations = options.max_iter;

        op.normal_apply(x, shift, field, grad);
        grad.iter_mut()
            .zip(atb_rs.iter())
            .for_each(|(gi, &t)| *gi -= t);

        for k in 0..options.max_iter {
            // Projected-gradient displacement doubles as the
            // convergence measure.
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
                    emit_line(&format!("SPG ended early, at iteration {k}"));
                }
                status = SolveStatus::Converged;
                iterations = k;
                break;
            }

            let alpha_bar = alpha_bb.clamp(options.alpha_min, options.alpha_max);
            {
                let x_now: &[f64] = x;
                step.par_chunks_mut(3).enumerate().for_each(|(i, pc)| {
                    let xi = dipole(x_now, i);
                    let gi = dipole(grad, i);
                    let proj = ball::project_l2_ball(
                        [
                            xi[0] - alpha_bar * gi[0],
                            xi[1] - alpha_bar * gi[1],
                            xi[2] - alpha_bar * gi[2],
                        ],
                        m_maxima[i],
                    );
                    for c in 0..3 {
                        pc[c] = proj[c] - xi[c];
                    }
                });
            }

            let qk = problem
                .raw_loss(&op, x, field)
                .smooth_objective(options.nu, options.reg_l2);
            q_history.push(qk);
            let window_start = k.saturating_sub(options.history_window);
            let reference = if k == 0 {
                qk
            } else {
                q_history[window_start..k]
                    .iter()
                    .copied()
                    .fold(f64::NEG_INFINITY, f64::max)
            };

            let slope = numerics::par_dot(grad, step);
            let mut alpha = 1.0;
            let mut q_trial = trial_objective(&op, problem, x, step, alpha, x_trial, field, options);
            let mut backtracks = 0;
            while q_trial > reference + options.sufficient_decrease * alpha * slope
                && backtracks < MAX_BACKTRACKS
            {
                alpha = numerics::interp_step(alpha, q_trial, qk, slope);
                q_trial = trial_objective(&op, problem, x, step, alpha, x_trial, field, options);
                backtracks += 1;
            }

            x.copy_from_slice(x_trial);

            op.normal_apply(x, shift, field, grad_next);
            grad_next
                .iter_mut()
                .zip(atb_rs.iter())
                .for_each(|(gi, &t)| *gi -= t);

            // BB update from s = alpha * p and y = grad_next - grad; a
            // non-positive s^T y keeps the previous step.
            let partials: Vec<(f64, f64)> = grad_next
                .par_chunks(CHUNK_SIZE)
                .zip(grad.par_chunks(CHUNK_SIZE))
                .zip(step.par_chunks(CHUNK_SIZE))
                .map(|((gn, go), st)| {
                    let mut yty = 0.0;
                    let mut sty = 0.0;
                    for ((&n, &o), &s) in gn.iter().zip(go.iter()).zip(st.iter()) {
                        let y = n - o;
                        yty += y * y;
                        sty += alpha * s * y;
                    }
                    (yty, sty)
                })
                .collect();
            let mut yty = 0.0;
            let mut sty = 0.0;
            for (a, b) in partials {
                yty += a;
                sty += b;
            }
            if sty > 0.0 {
                alpha_bb = yty / sty;
            }

            std::mem::swap(grad, grad_next);

            if !(numerics::all_finite(x) && numerics::all_finite(grad)) {
                status = SolveStatus::NumericalFailure;
                iterations = k + 1;
                break;
            }
        }

        Ok(SpgStats {
            status,
            iterations,
            alpha_bb,
        })
    }
}

#[allow(clippy::too_many_arguments)]
fn trial_objective(
    op: &DipoleOperator<'_>,
    problem: &DipoleProblem<'_>,
    x: &[f64],
    step: &[f64],
    alpha: f64,
    x_trial: &mut [f64],
    field: &mut [f64],
    options: &SpgOptions,
) -> f64 {
    x_trial
        .par_iter_mut()
        .zip(x.par_iter())
        .zip(step.par_iter())
        .for_each(|((t, &xi), &pi)| *t = xi + alpha * pi);
    problem
        .raw_loss(op, x_trial, field)
        .smooth_objective(options.nu, options.reg_l2)
}
