//! Modified weighted projected gradient (MwPGP) solver for the convex,
//! ball-constrained subproblem
//! `0.5 ||Am - b||^2 + reg_l2 ||m||^2 + 0.5 ||m - w||^2 / nu`.
//!
//! Per iteration the method picks one of three steps from the relative
//! size of the reduced projected gradient: a conjugate-gradient step on
//! the free set, an expansion step that rides the search direction to the
//! ball boundary, or a plain projected-gradient step. See Bouchala et
//! al., "On the solution of convex QPQC problems with elliptic and other
//! separable constraints with strong curvature", Appl. Math. Comput. 247
//! (2014).

use faer_core::Parallelism;
use rayon::prelude::*;

use crate::ball;
use crate::history::{HistoryRecorder, SolveHistory};
use crate::numerics::{self, dipole, dot3, norm2_3};
use crate::operator::DipoleOperator;
use crate::problem::{DipoleProblem, SolveError, ShapeError};
use crate::report::{emit_line, Reporter, ReporterSlot, SolveStatus};

/// History slots recorded over a full MwPGP run.
const HISTORY_SLOTS: usize = 20;

/// Options controlling an MwPGP solve.
#[derive(Debug, Clone)]
pub struct MwpgpOptions {
    /// Projected-gradient step size.
    pub alpha: f64,
    /// Relax-and-split weight on the proximal term.
    pub nu: f64,
    /// Converge when `sum |x - x_prev| < epsilon`.
    pub epsilon: f64,
    /// L0 weight, reported only.
    pub reg_l0: f64,
    /// L1 weight, reported only.
    pub reg_l1: f64,
    /// L2 weight on `||m||^2`.
    pub reg_l2: f64,
    /// Maximum number of iterations.
    pub max_iter: usize,
    /// Stop once the recorded data-fidelity term drops below this.
    pub min_fb: f64,
    /// Emit per-snapshot diagnostics to stdout by default.
    pub verbose: bool,
}

impl Default for MwpgpOptions {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            nu: 1e100,
            epsilon: 1e-4,
            reg_l0: 0.0,
            reg_l1: 0.0,
            reg_l2: 0.0,
            max_iter: 100,
            min_fb: 0.0,
            verbose: false,
        }
    }
}

/// Summary of an MwPGP solve.
#[derive(Debug, Clone)]
pub struct MwpgpStats {
    /// Termination status.
    pub status: SolveStatus,
    /// Number of completed iterations.
    pub iterations: usize,
    /// Recorded snapshots and loss values.
    pub history: SolveHistory,
}

/// MwPGP solver with preallocated workspace for a fixed problem size.
pub struct MwpgpSolver {
    ngrid: usize,
    ndipoles: usize,
    parallelism: Parallelism,
    g: Vec<f64>,
    p: Vec<f64>,
    atap: Vec<f64>,
    x_prev: Vec<f64>,
    atb_rs: Vec<f64>,
    field: Vec<f64>,
    dipole_stats: Vec<[f64; 4]>,
    alpha_fs: Vec<f64>,
    gamma_terms: Vec<f64>,
}

impl MwpgpSolver {
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
            g: vec![0.0; ncols],
            p: vec![0.0; ncols],
            atap: vec![0.0; ncols],
            x_prev: vec![0.0; ncols],
            atb_rs: vec![0.0; ncols],
            field: vec![0.0; ngrid],
            dipole_stats: vec![[0.0; 4]; ndipoles],
            alpha_fs: vec![0.0; ndipoles],
            gamma_terms: vec![0.0; ndipoles],
        })
    }

    /// Minimizes the composite objective over the product of L2 balls.
    ///
    /// `x` enters as the start iterate `m0` and leaves as the solution.
    pub fn solve(
        &mut self,
        problem: &DipoleProblem<'_>,
        x: &mut [f64],
        options: &MwpgpOptions,
        reporter: Option<&mut dyn Reporter>,
    ) -> Result<MwpgpStats, SolveError> {
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
        let alpha = options.alpha;
        let shift = 2.0 * (options.reg_l2 + 1.0 / (2.0 * options.nu));

        let Self {
            g,
            p,
            atap,
            x_prev,
            atb_rs,
            field,
            dipole_stats,
            alpha_fs,
            gamma_terms,
            ..
        } = self;

        // ATb plus the relax-and-split contribution, fixed for the solve.
        atb_rs
            .par_iter_mut()
            .zip(problem.atb().par_iter())
            .zip(problem.m_proxy().par_iter())
            .for_each(|((t, &atb), &w)| *t = atb + w / options.nu);

        refresh_gradient(&op, x, shift, atb_rs, field, g);
        set_free_direction(p, x, g, m_maxima);

        let mut recorder = HistoryRecorder::new(options.max_iter, HISTORY_SLOTS);
        let mut reporter = ReporterSlot::new(reporter, options.verbose);
        let mut status = SolveStatus::MaxIterations;
        let mut iterations = options.max_iter;

        for k in 0..options.max_iter {
            x_prev.copy_from_slice(x);

            op.normal_apply(p, shift, field, atap);

            // One fused pass per dipole over the quantities the branch
            // decision needs.
            {
                let x_now: &[f64] = x;
                dipole_stats
                    .par_iter_mut()
                    .zip(alpha_fs.par_iter_mut())
                    .enumerate()
                    .for_each(|(i, (stats, alpha_f))| {
                        let radius = m_maxima[i];
                        let xi = dipole(x_now, i);
                        let gi = dipole(g, i);
                        let pi = dipole(p, i);
                        let rpg = ball::reduced_projected_gradient(xi, gi, alpha, radius);
                        let free = ball::free_gradient(xi, gi, radius);
                        *stats = [
                            norm2_3(rpg),
                            norm2_3(free),
                            dot3(gi, pi),
                            dot3(pi, dipole(atap, i)),
                        ];
                        *alpha_f = ball::max_feasible_step(xi, pi, radius);
                    });
            }
            let mut norm_rpg = 0.0;
            let mut norm_free = 0.0;
            let mut gp = 0.0;
            let mut patap = 0.0;
            for stats in dipole_stats.iter() {
                norm_rpg += stats[0];
                norm_free += stats[1];
                gp += stats[2];
                patap += stats[3];
            }
            let alpha_f = alpha_fs.iter().copied().fold(f64::INFINITY, f64::min);

            if norm_rpg <= norm_free {
                // Non-positive curvature disables the conjugate step.
                let conjugate = patap > 0.0 && gp / patap < alpha_f;
                if conjugate {
                    let alpha_cg = gp / patap;
                    x.par_iter_mut()
                        .zip(p.par_iter())
                        .for_each(|(xi, &pi)| *xi -= alpha_cg * pi);
                    // Incremental gradient update keeps the conjugate
                    // recurrence consistent.
                    g.par_iter_mut()
                        .zip(atap.par_iter())
                        .for_each(|(gi, &ai)| *gi -= alpha_cg * ai);

                    {
                        let x_now: &[f64] = x;
                        gamma_terms.par_iter_mut().enumerate().for_each(|(i, t)| {
                            let free = ball::free_gradient(
                                dipole(x_now, i),
                                dipole(g, i),
                                m_maxima[i],
                            );
                            *t = dot3(free, dipole(atap, i));
                        });
                    }
                    let gamma = gamma_terms.iter().sum::<f64>() / patap;
                    {
                        let x_now: &[f64] = x;
                        p.par_chunks_mut(3).enumerate().for_each(|(i, pc)| {
                            let free = ball::free_gradient(
                                dipole(x_now, i),
                                dipole(g, i),
                                m_maxima[i],
                            );
                            for c in 0..3 {
                                pc[c] = free[c] - gamma * pc[c];
                            }
                        });
                    }
                } else {
                    // Expansion: ride p to the boundary, take a gradient
                    // step from there, then project back.
                    x.par_chunks_mut(3).enumerate().for_each(|(i, xc)| {
                        let radius = m_maxima[i];
                        let mut v = [0.0; 3];
                        for c in 0..3 {
                            let j = 3 * i + c;
                            v[c] = (xc[c] - alpha_f * p[j]) - alpha * (g[j] - alpha_f * atap[j]);
                        }
                        xc.copy_from_slice(&ball::project_l2_ball(v, radius));
                    });
                    refresh_gradient(&op, x, shift, atb_rs, field, g);
                    set_free_direction(p, x, g, m_maxima);
                }
            } else {
                // Projected gradient descent step.
                x.par_chunks_mut(3).enumerate().for_each(|(i, xc)| {
                    let radius = m_maxima[i];
                    let mut v = [0.0; 3];
                    for c in 0..3 {
                        v[c] = xc[c] - alpha * g[3 * i + c];
                    }
                    xc.copy_from_slice(&ball::project_l2_ball(v, radius));
                });
                refresh_gradient(&op, x, shift, atb_rs, field, g);
                set_free_direction(p, x, g, m_maxima);
            }

            if recorder.due(k) {
                let loss = problem
                    .raw_loss(&op, x, field)
                    .scaled(options.nu, options.reg_l0, options.reg_l1, options.reg_l2);
                recorder.record(k, x, loss.r2, loss.total);
                if let Some(r) = reporter.as_mut() {
                    r.on_iteration(&loss.report(k));
                }
                if loss.r2 < options.min_fb {
                    status = SolveStatus::BelowMinFb;
                    iterations = k + 1;
                    break;
                }
            }

            if !(numerics::all_finite(x) && numerics::all_finite(g)) {
                status = SolveStatus::NumericalFailure;
                iterations = k + 1;
                break;
            }

            if numerics::par_abs_diff_sum(x, x_prev) < options.epsilon {
                if options.verbose {
                    emit_line(&format!("MwPGP ended early, at iteration {k}"));
                }
                status = SolveStatus::Converged;
                iterations = k + 1;
                break;
            }
        }

        reporter.finish();
        Ok(MwpgpStats {
            status,
            iterations,
            history: recorder.into_history(),
        })
    }
}

fn refresh_gradient(
    op: &DipoleOperator<'_>,
    x: &[f64],
    shift: f64,
    atb_rs: &[f64],
    field: &mut [f64],
    g: &mut [f64],
) {
    op.normal_apply(x, shift, field, g);
    g.iter_mut()
        .zip(atb_rs.iter())
        .for_each(|(gi, &t)| *gi -= t);
}

fn set_free_direction(p: &mut [f64], x: &[f64], g: &[f64], m_maxima: &[f64]) {
    p.par_chunks_mut(3).enumerate().for_each(|(i, pc)| {
        let free = ball::free_gradient(dipole(x, i), dipole(g, i), m_maxima[i]);
        pc.copy_from_slice(&free);
    });
}
