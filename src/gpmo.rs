//! Greedy projected matching pursuit (GPMO): binary, grid-aligned dipole
//! placement by repeated best-candidate selection.
//!
//! Shared mechanics live in [`GpmoState`]; the variants differ only in
//! how candidates are scored and committed. Placements are `+/-1` in a
//! single component per dipole; the magnitude cap is assumed folded into
//! the operator columns.

use rayon::prelude::*;

use crate::history::{HistoryRecorder, SolveHistory};
use crate::numerics;
use crate::problem::{GpmoProblem, ShapeError};
use crate::report::{IterationReport, ReporterSlot, Reporter};

/// Score value marking a slot that must never win the argmin.
pub(crate) const SCORE_SENTINEL: f64 = 1e50;

/// Options shared by the GPMO variants.
#[derive(Debug, Clone)]
pub struct GpmoOptions {
    /// Number of greedy placements to perform.
    pub num_magnets: usize,
    /// Requested history slots; at most `nhistory + 1` are filled.
    pub nhistory: usize,
    /// Restrict the search to one moment component.
    pub single_direction: Option<usize>,
    /// Emit per-snapshot diagnostics to stdout by default.
    pub verbose: bool,
}

impl Default for GpmoOptions {
    fn default() -> Self {
        Self {
            num_magnets: 0,
            nhistory: 20,
            single_direction: None,
            verbose: false,
        }
    }
}

/// Result of a GPMO run.
#[derive(Debug, Clone)]
pub struct GpmoOutcome {
    /// Binary placements, dipole-major: each dipole is all zero or has a
    /// single `+/-1` component.
    pub x: Vec<f64>,
    /// Recorded snapshots and data-fidelity values.
    pub history: SolveHistory,
}

/// Candidate chosen by an argmin over both orientation halves.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Candidate {
    /// Component index into the `3N` columns.
    pub(crate) index: usize,
    pub(crate) sign: f64,
}

pub(crate) struct GpmoState<'a> {
    pub(crate) problem: &'a GpmoProblem<'a>,
    /// Running residual `Am - b`, initialized to `-b`.
    pub(crate) residual: Vec<f64>,
    scores_plus: Vec<f64>,
    scores_minus: Vec<f64>,
    pub(crate) available: Vec<bool>,
    pub(crate) x: Vec<f64>,
    recorder: HistoryRecorder,
}

impl<'a> GpmoState<'a> {
    pub(crate) fn new(problem: &'a GpmoProblem<'a>, options: &GpmoOptions) -> Self {
        let ncols = problem.ncols();
        let residual = problem.b().iter().map(|&v| -v).collect();
        Self {
            problem,
            residual,
            scores_plus: vec![SCORE_SENTINEL; ncols],
            scores_minus: vec![SCORE_SENTINEL; ncols],
            available: vec![true; ncols],
            x: vec![0.0; ncols],
            recorder: HistoryRecorder::new(options.num_magnets, options.nhistory),
        }
    }

    /// Rescores every available component in the sweep window with both
    /// orientations of its column against the current residual.
    pub(crate) fn score_sweep(&mut self, start: usize, stride: usize) {
        let Self {
            problem,
            residual,
            scores_plus,
            scores_minus,
            available,
            ..
        } = self;
        let r: &[f64] = residual;
        scores_plus
            .par_iter_mut()
            .zip(scores_minus.par_iter_mut())
            .enumerate()
            .for_each(|(j, (plus, minus))| {
                if j < start || (j - start) % stride != 0 || !available[j] {
                    return;
                }
                let col = problem.col(j);
                let mut sum_plus = 0.0;
                let mut sum_minus = 0.0;
                for (&ri, &ci) in r.iter().zip(col.iter()) {
                    let up = ri + ci;
                    let down = ri - ci;
                    sum_plus += up * up;
                    sum_minus += down * down;
                }
                *plus = sum_plus;
                *minus = sum_minus;
            });
    }

    /// Split borrows for variant-specific scoring sweeps:
    /// `(problem, residual, available, scores_plus, scores_minus)`.
    pub(crate) fn scoring_parts(
        &mut self,
    ) -> (
        &'a GpmoProblem<'a>,
        &[f64],
        &[bool],
        &mut [f64],
        &mut [f64],
    ) {
        (
            self.problem,
            &self.residual,
            &self.available,
            &mut self.scores_plus,
            &mut self.scores_minus,
        )
    }

    /// Global argmin over both score halves; ties resolve to the positive
    /// orientation and the smallest component index.
    pub(crate) fn best_candidate(&self) -> Option<Candidate> {
        let plus = numerics::argmin(&self.scores_plus);
        let minus = numerics::argmin(&self.scores_minus);
        let best_plus = self.scores_plus[plus];
        let best_minus = self.scores_minus[minus];
        if best_plus.min(best_minus) >= SCORE_SENTINEL {
            return None;
        }
        if best_plus <= best_minus {
            Some(Candidate {
                index: plus,
                sign: 1.0,
            })
        } else {
            Some(Candidate {
                index: minus,
                sign: -1.0,
            })
        }
    }

    /// Commits one placement: writes the sign, folds the column into the
    /// residual and retires the whole dipole.
    pub(crate) fn place(&mut self, candidate: Candidate) {
        self.x[candidate.index] = candidate.sign;
        self.add_to_residual(candidate.index, candidate.sign);
        self.block(candidate.index / 3);
    }

    pub(crate) fn add_to_residual(&mut self, index: usize, sign: f64) {
        let col = self.problem.col(index);
        self.residual
            .par_iter_mut()
            .zip(col.par_iter())
            .for_each(|(ri, &ci)| *ri += sign * ci);
    }

    /// Removes a dipole's three components from play and poisons its six
    /// score slots.
    pub(crate) fn block(&mut self, dipole: usize) {
        for c in 0..3 {
            let j = 3 * dipole + c;
            self.available[j] = false;
            self.scores_plus[j] = SCORE_SENTINEL;
            self.scores_minus[j] = SCORE_SENTINEL;
        }
    }

    /// Returns a dipole's components to the search; scores refresh on the
    /// next sweep.
    pub(crate) fn release(&mut self, dipole: usize) {
        for c in 0..3 {
            self.available[3 * dipole + c] = true;
        }
    }

    pub(crate) fn r2(&self) -> f64 {
        0.5 * numerics::par_norm2(&self.residual)
    }

    /// Records and reports at the shared cadence.
    pub(crate) fn snapshot(
        &mut self,
        k: usize,
        reporter: &mut ReporterSlot<'_>,
        coherence: Option<f64>,
    ) {
        if !self.recorder.due(k) {
            return;
        }
        let r2 = self.r2();
        self.recorder.record(k, &self.x, r2, r2);
        if let Some(r) = reporter.as_mut() {
            r.on_iteration(&IterationReport {
                iteration: k,
                r2,
                prox: None,
                l2: None,
                l1: None,
                l0: None,
                total: None,
                coherence,
            });
        }
    }

    pub(crate) fn into_outcome(self) -> GpmoOutcome {
        GpmoOutcome {
            x: self.x,
            history: self.recorder.into_history(),
        }
    }
}

/// Sweep start and stride from the `single_direction` restriction.
pub(crate) fn sweep_bounds(options: &GpmoOptions) -> Result<(usize, usize), ShapeError> {
    match options.single_direction {
        None => Ok((0, 1)),
        Some(direction) if direction < 3 => Ok((direction, 3)),
        Some(direction) => Err(ShapeError::DirectionOutOfRange { direction }),
    }
}

pub(crate) fn check_placement_budget(
    problem: &GpmoProblem<'_>,
    options: &GpmoOptions,
) -> Result<(), ShapeError> {
    if options.num_magnets > problem.ndipoles() {
        return Err(ShapeError::TooManyPlacements {
            requested: options.num_magnets,
            ndipoles: problem.ndipoles(),
        });
    }
    Ok(())
}

/// Baseline GPMO: one binary placement per iteration, chosen by the
/// largest drop in `||Am - b||^2` over all available components and both
/// orientations.
pub fn gpmo_baseline(
    problem: &GpmoProblem<'_>,
    options: &GpmoOptions,
    reporter: Option<&mut dyn Reporter>,
) -> Result<GpmoOutcome, ShapeError> {
    let (start, stride) = sweep_bounds(options)?;
    check_placement_budget(problem, options)?;

    let mut state = GpmoState::new(problem, options);
    let mut reporter = ReporterSlot::new(reporter, options.verbose);

    for k in 0..options.num_magnets {
        state.score_sweep(start, stride);
        let Some(candidate) = state.best_candidate() else {
            break;
        };
        state.place(candidate);
        state.snapshot(k, &mut reporter, None);
    }

    reporter.finish();
    Ok(state.into_outcome())
}
