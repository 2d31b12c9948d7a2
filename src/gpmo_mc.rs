//! Mutual-coherence GPMO: candidates are ranked by the correlation
//! `u = A^T (b - Am)` instead of a full residual sweep, in the style of
//! binary matching pursuit. The orientation is still decided by the
//! residual-drop comparison of the baseline variant.

use rayon::prelude::*;

use crate::gpmo::{check_placement_budget, Candidate, GpmoOptions, GpmoOutcome, GpmoState};
use crate::numerics::{self, dot};
use crate::problem::{GpmoProblem, ShapeError};
use crate::report::{Reporter, ReporterSlot};

/// GPMO variant selecting the available component with the largest
/// `|u[j]|` for `u = A^T (b - Am)`.
///
/// `atb` seeds `u` and is consumed as a flat `3N` buffer. The search is
/// never direction-restricted; `single_direction` is ignored. Reported
/// alongside the data fidelity is the running maximum coherence between
/// the chosen columns and the rest of the dictionary, normalized by the
/// column 1-norms.
pub fn gpmo_mc(
    problem: &GpmoProblem<'_>,
    atb: &[f64],
    options: &GpmoOptions,
    reporter: Option<&mut dyn Reporter>,
) -> Result<GpmoOutcome, ShapeError> {
    check_placement_budget(problem, options)?;
    let ncols = problem.ncols();
    if atb.len() != ncols {
        return Err(ShapeError::BufferLen {
            buffer: "ATb",
            expected: ncols,
            actual: atb.len(),
        });
    }

    let mut state = GpmoState::new(problem, options);
    let mut reporter = ReporterSlot::new(reporter, options.verbose);
    let mut u = atb.to_vec();
    let mut coherence_terms = vec![0.0f64; ncols];
    let mut max_coherence = 0.0f64;

    // Column 1-norms used to normalize the coherence report.
    let column_l1: Vec<f64> = (0..ncols)
        .into_par_iter()
        .map(|j| problem.col(j).iter().map(|v| v.abs()).sum())
        .collect();

    for k in 0..options.num_magnets {
        let Some(index) = argmax_available(&u, &state.available) else {
            break;
        };

        // Orientation by the same residual-drop comparison as baseline.
        let col = problem.col(index);
        let (plus, minus) = orientation_scores(&state.residual, col);
        let sign = if minus < plus { -1.0 } else { 1.0 };
        state.place(Candidate { index, sign });

        // Correlation update; the dot products double as the coherence
        // terms for this round.
        {
            let available: &[bool] = &state.available;
            u.par_iter_mut()
                .zip(coherence_terms.par_iter_mut())
                .enumerate()
                .for_each(|(j, (uj, coherence))| {
                    *coherence = 0.0;
                    if available[j] {
                        let ata = dot(problem.col(j), col);
                        *uj -= sign * ata;
                        *coherence = ata.abs() / (column_l1[j] * column_l1[index]);
                    }
                });
        }
        let round_max = coherence_terms
            .iter()
            .copied()
            .fold(0.0f64, f64::max);
        max_coherence = max_coherence.max(round_max);

        state.snapshot(k, &mut reporter, Some(max_coherence));
    }

    reporter.finish();
    Ok(state.into_outcome())
}

/// Largest `|u[j]|` among available components, smallest index on ties.
fn argmax_available(u: &[f64], available: &[bool]) -> Option<usize> {
    let mut best = None;
    let mut best_value = f64::NEG_INFINITY;
    for (j, &uj) in u.iter().enumerate() {
        if available[j] && uj.abs() > best_value {
            best = Some(j);
            best_value = uj.abs();
        }
    }
    best
}

fn orientation_scores(residual: &[f64], col: &[f64]) -> (f64, f64) {
    let partials: Vec<(f64, f64)> = residual
        .par_chunks(numerics::CHUNK_SIZE)
        .zip(col.par_chunks(numerics::CHUNK_SIZE))
        .map(|(r, c)| {
            let mut plus = 0.0;
            let mut minus = 0.0;
            for (&ri, &ci) in r.iter().zip(c.iter()) {
                let up = ri + ci;
                let down = ri - ci;
                plus += up * up;
                minus += down * down;
            }
            (plus, minus)
        })
        .collect();
    let mut plus = 0.0;
    let mut minus = 0.0;
    for (a, b) in partials {
        plus += a;
        minus += b;
    }
    (plus, minus)
}
