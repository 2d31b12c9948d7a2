//! GPMO variants that consult the dipole-grid connectivity index:
//! multi-placement (a candidate drags its nearest available neighbors
//! along) and backtracking (periodic removal of adjacent opposite-sign
//! pairs, "wyrms").

use rayon::prelude::*;

use crate::gpmo::{check_placement_budget, sweep_bounds, GpmoOptions, GpmoOutcome, GpmoState};
use crate::knn::{connectivity_matrix, Connectivity, CONNECTIVITY_WIDTH};
use crate::problem::{GpmoProblem, ShapeError};
use crate::report::{emit_line, Reporter, ReporterSlot};

/// Walks a connectivity row collecting up to `nadjacent` available sites
/// for the given component: the nearest entries first, with unavailable
/// ones replaced by scanning the tail of the row. Returns early when the
/// row is exhausted.
fn for_each_site(
    row: &[usize],
    available: &[bool],
    component: usize,
    nadjacent: usize,
    mut visit: impl FnMut(usize),
) {
    let mut fallback = nadjacent;
    for &primary in row.iter().take(nadjacent) {
        let mut site = primary;
        while !available[3 * site + component] {
            if fallback >= row.len() {
                return;
            }
            site = row[fallback];
            fallback += 1;
        }
        visit(site);
    }
}

/// Multi-placement GPMO: every candidate is scored and committed together
/// with its `nadjacent - 1` nearest still-available neighbors, all with
/// the same component and sign.
pub fn gpmo_multi(
    problem: &GpmoProblem<'_>,
    dipole_grid_xyz: &[f64],
    nadjacent: usize,
    options: &GpmoOptions,
    reporter: Option<&mut dyn Reporter>,
) -> Result<GpmoOutcome, ShapeError> {
    let (start, stride) = sweep_bounds(options)?;
    check_placement_budget(problem, options)?;
    if nadjacent == 0 {
        return Err(ShapeError::ZeroNeighbors);
    }
    let connectivity =
        connectivity_matrix(dipole_grid_xyz, problem.ndipoles(), CONNECTIVITY_WIDTH)?;

    let mut state = GpmoState::new(problem, options);
    let mut reporter = ReporterSlot::new(reporter, options.verbose);
    let mut sites = Vec::with_capacity(nadjacent);

    for k in 0..options.num_magnets {
        multi_score_sweep(&mut state, &connectivity, nadjacent, start, stride);
        let Some(candidate) = state.best_candidate() else {
            break;
        };
        let component = candidate.index % 3;

        // Re-walk the neighbor list at commit time; availability may
        // differ from older sweeps but matches the winning score's walk.
        sites.clear();
        for_each_site(
            connectivity.neighbors(candidate.index / 3),
            &state.available,
            component,
            nadjacent,
            |site| sites.push(site),
        );
        for &site in &sites {
            state.x[3 * site + component] = candidate.sign;
            state.add_to_residual(3 * site + component, candidate.sign);
            state.block(site);
        }

        state.snapshot(k, &mut reporter, None);
    }

    reporter.finish();
    Ok(state.into_outcome())
}

fn multi_score_sweep(
    state: &mut GpmoState<'_>,
    connectivity: &Connectivity,
    nadjacent: usize,
    start: usize,
    stride: usize,
) {
    let (problem, residual, available, scores_plus, scores_minus) = state.scoring_parts();
    scores_plus
        .par_iter_mut()
        .zip(scores_minus.par_iter_mut())
        .enumerate()
        .for_each(|(j, (plus, minus))| {
            if j < start || (j - start) % stride != 0 || !available[j] {
                return;
            }
            let component = j % 3;
            let mut sum_plus = 0.0;
            let mut sum_minus = 0.0;
            for_each_site(
                connectivity.neighbors(j / 3),
                available,
                component,
                nadjacent,
                |site| {
                    let col = problem.col(3 * site + component);
                    for (&ri, &ci) in residual.iter().zip(col.iter()) {
                        let up = ri + ci;
                        let down = ri - ci;
                        sum_plus += up * up;
                        sum_minus += down * down;
                    }
                },
            );
            *plus = sum_plus;
            *minus = sum_minus;
        });
}

/// Backtracking GPMO: baseline placement, but every `period` iterations
/// adjacent equal-axis, opposite-sign pairs are removed and their dipoles
/// returned to the search.
pub fn gpmo_backtracking(
    problem: &GpmoProblem<'_>,
    dipole_grid_xyz: &[f64],
    nadjacent: usize,
    period: usize,
    options: &GpmoOptions,
    reporter: Option<&mut dyn Reporter>,
) -> Result<GpmoOutcome, ShapeError> {
    let (start, stride) = sweep_bounds(options)?;
    check_placement_budget(problem, options)?;
    if nadjacent == 0 {
        return Err(ShapeError::ZeroNeighbors);
    }
    if period == 0 {
        return Err(ShapeError::ZeroPeriod);
    }
    let connectivity =
        connectivity_matrix(dipole_grid_xyz, problem.ndipoles(), CONNECTIVITY_WIDTH)?;

    let ndipoles = problem.ndipoles();
    let mut state = GpmoState::new(problem, options);
    let mut reporter = ReporterSlot::new(reporter, options.verbose);
    // Per-dipole sign and component of the current placement; sign 0
    // means empty (or already de-wyrmed once).
    let mut sign_of = vec![0.0f64; ndipoles];
    let mut component_of = vec![0usize; ndipoles];
    let mut placed: Vec<usize> = Vec::with_capacity(options.num_magnets);

    for k in 0..options.num_magnets {
        state.score_sweep(start, stride);
        let Some(candidate) = state.best_candidate() else {
            break;
        };
        let dipole = candidate.index / 3;
        state.place(candidate);
        sign_of[dipole] = candidate.sign;
        component_of[dipole] = candidate.index % 3;
        placed.push(dipole);

        if k > 0 && k % period == 0 {
            let removed = remove_wyrms(
                &mut state,
                &connectivity,
                nadjacent,
                &placed,
                &mut sign_of,
                &component_of,
            );
            if options.verbose {
                emit_line(&format!(
                    "{removed} wyrms removed out of {period} possible dipoles"
                ));
            }
        }

        state.snapshot(k, &mut reporter, None);
    }

    reporter.finish();
    Ok(state.into_outcome())
}

/// One backtracking sweep over the placement log. A wyrm is an adjacent
/// pair with the same component and opposite signs; the first wyrm per
/// source dipole is removed and both dipoles' signs zeroed so the pair
/// cannot re-trigger.
fn remove_wyrms(
    state: &mut GpmoState<'_>,
    connectivity: &Connectivity,
    nadjacent: usize,
    placed: &[usize],
    sign_of: &mut [f64],
    component_of: &[usize],
) -> usize {
    let mut removed = 0;
    for &source in placed {
        if sign_of[source] == 0.0 {
            continue;
        }
        let neighbors = connectivity.neighbors(source);
        for &other in neighbors.iter().take(nadjacent.min(neighbors.len())) {
            if sign_of[other] != -sign_of[source] || component_of[other] != component_of[source] {
                continue;
            }
            let source_index = 3 * source + component_of[source];
            let other_index = 3 * other + component_of[other];
            state.x[source_index] = 0.0;
            state.x[other_index] = 0.0;
            state.add_to_residual(source_index, -sign_of[source]);
            state.add_to_residual(other_index, -sign_of[other]);
            state.release(source);
            state.release(other);
            sign_of[source] = 0.0;
            sign_of[other] = 0.0;
            removed += 1;
            break;
        }
    }
    removed
}
