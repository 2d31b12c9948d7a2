//! Permanent-magnet layout optimization kernels.
//!
//! This crate solves for sparse, bounded, grid-aligned dipole moments `m`
//! minimizing `0.5 * ||Am - b||^2` plus regularizers, where `A` maps
//! candidate moments on a fixed grid to a target field residual. Two
//! families of solvers share one dense data model:
//!
//! - Ball-constrained smooth solvers for the relax-and-split convex step:
//!   [`MwpgpSolver`] (projected conjugate gradients), [`PqnSolver`]
//!   (projected quasi-Newton) and its inner [`SpgSolver`] (spectral
//!   projected gradient).
//! - Greedy matching-pursuit placement with binary, grid-aligned
//!   moments: [`gpmo_baseline`], [`gpmo_multi`], [`gpmo_backtracking`]
//!   and [`gpmo_mc`], backed by the [`connectivity_matrix`]
//!   nearest-neighbor index.
//!
//! Calling it:
//! - Wrap caller-owned dense buffers in a [`DipoleProblem`] (quadratic
//!   solvers, `A` row-major `ngrid x 3N`) or a [`GpmoProblem`] (greedy
//!   solvers, transposed layout).
//! - Construct a solver for the problem size, or call a `gpmo_*`
//!   function directly, and inspect the returned stats and
//!   [`SolveHistory`].
//!
//! Example:
//! ```rust,no_run
//! use pm_opt_rs::{gpmo_baseline, GpmoOptions, GpmoProblem};
//!
//! // One dipole, one field sample: columns of A^T are [2], [0], [0].
//! let a_t = [2.0, 0.0, 0.0];
//! let b = [-2.0];
//! let problem = GpmoProblem::new(&a_t, &b, 1, 1).unwrap();
//! let options = GpmoOptions {
//!     num_magnets: 1,
//!     ..GpmoOptions::default()
//! };
//! let outcome = gpmo_baseline(&problem, &options, None).unwrap();
//! assert_eq!(outcome.x[0], -1.0);
//! ```

mod ball;
mod gpmo;
mod gpmo_mc;
mod gpmo_neighbors;
mod history;
mod knn;
mod mwpgp;
mod numerics;
mod operator;
mod pqn;
mod problem;
mod report;
mod spg;

pub use ball::{
    active_gradient, free_gradient, max_feasible_step, on_ball, project_l2_ball,
    reduced_gradient, reduced_projected_gradient, UNBOUNDED_STEP,
};
pub use gpmo::{gpmo_baseline, GpmoOptions, GpmoOutcome};
pub use gpmo_mc::gpmo_mc;
pub use gpmo_neighbors::{gpmo_backtracking, gpmo_multi};
pub use history::SolveHistory;
pub use knn::{connectivity_matrix, Connectivity, CONNECTIVITY_WIDTH};
pub use mwpgp::{MwpgpOptions, MwpgpSolver, MwpgpStats};
pub use operator::DipoleOperator;
pub use pqn::{PqnOptions, PqnSolver, PqnStats};
pub use problem::{DipoleProblem, GpmoProblem, ShapeError, SolveError};
pub use report::{IterationReport, Reporter, SolveStatus, StdoutReporter};
pub use spg::{SpgOptions, SpgSolver, SpgStats};
