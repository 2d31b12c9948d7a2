use core::fmt;

use rayon::prelude::*;

use crate::numerics::{self, CHUNK_SIZE};
use crate::operator::DipoleOperator;
use crate::report::IterationReport;

const L0_TOL: f64 = 1e-20;

/// Errors while validating caller-provided buffers.
#[derive(Debug, Clone)]
pub enum ShapeError {
    /// The grid or dipole count is zero.
    EmptyDimensions { ngrid: usize, ndipoles: usize },
    /// A buffer has the wrong length.
    BufferLen {
        buffer: &'static str,
        expected: usize,
        actual: usize,
    },
    /// `single_direction` names a component outside `0..3`.
    DirectionOutOfRange { direction: usize },
    /// More placements requested than dipoles exist.
    TooManyPlacements { requested: usize, ndipoles: usize },
    /// A neighbor count of zero makes the variant degenerate.
    ZeroNeighbors,
    /// A backtracking period of zero never triggers a sweep.
    ZeroPeriod,
}

impl fmt::Display for ShapeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyDimensions { ngrid, ndipoles } => {
                write!(f, "empty dimensions: ngrid={ngrid}, ndipoles={ndipoles}")
            }
            Self::BufferLen {
                buffer,
                expected,
                actual,
            } => {
                write!(f, "{buffer} length {actual} does not match expected {expected}")
            }
            Self::DirectionOutOfRange { direction } => {
                write!(f, "single_direction {direction} is not a component in 0..3")
            }
            Self::TooManyPlacements { requested, ndipoles } => {
                write!(f, "{requested} placements requested for {ndipoles} dipoles")
            }
            Self::ZeroNeighbors => write!(f, "neighbor count must be at least 1"),
            Self::ZeroPeriod => write!(f, "backtracking period must be at least 1"),
        }
    }
}

impl std::error::Error for ShapeError {}

/// Errors specific to a solve call.
#[derive(Debug)]
pub enum SolveError {
    /// The provided iterate has the wrong length.
    DimensionMismatch { expected: usize, actual: usize },
    /// The problem dimensions do not match the solver's workspace.
    ProblemMismatch {
        solver: (usize, usize),
        problem: (usize, usize),
    },
}

impl fmt::Display for SolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DimensionMismatch { expected, actual } => {
                write!(f, "x length {actual} does not match expected {expected}")
            }
            Self::ProblemMismatch { solver, problem } => {
                write!(
                    f,
                    "problem dimensions (ngrid, ndipoles) = {problem:?} do not match solver {solver:?}"
                )
            }
        }
    }
}

impl std::error::Error for SolveError {}

/// Dense inputs for the ball-constrained quadratic solvers.
///
/// `a` is the forward operator, row-major `ngrid x 3N` with the three
/// columns of dipole `i` adjacent. `atb`, `m_proxy` and iterates are
/// dipole-major (`[3i..3i+3]` is dipole `i`); `m_maxima` holds the
/// per-dipole radius.
#[derive(Debug, Clone, Copy)]
pub struct DipoleProblem<'a> {
    a: &'a [f64],
    b: &'a [f64],
    atb: &'a [f64],
    m_proxy: &'a [f64],
    m_maxima: &'a [f64],
    ngrid: usize,
    ndipoles: usize,
}

impl<'a> DipoleProblem<'a> {
    /// Creates a validated problem view over caller-owned buffers.
    pub fn new(
        a: &'a [f64],
        b: &'a [f64],
        atb: &'a [f64],
        m_proxy: &'a [f64],
        m_maxima: &'a [f64],
        ngrid: usize,
        ndipoles: usize,
    ) -> Result<Self, ShapeError> {
        if ngrid == 0 || ndipoles == 0 {
            return Err(ShapeError::EmptyDimensions { ngrid, ndipoles });
        }
        let ncols = 3 * ndipoles;
        check_len("A", a, ngrid * ncols)?;
        check_len("b", b, ngrid)?;
        check_len("ATb", atb, ncols)?;
        check_len("m_proxy", m_proxy, ncols)?;
        check_len("m_maxima", m_maxima, ndipoles)?;
        Ok(Self {
            a,
            b,
            atb,
            m_proxy,
            m_maxima,
            ngrid,
            ndipoles,
        })
    }

    pub fn ngrid(&self) -> usize {
        self.ngrid
    }

    pub fn ndipoles(&self) -> usize {
        self.ndipoles
    }

    /// Number of moment components, `3 * ndipoles`.
    pub fn ncols(&self) -> usize {
        3 * self.ndipoles
    }

    pub fn b(&self) -> &'a [f64] {
        self.b
    }

    pub fn atb(&self) -> &'a [f64] {
        self.atb
    }

    pub fn m_proxy(&self) -> &'a [f64] {
        self.m_proxy
    }

    pub fn m_maxima(&self) -> &'a [f64] {
        self.m_maxima
    }

    pub(crate) fn operator(&self, parallelism: faer_core::Parallelism) -> DipoleOperator<'a> {
        DipoleOperator::from_validated(self.a, self.ngrid, self.ndipoles, parallelism)
    }

    /// Evaluates every loss term at `x`. `field` is `ngrid` scratch and
    /// receives `A x`.
    pub(crate) fn raw_loss(
        &self,
        op: &DipoleOperator<'_>,
        x: &[f64],
        field: &mut [f64],
    ) -> RawLoss {
        op.apply(x, field);
        let r2 = numerics::par_dist2(field, self.b);
        let prox = numerics::par_dist2(x, self.m_proxy);
        let l2 = numerics::par_norm2(x);
        let l1 = numerics::par_abs_sum(x);
        let l0_partials: Vec<f64> = self
            .m_proxy
            .par_chunks(CHUNK_SIZE)
            .map(|w| w.iter().filter(|v| v.abs() < L0_TOL).count() as f64)
            .collect();
        let l0_count: f64 = l0_partials.iter().sum();
        RawLoss {
            r2,
            prox,
            l2,
            l1,
            l0_count,
        }
    }
}

/// Unscaled loss terms shared by MwPGP, PQN and SPG.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RawLoss {
    pub(crate) r2: f64,
    pub(crate) prox: f64,
    pub(crate) l2: f64,
    pub(crate) l1: f64,
    pub(crate) l0_count: f64,
}

impl RawLoss {
    /// The smooth objective actually minimized,
    /// `0.5 ||Ax-b||^2 + 0.5 ||x-w||^2 / nu + reg_l2 ||x||^2`.
    pub(crate) fn smooth_objective(&self, nu: f64, reg_l2: f64) -> f64 {
        0.5 * self.r2 + 0.5 * self.prox / nu + reg_l2 * self.l2
    }

    /// Scales every term for reporting. L0 and L1 are reported but do not
    /// enter the objective.
    pub(crate) fn scaled(
        &self,
        nu: f64,
        reg_l0: f64,
        reg_l1: f64,
        reg_l2: f64,
    ) -> ScaledLoss {
        let r2 = 0.5 * self.r2;
        let prox = 0.5 * self.prox / nu;
        let l2 = reg_l2 * self.l2;
        ScaledLoss {
            r2,
            prox,
            l2,
            l1: reg_l1 * self.l1,
            l0: reg_l0 * self.l0_count,
            total: r2 + prox + l2,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct ScaledLoss {
    pub(crate) r2: f64,
    pub(crate) prox: f64,
    pub(crate) l2: f64,
    pub(crate) l1: f64,
    pub(crate) l0: f64,
    pub(crate) total: f64,
}

impl ScaledLoss {
    pub(crate) fn report(&self, iteration: usize) -> IterationReport {
        IterationReport {
            iteration,
            r2: self.r2,
            prox: Some(self.prox),
            l2: Some(self.l2),
            l1: Some(self.l1),
            l0: Some(self.l0),
            total: Some(self.total),
            coherence: None,
        }
    }
}

/// Dense inputs for the greedy (GPMO) solvers.
///
/// `a_t` is the transposed operator, row-major `3N x ngrid`, so the
/// `ngrid` samples of one moment component are contiguous.
#[derive(Debug, Clone, Copy)]
pub struct GpmoProblem<'a> {
    a_t: &'a [f64],
    b: &'a [f64],
    ngrid: usize,
    ndipoles: usize,
}

impl<'a> GpmoProblem<'a> {
    /// Creates a validated problem view over caller-owned buffers.
    pub fn new(
        a_t: &'a [f64],
        b: &'a [f64],
        ngrid: usize,
        ndipoles: usize,
    ) -> Result<Self, ShapeError> {
        if ngrid == 0 || ndipoles == 0 {
            return Err(ShapeError::EmptyDimensions { ngrid, ndipoles });
        }
        check_len("A^T", a_t, 3 * ndipoles * ngrid)?;
        check_len("b", b, ngrid)?;
        Ok(Self {
            a_t,
            b,
            ngrid,
            ndipoles,
        })
    }

    pub fn ngrid(&self) -> usize {
        self.ngrid
    }

    pub fn ndipoles(&self) -> usize {
        self.ndipoles
    }

    pub fn ncols(&self) -> usize {
        3 * self.ndipoles
    }

    pub fn b(&self) -> &'a [f64] {
        self.b
    }

    /// Column `j` of the forward operator, one component of one dipole.
    pub fn col(&self, j: usize) -> &'a [f64] {
        &self.a_t[j * self.ngrid..(j + 1) * self.ngrid]
    }
}

fn check_len(buffer: &'static str, data: &[f64], expected: usize) -> Result<(), ShapeError> {
    if data.len() != expected {
        return Err(ShapeError::BufferLen {
            buffer,
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}
