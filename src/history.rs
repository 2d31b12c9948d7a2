//! Fixed-cadence snapshot recording shared by every solver.
//!
//! With `H` requested slots over `K` iterations, snapshots land at
//! iterations `0, e, 2e, ...` for `e = max(1, K / H)` plus the final
//! iteration, never exceeding `H + 1` entries. Early termination leaves
//! a shorter history, which is how callers distinguish the three normal
//! exit paths.

/// Recorded trajectory of a solve.
#[derive(Debug, Clone, Default)]
pub struct SolveHistory {
    /// Iteration index of each snapshot, strictly increasing.
    pub iterations: Vec<usize>,
    /// Composite objective at each snapshot. Greedy solvers record the
    /// data-fidelity term here as well.
    pub objective: Vec<f64>,
    /// Data-fidelity term `0.5 ||Am - b||^2` at each snapshot.
    pub r2: Vec<f64>,
    /// Full copies of the moment vector, dipole-major, one per snapshot.
    pub snapshots: Vec<Vec<f64>>,
}

impl SolveHistory {
    /// Number of recorded snapshots.
    pub fn len(&self) -> usize {
        self.iterations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.iterations.is_empty()
    }
}

pub(crate) struct HistoryRecorder {
    every: usize,
    total: usize,
    capacity: usize,
    history: SolveHistory,
}

impl HistoryRecorder {
    pub(crate) fn new(total_iterations: usize, slots: usize) -> Self {
        let slots = slots.max(1);
        let capacity = slots + 1;
        Self {
            every: (total_iterations / slots).max(1),
            total: total_iterations,
            capacity,
            history: SolveHistory {
                iterations: Vec::with_capacity(capacity),
                objective: Vec::with_capacity(capacity),
                r2: Vec::with_capacity(capacity),
                snapshots: Vec::with_capacity(capacity),
            },
        }
    }

    pub(crate) fn due(&self, k: usize) -> bool {
        if self.history.iterations.len() >= self.capacity {
            return false;
        }
        k == 0 || k + 1 == self.total || k % self.every == 0
    }

    pub(crate) fn record(&mut self, k: usize, m: &[f64], r2: f64, objective: f64) {
        self.history.iterations.push(k);
        self.history.objective.push(objective);
        self.history.r2.push(r2);
        self.history.snapshots.push(m.to_vec());
    }

    pub(crate) fn into_history(self) -> SolveHistory {
        self.history
    }
}
