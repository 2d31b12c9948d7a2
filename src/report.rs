use comfy_table::{presets, Cell, CellAlignment, ContentArrangement, Table};

/// Solver termination status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveStatus {
    /// The iterate stopped moving within tolerance.
    Converged,
    /// The data-fidelity term dropped below `min_fb` at a snapshot.
    BelowMinFb,
    /// Reached the iteration limit.
    MaxIterations,
    /// NaN or Inf encountered in the iterate or gradient.
    NumericalFailure,
}

/// Per-iteration diagnostics.
///
/// The quadratic solvers fill every loss term; the greedy solvers fill
/// only `r2` (plus `coherence` for the mutual-coherence variant).
#[derive(Debug, Clone)]
pub struct IterationReport {
    /// Iteration index, starting at 0.
    pub iteration: usize,
    /// Data-fidelity term, `0.5 ||Am - b||^2`.
    pub r2: f64,
    /// Proximal term `0.5 ||m - w||^2 / nu`.
    pub prox: Option<f64>,
    /// Scaled L2 term.
    pub l2: Option<f64>,
    /// Scaled L1 term (reported, not minimized).
    pub l1: Option<f64>,
    /// Scaled L0 term (reported, not minimized).
    pub l0: Option<f64>,
    /// Composite objective.
    pub total: Option<f64>,
    /// Running max mutual coherence (GPMO-MC only).
    pub coherence: Option<f64>,
}

pub(crate) fn emit_line(line: &str) {
    if log::log_enabled!(log::Level::Info) {
        log::info!("{line}");
    } else {
        println!("{line}");
    }
}

/// Receives iteration updates from a solver.
pub trait Reporter {
    /// Called at every history snapshot.
    fn on_iteration(&mut self, report: &IterationReport);
    /// Called once after the solver exits.
    fn on_finish(&mut self) {}
}

/// Reporter that prints the classic column stream to stdout or the log,
/// plus a UTF-8 recap table on finish.
pub struct StdoutReporter {
    rows: Vec<IterationReport>,
    header_written: bool,
}

impl StdoutReporter {
    pub fn new() -> Self {
        Self {
            rows: Vec::new(),
            header_written: false,
        }
    }
}

impl Default for StdoutReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl Reporter for StdoutReporter {
    fn on_iteration(&mut self, report: &IterationReport) {
        if !self.header_written {
            emit_line(header_for(report));
            self.header_written = true;
        }
        emit_line(&format_row(report));
        self.rows.push(report.clone());
    }

    fn on_finish(&mut self) {
        if self.rows.is_empty() {
            return;
        }
        if !log::log_enabled!(log::Level::Info) {
            println!();
        }
        let mut table = Table::new();
        table.load_preset(presets::UTF8_FULL);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(vec![
            Cell::new("iter").set_alignment(CellAlignment::Right),
            Cell::new("|Am - b|^2").set_alignment(CellAlignment::Right),
            Cell::new("total").set_alignment(CellAlignment::Right),
        ]);
        for row in &self.rows {
            let total = row
                .total
                .map(|t| format!("{t:.4e}"))
                .unwrap_or_else(|| "-".to_string());
            table.add_row(vec![
                Cell::new(row.iteration).set_alignment(CellAlignment::Right),
                Cell::new(format!("{:.4e}", row.r2)).set_alignment(CellAlignment::Right),
                Cell::new(total).set_alignment(CellAlignment::Right),
            ]);
        }
        for line in table.to_string().lines() {
            emit_line(line);
        }
        self.rows.clear();
        self.header_written = false;
    }
}

fn header_for(report: &IterationReport) -> &'static str {
    if report.total.is_some() {
        "Iteration ... |Am - b|^2 ... |m-w|^2/v ...   a|m|^2 ...  b|m-1|^2 ...   c|m|_1 ...   d|m|_0 ... Total Error:"
    } else {
        "Iteration ... |Am - b|^2"
    }
}

fn format_row(report: &IterationReport) -> String {
    use std::fmt::Write;

    let mut line = format!("{} ... {:.2e}", report.iteration, report.r2);
    if let (Some(prox), Some(l2), Some(l1), Some(l0), Some(total)) =
        (report.prox, report.l2, report.l1, report.l0, report.total)
    {
        let _ = write!(
            line,
            " ... {prox:.2e} ... {l2:.2e} ... {l1:.2e} ... {l0:.2e} ... {total:.2e}"
        );
    }
    if let Some(coherence) = report.coherence {
        let _ = write!(line, " ... {coherence:.2e}");
    }
    line
}

/// Routes reporting to an external reporter, a local stdout reporter when
/// verbose, or nothing.
pub(crate) enum ReporterSlot<'a> {
    External(&'a mut dyn Reporter),
    Local(StdoutReporter),
    None,
}

impl<'a> ReporterSlot<'a> {
    pub(crate) fn new(reporter: Option<&'a mut dyn Reporter>, verbose: bool) -> Self {
        match reporter {
            Some(r) => Self::External(r),
            None if verbose => Self::Local(StdoutReporter::new()),
            None => Self::None,
        }
    }

    pub(crate) fn as_mut(&mut self) -> Option<&mut dyn Reporter> {
        match self {
            Self::External(r) => Some(*r),
            Self::Local(r) => Some(r),
            Self::None => None,
        }
    }

    pub(crate) fn finish(&mut self) {
        if let Some(r) = self.as_mut() {
            r.on_finish();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_use_the_exponent_format() {
        let full = IterationReport {
            iteration: 3,
            r2: 40.5,
            prox: Some(0.0),
            l2: Some(0.0),
            l1: Some(1.0),
            l0: Some(0.0),
            total: Some(40.5),
            coherence: None,
        };
        let line = format_row(&full);
        assert!(line.starts_with("3 ... 4.05e1"));
        assert_eq!(line.matches(" ... ").count(), 6);

        let greedy = IterationReport {
            iteration: 0,
            r2: 2.0,
            prox: None,
            l2: None,
            l1: None,
            l0: None,
            total: None,
            coherence: Some(0.5),
        };
        assert_eq!(format_row(&greedy), "0 ... 2.00e0 ... 5.00e-1");
        assert_eq!(header_for(&greedy), "Iteration ... |Am - b|^2");
    }
}
