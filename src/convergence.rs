//! Mesh convergence study: nominal evaluation under scaled mesh densities.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;

use serde::Serialize;
use tracing::info;

use crate::error::{ProblemError, ProblemResult};
use crate::evaluate::{EvalContext, Evaluator};
use crate::io::CsvWriter;
use crate::problem::ProblemSpec;
use crate::runner::ToolRunner;

/// Ratios used when a study does not list its own.
pub const DEFAULT_RATIOS: [f64; 11] = [4.0, 3.0, 2.5, 2.0, 1.75, 1.5, 1.3, 1.2, 1.0, 0.9, 0.8];

const COLUMNS: [&str; 8] = [
    "ratio",
    "elapsed_s",
    "current_left",
    "current_center",
    "nodes",
    "elements",
    "voltage_input",
    "losses",
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConvergenceRow {
    pub ratio: f64,
    pub elapsed_s: f64,
    pub current_left: f64,
    pub current_center: f64,
    pub nodes: usize,
    pub elements: usize,
    pub voltage_input: f64,
    pub losses: f64,
}

pub fn scaled(defaults: &BTreeMap<String, f64>, ratio: f64) -> BTreeMap<String, f64> {
    defaults
        .iter()
        .map(|(name, value)| (name.clone(), ratio * value))
        .collect()
}

/// One nominal evaluation per ratio, each in a fresh context.
pub fn mesh_convergence<R: ToolRunner>(
    evaluator: &Evaluator<R>,
    spec: &ProblemSpec,
    defaults: &BTreeMap<String, f64>,
    ratios: &[f64],
) -> ProblemResult<Vec<ConvergenceRow>> {
    let mut rows = Vec::with_capacity(ratios.len());
    for &ratio in ratios {
        info!(ratio, "mesh convergence step");
        let study = spec.with_mesh_overrides(scaled(defaults, ratio));
        let mut ctx = EvalContext::new();

        let started = Instant::now();
        let result = evaluator.evaluate_nominal(&study, &mut ctx)?;
        let elapsed_s = started.elapsed().as_secs_f64();

        let mesh = ctx.mesh.ok_or(ProblemError::MeshParse)?;
        rows.push(ConvergenceRow {
            ratio,
            elapsed_s,
            current_left: result.current(1)?,
            current_center: result.current(2)?,
            nodes: mesh.nodes,
            elements: mesh.elements,
            voltage_input: result.voltage(0)?,
            losses: result.loss(0)?,
        });
    }
    Ok(rows)
}

pub fn write_csv(path: &Path, rows: &[ConvergenceRow]) -> ProblemResult<()> {
    let mut w = CsvWriter::create(path)?;
    w.write_header(&COLUMNS)?;
    for r in rows {
        w.write_row(&[
            format!("{}", r.ratio),
            format!("{:.3}", r.elapsed_s),
            format!("{:.10}", r.current_left),
            format!("{:.10}", r.current_center),
            r.nodes.to_string(),
            r.elements.to_string(),
            format!("{:.10e}", r.voltage_input),
            format!("{:.10e}", r.losses),
        ])?;
    }
    w.flush()
}
