//! Mesh → solve → read pipeline, run once per parameter vector.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::diagnostics::{self, MeshDiagnostics};
use crate::error::{ProblemError, ProblemResult};
use crate::history::EvaluationLog;
use crate::problem::{ParameterVector, ProblemSpec};
use crate::results::{self, EvaluationResult};
use crate::runner::{setnumber_args, ProcessRunner, ToolRunner};

/// Mesher flag for a 2-D mesh.
const MESH_2D_FLAG: &str = "-2";

/// Executables and the acknowledgement prefix length.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Toolchain {
    #[serde(default = "default_mesher")]
    pub mesher: String,
    #[serde(default = "default_solver")]
    pub solver: String,
    #[serde(default = "default_ack_prefix_len")]
    pub ack_prefix_len: usize,
}

fn default_mesher() -> String {
    "gmsh".to_string()
}

fn default_solver() -> String {
    "getdp".to_string()
}

fn default_ack_prefix_len() -> usize {
    3
}

impl Default for Toolchain {
    fn default() -> Self {
        Self {
            mesher: default_mesher(),
            solver: default_solver(),
            ack_prefix_len: default_ack_prefix_len(),
        }
    }
}

/// State accumulated across evaluations of one run.
#[derive(Debug, Clone, Default)]
pub struct EvalContext {
    /// Evaluations attempted, failed ones included.
    pub counter: usize,
    pub log: EvaluationLog,
    /// Result of the last successful evaluation.
    pub current: Option<EvaluationResult>,
    /// Mesh produced by the last mesher run.
    pub mesh: Option<MeshDiagnostics>,
}

impl EvalContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Wraps the external mesher and solver as a function of the geometric
/// parameters. Holds no per-run state; that lives in [`EvalContext`].
#[derive(Debug, Clone, Default)]
pub struct Evaluator<R = ProcessRunner> {
    runner: R,
    tools: Toolchain,
}

impl Evaluator<ProcessRunner> {
    pub fn with_processes(tools: Toolchain) -> Self {
        Self::new(ProcessRunner, tools)
    }
}

impl<R: ToolRunner> Evaluator<R> {
    pub fn new(runner: R, tools: Toolchain) -> Self {
        Self { runner, tools }
    }

    /// Evaluate the problem at `x` (values in parameter order).
    ///
    /// A row is appended to the log only when every step succeeded; the
    /// counter counts the attempt either way.
    pub fn evaluate(
        &self,
        spec: &ProblemSpec,
        ctx: &mut EvalContext,
        x: &[f64],
    ) -> ProblemResult<EvaluationResult> {
        ctx.counter += 1;
        let params = spec.zip(x)?;
        let shown: Vec<(&str, f64)> = params.iter().collect();
        info!(evaluation = ctx.counter, parameters = ?shown, "evaluating");

        let mesh = self.mesh(spec, &params)?;
        ctx.mesh = Some(mesh);

        self.solve(spec, &params)?;

        let result = results::read_results(spec.output_dir(), spec.output_suffix())?;
        debug!(evaluation = ctx.counter, currents = ?result.currents, "solved");

        ctx.log.append(params, result.clone());
        debug!(evaluation = ctx.counter, rows = ctx.log.len(), "logged");
        ctx.current = Some(result.clone());
        Ok(result)
    }

    /// Evaluate at every parameter's nominal value.
    pub fn evaluate_nominal(
        &self,
        spec: &ProblemSpec,
        ctx: &mut EvalContext,
    ) -> ProblemResult<EvaluationResult> {
        self.evaluate_point(spec, ctx, &spec.nominal_point())
    }

    /// Evaluate at a named point, which must hold every parameter of `spec`.
    pub fn evaluate_point(
        &self,
        spec: &ProblemSpec,
        ctx: &mut EvalContext,
        point: &ParameterVector,
    ) -> ProblemResult<EvaluationResult> {
        let x = spec
            .parameter_names()
            .map(|n| point.get(n).ok_or_else(|| ProblemError::UnknownParameter(n.to_string())))
            .collect::<ProblemResult<Vec<_>>>()?;
        self.evaluate(spec, ctx, &x)
    }

    fn mesh(&self, spec: &ProblemSpec, params: &ParameterVector) -> ProblemResult<MeshDiagnostics> {
        let overrides = spec.mesh_overrides().iter().map(|(n, v)| (n.as_str(), *v));
        let mut args = setnumber_args(params.iter().chain(overrides));
        args.push(MESH_2D_FLAG.to_string());
        args.push(spec.geometry_file().to_string_lossy().into_owned());

        let text = self.runner.run(&self.tools.mesher, &args)?;
        if let Some(line) = diagnostics::find_distrust_marker(&text) {
            return Err(ProblemError::MeshWarning {
                line: line.trim().to_string(),
            });
        }
        let stats = diagnostics::parse_mesh_stats(&text)?;
        debug!(nodes = stats.nodes, elements = stats.elements, "meshed");
        Ok(stats)
    }

    fn solve(&self, spec: &ProblemSpec, params: &ParameterVector) -> ProblemResult<()> {
        let mut args = setnumber_args(params.iter());
        args.push(spec.problem_file().to_string_lossy().into_owned());
        args.extend([
            "-solve".to_string(),
            spec.problem().to_string(),
            "-pos".to_string(),
            spec.postpro().to_string(),
        ]);

        let text = self.runner.run(&self.tools.solver, &args)?;
        diagnostics::check_acknowledged(&text, params.iter(), self.tools.ack_prefix_len)?;
        let names: Vec<&str> = params.names().collect();
        debug!(parameters = ?names, "acknowledged");
        Ok(())
    }
}
