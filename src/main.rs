mod config;
mod convergence;
mod diagnostics;
mod error;
mod evaluate;
mod history;
mod io;
mod objective;
mod optimize;
mod problem;
mod results;
mod runner;
mod sensitivity;


use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::evaluate::{EvalContext, Evaluator};
use crate::io::CsvWriter;
use crate::objective::objective_with;
use crate::optimize::{GridSearch, Optimum};
use crate::sensitivity::{CacheMode, SweepCurve, SweepSettings};

const SCHEMA_VERSION: &str = "1.0.0";

#[derive(Parser, Debug)]
#[command(name = "busbar-opt")]
#[command(version)]
#[command(about = "Shape optimization of a busbar through an external mesher and field solver")]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Path to TOML study file
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Output path (file or directory)
    #[arg(short, long, global = true)]
    out: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate a study file
    Validate,
    /// Evaluate the nominal geometry
    Nominal,
    /// Evaluate one explicit parameter vector
    Evaluate {
        /// Values in parameter order, comma separated
        #[arg(long, value_delimiter = ',', required = true, allow_negative_numbers = true)]
        x: Vec<f64>,
    },
    /// Grid search for balanced output currents
    Optimize {
        /// Grid samples per parameter (overrides optimize.grid_steps)
        #[arg(long)]
        steps: Option<usize>,
        /// Write a JSON summary next to the CSV log
        #[arg(long)]
        json: bool,
    },
    /// One-at-a-time sensitivity of the imbalance around the base point
    Sensitivity {
        /// Reload stored sweeps instead of running the solver
        #[arg(long, conflicts_with = "no_cache")]
        from_cache: bool,
        /// Do not write the sweep cache
        #[arg(long)]
        no_cache: bool,
    },
    /// Mesh convergence table
    Convergence,
    /// Print version information
    Version,
}

// ============================================================================
// JSON Output Structures
// ============================================================================

#[derive(Serialize)]
struct Manifest {
    schema_version: String,
    tool_version: String,
    timestamp_unix: u64,
    platform: String,
    config_hash: String,
    config_snapshot: config::Root,
}

#[derive(Serialize)]
struct OptimizationOutput {
    manifest: Manifest,
    grid_steps: usize,
    bounds: Vec<(String, f64, f64)>,
    optimum: Optimum,
    wall_time_ms: f64,
}

// ============================================================================
// Helper Functions
// ============================================================================

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn compute_hash(data: &str) -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let mut hasher = DefaultHasher::new();
    data.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

fn create_manifest(cfg: &config::Root, cfg_text: &str) -> Manifest {
    let timestamp_unix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    Manifest {
        schema_version: SCHEMA_VERSION.to_string(),
        tool_version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp_unix,
        platform: std::env::consts::OS.to_string(),
        config_hash: compute_hash(cfg_text),
        config_snapshot: cfg.clone(),
    }
}

fn load_config(path: Option<String>) -> Result<(config::Root, String)> {
    let path = path.context("--config required")?;
    config::Root::load(&path)
}

fn print_result(ctx: &EvalContext, coefficient: f64, ports: objective::ObjectivePorts) -> Result<()> {
    let result = ctx.current.as_ref().context("no evaluation result")?;
    if let Some(mesh) = ctx.mesh {
        eprintln!("  mesh:     {} nodes, {} elements", mesh.nodes, mesh.elements);
    }
    eprintln!("  currents: {:?}", result.currents);
    eprintln!("  voltages: {:?}", result.voltages);
    eprintln!("  losses:   {:?}", result.losses);
    eprintln!(
        "  imbalance (coef {}): {:.6e}",
        coefficient,
        objective_with(&result.currents, coefficient, ports)?
    );

    // Only the input port is driven; any other voltage hints at a bad setup.
    if result.voltages.iter().skip(1).any(|v| v.abs() > 1e-9) {
        warn!(voltages = ?result.voltages, "output port voltages are not zero");
    }
    Ok(())
}

// ============================================================================
// Run Modes
// ============================================================================

fn run_validate(cfg: &config::Root) -> Result<()> {
    let spec = cfg.problem_spec()?;

    eprintln!("[busbar-opt] config valid");
    eprintln!("  geometry: {}", spec.geometry_file().display());
    eprintln!("  problem:  {} (resolution {}, post-operation {})",
              spec.problem_file().display(), spec.problem(), spec.postpro());
    eprintln!("  results:  {} (suffix '{}')", spec.output_dir().display(), spec.output_suffix());
    eprintln!("  tools:    mesher={}, solver={}, ack prefix={}",
              cfg.tools.mesher, cfg.tools.solver, cfg.tools.ack_prefix_len);
    for (name, r) in spec.parameters() {
        eprintln!("  {:>10}: nominal={} range=[{}, {}]", name, r.nominal, r.low, r.high);
    }
    for (name, v) in spec.mesh_overrides() {
        eprintln!("  {:>10}: {} (mesh)", name, v);
    }

    if let Some(file) = cfg.convergence.as_ref().and_then(|c| c.defaults_file.as_ref()) {
        diagnostics::check_declared_defaults(file, &cfg.mesh)?;
        eprintln!("  mesh defaults match {}", file.display());
    }
    Ok(())
}

fn run_nominal(cfg: &config::Root, out_path: &Path) -> Result<()> {
    let spec = cfg.problem_spec()?;
    let evaluator = Evaluator::with_processes(cfg.tools.clone());
    let mut ctx = EvalContext::new();

    evaluator.evaluate_nominal(&spec, &mut ctx)?;
    eprintln!("[busbar-opt] nominal evaluation");
    print_result(&ctx, spec.asymmetry_coefficient(), cfg.objective)?;

    ctx.log.write_csv(out_path)?;
    eprintln!("[busbar-opt] log: {}", out_path.display());
    Ok(())
}

fn run_evaluate(cfg: &config::Root, out_path: &Path, x: &[f64]) -> Result<()> {
    let spec = cfg.problem_spec()?;
    let evaluator = Evaluator::with_processes(cfg.tools.clone());
    let mut ctx = EvalContext::new();

    let point = spec.zip(x)?;
    for ((name, r), &value) in spec.parameters().iter().zip(x) {
        if value < r.low || value > r.high {
            warn!(parameter = name.as_str(), value, low = r.low, high = r.high, "value outside its range");
        }
    }

    evaluator.evaluate(&spec, &mut ctx, x)?;
    eprintln!("[busbar-opt] evaluation at {:?}", point.iter().collect::<Vec<_>>());
    print_result(&ctx, spec.asymmetry_coefficient(), cfg.objective)?;

    ctx.log.write_csv(out_path)?;
    eprintln!("[busbar-opt] log: {}", out_path.display());
    Ok(())
}

fn run_optimize(
    cfg: &config::Root,
    cfg_text: &str,
    out_path: &Path,
    steps: usize,
    json_output: bool,
) -> Result<()> {
    if steps < 2 {
        bail!("--steps must be >= 2");
    }
    let spec = cfg.problem_spec()?;
    let evaluator = Evaluator::with_processes(cfg.tools.clone());
    let mut ctx = EvalContext::new();
    let grid = GridSearch::new(steps);

    let total = steps.saturating_pow(spec.dimension() as u32);
    eprintln!("[busbar-opt] grid search: {} parameters x {} steps = {} evaluations",
              spec.dimension(), steps, total);

    let start = Instant::now();
    let result = optimize::optimize(&evaluator, &spec, &mut ctx, &grid, cfg.objective);
    let wall_time_ms = start.elapsed().as_secs_f64() * 1000.0;

    // The log is worth keeping even when the run stopped on a bad point.
    ctx.log.write_csv(out_path)?;
    eprintln!("[busbar-opt] log ({} rows): {}", ctx.log.len(), out_path.display());
    let optimum = match result {
        Ok(optimum) => optimum,
        Err(err) => {
            if ctx.log.is_empty() {
                warn!("no evaluation completed before the failure");
            } else if let Some(row) = ctx.log.last() {
                let shown: Vec<(&str, f64)> = row.parameters.iter().collect();
                warn!(point = ?shown, "last completed evaluation");
            }
            return Err(err.into());
        }
    };

    eprintln!("[busbar-opt] optimization complete in {:.1} s", wall_time_ms / 1000.0);
    eprintln!("  {:>10} {:>14}", "Parameter", "Best");
    eprintln!("  {}", "-".repeat(26));
    for (name, value) in optimum.point.iter() {
        eprintln!("  {:>10} {:>14.8}", name, value);
    }
    eprintln!("  imbalance: {:.6e} after {} evaluations", optimum.objective, optimum.evaluations);

    if json_output {
        let json_path = out_path.with_extension("json");
        let output = OptimizationOutput {
            manifest: create_manifest(cfg, cfg_text),
            grid_steps: steps,
            bounds: spec
                .parameters()
                .iter()
                .map(|(n, r)| (n.clone(), r.low, r.high))
                .collect(),
            optimum,
            wall_time_ms,
        };
        fs::write(&json_path, serde_json::to_string_pretty(&output)?)?;
        eprintln!("[busbar-opt] JSON summary: {}", json_path.display());
    }
    Ok(())
}

fn run_sensitivity(cfg: &config::Root, out_path: &Path, from_cache: bool, no_cache: bool) -> Result<()> {
    let sens = cfg.sensitivity.as_ref().context("[sensitivity] section required")?;
    let spec = cfg.problem_spec()?;
    let evaluator = Evaluator::with_processes(cfg.tools.clone());
    let mut ctx = EvalContext::new();

    let settings = SweepSettings {
        relative_range: sens.relative_range,
        num_points: sens.num_points,
        cache: if from_cache {
            CacheMode::Reload(sens.cache_dir.clone())
        } else if no_cache {
            CacheMode::Off
        } else {
            CacheMode::Store(sens.cache_dir.clone())
        },
        ports: cfg.objective,
    };
    let base = cfg.sensitivity_base();

    let mut curves: Vec<SweepCurve> = Vec::with_capacity(spec.dimension());
    for name in spec.parameter_names() {
        info!(parameter = name, from_cache, "sweeping");
        curves.push(sensitivity::sweep(&evaluator, &spec, &mut ctx, &base, name, &settings)?);
    }

    let mut w = CsvWriter::create(out_path)?;
    w.write_header(&["parameter", "value", "deviation", "objective"])?;
    for curve in &curves {
        for (value, objective) in &curve.points {
            w.write_row(&[
                curve.parameter.clone(),
                value.to_string(),
                format!("{:.6e}", value / curve.base - 1.0),
                objective.to_string(),
            ])?;
        }
    }
    w.flush()?;

    eprintln!("[busbar-opt] sensitivity complete ({} evaluations)", ctx.counter);
    for curve in &curves {
        let (lo, hi) = curve
            .points
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), (_, y)| (lo.min(*y), hi.max(*y)));
        eprintln!("  {:>10}: base={} objective in [{:.4e}, {:.4e}]", curve.parameter, curve.base, lo, hi);
    }
    eprintln!("[busbar-opt] CSV: {}", out_path.display());
    if let CacheMode::Store(dir) = &settings.cache {
        eprintln!("[busbar-opt] cache: {}", dir.display());
    }
    Ok(())
}

fn run_convergence(cfg: &config::Root, out_path: &Path) -> Result<()> {
    let conv = cfg.convergence.as_ref().context("[convergence] section required")?;
    if let Some(file) = &conv.defaults_file {
        diagnostics::check_declared_defaults(file, &cfg.mesh)?;
    }
    let spec = cfg.problem_spec()?;
    let evaluator = Evaluator::with_processes(cfg.tools.clone());

    let rows = convergence::mesh_convergence(&evaluator, &spec, &cfg.mesh, &conv.ratios)?;
    convergence::write_csv(out_path, &rows)?;

    eprintln!("[busbar-opt] mesh convergence");
    eprintln!("  {:>6} {:>9} {:>10} {:>14} {:>14} {:>14}",
              "ratio", "elapsed", "elements", "I_left", "I_center", "losses");
    eprintln!("  {}", "-".repeat(72));
    for r in &rows {
        eprintln!("  {:>6} {:>8.2}s {:>10} {:>14.6} {:>14.6} {:>14.6e}",
                  r.ratio, r.elapsed_s, r.elements, r.current_left, r.current_center, r.losses);
    }
    eprintln!("[busbar-opt] CSV: {}", out_path.display());
    Ok(())
}

fn print_version() {
    eprintln!("busbar-opt {} - busbar shape optimization driver", env!("CARGO_PKG_VERSION"));
    eprintln!();
    eprintln!("  Schema Version:    {}", SCHEMA_VERSION);
    eprintln!("  Platform:          {}", std::env::consts::OS);
    eprintln!("  Architecture:      {}", std::env::consts::ARCH);
    eprintln!();
    eprintln!("External tools (configurable under [tools]):");
    eprintln!("  - mesher: gmsh-compatible, '-setnumber <name> <value> -2 <geo>'");
    eprintln!("  - solver: getdp-compatible, '<pro> -solve <resolution> -pos <post-operation>'");
}

// ============================================================================
// Main
// ============================================================================

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging();

    let out = |default: &str| PathBuf::from(args.out.clone().unwrap_or_else(|| default.to_string()));

    match args.command {
        Commands::Version => {
            print_version();
            Ok(())
        }
        Commands::Validate => {
            let (cfg, _) = load_config(args.config.clone())?;
            run_validate(&cfg)
        }
        Commands::Nominal => {
            let (cfg, _) = load_config(args.config.clone())?;
            run_nominal(&cfg, &out("results/nominal.csv"))
        }
        Commands::Evaluate { ref x } => {
            let (cfg, _) = load_config(args.config.clone())?;
            run_evaluate(&cfg, &out("results/evaluation.csv"), x)
        }
        Commands::Optimize { steps, json } => {
            let (cfg, cfg_text) = load_config(args.config.clone())?;
            let steps = steps.unwrap_or(cfg.optimize.grid_steps);
            run_optimize(&cfg, &cfg_text, &out("results/optimization.csv"), steps, json)
        }
        Commands::Sensitivity { from_cache, no_cache } => {
            let (cfg, _) = load_config(args.config.clone())?;
            run_sensitivity(&cfg, &out("results/sensitivity.csv"), from_cache, no_cache)
        }
        Commands::Convergence => {
            let (cfg, _) = load_config(args.config.clone())?;
            run_convergence(&cfg, &out("results/mesh_convergence.csv"))
        }
    }
}
