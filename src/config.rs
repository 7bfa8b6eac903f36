use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::convergence::DEFAULT_RATIOS;
use crate::evaluate::Toolchain;
use crate::objective::ObjectivePorts;
use crate::problem::{ParameterRange, ParameterVector, ProblemSpec};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Root {
    pub problem: Problem,
    pub parameters: Vec<Parameter>,
    /// Fixed mesh-density overrides passed to the mesher on every run
    #[serde(default)]
    pub mesh: BTreeMap<String, f64>,
    #[serde(default)]
    pub tools: Toolchain,
    #[serde(default)]
    pub objective: ObjectivePorts,
    #[serde(default)]
    pub optimize: Optimize,
    pub sensitivity: Option<Sensitivity>,
    pub convergence: Option<Convergence>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Problem {
    pub geometry_file: PathBuf,
    pub problem_file: PathBuf,
    /// Resolution entry point in the problem file
    pub problem: String,
    /// Post-operation exporting I, U and integrated losses
    pub postpro: String,
    #[serde(default)]
    pub output_suffix: String,
    /// 2.0 when only half of the busbar is modelled
    #[serde(default = "default_one")]
    pub asymmetry_coefficient: f64,
}

fn default_one() -> f64 { 1.0 }

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Parameter {
    pub name: String,
    pub nominal: f64,
    pub low: f64,
    pub high: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Optimize {
    #[serde(default = "default_grid_steps")]
    pub grid_steps: usize,
}

fn default_grid_steps() -> usize { 10 }

impl Default for Optimize {
    fn default() -> Self {
        Self { grid_steps: default_grid_steps() }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Sensitivity {
    /// Half-width of each sweep as a fraction of the base value (0.01 = 1 %)
    pub relative_range: f64,
    pub num_points: usize,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    /// Base point; nominal values are used for parameters not listed
    #[serde(default)]
    pub base: BTreeMap<String, f64>,
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("results/sensitivity")
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Convergence {
    #[serde(default = "default_ratios")]
    pub ratios: Vec<f64>,
    /// Geometry file whose `DefineConstant` defaults must match `[mesh]`
    pub defaults_file: Option<PathBuf>,
}

fn default_ratios() -> Vec<f64> {
    DEFAULT_RATIOS.to_vec()
}

impl Root {
    pub fn load(path: &str) -> Result<(Self, String)> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {}", path))?;
        let cfg: Root = toml::from_str(&text)
            .with_context(|| format!("failed to parse config: {}", path))?;
        cfg.validate()?;
        Ok((cfg, text))
    }

    pub fn validate(&self) -> Result<()> {
        if self.problem.problem.is_empty() {
            bail!("problem.problem must name a resolution");
        }
        if self.problem.postpro.is_empty() {
            bail!("problem.postpro must name a post-operation");
        }
        if !(self.problem.asymmetry_coefficient > 0.0) {
            bail!("problem.asymmetry_coefficient must be positive");
        }
        if self.parameters.is_empty() {
            bail!("at least one [[parameters]] entry is required");
        }
        for (i, p) in self.parameters.iter().enumerate() {
            if p.name.is_empty() {
                bail!("parameters[{}].name must not be empty", i);
            }
            if self.parameters[..i].iter().any(|q| q.name == p.name) {
                bail!("parameter {} is declared twice", p.name);
            }
            if !(p.low <= p.nominal && p.nominal <= p.high) {
                bail!("parameter {} must satisfy low <= nominal <= high", p.name);
            }
        }
        for (name, value) in &self.mesh {
            if !(*value > 0.0) {
                bail!("mesh.{} must be positive", name);
            }
        }
        if self.tools.mesher.is_empty() || self.tools.solver.is_empty() {
            bail!("tools.mesher and tools.solver must be set");
        }
        if self.tools.ack_prefix_len == 0 {
            bail!("tools.ack_prefix_len must be >= 1");
        }
        if self.objective.reference == self.objective.compared {
            bail!("objective.reference_port and objective.compared_port must differ");
        }
        if self.optimize.grid_steps < 2 {
            bail!("optimize.grid_steps must be >= 2");
        }

        if let Some(ref sens) = self.sensitivity {
            if !(0.0 < sens.relative_range && sens.relative_range < 1.0) {
                bail!("sensitivity.relative_range must be in (0, 1)");
            }
            // An odd count would sample the base value twice.
            if sens.num_points < 2 || sens.num_points % 2 != 0 {
                bail!("sensitivity.num_points must be even and >= 2");
            }
            for name in sens.base.keys() {
                if !self.parameters.iter().any(|p| &p.name == name) {
                    bail!("sensitivity.base.{} is not a declared parameter", name);
                }
            }
            // A zero base collapses every sweep point onto 0.
            for (name, value) in self.sensitivity_base().iter() {
                if value == 0.0 {
                    bail!("sensitivity base value of {} must be non-zero", name);
                }
            }
        }

        if let Some(ref conv) = self.convergence {
            if conv.ratios.is_empty() {
                bail!("convergence.ratios must not be empty");
            }
            if conv.ratios.iter().any(|r| !(*r > 0.0)) {
                bail!("convergence.ratios must be positive");
            }
            if self.mesh.is_empty() {
                bail!("[convergence] needs the default densities in [mesh]");
            }
        }

        Ok(())
    }

    /// Build the problem description; checks that both files exist.
    pub fn problem_spec(&self) -> Result<ProblemSpec> {
        let mut builder = ProblemSpec::builder(&self.problem.geometry_file, &self.problem.problem_file)
            .problem(&self.problem.problem)
            .postpro(&self.problem.postpro)
            .output_suffix(&self.problem.output_suffix)
            .asymmetry_coefficient(self.problem.asymmetry_coefficient);
        for p in &self.parameters {
            builder = builder.parameter(&p.name, ParameterRange::new(p.nominal, p.low, p.high));
        }
        for (name, value) in &self.mesh {
            builder = builder.mesh_override(name, *value);
        }
        Ok(builder.build()?)
    }

    /// Sensitivity base point: configured values over nominal ones.
    pub fn sensitivity_base(&self) -> ParameterVector {
        let overrides = self.sensitivity.as_ref().map(|s| &s.base);
        ParameterVector::from_pairs(
            self.parameters
                .iter()
                .map(|p| {
                    let value = overrides
                        .and_then(|b| b.get(&p.name))
                        .copied()
                        .unwrap_or(p.nominal);
                    (p.name.clone(), value)
                })
                .collect(),
        )
    }
}
