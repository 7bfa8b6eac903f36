//! Problem description: files, solver entry points and the geometric
//! parameters the optimizer is allowed to move.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ProblemError, ProblemResult};

/// Nominal value and admissible range of one geometric parameter
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct ParameterRange {
    pub nominal: f64,
    pub low: f64,
    pub high: f64,
}

impl ParameterRange {
    pub fn new(nominal: f64, low: f64, high: f64) -> Self {
        Self { nominal, low, high }
    }

    pub fn bounds(&self) -> (f64, f64) {
        (self.low, self.high)
    }
}

/// Named parameter values in the fixed order of a [`ProblemSpec`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ParameterVector(Vec<(String, f64)>);

impl ParameterVector {
    pub fn from_pairs(pairs: Vec<(String, f64)>) -> Self {
        Self(pairs)
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, v)| *v)
    }

    /// Replace the value of `name`, keeping its position.
    pub fn set(&mut self, name: &str, value: f64) -> ProblemResult<()> {
        let slot = self
            .0
            .iter_mut()
            .find(|(n, _)| n == name)
            .ok_or_else(|| ProblemError::UnknownParameter(name.to_string()))?;
        slot.1 = value;
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(n, v)| (n.as_str(), *v))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(n, _)| n.as_str())
    }
}

/// Immutable description of one busbar study.
///
/// Preconditions (files on disk, bound ordering) are checked once by
/// [`ProblemSpecBuilder::build`]; nothing re-checks them per evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct ProblemSpec {
    geometry_file: PathBuf,
    problem_file: PathBuf,
    problem: String,
    postpro: String,
    output_suffix: String,
    parameters: Vec<(String, ParameterRange)>,
    asymmetry_coefficient: f64,
    mesh_overrides: BTreeMap<String, f64>,
}

impl ProblemSpec {
    pub fn builder(
        geometry_file: impl Into<PathBuf>,
        problem_file: impl Into<PathBuf>,
    ) -> ProblemSpecBuilder {
        ProblemSpecBuilder {
            geometry_file: geometry_file.into(),
            problem_file: problem_file.into(),
            problem: String::new(),
            postpro: String::new(),
            output_suffix: String::new(),
            parameters: Vec::new(),
            asymmetry_coefficient: 1.0,
            mesh_overrides: BTreeMap::new(),
        }
    }

    pub fn geometry_file(&self) -> &Path {
        &self.geometry_file
    }

    pub fn problem_file(&self) -> &Path {
        &self.problem_file
    }

    pub fn problem(&self) -> &str {
        &self.problem
    }

    pub fn postpro(&self) -> &str {
        &self.postpro
    }

    pub fn output_suffix(&self) -> &str {
        &self.output_suffix
    }

    pub fn asymmetry_coefficient(&self) -> f64 {
        self.asymmetry_coefficient
    }

    pub fn mesh_overrides(&self) -> &BTreeMap<String, f64> {
        &self.mesh_overrides
    }

    pub fn parameters(&self) -> &[(String, ParameterRange)] {
        &self.parameters
    }

    pub fn parameter_names(&self) -> impl Iterator<Item = &str> {
        self.parameters.iter().map(|(n, _)| n.as_str())
    }

    pub fn dimension(&self) -> usize {
        self.parameters.len()
    }

    /// Directory the solver writes its result files into.
    pub fn output_dir(&self) -> &Path {
        match self.geometry_file.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        }
    }

    /// `(low, high)` per parameter, in parameter order.
    pub fn bounds(&self) -> Vec<(f64, f64)> {
        self.parameters.iter().map(|(_, r)| r.bounds()).collect()
    }

    pub fn nominal_point(&self) -> ParameterVector {
        ParameterVector(
            self.parameters
                .iter()
                .map(|(n, r)| (n.clone(), r.nominal))
                .collect(),
        )
    }

    /// Zip a flat vector with the parameter names.
    pub fn zip(&self, values: &[f64]) -> ProblemResult<ParameterVector> {
        if values.len() != self.parameters.len() {
            return Err(ProblemError::Dimension {
                expected: self.parameters.len(),
                found: values.len(),
            });
        }
        Ok(ParameterVector(
            self.parameters
                .iter()
                .zip(values)
                .map(|((n, _), v)| (n.clone(), *v))
                .collect(),
        ))
    }

    /// Same study with a different set of fixed mesh-density overrides.
    pub fn with_mesh_overrides(&self, overrides: BTreeMap<String, f64>) -> Self {
        Self {
            mesh_overrides: overrides,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProblemSpecBuilder {
    geometry_file: PathBuf,
    problem_file: PathBuf,
    problem: String,
    postpro: String,
    output_suffix: String,
    parameters: Vec<(String, ParameterRange)>,
    asymmetry_coefficient: f64,
    mesh_overrides: BTreeMap<String, f64>,
}

impl ProblemSpecBuilder {
    pub fn problem(mut self, name: impl Into<String>) -> Self {
        self.problem = name.into();
        self
    }

    pub fn postpro(mut self, name: impl Into<String>) -> Self {
        self.postpro = name.into();
        self
    }

    pub fn output_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.output_suffix = suffix.into();
        self
    }

    pub fn parameter(mut self, name: impl Into<String>, range: ParameterRange) -> Self {
        self.parameters.push((name.into(), range));
        self
    }

    pub fn asymmetry_coefficient(mut self, coefficient: f64) -> Self {
        self.asymmetry_coefficient = coefficient;
        self
    }

    pub fn mesh_override(mut self, name: impl Into<String>, value: f64) -> Self {
        self.mesh_overrides.insert(name.into(), value);
        self
    }

    pub fn build(self) -> ProblemResult<ProblemSpec> {
        for (label, path) in [
            ("geometry file", &self.geometry_file),
            ("problem file", &self.problem_file),
        ] {
            if !path.exists() {
                return Err(ProblemError::InvalidProblem(format!(
                    "{} does not exist: {}",
                    label,
                    path.display()
                )));
            }
        }
        if self.problem.is_empty() || self.postpro.is_empty() {
            return Err(ProblemError::InvalidProblem(
                "problem and postpro names must be set".into(),
            ));
        }
        if self.parameters.is_empty() {
            return Err(ProblemError::InvalidProblem(
                "at least one parameter is required".into(),
            ));
        }
        for (i, (name, r)) in self.parameters.iter().enumerate() {
            if self.parameters[..i].iter().any(|(n, _)| n == name) {
                return Err(ProblemError::InvalidProblem(format!(
                    "parameter {} declared twice",
                    name
                )));
            }
            if !(r.low.is_finite() && r.nominal.is_finite() && r.high.is_finite()) {
                return Err(ProblemError::InvalidProblem(format!(
                    "parameter {} has a non-finite bound",
                    name
                )));
            }
            if !(r.low <= r.nominal && r.nominal <= r.high) {
                return Err(ProblemError::InvalidProblem(format!(
                    "parameter {} must satisfy low <= nominal <= high (got {}, {}, {})",
                    name, r.low, r.nominal, r.high
                )));
            }
        }
        if !self.asymmetry_coefficient.is_finite() || self.asymmetry_coefficient <= 0.0 {
            return Err(ProblemError::InvalidProblem(
                "asymmetry coefficient must be positive".into(),
            ));
        }
        Ok(ProblemSpec {
            geometry_file: self.geometry_file,
            problem_file: self.problem_file,
            problem: self.problem,
            postpro: self.postpro,
            output_suffix: self.output_suffix,
            parameters: self.parameters,
            asymmetry_coefficient: self.asymmetry_coefficient,
            mesh_overrides: self.mesh_overrides,
        })
    }
}
