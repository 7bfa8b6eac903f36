//! Bounded derivative-free search over the geometric parameters.
//!
//! The objective is only reachable through the external solver, so the
//! search samples the box densely instead of following gradients.

use serde::Serialize;
use tracing::{debug, info};

use crate::error::{ProblemError, ProblemResult};
use crate::evaluate::{EvalContext, Evaluator};
use crate::objective::{objective_with, ObjectivePorts};
use crate::problem::{ParameterVector, ProblemSpec};
use crate::runner::ToolRunner;

/// Best point found by a [`Minimizer`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Minimum {
    pub x: Vec<f64>,
    pub value: f64,
    pub evaluations: usize,
}

/// Black-box minimizer over a box.
pub trait Minimizer {
    fn minimize<F>(&self, bounds: &[(f64, f64)], f: F) -> ProblemResult<Minimum>
    where
        F: FnMut(&[f64]) -> ProblemResult<f64>;
}

/// Exhaustive search over a regular grid, `steps` samples per dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridSearch {
    pub steps: usize,
}

impl GridSearch {
    pub fn new(steps: usize) -> Self {
        Self { steps }
    }

    /// Sample coordinates of one axis, both ends included.
    pub fn axis(&self, (low, high): (f64, f64)) -> Vec<f64> {
        linspace(low, high, self.steps)
    }
}

impl Minimizer for GridSearch {
    fn minimize<F>(&self, bounds: &[(f64, f64)], mut f: F) -> ProblemResult<Minimum>
    where
        F: FnMut(&[f64]) -> ProblemResult<f64>,
    {
        if self.steps == 0 || bounds.is_empty() {
            return Err(ProblemError::InvalidProblem(
                "grid search needs at least one step and one dimension".into(),
            ));
        }
        let axes: Vec<Vec<f64>> = bounds.iter().map(|b| self.axis(*b)).collect();
        let total = axes.iter().map(Vec::len).product::<usize>();
        info!(dimensions = bounds.len(), steps = self.steps, total, "grid search");

        let mut index = vec![0usize; axes.len()];
        let mut x: Vec<f64> = axes.iter().map(|a| a[0]).collect();
        let mut best_x = x.clone();
        let mut best_value = f64::INFINITY;
        let mut evaluations = 0;

        loop {
            let value = f(&x)?;
            evaluations += 1;
            if value.is_nan() {
                return Err(ProblemError::NonFiniteObjective { point: x });
            }
            debug!(evaluations, ?x, value, "grid point");
            if evaluations == 1 || value < best_value {
                best_x.clone_from(&x);
                best_value = value;
            }

            // Odometer step, last dimension fastest.
            let mut d = axes.len();
            loop {
                if d == 0 {
                    return Ok(Minimum {
                        x: best_x,
                        value: best_value,
                        evaluations,
                    });
                }
                d -= 1;
                index[d] += 1;
                if index[d] < axes[d].len() {
                    x[d] = axes[d][index[d]];
                    break;
                }
                index[d] = 0;
                x[d] = axes[d][0];
            }
        }
    }
}

/// `n` evenly spaced values from `start` to `stop` inclusive.
pub fn linspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (n - 1) as f64;
            (0..n)
                .map(|i| if i == n - 1 { stop } else { start + step * i as f64 })
                .collect()
        }
    }
}

/// Outcome of [`optimize`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Optimum {
    pub point: ParameterVector,
    pub objective: f64,
    pub evaluations: usize,
}

/// Minimize the port imbalance over the parameter box of `spec`.
///
/// The context is reset first so its log covers this run only.
pub fn optimize<R: ToolRunner, M: Minimizer>(
    evaluator: &Evaluator<R>,
    spec: &ProblemSpec,
    ctx: &mut EvalContext,
    minimizer: &M,
    ports: ObjectivePorts,
) -> ProblemResult<Optimum> {
    ctx.reset();
    let coefficient = spec.asymmetry_coefficient();
    let minimum = minimizer.minimize(&spec.bounds(), |x| {
        let result = evaluator.evaluate(spec, ctx, x)?;
        objective_with(&result.currents, coefficient, ports)
    })?;
    info!(objective = minimum.value, evaluations = minimum.evaluations, "optimum");
    Ok(Optimum {
        point: spec.zip(&minimum.x)?,
        objective: minimum.value,
        evaluations: minimum.evaluations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn linspace_hits_both_ends() {
        assert_eq!(linspace(0.0, 1.0, 5), vec![0.0, 0.25, 0.5, 0.75, 1.0]);
        assert_eq!(linspace(0.002, 0.006, 1), vec![0.002]);
        assert_eq!(linspace(0.01, 0.06, 3)[2], 0.06);
    }

    #[test]
    fn visits_every_grid_point_once() {
        let mut seen = Vec::new();
        let min = GridSearch::new(3)
            .minimize(&[(0.0, 2.0), (10.0, 12.0)], |x| {
                seen.push(x.to_vec());
                Ok(0.0)
            })
            .unwrap();
        assert_eq!(min.evaluations, 9);
        assert_eq!(seen.len(), 9);
        assert_eq!(seen[0], vec![0.0, 10.0]);
        assert_eq!(seen[1], vec![0.0, 11.0]);
        assert_eq!(seen[8], vec![2.0, 12.0]);
        // first of equal minima wins
        assert_eq!(min.x, vec![0.0, 10.0]);
    }

    #[test]
    fn finds_grid_minimum() {
        let min = GridSearch::new(11)
            .minimize(&[(-1.0, 1.0), (0.0, 1.0)], |x| {
                Ok((x[0] - 0.4).powi(2) + (x[1] - 0.7).powi(2))
            })
            .unwrap();
        assert_abs_diff_eq!(min.x[0], 0.4, epsilon = 1e-12);
        assert_abs_diff_eq!(min.x[1], 0.7, epsilon = 1e-12);
        assert_eq!(min.evaluations, 121);
    }

    #[test]
    fn nan_objective_aborts() {
        let err = GridSearch::new(4)
            .minimize(&[(0.0, 1.0)], |x| Ok(if x[0] > 0.5 { f64::NAN } else { x[0] }))
            .unwrap_err();
        assert!(matches!(err, ProblemError::NonFiniteObjective { .. }));
    }

    #[test]
    fn evaluation_errors_propagate() {
        let mut calls = 0;
        let err = GridSearch::new(5)
            .minimize(&[(0.0, 1.0)], |_| {
                calls += 1;
                if calls == 2 {
                    Err(ProblemError::MeshParse)
                } else {
                    Ok(1.0)
                }
            })
            .unwrap_err();
        assert!(matches!(err, ProblemError::MeshParse));
        assert_eq!(calls, 2);
    }
}
