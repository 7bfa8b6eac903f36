//! One-at-a-time sensitivity of the imbalance around a base point.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::info;

use crate::error::{ProblemError, ProblemResult};
use crate::evaluate::{EvalContext, Evaluator};
use crate::objective::{objective_with, ObjectivePorts};
use crate::optimize::linspace;
use crate::problem::{ParameterVector, ProblemSpec};
use crate::runner::ToolRunner;

/// Where sweep results come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheMode {
    /// Evaluate every point; nothing is persisted.
    Off,
    /// Evaluate every point and persist the curve under the directory.
    Store(PathBuf),
    /// Reload a previously stored curve instead of evaluating.
    Reload(PathBuf),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SweepSettings {
    /// Half-width of the sweep as a fraction of the base value.
    pub relative_range: f64,
    pub num_points: usize,
    pub cache: CacheMode,
    pub ports: ObjectivePorts,
}

/// Objective sampled along one parameter, sorted by parameter value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepCurve {
    pub parameter: String,
    pub base: f64,
    pub points: Vec<(f64, f64)>,
}

/// `num_points` values spanning `base * (1 ± relative_range)`, plus `base`
/// itself, in ascending order.
pub fn sweep_points(base: f64, relative_range: f64, num_points: usize) -> Vec<f64> {
    let start = (1.0 - relative_range) * base;
    let stop = (1.0 + relative_range) * base;
    let mut points = linspace(start, stop, num_points);
    points.push(base);
    points.sort_by(f64::total_cmp);
    points
}

/// Settings under which a sweep has exactly `num_points + 1` distinct,
/// strictly ascending points.
pub fn check_sweep(parameter: &str, base: f64, settings: &SweepSettings) -> ProblemResult<()> {
    // An odd count puts the middle linspace sample on the base value.
    if settings.num_points < 2 || settings.num_points % 2 != 0 {
        return Err(ProblemError::InvalidProblem(format!(
            "sweep of {} needs an even number of points >= 2, got {}",
            parameter, settings.num_points
        )));
    }
    if !(0.0 < settings.relative_range && settings.relative_range < 1.0) {
        return Err(ProblemError::InvalidProblem(format!(
            "sweep of {} needs a relative range in (0, 1), got {}",
            parameter, settings.relative_range
        )));
    }
    if base == 0.0 || !base.is_finite() {
        return Err(ProblemError::InvalidProblem(format!(
            "sweep of {} needs a finite non-zero base value, got {}",
            parameter, base
        )));
    }
    Ok(())
}

pub fn cache_file(dir: &Path, parameter: &str) -> PathBuf {
    dir.join(format!("{}.json", parameter))
}

/// Sweep `parameter` while every other parameter stays at `base_point`.
pub fn sweep<R: ToolRunner>(
    evaluator: &Evaluator<R>,
    spec: &ProblemSpec,
    ctx: &mut EvalContext,
    base_point: &ParameterVector,
    parameter: &str,
    settings: &SweepSettings,
) -> ProblemResult<SweepCurve> {
    let base = base_point
        .get(parameter)
        .ok_or_else(|| ProblemError::UnknownParameter(parameter.to_string()))?;
    check_sweep(parameter, base, settings)?;
    let expected = settings.num_points + 1;

    let points = match &settings.cache {
        CacheMode::Reload(dir) => load_curve(&cache_file(dir, parameter), expected)?,
        mode => {
            let mut points = Vec::with_capacity(expected);
            for value in sweep_points(base, settings.relative_range, settings.num_points) {
                let mut point = base_point.clone();
                point.set(parameter, value)?;
                info!(parameter, value, "sensitivity point");
                let result = evaluator.evaluate_point(spec, ctx, &point)?;
                let objective = objective_with(
                    &result.currents,
                    spec.asymmetry_coefficient(),
                    settings.ports,
                )?;
                points.push((value, objective));
            }
            if let CacheMode::Store(dir) = mode {
                store_curve(&cache_file(dir, parameter), &points)?;
            }
            points
        }
    };

    Ok(SweepCurve {
        parameter: parameter.to_string(),
        base,
        points,
    })
}

/// Persist as a JSON object keyed by the sampled value.
pub fn store_curve(path: &Path, points: &[(f64, f64)]) -> ProblemResult<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let map: serde_json::Map<String, serde_json::Value> = points
        .iter()
        .map(|(x, y)| (x.to_string(), serde_json::json!(y)))
        .collect();
    fs::write(path, serde_json::to_string_pretty(&map)?)?;
    Ok(())
}

/// Reload a stored curve; it must hold exactly `expected` points.
pub fn load_curve(path: &Path, expected: usize) -> ProblemResult<Vec<(f64, f64)>> {
    let text = fs::read_to_string(path)?;
    let raw: BTreeMap<String, Option<f64>> = serde_json::from_str(&text)?;
    let mut points = raw
        .into_iter()
        .map(|(k, v)| {
            let x = k.parse::<f64>().map_err(|_| {
                ProblemError::malformed(path, format!("key '{}' is not a number", k))
            })?;
            Ok((x, v.unwrap_or(f64::NAN)))
        })
        .collect::<ProblemResult<Vec<_>>>()?;
    if points.len() != expected {
        return Err(ProblemError::CacheSizeMismatch {
            path: path.to_path_buf(),
            expected,
            found: points.len(),
        });
    }
    points.sort_by(|a, b| a.0.total_cmp(&b.0));
    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn points_include_base_and_are_sorted() {
        let base = 0.027866968988955805;
        let pts = sweep_points(base, 0.01, 20);
        assert_eq!(pts.len(), 21);
        assert!(pts.contains(&base));
        assert!(pts.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(pts[0], (1.0 - 0.01) * base);
        assert_eq!(pts[20], (1.0 + 0.01) * base);
    }

    fn settings(relative_range: f64, num_points: usize) -> SweepSettings {
        SweepSettings {
            relative_range,
            num_points,
            cache: CacheMode::Off,
            ports: ObjectivePorts::default(),
        }
    }

    #[test]
    fn odd_point_count_is_rejected() {
        // Three samples would put the middle one on the base value.
        let err = check_sweep("DO_y", 0.035, &settings(0.01, 3)).unwrap_err();
        assert!(matches!(err, ProblemError::InvalidProblem(ref m) if m.contains("even")));
        assert!(check_sweep("DO_y", 0.035, &settings(0.01, 0)).is_err());
        assert!(check_sweep("DO_y", 0.035, &settings(0.01, 4)).is_ok());
    }

    #[test]
    fn zero_base_and_bad_range_are_rejected() {
        let err = check_sweep("DO_y", 0.0, &settings(0.01, 4)).unwrap_err();
        assert!(matches!(err, ProblemError::InvalidProblem(ref m) if m.contains("non-zero")));
        assert!(check_sweep("DO_y", f64::NAN, &settings(0.01, 4)).is_err());
        assert!(check_sweep("DO_y", 0.035, &settings(0.0, 4)).is_err());
        assert!(check_sweep("DO_y", 0.035, &settings(1.0, 4)).is_err());
    }

    #[test]
    fn accepted_settings_give_distinct_cacheable_points() {
        let dir = std::env::temp_dir().join(format!("busbar_opt_sens_distinct_{}", std::process::id()));
        let path = cache_file(&dir, "DO_a");
        let base = 0.010593076883293234;
        check_sweep("DO_a", base, &settings(0.05, 6)).unwrap();

        let pts = sweep_points(base, 0.05, 6);
        assert!(pts.windows(2).all(|w| w[0] < w[1]));
        let curve: Vec<(f64, f64)> = pts.iter().map(|x| (*x, x * 2.0)).collect();
        store_curve(&path, &curve).unwrap();
        assert_eq!(load_curve(&path, 7).unwrap(), curve);
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn cache_round_trip_and_size_check() {
        let dir = std::env::temp_dir().join(format!("busbar_opt_sens_{}", std::process::id()));
        let path = cache_file(&dir, "DO_y");
        let points = vec![(0.0275, 1.5), (0.02787, 0.01), (0.0282, 2.25)];
        store_curve(&path, &points).unwrap();

        assert_eq!(load_curve(&path, 3).unwrap(), points);

        let err = load_curve(&path, 21).unwrap_err();
        match err {
            ProblemError::CacheSizeMismatch { expected, found, .. } => {
                assert_eq!((expected, found), (21, 3));
            }
            other => panic!("unexpected error: {other}"),
        }
        fs::remove_dir_all(&dir).ok();
    }
}
