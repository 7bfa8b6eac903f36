//! Result files written by the solver's post-processing step.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ProblemError, ProblemResult};

/// Names of the result fields, in log column order.
pub const FIELDS: [&str; 3] = ["currents", "voltages", "losses"];

/// Port currents, port voltages and integrated losses of one solve.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub currents: Vec<f64>,
    pub voltages: Vec<f64>,
    pub losses: Vec<f64>,
}

impl EvaluationResult {
    pub fn current(&self, index: usize) -> ProblemResult<f64> {
        pick("currents", &self.currents, index)
    }

    pub fn voltage(&self, index: usize) -> ProblemResult<f64> {
        pick("voltages", &self.voltages, index)
    }

    pub fn loss(&self, index: usize) -> ProblemResult<f64> {
        pick("losses", &self.losses, index)
    }
}

pub(crate) fn pick(field: &'static str, values: &[f64], index: usize) -> ProblemResult<f64> {
    values.get(index).copied().ok_or(ProblemError::MissingValue {
        field,
        index,
        len: values.len(),
    })
}

/// Load `I<suffix>`, `U<suffix>` and `integrated.losses<suffix>` from `dir`.
pub fn read_results(dir: &Path, suffix: &str) -> ProblemResult<EvaluationResult> {
    let result = EvaluationResult {
        currents: read_table(&dir.join(format!("I{}", suffix)))?,
        voltages: read_table(&dir.join(format!("U{}", suffix)))?,
        losses: read_table(&dir.join(format!("integrated.losses{}", suffix)))?,
    };
    debug!(?result, "results loaded");
    Ok(result)
}

/// Read a whitespace-delimited table, drop its leading row, flatten the rest.
///
/// A single-line table is a single row of values whose first column is the
/// time stamp the solver prepends, so the leading value is dropped instead.
pub fn read_table(path: &Path) -> ProblemResult<Vec<f64>> {
    if !path.exists() {
        return Err(ProblemError::MissingResultFile {
            path: path.to_path_buf(),
        });
    }
    let text = std::fs::read_to_string(path)?;
    parse_table(&text).map_err(|reason| ProblemError::malformed(path, reason))
}

fn parse_table(text: &str) -> Result<Vec<f64>, String> {
    let rows: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let tokens: Vec<&str> = match rows.as_slice() {
        [] => return Err("file is empty".into()),
        [only] => only.split_whitespace().skip(1).collect(),
        [_, rest @ ..] => rest.iter().flat_map(|r| r.split_whitespace()).collect(),
    };
    if tokens.is_empty() {
        return Err("no values after the leading row".into());
    }
    tokens
        .iter()
        .map(|t| {
            t.parse::<f64>()
                .map_err(|_| format!("'{}' is not a number", t))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_row_drops_time_column() {
        let v = parse_table("0 187.5 -125.0010832372 -62.4989167628\n").unwrap();
        assert_eq!(v, vec![187.5, -125.0010832372, -62.4989167628]);
    }

    #[test]
    fn multi_row_drops_header_row() {
        let v = parse_table("# t I1 I2\n1 2\n3\t4\n\n").unwrap();
        assert_eq!(v, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(parse_table("").is_err());
        assert!(parse_table("0\n").is_err());
        assert!(parse_table("header\n1 two 3\n").is_err());
    }

    #[test]
    fn missing_file() {
        let dir = std::env::temp_dir().join("busbar_opt_results_missing");
        let err = read_results(&dir, ".none").unwrap_err();
        match err {
            ProblemError::MissingResultFile { path } => {
                assert!(path.ends_with("I.none"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn short_vectors_report_missing_value() {
        let r = EvaluationResult {
            currents: vec![1.0, 2.0],
            ..Default::default()
        };
        assert_eq!(r.current(1).unwrap(), 2.0);
        assert!(matches!(
            r.current(2),
            Err(ProblemError::MissingValue { field: "currents", index: 2, len: 2 })
        ));
    }
}
