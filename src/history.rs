//! Append-only record of every successful evaluation.

use std::path::Path;

use serde::Serialize;

use crate::error::{ProblemError, ProblemResult};
use crate::io::{format_vector, parse_vector, read_csv, CsvWriter};
use crate::problem::ParameterVector;
use crate::results::{EvaluationResult, FIELDS};

/// One evaluation: the inputs that went in and the fields that came out.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRow {
    pub parameters: ParameterVector,
    pub result: EvaluationResult,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvaluationLog {
    rows: Vec<LogRow>,
}

impl EvaluationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, parameters: ParameterVector, result: EvaluationResult) {
        self.rows.push(LogRow { parameters, result });
    }

    pub fn rows(&self) -> &[LogRow] {
        &self.rows
    }

    pub fn last(&self) -> Option<&LogRow> {
        self.rows.last()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Columns are the result fields followed by the parameter names of the
    /// first row.
    pub fn write_csv(&self, path: &Path) -> ProblemResult<()> {
        let names: Vec<String> = self
            .rows
            .first()
            .map(|r| r.parameters.names().map(str::to_string).collect())
            .unwrap_or_default();

        let mut header: Vec<String> = FIELDS.iter().map(|f| f.to_string()).collect();
        header.extend(names.iter().cloned());

        let mut w = CsvWriter::create(path)?;
        w.write_header(&header)?;
        for row in &self.rows {
            let mut cells = vec![
                format_vector(&row.result.currents),
                format_vector(&row.result.voltages),
                format_vector(&row.result.losses),
            ];
            for name in &names {
                let value = row
                    .parameters
                    .get(name)
                    .ok_or_else(|| ProblemError::UnknownParameter(name.clone()))?;
                cells.push(value.to_string());
            }
            w.write_row(&cells)?;
        }
        w.flush()
    }

    pub fn read_csv(path: &Path) -> ProblemResult<Self> {
        let (header, cells) = read_csv(path)?;
        if header.len() < FIELDS.len() || header[..FIELDS.len()] != FIELDS {
            return Err(ProblemError::malformed(
                path,
                format!("header must start with {}", FIELDS.join(",")),
            ));
        }
        let names = &header[FIELDS.len()..];

        let vector = |cell: &str| parse_vector(cell).map_err(|e| ProblemError::malformed(path, e));

        let mut log = Self::new();
        for row in cells {
            let result = EvaluationResult {
                currents: vector(&row[0])?,
                voltages: vector(&row[1])?,
                losses: vector(&row[2])?,
            };
            let mut pairs = Vec::with_capacity(names.len());
            for (name, cell) in names.iter().zip(&row[FIELDS.len()..]) {
                let value = cell.parse::<f64>().map_err(|_| {
                    ProblemError::malformed(path, format!("{} = '{}' is not a number", name, cell))
                })?;
                pairs.push((name.clone(), value));
            }
            log.append(ParameterVector::from_pairs(pairs), result);
        }
        Ok(log)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(y: f64) -> (ParameterVector, EvaluationResult) {
        (
            ParameterVector::from_pairs(vec![("DO_y".into(), y), ("DO_a".into(), 0.0075)]),
            EvaluationResult {
                currents: vec![187.5, -118.8049184147, -68.6950815853],
                voltages: vec![0.0123, 0.0, 0.0],
                losses: vec![41.7],
            },
        )
    }

    #[test]
    fn csv_export_reloads_vectors() {
        let mut log = EvaluationLog::new();
        let (p, r) = row(0.035);
        log.append(p, r);
        let (p, r) = row(0.02787345);
        log.append(p, r);

        let dir = std::env::temp_dir().join(format!("busbar_opt_history_{}", std::process::id()));
        let path = dir.join("log.csv");
        log.write_csv(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("currents,voltages,losses,DO_y,DO_a\n"));

        let back = EvaluationLog::read_csv(&path).unwrap();
        assert_eq!(back, log);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn empty_log_has_field_header_only() {
        let dir = std::env::temp_dir().join(format!("busbar_opt_history_empty_{}", std::process::id()));
        let path = dir.join("log.csv");
        EvaluationLog::new().write_csv(&path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "currents,voltages,losses\n");
        assert!(EvaluationLog::read_csv(&path).unwrap().is_empty());
        std::fs::remove_dir_all(&dir).ok();
    }
}
