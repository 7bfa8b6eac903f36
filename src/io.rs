use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::{ProblemError, ProblemResult};

/// Comma-separated table writer. Cells must not contain commas or newlines.
pub struct CsvWriter {
    w: BufWriter<File>,
}

impl CsvWriter {
    pub fn create(path: &Path) -> ProblemResult<Self> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        let f = File::create(path)?;
        Ok(Self { w: BufWriter::new(f) })
    }

    pub fn write_header<S: AsRef<str>>(&mut self, columns: &[S]) -> ProblemResult<()> {
        self.write_row(columns)
    }

    pub fn write_row<S: AsRef<str>>(&mut self, cells: &[S]) -> ProblemResult<()> {
        let line = cells.iter().map(|c| c.as_ref()).collect::<Vec<_>>().join(",");
        writeln!(self.w, "{}", line)?;
        Ok(())
    }

    pub fn flush(&mut self) -> ProblemResult<()> {
        self.w.flush()?;
        Ok(())
    }
}

/// Header and rows of a table written by [`CsvWriter`].
pub fn read_csv(path: &Path) -> ProblemResult<(Vec<String>, Vec<Vec<String>>)> {
    let text = fs::read_to_string(path)?;
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());
    let header: Vec<String> = lines
        .next()
        .ok_or_else(|| ProblemError::malformed(path, "missing header"))?
        .split(',')
        .map(str::to_string)
        .collect();
    let mut rows = Vec::new();
    for (i, line) in lines.enumerate() {
        let row: Vec<String> = line.split(',').map(str::to_string).collect();
        if row.len() != header.len() {
            return Err(ProblemError::malformed(
                path,
                format!("row {} has {} cells, header has {}", i + 1, row.len(), header.len()),
            ));
        }
        rows.push(row);
    }
    Ok((header, rows))
}

/// Vector cell: values separated by single spaces.
pub fn format_vector(values: &[f64]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn parse_vector(cell: &str) -> Result<Vec<f64>, String> {
    cell.split_whitespace()
        .map(|t| t.parse::<f64>().map_err(|_| format!("'{}' is not a number", t)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_cells_round_trip_exactly() {
        let v = vec![187.5, -125.0010832372, -62.4989167628, 1e-12];
        assert_eq!(parse_vector(&format_vector(&v)).unwrap(), v);
        assert_eq!(parse_vector("").unwrap(), Vec::<f64>::new());
        assert!(parse_vector("1 x").is_err());
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let dir = std::env::temp_dir().join(format!("busbar_opt_io_{}", std::process::id()));
        let path = dir.join("ragged.csv");
        let mut w = CsvWriter::create(&path).unwrap();
        w.write_header(&["a", "b"]).unwrap();
        w.write_row(&["1", "2"]).unwrap();
        w.write_row(&["3"]).unwrap();
        w.flush().unwrap();

        assert!(read_csv(&path).is_err());
        fs::remove_dir_all(&dir).ok();
    }
}
