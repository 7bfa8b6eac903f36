//! Parsing of the free text printed by the mesher and the solver.
//!
//! Patterns recognised here:
//! - mesh summary: `<nodes> nodes <elements> elements` on one line (last one wins)
//! - mesh distrust markers: `warning` or `skipping`, any case
//! - solver acknowledgement: `Adding number <name> = <value prefix>`
//! - geometry defaults: `DefineConstant[ <name> = {<value>, Name ...`

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;

use crate::error::{ProblemError, ProblemResult};

const DISTRUST_MARKERS: [&str; 2] = ["warning", "skipping"];

/// Size of the mesh the last mesher run produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MeshDiagnostics {
    pub nodes: usize,
    pub elements: usize,
}

pub fn parse_mesh_stats(text: &str) -> ProblemResult<MeshDiagnostics> {
    let mut found = None;
    for line in text.lines() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        for w in tokens.windows(4) {
            if w[1] != "nodes" || w[3] != "elements" {
                continue;
            }
            if let (Ok(nodes), Ok(elements)) = (w[0].parse(), w[2].parse()) {
                found = Some(MeshDiagnostics { nodes, elements });
            }
        }
    }
    found.ok_or(ProblemError::MeshParse)
}

/// First line carrying a warning or skip marker, if any.
pub fn find_distrust_marker(text: &str) -> Option<&str> {
    text.lines().find(|line| {
        let lower = line.to_lowercase();
        DISTRUST_MARKERS.iter().any(|m| lower.contains(m))
    })
}

/// Value as the solver echoes it: positional notation inside `[1e-4, 1e16)`,
/// otherwise exponent form with a signed exponent of at least two digits
/// (`5e-05`, `1.5e+16`).
pub fn solver_rendering(value: f64) -> String {
    let magnitude = value.abs();
    if value == 0.0 || !value.is_finite() || (1e-4..1e16).contains(&magnitude) {
        return value.to_string();
    }
    let sci = format!("{:e}", value);
    match sci.split_once('e') {
        Some((mantissa, exponent)) => {
            let (sign, digits) = match exponent.strip_prefix('-') {
                Some(digits) => ('-', digits),
                None => ('+', exponent),
            };
            format!("{}e{}{:0>2}", mantissa, sign, digits)
        }
        None => sci,
    }
}

/// Acknowledgement line the solver prints for an injected parameter.
///
/// The solver echoes values in its own format, so only the first
/// `prefix_len` characters of the value are compared.
pub fn ack_pattern(name: &str, value: f64, prefix_len: usize) -> String {
    let rendered = solver_rendering(value);
    let prefix: String = rendered.chars().take(prefix_len).collect();
    format!("Adding number {} = {}", name, prefix)
}

pub fn check_acknowledged<'a>(
    text: &str,
    values: impl IntoIterator<Item = (&'a str, f64)>,
    prefix_len: usize,
) -> ProblemResult<()> {
    for (name, value) in values {
        let expected = ack_pattern(name, value, prefix_len);
        if !text.contains(&expected) {
            return Err(ProblemError::ParameterAck {
                name: name.to_string(),
                expected,
            });
        }
    }
    Ok(())
}

/// Default value a `.geo` file declares for `name` through `DefineConstant`.
pub fn declared_constant(text: &str, name: &str) -> Option<f64> {
    const OPEN: &str = "DefineConstant[";
    let mut rest = text;
    while let Some(pos) = rest.find(OPEN) {
        rest = &rest[pos + OPEN.len()..];
        let Some(after_name) = rest.trim_start_matches(' ').strip_prefix(name) else {
            continue;
        };
        let Some(after_eq) = after_name.trim_start_matches(' ').strip_prefix('=') else {
            continue;
        };
        let Some(body) = after_eq.trim_start_matches(' ').strip_prefix('{') else {
            continue;
        };
        let end = body
            .find(|c: char| c == ',' || c == '}' || c.is_whitespace())
            .unwrap_or(body.len());
        if let Ok(value) = body[..end].parse() {
            return Some(value);
        }
    }
    None
}

/// Every default must be declared in `geo_file` with exactly the same value.
pub fn check_declared_defaults(geo_file: &Path, defaults: &BTreeMap<String, f64>) -> ProblemResult<()> {
    let text = std::fs::read_to_string(geo_file)?;
    for (name, &expected) in defaults {
        let found = declared_constant(&text, name);
        if found != Some(expected) {
            return Err(ProblemError::UndeclaredDefault {
                path: geo_file.to_path_buf(),
                name: name.clone(),
                expected,
                found,
            });
        }
    }
    Ok(())
}
