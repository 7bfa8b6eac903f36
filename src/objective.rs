//! Current imbalance between two output ports.

use serde::{Deserialize, Serialize};

use crate::error::ProblemResult;
use crate::results::pick;

/// Which entries of the currents vector are balanced against each other.
///
/// Port 0 is the input; ports 1 and 2 are the left and centre outputs in both
/// the full and the half-symmetric layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct ObjectivePorts {
    #[serde(rename = "reference_port", default = "default_reference")]
    pub reference: usize,
    #[serde(rename = "compared_port", default = "default_compared")]
    pub compared: usize,
}

fn default_reference() -> usize {
    1
}

fn default_compared() -> usize {
    2
}

impl Default for ObjectivePorts {
    fn default() -> Self {
        Self {
            reference: default_reference(),
            compared: default_compared(),
        }
    }
}

/// `| |I_ref| - coefficient * |I_cmp| |`. NaN and infinities pass through.
pub fn imbalance(reference: f64, compared: f64, coefficient: f64) -> f64 {
    (reference.abs() - coefficient * compared.abs()).abs()
}

/// Imbalance of ports 1 and 2.
pub fn objective(currents: &[f64], coefficient: f64) -> ProblemResult<f64> {
    objective_with(currents, coefficient, ObjectivePorts::default())
}

pub fn objective_with(currents: &[f64], coefficient: f64, ports: ObjectivePorts) -> ProblemResult<f64> {
    let reference = pick("currents", currents, ports.reference)?;
    let compared = pick("currents", currents, ports.compared)?;
    Ok(imbalance(reference, compared, coefficient))
}
