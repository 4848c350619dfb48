//! Numerical Sanitization
//!
//! Numerical stability utilities.
//!
//! Functions:
//! - Invalid value detection
//! - Probability clipping before logarithms
//! - Parameter health diagnostics

use candle_nn::VarMap;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::PROB_EPSILON;

/// Health report over every parameter of a model
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterDiagnostics {
    pub is_healthy: bool,
    pub has_nan: bool,
    pub has_inf: bool,
    /// Largest absolute finite value across all parameters
    pub max_abs: f64,
    /// Total number of scalar parameters
    pub numel: usize,
    /// Names of tensors containing NaN or Inf, sorted
    pub unhealthy: Vec<String>,
}

/// True unless every value is finite
pub fn has_invalid_values(values: &[f64]) -> bool {
    !values.iter().all(|v| v.is_finite())
}

/// Clip a probability into [PROB_EPSILON, 1 - PROB_EPSILON]; NaN becomes 0.5
pub fn clamp_probability(p: f64) -> f64 {
    if p.is_nan() {
        return 0.5;
    }
    p.clamp(PROB_EPSILON, 1.0 - PROB_EPSILON)
}

/// Scan every variable in `varmap` for NaN/Inf values
pub fn diagnose_parameters(varmap: &VarMap) -> Result<ParameterDiagnostics> {
    let data = varmap.data().lock().unwrap_or_else(|e| e.into_inner());

    let mut report = ParameterDiagnostics::default();
    for (name, var) in data.iter() {
        let values: Vec<f64> = var
            .as_tensor()
            .flatten_all()?
            .to_dtype(candle_core::DType::F64)?
            .to_vec1()?;
        report.numel += values.len();
        report.max_abs = values
            .iter()
            .filter(|v| v.is_finite())
            .fold(report.max_abs, |acc, v| acc.max(v.abs()));

        if has_invalid_values(&values) {
            report.has_nan |= values.iter().any(|v| v.is_nan());
            report.has_inf |= values.iter().any(|v| v.is_infinite());
            report.unhealthy.push(name.clone());
        }
    }
    report.unhealthy.sort();
    report.is_healthy = !report.has_nan && !report.has_inf;
    Ok(report)
}
