//! Conversion of raw instrument readings into concentrations.
//!
//! Readings outside the calibration range of a curve are reported as errors,
//! never clamped onto the range.

use lims_types::{LimsResult, MissingDataError, ValidationError};
use ndarray::{Array1, Zip};
use serde::{Deserialize, Serialize};

/// Average mass of one base pair of double stranded DNA, g/mol.
const DALTONS_PER_BP: f64 = 660.0;

/// One point of a standard dilution series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Standard {
    pub raw: f64,
    pub concentration: f64,
}

/// How a raw reading turns into a concentration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "curve", rename_all = "snake_case")]
pub enum CurveParameters {
    /// concentration = slope * raw + intercept
    Linear {
        slope: f64,
        intercept: f64,
        min_raw: f64,
        max_raw: f64,
    },
    /// qPCR style: concentration = 10^((raw - intercept) / slope), raw being a
    /// crossing point.
    LogLinear {
        slope: f64,
        intercept: f64,
        min_raw: f64,
        max_raw: f64,
    },
    /// Linear fit through a standard series; the calibration range is the raw
    /// span of the standards.
    StandardCurve { standards: Vec<Standard> },
}

/// Least squares solution of concentration = slope * raw + intercept.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
    pub min_raw: f64,
    pub max_raw: f64,
}

fn dot_product(a: &Array1<f64>, b: &Array1<f64>) -> f64 {
    Zip::from(a).and(b).fold(0.0, |acc, &x, &y| acc + x * y)
}

/// Fit a straight line through the standards.
pub fn fit_standard_curve(standards: &[Standard]) -> LimsResult<LinearFit> {
    let mut distinct: Vec<f64> = standards.iter().map(|s| s.raw).collect();
    distinct.sort_by(f64::total_cmp);
    distinct.dedup();
    if distinct.len() < 2 {
        return Err(MissingDataError::InsufficientStandards {
            required: 2,
            given: distinct.len(),
        }
        .into());
    }
    for s in standards {
        if !s.raw.is_finite() || !s.concentration.is_finite() {
            return Err(ValidationError::InvalidParameter {
                what: "standard",
                requirement: "finite",
                value: if s.raw.is_finite() { s.concentration } else { s.raw },
            }
            .into());
        }
    }

    let x = Array1::from_iter(standards.iter().map(|s| s.raw));
    let y = Array1::from_iter(standards.iter().map(|s| s.concentration));
    let ones = Array1::<f64>::ones(x.len());
    // Normal equations of [1 x] * [intercept, slope]^T = y.
    let a = dot_product(&ones, &ones);
    let b = dot_product(&ones, &x);
    let c = dot_product(&x, &x);
    let y1 = dot_product(&ones, &y);
    let y2 = dot_product(&x, &y);
    let det = a * c - b * b;

    Ok(LinearFit {
        slope: (a * y2 - b * y1) / det,
        intercept: (c * y1 - b * y2) / det,
        min_raw: distinct[0],
        max_raw: distinct[distinct.len() - 1],
    })
}

fn check_range(raw: f64, min_raw: f64, max_raw: f64) -> LimsResult<()> {
    if raw.is_finite() && raw >= min_raw && raw <= max_raw {
        Ok(())
    } else {
        Err(ValidationError::OutOfCalibrationRange {
            raw,
            min: min_raw,
            max: max_raw,
        }
        .into())
    }
}

/// Convert one raw reading. A linear fit that dips below zero inside the
/// calibration range reports zero concentration.
pub fn compute_concentration(raw: f64, curve: &CurveParameters) -> LimsResult<f64> {
    let concentration = match *curve {
        CurveParameters::Linear {
            slope,
            intercept,
            min_raw,
            max_raw,
        } => {
            check_range(raw, min_raw, max_raw)?;
            slope * raw + intercept
        }
        CurveParameters::LogLinear {
            slope,
            intercept,
            min_raw,
            max_raw,
        } => {
            if slope == 0.0 || !slope.is_finite() {
                return Err(ValidationError::InvalidParameter {
                    what: "log-linear slope",
                    requirement: "finite and non-zero",
                    value: slope,
                }
                .into());
            }
            check_range(raw, min_raw, max_raw)?;
            10f64.powf((raw - intercept) / slope)
        }
        CurveParameters::StandardCurve { ref standards } => {
            let fit = fit_standard_curve(standards)?;
            check_range(raw, fit.min_raw, fit.max_raw)?;
            fit.slope * raw + fit.intercept
        }
    };
    Ok(concentration.max(0.0))
}

/// Convert a mass concentration (ng/µL) of a library with the given average
/// fragment size into a molar concentration (nM).
pub fn ng_per_ul_to_nm(concentration: f64, fragment_size_bp: f64) -> LimsResult<f64> {
    if !(fragment_size_bp > 0.0) {
        return Err(ValidationError::InvalidParameter {
            what: "fragment size",
            requirement: "greater than 0",
            value: fragment_size_bp,
        }
        .into());
    }
    Ok(concentration / (DALTONS_PER_BP * fragment_size_bp) * 1e6)
}
