use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{GapFillError, Result};
use crate::gp::fit_gp;
use crate::guard::{SufficiencyGuard, Verdict};
use crate::kernels::Kernel;

/// Mean and one-sigma curves on the prediction axis for one pixel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub mean: Vec<f64>,
    pub std: Vec<f64>,
}

impl PredictionResult {
    /// All-NaN result of length `n`, shape-identical to a real fit.
    pub fn missing(n: usize) -> Self {
        Self {
            mean: vec![f64::NAN; n],
            std: vec![f64::NAN; n],
        }
    }

    pub fn len(&self) -> usize {
        self.mean.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mean.is_empty()
    }

    pub fn is_missing(&self) -> bool {
        self.mean.iter().chain(self.std.iter()).all(|v| v.is_nan())
    }
}

/// What to do when the regressor fails numerically on one pixel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitFailurePolicy {
    /// Fill the pixel with NaN and carry on with the grid.
    #[default]
    Degrade,
    /// Abort the whole run with the pixel's error.
    Propagate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelStatus {
    Fitted,
    Insufficient,
    FitFailed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PixelOutcome {
    pub result: PredictionResult,
    pub status: PixelStatus,
}

/// Per-sample noise variances for one pixel.
#[derive(Debug, Clone, Copy)]
pub enum PixelWeights<'a> {
    /// One variance for every sample.
    Scalar(f64),
    /// One variance per raw (unfiltered) sample.
    Series(&'a [f64]),
}

/// Fit a GP to finite samples and evaluate it on `axis`.
///
/// Inputs must already be restricted to valid samples and share one length.
/// Numeric failures are returned, not absorbed.
pub fn fit_predict(
    times: &[f64],
    values: &[f64],
    weights: &[f64],
    kernel: &Kernel,
    axis: &[f64],
) -> Result<PredictionResult> {
    if values.len() != times.len() {
        return Err(GapFillError::ShapeMismatch {
            expected: times.len(),
            found: values.len(),
        });
    }
    if weights.len() != times.len() {
        return Err(GapFillError::ShapeMismatch {
            expected: times.len(),
            found: weights.len(),
        });
    }

    let model = fit_gp(times, values, weights, kernel)?;
    let (mean, std) = model.predict_with_std(axis)?;
    Ok(PredictionResult {
        mean: mean.to_vec(),
        std: std.to_vec(),
    })
}

/// Filtered copy of one pixel's valid samples.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidSamples {
    pub times: Vec<f64>,
    pub values: Vec<f64>,
    pub weights: Vec<f64>,
}

/// Keep samples whose value, timestamp and weight are all finite.
pub fn select_valid(
    times: &[f64],
    values: &[f64],
    weights: PixelWeights<'_>,
) -> Result<ValidSamples> {
    if times.len() != values.len() {
        return Err(GapFillError::ShapeMismatch {
            expected: values.len(),
            found: times.len(),
        });
    }
    if let PixelWeights::Series(w) = weights {
        if w.len() != values.len() {
            return Err(GapFillError::ShapeMismatch {
                expected: values.len(),
                found: w.len(),
            });
        }
    }

    let mut out = ValidSamples::default();
    for i in 0..values.len() {
        let w = match weights {
            PixelWeights::Scalar(a) => a,
            PixelWeights::Series(ws) => ws[i],
        };
        if values[i].is_finite() && times[i].is_finite() && w.is_finite() {
            out.times.push(times[i]);
            out.values.push(values[i]);
            out.weights.push(w);
        }
    }
    Ok(out)
}

/// Guarded gap filling of one raw pixel series.
///
/// Shape errors are always returned. A guard rejection yields a NaN result
/// without touching the regressor; numeric failures follow `policy`.
pub fn gap_fill_pixel(
    times: &[f64],
    values: &[f64],
    weights: PixelWeights<'_>,
    kernel: &Kernel,
    axis: &[f64],
    guard: &SufficiencyGuard,
    policy: FitFailurePolicy,
) -> Result<PixelOutcome> {
    let valid = select_valid(times, values, weights)?;

    let verdict = guard.evaluate(&valid.times);
    if verdict != Verdict::Sufficient {
        return Ok(PixelOutcome {
            result: PredictionResult::missing(axis.len()),
            status: PixelStatus::Insufficient,
        });
    }

    match fit_predict(&valid.times, &valid.values, &valid.weights, kernel, axis) {
        Ok(result) => Ok(PixelOutcome {
            result,
            status: PixelStatus::Fitted,
        }),
        Err(GapFillError::NumericFit(msg)) if policy == FitFailurePolicy::Degrade => {
            debug!("degrading pixel with {} samples: {msg}", valid.times.len());
            Ok(PixelOutcome {
                result: PredictionResult::missing(axis.len()),
                status: PixelStatus::FitFailed,
            })
        }
        Err(e) => Err(e),
    }
}
