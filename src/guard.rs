use serde::{Deserialize, Serialize};

pub const DEFAULT_MIN_COUNT: usize = 3;

/// Why a pixel was accepted or rejected before fitting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
    Sufficient,
    NoSamples,
    TooFewSamples { found: usize, required: usize },
    SpanTooShort { span: f64, required: f64 },
}

impl Verdict {
    pub fn is_sufficient(&self) -> bool {
        matches!(self, Verdict::Sufficient)
    }
}

/// Pre-fit data-sufficiency policy.
///
/// `None` (or a zero threshold) disables a constraint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SufficiencyGuard {
    pub min_count: Option<usize>,
    pub min_time_span: Option<f64>,
}

impl Default for SufficiencyGuard {
    fn default() -> Self {
        Self {
            min_count: Some(DEFAULT_MIN_COUNT),
            min_time_span: None,
        }
    }
}

impl SufficiencyGuard {
    pub fn new(min_count: Option<usize>, min_time_span: Option<f64>) -> Self {
        Self {
            min_count,
            min_time_span,
        }
    }

    /// Guard with both constraints disabled.
    pub fn disabled() -> Self {
        Self::new(None, None)
    }

    /// Evaluate the timestamps of a pixel's *valid* samples.
    pub fn evaluate(&self, valid_times: &[f64]) -> Verdict {
        verdict(
            valid_times.len(),
            self.min_count,
            time_span(valid_times),
            self.min_time_span,
        )
    }
}

/// Shared threshold checks, count before span.
fn verdict(
    valid_count: usize,
    min_count: Option<usize>,
    span: f64,
    min_time_span: Option<f64>,
) -> Verdict {
    if valid_count == 0 {
        return Verdict::NoSamples;
    }
    if let Some(required) = min_count.filter(|&c| c > 0) {
        if valid_count < required {
            return Verdict::TooFewSamples {
                found: valid_count,
                required,
            };
        }
    }
    if let Some(required) = min_time_span.filter(|&s| s > 0.0) {
        if span < required {
            return Verdict::SpanTooShort { span, required };
        }
    }
    Verdict::Sufficient
}

/// Spread between the earliest and latest timestamp; 0 for an empty slice.
pub fn time_span(times: &[f64]) -> f64 {
    if times.is_empty() {
        return 0.0;
    }
    let lo = times.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = times.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    hi - lo
}

/// Stateless form of the policy.
pub fn is_sufficient(
    valid_count: usize,
    min_count: Option<usize>,
    time_span: f64,
    min_time_span: Option<f64>,
) -> bool {
    verdict(valid_count, min_count, time_span, min_time_span).is_sufficient()
}
