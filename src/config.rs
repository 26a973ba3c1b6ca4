use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::chunks::DEFAULT_TARGET_CHUNK_BYTES;
use crate::error::{GapFillError, Result};
use crate::guard::{SufficiencyGuard, DEFAULT_MIN_COUNT};
use crate::kernels::Kernel;
use crate::temporal::FitFailurePolicy;
use crate::time_axis::{self, PredictionAxis, Step};

fn default_start_date() -> String {
    "2000-01-01".into()
}

fn default_end_date() -> String {
    "2023-01-01".into()
}

fn default_step() -> Step {
    Step::Months(1)
}

fn default_time_dim() -> String {
    "time".into()
}

fn default_min_count() -> Option<usize> {
    Some(DEFAULT_MIN_COUNT)
}

fn default_alpha() -> f64 {
    2.0
}

fn default_target_chunk_bytes() -> usize {
    DEFAULT_TARGET_CHUNK_BYTES
}

/// Run configuration, usually loaded from JSON.
///
/// ```json
/// {
///   "start_date": "2000-01-01",
///   "end_date": "2023-01-01",
///   "step": "M",
///   "min_count": 3,
///   "alpha": 2.0,
///   "kernel": {"type": "sum", "terms": [
///     {"type": "product", "factors": [{"type": "constant", "value": 30.0},
///                                     {"type": "rbf", "length_scale": 1.0}]},
///     {"type": "white", "noise_level": 0.5}
///   ]}
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GapFillConfig {
    #[serde(default = "default_start_date")]
    pub start_date: String,
    #[serde(default = "default_end_date")]
    pub end_date: String,
    #[serde(default = "default_step")]
    pub step: Step,
    #[serde(default = "default_time_dim")]
    pub time_dim: String,
    #[serde(default = "default_min_count")]
    pub min_count: Option<usize>,
    #[serde(default)]
    pub min_time_span: Option<f64>,
    /// Noise variance used when no per-sample uncertainty is supplied.
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    pub kernel: Kernel,
    #[serde(default = "default_target_chunk_bytes")]
    pub target_chunk_bytes: usize,
    #[serde(default)]
    pub fit_failure: FitFailurePolicy,
    #[serde(default)]
    pub n_workers: Option<usize>,
}

impl GapFillConfig {
    /// Defaults for everything but the kernel.
    pub fn new(kernel: Kernel) -> Self {
        Self {
            start_date: default_start_date(),
            end_date: default_end_date(),
            step: default_step(),
            time_dim: default_time_dim(),
            min_count: default_min_count(),
            min_time_span: None,
            alpha: default_alpha(),
            kernel,
            target_chunk_bytes: default_target_chunk_bytes(),
            fit_failure: FitFailurePolicy::default(),
            n_workers: None,
        }
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        self.kernel.validate()?;
        if !self.alpha.is_finite() || self.alpha < 0.0 {
            return Err(GapFillError::InvalidConfig(format!(
                "alpha must be finite and non-negative, got {}",
                self.alpha
            )));
        }
        if let Some(span) = self.min_time_span {
            if !span.is_finite() || span < 0.0 {
                return Err(GapFillError::InvalidConfig(format!(
                    "min_time_span must be finite and non-negative, got {span}"
                )));
            }
        }
        if self.target_chunk_bytes < std::mem::size_of::<f64>() {
            return Err(GapFillError::InvalidConfig(format!(
                "target_chunk_bytes must hold at least one value, got {}",
                self.target_chunk_bytes
            )));
        }
        if self.time_dim.is_empty() {
            return Err(GapFillError::InvalidConfig("time_dim must not be empty".into()));
        }
        time_axis::parse_date(&self.start_date)?;
        time_axis::parse_date(&self.end_date)?;
        Ok(())
    }

    pub fn guard(&self) -> SufficiencyGuard {
        SufficiencyGuard::new(self.min_count, self.min_time_span)
    }

    pub fn prediction_axis(&self) -> Result<PredictionAxis> {
        time_axis::build(
            time_axis::parse_date(&self.start_date)?,
            time_axis::parse_date(&self.end_date)?,
            self.step,
        )
    }

    pub fn with_dates(mut self, start: &str, end: &str, step: Step) -> Self {
        self.start_date = start.to_string();
        self.end_date = end.to_string();
        self.step = step;
        self
    }

    pub fn with_guard(mut self, guard: SufficiencyGuard) -> Self {
        self.min_count = guard.min_count;
        self.min_time_span = guard.min_time_span;
        self
    }
}
