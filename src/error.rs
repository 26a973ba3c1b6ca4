use thiserror::Error;

/// Errors produced while building axes, fitting pixels or assembling cubes.
///
/// Pixel-local numeric problems are normally absorbed by the grid driver
/// (see [`crate::temporal::FitFailurePolicy`]); everything else is structural
/// and surfaces to the caller.
#[derive(Debug, Error)]
pub enum GapFillError {
    #[error("invalid time range: end {end} precedes start {start}")]
    InvalidRange { start: String, end: String },

    #[error("invalid sampling step '{0}'")]
    InvalidStep(String),

    #[error("invalid date '{0}', expected YYYY-MM-DD")]
    InvalidDate(String),

    #[error("invalid prediction axis: {0}")]
    InvalidAxis(String),

    #[error("shape mismatch: expected {expected} elements, found {found}")]
    ShapeMismatch { expected: usize, found: usize },

    #[error("numeric fit failure: {0}")]
    NumericFit(String),

    #[error("fit failed for pixel {pixel}: {source}")]
    PixelFit {
        pixel: usize,
        #[source]
        source: Box<GapFillError>,
    },

    #[error("invalid kernel: {0}")]
    InvalidKernel(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("dimension error: {0}")]
    Dimension(String),

    #[error("failed to build worker pool: {0}")]
    WorkerPool(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, GapFillError>;
