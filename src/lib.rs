//! Gap filling of raster time-series cubes with per-pixel Gaussian-process
//! regression.
//!
//! Every pixel's irregular, noisy series is fitted independently with a
//! fixed-hyperparameter GP and evaluated on one evenly spaced prediction
//! axis. Pixels run in parallel across the cube's spatial blocks.

pub mod assemble;
pub mod batch;
pub mod chunks;
pub mod common;
pub mod config;
pub mod error;
pub mod gp;
pub mod guard;
pub mod kernels;
pub mod temporal;
pub mod time_axis;

use log::info;

pub use assemble::{assemble, OutputCube};
pub use batch::{apply_gpr, map_cube, map_elements, GridApplicator, GridSummary, RawGridOutput};
pub use chunks::ChunkLayout;
pub use common::{RasterCube, Uncertainty};
pub use config::GapFillConfig;
pub use error::{GapFillError, Result};
pub use guard::{is_sufficient, SufficiencyGuard};
pub use kernels::{Kernel, PairwiseMetric};
pub use temporal::{
    fit_predict, gap_fill_pixel, FitFailurePolicy, PixelStatus, PixelWeights, PredictionResult,
};
pub use time_axis::{create_prediction_timeseries, PredictionAxis, Step};

/// Gap fill a cube using the configuration's scalar `alpha` for every sample.
pub fn gap_fill(cube: &RasterCube, config: &GapFillConfig) -> Result<OutputCube> {
    gap_fill_with_uncertainty(cube, &Uncertainty::Scalar(config.alpha), config)
}

/// Gap fill a cube with explicit per-sample (or scalar) noise variances.
pub fn gap_fill_with_uncertainty(
    cube: &RasterCube,
    alpha: &Uncertainty,
    config: &GapFillConfig,
) -> Result<OutputCube> {
    config.validate()?;
    let axis = config.prediction_axis()?;
    info!(
        "prediction axis {} .. {} ({} steps of {}), kernel {}",
        config.start_date,
        config.end_date,
        axis.len(),
        config.step,
        config.kernel
    );

    let raw = GridApplicator::new(&config.kernel, &axis)
        .guard(config.guard())
        .policy(config.fit_failure)
        .n_workers(config.n_workers)
        .apply(cube, &config.time_dim, alpha)?;

    assemble(raw, &axis, &config.time_dim, config.target_chunk_bytes)
}
