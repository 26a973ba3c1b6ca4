use std::ops::Range;

use log::{debug, info, warn};
use ndarray::{Array2, ArrayD, ArrayView1, ArrayViewD, Axis, IxDyn};
use rayon::prelude::*;
use rayon::ThreadPool;
use serde::{Deserialize, Serialize};

use crate::chunks::ChunkLayout;
use crate::common::{RasterCube, Uncertainty};
use crate::error::{GapFillError, Result};
use crate::guard::SufficiencyGuard;
use crate::kernels::Kernel;
use crate::temporal::{gap_fill_pixel, FitFailurePolicy, PixelOutcome, PixelStatus, PixelWeights};
use crate::time_axis::PredictionAxis;

/// Name of the output core dimension before the assembler relabels it.
pub const CORE_DIM: &str = "new_time";

/// Pixel counts per outcome for one grid run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridSummary {
    pub pixels: usize,
    pub fitted: usize,
    pub insufficient: usize,
    pub failed: usize,
}

impl GridSummary {
    fn record(&mut self, status: PixelStatus) {
        self.pixels += 1;
        match status {
            PixelStatus::Fitted => self.fitted += 1,
            PixelStatus::Insufficient => self.insufficient += 1,
            PixelStatus::FitFailed => self.failed += 1,
        }
    }
}

/// Unlabelled grid output: spatial dims in input order, then [`CORE_DIM`].
#[derive(Debug, Clone)]
pub struct RawGridOutput {
    pub mean: RasterCube,
    pub std: RasterCube,
    pub summary: GridSummary,
}

/// Build a worker pool; `None` or `Some(0)` lets rayon pick the size.
pub fn worker_pool(n_workers: Option<usize>) -> Result<ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(n_workers.unwrap_or(0))
        .build()
        .map_err(|e| GapFillError::WorkerPool(e.to_string()))
}

/// Maps flat pixel indices (row-major over the non-core axes) to 1-D series.
struct PixelIndexer {
    core_axis: usize,
    spatial_axes: Vec<usize>,
    spatial_shape: Vec<usize>,
}

impl PixelIndexer {
    fn new(shape: &[usize], core_axis: usize) -> Self {
        let spatial_axes: Vec<usize> = (0..shape.len()).filter(|&a| a != core_axis).collect();
        let spatial_shape = spatial_axes.iter().map(|&a| shape[a]).collect();
        Self {
            core_axis,
            spatial_axes,
            spatial_shape,
        }
    }

    fn n_pixels(&self) -> usize {
        self.spatial_shape.iter().product()
    }

    /// Copy of the series at pixel `p`, read straight from the source view.
    fn lane(&self, data: &ArrayViewD<'_, f64>, p: usize) -> Vec<f64> {
        let mut index = vec![0usize; self.spatial_shape.len()];
        let mut rem = p;
        for k in (0..self.spatial_shape.len()).rev() {
            index[k] = rem % self.spatial_shape[k];
            rem /= self.spatial_shape[k];
        }
        // Highest axes first so the remaining axis numbers stay valid.
        let mut view = data.view();
        for (k, &axis) in self.spatial_axes.iter().enumerate().rev() {
            view = view.index_axis_move(Axis(axis), index[k]);
        }
        debug_assert_eq!(view.ndim(), 1, "core axis {} left over", self.core_axis);
        view.iter().copied().collect()
    }
}

/// Flat (row-major) pixel indices covered by one block of spatial ranges.
fn block_pixels(spatial_shape: &[usize], block: &[Range<usize>]) -> Vec<usize> {
    let mut strides = vec![1usize; spatial_shape.len()];
    for k in (0..spatial_shape.len().saturating_sub(1)).rev() {
        strides[k] = strides[k + 1] * spatial_shape[k + 1];
    }
    let mut pixels = vec![0usize];
    for (range, stride) in block.iter().zip(&strides) {
        pixels = pixels
            .into_iter()
            .flat_map(|base| range.clone().map(move |i| base + i * stride))
            .collect();
    }
    pixels
}

/// Call `f` once per 1-D series along `core_axis`, block by block in parallel.
///
/// Blocks follow `chunks` along the non-core axes. Each call gets the flat
/// pixel index (row-major over the non-core axes) and its own copy of the
/// series, read from `data` inside the block. Results come back in pixel
/// order whatever the block schedule.
pub fn vectorize_core_dim<T, F>(
    data: &ArrayViewD<'_, f64>,
    core_axis: usize,
    chunks: &ChunkLayout,
    pool: &ThreadPool,
    f: F,
) -> Result<Vec<T>>
where
    T: Send,
    F: Fn(usize, &[f64]) -> Result<T> + Sync,
{
    if core_axis >= data.ndim() {
        return Err(GapFillError::Dimension(format!(
            "core axis {core_axis} out of range for rank {}",
            data.ndim()
        )));
    }
    if chunks.shape() != data.shape() {
        return Err(GapFillError::Dimension(format!(
            "chunk layout for shape {:?} does not match data shape {:?}",
            chunks.shape(),
            data.shape()
        )));
    }

    let indexer = PixelIndexer::new(data.shape(), core_axis);
    let blocks = chunks.blocks(&indexer.spatial_axes);

    let per_block: Vec<Vec<(usize, T)>> = pool.install(|| {
        blocks
            .par_iter()
            .map(|block| {
                let pixels = block_pixels(&indexer.spatial_shape, block);
                debug!("block {block:?}: {} pixels", pixels.len());
                pixels
                    .into_iter()
                    .map(|p| {
                        let series = indexer.lane(data, p);
                        f(p, &series).map(|out| (p, out))
                    })
                    .collect::<Result<Vec<_>>>()
            })
            .collect::<Result<Vec<_>>>()
    })?;

    let mut slots: Vec<Option<T>> = (0..indexer.n_pixels()).map(|_| None).collect();
    for (p, out) in per_block.into_iter().flatten() {
        slots[p] = Some(out);
    }
    slots
        .into_iter()
        .enumerate()
        .map(|(p, slot)| {
            slot.ok_or_else(|| {
                GapFillError::Dimension(format!("pixel {p} not covered by any block"))
            })
        })
        .collect()
}

/// Noise variances as seen by the per-pixel closure.
enum NoiseSource<'a> {
    Scalar(f64),
    PerSample(ArrayViewD<'a, f64>),
}

/// Reject variances no fit can use.
///
/// A scalar must be finite and non-negative. Per-sample arrays may hold
/// NaN or infinity, which mask the sample like a missing value, but no
/// negative entries.
fn check_uncertainty(alpha: &Uncertainty) -> Result<()> {
    match alpha {
        Uncertainty::Scalar(a) if !a.is_finite() || *a < 0.0 => Err(GapFillError::InvalidConfig(
            format!("alpha must be finite and non-negative, got {a}"),
        )),
        Uncertainty::PerSample(arr) => match arr.iter().find(|v| **v < 0.0) {
            Some(v) => Err(GapFillError::InvalidConfig(format!(
                "per-sample alpha must be non-negative, got {v}"
            ))),
            None => Ok(()),
        },
        Uncertainty::Scalar(_) => Ok(()),
    }
}

/// Per-pixel GP gap filling over every spatial location of a cube.
#[derive(Debug, Clone)]
pub struct GridApplicator<'a> {
    kernel: &'a Kernel,
    axis: &'a PredictionAxis,
    guard: SufficiencyGuard,
    policy: FitFailurePolicy,
    n_workers: Option<usize>,
}

impl<'a> GridApplicator<'a> {
    pub fn new(kernel: &'a Kernel, axis: &'a PredictionAxis) -> Self {
        Self {
            kernel,
            axis,
            guard: SufficiencyGuard::default(),
            policy: FitFailurePolicy::default(),
            n_workers: None,
        }
    }

    pub fn guard(mut self, guard: SufficiencyGuard) -> Self {
        self.guard = guard;
        self
    }

    pub fn policy(mut self, policy: FitFailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn n_workers(mut self, n_workers: Option<usize>) -> Self {
        self.n_workers = n_workers;
        self
    }

    /// Fit every pixel of `cube` along `time_dim`.
    ///
    /// The cube's chunk layout along the spatial dims decides the parallel
    /// blocks; the output does not depend on it.
    pub fn apply(
        &self,
        cube: &RasterCube,
        time_dim: &str,
        alpha: &Uncertainty,
    ) -> Result<RawGridOutput> {
        self.kernel.validate()?;
        check_uncertainty(alpha)?;
        let time_axis = cube.axis_of(time_dim).ok_or_else(|| {
            GapFillError::Dimension(format!("no time dimension '{time_dim}' in {:?}", cube.dims()))
        })?;
        let times = cube.coord_at(time_axis);

        let noise = match alpha {
            Uncertainty::Scalar(a) => NoiseSource::Scalar(*a),
            Uncertainty::PerSample(arr) => {
                if arr.shape() != cube.shape() {
                    return Err(if arr.len() != cube.data().len() {
                        GapFillError::ShapeMismatch {
                            expected: cube.data().len(),
                            found: arr.len(),
                        }
                    } else {
                        GapFillError::Dimension(format!(
                            "uncertainty shape {:?} does not match cube shape {:?}",
                            arr.shape(),
                            cube.shape()
                        ))
                    });
                }
                NoiseSource::PerSample(arr.view())
            }
        };

        let pool = worker_pool(self.n_workers)?;
        let indexer = PixelIndexer::new(cube.shape(), time_axis);
        let axis_values = self.axis.values();
        let outcomes: Vec<PixelOutcome> = vectorize_core_dim(
            &cube.data().view(),
            time_axis,
            cube.chunks(),
            &pool,
            |p, series| {
                let per_sample;
                let weights = match &noise {
                    NoiseSource::Scalar(a) => PixelWeights::Scalar(*a),
                    NoiseSource::PerSample(view) => {
                        per_sample = indexer.lane(view, p);
                        PixelWeights::Series(&per_sample)
                    }
                };
                gap_fill_pixel(
                    times,
                    series,
                    weights,
                    self.kernel,
                    axis_values,
                    &self.guard,
                    self.policy,
                )
                .map_err(|e| GapFillError::PixelFit {
                    pixel: p,
                    source: Box::new(e),
                })
            },
        )?;

        let n_out = self.axis.len();
        let mut summary = GridSummary::default();
        let mut mean = Array2::from_elem((outcomes.len(), n_out), f64::NAN);
        let mut std = Array2::from_elem((outcomes.len(), n_out), f64::NAN);
        for (p, outcome) in outcomes.into_iter().enumerate() {
            if outcome.result.len() != n_out {
                return Err(GapFillError::Dimension(format!(
                    "pixel {p} produced {} values for an axis of {n_out}",
                    outcome.result.len()
                )));
            }
            summary.record(outcome.status);
            mean.row_mut(p).assign(&ArrayView1::from(outcome.result.mean.as_slice()));
            std.row_mut(p).assign(&ArrayView1::from(outcome.result.std.as_slice()));
        }

        if summary.failed > 0 {
            warn!(
                "{} of {} pixels degraded to NaN after numeric fit failures",
                summary.failed, summary.pixels
            );
        }
        info!(
            "gap filled {} pixels onto {} timestamps: {} fitted, {} insufficient, {} failed",
            summary.pixels, n_out, summary.fitted, summary.insufficient, summary.failed
        );

        let (mean, std) = self.label_outputs(cube, time_axis, mean, std)?;
        Ok(RawGridOutput { mean, std, summary })
    }

    fn label_outputs(
        &self,
        cube: &RasterCube,
        time_axis: usize,
        mean: Array2<f64>,
        std: Array2<f64>,
    ) -> Result<(RasterCube, RasterCube)> {
        let mut shape = Vec::with_capacity(cube.ndim());
        let mut dims = Vec::with_capacity(cube.ndim());
        let mut coords = Vec::with_capacity(cube.ndim());
        let mut chunk_lists = Vec::with_capacity(cube.ndim());
        for a in (0..cube.ndim()).filter(|&a| a != time_axis) {
            shape.push(cube.shape()[a]);
            dims.push(cube.dims()[a].clone());
            coords.push(cube.coord_at(a).to_vec());
            chunk_lists.push(cube.chunks().chunks()[a].clone());
        }
        shape.push(self.axis.len());
        dims.push(CORE_DIM.to_string());
        coords.push((0..self.axis.len()).map(|i| i as f64).collect());
        chunk_lists.push(vec![self.axis.len()]);
        let layout = ChunkLayout::from_chunks(&shape, chunk_lists)?;

        let build = |arr: Array2<f64>| -> Result<RasterCube> {
            let data = arr
                .into_shape_with_order(IxDyn(&shape))
                .map_err(|e| GapFillError::Dimension(e.to_string()))?;
            RasterCube::with_coords(data, dims.clone(), coords.clone())?.with_chunks(layout.clone())
        };
        Ok((build(mean)?, build(std)?))
    }
}

/// Gap fill with default worker pool and failure policy.
pub fn apply_gpr(
    cube: &RasterCube,
    time_dim: &str,
    kernel: &Kernel,
    axis: &PredictionAxis,
    alpha: &Uncertainty,
    guard: &SufficiencyGuard,
) -> Result<RawGridOutput> {
    GridApplicator::new(kernel, axis).guard(*guard).apply(cube, time_dim, alpha)
}

/// Apply an element-wise function across a cube, keeping labels and chunks.
pub fn map_elements<F>(cube: &RasterCube, f: F) -> Result<RasterCube>
where
    F: Fn(f64) -> f64 + Sync + Send,
{
    let mut data = cube.data().clone();
    data.par_mapv_inplace(f);
    cube.with_data(data)
}

/// Apply a whole-array function; it must preserve the cube's shape.
pub fn map_cube<F>(cube: &RasterCube, f: F) -> Result<RasterCube>
where
    F: FnOnce(ArrayViewD<'_, f64>) -> ArrayD<f64>,
{
    let data = f(cube.data().view());
    cube.with_data(data)
}
