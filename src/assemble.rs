use log::debug;
use serde::{Deserialize, Serialize};

use crate::batch::{GridSummary, RawGridOutput, CORE_DIM};
use crate::chunks::ChunkLayout;
use crate::common::RasterCube;
use crate::error::{GapFillError, Result};
use crate::time_axis::PredictionAxis;

/// Gap-filled mean and standard deviation cubes on the prediction axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputCube {
    pub mean_prediction: RasterCube,
    pub std_prediction: RasterCube,
    pub summary: GridSummary,
}

impl OutputCube {
    pub fn time_dim(&self) -> &str {
        &self.mean_prediction.dims()[0]
    }

    /// Prediction timestamps (the leading coordinate).
    pub fn times(&self) -> &[f64] {
        self.mean_prediction.coord_at(0)
    }

    pub fn shape(&self) -> &[usize] {
        self.mean_prediction.shape()
    }
}

/// Relabel the core dim, put time first and rechunk to `target_chunk_bytes`.
pub fn assemble(
    raw: RawGridOutput,
    axis: &PredictionAxis,
    time_dim: &str,
    target_chunk_bytes: usize,
) -> Result<OutputCube> {
    let RawGridOutput { mean, std, summary } = raw;
    Ok(OutputCube {
        mean_prediction: finish(mean, axis, time_dim, target_chunk_bytes)?,
        std_prediction: finish(std, axis, time_dim, target_chunk_bytes)?,
        summary,
    })
}

fn finish(
    mut cube: RasterCube,
    axis: &PredictionAxis,
    time_dim: &str,
    target_chunk_bytes: usize,
) -> Result<RasterCube> {
    let core = cube.axis_of(CORE_DIM).ok_or_else(|| {
        GapFillError::Dimension(format!("raw output has no '{CORE_DIM}' dimension"))
    })?;
    if cube.shape()[core] != axis.len() {
        return Err(GapFillError::ShapeMismatch {
            expected: axis.len(),
            found: cube.shape()[core],
        });
    }

    cube.rename_dim(CORE_DIM, time_dim)?;
    cube.assign_coords(time_dim, axis.values().to_vec())?;

    let mut order: Vec<String> = vec![time_dim.to_string()];
    order.extend(cube.dims().iter().filter(|d| d.as_str() != time_dim).cloned());
    let order: Vec<&str> = order.iter().map(String::as_str).collect();
    let cube = cube.transpose(&order)?;

    let layout = rebalance(cube.shape(), target_chunk_bytes);
    debug!("rechunked {:?} to {:?}", cube.shape(), layout.chunks());
    cube.with_chunks(layout)
}

/// Chunk layout for `f64` data holding at most `target_chunk_bytes` per block.
pub fn rebalance(shape: &[usize], target_chunk_bytes: usize) -> ChunkLayout {
    ChunkLayout::auto(shape, std::mem::size_of::<f64>(), target_chunk_bytes)
}
