use ndarray::{Array3, ArrayD, IxDyn};
use serde::{Deserialize, Serialize};

use crate::chunks::ChunkLayout;
use crate::error::{GapFillError, Result};

/// Labelled N-D stack of raster samples. NaN marks a missing sample.
///
/// Each dimension has a unique name and a finite, monotonic coordinate
/// vector of matching length. The time coordinate is a continuous scale
/// (decimal years). Deserializing runs the same checks as
/// [`RasterCube::with_coords`] and [`RasterCube::with_chunks`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawRasterCube")]
pub struct RasterCube {
    data: ArrayD<f64>,
    dims: Vec<String>,
    coords: Vec<Vec<f64>>,
    chunks: ChunkLayout,
}

#[derive(Deserialize)]
struct RawRasterCube {
    data: ArrayD<f64>,
    dims: Vec<String>,
    coords: Vec<Vec<f64>>,
    #[serde(default)]
    chunks: Option<ChunkLayout>,
}

impl TryFrom<RawRasterCube> for RasterCube {
    type Error = GapFillError;

    fn try_from(raw: RawRasterCube) -> Result<Self> {
        let cube = Self::with_coords(raw.data, raw.dims, raw.coords)?;
        match raw.chunks {
            Some(layout) => cube.with_chunks(layout),
            None => Ok(cube),
        }
    }
}

impl RasterCube {
    /// Cube with index coordinates (`0, 1, 2, ...`) on every dimension.
    pub fn new(data: ArrayD<f64>, dims: Vec<String>) -> Result<Self> {
        let coords = data.shape().iter().map(|&n| (0..n).map(|i| i as f64).collect()).collect();
        Self::with_coords(data, dims, coords)
    }

    pub fn with_coords(
        data: ArrayD<f64>,
        dims: Vec<String>,
        coords: Vec<Vec<f64>>,
    ) -> Result<Self> {
        if dims.len() != data.ndim() {
            return Err(GapFillError::Dimension(format!(
                "{} dimension names for an array of rank {}",
                dims.len(),
                data.ndim()
            )));
        }
        for (i, d) in dims.iter().enumerate() {
            if dims[..i].contains(d) {
                return Err(GapFillError::Dimension(format!("duplicate dimension '{d}'")));
            }
        }
        if coords.len() != dims.len() {
            return Err(GapFillError::Dimension(format!(
                "{} coordinate arrays for {} dimensions",
                coords.len(),
                dims.len()
            )));
        }
        for ((name, c), &n) in dims.iter().zip(&coords).zip(data.shape()) {
            check_coord(name, c, n)?;
        }
        let chunks = ChunkLayout::single(data.shape());
        Ok(Self {
            data,
            dims,
            coords,
            chunks,
        })
    }

    /// `(time, y, x)` cube with index coordinates on `y` and `x`.
    pub fn from_time_stack(data: Array3<f64>, times: Vec<f64>) -> Result<Self> {
        let (_, ny, nx) = data.dim();
        let coords = vec![
            times,
            (0..ny).map(|i| i as f64).collect(),
            (0..nx).map(|i| i as f64).collect(),
        ];
        Self::with_coords(
            data.into_dyn(),
            vec!["time".into(), "y".into(), "x".into()],
            coords,
        )
    }

    /// Replace the chunk layout; it must tile the current shape.
    pub fn with_chunks(mut self, chunks: ChunkLayout) -> Result<Self> {
        if chunks.shape() != self.data.shape() {
            return Err(GapFillError::Dimension(format!(
                "chunk layout for shape {:?} does not match cube shape {:?}",
                chunks.shape(),
                self.data.shape()
            )));
        }
        self.chunks = chunks;
        Ok(self)
    }

    /// Regular chunking by extent per dimension.
    pub fn chunked(self, extents: &[usize]) -> Result<Self> {
        let layout = ChunkLayout::regular(self.data.shape(), extents)?;
        self.with_chunks(layout)
    }

    pub fn data(&self) -> &ArrayD<f64> {
        &self.data
    }

    pub fn into_data(self) -> ArrayD<f64> {
        self.data
    }

    pub fn dims(&self) -> &[String] {
        &self.dims
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn ndim(&self) -> usize {
        self.data.ndim()
    }

    pub fn chunks(&self) -> &ChunkLayout {
        &self.chunks
    }

    pub fn axis_of(&self, dim: &str) -> Option<usize> {
        self.dims.iter().position(|d| d == dim)
    }

    pub fn coord(&self, dim: &str) -> Option<&[f64]> {
        self.axis_of(dim).map(|i| self.coords[i].as_slice())
    }

    pub fn coord_at(&self, axis: usize) -> &[f64] {
        &self.coords[axis]
    }

    /// Number of finite samples in the cube.
    pub fn count_finite(&self) -> usize {
        self.data.iter().filter(|v| v.is_finite()).count()
    }

    pub fn rename_dim(&mut self, from: &str, to: &str) -> Result<()> {
        let axis = self
            .axis_of(from)
            .ok_or_else(|| GapFillError::Dimension(format!("no dimension named '{from}'")))?;
        if from != to && self.axis_of(to).is_some() {
            return Err(GapFillError::Dimension(format!("dimension '{to}' already exists")));
        }
        self.dims[axis] = to.to_string();
        Ok(())
    }

    pub fn assign_coords(&mut self, dim: &str, values: Vec<f64>) -> Result<()> {
        let axis = self
            .axis_of(dim)
            .ok_or_else(|| GapFillError::Dimension(format!("no dimension named '{dim}'")))?;
        check_coord(dim, &values, self.data.shape()[axis])?;
        self.coords[axis] = values;
        Ok(())
    }

    /// Reorder dimensions by name. Every dimension must appear exactly once.
    pub fn transpose(self, order: &[&str]) -> Result<Self> {
        if order.len() != self.dims.len() {
            return Err(GapFillError::Dimension(format!(
                "transpose order {order:?} does not list all of {:?}",
                self.dims
            )));
        }
        let mut axes = Vec::with_capacity(order.len());
        for name in order {
            let axis = self
                .axis_of(name)
                .ok_or_else(|| GapFillError::Dimension(format!("no dimension named '{name}'")))?;
            if axes.contains(&axis) {
                return Err(GapFillError::Dimension(format!("dimension '{name}' listed twice")));
            }
            axes.push(axis);
        }

        let data = self
            .data
            .permuted_axes(IxDyn(&axes))
            .as_standard_layout()
            .into_owned();
        let dims = axes.iter().map(|&i| self.dims[i].clone()).collect();
        let coords = axes.iter().map(|&i| self.coords[i].clone()).collect();
        let chunks = self.chunks.permuted(&axes);
        Ok(Self {
            data,
            dims,
            coords,
            chunks,
        })
    }

    /// Same labels and chunks around new data of identical shape.
    pub(crate) fn with_data(&self, data: ArrayD<f64>) -> Result<Self> {
        if data.shape() != self.data.shape() {
            return Err(GapFillError::Dimension(format!(
                "mapped array has shape {:?}, expected {:?}",
                data.shape(),
                self.data.shape()
            )));
        }
        Ok(Self {
            data,
            dims: self.dims.clone(),
            coords: self.coords.clone(),
            chunks: self.chunks.clone(),
        })
    }
}

fn check_coord(name: &str, c: &[f64], n: usize) -> Result<()> {
    if c.len() != n {
        return Err(GapFillError::Dimension(format!(
            "coordinate '{name}' has {} values for a dimension of length {n}",
            c.len()
        )));
    }
    if c.iter().any(|v| !v.is_finite()) {
        return Err(GapFillError::Dimension(format!("coordinate '{name}' has non-finite values")));
    }
    let increasing = c.windows(2).all(|w| w[1] >= w[0]);
    let decreasing = c.windows(2).all(|w| w[1] <= w[0]);
    if !(increasing || decreasing) {
        return Err(GapFillError::Dimension(format!("coordinate '{name}' is not monotonic")));
    }
    Ok(())
}

/// Per-sample noise variance for a whole cube.
///
/// Variances must be non-negative. A NaN or infinite per-sample entry masks
/// that sample like a missing value.
#[derive(Debug, Clone, PartialEq)]
pub enum Uncertainty {
    /// One variance for every sample of every pixel.
    Scalar(f64),
    /// One variance per sample, co-indexed with the cube.
    PerSample(ArrayD<f64>),
}

impl Default for Uncertainty {
    fn default() -> Self {
        Uncertainty::Scalar(2.0)
    }
}

