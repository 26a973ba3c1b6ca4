use ndarray::{ArrayD, IxDyn};
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use pyo3::types::PyType;
use pythonize::pythonize;
use serde::Serialize;

use temporal_gapfill::time_axis::{date_decimal_year, parse_date};
use temporal_gapfill::{
    create_prediction_timeseries, gap_fill, gap_fill_with_uncertainty, GapFillConfig,
    GapFillError, GridSummary, RasterCube, Uncertainty,
};

fn value_error(e: GapFillError) -> PyErr {
    PyValueError::new_err(e.to_string())
}

// ---------------------------------------------------------------------------
// Opaque configuration wrapper
// ---------------------------------------------------------------------------

/// Validated gap-filling configuration.
///
/// Construct via `Config.from_json()`.
#[pyclass(name = "Config")]
#[derive(Clone)]
pub struct PyConfig {
    inner: GapFillConfig,
}

#[pymethods]
impl PyConfig {
    /// Parse and validate a JSON configuration string.
    #[classmethod]
    fn from_json(_cls: &Bound<'_, PyType>, text: &str) -> PyResult<Self> {
        let inner = GapFillConfig::from_json_str(text).map_err(value_error)?;
        Ok(Self { inner })
    }

    /// Serialize back to JSON, defaults filled in.
    fn to_json(&self) -> PyResult<String> {
        serde_json::to_string(&self.inner).map_err(|e| PyValueError::new_err(e.to_string()))
    }

    /// Decimal-year timestamps the configuration predicts on.
    fn prediction_axis(&self) -> PyResult<Vec<f64>> {
        let axis = self.inner.prediction_axis().map_err(value_error)?;
        Ok(axis.values().to_vec())
    }

    fn __repr__(&self) -> String {
        format!(
            "Config({} .. {} every {}, kernel={})",
            self.inner.start_date, self.inner.end_date, self.inner.step, self.inner.kernel
        )
    }
}

// ---------------------------------------------------------------------------
// Time axis helpers
// ---------------------------------------------------------------------------

/// Evenly spaced prediction timestamps in decimal years.
///
/// ``step`` is a pandas-style frequency: ``"M"``, ``"3M"``, ``"6M"``,
/// ``"10D"``, ``"Y"``.
#[pyfunction]
#[pyo3(signature = (start_date="2000-01-01", end_date="2023-01-01", step="M"))]
fn prediction_axis(start_date: &str, end_date: &str, step: &str) -> PyResult<Vec<f64>> {
    let axis = create_prediction_timeseries(start_date, end_date, step).map_err(value_error)?;
    Ok(axis.values().to_vec())
}

/// Decimal year of an ISO date (``YYYY-MM-DD``).
#[pyfunction]
fn decimal_year(date: &str) -> PyResult<f64> {
    let d = parse_date(date).map_err(value_error)?;
    Ok(date_decimal_year(d))
}

// ---------------------------------------------------------------------------
// Gap filling
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct FillResult {
    dims: Vec<String>,
    shape: Vec<usize>,
    time: Vec<f64>,
    mean_prediction: Vec<f64>,
    std_prediction: Vec<f64>,
    summary: GridSummary,
}

/// Gap fill a flat, C-ordered cube.
///
/// Args:
///     values: Cube samples, NaN where missing.
///     shape: Cube shape; the first axis is time unless ``dims`` says otherwise.
///     times: Decimal-year timestamp of each time slice.
///     config: A ``Config``.
///     alpha: Optional per-sample noise variances, same length as ``values``.
///     dims: Dimension names, default ``["time", "y", "x"]``.
///
/// Returns a dict with ``dims``, ``shape``, ``time``, ``mean_prediction``,
/// ``std_prediction`` (flat, C-ordered, time first) and ``summary``.
#[pyfunction]
#[pyo3(signature = (values, shape, times, config, alpha=None, dims=None))]
fn fill_gaps(
    py: Python<'_>,
    values: Vec<f64>,
    shape: Vec<usize>,
    times: Vec<f64>,
    config: PyRef<'_, PyConfig>,
    alpha: Option<Vec<f64>>,
    dims: Option<Vec<String>>,
) -> PyResult<PyObject> {
    let config = config.inner.clone();
    let dims = dims.unwrap_or_else(|| vec!["time".into(), "y".into(), "x".into()]);

    let data = ArrayD::from_shape_vec(IxDyn(&shape), values)
        .map_err(|e| PyValueError::new_err(format!("values do not match shape {shape:?}: {e}")))?;
    let time_axis = dims
        .iter()
        .position(|d| *d == config.time_dim)
        .ok_or_else(|| PyValueError::new_err(format!("dims {dims:?} lack '{}'", config.time_dim)))?;
    let coords = shape
        .iter()
        .enumerate()
        .map(|(a, &n)| {
            if a == time_axis {
                times.clone()
            } else {
                (0..n).map(|i| i as f64).collect()
            }
        })
        .collect();
    let cube = RasterCube::with_coords(data, dims, coords).map_err(value_error)?;

    let uncertainty = match alpha {
        Some(a) => Some(Uncertainty::PerSample(
            ArrayD::from_shape_vec(IxDyn(&shape), a).map_err(|e| {
                PyValueError::new_err(format!("alpha does not match shape {shape:?}: {e}"))
            })?,
        )),
        None => None,
    };

    let output = py
        .allow_threads(|| match &uncertainty {
            Some(u) => gap_fill_with_uncertainty(&cube, u, &config),
            None => gap_fill(&cube, &config),
        })
        .map_err(value_error)?;

    let result = FillResult {
        dims: output.mean_prediction.dims().to_vec(),
        shape: output.shape().to_vec(),
        time: output.times().to_vec(),
        mean_prediction: output.mean_prediction.data().iter().copied().collect(),
        std_prediction: output.std_prediction.data().iter().copied().collect(),
        summary: output.summary,
    };
    Ok(pythonize(py, &result)?.unbind())
}

// ---------------------------------------------------------------------------
// Module
// ---------------------------------------------------------------------------

#[pymodule]
fn gapfill(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyConfig>()?;
    m.add_function(wrap_pyfunction!(prediction_axis, m)?)?;
    m.add_function(wrap_pyfunction!(decimal_year, m)?)?;
    m.add_function(wrap_pyfunction!(fill_gaps, m)?)?;
    Ok(())
}
