use std::f64::consts::PI;
use std::fmt;
use std::ops::{Add, Mul};

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::error::{GapFillError, Result};

/// Metric used by [`Kernel::Pairwise`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairwiseMetric {
    /// `x * y`
    Linear,
    /// `exp(-gamma * (x - y)^2)`
    Rbf,
    /// `exp(-gamma * |x - y|)`
    Laplacian,
    /// `(gamma * x * y + coef0)^degree`
    Polynomial { degree: i32, coef0: f64 },
}

/// Covariance function over one-dimensional (time) inputs.
///
/// Hyperparameters are fixed: the regressor never tunes them. Kernels
/// compose with `+` and `*`:
///
/// ```
/// use temporal_gapfill::kernels::Kernel;
///
/// let k = Kernel::constant(30.0) * Kernel::exp_sine_squared(1.0, 1.0)
///     + Kernel::constant(50.0) * Kernel::rational_quadratic(1.0, 0.1)
///     + Kernel::white(0.5);
/// assert!(k.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Kernel {
    Constant { value: f64 },
    Rbf { length_scale: f64 },
    ExpSineSquared { length_scale: f64, periodicity: f64 },
    RationalQuadratic { length_scale: f64, alpha: f64 },
    Pairwise { gamma: f64, metric: PairwiseMetric },
    Matern { length_scale: f64, nu: f64 },
    White { noise_level: f64 },
    Sum { terms: Vec<Kernel> },
    Product { factors: Vec<Kernel> },
}

impl Kernel {
    pub fn constant(value: f64) -> Self {
        Kernel::Constant { value }
    }

    pub fn rbf(length_scale: f64) -> Self {
        Kernel::Rbf { length_scale }
    }

    pub fn exp_sine_squared(length_scale: f64, periodicity: f64) -> Self {
        Kernel::ExpSineSquared {
            length_scale,
            periodicity,
        }
    }

    pub fn rational_quadratic(length_scale: f64, alpha: f64) -> Self {
        Kernel::RationalQuadratic {
            length_scale,
            alpha,
        }
    }

    pub fn pairwise(gamma: f64, metric: PairwiseMetric) -> Self {
        Kernel::Pairwise { gamma, metric }
    }

    pub fn matern(length_scale: f64, nu: f64) -> Self {
        Kernel::Matern { length_scale, nu }
    }

    pub fn white(noise_level: f64) -> Self {
        Kernel::White { noise_level }
    }

    /// Check every hyperparameter is usable.
    pub fn validate(&self) -> Result<()> {
        fn positive(name: &str, v: f64) -> Result<()> {
            if v.is_finite() && v > 0.0 {
                Ok(())
            } else {
                Err(GapFillError::InvalidKernel(format!(
                    "{name} must be finite and positive, got {v}"
                )))
            }
        }

        match self {
            Kernel::Constant { value } => positive("constant value", *value),
            Kernel::Rbf { length_scale } => positive("length_scale", *length_scale),
            Kernel::ExpSineSquared {
                length_scale,
                periodicity,
            } => {
                positive("length_scale", *length_scale)?;
                positive("periodicity", *periodicity)
            }
            Kernel::RationalQuadratic {
                length_scale,
                alpha,
            } => {
                positive("length_scale", *length_scale)?;
                positive("alpha", *alpha)
            }
            Kernel::Pairwise { gamma, metric } => {
                positive("gamma", *gamma)?;
                if let PairwiseMetric::Polynomial { degree, coef0 } = metric {
                    if *degree < 1 {
                        return Err(GapFillError::InvalidKernel(format!(
                            "polynomial degree must be >= 1, got {degree}"
                        )));
                    }
                    if !coef0.is_finite() {
                        return Err(GapFillError::InvalidKernel(format!(
                            "polynomial coef0 must be finite, got {coef0}"
                        )));
                    }
                }
                Ok(())
            }
            Kernel::Matern { length_scale, nu } => {
                positive("length_scale", *length_scale)?;
                if matern_supported(*nu) {
                    Ok(())
                } else {
                    Err(GapFillError::InvalidKernel(format!(
                        "Matern nu must be one of 0.5, 1.5, 2.5 or inf, got {nu}"
                    )))
                }
            }
            Kernel::White { noise_level } => positive("noise_level", *noise_level),
            Kernel::Sum { terms } => {
                if terms.is_empty() {
                    return Err(GapFillError::InvalidKernel("empty sum".into()));
                }
                terms.iter().try_for_each(Kernel::validate)
            }
            Kernel::Product { factors } => {
                if factors.is_empty() {
                    return Err(GapFillError::InvalidKernel("empty product".into()));
                }
                factors.iter().try_for_each(Kernel::validate)
            }
        }
    }

    /// Covariance between two distinct inputs.
    ///
    /// White noise contributes nothing here; it only enters the training
    /// Gram matrix through [`Kernel::gram`].
    pub fn cross_value(&self, a: f64, b: f64) -> f64 {
        let d = a - b;
        match self {
            Kernel::Constant { value } => *value,
            Kernel::Rbf { length_scale } => (-0.5 * (d / length_scale).powi(2)).exp(),
            Kernel::ExpSineSquared {
                length_scale,
                periodicity,
            } => {
                let s = (PI * d.abs() / periodicity).sin();
                (-2.0 * (s / length_scale).powi(2)).exp()
            }
            Kernel::RationalQuadratic {
                length_scale,
                alpha,
            } => (1.0 + d * d / (2.0 * alpha * length_scale * length_scale)).powf(-alpha),
            Kernel::Pairwise { gamma, metric } => pairwise(*gamma, metric, a, b),
            Kernel::Matern { length_scale, nu } => matern(d.abs() / length_scale, *nu),
            Kernel::White { .. } => 0.0,
            Kernel::Sum { terms } => terms.iter().map(|k| k.cross_value(a, b)).sum(),
            Kernel::Product { factors } => factors.iter().map(|k| k.cross_value(a, b)).product(),
        }
    }

    /// Prior variance at a single input, `k(x, x)` including white noise.
    pub fn diag_value(&self, x: f64) -> f64 {
        match self {
            Kernel::White { noise_level } => *noise_level,
            Kernel::Sum { terms } => terms.iter().map(|k| k.diag_value(x)).sum(),
            Kernel::Product { factors } => factors.iter().map(|k| k.diag_value(x)).product(),
            other => other.cross_value(x, x),
        }
    }

    /// Gram matrix of the training inputs, white noise on the diagonal.
    pub fn gram(&self, x: &[f64]) -> Array2<f64> {
        let n = x.len();
        let mut k = Array2::zeros((n, n));
        for i in 0..n {
            k[[i, i]] = self.diag_value(x[i]);
            for j in 0..i {
                let v = self.cross_value(x[i], x[j]);
                k[[i, j]] = v;
                k[[j, i]] = v;
            }
        }
        k
    }

    /// Cross-covariance `k(a_i, b_j)` between two input sets.
    pub fn cross(&self, a: &[f64], b: &[f64]) -> Array2<f64> {
        Array2::from_shape_fn((a.len(), b.len()), |(i, j)| self.cross_value(a[i], b[j]))
    }

    /// Prior variance at each input.
    pub fn diag(&self, x: &[f64]) -> Array1<f64> {
        x.iter().map(|&v| self.diag_value(v)).collect()
    }
}

fn matern_supported(nu: f64) -> bool {
    nu == 0.5 || nu == 1.5 || nu == 2.5 || nu == f64::INFINITY
}

fn matern(r: f64, nu: f64) -> f64 {
    if nu == 0.5 {
        (-r).exp()
    } else if nu == 1.5 {
        let s = 3f64.sqrt() * r;
        (1.0 + s) * (-s).exp()
    } else if nu == 2.5 {
        let s = 5f64.sqrt() * r;
        (1.0 + s + s * s / 3.0) * (-s).exp()
    } else if nu == f64::INFINITY {
        (-0.5 * r * r).exp()
    } else {
        f64::NAN
    }
}

fn pairwise(gamma: f64, metric: &PairwiseMetric, a: f64, b: f64) -> f64 {
    match metric {
        PairwiseMetric::Linear => a * b,
        PairwiseMetric::Rbf => (-gamma * (a - b).powi(2)).exp(),
        PairwiseMetric::Laplacian => (-gamma * (a - b).abs()).exp(),
        PairwiseMetric::Polynomial { degree, coef0 } => (gamma * a * b + coef0).powi(*degree),
    }
}

impl Add for Kernel {
    type Output = Kernel;

    fn add(self, rhs: Kernel) -> Kernel {
        let mut terms = match self {
            Kernel::Sum { terms } => terms,
            other => vec![other],
        };
        match rhs {
            Kernel::Sum { terms: rest } => terms.extend(rest),
            other => terms.push(other),
        }
        Kernel::Sum { terms }
    }
}

impl Mul for Kernel {
    type Output = Kernel;

    fn mul(self, rhs: Kernel) -> Kernel {
        let mut factors = match self {
            Kernel::Product { factors } => factors,
            other => vec![other],
        };
        match rhs {
            Kernel::Product { factors: rest } => factors.extend(rest),
            other => factors.push(other),
        }
        Kernel::Product { factors }
    }
}

impl fmt::Display for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Kernel::Constant { value } => write!(f, "{:.3}**2", value.sqrt()),
            Kernel::Rbf { length_scale } => write!(f, "RBF(length_scale={length_scale})"),
            Kernel::ExpSineSquared {
                length_scale,
                periodicity,
            } => write!(
                f,
                "ExpSineSquared(length_scale={length_scale}, periodicity={periodicity})"
            ),
            Kernel::RationalQuadratic {
                length_scale,
                alpha,
            } => write!(f, "RationalQuadratic(alpha={alpha}, length_scale={length_scale})"),
            Kernel::Pairwise { gamma, metric } => {
                write!(f, "PairwiseKernel(gamma={gamma}, metric={metric:?})")
            }
            Kernel::Matern { length_scale, nu } => {
                write!(f, "Matern(length_scale={length_scale}, nu={nu})")
            }
            Kernel::White { noise_level } => write!(f, "WhiteKernel(noise_level={noise_level})"),
            Kernel::Sum { terms } => join(f, terms, " + ", false),
            Kernel::Product { factors } => join(f, factors, " * ", true),
        }
    }
}

fn join(f: &mut fmt::Formatter<'_>, parts: &[Kernel], sep: &str, wrap_sums: bool) -> fmt::Result {
    for (i, k) in parts.iter().enumerate() {
        if i > 0 {
            f.write_str(sep)?;
        }
        if wrap_sums && matches!(k, Kernel::Sum { .. }) {
            write!(f, "({k})")?;
        } else {
            write!(f, "{k}")?;
        }
    }
    Ok(())
}
