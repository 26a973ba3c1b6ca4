use nalgebra::{Cholesky, DMatrix, DVector};
use ndarray::Array1;

use crate::error::{GapFillError, Result};
use crate::kernels::Kernel;

/// Scales below this are treated as zero when standardising targets.
const MIN_TARGET_SCALE: f64 = 10.0 * f64::EPSILON;

/// Gaussian process conditioned on one pixel's samples.
///
/// Owns the Cholesky factor of `K + diag(noise)` and the dual coefficients;
/// borrows the kernel, which is shared by every fit in a run.
#[derive(Debug, Clone)]
pub struct FittedGp<'k> {
    kernel: &'k Kernel,
    x_train: Vec<f64>,
    l: DMatrix<f64>,
    dual: DVector<f64>,
    y_mean: f64,
    y_scale: f64,
}

/// Fit a GP with fixed hyperparameters.
///
/// `noise` holds one variance per sample, added to the diagonal of the
/// kernel matrix. Targets are standardised before fitting and predictions
/// are mapped back.
pub fn fit_gp<'k>(
    times: &[f64],
    values: &[f64],
    noise: &[f64],
    kernel: &'k Kernel,
) -> Result<FittedGp<'k>> {
    let n = times.len();
    if values.len() != n {
        return Err(GapFillError::ShapeMismatch {
            expected: n,
            found: values.len(),
        });
    }
    if noise.len() != n {
        return Err(GapFillError::ShapeMismatch {
            expected: n,
            found: noise.len(),
        });
    }
    if n == 0 {
        return Err(GapFillError::NumericFit("no training samples".into()));
    }

    let y_mean = values.iter().sum::<f64>() / n as f64;
    let var = values.iter().map(|v| (v - y_mean).powi(2)).sum::<f64>() / n as f64;
    let y_scale = if var.sqrt() < MIN_TARGET_SCALE { 1.0 } else { var.sqrt() };
    let y = DVector::from_iterator(n, values.iter().map(|v| (v - y_mean) / y_scale));

    let gram = kernel.gram(times);
    let k = DMatrix::from_fn(n, n, |i, j| {
        if i == j {
            gram[[i, j]] + noise[i]
        } else {
            gram[[i, j]]
        }
    });

    let l = Cholesky::new(k)
        .ok_or_else(|| {
            GapFillError::NumericFit(format!(
                "kernel matrix of {n} samples is not positive definite"
            ))
        })?
        .unpack();
    if l.diagonal().iter().any(|d| !(*d > 0.0)) {
        return Err(GapFillError::NumericFit(format!(
            "kernel matrix of {n} samples is singular"
        )));
    }

    let half = l
        .solve_lower_triangular(&y)
        .ok_or_else(|| GapFillError::NumericFit("triangular solve failed".into()))?;
    let dual = l
        .tr_solve_lower_triangular(&half)
        .ok_or_else(|| GapFillError::NumericFit("triangular solve failed".into()))?;
    if dual.iter().any(|v| !v.is_finite()) {
        return Err(GapFillError::NumericFit("non-finite dual coefficients".into()));
    }

    Ok(FittedGp {
        kernel,
        x_train: times.to_vec(),
        l,
        dual,
        y_mean,
        y_scale,
    })
}

impl FittedGp<'_> {
    pub fn n_train(&self) -> usize {
        self.x_train.len()
    }

    fn cross_matrix(&self, x: &[f64]) -> DMatrix<f64> {
        let ks = self.kernel.cross(x, &self.x_train);
        DMatrix::from_fn(x.len(), self.x_train.len(), |i, j| ks[[i, j]])
    }

    /// Posterior mean at `x`.
    pub fn predict(&self, x: &[f64]) -> Result<Array1<f64>> {
        let ks = self.cross_matrix(x);
        let mean = &ks * &self.dual;
        let out: Array1<f64> = mean.iter().map(|m| m * self.y_scale + self.y_mean).collect();
        if out.iter().any(|v| !v.is_finite()) {
            return Err(GapFillError::NumericFit("non-finite posterior mean".into()));
        }
        Ok(out)
    }

    /// Posterior mean and one-sigma standard deviation at `x`.
    ///
    /// Slightly negative variances from round-off are clamped to zero.
    pub fn predict_with_std(&self, x: &[f64]) -> Result<(Array1<f64>, Array1<f64>)> {
        let ks = self.cross_matrix(x);
        let mean = &ks * &self.dual;
        let v = self
            .l
            .solve_lower_triangular(&ks.transpose())
            .ok_or_else(|| GapFillError::NumericFit("triangular solve failed".into()))?;
        let prior = self.kernel.diag(x);

        let mut mu = Array1::zeros(x.len());
        let mut sd = Array1::zeros(x.len());
        for i in 0..x.len() {
            let explained: f64 = v.column(i).iter().map(|e| e * e).sum();
            let var = (prior[i] - explained).max(0.0);
            mu[i] = mean[i] * self.y_scale + self.y_mean;
            sd[i] = var.sqrt() * self.y_scale;
        }

        if mu.iter().chain(sd.iter()).any(|v| !v.is_finite()) {
            return Err(GapFillError::NumericFit("non-finite posterior".into()));
        }
        Ok((mu, sd))
    }
}
