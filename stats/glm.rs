//! # Mass-Univariate General Linear Model
//!
//! Fits the same design matrix to many responses at once (one response per
//! subtype-weight column) by ordinary least squares and evaluates a single t
//! contrast on every fitted response. P-values are one-sided: they measure
//! evidence for a *positive* effect of the contrast.

use crate::stats::estimate::{EstimationError, least_squares};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use statrs::distribution::{ContinuousCDF, StudentsT};

/// The fitted GLM for a block of responses sharing one design.
#[derive(Debug, Clone)]
pub struct GlmFit {
    /// Coefficients with shape `[n_regressors, n_responses]`.
    pub coefficients: Array2<f64>,
    /// Unbiased residual variance per response.
    pub residual_variance: Array1<f64>,
    /// `(X'X)^+`, needed for contrast variances.
    pub gram_inverse: Array2<f64>,
    /// Residual degrees of freedom, `n - rank(X)`.
    pub dof: usize,
}

/// The outcome of a t contrast evaluated on every response.
#[derive(Debug, Clone)]
pub struct ContrastResult {
    pub effect: Array1<f64>,
    pub t_stat: Array1<f64>,
    pub p_values: Array1<f64>,
    pub dof: usize,
}

/// Fits `responses = design * B + noise` by ordinary least squares.
pub fn fit_ols(
    responses: ArrayView2<f64>,
    design: ArrayView2<f64>,
) -> Result<GlmFit, EstimationError> {
    let (coefficients, gram) = least_squares(design, responses)?;
    let n = design.nrows();
    if n <= gram.rank {
        return Err(EstimationError::TooFewSamples {
            context: "GLM residual estimation",
            found: n,
            required: gram.rank + 1,
        });
    }
    let dof = n - gram.rank;

    let residuals = &responses - &design.dot(&coefficients);
    let residual_variance = residuals.mapv(|r| r * r).sum_axis(Axis(0)) / dof as f64;

    Ok(GlmFit {
        coefficients,
        residual_variance,
        gram_inverse: gram.inverse,
        dof,
    })
}

/// Evaluates the t contrast `c'B` on every response of `fit`.
pub fn t_contrast(
    fit: &GlmFit,
    contrast: ArrayView1<f64>,
) -> Result<ContrastResult, EstimationError> {
    if contrast.len() != fit.coefficients.nrows() {
        return Err(EstimationError::DimensionMismatch {
            context: "contrast length",
            expected: fit.coefficients.nrows(),
            found: contrast.len(),
        });
    }

    let effect = contrast.dot(&fit.coefficients);
    let contrast_variance = contrast.dot(&fit.gram_inverse.dot(&contrast));
    let distribution = StudentsT::new(0.0, 1.0, fit.dof as f64)
        .map_err(|e| EstimationError::InvalidParameter(format!("Student t: {e}")))?;

    let t_stat: Array1<f64> = effect
        .iter()
        .zip(fit.residual_variance.iter())
        .map(|(&e, &sigma2)| {
            let se = (contrast_variance * sigma2).max(0.0).sqrt();
            if se > 0.0 {
                e / se
            } else if e == 0.0 {
                0.0
            } else {
                e.signum() * f64::INFINITY
            }
        })
        .collect();

    let p_values = t_stat.mapv(|t| upper_tail(&distribution, t));

    Ok(ContrastResult {
        effect,
        t_stat,
        p_values,
        dof: fit.dof,
    })
}

fn upper_tail(distribution: &StudentsT, t: f64) -> f64 {
    if t == f64::INFINITY {
        0.0
    } else if t == f64::NEG_INFINITY {
        1.0
    } else {
        distribution.sf(t).clamp(0.0, 1.0)
    }
}
