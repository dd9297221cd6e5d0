// stats/estimate.rs

//! # Shared Least Squares Machinery
//!
//! Every regression in the pipeline (confound removal, the feature selection GLM)
//! reduces to solving the normal equations `X'X B = X'Y` for a block of responses.
//! The Gram matrix is inverted through its symmetric eigendecomposition so that
//! rank-deficient designs (e.g. a confound that is constant within a fold) still
//! yield the minimum-norm solution instead of failing outright.

use ndarray::{Array1, Array2, ArrayView2, Axis, s};
use ndarray_linalg::{Eigh, UPLO};
use thiserror::Error;

/// Relative eigenvalue cut-off below which a direction of `X'X` is treated as null.
const RANK_TOLERANCE: f64 = 1e-10;

/// A comprehensive error type for the estimation routines of the crate.
#[derive(Error, Debug)]
pub enum EstimationError {
    #[error("Eigendecomposition failed: {0}")]
    EigendecompositionFailed(ndarray_linalg::error::LinalgError),

    #[error("Array reshaping failed: {0}")]
    ShapeError(#[from] ndarray::ShapeError),

    #[error("Dimension mismatch in {context}: expected {expected}, found {found}.")]
    DimensionMismatch {
        context: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("Labels must be binary (0 or 1), but found {value} at position {index}.")]
    InvalidLabel { index: usize, value: usize },

    #[error("{context} requires at least {required} samples, but only {found} were provided.")]
    TooFewSamples {
        context: &'static str,
        found: usize,
        required: usize,
    },

    #[error(
        "Cannot build {folds} cross-validation folds from {samples} samples. Use between 2 and {samples} folds."
    )]
    InvalidFolds { folds: usize, samples: usize },

    #[error("Cannot form {subtypes} subtypes from only {subjects} subjects.")]
    TooFewSubjectsForSubtypes { subjects: usize, subtypes: usize },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Failed to build the worker thread pool: {0}")]
    ThreadPoolUnavailable(String),
}

/// The pseudo-inverse of a Gram matrix together with its numerical rank.
#[derive(Debug, Clone)]
pub struct GramInverse {
    pub inverse: Array2<f64>,
    pub rank: usize,
}

/// Prepends a column of ones to `x`.
pub fn add_intercept(x: ArrayView2<f64>) -> Array2<f64> {
    let mut design = Array2::ones((x.nrows(), x.ncols() + 1));
    design.slice_mut(s![.., 1..]).assign(&x);
    design
}

/// Moore-Penrose inverse of a symmetric positive semi-definite matrix.
pub fn gram_pseudo_inverse(gram: &Array2<f64>) -> Result<GramInverse, EstimationError> {
    let (eigenvalues, eigenvectors) = gram
        .eigh(UPLO::Lower)
        .map_err(EstimationError::EigendecompositionFailed)?;

    let largest = eigenvalues.iter().fold(0.0_f64, |acc, &v| acc.max(v.abs()));
    let cutoff = largest * RANK_TOLERANCE;

    let inverted: Array1<f64> = eigenvalues.mapv(|v| if v > cutoff { 1.0 / v } else { 0.0 });
    let rank = inverted.iter().filter(|&&v| v != 0.0).count();

    let scaled = &eigenvectors * &inverted.view().insert_axis(Axis(0));
    let inverse = scaled.dot(&eigenvectors.t());

    Ok(GramInverse { inverse, rank })
}

/// Solves `min ||X B - Y||` column by column, returning `B` with shape `[q, p]`.
pub fn least_squares(
    design: ArrayView2<f64>,
    targets: ArrayView2<f64>,
) -> Result<(Array2<f64>, GramInverse), EstimationError> {
    if design.nrows() != targets.nrows() {
        return Err(EstimationError::DimensionMismatch {
            context: "least squares rows",
            expected: design.nrows(),
            found: targets.nrows(),
        });
    }

    let gram = design.t().dot(&design);
    let xty = design.t().dot(&targets);
    let gram_inverse = gram_pseudo_inverse(&gram)?;
    let coefficients = gram_inverse.inverse.dot(&xty);
    Ok((coefficients, gram_inverse))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn recovers_exact_linear_relationship() {
        let x = array![[1.0, 0.0], [1.0, 1.0], [1.0, 2.0], [1.0, 3.0]];
        let y = array![[1.0], [3.0], [5.0], [7.0]];
        let (beta, gram) = least_squares(x.view(), y.view()).unwrap();
        assert_eq!(gram.rank, 2);
        assert_abs_diff_eq!(beta[[0, 0]], 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(beta[[1, 0]], 2.0, epsilon = 1e-9);
    }

    #[test]
    fn rank_deficient_design_returns_minimum_norm_solution() {
        // Duplicate column: the weight is split evenly between the two copies.
        let x = array![[1.0, 1.0], [2.0, 2.0], [3.0, 3.0]];
        let y = array![[2.0], [4.0], [6.0]];
        let (beta, gram) = least_squares(x.view(), y.view()).unwrap();
        assert_eq!(gram.rank, 1);
        assert_abs_diff_eq!(beta[[0, 0]], 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(beta[[1, 0]], 1.0, epsilon = 1e-9);
    }

    #[test]
    fn intercept_column_is_prepended() {
        let x = array![[2.0], [3.0]];
        let with = add_intercept(x.view());
        assert_eq!(with, array![[1.0, 2.0], [1.0, 3.0]]);
    }

    #[test]
    fn mismatched_rows_are_rejected() {
        let x = array![[1.0], [2.0]];
        let y = array![[1.0]];
        assert!(matches!(
            least_squares(x.view(), y.view()),
            Err(EstimationError::DimensionMismatch { .. })
        ));
    }
}
