//! Confound regression.
//!
//! Every connectivity value is regressed on the confound variables (plus an
//! intercept) across subjects; downstream stages see only the residuals. The
//! regression is learned once on training subjects and then applied unchanged to
//! any new subject, so held-out data never leaks into the fitted coefficients.

use crate::stats::estimate::{EstimationError, add_intercept, least_squares};
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfoundRegressor {
    /// Coefficients with shape `[1 + n_confounds, n_values]`; row 0 is the intercept.
    /// `None` when no confounds were supplied.
    pub coefficients: Option<Array2<f64>>,
    pub n_confounds: usize,
    pub n_values: usize,
}

impl ConfoundRegressor {
    pub fn fit(
        confounds: ArrayView2<f64>,
        data: ArrayView2<f64>,
    ) -> Result<Self, EstimationError> {
        if confounds.nrows() != data.nrows() {
            return Err(EstimationError::DimensionMismatch {
                context: "confound rows",
                expected: data.nrows(),
                found: confounds.nrows(),
            });
        }
        let n_confounds = confounds.ncols();
        if n_confounds == 0 {
            return Ok(Self {
                coefficients: None,
                n_confounds,
                n_values: data.ncols(),
            });
        }

        let design = add_intercept(confounds);
        let (coefficients, _) = least_squares(design.view(), data)?;
        Ok(Self {
            coefficients: Some(coefficients),
            n_confounds,
            n_values: data.ncols(),
        })
    }

    /// Returns `data` minus the confound prediction.
    pub fn transform(
        &self,
        confounds: ArrayView2<f64>,
        data: ArrayView2<f64>,
    ) -> Result<Array2<f64>, EstimationError> {
        if confounds.nrows() != data.nrows() {
            return Err(EstimationError::DimensionMismatch {
                context: "confound rows",
                expected: data.nrows(),
                found: confounds.nrows(),
            });
        }
        if confounds.ncols() != self.n_confounds {
            return Err(EstimationError::DimensionMismatch {
                context: "confound columns",
                expected: self.n_confounds,
                found: confounds.ncols(),
            });
        }
        if data.ncols() != self.n_values {
            return Err(EstimationError::DimensionMismatch {
                context: "connectivity values",
                expected: self.n_values,
                found: data.ncols(),
            });
        }

        match &self.coefficients {
            None => Ok(data.to_owned()),
            Some(beta) => {
                let design = add_intercept(confounds);
                Ok(&data - &design.dot(beta))
            }
        }
    }
}
