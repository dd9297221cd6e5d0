//! Selection of informative subtype weights.
//!
//! Every subtype-weight column is tested for a positive association with the
//! label through the GLM `weight ~ 1 + label + confounds` and the t contrast on
//! the label regressor. Columns surviving Benjamini-Hochberg correction are kept;
//! when too few survive, the columns with the smallest p-values are used instead.

use crate::stats::estimate::{EstimationError, add_intercept};
use crate::stats::glm::{fit_ols, t_contrast};
use crate::stats::multitest::benjamini_hochberg;
use itertools::Itertools;
use ndarray::{Array1, Array2, ArrayView2, Axis, s};
use serde::{Deserialize, Serialize};

/// Selected column indices, ordered by ascending p-value when a test was run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureSelection {
    pub indices: Vec<usize>,
    pub p_values: Option<Array1<f64>>,
}

impl FeatureSelection {
    /// Keeps every column in natural order.
    pub fn all(n_features: usize) -> Self {
        Self {
            indices: (0..n_features).collect(),
            p_values: None,
        }
    }

    pub fn apply(&self, weights: ArrayView2<f64>) -> Result<Array2<f64>, EstimationError> {
        if let Some(&out_of_range) = self.indices.iter().find(|&&i| i >= weights.ncols()) {
            return Err(EstimationError::DimensionMismatch {
                context: "selected feature index",
                expected: weights.ncols(),
                found: out_of_range + 1,
            });
        }
        Ok(weights.select(Axis(1), &self.indices))
    }
}

/// Runs the GLM contrast and FDR selection described in the module docs.
pub fn select_features(
    weights: ArrayView2<f64>,
    labels: &[usize],
    confounds: ArrayView2<f64>,
    alpha: f64,
    min_features: usize,
) -> Result<FeatureSelection, EstimationError> {
    let n = weights.nrows();
    if labels.len() != n || confounds.nrows() != n {
        return Err(EstimationError::DimensionMismatch {
            context: "feature selection subjects",
            expected: n,
            found: if labels.len() != n { labels.len() } else { confounds.nrows() },
        });
    }

    // Design: [1, label, confounds...]
    let mut regressors = Array2::zeros((n, 1 + confounds.ncols()));
    for (i, &label) in labels.iter().enumerate() {
        regressors[[i, 0]] = label as f64;
    }
    regressors.slice_mut(s![.., 1..]).assign(&confounds);
    let design = add_intercept(regressors.view());

    let mut contrast = Array1::zeros(design.ncols());
    contrast[1] = 1.0;

    let fit = fit_ols(weights, design.view())?;
    let result = t_contrast(&fit, contrast.view())?;
    let p_values = result.p_values;
    let fdr = benjamini_hochberg(p_values.view(), alpha);

    let by_p_value = |candidates: Vec<usize>| -> Vec<usize> {
        candidates
            .into_iter()
            .sorted_by(|&a, &b| p_values[a].total_cmp(&p_values[b]))
            .collect()
    };

    let survivors: Vec<usize> = (0..p_values.len()).filter(|&i| fdr.reject[i]).collect();
    let indices = if survivors.len() < min_features {
        log::info!(
            "{} feature(s) survived FDR correction at alpha = {alpha}; keeping the {} smallest p-values",
            survivors.len(),
            min_features.min(p_values.len())
        );
        by_p_value((0..p_values.len()).collect())
            .into_iter()
            .take(min_features)
            .collect()
    } else {
        log::info!("{} feature(s) survived FDR correction at alpha = {alpha}", survivors.len());
        by_p_value(survivors)
    };

    Ok(FeatureSelection {
        indices,
        p_values: Some(p_values),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn cohort() -> (Array2<f64>, Vec<usize>, Array2<f64>) {
        let labels = vec![0, 0, 0, 0, 0, 0, 1, 1, 1, 1, 1, 1];
        let jitter = [0.1, -0.2, 0.05, 0.15, -0.1, 0.0, 0.2, -0.05, 0.1, -0.15, 0.0, 0.05];
        let confounds = Array2::from_shape_fn((12, 1), |(i, _)| (i % 3) as f64);
        let weights = Array2::from_shape_fn((12, 4), |(i, j)| {
            let y = labels[i] as f64;
            match j {
                0 => 3.0 * y + jitter[i],         // strong positive effect
                1 => jitter[(i + 5) % 12],        // no effect
                2 => -3.0 * y + jitter[i],        // negative effect
                _ => 1.0 * y + jitter[(i + 3) % 12], // moderate positive effect
            }
        });
        (weights, labels, confounds)
    }

    #[test]
    fn survivors_are_ordered_by_p_value() {
        let (weights, labels, confounds) = cohort();
        let selection = select_features(weights.view(), &labels, confounds.view(), 0.01, 1).unwrap();
        assert_eq!(selection.indices, vec![0, 3]);
        let p = selection.p_values.unwrap();
        assert!(p[0] < p[3]);
        assert!(p[2] > 0.99);
    }

    #[test]
    fn too_few_survivors_fall_back_to_smallest_p_values() {
        let (weights, labels, confounds) = cohort();
        let selection =
            select_features(weights.view(), &labels, confounds.view(), 0.01, 10).unwrap();
        // Only four columns exist: all of them, ordered by p-value.
        assert_eq!(selection.indices.len(), 4);
        assert_eq!(selection.indices[0], 0);
        assert_eq!(selection.indices[1], 3);
        assert_eq!(*selection.indices.last().unwrap(), 2);
    }

    #[test]
    fn apply_selects_columns_in_order() {
        let selection = FeatureSelection {
            indices: vec![2, 0],
            p_values: None,
        };
        let w = array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]];
        assert_eq!(selection.apply(w.view()).unwrap(), array![[3.0, 1.0], [6.0, 4.0]]);
        assert!(FeatureSelection::all(2).apply(w.view()).is_ok());
        let bad = FeatureSelection { indices: vec![3], p_values: None };
        assert!(bad.apply(w.view()).is_err());
    }
}
