// predict/pipeline.rs

//! # Subtype Base Prediction Pipeline
//!
//! Chains the stages of the method:
//!
//! 1. Confound regression on the flattened connectomes.
//! 2. Subtype clustering per network and projection onto subtype weights.
//! 3. GLM/FDR selection of subtype weights associated with the label.
//! 4. Optional extra covariates appended after the selected weights.
//! 5. Two-level prediction (label + hit score).
//!
//! Every learned quantity is stored on `SubtypePipeline`, so prediction for new
//! subjects replays exactly the transformations fit on the training subjects.

use crate::confounds::ConfoundRegressor;
use crate::hitmiss::HitMissStrategy;
use crate::selection::{FeatureSelection, select_features};
use crate::stats::classifier::{ClassifierKind, validate_binary_labels};
use crate::stats::estimate::EstimationError;
use crate::subtypes::SubtypeModel;
use crate::two_level::{TwoLevelConfig, TwoLevelPrediction, TwoLevelPredictor};
use ndarray::{Array2, Array3, ArrayView2, ArrayView3, Axis, concatenate};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// All user-facing settings of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SbpConfig {
    pub n_subtypes: usize,
    pub feature_selection: bool,
    pub fdr_alpha: f64,
    pub min_features: usize,
    pub classifier: ClassifierKind,
    pub grid_folds: usize,
    pub hit_miss: HitMissStrategy,
}

impl Default for SbpConfig {
    fn default() -> Self {
        Self {
            n_subtypes: 10,
            feature_selection: true,
            fdr_alpha: 0.01,
            min_features: 10,
            classifier: ClassifierKind::Logit,
            grid_folds: 10,
            hit_miss: HitMissStrategy::LeaveOneOut,
        }
    }
}

impl SbpConfig {
    pub fn two_level(&self) -> TwoLevelConfig {
        TwoLevelConfig {
            classifier: self.classifier,
            grid_folds: self.grid_folds,
            hit_miss: self.hit_miss,
        }
    }
}

/// Borrowed inputs describing a batch of subjects.
#[derive(Debug, Clone, Copy)]
pub struct Subjects<'a> {
    /// `[subjects, networks, features]`
    pub connectomes: ArrayView3<'a, f64>,
    /// `[subjects, confounds]`, possibly with zero columns.
    pub confounds: ArrayView2<'a, f64>,
    /// `[subjects, covariates]` appended to the selected subtype weights.
    pub extra: Option<ArrayView2<'a, f64>>,
}

impl Subjects<'_> {
    pub fn len(&self) -> usize {
        self.connectomes.len_of(Axis(0))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_rows(&self) -> Result<(), EstimationError> {
        let n = self.len();
        let mismatched = [
            Some(self.confounds.nrows()),
            self.extra.map(|e| e.nrows()),
        ];
        for found in mismatched.into_iter().flatten() {
            if found != n {
                return Err(EstimationError::DimensionMismatch {
                    context: "subjects per input table",
                    expected: n,
                    found,
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtypePipeline {
    pub config: SbpConfig,
    pub confounds: ConfoundRegressor,
    pub subtypes: SubtypeModel,
    pub selection: FeatureSelection,
    pub n_extra: usize,
    pub predictor: TwoLevelPredictor,
    /// Median raw connectome of the training subjects, `[networks, features]`.
    pub median_template: Array2<f64>,
}

fn flatten(connectomes: ArrayView3<f64>) -> Result<Array2<f64>, EstimationError> {
    let (n, networks, features) = connectomes.dim();
    Ok(connectomes
        .as_standard_layout()
        .into_owned()
        .into_shape_with_order((n, networks * features))?)
}

fn unflatten(flat: Array2<f64>, networks: usize, features: usize) -> Result<Array3<f64>, EstimationError> {
    let n = flat.nrows();
    Ok(flat.into_shape_with_order((n, networks, features))?)
}

fn median_connectome(connectomes: ArrayView3<f64>) -> Array2<f64> {
    let (_, networks, features) = connectomes.dim();
    Array2::from_shape_fn((networks, features), |(net, feat)| {
        let mut values: Vec<f64> = connectomes.slice(ndarray::s![.., net, feat]).to_vec();
        values.sort_by(f64::total_cmp);
        let m = values.len();
        match m {
            0 => f64::NAN,
            _ if m % 2 == 1 => values[m / 2],
            _ => 0.5 * (values[m / 2 - 1] + values[m / 2]),
        }
    })
}

impl SubtypePipeline {
    /// Removes confounds with the fitted regressor and projects onto subtype weights.
    fn subtype_weights(&self, subjects: &Subjects) -> Result<Array2<f64>, EstimationError> {
        let (_, networks, features) = subjects.connectomes.dim();
        let flat = flatten(subjects.connectomes)?;
        let cleaned = self.confounds.transform(subjects.confounds, flat.view())?;
        let cleaned = unflatten(cleaned, networks, features)?;
        self.subtypes.transform(cleaned.view())
    }

    fn design(
        selection: &FeatureSelection,
        weights: ArrayView2<f64>,
        extra: Option<ArrayView2<f64>>,
    ) -> Result<Array2<f64>, EstimationError> {
        let selected = selection.apply(weights)?;
        match extra {
            Some(extra) if extra.ncols() > 0 => {
                Ok(concatenate(Axis(1), &[selected.view(), extra.view()])?)
            }
            _ => Ok(selected),
        }
    }

    pub fn fit(
        subjects: &Subjects,
        labels: &[usize],
        config: &SbpConfig,
    ) -> Result<Self, EstimationError> {
        subjects.check_rows()?;
        if labels.len() != subjects.len() {
            return Err(EstimationError::DimensionMismatch {
                context: "labels",
                expected: subjects.len(),
                found: labels.len(),
            });
        }
        validate_binary_labels(labels)?;

        let (_, networks, features) = subjects.connectomes.dim();
        log::info!(
            "Fitting subtype base prediction on {} subjects ({} networks x {} features, {} confounds)",
            subjects.len(),
            networks,
            features,
            subjects.confounds.ncols()
        );

        // Confound regression.
        let start = Instant::now();
        let flat = flatten(subjects.connectomes)?;
        let confounds = ConfoundRegressor::fit(subjects.confounds, flat.view())?;
        let cleaned = confounds.transform(subjects.confounds, flat.view())?;
        let cleaned = unflatten(cleaned, networks, features)?;
        log::info!("Confound regression, time elapsed: {:.2}s", start.elapsed().as_secs_f64());

        // Subtypes.
        let start = Instant::now();
        let subtypes = SubtypeModel::fit(cleaned.view(), config.n_subtypes)?;
        let weights = subtypes.transform(cleaned.view())?;
        log::info!(
            "Computed {} subtype weights, time elapsed: {:.2}s",
            weights.ncols(),
            start.elapsed().as_secs_f64()
        );

        // Feature selection.
        let start = Instant::now();
        let selection = if config.feature_selection {
            select_features(
                weights.view(),
                labels,
                subjects.confounds,
                config.fdr_alpha,
                config.min_features,
            )?
        } else {
            FeatureSelection::all(weights.ncols())
        };
        log::info!(
            "Feature selection kept {} of {} weights, time elapsed: {:.2}s",
            selection.indices.len(),
            weights.ncols(),
            start.elapsed().as_secs_f64()
        );

        // Two-level prediction.
        let start = Instant::now();
        let design = Self::design(&selection, weights.view(), subjects.extra)?;
        let predictor = TwoLevelPredictor::fit(design.view(), labels, &config.two_level())?;
        log::info!("Two-level prediction, time elapsed: {:.2}s", start.elapsed().as_secs_f64());

        Ok(Self {
            config: *config,
            confounds,
            subtypes,
            selection,
            n_extra: subjects.extra.map_or(0, |e| e.ncols()),
            predictor,
            median_template: median_connectome(subjects.connectomes),
        })
    }

    pub fn predict(&self, subjects: &Subjects) -> Result<TwoLevelPrediction, EstimationError> {
        subjects.check_rows()?;
        let found_extra = subjects.extra.map_or(0, |e| e.ncols());
        if found_extra != self.n_extra {
            return Err(EstimationError::DimensionMismatch {
                context: "extra covariates",
                expected: self.n_extra,
                found: found_extra,
            });
        }
        let weights = self.subtype_weights(subjects)?;
        let design = Self::design(&self.selection, weights.view(), subjects.extra)?;
        self.predictor.predict(design.view())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn flatten_and_unflatten_are_inverse() {
        let data = Array3::from_shape_fn((2, 3, 4), |(i, j, k)| (i * 100 + j * 10 + k) as f64);
        let flat = flatten(data.view()).unwrap();
        assert_eq!(flat.dim(), (2, 12));
        assert_eq!(flat[[1, 5]], 111.0);
        assert_eq!(unflatten(flat, 3, 4).unwrap(), data);
    }

    #[test]
    fn median_handles_even_and_odd_counts() {
        let odd = Array3::from_shape_vec((3, 1, 1), vec![5.0, 1.0, 3.0]).unwrap();
        assert_abs_diff_eq!(median_connectome(odd.view())[[0, 0]], 3.0);
        let even = Array3::from_shape_vec((4, 1, 1), vec![4.0, 1.0, 3.0, 2.0]).unwrap();
        assert_abs_diff_eq!(median_connectome(even.view())[[0, 0]], 2.5);
    }

    #[test]
    fn extra_covariates_follow_selected_weights() {
        let selection = FeatureSelection {
            indices: vec![1],
            p_values: None,
        };
        let weights = array![[0.1, 0.2], [0.3, 0.4]];
        let extra = array![[7.0], [8.0]];
        let design = SubtypePipeline::design(&selection, weights.view(), Some(extra.view())).unwrap();
        assert_eq!(design, array![[0.2, 7.0], [0.4, 8.0]]);
    }

    #[test]
    fn mismatched_confound_rows_are_rejected() {
        let connectomes = Array3::<f64>::zeros((4, 1, 3));
        let confounds = Array2::<f64>::zeros((3, 1));
        let subjects = Subjects {
            connectomes: connectomes.view(),
            confounds: confounds.view(),
            extra: None,
        };
        let err = SubtypePipeline::fit(&subjects, &[0, 1, 0, 1], &SbpConfig::default()).unwrap_err();
        assert!(matches!(err, EstimationError::DimensionMismatch { .. }));
    }
}
