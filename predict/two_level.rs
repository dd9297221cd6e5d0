// predict/two_level.rs

//! # Two-Level Prediction
//!
//! Level one is an ordinary class predictor: a class-balanced linear classifier
//! whose penalty is tuned by stratified grid search.
//!
//! Level two predicts whether level one can be trusted for a given subject. Its
//! target is the out-of-sample hit/miss outcome of the tuned level-one model (see
//! `hitmiss`). To keep level two from simply learning the label, training subjects
//! are re-weighted so that the four (label, hit/miss) combinations carry equal
//! total weight. The signed decision value of level two is the per-subject hit
//! score: positive values mark subjects whose level-one label is likely correct.

use crate::hitmiss::{HitMiss, HitMissStrategy, estimate_hit_miss};
use crate::stats::classifier::{ClassWeight, ClassifierKind, ClassifierSpec, LinearClassifier};
use crate::stats::estimate::EstimationError;
use crate::stats::grid::grid_search;
use ndarray::{Array1, Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Hyperparameters of the two-level predictor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TwoLevelConfig {
    /// Model family of level one. Level two is always logistic.
    pub classifier: ClassifierKind,
    /// Number of stratified folds used by both grid searches.
    pub grid_folds: usize,
    pub hit_miss: HitMissStrategy,
}

impl Default for TwoLevelConfig {
    fn default() -> Self {
        Self {
            classifier: ClassifierKind::Logit,
            grid_folds: 10,
            hit_miss: HitMissStrategy::LeaveOneOut,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwoLevelPredictor {
    pub stage_one: LinearClassifier,
    pub stage_two: LinearClassifier,
    /// Out-of-sample hit rate of level one on the training subjects.
    pub training_hit_rate: f64,
}

/// Level-one labels and level-two hit scores for a batch of subjects.
#[derive(Debug, Clone, PartialEq)]
pub struct TwoLevelPrediction {
    pub labels: Vec<usize>,
    pub hit_scores: Array1<f64>,
}

impl TwoLevelPrediction {
    /// `[n, 2]` matrix with the label in column 0 and the hit score in column 1.
    pub fn to_matrix(&self) -> Array2<f64> {
        Array2::from_shape_fn((self.labels.len(), 2), |(i, j)| match j {
            0 => self.labels[i] as f64,
            _ => self.hit_scores[i],
        })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Sample weights equalizing the total weight of the four
/// (label, hit/miss) groups, normalized so that the group weights sum to one.
pub fn balancing_weights(y: &[usize], hits: &[usize]) -> Array1<f64> {
    let groups: Vec<usize> = y.iter().zip(hits).map(|(&label, &hit)| label + 2 * hit).collect();
    let mut counts = [0usize; 4];
    for &g in &groups {
        counts[g] += 1;
    }
    let present = counts.iter().filter(|&&c| c > 0).count() as f64;
    let n = groups.len() as f64;

    let mut group_weight = [0.0_f64; 4];
    for (weight, &count) in group_weight.iter_mut().zip(&counts) {
        if count > 0 {
            *weight = n / (present * count as f64);
        }
    }
    let total: f64 = group_weight.iter().sum();
    if total > 0.0 {
        group_weight.iter_mut().for_each(|w| *w /= total);
    }

    groups.iter().map(|&g| group_weight[g]).collect()
}

impl TwoLevelPredictor {
    pub fn fit(
        x: ArrayView2<f64>,
        y: &[usize],
        config: &TwoLevelConfig,
    ) -> Result<Self, EstimationError> {
        if x.nrows() != y.len() {
            return Err(EstimationError::DimensionMismatch {
                context: "two-level predictor labels",
                expected: x.nrows(),
                found: y.len(),
            });
        }

        // Level one: tuned, class-balanced classifier.
        let start = Instant::now();
        let base = ClassifierSpec::new(config.classifier, ClassWeight::Balanced);
        let stage_one_search = grid_search(
            base,
            &config.classifier.param_grid(),
            x,
            y,
            None,
            config.grid_folds,
        )?;
        log::info!(
            "Level one: {:?} with C = {:.4} (cross-validated accuracy {:.3}), {:.2}s",
            config.classifier,
            stage_one_search.best_spec.c,
            stage_one_search.best_score,
            start.elapsed().as_secs_f64()
        );

        // Out-of-sample hit/miss of the tuned level-one model.
        let start = Instant::now();
        let hit_miss = estimate_hit_miss(&stage_one_search.best_spec, x, y, config.hit_miss)?;
        let training_hit_rate = hit_miss.hit_rate();
        let HitMiss { hits, .. } = hit_miss;
        log::info!(
            "Hit/miss re-estimation ({:?}): hit rate {:.3}, {:.2}s",
            config.hit_miss,
            training_hit_rate,
            start.elapsed().as_secs_f64()
        );

        // Level two: logistic hit/miss predictor on balanced (label, hit) groups.
        let start = Instant::now();
        let sample_weight = balancing_weights(y, &hits);
        let stage_two_base = ClassifierSpec::new(ClassifierKind::Logit, ClassWeight::Uniform);
        let stage_two_search = grid_search(
            stage_two_base,
            &ClassifierKind::Logit.param_grid(),
            x,
            &hits,
            Some(sample_weight.view()),
            config.grid_folds,
        )?;
        log::info!(
            "Level two: logistic with C = {:.4} (cross-validated accuracy {:.3}), {:.2}s",
            stage_two_search.best_spec.c,
            stage_two_search.best_score,
            start.elapsed().as_secs_f64()
        );

        Ok(Self {
            stage_one: stage_one_search.estimator,
            stage_two: stage_two_search.estimator,
            training_hit_rate,
        })
    }

    pub fn predict(&self, x: ArrayView2<f64>) -> Result<TwoLevelPrediction, EstimationError> {
        Ok(TwoLevelPrediction {
            labels: self.stage_one.predict(x)?,
            hit_scores: self.stage_two.decision_function(x)?,
        })
    }
}
