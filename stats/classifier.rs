// stats/classifier.rs

//! # Binary Linear Classifiers
//!
//! A single seam over the two linear models the pipeline can use for its
//! stage-one predictor: L2 logistic regression and the linear SVM. Both are
//! described by a `ClassifierSpec` (model family, penalty `C`, class weighting)
//! and produce a `LinearClassifier` that is fully described by its coefficients,
//! so it can be serialized alongside the rest of a trained pipeline.
//!
//! Labels are always binary `0` / `1`; label `1` is the positive class and a
//! positive decision value predicts it.

use crate::stats::estimate::EstimationError;
use crate::stats::folds::unique_labels;
use crate::stats::logistic::fit_logistic;
use crate::stats::svm::fit_linear_svm;
use ndarray::{Array1, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

/// Decision value reported by a classifier trained on a single class.
const CONSTANT_MARGIN: f64 = 1.0;

/// The family of linear model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClassifierKind {
    /// L2-penalized logistic regression.
    Logit,
    /// Hinge-loss linear support vector classifier.
    LinearSvm,
}

impl ClassifierKind {
    /// Candidate values of `C` explored by grid search, in search order.
    pub fn param_grid(self) -> Vec<f64> {
        match self {
            // 10^1, 10^0.5, ..., 10^-1.5
            Self::Logit => (0..6).map(|i| 10f64.powf(1.0 - 0.5 * i as f64)).collect(),
            // 3.5, 3.0, ..., 0.5
            Self::LinearSvm => (0..7).map(|i| 3.5 - 0.5 * i as f64).collect(),
        }
    }

    /// The penalty used before any tuning.
    pub fn default_c(self) -> f64 {
        match self {
            Self::Logit => 1.0,
            Self::LinearSvm => 0.1,
        }
    }
}

/// How per-class weights enter the loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClassWeight {
    Uniform,
    /// Weight of class `k` is `n / (n_classes * count_k)`.
    Balanced,
}

/// Everything needed to fit a classifier, minus the data.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassifierSpec {
    pub kind: ClassifierKind,
    pub c: f64,
    pub class_weight: ClassWeight,
}

/// A fitted binary linear classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearClassifier {
    pub spec: ClassifierSpec,
    pub coef: Array1<f64>,
    pub intercept: f64,
    /// Sorted labels seen during training (one or two entries).
    pub classes: Vec<usize>,
}

/// Rejects any label other than 0 or 1.
pub fn validate_binary_labels(y: &[usize]) -> Result<(), EstimationError> {
    match y.iter().position(|&v| v > 1) {
        Some(index) => Err(EstimationError::InvalidLabel {
            index,
            value: y[index],
        }),
        None => Ok(()),
    }
}

/// Per-sample weights: prior weights (default 1) times class weights.
pub fn effective_weights(
    y: &[usize],
    sample_weight: Option<ArrayView1<f64>>,
    class_weight: ClassWeight,
) -> Array1<f64> {
    let mut weights = match sample_weight {
        Some(w) => w.to_owned(),
        None => Array1::ones(y.len()),
    };
    if class_weight == ClassWeight::Balanced {
        let classes = unique_labels(y);
        let n = y.len() as f64;
        for &label in &classes {
            let count = y.iter().filter(|&&v| v == label).count() as f64;
            let factor = n / (classes.len() as f64 * count);
            for (w, _) in weights.iter_mut().zip(y).filter(|(_, v)| **v == label) {
                *w *= factor;
            }
        }
    }
    weights
}

impl ClassifierSpec {
    pub fn new(kind: ClassifierKind, class_weight: ClassWeight) -> Self {
        Self {
            kind,
            c: kind.default_c(),
            class_weight,
        }
    }

    pub fn with_c(self, c: f64) -> Self {
        Self { c, ..self }
    }

    /// Fits the classifier to rows of `x` labelled by `y`.
    pub fn fit(
        &self,
        x: ArrayView2<f64>,
        y: &[usize],
        sample_weight: Option<ArrayView1<f64>>,
    ) -> Result<LinearClassifier, EstimationError> {
        if x.nrows() != y.len() {
            return Err(EstimationError::DimensionMismatch {
                context: "classifier labels",
                expected: x.nrows(),
                found: y.len(),
            });
        }
        if let Some(w) = sample_weight {
            if w.len() != y.len() {
                return Err(EstimationError::DimensionMismatch {
                    context: "classifier sample weights",
                    expected: y.len(),
                    found: w.len(),
                });
            }
        }
        if y.is_empty() {
            return Err(EstimationError::TooFewSamples {
                context: "Classifier fitting",
                found: 0,
                required: 1,
            });
        }
        validate_binary_labels(y)?;

        let classes = unique_labels(y);
        if classes.len() == 1 {
            log::warn!(
                "Training set contains only class {}; fitting a constant classifier",
                classes[0]
            );
            let sign = if classes[0] == 1 { 1.0 } else { -1.0 };
            return Ok(LinearClassifier {
                spec: *self,
                coef: Array1::zeros(x.ncols()),
                intercept: sign * CONSTANT_MARGIN,
                classes,
            });
        }

        let weights = effective_weights(y, sample_weight, self.class_weight);
        let (coef, intercept) = match self.kind {
            ClassifierKind::Logit => {
                let targets: Array1<f64> = y.iter().map(|&v| v as f64).collect();
                let solution = fit_logistic(x, targets.view(), weights.view(), self.c)?;
                (solution.coef, solution.intercept)
            }
            ClassifierKind::LinearSvm => {
                let signs: Array1<f64> = y
                    .iter()
                    .map(|&v| if v == 1 { 1.0 } else { -1.0 })
                    .collect();
                let solution = fit_linear_svm(x, signs.view(), weights.view(), self.c)?;
                (solution.coef, solution.intercept)
            }
        };

        Ok(LinearClassifier {
            spec: *self,
            coef,
            intercept,
            classes,
        })
    }
}

impl LinearClassifier {
    /// Signed distance-like score; positive values favour label 1.
    pub fn decision_function(&self, x: ArrayView2<f64>) -> Result<Array1<f64>, EstimationError> {
        if x.ncols() != self.coef.len() {
            return Err(EstimationError::DimensionMismatch {
                context: "classifier features",
                expected: self.coef.len(),
                found: x.ncols(),
            });
        }
        Ok(x.dot(&self.coef) + self.intercept)
    }

    pub fn predict(&self, x: ArrayView2<f64>) -> Result<Vec<usize>, EstimationError> {
        let decision = self.decision_function(x)?;
        Ok(decision.iter().map(|&d| self.label_for(d)).collect())
    }

    fn label_for(&self, decision: f64) -> usize {
        match self.classes.as_slice() {
            [only] => *only,
            _ => usize::from(decision > 0.0),
        }
    }
}
