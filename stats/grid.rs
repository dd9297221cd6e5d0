//! Hyperparameter search over the penalty `C` with stratified cross-validation.
//!
//! Every (candidate, fold) pair is an independent fit, so the whole grid is
//! evaluated in parallel. The score of a candidate is the pooled accuracy over
//! all test folds; the first candidate reaching the best score wins and is refit
//! on the complete data.

use crate::stats::classifier::{ClassifierSpec, LinearClassifier};
use crate::stats::estimate::EstimationError;
use crate::stats::folds::{Split, stratified_k_fold};
use ndarray::{Array1, ArrayView1, ArrayView2, Axis};
use rayon::prelude::*;

#[derive(Debug, Clone)]
pub struct GridSearchResult {
    pub best_spec: ClassifierSpec,
    pub best_score: f64,
    /// `(C, pooled accuracy)` for every candidate, in grid order.
    pub scores: Vec<(f64, f64)>,
    /// The best candidate refit on all samples.
    pub estimator: LinearClassifier,
}

/// Subsets rows of `x`, labels and optional weights by `indices`.
pub fn subset_rows(
    x: ArrayView2<f64>,
    y: &[usize],
    weights: Option<ArrayView1<f64>>,
    indices: &[usize],
) -> (ndarray::Array2<f64>, Vec<usize>, Option<Array1<f64>>) {
    let xs = x.select(Axis(0), indices);
    let ys = indices.iter().map(|&i| y[i]).collect();
    let ws = weights.map(|w| w.select(Axis(0), indices));
    (xs, ys, ws)
}

fn fold_correct(
    spec: ClassifierSpec,
    x: ArrayView2<f64>,
    y: &[usize],
    weights: Option<ArrayView1<f64>>,
    split: &Split,
) -> Result<usize, EstimationError> {
    let (x_train, y_train, w_train) = subset_rows(x, y, weights, &split.train);
    let model = spec.fit(x_train.view(), &y_train, w_train.as_ref().map(|w| w.view()))?;
    let x_test = x.select(Axis(0), &split.test);
    let predicted = model.predict(x_test.view())?;
    Ok(predicted
        .iter()
        .zip(&split.test)
        .filter(|&(&p, &i)| p == y[i])
        .count())
}

/// Searches `grid` for the best `C` of `base`, stratifying folds on `y`.
pub fn grid_search(
    base: ClassifierSpec,
    grid: &[f64],
    x: ArrayView2<f64>,
    y: &[usize],
    sample_weight: Option<ArrayView1<f64>>,
    n_folds: usize,
) -> Result<GridSearchResult, EstimationError> {
    if grid.is_empty() {
        return Err(EstimationError::InvalidParameter(
            "grid search needs at least one candidate".to_string(),
        ));
    }
    let splits = stratified_k_fold(y, n_folds)?;
    let tested: usize = splits.iter().map(|s| s.test.len()).sum();

    let tasks: Vec<(usize, &Split)> = (0..grid.len())
        .flat_map(|c_idx| splits.iter().map(move |split| (c_idx, split)))
        .collect();

    let outcomes = tasks
        .par_iter()
        .map(|&(c_idx, split)| {
            fold_correct(base.with_c(grid[c_idx]), x, y, sample_weight, split)
                .map(|correct| (c_idx, correct))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut correct_per_candidate = vec![0usize; grid.len()];
    for (c_idx, correct) in outcomes {
        correct_per_candidate[c_idx] += correct;
    }

    let scores: Vec<(f64, f64)> = grid
        .iter()
        .zip(&correct_per_candidate)
        .map(|(&c, &correct)| (c, correct as f64 / tested as f64))
        .collect();

    let mut best_idx = 0;
    for (idx, &(_, score)) in scores.iter().enumerate() {
        if score > scores[best_idx].1 {
            best_idx = idx;
        }
    }
    let best_spec = base.with_c(grid[best_idx]);
    log::debug!(
        "Grid search over {} candidates x {} folds: best C = {:.4} (accuracy {:.3})",
        grid.len(),
        splits.len(),
        best_spec.c,
        scores[best_idx].1
    );

    let estimator = best_spec.fit(x, y, sample_weight)?;
    Ok(GridSearchResult {
        best_spec,
        best_score: scores[best_idx].1,
        scores,
        estimator,
    })
}
