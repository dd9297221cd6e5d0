// predict/hitmiss.rs

//! # Hit/Miss Re-estimation
//!
//! The second level of the predictor learns *where the first level is right*.
//! Its training target is therefore whether the stage-one classifier classifies
//! each training subject correctly when that subject was not part of the fit.
//! Using in-sample predictions here would label nearly every subject a "hit".
//!
//! Two strategies are available:
//!
//! - `LeaveOneOut`: each subject is predicted by a model fit on everyone else.
//! - `Shuffle`: stability re-estimation over repeated stratified shuffle splits.
//!   A subject's hit rate is the fraction of its out-of-sample predictions that
//!   were correct, and it counts as a hit when that rate is at least one half.

use crate::stats::classifier::ClassifierSpec;
use crate::stats::estimate::EstimationError;
use crate::stats::folds::{Split, leave_one_out, stratified_shuffle_split};
use crate::stats::grid::subset_rows;
use ndarray::{ArrayView2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum HitMissStrategy {
    #[default]
    LeaveOneOut,
    Shuffle {
        n_iter: usize,
        test_fraction: f64,
        seed: u32,
    },
}

/// Out-of-sample correctness of the stage-one classifier.
#[derive(Debug, Clone, PartialEq)]
pub struct HitMiss {
    /// 1 when the subject was classified correctly, else 0.
    pub hits: Vec<usize>,
    /// The out-of-sample predicted label of every subject.
    pub predictions: Vec<usize>,
}

impl HitMiss {
    pub fn hit_rate(&self) -> f64 {
        if self.hits.is_empty() {
            return 0.0;
        }
        self.hits.iter().sum::<usize>() as f64 / self.hits.len() as f64
    }
}

/// Predictions for the test part of `split` from a model fit on its train part.
fn held_out_predictions(
    spec: &ClassifierSpec,
    x: ArrayView2<f64>,
    y: &[usize],
    split: &Split,
) -> Result<Vec<(usize, usize)>, EstimationError> {
    let (x_train, y_train, _) = subset_rows(x, y, None, &split.train);
    let model = spec.fit(x_train.view(), &y_train, None)?;
    let predicted = model.predict(x.select(Axis(0), &split.test).view())?;
    Ok(split.test.iter().copied().zip(predicted).collect())
}

/// Majority vote over the held-out `(subject, predicted)` pairs of all splits.
/// Ties and subjects that were never held out fall back to `in_sample`.
fn tally_votes(
    y: &[usize],
    in_sample: &[usize],
    outcomes: impl IntoIterator<Item = (usize, usize)>,
) -> HitMiss {
    let n = y.len();
    let mut tested = vec![0usize; n];
    let mut correct = vec![0usize; n];
    let mut votes_for_one = vec![0usize; n];
    for (subject, predicted) in outcomes {
        tested[subject] += 1;
        correct[subject] += usize::from(predicted == y[subject]);
        votes_for_one[subject] += predicted;
    }

    let mut hits = Vec::with_capacity(n);
    let mut predictions = Vec::with_capacity(n);
    for i in 0..n {
        if tested[i] == 0 {
            predictions.push(in_sample[i]);
            hits.push(usize::from(in_sample[i] == y[i]));
            continue;
        }
        let prediction = match (2 * votes_for_one[i]).cmp(&tested[i]) {
            Ordering::Greater => 1,
            Ordering::Less => 0,
            Ordering::Equal => in_sample[i],
        };
        predictions.push(prediction);
        hits.push(usize::from(2 * correct[i] >= tested[i]));
    }
    let untested = tested.iter().filter(|&&t| t == 0).count();
    if untested > 0 {
        log::warn!(
            "{untested} subject(s) never fell in a shuffle test split; using in-sample hit/miss for them"
        );
    }
    HitMiss { hits, predictions }
}

pub fn estimate_hit_miss(
    spec: &ClassifierSpec,
    x: ArrayView2<f64>,
    y: &[usize],
    strategy: HitMissStrategy,
) -> Result<HitMiss, EstimationError> {
    let n = y.len();
    if n < 2 {
        return Err(EstimationError::TooFewSamples {
            context: "Hit/miss estimation",
            found: n,
            required: 2,
        });
    }

    match strategy {
        HitMissStrategy::LeaveOneOut => {
            let outcomes = leave_one_out(n)
                .par_iter()
                .map(|split| held_out_predictions(spec, x, y, split))
                .collect::<Result<Vec<_>, _>>()?;

            let mut predictions = vec![0usize; n];
            for (subject, predicted) in outcomes.into_iter().flatten() {
                predictions[subject] = predicted;
            }
            let hits = predictions
                .iter()
                .zip(y)
                .map(|(p, t)| usize::from(p == t))
                .collect();
            Ok(HitMiss { hits, predictions })
        }
        HitMissStrategy::Shuffle {
            n_iter,
            test_fraction,
            seed,
        } => {
            let splits = stratified_shuffle_split(y, n_iter, test_fraction, u64::from(seed))?;
            let outcomes = splits
                .par_iter()
                .map(|split| held_out_predictions(spec, x, y, split))
                .collect::<Result<Vec<_>, _>>()?;

            let in_sample = spec.fit(x, y, None)?.predict(x)?;
            Ok(tally_votes(y, &in_sample, outcomes.into_iter().flatten()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::classifier::{ClassWeight, ClassifierKind};
    use ndarray::Array2;

    fn overlapping_classes() -> (Array2<f64>, Vec<usize>) {
        let values = [-3.0, -2.0, -1.5, -1.0, 0.5, 1.0, 1.5, 2.0, 3.0, -0.5, 0.2, -0.2];
        let y = vec![0, 0, 0, 0, 0, 1, 1, 1, 1, 1, 0, 1];
        let x = Array2::from_shape_fn((values.len(), 1), |(i, _)| values[i]);
        (x, y)
    }

    #[test]
    fn leave_one_out_flags_boundary_subjects_as_misses() {
        let (x, y) = overlapping_classes();
        let spec = ClassifierSpec::new(ClassifierKind::Logit, ClassWeight::Balanced);
        let hm = estimate_hit_miss(&spec, x.view(), &y, HitMissStrategy::LeaveOneOut).unwrap();
        assert_eq!(hm.hits.len(), y.len());
        // Far-away subjects are always recovered.
        assert_eq!(hm.hits[0], 1);
        assert_eq!(hm.hits[8], 1);
        // Subject 4 (class 0 at +0.5) and subject 9 (class 1 at -0.5) sit on the wrong side.
        assert_eq!(hm.hits[4], 0);
        assert_eq!(hm.hits[9], 0);
        assert_eq!(hm.predictions[4], 1);
        assert!(hm.hit_rate() < 1.0);
    }

    #[test]
    fn shuffle_strategy_is_reproducible() {
        let (x, y) = overlapping_classes();
        let spec = ClassifierSpec::new(ClassifierKind::Logit, ClassWeight::Balanced);
        let strategy = HitMissStrategy::Shuffle {
            n_iter: 30,
            test_fraction: 0.3,
            seed: 11,
        };
        let a = estimate_hit_miss(&spec, x.view(), &y, strategy).unwrap();
        let b = estimate_hit_miss(&spec, x.view(), &y, strategy).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.hits[0], 1);
        assert_eq!(a.hits[4], 0);
    }

    #[test]
    fn subjects_never_held_out_keep_in_sample_hit_miss() {
        let (x, y) = overlapping_classes();
        let spec = ClassifierSpec::new(ClassifierKind::Logit, ClassWeight::Balanced);
        let strategy = HitMissStrategy::Shuffle {
            n_iter: 1,
            test_fraction: 0.25,
            seed: 4,
        };
        let hm = estimate_hit_miss(&spec, x.view(), &y, strategy).unwrap();
        let split = &stratified_shuffle_split(&y, 1, 0.25, 4).unwrap()[0];
        let in_sample = spec.fit(x.view(), &y, None).unwrap().predict(x.view()).unwrap();

        let untested: Vec<usize> = (0..y.len()).filter(|i| !split.test.contains(i)).collect();
        assert_eq!(untested.len(), y.len() - split.test.len());
        assert!(!untested.is_empty());
        for i in untested {
            assert_eq!(hm.predictions[i], in_sample[i]);
            assert_eq!(hm.hits[i], usize::from(in_sample[i] == y[i]));
        }
    }

    #[test]
    fn tied_votes_fall_back_to_in_sample_prediction() {
        let y = [0, 1, 1];
        let in_sample = [1, 0, 1];
        // Subject 0: one vote each way. Subject 1: one vote each way.
        // Subject 2: two of three votes wrong.
        let outcomes = [(0, 0), (0, 1), (1, 1), (1, 0), (2, 0), (2, 0), (2, 1)];
        let hm = tally_votes(&y, &in_sample, outcomes);
        assert_eq!(hm.predictions, vec![1, 0, 0]);
        // Half of the held-out predictions correct still counts as a hit.
        assert_eq!(hm.hits, vec![1, 1, 0]);
    }

    #[test]
    fn single_subject_is_rejected() {
        let x = Array2::zeros((1, 1));
        let spec = ClassifierSpec::new(ClassifierKind::Logit, ClassWeight::Balanced);
        assert!(estimate_hit_miss(&spec, x.view(), &[0], HitMissStrategy::LeaveOneOut).is_err());
    }
}
