//! Cross-validation splitters.
//!
//! `stratified_k_fold` reproduces the classic non-shuffled stratified k-fold
//! assignment: each class is cut into contiguous chunks in input order and chunk
//! `f` of every class lands in test fold `f`.

use crate::stats::estimate::EstimationError;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

/// Train/test indices of a single split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Sorted distinct labels present in `y`.
pub fn unique_labels(y: &[usize]) -> Vec<usize> {
    let mut labels = y.to_vec();
    labels.sort_unstable();
    labels.dedup();
    labels
}

fn members_by_class(y: &[usize]) -> Vec<Vec<usize>> {
    unique_labels(y)
        .into_iter()
        .map(|label| {
            y.iter()
                .enumerate()
                .filter(|&(_, &v)| v == label)
                .map(|(i, _)| i)
                .collect()
        })
        .collect()
}

fn split_from_test_mask(in_test: &[bool]) -> Split {
    let mut train = Vec::new();
    let mut test = Vec::new();
    for (i, &t) in in_test.iter().enumerate() {
        if t {
            test.push(i);
        } else {
            train.push(i);
        }
    }
    Split { train, test }
}

/// Stratified k-fold without shuffling. Folds whose test part would be empty
/// (possible when every class is smaller than `k`) are omitted.
pub fn stratified_k_fold(y: &[usize], k: usize) -> Result<Vec<Split>, EstimationError> {
    let n = y.len();
    if k < 2 || k > n {
        return Err(EstimationError::InvalidFolds {
            folds: k,
            samples: n,
        });
    }

    let mut test_fold = vec![0usize; n];
    for members in members_by_class(y) {
        let count = members.len();
        let span = count.max(k);
        let base = span / k;
        let extra = span % k;
        let mut start = 0;
        for fold in 0..k {
            let size = base + usize::from(fold < extra);
            for position in start..(start + size).min(count) {
                test_fold[members[position]] = fold;
            }
            start += size;
        }
    }

    let splits = (0..k)
        .map(|fold| {
            let mask: Vec<bool> = test_fold.iter().map(|&f| f == fold).collect();
            split_from_test_mask(&mask)
        })
        .filter(|split| !split.test.is_empty())
        .collect();
    Ok(splits)
}

/// One split per sample, holding that sample out.
pub fn leave_one_out(n: usize) -> Vec<Split> {
    (0..n)
        .map(|held_out| Split {
            train: (0..n).filter(|&i| i != held_out).collect(),
            test: vec![held_out],
        })
        .collect()
}

/// Repeated random stratified splits. Each class contributes
/// `round(test_fraction * count)` members to the test part, clamped so that
/// every class of two or more members keeps at least one member on each side.
pub fn stratified_shuffle_split(
    y: &[usize],
    n_iter: usize,
    test_fraction: f64,
    seed: u64,
) -> Result<Vec<Split>, EstimationError> {
    if !(test_fraction > 0.0 && test_fraction < 1.0) {
        return Err(EstimationError::InvalidParameter(format!(
            "test fraction must lie strictly between 0 and 1, got {test_fraction}"
        )));
    }
    if y.len() < 2 {
        return Err(EstimationError::TooFewSamples {
            context: "Shuffle split",
            found: y.len(),
            required: 2,
        });
    }

    let classes = members_by_class(y);
    let mut rng = StdRng::seed_from_u64(seed);
    let mut splits = Vec::with_capacity(n_iter);
    for _ in 0..n_iter {
        let mut in_test = vec![false; y.len()];
        for members in &classes {
            if members.len() < 2 {
                continue;
            }
            let mut shuffled = members.clone();
            shuffled.shuffle(&mut rng);
            let wanted = (test_fraction * members.len() as f64).round() as usize;
            let take = wanted.clamp(1, members.len() - 1);
            for &i in &shuffled[..take] {
                in_test[i] = true;
            }
        }
        splits.push(split_from_test_mask(&in_test));
    }
    Ok(splits)
}
