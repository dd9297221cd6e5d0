// predict/validation.rs

//! # Leave-One-Out Accuracy Estimation
//!
//! Every subject is predicted by a pipeline fit on all other subjects. The whole
//! pipeline is refit per fold (confound regression, subtypes, feature selection,
//! both levels), so no information from the held-out subject leaks into its
//! prediction.

use crate::pipeline::{SbpConfig, Subjects, SubtypePipeline};
use crate::stats::estimate::EstimationError;
use crate::stats::folds::leave_one_out;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use ndarray::{Array2, Axis};
use rayon::prelude::*;
use std::io::IsTerminal;
use std::time::Instant;

/// Rows are `(true label, predicted label, hit score)` in subject order.
#[derive(Debug, Clone, PartialEq)]
pub struct LooScores {
    pub rows: Array2<f64>,
}

/// Summary of a leave-one-out run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidationReport {
    pub accuracy: f64,
    /// Accuracy among subjects with a positive hit score, if there are any.
    pub confident_accuracy: Option<f64>,
    /// Fraction of subjects with a positive hit score.
    pub confident_coverage: f64,
}

impl LooScores {
    pub fn len(&self) -> usize {
        self.rows.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.nrows() == 0
    }

    pub fn report(&self) -> ValidationReport {
        let n = self.len();
        if n == 0 {
            return ValidationReport {
                accuracy: 0.0,
                confident_accuracy: None,
                confident_coverage: 0.0,
            };
        }
        let mut correct = 0usize;
        let mut confident = 0usize;
        let mut confident_correct = 0usize;
        for row in self.rows.axis_iter(Axis(0)) {
            let hit = row[0] == row[1];
            correct += usize::from(hit);
            if row[2] > 0.0 {
                confident += 1;
                confident_correct += usize::from(hit);
            }
        }
        ValidationReport {
            accuracy: correct as f64 / n as f64,
            confident_accuracy: (confident > 0)
                .then(|| confident_correct as f64 / confident as f64),
            confident_coverage: confident as f64 / n as f64,
        }
    }
}

fn create_progress_bar(len: u64, message: &str) -> ProgressBar {
    let draw_target = if std::io::stderr().is_terminal() {
        ProgressDrawTarget::stderr_with_hz(20)
    } else {
        ProgressDrawTarget::hidden()
    };

    let pb = ProgressBar::with_draw_target(Some(len), draw_target);
    if let Ok(style) = ProgressStyle::with_template(
        "\n> [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
    ) {
        pb.set_style(style.progress_chars("█▉▊▋▌▍▎▏  "));
    }
    pb.set_message(message.to_string());

    pb
}

fn check_inputs(subjects: &Subjects, labels: &[usize]) -> Result<(), EstimationError> {
    if labels.len() != subjects.len() {
        return Err(EstimationError::DimensionMismatch {
            context: "validation labels",
            expected: subjects.len(),
            found: labels.len(),
        });
    }
    if subjects.len() < 3 {
        return Err(EstimationError::TooFewSamples {
            context: "Leave-one-out validation",
            found: subjects.len(),
            required: 3,
        });
    }
    Ok(())
}

/// Fits on `train` and returns `(true label, predicted label, hit score)` for `held_out`.
fn score_held_out(
    subjects: &Subjects,
    labels: &[usize],
    config: &SbpConfig,
    train: &[usize],
    held_out: usize,
) -> Result<[f64; 3], EstimationError> {
    let connectomes = subjects.connectomes.select(Axis(0), train);
    let confounds = subjects.confounds.select(Axis(0), train);
    let extra = subjects.extra.map(|e| e.select(Axis(0), train));
    let train_subjects = Subjects {
        connectomes: connectomes.view(),
        confounds: confounds.view(),
        extra: extra.as_ref().map(|e| e.view()),
    };
    let train_labels: Vec<usize> = train.iter().map(|&i| labels[i]).collect();
    let pipeline = SubtypePipeline::fit(&train_subjects, &train_labels, config)?;

    let one = [held_out];
    let test_connectomes = subjects.connectomes.select(Axis(0), &one);
    let test_confounds = subjects.confounds.select(Axis(0), &one);
    let test_extra = subjects.extra.map(|e| e.select(Axis(0), &one));
    let test_subjects = Subjects {
        connectomes: test_connectomes.view(),
        confounds: test_confounds.view(),
        extra: test_extra.as_ref().map(|e| e.view()),
    };
    let prediction = pipeline.predict(&test_subjects)?;
    Ok([
        labels[held_out] as f64,
        prediction.labels[0] as f64,
        prediction.hit_scores[0],
    ])
}

fn collect_rows(rows: Vec<[f64; 3]>) -> LooScores {
    let n = rows.len();
    LooScores {
        rows: Array2::from_shape_fn((n, 3), |(i, j)| rows[i][j]),
    }
}

/// Leave-one-out accuracy, one fold at a time.
pub fn estimate_accuracy(
    subjects: &Subjects,
    labels: &[usize],
    config: &SbpConfig,
) -> Result<LooScores, EstimationError> {
    check_inputs(subjects, labels)?;
    let start = Instant::now();
    let splits = leave_one_out(subjects.len());
    let pb = create_progress_bar(splits.len() as u64, "Leave-one-out validation");

    let mut rows = Vec::with_capacity(splits.len());
    for split in &splits {
        rows.push(score_held_out(
            subjects,
            labels,
            config,
            &split.train,
            split.test[0],
        )?);
        pb.inc(1);
    }
    pb.finish_with_message("Leave-one-out validation complete");

    let scores = collect_rows(rows);
    log::info!(
        "Leave-one-out accuracy {:.3} over {} subjects, time elapsed: {:.2}s",
        scores.report().accuracy,
        scores.len(),
        start.elapsed().as_secs_f64()
    );
    Ok(scores)
}

/// Leave-one-out accuracy with folds spread over a dedicated thread pool that
/// leaves two cores free.
pub fn estimate_accuracy_parallel(
    subjects: &Subjects,
    labels: &[usize],
    config: &SbpConfig,
) -> Result<LooScores, EstimationError> {
    check_inputs(subjects, labels)?;
    let start = Instant::now();
    let threads = num_cpus::get().saturating_sub(2).max(1);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .map_err(|e| EstimationError::ThreadPoolUnavailable(e.to_string()))?;
    log::info!("Running leave-one-out validation on {threads} thread(s)");

    let splits = leave_one_out(subjects.len());
    let pb = create_progress_bar(splits.len() as u64, "Leave-one-out validation");
    let rows = pool.install(|| {
        splits
            .par_iter()
            .map(|split| {
                let row = score_held_out(subjects, labels, config, &split.train, split.test[0]);
                pb.inc(1);
                row
            })
            .collect::<Result<Vec<_>, _>>()
    })?;
    pb.finish_with_message("Leave-one-out validation complete");

    let scores = collect_rows(rows);
    log::info!(
        "Leave-one-out accuracy {:.3} over {} subjects, time elapsed: {:.2}s",
        scores.report().accuracy,
        scores.len(),
        start.elapsed().as_secs_f64()
    );
    Ok(scores)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn report_counts_confident_subset() {
        let scores = LooScores {
            rows: array![
                [1.0, 1.0, 0.8],
                [0.0, 1.0, -0.3],
                [0.0, 0.0, 0.1],
                [1.0, 0.0, 0.2],
            ],
        };
        let report = scores.report();
        assert_abs_diff_eq!(report.accuracy, 0.5);
        assert_abs_diff_eq!(report.confident_coverage, 0.75);
        assert_abs_diff_eq!(report.confident_accuracy.unwrap(), 2.0 / 3.0, epsilon = 1e-12);
    }

    #[test]
    fn report_without_confident_subjects() {
        let scores = LooScores {
            rows: array![[1.0, 1.0, -0.8], [0.0, 1.0, -0.3]],
        };
        let report = scores.report();
        assert!(report.confident_accuracy.is_none());
        assert_abs_diff_eq!(report.confident_coverage, 0.0);
    }

    #[test]
    fn too_few_subjects_are_rejected() {
        let connectomes = ndarray::Array3::<f64>::zeros((2, 1, 2));
        let confounds = Array2::<f64>::zeros((2, 0));
        let subjects = Subjects {
            connectomes: connectomes.view(),
            confounds: confounds.view(),
            extra: None,
        };
        let err = estimate_accuracy(&subjects, &[0, 1], &SbpConfig::default()).unwrap_err();
        assert!(matches!(err, EstimationError::TooFewSamples { .. }));
    }
}
