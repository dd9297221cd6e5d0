use crate::data::{Cohort, PhenotypeColumns};
use crate::pipeline::{Subjects, SubtypePipeline};
use crate::stats::estimate::EstimationError;
use crate::two_level::TwoLevelPrediction;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use thiserror::Error;

/// A fitted pipeline together with the input layout it was trained on.
///
/// This is the on-disk format written by `sbp train`. The column names make
/// prediction on a new phenotype table pick the same confounds and covariates
/// in the same order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainedPipeline {
    pub networks: usize,
    pub features_per_network: usize,
    pub confound_names: Vec<String>,
    pub extra_names: Vec<String>,
    pub training_subjects: usize,
    pub pipeline: SubtypePipeline,
}

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Failed to read or write model file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML model file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize model to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error(
        "Prediction data has {found_networks} networks x {found_features} features, but the model was trained on {networks} x {features}."
    )]
    MismatchedConnectomeShape {
        found_networks: usize,
        found_features: usize,
        networks: usize,
        features: usize,
    },
    #[error("Pipeline computation failed during prediction: {0}")]
    EstimationError(#[from] EstimationError),
}

impl TrainedPipeline {
    pub fn new(pipeline: SubtypePipeline, cohort: &Cohort) -> Self {
        let (_, networks, features_per_network) = cohort.connectomes.dim();
        Self {
            networks,
            features_per_network,
            confound_names: cohort.confound_names.clone(),
            extra_names: cohort.extra_names.clone(),
            training_subjects: cohort.len(),
            pipeline,
        }
    }

    /// Phenotype columns a prediction cohort must provide.
    pub fn phenotype_columns(&self) -> PhenotypeColumns {
        PhenotypeColumns {
            confounds: Some(self.confound_names.clone()),
            extra: self.extra_names.clone(),
        }
    }

    pub fn predict(&self, subjects: &Subjects) -> Result<TwoLevelPrediction, ModelError> {
        let (_, found_networks, found_features) = subjects.connectomes.dim();
        if found_networks != self.networks || found_features != self.features_per_network {
            return Err(ModelError::MismatchedConnectomeShape {
                found_networks,
                found_features,
                networks: self.networks,
                features: self.features_per_network,
            });
        }
        Ok(self.pipeline.predict(subjects)?)
    }

    /// Saves the trained pipeline to a human-readable TOML file.
    pub fn save(&self, path: &str) -> Result<(), ModelError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Loads a trained pipeline from a TOML file.
    pub fn load(path: &str) -> Result<Self, ModelError> {
        let toml_string = fs::read_to_string(path)?;
        let model = toml::from_str(&toml_string)?;
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hitmiss::HitMissStrategy;
    use crate::pipeline::SbpConfig;
    use crate::stats::classifier::ClassifierKind;
    use ndarray::{Array2, Array3};
    use tempfile::NamedTempFile;

    fn small_cohort() -> Cohort {
        let n = 16;
        let labels: Vec<usize> = (0..n).map(|i| i % 2).collect();
        let connectomes = Array3::from_shape_fn((n, 2, 6), |(i, net, feat)| {
            let signal = if labels[i] == 1 { 1.0 } else { -1.0 };
            let pattern = if feat < 3 { signal } else { -signal };
            pattern * (net + 1) as f64 + 0.05 * ((i * 7 + feat * 3 + net) % 11) as f64
        });
        let confounds = Array2::from_shape_fn((n, 1), |(i, _)| (i % 5) as f64);
        Cohort {
            sample_ids: (0..n).map(|i| format!("s{i}")).collect(),
            connectomes,
            labels: Some(labels),
            confounds,
            confound_names: vec!["age".to_string()],
            extra: None,
            extra_names: Vec::new(),
        }
    }

    fn small_config() -> SbpConfig {
        SbpConfig {
            n_subtypes: 2,
            feature_selection: false,
            grid_folds: 3,
            hit_miss: HitMissStrategy::LeaveOneOut,
            ..SbpConfig::default()
        }
    }

    #[test]
    fn test_save_load_functionality() {
        let cohort = small_cohort();
        let labels = cohort.require_labels().unwrap().to_vec();
        let pipeline = SubtypePipeline::fit(&cohort.subjects(), &labels, &small_config()).unwrap();
        let original = TrainedPipeline::new(pipeline, &cohort);

        let file = NamedTempFile::new().unwrap();
        let path = file.path().to_str().unwrap();
        original.save(path).unwrap();
        let loaded = TrainedPipeline::load(path).unwrap();

        assert_eq!(loaded.networks, 2);
        assert_eq!(loaded.features_per_network, 6);
        assert_eq!(loaded.confound_names, vec!["age"]);
        assert_eq!(loaded.pipeline.config, original.pipeline.config);

        let before = original.predict(&cohort.subjects()).unwrap();
        let after = loaded.predict(&cohort.subjects()).unwrap();
        assert_eq!(before.labels, after.labels);
        for (a, b) in before.hit_scores.iter().zip(after.hit_scores.iter()) {
            approx::assert_abs_diff_eq!(*a, *b, epsilon = 1e-9);
        }
    }

    #[test]
    fn svm_with_shuffle_strategy_round_trips() {
        let cohort = small_cohort();
        let labels = cohort.require_labels().unwrap().to_vec();
        let config = SbpConfig {
            classifier: ClassifierKind::LinearSvm,
            hit_miss: HitMissStrategy::Shuffle {
                n_iter: 10,
                test_fraction: 0.25,
                seed: u32::MAX,
            },
            ..small_config()
        };
        let pipeline = SubtypePipeline::fit(&cohort.subjects(), &labels, &config).unwrap();
        let original = TrainedPipeline::new(pipeline, &cohort);

        let file = NamedTempFile::new().unwrap();
        let path = file.path().to_str().unwrap();
        original.save(path).unwrap();
        let loaded = TrainedPipeline::load(path).unwrap();

        assert_eq!(loaded.pipeline.config, config);
        assert_eq!(loaded.pipeline.predictor.stage_one.spec.kind, ClassifierKind::LinearSvm);
        let before = original.predict(&cohort.subjects()).unwrap();
        let after = loaded.predict(&cohort.subjects()).unwrap();
        assert_eq!(before.labels, after.labels);
        for (a, b) in before.hit_scores.iter().zip(after.hit_scores.iter()) {
            approx::assert_abs_diff_eq!(*a, *b, epsilon = 1e-9);
        }
    }

    #[test]
    fn wrong_connectome_shape_is_rejected() {
        let cohort = small_cohort();
        let labels = cohort.require_labels().unwrap().to_vec();
        let pipeline = SubtypePipeline::fit(&cohort.subjects(), &labels, &small_config()).unwrap();
        let model = TrainedPipeline::new(pipeline, &cohort);

        let other = Array3::<f64>::zeros((4, 3, 4));
        let confounds = Array2::<f64>::zeros((4, 1));
        let subjects = Subjects {
            connectomes: other.view(),
            confounds: confounds.view(),
            extra: None,
        };
        assert!(matches!(
            model.predict(&subjects),
            Err(ModelError::MismatchedConnectomeShape { found_networks: 3, .. })
        ));
    }

    #[test]
    fn phenotype_columns_replay_training_layout() {
        let cohort = small_cohort();
        let labels = cohort.require_labels().unwrap().to_vec();
        let pipeline = SubtypePipeline::fit(&cohort.subjects(), &labels, &small_config()).unwrap();
        let model = TrainedPipeline::new(pipeline, &cohort);
        let columns = model.phenotype_columns();
        assert_eq!(columns.confounds, Some(vec!["age".to_string()]));
        assert!(columns.extra.is_empty());
    }
}
