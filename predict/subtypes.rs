// predict/subtypes.rs

//! # Connectivity Subtypes
//!
//! For every network, subjects are grouped into subtypes: subjects whose
//! (standardized) connectivity maps are similar end up in the same cluster, and
//! each cluster is summarized by its average map, the subtype template.
//!
//! A subject is then described by how strongly its map resembles each template:
//! the Pearson correlation between the two. These "subtype weights" are the
//! features used by every later stage. Their layout is network-major:
//! column `network * n_subtypes + subtype`.

use crate::stats::estimate::EstimationError;
use crate::stats::hclust::{average_linkage, correlation_distances, pearson};
use ndarray::{Array1, Array2, ArrayView2, ArrayView3, Axis};
use serde::{Deserialize, Serialize};

/// Subtypes learned for one network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSubtypes {
    /// Per-feature mean across training subjects.
    pub mean: Array1<f64>,
    /// Per-feature population standard deviation (zeros replaced by one).
    pub scale: Array1<f64>,
    /// Subtype templates in standardized units, shape `[n_subtypes, n_features]`.
    pub templates: Array2<f64>,
    /// Subtype index of every training subject.
    pub assignments: Vec<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtypeModel {
    pub n_subtypes: usize,
    pub n_features: usize,
    pub networks: Vec<NetworkSubtypes>,
}

impl NetworkSubtypes {
    fn standardize(&self, maps: ArrayView2<f64>) -> Array2<f64> {
        (&maps - &self.mean.view().insert_axis(Axis(0))) / &self.scale.view().insert_axis(Axis(0))
    }

    fn fit(maps: ArrayView2<f64>, n_subtypes: usize) -> Result<Self, EstimationError> {
        let n_features = maps.ncols();
        let mean = maps
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(n_features));
        let scale = maps
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s > f64::EPSILON { s } else { 1.0 });

        let mut network = NetworkSubtypes {
            mean,
            scale,
            templates: Array2::zeros((n_subtypes, n_features)),
            assignments: Vec::new(),
        };
        let standardized = network.standardize(maps);

        let tree = average_linkage(&correlation_distances(standardized.view()))?;
        let assignments = tree.cut_max_clusters(n_subtypes);

        let mut counts = vec![0usize; n_subtypes];
        for (row, &cluster) in standardized.rows().into_iter().zip(&assignments) {
            let mut template = network.templates.row_mut(cluster);
            template += &row;
            counts[cluster] += 1;
        }
        for (mut template, &count) in network.templates.rows_mut().into_iter().zip(&counts) {
            if count > 0 {
                template /= count as f64;
            }
        }
        network.assignments = assignments;
        Ok(network)
    }

    fn weights(&self, maps: ArrayView2<f64>) -> Array2<f64> {
        let standardized = self.standardize(maps);
        let n_subtypes = self.templates.nrows();
        let mut weights = Array2::zeros((maps.nrows(), n_subtypes));
        for (i, row) in standardized.rows().into_iter().enumerate() {
            for (k, template) in self.templates.rows().into_iter().enumerate() {
                weights[[i, k]] = pearson(row, template);
            }
        }
        weights
    }
}

impl SubtypeModel {
    /// Learns `n_subtypes` subtypes for each network of
    /// `connectomes` (`[subjects, networks, features]`).
    pub fn fit(connectomes: ArrayView3<f64>, n_subtypes: usize) -> Result<Self, EstimationError> {
        let (n_subjects, n_networks, n_features) = connectomes.dim();
        if n_subtypes == 0 {
            return Err(EstimationError::InvalidParameter(
                "the number of subtypes must be at least 1".to_string(),
            ));
        }
        if n_subjects < n_subtypes {
            return Err(EstimationError::TooFewSubjectsForSubtypes {
                subjects: n_subjects,
                subtypes: n_subtypes,
            });
        }

        let networks = (0..n_networks)
            .map(|network| {
                NetworkSubtypes::fit(connectomes.index_axis(Axis(1), network), n_subtypes)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            n_subtypes,
            n_features,
            networks,
        })
    }

    /// Subtype weights with shape `[subjects, networks * n_subtypes]`.
    pub fn transform(&self, connectomes: ArrayView3<f64>) -> Result<Array2<f64>, EstimationError> {
        let (n_subjects, n_networks, n_features) = connectomes.dim();
        if n_networks != self.networks.len() {
            return Err(EstimationError::DimensionMismatch {
                context: "subtype networks",
                expected: self.networks.len(),
                found: n_networks,
            });
        }
        if n_features != self.n_features {
            return Err(EstimationError::DimensionMismatch {
                context: "subtype features",
                expected: self.n_features,
                found: n_features,
            });
        }

        let mut weights = Array2::zeros((n_subjects, n_networks * self.n_subtypes));
        for (network, subtypes) in self.networks.iter().enumerate() {
            let block = subtypes.weights(connectomes.index_axis(Axis(1), network));
            let start = network * self.n_subtypes;
            weights
                .slice_mut(ndarray::s![.., start..start + self.n_subtypes])
                .assign(&block);
        }
        Ok(weights)
    }

    pub fn n_weights(&self) -> usize {
        self.networks.len() * self.n_subtypes
    }
}
