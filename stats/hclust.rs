//! Agglomerative clustering of subjects.
//!
//! Subjects are compared through the correlation distance between their maps and
//! merged with average linkage (UPGMA). The dendrogram is cut into a fixed number
//! of flat clusters, which is how subtypes are defined downstream.

use crate::stats::estimate::EstimationError;
use ndarray::{Array2, ArrayView1, ArrayView2};

/// One agglomeration step. Ids below `n_leaves` are observations; merged
/// clusters receive the id `n_leaves + step`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Merge {
    pub left: usize,
    pub right: usize,
    pub height: f64,
    pub size: usize,
}

#[derive(Debug, Clone)]
pub struct Dendrogram {
    pub n_leaves: usize,
    pub merges: Vec<Merge>,
}

/// Pearson correlation of two equally sized vectors. Constant vectors correlate
/// with nothing, so the result is `0.0` in that case.
pub fn pearson(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    let n = a.len() as f64;
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mean_a = a.sum() / n;
    let mean_b = b.sum() / n;
    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let dx = x - mean_a;
        let dy = y - mean_b;
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }
    // A variance at the rounding level of the values means a constant vector.
    let is_flat = |var: f64, v: ArrayView1<f64>| {
        let max_abs = v.iter().fold(0.0_f64, |m, x| m.max(x.abs()));
        var <= n * (f64::EPSILON * max_abs).powi(2)
    };
    if is_flat(var_a, a) || is_flat(var_b, b) {
        0.0
    } else {
        (cov / (var_a.sqrt() * var_b.sqrt())).clamp(-1.0, 1.0)
    }
}

/// Pairwise `1 - r` distances between the rows of `x`.
pub fn correlation_distances(x: ArrayView2<f64>) -> Array2<f64> {
    let n = x.nrows();
    let mut dist = Array2::zeros((n, n));
    for i in 0..n {
        for j in (i + 1)..n {
            let d = 1.0 - pearson(x.row(i), x.row(j));
            dist[[i, j]] = d;
            dist[[j, i]] = d;
        }
    }
    dist
}

/// Average-linkage agglomeration over a precomputed distance matrix.
pub fn average_linkage(distances: &Array2<f64>) -> Result<Dendrogram, EstimationError> {
    let n = distances.nrows();
    if distances.ncols() != n {
        return Err(EstimationError::DimensionMismatch {
            context: "distance matrix columns",
            expected: n,
            found: distances.ncols(),
        });
    }

    let mut dist = distances.clone();
    // Slot i holds the cluster currently living at row i of `dist`.
    let mut cluster_id: Vec<usize> = (0..n).collect();
    let mut sizes = vec![1usize; n];
    let mut active: Vec<usize> = (0..n).collect();
    let mut merges = Vec::with_capacity(n.saturating_sub(1));

    while active.len() > 1 {
        let mut best = (0usize, 1usize);
        let mut best_distance = f64::INFINITY;
        for (a, &i) in active.iter().enumerate() {
            for &j in &active[a + 1..] {
                if dist[[i, j]] < best_distance {
                    best_distance = dist[[i, j]];
                    best = (i, j);
                }
            }
        }
        let (i, j) = best;

        let size = sizes[i] + sizes[j];
        merges.push(Merge {
            left: cluster_id[i].min(cluster_id[j]),
            right: cluster_id[i].max(cluster_id[j]),
            height: best_distance,
            size,
        });

        // Lance-Williams update for average linkage; slot i absorbs slot j.
        let wi = sizes[i] as f64 / size as f64;
        let wj = sizes[j] as f64 / size as f64;
        for &k in &active {
            if k == i || k == j {
                continue;
            }
            let d = wi * dist[[i, k]] + wj * dist[[j, k]];
            dist[[i, k]] = d;
            dist[[k, i]] = d;
        }
        sizes[i] = size;
        cluster_id[i] = n + merges.len() - 1;
        active.retain(|&k| k != j);
    }

    Ok(Dendrogram {
        n_leaves: n,
        merges,
    })
}

impl Dendrogram {
    /// Cuts the tree into at most `max_clusters` flat clusters by replaying all but
    /// the last `max_clusters - 1` merges. Labels are 0-based and numbered by the
    /// smallest observation index they contain.
    pub fn cut_max_clusters(&self, max_clusters: usize) -> Vec<usize> {
        let n = self.n_leaves;
        let target = max_clusters.clamp(1, n.max(1));
        let applied = n.saturating_sub(target);

        // Representative leaf for every cluster id, via union-find on leaves.
        let mut parent: Vec<usize> = (0..n).collect();
        let mut representative: Vec<usize> = (0..n).collect();
        fn find(parent: &mut [usize], mut x: usize) -> usize {
            while parent[x] != x {
                parent[x] = parent[parent[x]];
                x = parent[x];
            }
            x
        }

        for merge in self.merges.iter().take(applied) {
            let a = find(&mut parent, representative[merge.left]);
            let b = find(&mut parent, representative[merge.right]);
            let root = a.min(b);
            parent[a.max(b)] = root;
            representative.push(root);
        }

        let mut labels = vec![usize::MAX; n];
        let mut root_label: Vec<Option<usize>> = vec![None; n];
        let mut next = 0;
        for leaf in 0..n {
            let root = find(&mut parent, leaf);
            let label = match root_label[root] {
                Some(label) => label,
                None => {
                    root_label[root] = Some(next);
                    next += 1;
                    next - 1
                }
            };
            labels[leaf] = label;
        }
        labels
    }
}
