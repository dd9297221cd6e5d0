//! Linear support vector classification.
//!
//! Hinge-loss, L2-regularized primal
//! `0.5 ||w||^2 + sum_i C_i max(0, 1 - t_i (w . x_i + b))` with an unpenalized
//! bias `b`. The dual carries the equality constraint `sum_i alpha_i t_i = 0`,
//! so it is solved by sequential minimal optimization: every step moves the
//! maximal violating pair of multipliers (second-order working set selection)
//! and keeps `w` and the dual gradient up to date. The bias is recovered from
//! the free support vectors once the pair gap drops below the tolerance.

use crate::stats::estimate::EstimationError;
use ndarray::{Array1, ArrayView1, ArrayView2};

const TOLERANCE: f64 = 1e-3;
const MIN_ITERATIONS: usize = 10_000_000;
/// Floor of the curvature along a pair direction (duplicate points give zero).
const MIN_CURVATURE: f64 = 1e-12;

#[derive(Debug, Clone)]
pub struct SvmSolution {
    pub coef: Array1<f64>,
    pub intercept: f64,
    pub iterations: usize,
    pub converged: bool,
}

/// Dual state shared by the selection, update and bias steps.
struct Dual<'a> {
    x: ArrayView2<'a, f64>,
    signs: ArrayView1<'a, f64>,
    upper: Vec<f64>,
    alpha: Vec<f64>,
    /// Gradient of the dual objective, `t_i (w . x_i) - 1`.
    gradient: Array1<f64>,
    w: Array1<f64>,
    sq_norms: Vec<f64>,
}

impl Dual<'_> {
    fn is_upper(&self, i: usize) -> bool {
        self.alpha[i] >= self.upper[i]
    }

    fn is_lower(&self, i: usize) -> bool {
        self.alpha[i] <= 0.0
    }

    /// Members of the set whose multiplier may move "up" along `t_i`.
    fn in_up_set(&self, i: usize) -> bool {
        if self.signs[i] > 0.0 { !self.is_upper(i) } else { !self.is_lower(i) }
    }

    fn in_low_set(&self, i: usize) -> bool {
        if self.signs[i] > 0.0 { !self.is_lower(i) } else { !self.is_upper(i) }
    }

    /// The maximal violating pair, or `None` once the gap is below `TOLERANCE`.
    fn select_pair(&self) -> Option<(usize, usize)> {
        let n = self.alpha.len();
        let mut gmax = f64::NEG_INFINITY;
        let mut first = None;
        for t in (0..n).filter(|&t| self.upper[t] > 0.0 && self.in_up_set(t)) {
            let value = -self.signs[t] * self.gradient[t];
            if value >= gmax {
                gmax = value;
                first = Some(t);
            }
        }
        let i = first?;

        let xi = self.x.row(i);
        let mut gmax2 = f64::NEG_INFINITY;
        let mut best_objective = f64::INFINITY;
        let mut second = None;
        for t in (0..n).filter(|&t| self.upper[t] > 0.0 && self.in_low_set(t)) {
            let value = self.signs[t] * self.gradient[t];
            gmax2 = gmax2.max(value);
            let grad_diff = gmax + value;
            if grad_diff > 0.0 {
                let curvature = (self.sq_norms[i] + self.sq_norms[t]
                    - 2.0 * xi.dot(&self.x.row(t)))
                .max(MIN_CURVATURE);
                let objective = -(grad_diff * grad_diff) / curvature;
                if objective <= best_objective {
                    best_objective = objective;
                    second = Some(t);
                }
            }
        }

        if gmax + gmax2 < TOLERANCE {
            return None;
        }
        second.map(|j| (i, j))
    }

    /// Optimizes the pair analytically, clipping to the box.
    fn update_pair(&mut self, i: usize, j: usize) {
        let (ti, tj) = (self.signs[i], self.signs[j]);
        let (ci, cj) = (self.upper[i], self.upper[j]);
        let (old_i, old_j) = (self.alpha[i], self.alpha[j]);
        let curvature = (self.sq_norms[i] + self.sq_norms[j]
            - 2.0 * self.x.row(i).dot(&self.x.row(j)))
        .max(MIN_CURVATURE);
        let (gi, gj) = (self.gradient[i], self.gradient[j]);
        let mut ai;
        let mut aj;

        if ti != tj {
            let delta = (-gi - gj) / curvature;
            let diff = old_i - old_j;
            ai = old_i + delta;
            aj = old_j + delta;
            if diff > 0.0 {
                if aj < 0.0 {
                    aj = 0.0;
                    ai = diff;
                }
            } else if ai < 0.0 {
                ai = 0.0;
                aj = -diff;
            }
            if diff > ci - cj {
                if ai > ci {
                    ai = ci;
                    aj = ci - diff;
                }
            } else if aj > cj {
                aj = cj;
                ai = cj + diff;
            }
        } else {
            let delta = (gi - gj) / curvature;
            let sum = old_i + old_j;
            ai = old_i - delta;
            aj = old_j + delta;
            if sum > ci {
                if ai > ci {
                    ai = ci;
                    aj = sum - ci;
                }
            } else if aj < 0.0 {
                aj = 0.0;
                ai = sum;
            }
            if sum > cj {
                if aj > cj {
                    aj = cj;
                    ai = sum - cj;
                }
            } else if ai < 0.0 {
                ai = 0.0;
                aj = sum;
            }
        }

        self.alpha[i] = ai;
        self.alpha[j] = aj;
        let mut dw = Array1::<f64>::zeros(self.w.len());
        dw.scaled_add((ai - old_i) * ti, &self.x.row(i));
        dw.scaled_add((aj - old_j) * tj, &self.x.row(j));
        self.w += &dw;
        let shift = self.x.dot(&dw);
        self.gradient
            .iter_mut()
            .zip(shift.iter().zip(self.signs.iter()))
            .for_each(|(g, (&s, &t))| *g += t * s);
    }

    /// Offset `rho` of the decision function `w . x - rho`.
    fn rho(&self) -> f64 {
        let mut upper_bound = f64::INFINITY;
        let mut lower_bound = f64::NEG_INFINITY;
        let mut free_sum = 0.0;
        let mut free_count = 0usize;
        for i in (0..self.alpha.len()).filter(|&i| self.upper[i] > 0.0) {
            let value = self.signs[i] * self.gradient[i];
            if self.is_upper(i) {
                if self.signs[i] < 0.0 {
                    upper_bound = upper_bound.min(value);
                } else {
                    lower_bound = lower_bound.max(value);
                }
            } else if self.is_lower(i) {
                if self.signs[i] > 0.0 {
                    upper_bound = upper_bound.min(value);
                } else {
                    lower_bound = lower_bound.max(value);
                }
            } else {
                free_sum += value;
                free_count += 1;
            }
        }
        if free_count > 0 {
            free_sum / free_count as f64
        } else if upper_bound.is_finite() && lower_bound.is_finite() {
            0.5 * (upper_bound + lower_bound)
        } else {
            0.0
        }
    }
}

/// Fits the linear SVM. `signs` holds `-1.0` / `+1.0` targets and `weights`
/// scales the box constraint of each sample (`C * weight`).
pub fn fit_linear_svm(
    x: ArrayView2<f64>,
    signs: ArrayView1<f64>,
    weights: ArrayView1<f64>,
    c: f64,
) -> Result<SvmSolution, EstimationError> {
    let (n, p) = x.dim();
    if signs.len() != n || weights.len() != n {
        return Err(EstimationError::DimensionMismatch {
            context: "linear SVM samples",
            expected: n,
            found: if signs.len() != n { signs.len() } else { weights.len() },
        });
    }
    if !(c > 0.0 && c.is_finite()) {
        return Err(EstimationError::InvalidParameter(format!(
            "SVM penalty C must be positive, got {c}"
        )));
    }

    let mut dual = Dual {
        x: x.view(),
        signs: signs.view(),
        upper: weights.iter().map(|&w| (c * w).max(0.0)).collect(),
        alpha: vec![0.0; n],
        gradient: Array1::from_elem(n, -1.0),
        w: Array1::zeros(p),
        sq_norms: x.rows().into_iter().map(|row| row.dot(&row)).collect(),
    };

    let max_iterations = MIN_ITERATIONS.max(100 * n);
    let mut iterations = 0;
    let mut converged = false;
    while iterations < max_iterations {
        match dual.select_pair() {
            Some((i, j)) => {
                dual.update_pair(i, j);
                iterations += 1;
            }
            None => {
                converged = true;
                break;
            }
        }
    }

    if !converged {
        log::warn!("Linear SVM reached {max_iterations} iterations without meeting the dual tolerance");
    }

    let rho = dual.rho();
    Ok(SvmSolution {
        coef: dual.w,
        intercept: -rho,
        iterations,
        converged,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array1, array};

    #[test]
    fn separates_linearly_separable_points() {
        let x = array![[-2.0, 0.1], [-1.5, -0.2], [-1.0, 0.3], [1.0, 0.2], [1.5, -0.1], [2.0, 0.0]];
        let signs = array![-1.0, -1.0, -1.0, 1.0, 1.0, 1.0];
        let weights = Array1::ones(6);
        let fit = fit_linear_svm(x.view(), signs.view(), weights.view(), 1.0).unwrap();
        assert!(fit.converged);
        let decision = x.dot(&fit.coef) + fit.intercept;
        for (d, t) in decision.iter().zip(signs.iter()) {
            assert!(d * t > 0.0);
        }
    }

    #[test]
    fn zero_weight_samples_are_ignored() {
        // The mislabeled point has no weight, so it cannot move the boundary.
        let x = array![[-2.0], [-1.0], [1.0], [2.0], [1.8]];
        let signs = array![-1.0, -1.0, 1.0, 1.0, -1.0];
        let weights = array![1.0, 1.0, 1.0, 1.0, 0.0];
        let fit = fit_linear_svm(x.view(), signs.view(), weights.view(), 1.0).unwrap();
        assert!(fit.coef[0] > 0.0);
        assert!(1.8 * fit.coef[0] + fit.intercept > 0.0);
    }

    #[test]
    fn bias_is_not_shrunk_far_from_origin() {
        // Symmetric around 10.5; the soft-margin optimum is w = 2/3, b = -7.
        let x = array![[9.0], [10.0], [11.0], [12.0]];
        let signs = array![-1.0, -1.0, 1.0, 1.0];
        let weights = Array1::ones(4);
        let fit = fit_linear_svm(x.view(), signs.view(), weights.view(), 0.5).unwrap();
        assert!(fit.converged);
        assert_abs_diff_eq!(fit.coef[0], 2.0 / 3.0, epsilon = 1e-2);
        assert_abs_diff_eq!(-fit.intercept / fit.coef[0], 10.5, epsilon = 5e-2);
        assert!(10.4 * fit.coef[0] + fit.intercept < 0.0);
        assert!(10.6 * fit.coef[0] + fit.intercept > 0.0);
    }

    #[test]
    fn unbalanced_offset_classes_keep_the_margin_between_them() {
        let x = array![[100.0], [100.5], [101.0], [101.5], [102.0], [104.0]];
        let signs = array![-1.0, -1.0, -1.0, -1.0, -1.0, 1.0];
        let weights = Array1::ones(6);
        let fit = fit_linear_svm(x.view(), signs.view(), weights.view(), 10.0).unwrap();
        assert!(fit.converged);
        let decision = x.dot(&fit.coef) + fit.intercept;
        for (d, t) in decision.iter().zip(signs.iter()) {
            assert!(d * t > 0.0);
        }
        // Hard margin between 102 and 104.
        assert_abs_diff_eq!(-fit.intercept / fit.coef[0], 103.0, epsilon = 5e-2);
    }
}
