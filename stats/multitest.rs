//! Benjamini-Hochberg false discovery rate control.

use ndarray::{Array1, ArrayView1};

#[derive(Debug, Clone)]
pub struct FdrResult {
    pub reject: Vec<bool>,
    pub p_adjusted: Array1<f64>,
}

/// Step-up Benjamini-Hochberg procedure. A hypothesis is rejected when its
/// adjusted p-value is at most `alpha`. NaN p-values are never rejected.
pub fn benjamini_hochberg(p_values: ArrayView1<f64>, alpha: f64) -> FdrResult {
    let m = p_values.len();
    let mut order: Vec<usize> = (0..m).collect();
    order.sort_by(|&a, &b| p_values[a].total_cmp(&p_values[b]));

    let mut p_adjusted = Array1::from_elem(m, f64::NAN);
    let mut running_min = 1.0_f64;
    for rank in (0..m).rev() {
        let idx = order[rank];
        let p = p_values[idx];
        if p.is_nan() {
            continue;
        }
        let scaled = p * m as f64 / (rank + 1) as f64;
        running_min = running_min.min(scaled);
        p_adjusted[idx] = running_min.min(1.0);
    }

    let reject = p_adjusted.iter().map(|&q| q <= alpha).collect();
    FdrResult { reject, p_adjusted }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn adjusted_values_match_reference() {
        // Reference values from the standard step-up procedure.
        let p = array![0.01, 0.04, 0.03, 0.005];
        let result = benjamini_hochberg(p.view(), 0.05);
        assert_abs_diff_eq!(result.p_adjusted[3], 0.02, epsilon = 1e-12);
        assert_abs_diff_eq!(result.p_adjusted[0], 0.02, epsilon = 1e-12);
        assert_abs_diff_eq!(result.p_adjusted[2], 0.04, epsilon = 1e-12);
        assert_abs_diff_eq!(result.p_adjusted[1], 0.04, epsilon = 1e-12);
        assert_eq!(result.reject, vec![true, true, true, true]);
    }

    #[test]
    fn step_up_rejects_everything_below_largest_passing_rank() {
        // 0.03 alone would fail at rank 2 (0.03 > 0.025) but passes via rank 3.
        let p = array![0.001, 0.03, 0.0374, 0.9];
        let result = benjamini_hochberg(p.view(), 0.05);
        assert_eq!(result.reject, vec![true, true, true, false]);
        assert!(result.p_adjusted.iter().all(|&q| q <= 1.0));
    }

    #[test]
    fn nothing_rejected_for_uniform_p_values() {
        let p = array![0.2, 0.5, 0.8];
        let result = benjamini_hochberg(p.view(), 0.01);
        assert!(result.reject.iter().all(|&r| !r));
        assert_abs_diff_eq!(result.p_adjusted[2], 0.8, epsilon = 1e-12);
    }
}
