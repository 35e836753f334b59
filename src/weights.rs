//! Log-domain weight arithmetic.
//!
//! Particle and importance weights are accumulated as log-weights and only
//! exponentiated when they are normalized. Normalization subtracts the maximum
//! log-weight first (the log-sum-exp trick), so long runs of small likelihoods
//! never underflow to zero.

use serde::{Deserialize, Serialize};

use crate::error::{McError, Result};

/// Outcome of a normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WeightStatus {
    /// The weights were normalized to sum to one.
    Normalized,
    /// Every weight was zero (or non-finite); uniform weights were substituted.
    Degenerate,
}

impl WeightStatus {
    /// Returns `true` for [`WeightStatus::Degenerate`].
    pub fn is_degenerate(&self) -> bool {
        matches!(self, WeightStatus::Degenerate)
    }
}

/// Computes `ln(Σ exp(x_i))` without overflow or underflow.
///
/// Returns `-∞` for an empty slice or when every entry is `-∞`.
pub fn log_sum_exp(log_values: &[f64]) -> f64 {
    let max = log_values
        .iter()
        .copied()
        .filter(|x| !x.is_nan())
        .fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }
    if max == f64::INFINITY {
        return f64::INFINITY;
    }
    let sum: f64 = log_values
        .iter()
        .filter(|x| !x.is_nan())
        .map(|&x| (x - max).exp())
        .sum();
    max + sum.ln()
}

/// Turns log-weights into normalized weights.
///
/// Entries that are NaN or `-∞` get weight zero. If no entry carries any mass
/// the result is uniform and the status is [`WeightStatus::Degenerate`].
///
/// # Examples
///
/// ```rust
/// use mini_montecarlo::weights::{normalize_log_weights, WeightStatus};
///
/// let (w, status) = normalize_log_weights(&[-1000.0, -1000.0 + 2f64.ln()]);
/// assert_eq!(status, WeightStatus::Normalized);
/// assert!((w[0] - 1.0 / 3.0).abs() < 1e-12);
/// ```
pub fn normalize_log_weights(log_weights: &[f64]) -> (Vec<f64>, WeightStatus) {
    let n = log_weights.len();
    if n == 0 {
        return (Vec::new(), WeightStatus::Normalized);
    }
    let max = log_weights
        .iter()
        .copied()
        .filter(|x| x.is_finite())
        .fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return (vec![1.0 / n as f64; n], WeightStatus::Degenerate);
    }

    let mut weights: Vec<f64> = log_weights
        .iter()
        .map(|&lw| {
            if lw.is_finite() {
                (lw - max).exp()
            } else {
                0.0
            }
        })
        .collect();
    let total: f64 = weights.iter().sum();
    weights.iter_mut().for_each(|w| *w /= total);
    (weights, WeightStatus::Normalized)
}

/// Effective sample size `1 / Σ w_i²` of a normalized weight vector.
pub fn effective_sample_size(weights: &[f64]) -> f64 {
    let sum_sq: f64 = weights.iter().map(|w| w * w).sum();
    if sum_sq > 0.0 {
        1.0 / sum_sq
    } else {
        0.0
    }
}

/// Rejects empty weight vectors and weights that are NaN or negative.
pub fn validate_weights(weights: &[f64]) -> Result<()> {
    if weights.is_empty() {
        return Err(McError::EmptyParticleSet);
    }
    match weights
        .iter()
        .enumerate()
        .find(|(_, w)| w.is_nan() || **w < 0.0)
    {
        Some((index, &value)) => Err(McError::InvalidWeight { index, value }),
        None => Ok(()),
    }
}

/// Converts a likelihood into a log-weight increment.
///
/// Zero, negative and non-finite likelihoods map to `-∞`, which prunes the
/// particle instead of poisoning the set with NaN.
pub fn log_increment(likelihood: f64) -> f64 {
    if likelihood.is_finite() && likelihood > 0.0 {
        likelihood.ln()
    } else {
        f64::NEG_INFINITY
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use proptest::prelude::*;

    #[test]
    fn log_sum_exp_matches_naive_sum() {
        let xs = [0.1_f64, -2.0, 3.5];
        let naive = xs.iter().map(|x| x.exp()).sum::<f64>().ln();
        assert_abs_diff_eq!(log_sum_exp(&xs), naive, epsilon = 1e-12);
    }

    #[test]
    fn log_sum_exp_of_empty_and_all_neg_inf() {
        assert_eq!(log_sum_exp(&[]), f64::NEG_INFINITY);
        assert_eq!(
            log_sum_exp(&[f64::NEG_INFINITY, f64::NEG_INFINITY]),
            f64::NEG_INFINITY
        );
    }

    #[test]
    fn normalize_survives_extreme_log_weights() {
        let (w, status) = normalize_log_weights(&[-5000.0, -5001.0, f64::NEG_INFINITY]);
        assert_eq!(status, WeightStatus::Normalized);
        assert_abs_diff_eq!(w.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
        assert_eq!(w[2], 0.0);
        assert!(w[0] > w[1]);
    }

    #[test]
    fn normalize_falls_back_to_uniform() {
        let (w, status) = normalize_log_weights(&[f64::NEG_INFINITY; 4]);
        assert!(status.is_degenerate());
        assert_eq!(w, vec![0.25; 4]);
    }

    #[test]
    fn ess_of_uniform_and_point_mass() {
        assert_abs_diff_eq!(effective_sample_size(&[0.25; 4]), 4.0, epsilon = 1e-12);
        assert_abs_diff_eq!(
            effective_sample_size(&[1.0, 0.0, 0.0]),
            1.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn validate_reports_first_bad_weight() {
        assert_eq!(validate_weights(&[]), Err(McError::EmptyParticleSet));
        assert_eq!(
            validate_weights(&[0.5, -0.1, f64::NAN]),
            Err(McError::InvalidWeight {
                index: 1,
                value: -0.1
            })
        );
        assert!(validate_weights(&[0.0, 1.0]).is_ok());
    }

    #[test]
    fn zero_likelihood_prunes() {
        assert_eq!(log_increment(0.0), f64::NEG_INFINITY);
        assert_eq!(log_increment(f64::NAN), f64::NEG_INFINITY);
        assert_eq!(log_increment(f64::INFINITY), f64::NEG_INFINITY);
        assert_abs_diff_eq!(log_increment(1.0), 0.0);
    }

    proptest! {
        #[test]
        fn normalized_weights_sum_to_one(
            weights in prop::collection::vec(0.0f64..1e6, 1..64),
            boost in 0usize..64,
        ) {
            let mut weights = weights;
            let k = boost % weights.len();
            weights[k] += 1.0;
            let log_w: Vec<f64> = weights.iter().map(|w| w.ln()).collect();
            let (w, status) = normalize_log_weights(&log_w);
            prop_assert_eq!(status, WeightStatus::Normalized);
            prop_assert!((w.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        }
    }
}
