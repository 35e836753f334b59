/*!
Resampling strategies for particle methods.

All strategies share the contract `resample(weights) -> indices` where the
output has exactly `weights.len()` entries, each in `0..weights.len()`, and the
expected number of copies of particle `i` is `n * w_i`. They differ in the
variance of the copy counts:

| strategy      | random draws | variance                 |
|---------------|--------------|--------------------------|
| Multinomial   | n            | highest (reference)      |
| Residual      | ≤ n          | lower than multinomial   |
| Stratified    | n            | low                      |
| Systematic    | 1            | lowest in practice       |

Weights do not need to be normalized; they are rescaled internally.

```rust
use mini_montecarlo::resampling::ResamplingStrategy;
use rand::rngs::SmallRng;
use rand::SeedableRng;

let mut rng = SmallRng::seed_from_u64(0);
let idx = ResamplingStrategy::Systematic
    .resample(&[0.1, 0.2, 0.3, 0.4], &mut rng)
    .unwrap();
assert_eq!(idx.len(), 4);
assert!(idx.windows(2).all(|w| w[0] <= w[1]));
```
*/

use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};

use crate::distributions::{cumulative_sum, search_cumulative};
use crate::error::{McError, Result};
use crate::weights::validate_weights;

/// The four interchangeable resampling schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResamplingStrategy {
    /// I.i.d. draws from the categorical distribution defined by the weights.
    Multinomial,
    /// One uniform offset shared by all `n` evenly spaced thresholds.
    #[default]
    Systematic,
    /// An independent uniform offset within each of the `n` strata.
    Stratified,
    /// Deterministic `⌊n w_i⌋` copies plus multinomial draws on the residuals.
    Residual,
}

impl ResamplingStrategy {
    /// Returns `weights.len()` ancestor indices drawn according to `weights`.
    ///
    /// # Errors
    ///
    /// * [`McError::EmptyParticleSet`] for an empty weight vector.
    /// * [`McError::InvalidWeight`] for NaN or negative weights.
    /// * [`McError::InvalidConfig`] if the weights carry no finite mass.
    pub fn resample(&self, weights: &[f64], rng: &mut dyn RngCore) -> Result<Vec<usize>> {
        validate_weights(weights)?;
        let total: f64 = weights.iter().sum();
        if !(total.is_finite() && total > 0.0) {
            return Err(McError::InvalidConfig(format!(
                "weights must have a positive finite sum to resample, got {total}"
            )));
        }
        let normalized: Vec<f64> = weights.iter().map(|w| w / total).collect();

        let indices = match self {
            ResamplingStrategy::Multinomial => multinomial(&normalized, normalized.len(), rng),
            ResamplingStrategy::Systematic => systematic(&normalized, rng),
            ResamplingStrategy::Stratified => stratified(&normalized, rng),
            ResamplingStrategy::Residual => residual(&normalized, rng),
        };
        debug_assert_eq!(indices.len(), weights.len());
        Ok(indices)
    }
}

/// `count` i.i.d. categorical draws.
fn multinomial(weights: &[f64], count: usize, rng: &mut dyn RngCore) -> Vec<usize> {
    let cumulative = cumulative_sum(weights);
    (0..count)
        .map(|_| search_cumulative(&cumulative, rng.gen::<f64>()))
        .collect()
}

/// Walks the cumulative weights once, selecting the particle whose interval
/// contains each threshold produced by `threshold(k)` for `k = 0..n`.
fn select_sorted(weights: &[f64], mut threshold: impl FnMut(usize) -> f64) -> Vec<usize> {
    let n = weights.len();
    let mut out = Vec::with_capacity(n);
    let mut cumulative = weights[0];
    let mut i = 0;
    for k in 0..n {
        let u = threshold(k);
        while u >= cumulative && i < n - 1 {
            i += 1;
            cumulative += weights[i];
        }
        out.push(i);
    }
    out
}

fn systematic(weights: &[f64], rng: &mut dyn RngCore) -> Vec<usize> {
    let step = 1.0 / weights.len() as f64;
    let offset = rng.gen::<f64>() * step;
    select_sorted(weights, |k| offset + k as f64 * step)
}

fn stratified(weights: &[f64], rng: &mut dyn RngCore) -> Vec<usize> {
    let step = 1.0 / weights.len() as f64;
    select_sorted(weights, |k| (k as f64 + rng.gen::<f64>()) * step)
}

fn residual(weights: &[f64], rng: &mut dyn RngCore) -> Vec<usize> {
    let n = weights.len();
    let copies = deterministic_copies(weights);
    let mut out = Vec::with_capacity(n);
    let mut residuals = Vec::with_capacity(n);
    for (i, (w, c)) in weights.iter().zip(&copies).enumerate() {
        out.extend(std::iter::repeat(i).take(*c));
        residuals.push((n as f64 * w - *c as f64).max(0.0));
    }

    let leftover = n - out.len();
    if leftover > 0 {
        let mass: f64 = residuals.iter().sum();
        if mass > 0.0 {
            residuals.iter_mut().for_each(|r| *r /= mass);
            out.extend(multinomial(&residuals, leftover, rng));
        } else {
            out.extend(multinomial(weights, leftover, rng));
        }
    }
    out
}

/// `⌊n w_i⌋` for normalized weights, capped so the total never exceeds `n`.
fn deterministic_copies(weights: &[f64]) -> Vec<usize> {
    let n = weights.len();
    let mut remaining = n;
    weights
        .iter()
        .map(|w| {
            let c = ((n as f64 * w).floor() as usize).min(remaining);
            remaining -= c;
            c
        })
        .collect()
}

/// Number of deterministic copies residual resampling assigns to each particle.
pub fn residual_copies(weights: &[f64]) -> Result<Vec<usize>> {
    validate_weights(weights)?;
    let total: f64 = weights.iter().sum();
    if !(total.is_finite() && total > 0.0) {
        return Err(McError::InvalidConfig(format!(
            "weights must have a positive finite sum, got {total}"
        )));
    }
    let normalized: Vec<f64> = weights.iter().map(|w| w / total).collect();
    Ok(deterministic_copies(&normalized))
}
