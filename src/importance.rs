/*!
Importance sampling.

[`ImportanceSampler`] draws from a proposal `q` and weighs every draw by
`p(x) / q(x)`, where `p` is an unnormalized target. The weights are kept
unnormalized; [`normalized_weights`], [`estimate`], [`log_evidence`] and
[`effective_sample_size`] turn a batch of [`WeightedSample`]s into estimates.

[`AdaptiveImportanceSampler`] uses a [`Mixture`] proposal. After each batch the
component weights are reset proportionally to the normalized importance mass
each component produced, floored so no component is ever switched off.

```rust
use mini_montecarlo::distributions::Gaussian;
use mini_montecarlo::importance::{estimate, ImportanceSampler};

// Unnormalized N(1, 1) target, N(0, 2²) proposal.
let target = |x: &f64| -0.5 * (x - 1.0) * (x - 1.0);
let proposal = Gaussian::new(0.0, 2.0).unwrap();
let mut sampler = ImportanceSampler::new().set_seed(3);
let samples = sampler.sample(&target, &proposal, 20_000);
let mean = estimate(&samples, |x| *x).unwrap();
assert!((mean - 1.0).abs() < 0.05);
```
*/

use rand::rngs::SmallRng;
use rand::{thread_rng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::distributions::{Distribution, Mixture, TargetDistribution, DEFAULT_WEIGHT_FLOOR};
use crate::error::{McError, Result};
use crate::weights::{self, log_sum_exp, normalize_log_weights, WeightStatus};

/// A draw and its importance weight.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightedSample<S> {
    value: S,
    weight: f64,
    log_weight: f64,
    component: Option<usize>,
}

impl<S> WeightedSample<S> {
    fn new(value: S, log_weight: f64, component: Option<usize>) -> Self {
        let log_weight = if log_weight.is_nan() {
            f64::NEG_INFINITY
        } else {
            log_weight
        };
        Self {
            value,
            weight: log_weight.exp(),
            log_weight,
            component,
        }
    }

    pub fn value(&self) -> &S {
        &self.value
    }

    /// Unnormalized importance weight `p(x) / q(x)`.
    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn log_weight(&self) -> f64 {
        self.log_weight
    }

    /// Mixture component that produced the draw, for adaptive sampling.
    pub fn component(&self) -> Option<usize> {
        self.component
    }

    pub fn into_value(self) -> S {
        self.value
    }
}

/// Plain importance sampler.
#[derive(Debug, Clone)]
pub struct ImportanceSampler {
    pub seed: u64,
    rng: SmallRng,
}

impl Default for ImportanceSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl ImportanceSampler {
    pub fn new() -> Self {
        let seed = thread_rng().gen::<u64>();
        Self {
            seed,
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    pub fn set_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self.rng = SmallRng::seed_from_u64(seed);
        self
    }

    /// Draws `n` samples from `proposal`, each weighted by
    /// `exp(log target(x) − log proposal(x))`.
    pub fn sample<S, T, Q>(&mut self, target: &T, proposal: &Q, n: usize) -> Vec<WeightedSample<S>>
    where
        T: TargetDistribution<S> + ?Sized,
        Q: Distribution<S> + ?Sized,
    {
        (0..n)
            .map(|_| {
                let x = proposal.sample(&mut self.rng);
                let log_w = target.unnorm_log_prob(&x) - proposal.log_pdf(&x);
                WeightedSample::new(x, log_w, None)
            })
            .collect()
    }
}

/// Self-normalized weights of `samples`, computed in log space.
pub fn normalized_weights<S>(samples: &[WeightedSample<S>]) -> Result<(Vec<f64>, WeightStatus)> {
    if samples.is_empty() {
        return Err(McError::EmptySample);
    }
    let log_w: Vec<f64> = samples.iter().map(|s| s.log_weight).collect();
    Ok(normalize_log_weights(&log_w))
}

/// Self-normalized estimate of `E_p[f(x)]`.
pub fn estimate<S, F>(samples: &[WeightedSample<S>], f: F) -> Result<f64>
where
    F: Fn(&S) -> f64,
{
    let (w, status) = normalized_weights(samples)?;
    if status.is_degenerate() {
        tracing::warn!(n = samples.len(), "all importance weights are zero");
    }
    Ok(samples.iter().zip(w).map(|(s, w)| w * f(&s.value)).sum())
}

/// `ln mean(weights)`, an estimate of the log normalizing constant of the target.
pub fn log_evidence<S>(samples: &[WeightedSample<S>]) -> Result<f64> {
    if samples.is_empty() {
        return Err(McError::EmptySample);
    }
    let log_w: Vec<f64> = samples.iter().map(|s| s.log_weight).collect();
    Ok(log_sum_exp(&log_w) - (samples.len() as f64).ln())
}

/// Kish effective sample size of the importance weights.
pub fn effective_sample_size<S>(samples: &[WeightedSample<S>]) -> Result<f64> {
    let (w, _) = normalized_weights(samples)?;
    Ok(weights::effective_sample_size(&w))
}

/// Settings for [`AdaptiveImportanceSampler::run_with_config`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveConfig {
    pub n_batches: usize,
    pub batch_size: usize,
    /// Smallest weight a mixture component can be assigned.
    pub weight_floor: f64,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            n_batches: 10,
            batch_size: 1_000,
            weight_floor: DEFAULT_WEIGHT_FLOOR,
        }
    }
}

/// Importance sampler with an adaptively reweighted mixture proposal.
#[derive(Debug, Clone)]
pub struct AdaptiveImportanceSampler<D> {
    proposal: Mixture<D>,
    pub seed: u64,
    rng: SmallRng,
}

impl<D> AdaptiveImportanceSampler<D> {
    pub fn new(proposal: Mixture<D>) -> Self {
        let seed = thread_rng().gen::<u64>();
        Self {
            proposal,
            seed,
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    pub fn set_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self.rng = SmallRng::seed_from_u64(seed);
        self
    }

    pub fn proposal(&self) -> &Mixture<D> {
        &self.proposal
    }

    /// Current mixture weights.
    pub fn weights(&self) -> &[f64] {
        self.proposal.weights()
    }

    /// Draws `n` samples. Each draw records its component; its weight uses
    /// the density of the whole mixture, so weights stay valid whichever
    /// component produced the draw.
    pub fn sample_batch<S, T>(&mut self, target: &T, n: usize) -> Vec<WeightedSample<S>>
    where
        T: TargetDistribution<S> + ?Sized,
        D: Distribution<S>,
    {
        (0..n)
            .map(|_| {
                let k = self.proposal.sample_component(&mut self.rng);
                let x = self.proposal.components()[k].sample(&mut self.rng);
                let log_w = target.unnorm_log_prob(&x) - self.proposal.log_pdf(&x);
                WeightedSample::new(x, log_w, Some(k))
            })
            .collect()
    }

    /// Resets each component's weight to the share of normalized importance
    /// mass its draws carried, floored at the mixture's weight floor.
    ///
    /// Returns `false` and keeps the weights if every sample has zero weight.
    pub fn update_weights<S>(&mut self, samples: &[WeightedSample<S>]) -> Result<bool> {
        let (w, status) = normalized_weights(samples)?;
        if status.is_degenerate() {
            tracing::warn!("adaptive importance batch carried no mass, keeping weights");
            return Ok(false);
        }
        let mut masses = vec![0.0; self.proposal.components().len()];
        for (s, w) in samples.iter().zip(w) {
            if let Some(k) = s.component {
                if k < masses.len() {
                    masses[k] += w;
                }
            }
        }
        Ok(self.proposal.update_weights(&masses))
    }

    /// Alternates [`sample_batch`](Self::sample_batch) and
    /// [`update_weights`](Self::update_weights) `n_batches` times and returns
    /// every sample drawn.
    pub fn run<S, T>(
        &mut self,
        target: &T,
        n_batches: usize,
        batch_size: usize,
    ) -> Result<Vec<WeightedSample<S>>>
    where
        T: TargetDistribution<S> + ?Sized,
        D: Distribution<S>,
    {
        if batch_size == 0 {
            return Err(McError::EmptySample);
        }
        let mut all = Vec::with_capacity(n_batches * batch_size);
        for batch in 0..n_batches {
            let samples = self.sample_batch(target, batch_size);
            self.update_weights(&samples)?;
            tracing::debug!(
                batch,
                ess = effective_sample_size(&samples)?,
                weights = ?self.proposal.weights(),
                "adaptive importance batch"
            );
            all.extend(samples);
        }
        Ok(all)
    }

    /// [`run`](Self::run) with batch settings and weight floor from `config`.
    pub fn run_with_config<S, T>(
        &mut self,
        target: &T,
        config: &AdaptiveConfig,
    ) -> Result<Vec<WeightedSample<S>>>
    where
        T: TargetDistribution<S> + ?Sized,
        D: Distribution<S> + Clone,
    {
        self.proposal = self.proposal.clone().with_weight_floor(config.weight_floor)?;
        self.run(target, config.n_batches, config.batch_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::{Gaussian, Uniform};
    use approx::assert_abs_diff_eq;

    fn bimodal(x: &f64) -> f64 {
        // 0.3 N(-4, 1) + 0.7 N(4, 1), unnormalized by the same constant
        let a = 0.3 * (-0.5 * (x + 4.0) * (x + 4.0)).exp();
        let b = 0.7 * (-0.5 * (x - 4.0) * (x - 4.0)).exp();
        (a + b).ln()
    }

    #[test]
    fn weights_are_target_over_proposal() {
        let target = |x: &f64| -x.abs();
        let proposal = Uniform::new(-1.0, 1.0).unwrap();
        let samples = ImportanceSampler::new().set_seed(1).sample(&target, &proposal, 10);
        for s in &samples {
            let expected = (-s.value().abs()) - (0.5f64).ln();
            assert_abs_diff_eq!(s.log_weight(), expected, epsilon = 1e-12);
            assert_abs_diff_eq!(s.weight(), expected.exp(), epsilon = 1e-12);
            assert_eq!(s.component(), None);
        }
    }

    #[test]
    fn log_evidence_estimates_normalizing_constant() {
        // ∫ exp(-x²/2) dx = √(2π)
        let target = |x: &f64| -0.5 * x * x;
        let proposal = Gaussian::new(0.0, 1.5).unwrap();
        let samples = ImportanceSampler::new()
            .set_seed(2)
            .sample(&target, &proposal, 50_000);
        let z = log_evidence(&samples).unwrap();
        assert_abs_diff_eq!(z, (2.0 * std::f64::consts::PI).sqrt().ln(), epsilon = 0.02);
        let ess = effective_sample_size(&samples).unwrap();
        assert!(ess > 30_000.0 && ess <= 50_000.0);
    }

    #[test]
    fn empty_samples_are_rejected() {
        let empty: Vec<WeightedSample<f64>> = Vec::new();
        assert_eq!(estimate(&empty, |x| *x), Err(McError::EmptySample));
        assert_eq!(log_evidence(&empty), Err(McError::EmptySample));
    }

    #[test]
    fn zero_weights_fall_back_to_uniform() {
        let target = |_: &f64| f64::NEG_INFINITY;
        let proposal = Gaussian::standard();
        let samples = ImportanceSampler::new().set_seed(3).sample(&target, &proposal, 4);
        let (w, status) = normalized_weights(&samples).unwrap();
        assert!(status.is_degenerate());
        assert_eq!(w, vec![0.25; 4]);
    }

    #[test]
    fn adaptive_weights_track_target_modes() {
        let mixture = Mixture::uniform(vec![
            Gaussian::new(-4.0, 1.5).unwrap(),
            Gaussian::new(4.0, 1.5).unwrap(),
            Gaussian::new(20.0, 1.0).unwrap(),
        ])
        .unwrap();
        let mut ais = AdaptiveImportanceSampler::new(mixture).set_seed(4);
        let samples = ais.run(&bimodal, 8, 2_000).unwrap();
        let w = ais.weights();
        assert_abs_diff_eq!(w[0], 0.3, epsilon = 0.06);
        assert_abs_diff_eq!(w[1], 0.7, epsilon = 0.06);
        // Useless component floored, never zero.
        assert!(w[2] > 0.0 && w[2] < 0.01);
        assert_abs_diff_eq!(w.iter().sum::<f64>(), 1.0, epsilon = 1e-12);

        let mean = estimate(&samples, |x| *x).unwrap();
        assert_abs_diff_eq!(mean, 0.3 * -4.0 + 0.7 * 4.0, epsilon = 0.15);
        assert!(samples.iter().all(|s| s.component().is_some()));
    }

    #[test]
    fn adaptive_config_sets_floor() {
        let mixture = Mixture::uniform(vec![
            Gaussian::new(0.0, 1.0).unwrap(),
            Gaussian::new(50.0, 1.0).unwrap(),
        ])
        .unwrap();
        let mut ais = AdaptiveImportanceSampler::new(mixture).set_seed(5);
        let config = AdaptiveConfig {
            n_batches: 3,
            batch_size: 500,
            weight_floor: 0.05,
        };
        let target = |x: &f64| -0.5 * x * x;
        let samples = ais.run_with_config(&target, &config).unwrap();
        assert_eq!(samples.len(), 1_500);
        assert_eq!(ais.proposal().weight_floor(), 0.05);
        assert!(ais.weights()[1] >= 0.05 / 1.05 - 1e-12);
    }

    #[test]
    fn same_seed_same_samples() {
        let target = |x: &f64| -0.5 * x * x;
        let run = || {
            let mix = Mixture::uniform(vec![Gaussian::new(-1.0, 1.0).unwrap(), Gaussian::new(1.0, 1.0).unwrap()])
                .unwrap();
            AdaptiveImportanceSampler::new(mix)
                .set_seed(6)
                .run(&target, 3, 100)
                .unwrap()
        };
        assert_eq!(run(), run());
    }
}
