/*!
Proposal kernels for Metropolis-Hastings.

A [`ProposalDistribution`] draws a candidate `x' ~ q(· | x)` and evaluates
`log q(x' | x)`. Symmetric kernels (`q(x'|x) = q(x|x')`) let the sampler skip
the Hastings correction; asymmetric kernels such as [`LangevinProposal`] rely
on it.

Kernels may adapt during burn-in through [`ProposalDistribution::adapt`]. The
Metropolis-Hastings driver only calls it while discarding burn-in samples, so
the kernel is fixed while retained samples are drawn and detailed balance
holds for them.

Provided kernels:

* [`GaussianProposal`] – random walk with fixed or adaptive diagonal covariance,
* [`UniformProposal`] – random walk on a box,
* [`MixtureProposal`] – weighted combination of kernels with adaptive weights,
* [`LangevinProposal`] – gradient-informed (MALA) drift towards higher density.
*/

use rand::{Rng, RngCore};
use rand_distr::StandardNormal;
use std::f64::consts::PI;

use crate::distributions::{GradientTarget, Mixture};
use crate::error::{McError, Result};
use crate::weights::log_sum_exp;

/// A Markov kernel used to generate Metropolis-Hastings candidates.
pub trait ProposalDistribution<S> {
    /// Samples a candidate from `q(· | current)`.
    fn propose(&mut self, current: &S, rng: &mut dyn RngCore) -> S;

    /// Evaluates `log q(to | from)`.
    fn log_prob(&self, from: &S, to: &S) -> f64;

    /// Whether `q(to | from) = q(from | to)` for all states.
    fn is_symmetric(&self) -> bool {
        false
    }

    /// Burn-in feedback: the chain's state after the last transition and
    /// whether the last candidate was accepted.
    fn adapt(&mut self, _state: &S, _accepted: bool) {}
}

impl<S, Q: ProposalDistribution<S> + ?Sized> ProposalDistribution<S> for Box<Q> {
    fn propose(&mut self, current: &S, rng: &mut dyn RngCore) -> S {
        (**self).propose(current, rng)
    }

    fn log_prob(&self, from: &S, to: &S) -> f64 {
        (**self).log_prob(from, to)
    }

    fn is_symmetric(&self) -> bool {
        (**self).is_symmetric()
    }

    fn adapt(&mut self, state: &S, accepted: bool) {
        (**self).adapt(state, accepted)
    }
}

fn gaussian_log_density(diff: f64, std: f64) -> f64 {
    let z = diff / std;
    -0.5 * z * z - std.ln() - 0.5 * (2.0 * PI).ln()
}

/// Running mean and variance per coordinate (Welford).
#[derive(Debug, Clone, PartialEq)]
struct RunningMoments {
    n: usize,
    mean: Vec<f64>,
    m2: Vec<f64>,
}

impl RunningMoments {
    fn push(&mut self, x: &[f64]) {
        if self.mean.len() != x.len() {
            self.n = 0;
            self.mean = vec![0.0; x.len()];
            self.m2 = vec![0.0; x.len()];
        }
        self.n += 1;
        let n = self.n as f64;
        for ((m, m2), &xi) in self.mean.iter_mut().zip(self.m2.iter_mut()).zip(x) {
            let delta = xi - *m;
            *m += delta / n;
            *m2 += delta * (xi - *m);
        }
    }

    fn variances(&self) -> Vec<f64> {
        let denom = (self.n.max(2) - 1) as f64;
        self.m2.iter().map(|m2| m2 / denom).collect()
    }
}

/// Haario-style adaptation settings for [`GaussianProposal`].
#[derive(Debug, Clone, PartialEq)]
struct Adaptation {
    moments: RunningMoments,
    min_samples: usize,
    jitter: f64,
}

/**
Gaussian random-walk proposal `x' = x + N(0, diag(σ²))`.

A single standard deviation is broadcast over every coordinate. With
[`GaussianProposal::adaptive`], burn-in states feed a running variance
estimate and the step sizes become `2.38/√d · √(var_i + jitter)`.

```rust
use mini_montecarlo::proposals::{GaussianProposal, ProposalDistribution};
use rand::rngs::SmallRng;
use rand::SeedableRng;

let mut q = GaussianProposal::new(0.5).unwrap();
let mut rng = SmallRng::seed_from_u64(1);
let x = vec![0.0, 0.0];
let y = q.propose(&x, &mut rng);
assert_eq!(y.len(), 2);
assert!(q.is_symmetric());
assert_eq!(q.log_prob(&x, &y), q.log_prob(&y, &x));
```
*/
#[derive(Debug, Clone, PartialEq)]
pub struct GaussianProposal {
    std: Vec<f64>,
    adaptation: Option<Adaptation>,
}

impl GaussianProposal {
    /// Isotropic random walk with standard deviation `std` in every coordinate.
    pub fn new(std: f64) -> Result<Self> {
        Self::with_stds(vec![std])
    }

    /// Diagonal random walk with one standard deviation per coordinate.
    pub fn with_stds(std: Vec<f64>) -> Result<Self> {
        if std.is_empty() || std.iter().any(|s| !(s.is_finite() && *s > 0.0)) {
            return Err(McError::InvalidConfig(format!(
                "proposal standard deviations must be positive and finite, got {std:?}"
            )));
        }
        Ok(Self {
            std,
            adaptation: None,
        })
    }

    /// Random walk whose covariance is learned from burn-in states once
    /// `min_samples` of them have been seen.
    pub fn adaptive(initial_std: f64, min_samples: usize) -> Result<Self> {
        let mut q = Self::new(initial_std)?;
        q.adaptation = Some(Adaptation {
            moments: RunningMoments {
                n: 0,
                mean: Vec::new(),
                m2: Vec::new(),
            },
            min_samples: min_samples.max(2),
            jitter: 1e-6,
        });
        Ok(q)
    }

    /// Standard deviation used for coordinate `i`.
    pub fn std(&self, i: usize) -> f64 {
        self.std[i.min(self.std.len() - 1)]
    }
}

impl ProposalDistribution<Vec<f64>> for GaussianProposal {
    fn propose(&mut self, current: &Vec<f64>, rng: &mut dyn RngCore) -> Vec<f64> {
        current
            .iter()
            .enumerate()
            .map(|(i, x)| {
                let z: f64 = rng.sample(StandardNormal);
                x + self.std(i) * z
            })
            .collect()
    }

    fn log_prob(&self, from: &Vec<f64>, to: &Vec<f64>) -> f64 {
        from.iter()
            .zip(to)
            .enumerate()
            .map(|(i, (f, t))| gaussian_log_density(t - f, self.std(i)))
            .sum()
    }

    fn is_symmetric(&self) -> bool {
        true
    }

    fn adapt(&mut self, state: &Vec<f64>, _accepted: bool) {
        let Some(adaptation) = self.adaptation.as_mut() else {
            return;
        };
        adaptation.moments.push(state);
        if adaptation.moments.n < adaptation.min_samples {
            return;
        }
        let scale = 2.38 / (state.len() as f64).sqrt();
        let jitter = adaptation.jitter;
        self.std = adaptation
            .moments
            .variances()
            .into_iter()
            .map(|v| scale * (v + jitter).sqrt())
            .collect();
    }
}

/// Uniform random walk: each coordinate moves by `U(-half_width, half_width)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UniformProposal {
    pub half_width: f64,
}

impl UniformProposal {
    pub fn new(half_width: f64) -> Result<Self> {
        if !(half_width.is_finite() && half_width > 0.0) {
            return Err(McError::InvalidConfig(format!(
                "uniform proposal half-width must be positive, got {half_width}"
            )));
        }
        Ok(Self { half_width })
    }
}

impl ProposalDistribution<Vec<f64>> for UniformProposal {
    fn propose(&mut self, current: &Vec<f64>, rng: &mut dyn RngCore) -> Vec<f64> {
        current
            .iter()
            .map(|x| x + self.half_width * (2.0 * rng.gen::<f64>() - 1.0))
            .collect()
    }

    fn log_prob(&self, from: &Vec<f64>, to: &Vec<f64>) -> f64 {
        if from
            .iter()
            .zip(to)
            .all(|(f, t)| (t - f).abs() <= self.half_width)
        {
            -(from.len() as f64) * (2.0 * self.half_width).ln()
        } else {
            f64::NEG_INFINITY
        }
    }

    fn is_symmetric(&self) -> bool {
        true
    }
}

/**
A weighted mixture of proposal kernels.

Each candidate comes from one component picked by weight; the density is the
weighted sum of the component densities. During burn-in the weights are
re-estimated every `adapt_interval` proposals proportionally to each
component's smoothed acceptance rate, floored so no component is ever switched
off.
*/
#[derive(Debug, Clone)]
pub struct MixtureProposal<Q> {
    mixture: Mixture<Q>,
    last_component: Option<usize>,
    proposed: Vec<usize>,
    accepted: Vec<usize>,
    adapt_interval: usize,
    since_update: usize,
}

impl<Q> MixtureProposal<Q> {
    pub fn new(mixture: Mixture<Q>) -> Self {
        let k = mixture.components().len();
        Self {
            mixture,
            last_component: None,
            proposed: vec![0; k],
            accepted: vec![0; k],
            adapt_interval: 100,
            since_update: 0,
        }
    }

    /// How many burn-in proposals pass between weight updates.
    pub fn with_adapt_interval(mut self, interval: usize) -> Self {
        self.adapt_interval = interval.max(1);
        self
    }

    pub fn weights(&self) -> &[f64] {
        self.mixture.weights()
    }

    /// Per-component `(proposed, accepted)` counts seen during adaptation.
    pub fn counts(&self) -> Vec<(usize, usize)> {
        self.proposed
            .iter()
            .copied()
            .zip(self.accepted.iter().copied())
            .collect()
    }
}

impl<S, Q: ProposalDistribution<S>> ProposalDistribution<S> for MixtureProposal<Q> {
    fn propose(&mut self, current: &S, rng: &mut dyn RngCore) -> S {
        let k = self.mixture.sample_component(rng);
        self.last_component = Some(k);
        self.mixture.components_mut()[k].propose(current, rng)
    }

    fn log_prob(&self, from: &S, to: &S) -> f64 {
        let terms: Vec<f64> = self
            .mixture
            .components()
            .iter()
            .zip(self.mixture.weights())
            .map(|(q, w)| w.ln() + q.log_prob(from, to))
            .collect();
        log_sum_exp(&terms)
    }

    fn is_symmetric(&self) -> bool {
        self.mixture.components().iter().all(|q| q.is_symmetric())
    }

    fn adapt(&mut self, state: &S, accepted: bool) {
        let Some(k) = self.last_component.take() else {
            return;
        };
        self.mixture.components_mut()[k].adapt(state, accepted);
        self.proposed[k] += 1;
        if accepted {
            self.accepted[k] += 1;
        }
        self.since_update += 1;
        if self.since_update >= self.adapt_interval {
            self.since_update = 0;
            let rates: Vec<f64> = self
                .accepted
                .iter()
                .zip(&self.proposed)
                .map(|(a, p)| (*a as f64 + 1.0) / (*p as f64 + 2.0))
                .collect();
            self.mixture.update_weights(&rates);
        }
    }
}

/**
Metropolis-adjusted Langevin proposal.

`x' = x + (ε²/2)·∇log p(x) + ε·N(0, I)`. The kernel is not symmetric, so the
Hastings correction in the acceptance ratio is essential.
*/
#[derive(Debug, Clone)]
pub struct LangevinProposal<G> {
    pub target: G,
    pub step_size: f64,
}

impl<G: GradientTarget> LangevinProposal<G> {
    pub fn new(target: G, step_size: f64) -> Result<Self> {
        if !(step_size.is_finite() && step_size > 0.0) {
            return Err(McError::InvalidConfig(format!(
                "Langevin step size must be positive, got {step_size}"
            )));
        }
        Ok(Self { target, step_size })
    }

    fn drift_mean(&self, x: &[f64]) -> Vec<f64> {
        let mut grad = vec![0.0; x.len()];
        self.target.logp_and_grad(x, &mut grad);
        let half_eps2 = 0.5 * self.step_size * self.step_size;
        x.iter()
            .zip(&grad)
            .map(|(xi, gi)| xi + half_eps2 * gi)
            .collect()
    }
}

impl<G: GradientTarget> ProposalDistribution<Vec<f64>> for LangevinProposal<G> {
    fn propose(&mut self, current: &Vec<f64>, rng: &mut dyn RngCore) -> Vec<f64> {
        self.drift_mean(current)
            .into_iter()
            .map(|m| {
                let z: f64 = rng.sample(StandardNormal);
                m + self.step_size * z
            })
            .collect()
    }

    fn log_prob(&self, from: &Vec<f64>, to: &Vec<f64>) -> f64 {
        let mean = self.drift_mean(from);
        let lp: f64 = mean
            .iter()
            .zip(to)
            .map(|(m, t)| gaussian_log_density(t - m, self.step_size))
            .sum();
        if lp.is_nan() {
            f64::NEG_INFINITY
        } else {
            lp
        }
    }
}
