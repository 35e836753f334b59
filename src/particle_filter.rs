/*!
# Bootstrap particle filter

A [`ParticleSet`] approximates the filtering distribution of a latent state by
`n` weighted hypotheses. Each time step runs

1. **predict** – every state is pushed through a [`SystemModel`],
2. **update** – every log-weight is incremented by the log-likelihood of the
   observation under an [`ObservationModel`],
3. **normalize** – log-weights are turned into weights summing to one,
4. **resample** – only when the effective sample size drops below
   `threshold * n`, using one of the [`ResamplingStrategy`] variants.

Weights live in the log domain between normalizations; a particle whose
likelihood is zero or not finite gets log-weight `-∞` and is effectively pruned.
If every particle is pruned, normalization falls back to uniform weights and
reports [`WeightStatus::Degenerate`] instead of failing.

## Example

```rust
use mini_montecarlo::distributions::Gaussian;
use mini_montecarlo::particle_filter::{
    LinearGaussianObservation, LinearGaussianSystem, ParticleFilter, ParticleFilterConfig,
};

let system = LinearGaussianSystem::random_walk(0.0, 0.1).unwrap();
let observation = LinearGaussianObservation::new(1.0, 0.2).unwrap();
let mut pf = ParticleFilter::new(ParticleFilterConfig::with_particles(200))
    .unwrap()
    .set_seed(42);

let mut particles = pf.initialize(&Gaussian::standard()).unwrap();
for y in [0.1, 0.15, 0.2] {
    pf.step(&mut particles, &y, &system, &observation).unwrap();
}
let estimate = particles.weighted_mean(|x| *x);
assert!(estimate.is_finite());
```
*/

use rand::rngs::SmallRng;
use rand::{thread_rng, Rng, RngCore, SeedableRng};
use rand_distr::StandardNormal;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::distributions::Distribution;
use crate::error::{McError, Result};
use crate::resampling::ResamplingStrategy;
use crate::weights::{
    effective_sample_size, log_increment, normalize_log_weights, WeightStatus,
};

/// One weighted hypothesis about the latent state.
#[derive(Debug, Clone, PartialEq)]
pub struct Particle<S> {
    pub state: S,
    /// Normalized weight as of the last normalization.
    pub weight: f64,
    /// Log-weight; the authoritative value between normalizations.
    pub log_weight: f64,
}

impl<S> Particle<S> {
    fn with_uniform_weight(state: S, n: usize) -> Self {
        let weight = 1.0 / n as f64;
        Self {
            state,
            weight,
            log_weight: weight.ln(),
        }
    }
}

/// A fixed-size collection of particles.
#[derive(Debug, Clone, PartialEq)]
pub struct ParticleSet<S> {
    particles: Vec<Particle<S>>,
}

impl<S> ParticleSet<S> {
    /// Builds a set with uniform weights `1/n` from the given states.
    pub fn from_states(states: Vec<S>) -> Result<Self> {
        if states.is_empty() {
            return Err(McError::EmptyParticleSet);
        }
        let n = states.len();
        Ok(Self {
            particles: states
                .into_iter()
                .map(|s| Particle::with_uniform_weight(s, n))
                .collect(),
        })
    }

    /// Draws `n` states from `prior`, each with weight `1/n`.
    pub fn initialize<D>(prior: &D, n: usize, rng: &mut dyn RngCore) -> Result<Self>
    where
        D: Distribution<S> + ?Sized,
    {
        if n == 0 {
            return Err(McError::EmptyParticleSet);
        }
        Self::from_states((0..n).map(|_| prior.sample(rng)).collect())
    }

    pub fn len(&self) -> usize {
        self.particles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    pub fn particles(&self) -> &[Particle<S>] {
        &self.particles
    }

    pub fn iter(&self) -> impl Iterator<Item = &Particle<S>> {
        self.particles.iter()
    }

    pub fn states(&self) -> impl Iterator<Item = &S> {
        self.particles.iter().map(|p| &p.state)
    }

    pub fn weights(&self) -> Vec<f64> {
        self.particles.iter().map(|p| p.weight).collect()
    }

    pub fn log_weights(&self) -> Vec<f64> {
        self.particles.iter().map(|p| p.log_weight).collect()
    }

    /// Effective sample size `1/Σw²` of the normalized log-weights.
    pub fn effective_sample_size(&self) -> f64 {
        let (w, _) = normalize_log_weights(&self.log_weights());
        effective_sample_size(&w)
    }

    /// Weighted posterior mean of `f(state)` under the normalized log-weights.
    pub fn weighted_mean<F>(&self, f: F) -> f64
    where
        F: Fn(&S) -> f64,
    {
        let (w, _) = normalize_log_weights(&self.log_weights());
        self.particles
            .iter()
            .zip(w)
            .map(|(p, w)| w * f(&p.state))
            .sum()
    }

    /// Consumes the set and returns its particles.
    pub fn into_particles(self) -> Vec<Particle<S>> {
        self.particles
    }

    pub(crate) fn particles_mut(&mut self) -> &mut [Particle<S>] {
        &mut self.particles
    }

    fn ensure_size(&self, expected: usize) -> Result<()> {
        if self.particles.is_empty() {
            return Err(McError::EmptyParticleSet);
        }
        if self.particles.len() != expected {
            return Err(McError::SizeMismatch {
                expected,
                found: self.particles.len(),
            });
        }
        Ok(())
    }
}

/// Moves a state forward by one time step.
pub trait SystemModel<S> {
    fn propagate(&self, state: &S, rng: &mut dyn RngCore) -> S;
}

/// Scores a state against an observation.
pub trait ObservationModel<S, O> {
    /// Returns the likelihood `p(observation | state)` (a density, not a log-density).
    fn likelihood(&self, state: &S, observation: &O) -> f64;
}

/// Linear system with additive Gaussian noise: `x' = a·x + drift + N(0, σ²)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearGaussianSystem {
    pub coefficient: f64,
    pub drift: f64,
    pub noise_std: f64,
}

impl LinearGaussianSystem {
    pub fn new(coefficient: f64, drift: f64, noise_std: f64) -> Result<Self> {
        if !(noise_std.is_finite() && noise_std >= 0.0) {
            return Err(McError::InvalidConfig(format!(
                "process noise must be finite and non-negative, got {noise_std}"
            )));
        }
        Ok(Self {
            coefficient,
            drift,
            noise_std,
        })
    }

    /// Gaussian random walk `x' = x + drift + N(0, σ²)`.
    pub fn random_walk(drift: f64, noise_std: f64) -> Result<Self> {
        Self::new(1.0, drift, noise_std)
    }
}

impl SystemModel<f64> for LinearGaussianSystem {
    fn propagate(&self, state: &f64, rng: &mut dyn RngCore) -> f64 {
        let z: f64 = rng.sample(StandardNormal);
        self.coefficient * state + self.drift + self.noise_std * z
    }
}

/// A system model given by an arbitrary (possibly stochastic) function.
#[derive(Clone, Copy)]
pub struct NonlinearSystem<F> {
    f: F,
}

impl<F> NonlinearSystem<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<S, F> SystemModel<S> for NonlinearSystem<F>
where
    F: Fn(&S, &mut dyn RngCore) -> S,
{
    fn propagate(&self, state: &S, rng: &mut dyn RngCore) -> S {
        (self.f)(state, rng)
    }
}

/// Linear observation with Gaussian noise: `y ~ N(gain·x, σ²)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearGaussianObservation {
    pub gain: f64,
    pub noise_std: f64,
}

impl LinearGaussianObservation {
    pub fn new(gain: f64, noise_std: f64) -> Result<Self> {
        if !(noise_std.is_finite() && noise_std > 0.0) {
            return Err(McError::InvalidConfig(format!(
                "observation noise must be finite and positive, got {noise_std}"
            )));
        }
        Ok(Self { gain, noise_std })
    }
}

impl ObservationModel<f64, f64> for LinearGaussianObservation {
    fn likelihood(&self, state: &f64, observation: &f64) -> f64 {
        let z = (observation - self.gain * state) / self.noise_std;
        (-0.5 * z * z).exp() / (self.noise_std * (2.0 * PI).sqrt())
    }
}

/// An observation model given by an arbitrary likelihood function.
#[derive(Clone, Copy)]
pub struct NonlinearObservation<F> {
    f: F,
}

impl<F> NonlinearObservation<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<S, O, F> ObservationModel<S, O> for NonlinearObservation<F>
where
    F: Fn(&S, &O) -> f64,
{
    fn likelihood(&self, state: &S, observation: &O) -> f64 {
        (self.f)(state, observation)
    }
}

/// When and how to resample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResampleConfig {
    pub strategy: ResamplingStrategy,
    /// Resample when `ESS < threshold * n`; must lie in `[0, 1]`.
    pub threshold: f64,
}

impl Default for ResampleConfig {
    fn default() -> Self {
        Self {
            strategy: ResamplingStrategy::Systematic,
            threshold: 0.5,
        }
    }
}

impl ResampleConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(McError::InvalidThreshold(self.threshold));
        }
        Ok(())
    }
}

/// Particle filter configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParticleFilterConfig {
    pub n_particles: usize,
    pub resample: ResampleConfig,
}

impl Default for ParticleFilterConfig {
    fn default() -> Self {
        Self {
            n_particles: 1_000,
            resample: ResampleConfig::default(),
        }
    }
}

impl ParticleFilterConfig {
    pub fn with_particles(n_particles: usize) -> Self {
        Self {
            n_particles,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.n_particles == 0 {
            return Err(McError::EmptyParticleSet);
        }
        self.resample.validate()
    }
}

/// What happened during one [`ParticleFilter::step`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepReport {
    pub status: WeightStatus,
    /// Effective sample size after the update, before any resampling.
    pub ess: f64,
    pub resampled: bool,
}

/// Normalizes the log-weights of `particles` in place.
///
/// Afterwards `weight` sums to one (±1e-9) and `log_weight = ln(weight)`.
/// If every log-weight is `-∞` the set falls back to uniform weights and
/// [`WeightStatus::Degenerate`] is returned.
pub fn normalize<S>(particles: &mut ParticleSet<S>) -> Result<WeightStatus> {
    if particles.is_empty() {
        return Err(McError::EmptyParticleSet);
    }
    if let Some((index, p)) = particles
        .iter()
        .enumerate()
        .find(|(_, p)| p.log_weight.is_nan())
    {
        return Err(McError::InvalidWeight {
            index,
            value: p.log_weight,
        });
    }
    let (weights, status) = normalize_log_weights(&particles.log_weights());
    if status.is_degenerate() {
        tracing::warn!(
            n_particles = particles.len(),
            "all particle weights collapsed to zero; falling back to uniform weights"
        );
    }
    for (p, w) in particles.particles_mut().iter_mut().zip(weights) {
        p.weight = w;
        p.log_weight = if w > 0.0 { w.ln() } else { f64::NEG_INFINITY };
    }
    Ok(status)
}

/// Weighted estimate of `E[f(x)]` under the current particle weights.
///
/// Returns [`McError::EmptyParticleSet`] for an empty set.
pub fn estimate<S, F>(particles: &ParticleSet<S>, f: F) -> Result<f64>
where
    F: Fn(&S) -> f64,
{
    if particles.is_empty() {
        return Err(McError::EmptyParticleSet);
    }
    Ok(particles.weighted_mean(f))
}

/// Replaces the set by `n` equally weighted copies selected by `strategy`.
pub fn resample<S: Clone>(
    particles: &mut ParticleSet<S>,
    strategy: ResamplingStrategy,
    rng: &mut dyn RngCore,
) -> Result<()> {
    let (weights, _) = normalize_log_weights(&particles.log_weights());
    let indices = strategy.resample(&weights, rng)?;
    let n = indices.len();
    let resampled: Vec<Particle<S>> = indices
        .into_iter()
        .map(|i| Particle::with_uniform_weight(particles.particles[i].state.clone(), n))
        .collect();
    particles.particles = resampled;
    Ok(())
}

/// Resamples iff the effective sample size is below `config.threshold * n`.
///
/// Returns whether resampling took place.
pub fn resample_if_needed<S: Clone>(
    particles: &mut ParticleSet<S>,
    config: &ResampleConfig,
    rng: &mut dyn RngCore,
) -> Result<bool> {
    config.validate()?;
    if particles.is_empty() {
        return Err(McError::EmptyParticleSet);
    }
    let ess = particles.effective_sample_size();
    let limit = config.threshold * particles.len() as f64;
    if ess < limit {
        tracing::debug!(ess, limit, strategy = ?config.strategy, "resampling particles");
        resample(particles, config.strategy, rng)?;
        Ok(true)
    } else {
        Ok(false)
    }
}

/// A particle filter owning its configuration and random generator.
#[derive(Debug, Clone)]
pub struct ParticleFilter {
    pub config: ParticleFilterConfig,
    /// The seed the generator was last initialized with.
    pub seed: u64,
    rng: SmallRng,
}

impl ParticleFilter {
    /// Creates a filter seeded from entropy; call [`ParticleFilter::set_seed`] for reproducible runs.
    pub fn new(config: ParticleFilterConfig) -> Result<Self> {
        config.validate()?;
        let seed = thread_rng().gen::<u64>();
        Ok(Self {
            config,
            seed,
            rng: SmallRng::seed_from_u64(seed),
        })
    }

    /// Re-seeds the filter's generator.
    pub fn set_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self.rng = SmallRng::seed_from_u64(seed);
        self
    }

    /// Draws `config.n_particles` particles from `prior` with weight `1/n`.
    pub fn initialize<S, D>(&mut self, prior: &D) -> Result<ParticleSet<S>>
    where
        D: Distribution<S> + ?Sized,
    {
        ParticleSet::initialize(prior, self.config.n_particles, &mut self.rng)
    }

    /// Propagates every particle through `system`; weights are unchanged.
    pub fn predict<S, M>(&mut self, particles: &mut ParticleSet<S>, system: &M) -> Result<()>
    where
        M: SystemModel<S> + ?Sized,
    {
        particles.ensure_size(self.config.n_particles)?;
        for p in particles.particles_mut() {
            p.state = system.propagate(&p.state, &mut self.rng);
        }
        Ok(())
    }

    /// Parallel [`ParticleFilter::predict`].
    ///
    /// One sub-seed per particle is drawn from the filter's generator before
    /// fanning out, so the result depends only on the seed, not on the number
    /// of worker threads. It differs from the sequential `predict` stream.
    pub fn predict_par<S, M>(&mut self, particles: &mut ParticleSet<S>, system: &M) -> Result<()>
    where
        S: Send,
        M: SystemModel<S> + Sync + ?Sized,
    {
        particles.ensure_size(self.config.n_particles)?;
        let seeds: Vec<u64> = (0..particles.len()).map(|_| self.rng.gen()).collect();
        particles
            .particles_mut()
            .par_iter_mut()
            .zip(seeds.into_par_iter())
            .for_each(|(p, seed)| {
                let mut rng = SmallRng::seed_from_u64(seed);
                p.state = system.propagate(&p.state, &mut rng);
            });
        Ok(())
    }

    /// Adds `ln(likelihood)` to every log-weight.
    pub fn update<S, O, M>(
        &self,
        particles: &mut ParticleSet<S>,
        observation: &O,
        model: &M,
    ) -> Result<()>
    where
        M: ObservationModel<S, O> + ?Sized,
    {
        particles.ensure_size(self.config.n_particles)?;
        for p in particles.particles_mut() {
            p.log_weight += log_increment(model.likelihood(&p.state, observation));
        }
        Ok(())
    }

    /// Parallel [`ParticleFilter::update`]; identical results to the sequential version.
    pub fn update_par<S, O, M>(
        &self,
        particles: &mut ParticleSet<S>,
        observation: &O,
        model: &M,
    ) -> Result<()>
    where
        S: Send + Sync,
        O: Sync,
        M: ObservationModel<S, O> + Sync + ?Sized,
    {
        particles.ensure_size(self.config.n_particles)?;
        particles.particles_mut().par_iter_mut().for_each(|p| {
            p.log_weight += log_increment(model.likelihood(&p.state, observation));
        });
        Ok(())
    }

    /// See [`normalize`].
    pub fn normalize<S>(&self, particles: &mut ParticleSet<S>) -> Result<WeightStatus> {
        normalize(particles)
    }

    /// See [`resample_if_needed`].
    pub fn resample_if_needed<S: Clone>(&mut self, particles: &mut ParticleSet<S>) -> Result<bool> {
        resample_if_needed(particles, &self.config.resample, &mut self.rng)
    }

    /// Runs predict, update, normalize and conditional resampling for one observation.
    pub fn step<S, O, M, L>(
        &mut self,
        particles: &mut ParticleSet<S>,
        observation: &O,
        system: &M,
        observation_model: &L,
    ) -> Result<StepReport>
    where
        S: Clone,
        M: SystemModel<S> + ?Sized,
        L: ObservationModel<S, O> + ?Sized,
    {
        self.predict(particles, system)?;
        self.update(particles, observation, observation_model)?;
        let status = self.normalize(particles)?;
        let ess = effective_sample_size(&particles.weights());
        let resampled = self.resample_if_needed(particles)?;
        Ok(StepReport {
            status,
            ess,
            resampled,
        })
    }
}
