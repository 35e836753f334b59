/*!
# Sequential Monte Carlo

Generalizes the particle filter to explicitly time-indexed models. A
[`TransitionModel`] moves a particle from time `t` to `t + 1` and a
[`LikelihoodModel`] weighs it against the observation made at `t + 1`.

Alongside the particles, an [`SmcState`] carries a running estimate of the log
marginal likelihood (log-evidence) of the observations seen so far. At every
step the increment is

```text
ln Σ_i W_i^{t-1} · p(y_t | x_i^t)
```

where `W^{t-1}` are the normalized weights before the step. When the previous
weights are uniform (e.g. right after resampling) this is `ln mean(incremental
weights)`. Comparing log-evidence between models gives a Bayes factor.

Normalization and conditional resampling reuse [`crate::particle_filter`].
*/

use rand::rngs::SmallRng;
use rand::{thread_rng, Rng, RngCore, SeedableRng};

use crate::distributions::Distribution;
use crate::error::{McError, Result};
use crate::particle_filter::{self, ParticleSet, ResampleConfig};
use crate::weights::{log_increment, log_sum_exp, normalize_log_weights, WeightStatus};

/// Propagates a state from time `t` to `t + 1`.
pub trait TransitionModel<S> {
    fn transition(&self, state: &S, t: usize, rng: &mut dyn RngCore) -> S;
}

impl<S, F> TransitionModel<S> for F
where
    F: Fn(&S, usize, &mut dyn RngCore) -> S,
{
    fn transition(&self, state: &S, t: usize, rng: &mut dyn RngCore) -> S {
        self(state, t, rng)
    }
}

/// Likelihood of the observation made at time `t` given a state at time `t`.
pub trait LikelihoodModel<S, O> {
    fn likelihood(&self, state: &S, observation: &O, t: usize) -> f64;

    /// Log-likelihood; override when the log can be computed more accurately.
    fn log_likelihood(&self, state: &S, observation: &O, t: usize) -> f64 {
        log_increment(self.likelihood(state, observation, t))
    }
}

/// A likelihood given directly in log form by a closure.
#[derive(Clone, Copy)]
pub struct LogLikelihoodFn<F> {
    f: F,
}

impl<F> LogLikelihoodFn<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<S, O, F> LikelihoodModel<S, O> for LogLikelihoodFn<F>
where
    F: Fn(&S, &O, usize) -> f64,
{
    fn likelihood(&self, state: &S, observation: &O, t: usize) -> f64 {
        (self.f)(state, observation, t).exp()
    }

    fn log_likelihood(&self, state: &S, observation: &O, t: usize) -> f64 {
        let lp = (self.f)(state, observation, t);
        if !lp.is_finite() {
            f64::NEG_INFINITY
        } else {
            lp
        }
    }
}

/// Particles plus the bookkeeping SMC needs between steps.
#[derive(Debug, Clone, PartialEq)]
pub struct SmcState<S> {
    pub particles: ParticleSet<S>,
    /// Number of observations assimilated so far.
    pub time: usize,
    /// Running `Σ_t ln p̂(y_t | y_{1:t-1})`.
    pub log_evidence: f64,
}

impl<S> SmcState<S> {
    pub fn new(particles: ParticleSet<S>) -> Self {
        Self {
            particles,
            time: 0,
            log_evidence: 0.0,
        }
    }

    /// Weighted posterior expectation of `f` at the current time.
    pub fn estimate<F>(&self, f: F) -> f64
    where
        F: Fn(&S) -> f64,
    {
        self.particles.weighted_mean(f)
    }
}

/// Summary of one SMC step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SmcStepReport {
    pub time: usize,
    pub log_evidence_increment: f64,
    pub ess: f64,
    pub resampled: bool,
    pub status: WeightStatus,
}

/// Sequential Monte Carlo over a transition/likelihood model pair.
#[derive(Debug, Clone)]
pub struct SequentialMonteCarlo<T, L> {
    pub transition: T,
    pub likelihood: L,
    pub resample: ResampleConfig,
    pub seed: u64,
    rng: SmallRng,
}

impl<T, L> SequentialMonteCarlo<T, L> {
    pub fn new(transition: T, likelihood: L, resample: ResampleConfig) -> Result<Self> {
        resample.validate()?;
        let seed = thread_rng().gen::<u64>();
        Ok(Self {
            transition,
            likelihood,
            resample,
            seed,
            rng: SmallRng::seed_from_u64(seed),
        })
    }

    pub fn set_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self.rng = SmallRng::seed_from_u64(seed);
        self
    }

    /// Draws `n` initial particles from `prior` at time 0 with zero log-evidence.
    pub fn initialize<S, D>(&mut self, prior: &D, n: usize) -> Result<SmcState<S>>
    where
        D: Distribution<S> + ?Sized,
    {
        Ok(SmcState::new(ParticleSet::initialize(
            prior,
            n,
            &mut self.rng,
        )?))
    }

    /// Propagates, weighs and conditionally resamples the particles for one observation.
    pub fn step<S, O>(&mut self, state: &mut SmcState<S>, observation: &O) -> Result<SmcStepReport>
    where
        S: Clone,
        T: TransitionModel<S>,
        L: LikelihoodModel<S, O>,
    {
        if state.particles.is_empty() {
            return Err(McError::EmptyParticleSet);
        }
        let t = state.time;
        let (prev_weights, _) = normalize_log_weights(&state.particles.log_weights());

        let mut weighted_increments = Vec::with_capacity(prev_weights.len());
        for (p, w_prev) in state.particles.particles_mut().iter_mut().zip(&prev_weights) {
            p.state = self.transition.transition(&p.state, t, &mut self.rng);
            let incr = self.likelihood.log_likelihood(&p.state, observation, t + 1);
            // +inf would outweigh every other particle and poison the evidence.
            let incr = if incr.is_finite() { incr } else { f64::NEG_INFINITY };
            p.log_weight += incr;
            weighted_increments.push(if *w_prev > 0.0 {
                w_prev.ln() + incr
            } else {
                f64::NEG_INFINITY
            });
        }

        let increment = log_sum_exp(&weighted_increments);
        state.log_evidence += increment;
        state.time = t + 1;

        let status = particle_filter::normalize(&mut state.particles)?;
        let ess = state.particles.effective_sample_size();
        let resampled =
            particle_filter::resample_if_needed(&mut state.particles, &self.resample, &mut self.rng)?;

        tracing::trace!(
            time = state.time,
            increment,
            ess,
            resampled,
            "smc step"
        );

        Ok(SmcStepReport {
            time: state.time,
            log_evidence_increment: increment,
            ess,
            resampled,
            status,
        })
    }

    /// Runs [`SequentialMonteCarlo::step`] for every observation in order.
    pub fn run<S, O>(
        &mut self,
        state: &mut SmcState<S>,
        observations: &[O],
    ) -> Result<Vec<SmcStepReport>>
    where
        S: Clone,
        T: TransitionModel<S>,
        L: LikelihoodModel<S, O>,
    {
        observations
            .iter()
            .map(|obs| self.step(state, obs))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::Gaussian;
    use approx::assert_abs_diff_eq;
    use rand_distr::StandardNormal;

    fn gaussian_log_pdf(x: f64, mean: f64, std: f64) -> f64 {
        Gaussian::new(mean, std).unwrap().log_pdf(&x)
    }

    fn random_walk(x: &f64, _t: usize, rng: &mut dyn RngCore) -> f64 {
        let z: f64 = rng.sample(StandardNormal);
        x + z
    }

    #[test]
    fn log_evidence_matches_kalman_for_single_step() {
        // x0 ~ N(0,1), x1 = x0 + N(0,1), y1 ~ N(x1, 1)  =>  y1 ~ N(0, 3).
        let lik = LogLikelihoodFn::new(|x: &f64, y: &f64, _t: usize| gaussian_log_pdf(*y, *x, 1.0));
        let mut smc = SequentialMonteCarlo::new(random_walk, lik, ResampleConfig::default())
            .unwrap()
            .set_seed(11);
        let mut state = smc.initialize(&Gaussian::standard(), 20_000).unwrap();
        let report = smc.step(&mut state, &0.7).unwrap();
        let exact = gaussian_log_pdf(0.7, 0.0, 3f64.sqrt());
        assert_abs_diff_eq!(state.log_evidence, exact, epsilon = 0.02);
        assert_eq!(report.time, 1);
        assert_eq!(state.time, 1);
    }

    #[test]
    fn log_evidence_accumulates_over_steps() {
        let lik = LogLikelihoodFn::new(|x: &f64, y: &f64, _t: usize| gaussian_log_pdf(*y, *x, 0.5));
        let mut smc = SequentialMonteCarlo::new(random_walk, lik, ResampleConfig::default())
            .unwrap()
            .set_seed(12);
        let mut state = smc.initialize(&Gaussian::standard(), 500).unwrap();
        let reports = smc.run(&mut state, &[0.1, 0.4, -0.2, 0.3]).unwrap();
        let total: f64 = reports.iter().map(|r| r.log_evidence_increment).sum();
        assert_abs_diff_eq!(total, state.log_evidence, epsilon = 1e-9);
        assert_eq!(state.time, 4);
        assert_eq!(state.particles.len(), 500);
    }

    #[test]
    fn log_evidence_matches_kalman_without_resampling() {
        // Non-uniform weights carry over between steps, so every increment
        // after the first is weighted by the previous normalized weights.
        let observations = [0.7, 1.1, 0.4];
        let lik = LogLikelihoodFn::new(|x: &f64, y: &f64, _t: usize| gaussian_log_pdf(*y, *x, 1.0));
        let never = ResampleConfig {
            threshold: 0.0,
            ..ResampleConfig::default()
        };
        let mut smc = SequentialMonteCarlo::new(random_walk, lik, never)
            .unwrap()
            .set_seed(21);
        let mut state = smc.initialize(&Gaussian::standard(), 100_000).unwrap();
        let reports = smc.run(&mut state, &observations).unwrap();
        assert!(reports.iter().all(|r| !r.resampled));

        let (mut mean, mut var, mut exact): (f64, f64, f64) = (0.0, 1.0, 0.0);
        for y in observations {
            var += 1.0;
            let s = var + 1.0;
            exact += gaussian_log_pdf(y, mean, s.sqrt());
            let gain = var / s;
            mean += gain * (y - mean);
            var *= 1.0 - gain;
        }
        assert_abs_diff_eq!(state.log_evidence, exact, epsilon = 0.05);
    }

    #[test]
    fn infinite_log_likelihood_prunes_the_particle() {
        let lik = LogLikelihoodFn::new(|x: &f64, _: &f64, _t: usize| {
            if *x > 0.0 {
                f64::INFINITY
            } else {
                -1.0
            }
        });
        let never = ResampleConfig {
            threshold: 0.0,
            ..ResampleConfig::default()
        };
        let mut smc = SequentialMonteCarlo::new(random_walk, lik, never)
            .unwrap()
            .set_seed(14);
        let mut state = smc.initialize(&Gaussian::standard(), 50).unwrap();
        let report = smc.step(&mut state, &0.0).unwrap();
        assert!(!report.status.is_degenerate());

        let n_kept = state.particles.states().filter(|x| **x <= 0.0).count();
        assert!(n_kept > 0);
        for p in state.particles.iter() {
            if p.state > 0.0 {
                assert_eq!(p.weight, 0.0);
            } else {
                assert!(p.weight > 0.0);
            }
        }
        let expected = -1.0 + (n_kept as f64 / 50.0).ln();
        assert_abs_diff_eq!(state.log_evidence, expected, epsilon = 1e-12);
    }

    #[test]
    fn impossible_observation_degenerates() {
        let lik = LogLikelihoodFn::new(|_: &f64, _: &f64, _t: usize| f64::NEG_INFINITY);
        let mut smc = SequentialMonteCarlo::new(random_walk, lik, ResampleConfig::default())
            .unwrap()
            .set_seed(13);
        let mut state = smc.initialize(&Gaussian::standard(), 10).unwrap();
        let report = smc.step(&mut state, &0.0).unwrap();
        assert!(report.status.is_degenerate());
        assert_eq!(state.log_evidence, f64::NEG_INFINITY);
        assert_eq!(state.particles.weights(), vec![0.1; 10]);
    }

    #[test]
    fn same_seed_same_trajectory() {
        let run = || {
            let lik =
                LogLikelihoodFn::new(|x: &f64, y: &f64, _t: usize| gaussian_log_pdf(*y, *x, 0.3));
            let mut smc = SequentialMonteCarlo::new(random_walk, lik, ResampleConfig::default())
                .unwrap()
                .set_seed(99);
            let mut state = smc.initialize(&Gaussian::standard(), 100).unwrap();
            smc.run(&mut state, &[0.5, 1.0, 1.5]).unwrap();
            (state.log_evidence, state.particles.log_weights())
        };
        assert_eq!(run(), run());
    }
}
