//! A simple Hamiltonian (Hybrid) Monte Carlo sampler.
//!
//! Each iteration draws a fresh momentum `p ~ N(0, I)`, simulates Hamiltonian
//! dynamics for `n_leapfrog` leapfrog steps of size `step_size` using the
//! gradient supplied by a [`GradientTarget`], and applies the Metropolis test
//! to the joint `(position, momentum)` proposal with Hamiltonian
//! `H(x, p) = −log p(x) + ½|p|²`.
//!
//! Mistuning is not an error: a step size that is too large shows up as a low
//! acceptance rate, one that is too small as slow mixing. Trajectories that
//! reach a non-finite energy are rejected.
//!
//! Every sample records `log_density`, `energy_error` (`H_new − H_old`) and
//! `accept_prob` in its metadata.

use rand::prelude::*;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use crate::core::{acceptance_probability, HasChains, MarkovChain, McmcSample};
use crate::distributions::GradientTarget;
use crate::error::{McError, Result};

/// Integrator settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HmcConfig {
    /// The step size for the leapfrog integrator.
    pub step_size: f64,
    /// The number of leapfrog steps per update.
    pub n_leapfrog: usize,
}

impl Default for HmcConfig {
    fn default() -> Self {
        Self {
            step_size: 0.1,
            n_leapfrog: 10,
        }
    }
}

impl HmcConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.step_size.is_finite() && self.step_size > 0.0) {
            return Err(McError::InvalidConfig(format!(
                "HMC step size must be positive, got {}",
                self.step_size
            )));
        }
        if self.n_leapfrog == 0 {
            return Err(McError::InvalidConfig(
                "HMC needs at least one leapfrog step".to_string(),
            ));
        }
        Ok(())
    }
}

/// A single HMC chain.
#[derive(Debug, Clone)]
pub struct HmcMarkovChain<G> {
    /// The target distribution which provides log probability evaluations and gradients.
    pub target: G,
    pub config: HmcConfig,
    current: McmcSample<Vec<f64>>,
    current_lp: f64,
    current_grad: Vec<f64>,
    pub seed: u64,
    rng: SmallRng,
}

fn kinetic_energy(momentum: &[f64]) -> f64 {
    0.5 * momentum.iter().map(|p| p * p).sum::<f64>()
}

impl<G: GradientTarget> HmcMarkovChain<G> {
    /// Creates a chain at `initial_state`.
    ///
    /// # Errors
    ///
    /// * [`McError::InvalidConfig`] for a non-positive step size or zero leapfrog steps.
    /// * [`McError::NonFiniteInitialState`] if `log p(initial_state)` is not finite.
    pub fn new(target: G, config: HmcConfig, initial_state: Vec<f64>) -> Result<Self> {
        config.validate()?;
        let mut grad = vec![0.0; initial_state.len()];
        let lp = target.logp_and_grad(&initial_state, &mut grad);
        if !lp.is_finite() {
            return Err(McError::NonFiniteInitialState(lp));
        }
        let seed = thread_rng().gen::<u64>();
        Ok(Self {
            target,
            config,
            current: McmcSample::new(initial_state, true).with_meta("log_density", lp),
            current_lp: lp,
            current_grad: grad,
            seed,
            rng: SmallRng::seed_from_u64(seed),
        })
    }

    pub fn set_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self.rng = SmallRng::seed_from_u64(seed);
        self
    }

    /// Runs the leapfrog integrator from the current position with momentum
    /// `momentum` (updated in place). Returns the end position, its
    /// log-density and gradient; the log-density is `-inf` if the trajectory
    /// left the region where the target is finite.
    fn leapfrog(&self, momentum: &mut [f64]) -> (Vec<f64>, f64, Vec<f64>) {
        let eps = self.config.step_size;
        let mut pos = self.current.state.clone();
        let mut grad = self.current_grad.clone();
        let mut lp = self.current_lp;

        for l in 0..self.config.n_leapfrog {
            for (p, g) in momentum.iter_mut().zip(&grad) {
                *p += 0.5 * eps * g;
            }
            for (x, p) in pos.iter_mut().zip(momentum.iter()) {
                *x += eps * p;
            }
            lp = self.target.logp_and_grad(&pos, &mut grad);
            if !lp.is_finite() || grad.iter().any(|g| !g.is_finite()) {
                tracing::trace!(leapfrog_step = l, "HMC trajectory diverged");
                return (pos, f64::NEG_INFINITY, grad);
            }
            for (p, g) in momentum.iter_mut().zip(&grad) {
                *p += 0.5 * eps * g;
            }
        }
        (pos, lp, grad)
    }
}

impl<G: GradientTarget> MarkovChain<Vec<f64>> for HmcMarkovChain<G> {
    fn step(&mut self, _adapt: bool) -> &McmcSample<Vec<f64>> {
        let mut momentum: Vec<f64> = (0..self.current.state.len())
            .map(|_| self.rng.sample(StandardNormal))
            .collect();
        let h_current = -self.current_lp + kinetic_energy(&momentum);

        let (proposed, lp_proposed, grad_proposed) = self.leapfrog(&mut momentum);
        let h_proposed = -lp_proposed + kinetic_energy(&momentum);
        let energy_error = h_proposed - h_current;

        let accept_prob = if h_proposed.is_finite() {
            acceptance_probability(-h_current, -h_proposed, 0.0, 0.0)
        } else {
            0.0
        };
        let accepted = accept_prob > 0.0 && self.rng.gen::<f64>() < accept_prob;
        if accepted {
            self.current.state = proposed;
            self.current_lp = lp_proposed;
            self.current_grad = grad_proposed;
        }
        self.current.accepted = accepted;
        self.current.metadata.insert("log_density", self.current_lp);
        self.current.metadata.insert("energy_error", energy_error);
        self.current.metadata.insert("accept_prob", accept_prob);
        &self.current
    }

    fn current_state(&self) -> &Vec<f64> {
        &self.current.state
    }
}

/// Multiple independent HMC chains.
///
/// ```rust
/// use mini_montecarlo::core::ChainRunner;
/// use mini_montecarlo::distributions::FnGradientTarget;
/// use mini_montecarlo::hmc::{HmcConfig, HMC};
///
/// let target = FnGradientTarget::new(
///     |x: &[f64]| -0.5 * x.iter().map(|v| v * v).sum::<f64>(),
///     |x: &[f64], g: &mut [f64]| g.iter_mut().zip(x).for_each(|(g, v)| *g = -v),
/// );
/// let mut hmc = HMC::new(target, HmcConfig::default(), vec![1.0, -1.0], 2)
///     .unwrap()
///     .set_seed(42);
/// let traces = hmc.run(200, 50, 1).unwrap();
/// assert!(traces[0].samples[0].metadata.contains_key("energy_error"));
/// ```
#[derive(Debug, Clone)]
pub struct HMC<G> {
    pub chains: Vec<HmcMarkovChain<G>>,
    pub seed: u64,
}

impl<G: GradientTarget + Clone> HMC<G> {
    pub fn new(target: G, config: HmcConfig, initial_state: Vec<f64>, n_chains: usize) -> Result<Self> {
        let chains = (0..n_chains)
            .map(|_| HmcMarkovChain::new(target.clone(), config, initial_state.clone()))
            .collect::<Result<Vec<_>>>()?;
        let seed = thread_rng().gen::<u64>();
        Ok(Self { chains, seed })
    }

    /// Sets a new global seed; chain `i` is reseeded with `seed + i`.
    pub fn set_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        for (i, chain) in self.chains.iter_mut().enumerate() {
            let chain_seed = seed.wrapping_add(i as u64);
            chain.seed = chain_seed;
            chain.rng = SmallRng::seed_from_u64(chain_seed);
        }
        self
    }
}

impl<G: GradientTarget + Send> HasChains<Vec<f64>> for HMC<G> {
    type Chain = HmcMarkovChain<G>;

    fn chains_mut(&mut self) -> &mut Vec<Self::Chain> {
        &mut self.chains
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{rhat, ChainRunner};
    use crate::distributions::FnGradientTarget;
    use crate::stats;
    use approx::assert_abs_diff_eq;

    fn standard_normal_2d() -> impl GradientTarget + Clone + Send {
        FnGradientTarget::new(
            |x: &[f64]| -0.5 * x.iter().map(|v| v * v).sum::<f64>(),
            |x: &[f64], g: &mut [f64]| g.iter_mut().zip(x).for_each(|(g, v)| *g = -v),
        )
    }

    #[test]
    fn config_validation() {
        assert!(HmcConfig::default().validate().is_ok());
        let bad = HmcConfig {
            step_size: 0.0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        let bad = HmcConfig {
            n_leapfrog: 0,
            ..Default::default()
        };
        assert!(HmcMarkovChain::new(standard_normal_2d(), bad, vec![0.0, 0.0]).is_err());
    }

    #[test]
    fn config_from_json() {
        let cfg: HmcConfig = serde_json::from_str(r#"{"step_size": 0.25}"#).unwrap();
        assert_eq!(cfg.step_size, 0.25);
        assert_eq!(cfg.n_leapfrog, 10);
    }

    #[test]
    fn leapfrog_conserves_energy_for_small_steps() {
        let config = HmcConfig {
            step_size: 0.01,
            n_leapfrog: 50,
        };
        let mut chain = HmcMarkovChain::new(standard_normal_2d(), config, vec![1.0, 0.5])
            .unwrap()
            .set_seed(1);
        for _ in 0..20 {
            let sample = chain.step(false);
            assert!(sample.metadata["energy_error"].abs() < 1e-3);
            assert!(sample.metadata["accept_prob"] > 0.99);
        }
    }

    #[test]
    fn samples_standard_normal() {
        let config = HmcConfig {
            step_size: 0.2,
            n_leapfrog: 10,
        };
        let mut hmc = HMC::new(standard_normal_2d(), config, vec![2.0, -2.0], 4)
            .unwrap()
            .set_seed(42);
        let traces = hmc.run(2_000, 200, 1).unwrap();
        for d in 0..2 {
            let xs: Vec<f64> = traces.iter().flat_map(|t| t.column(d)).collect();
            assert_abs_diff_eq!(stats::mean(&xs).unwrap(), 0.0, epsilon = 0.1);
            assert_abs_diff_eq!(stats::variance(&xs).unwrap(), 1.0, epsilon = 0.15);
        }
        assert!(traces.iter().all(|t| t.acceptance_rate() > 0.8));
        assert!(rhat(&traces).unwrap().iter().all(|r| *r < 1.05));
    }

    #[test]
    fn huge_step_size_lowers_acceptance() {
        let config = HmcConfig {
            step_size: 2.5,
            n_leapfrog: 5,
        };
        let mut chain = HmcMarkovChain::new(standard_normal_2d(), config, vec![0.0, 0.0])
            .unwrap()
            .set_seed(3);
        let trace = chain.run(500, 0, 1).unwrap();
        assert!(trace.acceptance_rate() < 0.5, "{}", trace.acceptance_rate());
    }

    #[test]
    fn diverging_trajectories_are_rejected() {
        // Target restricted to x > 0: any trajectory crossing zero is rejected.
        let target = FnGradientTarget::new(
            |x: &[f64]| {
                if x[0] > 0.0 {
                    -x[0]
                } else {
                    f64::NEG_INFINITY
                }
            },
            |_x: &[f64], g: &mut [f64]| g[0] = -1.0,
        );
        let config = HmcConfig {
            step_size: 0.3,
            n_leapfrog: 5,
        };
        let mut chain = HmcMarkovChain::new(target, config, vec![0.5]).unwrap().set_seed(4);
        let trace = chain.run(500, 0, 1).unwrap();
        assert!(trace.states().all(|s| s[0] > 0.0));
        assert!(trace.n_accepted < trace.n_proposed);
    }

    #[test]
    fn non_finite_initial_state_is_an_error() {
        let target = FnGradientTarget::new(|_: &[f64]| f64::NAN, |_: &[f64], _: &mut [f64]| {});
        assert!(matches!(
            HmcMarkovChain::new(target, HmcConfig::default(), vec![0.0]),
            Err(McError::NonFiniteInitialState(_))
        ));
    }

    #[test]
    fn chain_seeds_wrap_at_u64_max() {
        let hmc = HMC::new(standard_normal_2d(), HmcConfig::default(), vec![0.0, 0.0], 3)
            .unwrap()
            .set_seed(u64::MAX);
        let seeds: Vec<u64> = hmc.chains.iter().map(|c| c.seed).collect();
        assert_eq!(seeds, vec![u64::MAX, 0, 1]);
    }
}
