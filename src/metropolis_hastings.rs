/*!
# Metropolis–Hastings Sampler

A generic Metropolis–Hastings sampler for any target `D` implementing
[`TargetDistribution`] and any proposal `Q` implementing
[`ProposalDistribution`]. Candidates are accepted with probability
[`acceptance_probability`], which includes the Hastings correction, so
asymmetric proposals are handled correctly.

[`MetropolisHastings`] runs several independent [`MHMarkovChain`]s in parallel,
each initialized with the same starting state. A global seed makes runs
reproducible: chain `i` is seeded with `seed + i`.

## Example Usage

```rust
use mini_montecarlo::core::ChainRunner;
use mini_montecarlo::metropolis_hastings::MetropolisHastings;
use mini_montecarlo::proposals::GaussianProposal;

let target = |x: &Vec<f64>| -0.5 * x.iter().map(|v| v * v).sum::<f64>();
let proposal = GaussianProposal::new(1.0).unwrap();
let mut mh = MetropolisHastings::new(target, proposal, vec![0.0, 0.0], 2)
    .unwrap()
    .set_seed(42);

let traces = mh.run(500, 100, 1).unwrap();
assert_eq!(traces.len(), 2);
assert_eq!(traces[0].len(), 500);
```
*/

use rand::prelude::*;

use crate::core::{acceptance_probability, HasChains, MarkovChain, McmcSample};
use crate::distributions::TargetDistribution;
use crate::error::{McError, Result};
use crate::proposals::ProposalDistribution;

/// Multiple independent Metropolis–Hastings chains.
#[derive(Debug, Clone)]
pub struct MetropolisHastings<S, D, Q> {
    /// The vector of independent Markov chains.
    pub chains: Vec<MHMarkovChain<S, D, Q>>,
    /// The global random seed.
    pub seed: u64,
}

/// A single Markov chain for the Metropolis–Hastings algorithm.
///
/// Each chain stores its own copy of the target and proposal, its current
/// sample (state, acceptance flag and log-density) and a chain-specific RNG.
#[derive(Debug, Clone)]
pub struct MHMarkovChain<S, D, Q> {
    pub target: D,
    pub proposal: Q,
    current: McmcSample<S>,
    current_lp: f64,
    /// The chain-specific random seed.
    pub seed: u64,
    rng: SmallRng,
}

impl<S, D, Q> MetropolisHastings<S, D, Q>
where
    S: Clone,
    D: TargetDistribution<S> + Clone,
    Q: ProposalDistribution<S> + Clone,
{
    /// Creates `n_chains` chains started at `initial_state`.
    ///
    /// # Errors
    ///
    /// [`McError::NonFiniteInitialState`] if the target's log-density at
    /// `initial_state` is not finite.
    pub fn new(target: D, proposal: Q, initial_state: S, n_chains: usize) -> Result<Self> {
        let chains = (0..n_chains)
            .map(|_| MHMarkovChain::new(target.clone(), proposal.clone(), initial_state.clone()))
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

impl<S, D, Q> HasChains<S> for MetropolisHastings<S, D, Q>
where
    S: Clone + Send,
    D: TargetDistribution<S> + Send,
    Q: ProposalDistribution<S> + Send,
{
    type Chain = MHMarkovChain<S, D, Q>;

    fn chains_mut(&mut self) -> &mut Vec<Self::Chain> {
        &mut self.chains
    }
}

impl<S, D, Q> MHMarkovChain<S, D, Q>
where
    D: TargetDistribution<S>,
    Q: ProposalDistribution<S>,
{
    /**
    Creates a new Metropolis–Hastings chain.

    # Examples

    ```rust
    use mini_montecarlo::metropolis_hastings::MHMarkovChain;
    use mini_montecarlo::proposals::GaussianProposal;

    let target = |x: &Vec<f64>| -0.5 * x[0] * x[0];
    let chain = MHMarkovChain::new(target, GaussianProposal::new(1.0).unwrap(), vec![0.0]).unwrap();
    assert_eq!(chain.current_log_density(), 0.0);

    let outside = |x: &Vec<f64>| if x[0] > 0.0 { 0.0 } else { f64::NEG_INFINITY };
    assert!(MHMarkovChain::new(outside, GaussianProposal::new(1.0).unwrap(), vec![0.0]).is_err());
    ```
    */
    pub fn new(target: D, proposal: Q, initial_state: S) -> Result<Self> {
        let current_lp = target.unnorm_log_prob(&initial_state);
        if !current_lp.is_finite() {
            return Err(McError::NonFiniteInitialState(current_lp));
        }
        let seed = thread_rng().gen::<u64>();
        Ok(Self {
            target,
            proposal,
            current: McmcSample::new(initial_state, true).with_meta("log_density", current_lp),
            current_lp,
            seed,
            rng: SmallRng::seed_from_u64(seed),
        })
    }

    pub fn set_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self.rng = SmallRng::seed_from_u64(seed);
        self
    }

    pub fn current_log_density(&self) -> f64 {
        self.current_lp
    }
}

impl<S, D, Q> MarkovChain<S> for MHMarkovChain<S, D, Q>
where
    S: Clone,
    D: TargetDistribution<S>,
    Q: ProposalDistribution<S>,
{
    /**
    Performs one Metropolis–Hastings update step.

    A candidate is drawn from the proposal and accepted with probability

    ```text
    min(1, exp(log p(cand) − log p(cur) + log q(cur | cand) − log q(cand | cur)))
    ```

    For symmetric proposals the `q` terms are skipped. A candidate with a
    non-finite log-density is rejected. With `adapt` set, the proposal is told
    the outcome so it can tune itself.
    */
    fn step(&mut self, adapt: bool) -> &McmcSample<S> {
        let candidate = self.proposal.propose(&self.current.state, &mut self.rng);
        let candidate_lp = self.target.unnorm_log_prob(&candidate);

        let accept_prob = if !candidate_lp.is_finite() {
            0.0
        } else if self.proposal.is_symmetric() {
            acceptance_probability(self.current_lp, candidate_lp, 0.0, 0.0)
        } else {
            let log_q_fwd = self.proposal.log_prob(&self.current.state, &candidate);
            let log_q_bwd = self.proposal.log_prob(&candidate, &self.current.state);
            acceptance_probability(self.current_lp, candidate_lp, log_q_fwd, log_q_bwd)
        };

        let accepted = accept_prob > 0.0 && self.rng.gen::<f64>() < accept_prob;
        if accepted {
            self.current_lp = candidate_lp;
            self.current.state = candidate;
        }
        self.current.accepted = accepted;
        self.current.metadata.insert("log_density", self.current_lp);
        self.current.metadata.insert("accept_prob", accept_prob);

        if adapt {
            self.proposal.adapt(&self.current.state, accepted);
        }
        &self.current
    }

    fn current_state(&self) -> &S {
        &self.current.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ChainRunner;
    use crate::distributions::FnGradientTarget;
    use crate::proposals::{GaussianProposal, LangevinProposal, UniformProposal};
    use crate::stats;
    use approx::assert_abs_diff_eq;
    use ndarray::Axis;
    use ndarray_stats::CorrelationExt;

    fn gaussian_2d(x: &Vec<f64>) -> f64 {
        // mean (0, 1), cov [[4, 2], [2, 3]]; precision = 1/8 * [[3, -2], [-2, 4]]
        let (a, b) = (x[0], x[1] - 1.0);
        -0.5 * (3.0 * a * a - 4.0 * a * b + 4.0 * b * b) / 8.0
    }

    fn run_gaussian_2d_test(sample_size: usize, n_chains: usize, use_progress: bool) {
        const BURNIN: usize = 2_000;
        const SEED: u64 = 42;

        let proposal = GaussianProposal::new(1.5).unwrap();
        let mut mh = MetropolisHastings::new(
            gaussian_2d as fn(&Vec<f64>) -> f64,
            proposal,
            vec![0.0, 0.0],
            n_chains,
        )
        .unwrap()
        .set_seed(SEED);

        let traces = if use_progress {
            mh.run_with_progress(sample_size / n_chains, BURNIN, 1).unwrap()
        } else {
            mh.run(sample_size / n_chains, BURNIN, 1).unwrap()
        };

        let rows: Vec<f64> = traces
            .iter()
            .flat_map(|t| t.states().flatten().copied().collect::<Vec<_>>())
            .collect();
        let stacked = ndarray::Array2::from_shape_vec((sample_size, 2), rows).unwrap();

        let mean = stacked.mean_axis(Axis(0)).unwrap();
        let cov = stacked.t().cov(1.0).unwrap();
        assert_abs_diff_eq!(mean, ndarray::arr1(&[0.0, 1.0]), epsilon = 0.3);
        assert_abs_diff_eq!(cov, ndarray::arr2(&[[4.0, 2.0], [2.0, 3.0]]), epsilon = 0.5);
    }

    #[test]
    fn test_single_1_chain() {
        run_gaussian_2d_test(20_000, 1, false);
    }

    #[test]
    fn test_4_chains() {
        run_gaussian_2d_test(40_000, 4, false);
    }

    #[test]
    fn test_progress_4_chains() {
        run_gaussian_2d_test(40_000, 4, true);
    }

    #[test]
    fn set_seed_offsets_each_chain() {
        let mh = MetropolisHastings::new(
            gaussian_2d as fn(&Vec<f64>) -> f64,
            GaussianProposal::new(1.0).unwrap(),
            vec![0.0, 0.0],
            3,
        )
        .unwrap()
        .set_seed(7);
        let seeds: Vec<u64> = mh.chains.iter().map(|c| c.seed).collect();
        assert_eq!(seeds, vec![7, 8, 9]);
    }

    #[test]
    fn chain_seeds_wrap_at_u64_max() {
        let mh = MetropolisHastings::new(
            gaussian_2d as fn(&Vec<f64>) -> f64,
            GaussianProposal::new(1.0).unwrap(),
            vec![0.0, 0.0],
            3,
        )
        .unwrap()
        .set_seed(u64::MAX);
        let seeds: Vec<u64> = mh.chains.iter().map(|c| c.seed).collect();
        assert_eq!(seeds, vec![u64::MAX, 0, 1]);
    }

    #[test]
    fn non_finite_candidates_are_rejected() {
        // Half-line target; proposals that land below zero must never be accepted.
        let target = |x: &Vec<f64>| if x[0] >= 0.0 { -x[0] } else { f64::NEG_INFINITY };
        let mut chain = MHMarkovChain::new(target, UniformProposal::new(1.0).unwrap(), vec![0.5])
            .unwrap()
            .set_seed(3);
        let trace = chain.run(2_000, 0, 1).unwrap();
        assert!(trace.states().all(|s| s[0] >= 0.0));
        assert!(trace.n_accepted < trace.n_proposed);
        // Exponential(1) mean.
        let xs = trace.column(0);
        assert_abs_diff_eq!(stats::mean(&xs).unwrap(), 1.0, epsilon = 0.25);
    }

    #[test]
    fn langevin_proposal_uses_hastings_correction() {
        let grad_target = FnGradientTarget::new(
            |x: &[f64]| -0.5 * x[0] * x[0],
            |x: &[f64], g: &mut [f64]| g[0] = -x[0],
        );
        let target = |x: &Vec<f64>| -0.5 * x[0] * x[0];
        let proposal = LangevinProposal::new(grad_target, 1.2).unwrap();
        let mut chain = MHMarkovChain::new(target, proposal, vec![3.0])
            .unwrap()
            .set_seed(5);
        let trace = chain.run(20_000, 1_000, 1).unwrap();
        let xs = trace.column(0);
        assert_abs_diff_eq!(stats::mean(&xs).unwrap(), 0.0, epsilon = 0.1);
        assert_abs_diff_eq!(stats::variance(&xs).unwrap(), 1.0, epsilon = 0.15);
    }

    #[test]
    fn adaptive_proposal_tunes_during_burn_in_only() {
        let target = |x: &Vec<f64>| -0.5 * x[0] * x[0] / 25.0;
        let proposal = GaussianProposal::adaptive(0.1, 200).unwrap();
        let mut chain = MHMarkovChain::new(target, proposal, vec![0.0])
            .unwrap()
            .set_seed(9);
        chain.run(0, 5_000, 1).unwrap();
        let tuned = chain.proposal.std(0);
        assert!(tuned > 1.0, "std after burn-in {tuned}");
        chain.run(1_000, 0, 1).unwrap();
        assert_eq!(chain.proposal.std(0), tuned);
    }

    #[test]
    fn records_log_density() {
        let target = |x: &Vec<f64>| -0.5 * x[0] * x[0];
        let mut chain = MHMarkovChain::new(target, GaussianProposal::new(1.0).unwrap(), vec![0.0])
            .unwrap()
            .set_seed(1);
        let sample = chain.step(false).clone();
        let lp = sample.log_density().unwrap();
        assert_abs_diff_eq!(lp, -0.5 * sample.state[0] * sample.state[0]);
        assert!(sample.metadata.contains_key("accept_prob"));
    }
}
