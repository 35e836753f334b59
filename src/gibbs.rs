/*!
# Gibbs Sampler

Cycles through the coordinates of a state vector, redrawing each one from its
exact full conditional `p(x_i | x_{-i})` supplied through [`Conditional`].
Every move is accepted by construction.

```rust
use mini_montecarlo::core::MarkovChain;
use mini_montecarlo::distributions::Conditional;
use mini_montecarlo::gibbs::GibbsMarkovChain;
use rand::{Rng, RngCore};
use rand_distr::StandardNormal;

/// Independent standard normals in every coordinate.
#[derive(Clone)]
struct Independent;

impl Conditional<f64> for Independent {
    fn sample(&self, _i: usize, _given: &[f64], rng: &mut dyn RngCore) -> f64 {
        rng.sample(StandardNormal)
    }
}

let mut chain = GibbsMarkovChain::new(Independent, vec![0.0; 3]).set_seed(1);
let trace = chain.run(100, 10, 1).unwrap();
assert_eq!(trace.acceptance_rate(), 1.0);
```
*/

use rand::rngs::SmallRng;
use rand::{thread_rng, Rng, SeedableRng};

use crate::core::{HasChains, MarkovChain, McmcSample};
use crate::distributions::Conditional;

#[derive(Debug, Clone)]
pub struct GibbsMarkovChain<S, D> {
    /// The distribution that provides conditional samples.
    pub target: D,
    current: McmcSample<Vec<S>>,
    pub seed: u64,
    rng: SmallRng,
}

impl<S, D> GibbsMarkovChain<S, D>
where
    D: Conditional<S>,
{
    /// Creates a new chain with a given target distribution and initial state.
    pub fn new(target: D, initial_state: Vec<S>) -> Self {
        let seed = thread_rng().gen::<u64>();
        Self {
            target,
            current: McmcSample::new(initial_state, true),
            seed,
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    pub fn set_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self.rng = SmallRng::seed_from_u64(seed);
        self
    }
}

impl<S, D: Conditional<S>> MarkovChain<Vec<S>> for GibbsMarkovChain<S, D> {
    /// One full sweep: coordinate `i` is redrawn given the already updated
    /// coordinates `0..i` and the old coordinates `i+1..`.
    fn step(&mut self, _adapt: bool) -> &McmcSample<Vec<S>> {
        for i in 0..self.current.state.len() {
            let value = self.target.sample(i, &self.current.state, &mut self.rng);
            self.current.state[i] = value;
        }
        self.current.accepted = true;
        &self.current
    }

    fn current_state(&self) -> &Vec<S> {
        &self.current.state
    }
}

/// Multiple independent Gibbs chains started from the same state.
#[derive(Debug, Clone)]
pub struct GibbsSampler<S, D> {
    pub chains: Vec<GibbsMarkovChain<S, D>>,
    pub seed: u64,
}

impl<S, D> GibbsSampler<S, D>
where
    D: Conditional<S> + Clone,
    S: Clone,
{
    pub fn new(target: D, initial_state: Vec<S>, n_chains: usize) -> Self {
        let seed = thread_rng().gen::<u64>();
        let chains = (0..n_chains)
            .map(|_| GibbsMarkovChain::new(target.clone(), initial_state.clone()))
            .collect();
        Self { chains, seed }
    }

    /// Sets a new seed; chain `i` is reseeded with `seed + i`.
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

impl<S, D> HasChains<Vec<S>> for GibbsSampler<S, D>
where
    D: Conditional<S> + Send,
    S: Send,
{
    type Chain = GibbsMarkovChain<S, D>;

    fn chains_mut(&mut self) -> &mut Vec<Self::Chain> {
        &mut self.chains
    }
}
