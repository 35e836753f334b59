/*!
Shared machinery for Markov chain samplers.

Every sampler in this crate is a [`MarkovChain`]: a single `step` produces an
[`McmcSample`] holding the new state, whether the transition was an accepted
move and sampler-specific metadata. The chain driver [`run_chain`] turns a
chain into a [`Trace`]: it runs `burn_in + n_samples * thin` iterations,
discards the first `burn_in`, keeps every `thin`-th sample thereafter and
counts proposals and acceptances over all iterations.

Samplers that own several independent chains implement [`HasChains`] and get
[`ChainRunner::run`] and [`ChainRunner::run_with_progress`] for free, which
run the chains in parallel with rayon.
*/

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use ndarray::Array2;
use rayon::prelude::*;
use std::collections::BTreeMap;

use crate::error::{McError, Result};
use crate::stats;

/// One retained state of a Markov chain.
#[derive(Debug, Clone, PartialEq)]
pub struct McmcSample<S> {
    pub state: S,
    /// Whether the transition that produced this state was an accepted move.
    pub accepted: bool,
    pub metadata: BTreeMap<&'static str, f64>,
}

impl<S> McmcSample<S> {
    pub fn new(state: S, accepted: bool) -> Self {
        Self {
            state,
            accepted,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_meta(mut self, key: &'static str, value: f64) -> Self {
        self.metadata.insert(key, value);
        self
    }

    /// The unnormalized log target density at `state`, when the sampler records it.
    pub fn log_density(&self) -> Option<f64> {
        self.metadata.get("log_density").copied()
    }
}

/// Retained samples of one chain plus proposal statistics over every iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct Trace<S> {
    pub samples: Vec<McmcSample<S>>,
    pub n_proposed: usize,
    pub n_accepted: usize,
}

impl<S> Trace<S> {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn acceptance_rate(&self) -> f64 {
        stats::acceptance_rate(self.n_accepted, self.n_proposed)
    }

    pub fn states(&self) -> impl Iterator<Item = &S> {
        self.samples.iter().map(|s| &s.state)
    }
}

impl Trace<Vec<f64>> {
    /// Draws of coordinate `dim` in sample order.
    pub fn column(&self, dim: usize) -> Vec<f64> {
        self.states().map(|s| s[dim]).collect()
    }

    /// Samples as an `(n_samples, dim)` array.
    pub fn to_array(&self) -> Result<Array2<f64>> {
        let dim = self.samples.first().map_or(0, |s| s.state.len());
        let flat: Vec<f64> = self.states().flatten().copied().collect();
        Array2::from_shape_vec((self.samples.len(), dim), flat).map_err(|_| McError::SizeMismatch {
            expected: self.samples.len() * dim,
            found: self.states().map(Vec::len).sum(),
        })
    }
}

/**
The acceptance probability of the Metropolis-Hastings rule,

```text
min(1, exp(lp_cand − lp_cur + log_q_bwd − log_q_fwd))
```

where `log_q_fwd = log q(cand | cur)` and `log_q_bwd = log q(cur | cand)`.
Any NaN in the ratio (e.g. `∞ − ∞`) yields 0, so the candidate is rejected.

```rust
use mini_montecarlo::core::acceptance_probability;

assert_eq!(acceptance_probability(-1.0, 0.0, 0.0, 0.0), 1.0);
assert!((acceptance_probability(0.0, -1.0, 0.0, 0.0) - (-1f64).exp()).abs() < 1e-12);
assert_eq!(acceptance_probability(0.0, f64::NEG_INFINITY, 0.0, 0.0), 0.0);
```
*/
pub fn acceptance_probability(lp_cur: f64, lp_cand: f64, log_q_fwd: f64, log_q_bwd: f64) -> f64 {
    let log_ratio = (lp_cand - lp_cur) + (log_q_bwd - log_q_fwd);
    if log_ratio.is_nan() {
        0.0
    } else if log_ratio >= 0.0 {
        1.0
    } else {
        log_ratio.exp()
    }
}

pub trait MarkovChain<S> {
    /// Does one iteration of the chain. `adapt` is true during burn-in and
    /// allows the sampler to tune itself from the transition it just made.
    fn step(&mut self, adapt: bool) -> &McmcSample<S>;

    /// The current state without stepping.
    fn current_state(&self) -> &S;

    /// See [`run_chain`].
    fn run(&mut self, n_samples: usize, burn_in: usize, thin: usize) -> Result<Trace<S>>
    where
        Self: Sized,
        S: Clone,
    {
        run_chain(self, n_samples, burn_in, thin)
    }
}

fn drive<S, M>(
    chain: &mut M,
    n_samples: usize,
    burn_in: usize,
    thin: usize,
    mut tick: impl FnMut(),
) -> Result<Trace<S>>
where
    M: MarkovChain<S>,
    S: Clone,
{
    if thin == 0 {
        return Err(McError::InvalidConfig("thin must be at least 1".to_string()));
    }
    let mut trace = Trace {
        samples: Vec::with_capacity(n_samples),
        n_proposed: 0,
        n_accepted: 0,
    };
    for i in 0..burn_in + n_samples * thin {
        let in_burn_in = i < burn_in;
        let sample = chain.step(in_burn_in);
        trace.n_proposed += 1;
        if sample.accepted {
            trace.n_accepted += 1;
        }
        if !in_burn_in && (i - burn_in + 1) % thin == 0 {
            trace.samples.push(sample.clone());
        }
        tick();
    }
    Ok(trace)
}

/// Runs `burn_in + n_samples * thin` iterations of `chain` and returns the
/// `n_samples` retained samples.
///
/// # Errors
///
/// [`McError::InvalidConfig`] if `thin == 0`.
pub fn run_chain<S, M>(chain: &mut M, n_samples: usize, burn_in: usize, thin: usize) -> Result<Trace<S>>
where
    M: MarkovChain<S>,
    S: Clone,
{
    drive(chain, n_samples, burn_in, thin, || {})
}

/// [`run_chain`] that advances `pb` once per iteration.
pub fn run_chain_with_progress<S, M>(
    chain: &mut M,
    n_samples: usize,
    burn_in: usize,
    thin: usize,
    pb: &ProgressBar,
) -> Result<Trace<S>>
where
    M: MarkovChain<S>,
    S: Clone,
{
    pb.set_length((burn_in + n_samples * thin) as u64);
    drive(chain, n_samples, burn_in, thin, || pb.inc(1))
}

/// A trait for "anything that owns multiple MarkovChains".
pub trait HasChains<S> {
    type Chain: MarkovChain<S> + Send;

    fn chains_mut(&mut self) -> &mut Vec<Self::Chain>;
}

pub trait ChainRunner<S>: HasChains<S>
where
    S: Clone + Send,
{
    /// Runs all chains in parallel and returns one trace per chain.
    fn run(&mut self, n_samples: usize, burn_in: usize, thin: usize) -> Result<Vec<Trace<S>>> {
        let traces = self
            .chains_mut()
            .par_iter_mut()
            .map(|chain| run_chain(chain, n_samples, burn_in, thin))
            .collect::<Result<Vec<_>>>()?;
        log_summary(&traces);
        Ok(traces)
    }

    fn run_with_progress(
        &mut self,
        n_samples: usize,
        burn_in: usize,
        thin: usize,
    ) -> Result<Vec<Trace<S>>> {
        let multi = MultiProgress::new();
        let pb_style = ProgressStyle::default_bar()
            .template("{prefix} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-");

        let traces = self
            .chains_mut()
            .par_iter_mut()
            .enumerate()
            .map(|(i, chain)| {
                let pb = multi.add(ProgressBar::new(0));
                pb.set_prefix(format!("Chain {i}"));
                pb.set_style(pb_style.clone());
                let trace = run_chain_with_progress(chain, n_samples, burn_in, thin, &pb);
                pb.finish_with_message("Done!");
                trace
            })
            .collect::<Result<Vec<_>>>()?;
        log_summary(&traces);
        Ok(traces)
    }
}

impl<S: Clone + Send, T: HasChains<S>> ChainRunner<S> for T {}

fn log_summary<S>(traces: &[Trace<S>]) {
    for (i, trace) in traces.iter().enumerate() {
        tracing::debug!(
            chain = i,
            samples = trace.len(),
            acceptance_rate = trace.acceptance_rate(),
            "chain finished"
        );
    }
}

/// Split-free potential scale reduction of each coordinate across chains.
pub fn rhat(traces: &[Trace<Vec<f64>>]) -> Result<ndarray::Array1<f64>> {
    let chains: Vec<Vec<Vec<f64>>> = traces
        .iter()
        .map(|t| t.states().cloned().collect())
        .collect();
    stats::rhat(&chains)
}
