//! A small tour of the crate: tracks a random walk with a particle filter,
//! samples a correlated 2D Gaussian with Metropolis-Hastings and picks a move
//! in a tiny take-away game with MCTS.
//!
//! Set `RUST_LOG=debug` to see resampling and chain summaries.

use mini_montecarlo::core::ChainRunner;
use mini_montecarlo::distributions::Gaussian;
use mini_montecarlo::mcts::{Domain, Mcts, MctsConfig, RandomRollout};
use mini_montecarlo::metropolis_hastings::MetropolisHastings;
use mini_montecarlo::particle_filter::{
    LinearGaussianObservation, LinearGaussianSystem, ParticleFilter, ParticleFilterConfig,
    SystemModel,
};
use mini_montecarlo::proposals::GaussianProposal;
use mini_montecarlo::stats;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use std::error::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

const SEED: u64 = 42;

/// Take one, two or three tokens; whoever takes the last token wins.
struct TakeAway;

impl Domain for TakeAway {
    /// Tokens left and whether the root player is to move.
    type State = (u32, bool);
    type Action = u32;

    fn legal_actions(&self, state: &(u32, bool)) -> Vec<u32> {
        (1..=3).filter(|k| *k <= state.0).collect()
    }

    fn apply(&self, state: &(u32, bool), action: &u32) -> (u32, bool) {
        (state.0 - action, !state.1)
    }

    fn is_terminal(&self, state: &(u32, bool)) -> bool {
        state.0 == 0
    }

    fn outcome(&self, state: &(u32, bool)) -> f64 {
        if state.1 {
            -1.0
        } else {
            1.0
        }
    }
}

fn particle_filter_demo() -> Result<(), Box<dyn Error>> {
    const STEPS: usize = 30;
    let system = LinearGaussianSystem::random_walk(0.0, 0.1)?;
    let observation = LinearGaussianObservation::new(1.0, 0.2)?;

    let mut rng = SmallRng::seed_from_u64(SEED);
    let mut truth = 0.0;
    let mut pf = ParticleFilter::new(ParticleFilterConfig::with_particles(1_000))?.set_seed(SEED);
    let mut particles = pf.initialize(&Gaussian::standard())?;

    let mut sq_err = 0.0;
    for t in 0..STEPS {
        truth = system.propagate(&truth, &mut rng);
        let noise: f64 = rng.sample(StandardNormal);
        let y = truth + 0.2 * noise;
        let report = pf.step(&mut particles, &y, &system, &observation)?;
        let estimate = particles.weighted_mean(|x| *x);
        sq_err += (estimate - truth).powi(2);
        info!(
            t,
            truth,
            estimate,
            ess = report.ess,
            resampled = report.resampled,
            "particle filter"
        );
    }
    info!(rmse = (sq_err / STEPS as f64).sqrt(), "particle filter done");
    Ok(())
}

fn metropolis_hastings_demo() -> Result<(), Box<dyn Error>> {
    const N_CHAINS: usize = 4;
    // N(0, [[2, 1], [1, 2]]); precision 1/3 * [[2, -1], [-1, 2]]
    let target = |x: &Vec<f64>| -(2.0 * x[0] * x[0] - 2.0 * x[0] * x[1] + 2.0 * x[1] * x[1]) / 6.0;
    let proposal = GaussianProposal::new(1.2)?;
    let mut mh = MetropolisHastings::new(target, proposal, vec![5.0, -5.0], N_CHAINS)?.set_seed(SEED);

    let traces = mh.run_with_progress(10_000, 1_000, 1)?;
    let rhat = mini_montecarlo::core::rhat(&traces)?;
    for d in 0..2 {
        let xs: Vec<f64> = traces.iter().flat_map(|t| t.column(d)).collect();
        let (lo, hi) = stats::credible_interval(&xs, 0.95)?;
        info!(
            dim = d,
            mean = stats::mean(&xs)?,
            var = stats::variance(&xs)?,
            ess = stats::effective_sample_size(&traces[0].column(d))?,
            lo,
            hi,
            rhat = rhat[d],
            "metropolis-hastings"
        );
    }
    for (i, t) in traces.iter().enumerate() {
        info!(chain = i, acceptance = t.acceptance_rate(), "metropolis-hastings");
    }
    Ok(())
}

fn mcts_demo() -> Result<(), Box<dyn Error>> {
    let root = (10, true);
    let mut mcts = Mcts::new(TakeAway, RandomRollout, MctsConfig::default())?.set_seed(SEED);
    let tree = mcts.search(root, 5_000)?;
    for (action, id) in tree.node(tree.root()).children() {
        let child = tree.node(id);
        info!(
            action,
            visits = child.visits(),
            mean = child.mean_value(),
            "mcts root child"
        );
    }
    // From 10 tokens, taking 2 leaves a multiple of four.
    info!(best = tree.best_action()?, "mcts");

    let merged = mcts.search_root_parallel(root, 8_000, 4)?;
    info!(best = merged.best_action()?, "mcts root parallel");
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    particle_filter_demo()?;
    metropolis_hastings_demo()?;
    mcts_demo()?;
    Ok(())
}
