//! # mini-montecarlo
//!
//! Monte Carlo inference and decision making: particle filtering, sequential
//! Monte Carlo with evidence estimation, importance sampling (plain and with
//! an adaptive mixture proposal), Markov chain Monte Carlo
//! (Metropolis-Hastings, Gibbs, Hamiltonian) and Monte Carlo tree search.
//!
//! Every algorithm owns a seeded `SmallRng`; `set_seed` makes a run
//! reproducible bit for bit. Models, proposals and policies receive the
//! generator as `&mut dyn RngCore`.
//!
//! ## Example
//!
//! ```rust
//! use mini_montecarlo::distributions::Gaussian;
//! use mini_montecarlo::particle_filter::{
//!     LinearGaussianObservation, LinearGaussianSystem, ParticleFilter, ParticleFilterConfig,
//! };
//!
//! let system = LinearGaussianSystem::random_walk(0.0, 0.1).unwrap();
//! let observation = LinearGaussianObservation::new(1.0, 0.2).unwrap();
//! let mut pf = ParticleFilter::new(ParticleFilterConfig::with_particles(500))
//!     .unwrap()
//!     .set_seed(42);
//! let mut particles = pf.initialize(&Gaussian::standard()).unwrap();
//! for y in [0.1, 0.15, 0.2] {
//!     pf.step(&mut particles, &y, &system, &observation).unwrap();
//! }
//! let mean = particles.weighted_mean(|x| *x);
//! assert!((mean - 0.2).abs() < 0.3);
//! ```

pub mod core;
pub mod distributions;
pub mod error;
pub mod gibbs;
pub mod hmc;
pub mod importance;
pub mod mcts;
pub mod metropolis_hastings;
pub mod particle_filter;
pub mod proposals;
pub mod resampling;
pub mod smc;
pub mod stats;
pub mod weights;

pub use error::{McError, Result};
