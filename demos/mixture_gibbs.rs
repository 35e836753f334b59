//! Gibbs sampling from a two-component Gaussian mixture over the state [x, z],
//! where z ∈ {0, 1} is the latent component label.

use mini_montecarlo::core::ChainRunner;
use mini_montecarlo::distributions::Conditional;
use mini_montecarlo::gibbs::GibbsSampler;
use mini_montecarlo::stats;
use rand::{Rng, RngCore};
use rand_distr::StandardNormal;
use std::error::Error;
use std::f64::consts::PI;

// p(x, z = 0) = π0 N(x; mu0, sigma0²),  p(x, z = 1) = (1 - π0) N(x; mu1, sigma1²)
#[derive(Clone)]
struct MixtureConditional {
    mu0: f64,
    sigma0: f64,
    mu1: f64,
    sigma1: f64,
    pi0: f64,
}

fn normal_pdf(x: f64, mu: f64, sigma: f64) -> f64 {
    let var = sigma * sigma;
    (-(x - mu).powi(2) / (2.0 * var)).exp() / (2.0 * PI * var).sqrt()
}

impl Conditional<f64> for MixtureConditional {
    fn sample(&self, i: usize, given: &[f64], rng: &mut dyn RngCore) -> f64 {
        if i == 0 {
            let z: f64 = rng.sample(StandardNormal);
            if given[1] < 0.5 {
                self.mu0 + self.sigma0 * z
            } else {
                self.mu1 + self.sigma1 * z
            }
        } else {
            let x = given[0];
            let p0 = self.pi0 * normal_pdf(x, self.mu0, self.sigma0);
            let p1 = (1.0 - self.pi0) * normal_pdf(x, self.mu1, self.sigma1);
            let total = p0 + p1;
            let prob_z1 = if total > 0.0 { p1 / total } else { 0.5 };
            if rng.gen::<f64>() < prob_z1 {
                1.0
            } else {
                0.0
            }
        }
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let conditional = MixtureConditional {
        mu0: -2.0,
        sigma0: 1.0,
        mu1: 3.0,
        sigma1: 1.5,
        pi0: 0.25,
    };

    const N_CHAINS: usize = 4;
    const BURNIN: usize = 1_000;
    const N_SAMPLES: usize = 5_000;

    let mut sampler = GibbsSampler::new(conditional, vec![0.0, 0.0], N_CHAINS).set_seed(42);
    let traces = sampler.run_with_progress(N_SAMPLES, BURNIN, 1)?;

    let xs: Vec<f64> = traces.iter().flat_map(|t| t.column(0)).collect();
    let zs: Vec<f64> = traces.iter().flat_map(|t| t.column(1)).collect();
    let (lo, hi) = stats::credible_interval(&xs, 0.9)?;
    println!("Generated {} samples", xs.len());
    println!(
        "E[x] = {:.3} (exact {:.3}), P(z = 1) = {:.3} (exact 0.75)",
        stats::mean(&xs)?,
        0.25 * -2.0 + 0.75 * 3.0,
        stats::mean(&zs)?
    );
    println!("90% interval for x: [{lo:.2}, {hi:.2}]");
    println!("R-hat: {:?}", mini_montecarlo::core::rhat(&traces)?);
    Ok(())
}
