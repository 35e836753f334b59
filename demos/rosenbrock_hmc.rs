//! HMC on the Rosenbrock density (a = 1, b = 100):
//!   log π(x, y) ∝ -[(a - x)² + b (y - x²)²]

use mini_montecarlo::core::ChainRunner;
use mini_montecarlo::distributions::GradientTarget;
use mini_montecarlo::hmc::{HmcConfig, HMC};
use mini_montecarlo::stats;
use std::error::Error;

#[derive(Clone, Copy)]
struct Rosenbrock {
    a: f64,
    b: f64,
}

impl GradientTarget for Rosenbrock {
    fn logp_and_grad(&self, position: &[f64], grad: &mut [f64]) -> f64 {
        let (x, y) = (position[0], position[1]);
        let r = y - x * x;
        grad[0] = 2.0 * (self.a - x) + 4.0 * self.b * x * r;
        grad[1] = -2.0 * self.b * r;
        -((self.a - x).powi(2) + self.b * r * r)
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let config = HmcConfig {
        step_size: 0.01,
        n_leapfrog: 50,
    };
    let mut hmc = HMC::new(Rosenbrock { a: 1.0, b: 100.0 }, config, vec![0.0, 0.0], 4)?
        .set_seed(42);
    let traces = hmc.run_with_progress(2_000, 500, 1)?;

    for (i, trace) in traces.iter().enumerate() {
        println!("chain {i}: acceptance rate {:.2}", trace.acceptance_rate());
    }
    for d in 0..2 {
        let xs: Vec<f64> = traces.iter().flat_map(|t| t.column(d)).collect();
        println!(
            "dim {d}: mean {:.3}, ESS (chain 0) {:.0}",
            stats::mean(&xs)?,
            stats::effective_sample_size(&traces[0].column(d))?
        );
    }
    Ok(())
}
