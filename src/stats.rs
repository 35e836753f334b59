//! Summary statistics and post-hoc MCMC diagnostics.
//!
//! Everything here operates on finished sample sequences: sample moments,
//! FFT-based autocorrelation, the autocorrelation effective sample size,
//! order-statistic credible intervals and the potential scale reduction
//! factor (R-hat) across independent chains.

use ndarray::prelude::*;
use ndarray_stats::QuantileExt;
use num_traits::{Float, ToPrimitive};
use rustfft::num_complex::Complex;
use rustfft::FftPlanner;

use crate::error::{McError, Result};

/// Arithmetic mean of `xs`.
pub fn mean<T: ToPrimitive>(xs: &[T]) -> Result<f64> {
    if xs.is_empty() {
        return Err(McError::EmptySample);
    }
    let sum: f64 = xs.iter().filter_map(|x| x.to_f64()).sum();
    Ok(sum / xs.len() as f64)
}

/// Unbiased sample variance of `xs`; needs at least two values.
pub fn variance<T: ToPrimitive>(xs: &[T]) -> Result<f64> {
    if xs.len() < 2 {
        return Err(McError::EmptySample);
    }
    let m = mean(xs)?;
    let ss: f64 = xs
        .iter()
        .filter_map(|x| x.to_f64())
        .map(|x| (x - m) * (x - m))
        .sum();
    Ok(ss / (xs.len() - 1) as f64)
}

/// Fraction of accepted proposals; zero when nothing was proposed.
pub fn acceptance_rate(accepted: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        accepted as f64 / total as f64
    }
}

/// Normalized autocorrelation function of `xs` for lags `0..xs.len()`.
///
/// Computed with a zero-padded FFT, so the cost is `O(n log n)`. Lag 0 is
/// always 1; a constant series yields `[1, 0, 0, ...]`.
pub fn autocorrelation<T: ToPrimitive>(xs: &[T]) -> Result<Vec<f64>> {
    let n = xs.len();
    let m = mean(xs)?;
    let padded_len = (2 * n).next_power_of_two();

    let mut buffer: Vec<Complex<f64>> = xs
        .iter()
        .map(|x| Complex::new(x.to_f64().unwrap_or(m) - m, 0.0))
        .chain(std::iter::repeat(Complex::new(0.0, 0.0)))
        .take(padded_len)
        .collect();

    let mut planner = FftPlanner::<f64>::new();
    planner.plan_fft_forward(padded_len).process(&mut buffer);
    buffer
        .iter_mut()
        .for_each(|c| *c = Complex::new(c.norm_sqr(), 0.0));
    planner.plan_fft_inverse(padded_len).process(&mut buffer);

    let r0 = buffer[0].re;
    if r0 <= f64::EPSILON * n as f64 {
        let mut acf = vec![0.0; n];
        acf[0] = 1.0;
        return Ok(acf);
    }
    Ok(buffer[..n].iter().map(|c| c.re / r0).collect())
}

/// Effective sample size of a correlated sequence.
///
/// Uses Geyer's initial positive sequence: autocorrelations are summed in
/// consecutive pairs `ρ(2k) + ρ(2k+1)` until a pair turns non-positive, and
/// `ESS = n / (1 + 2 Σ ρ(t))` over the lags that were kept.
///
/// ```rust
/// use mini_montecarlo::stats::effective_sample_size;
///
/// let alternating: Vec<f64> = (0..1000).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
/// assert!(effective_sample_size(&alternating).unwrap() >= 1.0);
/// ```
pub fn effective_sample_size<T: ToPrimitive>(xs: &[T]) -> Result<f64> {
    let n = xs.len();
    let acf = autocorrelation(xs)?;
    if n < 4 {
        return Ok(n as f64);
    }

    let mut tau = -1.0;
    let mut k = 0;
    while 2 * k + 1 < n {
        let pair = acf[2 * k] + acf[2 * k + 1];
        if pair <= 0.0 {
            break;
        }
        tau += 2.0 * pair;
        k += 1;
    }
    let tau = tau.max(1.0 / n as f64);
    Ok((n as f64 / tau).min(n as f64 * (n as f64).log10().max(1.0)))
}

/// Equal-tailed credible interval containing `mass` of the samples.
///
/// The bounds are the order statistics at ranks `⌊α/2·(n−1)⌋` and
/// `⌈(1−α/2)·(n−1)⌉` with `α = 1 − mass`. NaN samples are rejected.
pub fn credible_interval<T: Float>(samples: &[T], mass: f64) -> Result<(T, T)> {
    if samples.is_empty() {
        return Err(McError::EmptySample);
    }
    if !(mass > 0.0 && mass < 1.0) {
        return Err(McError::InvalidConfig(format!(
            "credible mass must lie in (0, 1), got {mass}"
        )));
    }
    if samples.iter().any(|x| x.is_nan()) {
        return Err(McError::InvalidConfig(
            "credible interval of a sample containing NaN".into(),
        ));
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let alpha = 1.0 - mass;
    let last = (sorted.len() - 1) as f64;
    let lo = ((alpha / 2.0) * last).floor() as usize;
    let hi = (((1.0 - alpha / 2.0) * last).ceil() as usize).min(sorted.len() - 1);
    Ok((sorted[lo], sorted[hi]))
}

/// Streaming potential scale reduction factor across chains.
///
/// Feed one `[n_chains, n_params]` slab of draws per iteration with
/// [`RhatMulti::step`], then read per-parameter R-hat with [`RhatMulti::all`].
#[derive(Debug, Clone, PartialEq)]
pub struct RhatMulti {
    n: usize,
    mean: Array2<f64>,    // n_chains x n_params
    mean_sq: Array2<f64>, // n_chains x n_params
}

impl RhatMulti {
    pub fn new(n_chains: usize, n_params: usize) -> Self {
        Self {
            n: 0,
            mean: Array2::<f64>::zeros((n_chains, n_params)),
            mean_sq: Array2::<f64>::zeros((n_chains, n_params)),
        }
    }

    /// Adds one draw per chain.
    pub fn step(&mut self, draws: ArrayView2<f64>) -> Result<()> {
        if draws.dim() != self.mean.dim() {
            return Err(McError::SizeMismatch {
                expected: self.mean.len(),
                found: draws.len(),
            });
        }
        self.n += 1;
        let n = self.n as f64;
        self.mean = (&self.mean * (n - 1.0) + &draws) / n;
        self.mean_sq = (&self.mean_sq * (n - 1.0) + &draws.mapv(|x| x * x)) / n;
        Ok(())
    }

    /// R-hat for every parameter.
    pub fn all(&self) -> Result<Array1<f64>> {
        let n_chains = self.mean.nrows();
        if n_chains < 2 || self.n < 2 {
            return Err(McError::InvalidConfig(
                "R-hat needs at least two chains with two draws each".into(),
            ));
        }
        let n = self.n as f64;
        let grand_mean = self.mean.mean_axis(Axis(0)).ok_or(McError::EmptySample)?;
        let between = (&self.mean - &grand_mean.insert_axis(Axis(0)))
            .mapv(|x| x * x)
            .sum_axis(Axis(0))
            * (n / (n_chains as f64 - 1.0));
        let sm2 = (&self.mean_sq - &self.mean.mapv(|x| x * x)) * (n / (n - 1.0));
        let within = sm2.mean_axis(Axis(0)).ok_or(McError::EmptySample)?;
        let var = &within * ((n - 1.0) / n) + &between * (1.0 / n);
        Ok((var / within).mapv(f64::sqrt))
    }

    /// Largest R-hat over all parameters.
    pub fn max(&self) -> Result<f64> {
        let all = self.all()?;
        all.max()
            .map(|m| *m)
            .map_err(|e| McError::InvalidConfig(format!("R-hat reduction failed: {e}")))
    }
}

/// R-hat per parameter for chains given as `chains[chain][draw][param]`.
///
/// Chains are truncated to the length of the shortest one.
pub fn rhat(chains: &[Vec<Vec<f64>>]) -> Result<Array1<f64>> {
    let n_draws = chains.iter().map(Vec::len).min().ok_or(McError::EmptySample)?;
    let n_params = chains
        .first()
        .and_then(|c| c.first())
        .map(Vec::len)
        .ok_or(McError::EmptySample)?;
    let mut psr = RhatMulti::new(chains.len(), n_params);
    let mut slab = Array2::<f64>::zeros((chains.len(), n_params));
    for t in 0..n_draws {
        for (c, chain) in chains.iter().enumerate() {
            let draw = &chain[t];
            if draw.len() != n_params {
                return Err(McError::SizeMismatch {
                    expected: n_params,
                    found: draw.len(),
                });
            }
            slab.row_mut(c).assign(&ArrayView1::from(draw.as_slice()));
        }
        psr.step(slab.view())?;
    }
    psr.all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};
    use rand_distr::StandardNormal;

    #[test]
    fn moments() {
        let xs = [1.0, 2.0, 3.0, 4.0];
        assert_abs_diff_eq!(mean(&xs).unwrap(), 2.5);
        assert_abs_diff_eq!(variance(&xs).unwrap(), 5.0 / 3.0, epsilon = 1e-12);
        assert_eq!(mean::<f64>(&[]), Err(McError::EmptySample));
    }

    #[test]
    fn autocorrelation_matches_direct_sum() {
        let xs = [1.0, 3.0, 2.0, 5.0, 4.0, 4.5, 2.0];
        let acf = autocorrelation(&xs).unwrap();
        let m = xs.iter().sum::<f64>() / xs.len() as f64;
        let c = |lag: usize| -> f64 {
            (0..xs.len() - lag)
                .map(|i| (xs[i] - m) * (xs[i + lag] - m))
                .sum()
        };
        for lag in 0..xs.len() {
            assert_abs_diff_eq!(acf[lag], c(lag) / c(0), epsilon = 1e-10);
        }
    }

    #[test]
    fn constant_series_has_trivial_acf() {
        let acf = autocorrelation(&[2.0; 10]).unwrap();
        assert_eq!(acf[0], 1.0);
        assert!(acf[1..].iter().all(|r| *r == 0.0));
    }

    #[test]
    fn ess_of_iid_is_close_to_n() {
        let mut rng = SmallRng::seed_from_u64(7);
        let xs: Vec<f64> = (0..4000).map(|_| rng.sample(StandardNormal)).collect();
        let ess = effective_sample_size(&xs).unwrap();
        assert!(ess > 3000.0 && ess < 5000.0, "ess = {ess}");
    }

    #[test]
    fn ess_of_ar1_is_reduced() {
        let mut rng = SmallRng::seed_from_u64(8);
        let mut x = 0.0;
        let xs: Vec<f64> = (0..4000)
            .map(|_| {
                let z: f64 = rng.sample(StandardNormal);
                x = 0.9 * x + z;
                x
            })
            .collect();
        // Theoretical ESS for AR(1) with phi=0.9 is n * (1 - phi) / (1 + phi) ≈ 210.
        let ess = effective_sample_size(&xs).unwrap();
        assert!(ess > 100.0 && ess < 450.0, "ess = {ess}");
    }

    #[test]
    fn credible_interval_uses_order_statistics() {
        let xs: Vec<f64> = (0..101).map(f64::from).collect();
        let (lo, hi) = credible_interval(&xs, 0.9).unwrap();
        assert_eq!((lo, hi), (5.0, 95.0));
        assert!(credible_interval(&xs, 1.0).is_err());
        assert!(credible_interval::<f64>(&[], 0.5).is_err());
    }

    #[test]
    fn rhat_of_identical_chains_is_below_one() {
        let chain: Vec<Vec<f64>> = (0..50).map(|i| vec![(i % 5) as f64]).collect();
        let r = rhat(&[chain.clone(), chain]).unwrap();
        assert!(r[0] < 1.0);
    }

    #[test]
    fn rhat_detects_separated_chains() {
        let a: Vec<Vec<f64>> = (0..50).map(|i| vec![(i % 3) as f64]).collect();
        let b: Vec<Vec<f64>> = (0..50).map(|i| vec![10.0 + (i % 3) as f64]).collect();
        let r = rhat(&[a, b]).unwrap();
        assert!(r[0] > 2.0);
    }

    #[test]
    fn rhat_streaming_reference_values() {
        let mut psr = RhatMulti::new(3, 4);
        psr.step(
            arr2(&[
                [0.0, 1.0, 0.0, 1.0],
                [1.0, 2.0, 0.0, 2.0],
                [0.0, 0.0, 0.0, 2.0],
            ])
            .view(),
        )
        .unwrap();
        psr.step(
            arr2(&[
                [1.0, 2.0, 2.0, 0.0],
                [1.0, 1.0, 1.0, 1.0],
                [0.0, 1.0, 0.0, 0.0],
            ])
            .view(),
        )
        .unwrap();
        let expected = array![std::f64::consts::SQRT_2, 1.08012345, 0.89442719, 0.8660254];
        let r = psr.all().unwrap();
        for (a, b) in r.iter().zip(expected.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-7);
        }
        assert_abs_diff_eq!(psr.max().unwrap(), std::f64::consts::SQRT_2, epsilon = 1e-7);
    }
}
