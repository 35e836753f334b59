/*!
Distributions, targets and conditionals used by the samplers.

A [`Distribution`] can be sampled and evaluated, which is what particle
priors, importance proposals and rollout noise need. A [`TargetDistribution`]
only has to provide an unnormalized log-density, which is all Metropolis-Hastings
and importance weighting look at. Gradient-based samplers additionally need a
[`GradientTarget`].

Every sampling method takes the random source explicitly as `&mut dyn RngCore`,
so a single seeded generator drives an entire run.

# Examples

```rust
use mini_montecarlo::distributions::{Categorical, Distribution, Gaussian};
use rand::rngs::SmallRng;
use rand::SeedableRng;

let mut rng = SmallRng::seed_from_u64(42);

let gauss = Gaussian::new(0.0, 1.0).unwrap();
let x = gauss.sample(&mut rng);
println!("x = {x}, log p(x) = {}", gauss.log_pdf(&x));

let cat = Categorical::new(vec![0.2, 0.3, 0.5]).unwrap();
let k = cat.sample(&mut rng);
assert!(k < 3);
```
*/

use rand::{Rng, RngCore};
use rand_distr::StandardNormal;
use std::f64::consts::PI;

use crate::error::{McError, Result};
use crate::weights::log_sum_exp;

/// Default floor applied to adaptive mixture weights.
pub const DEFAULT_WEIGHT_FLOOR: f64 = 1e-3;

/// A distribution that can be sampled and whose log-density can be evaluated.
pub trait Distribution<V> {
    /// Draws one value.
    fn sample(&self, rng: &mut dyn RngCore) -> V;

    /// Evaluates the (normalized) log-density or log-mass at `value`.
    fn log_pdf(&self, value: &V) -> f64;
}

impl<V, D: Distribution<V> + ?Sized> Distribution<V> for Box<D> {
    fn sample(&self, rng: &mut dyn RngCore) -> V {
        (**self).sample(rng)
    }

    fn log_pdf(&self, value: &V) -> f64 {
        (**self).log_pdf(value)
    }
}

/// A target distribution known up to a normalizing constant.
///
/// Implemented for every closure `Fn(&S) -> f64`, so a plain log-density
/// function can be handed to the samplers directly.
pub trait TargetDistribution<S> {
    /// Returns the log of the unnormalized density at `theta`.
    fn unnorm_log_prob(&self, theta: &S) -> f64;
}

impl<S, F> TargetDistribution<S> for F
where
    F: Fn(&S) -> f64,
{
    fn unnorm_log_prob(&self, theta: &S) -> f64 {
        self(theta)
    }
}

/// A target that also provides the gradient of its log-density.
pub trait GradientTarget {
    /// Returns `log p(position)` and writes `∇ log p(position)` into `grad`.
    fn logp_and_grad(&self, position: &[f64], grad: &mut [f64]) -> f64;
}

/// Adapts a log-density closure and a gradient closure into a [`GradientTarget`].
///
/// ```rust
/// use mini_montecarlo::distributions::{FnGradientTarget, GradientTarget};
///
/// let target = FnGradientTarget::new(
///     |x: &[f64]| -0.5 * x.iter().map(|v| v * v).sum::<f64>(),
///     |x: &[f64], g: &mut [f64]| g.iter_mut().zip(x).for_each(|(g, v)| *g = -v),
/// );
/// let mut grad = [0.0; 2];
/// let lp = target.logp_and_grad(&[1.0, 2.0], &mut grad);
/// assert_eq!(lp, -2.5);
/// assert_eq!(grad, [-1.0, -2.0]);
/// ```
#[derive(Clone, Copy, Debug)]
pub struct FnGradientTarget<F, G> {
    log_prob: F,
    grad: G,
}

impl<F, G> FnGradientTarget<F, G>
where
    F: Fn(&[f64]) -> f64,
    G: Fn(&[f64], &mut [f64]),
{
    /// Pairs a log-density with its gradient.
    pub fn new(log_prob: F, grad: G) -> Self {
        Self { log_prob, grad }
    }
}

impl<F, G> GradientTarget for FnGradientTarget<F, G>
where
    F: Fn(&[f64]) -> f64,
    G: Fn(&[f64], &mut [f64]),
{
    fn logp_and_grad(&self, position: &[f64], grad: &mut [f64]) -> f64 {
        (self.grad)(position, grad);
        (self.log_prob)(position)
    }
}

/// Exact full conditionals for Gibbs sampling.
pub trait Conditional<S> {
    /// Samples coordinate `i` given the current values of all coordinates.
    fn sample(&self, i: usize, given: &[S], rng: &mut dyn RngCore) -> S;
}

/// A univariate Gaussian `N(mean, std²)`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Gaussian {
    pub mean: f64,
    pub std: f64,
}

impl Gaussian {
    /// Creates a Gaussian; `std` must be positive and finite.
    pub fn new(mean: f64, std: f64) -> Result<Self> {
        if !(std.is_finite() && std > 0.0) || !mean.is_finite() {
            return Err(McError::InvalidConfig(format!(
                "Gaussian requires finite mean and positive std, got mean={mean}, std={std}"
            )));
        }
        Ok(Self { mean, std })
    }

    /// The standard normal `N(0, 1)`.
    pub fn standard() -> Self {
        Self { mean: 0.0, std: 1.0 }
    }

    /// Density (not log-density) at `x`.
    pub fn pdf(&self, x: f64) -> f64 {
        self.log_pdf(&x).exp()
    }
}

impl Distribution<f64> for Gaussian {
    fn sample(&self, rng: &mut dyn RngCore) -> f64 {
        let z: f64 = rng.sample(StandardNormal);
        self.mean + self.std * z
    }

    fn log_pdf(&self, value: &f64) -> f64 {
        let z = (value - self.mean) / self.std;
        -0.5 * z * z - self.std.ln() - 0.5 * (2.0 * PI).ln()
    }
}

/// A continuous uniform distribution on `[low, high)`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Uniform {
    pub low: f64,
    pub high: f64,
}

impl Uniform {
    /// Creates a uniform distribution; requires `low < high`, both finite.
    pub fn new(low: f64, high: f64) -> Result<Self> {
        if !(low.is_finite() && high.is_finite() && low < high) {
            return Err(McError::InvalidConfig(format!(
                "Uniform requires finite low < high, got [{low}, {high})"
            )));
        }
        Ok(Self { low, high })
    }
}

impl Distribution<f64> for Uniform {
    fn sample(&self, rng: &mut dyn RngCore) -> f64 {
        self.low + (self.high - self.low) * rng.gen::<f64>()
    }

    fn log_pdf(&self, value: &f64) -> f64 {
        if (self.low..self.high).contains(value) {
            -(self.high - self.low).ln()
        } else {
            f64::NEG_INFINITY
        }
    }
}

/**
A categorical distribution over the indices `0..probs.len()`.

The probabilities are normalized on construction.

```rust
use mini_montecarlo::distributions::{Categorical, Distribution};

let cat = Categorical::new(vec![1.0, 3.0]).unwrap();
assert!((cat.probs[1] - 0.75).abs() < 1e-12);
assert!((cat.log_pdf(&0) - 0.25f64.ln()).abs() < 1e-12);
```
*/
#[derive(Clone, Debug, PartialEq)]
pub struct Categorical {
    pub probs: Vec<f64>,
    cumulative: Vec<f64>,
}

impl Categorical {
    /// Creates a categorical distribution from non-negative, not-all-zero weights.
    pub fn new(probs: Vec<f64>) -> Result<Self> {
        crate::weights::validate_weights(&probs)?;
        let sum: f64 = probs.iter().sum();
        if !(sum.is_finite() && sum > 0.0) {
            return Err(McError::InvalidConfig(format!(
                "categorical weights must have a positive finite sum, got {sum}"
            )));
        }
        let probs: Vec<f64> = probs.into_iter().map(|p| p / sum).collect();
        let cumulative = cumulative_sum(&probs);
        Ok(Self { probs, cumulative })
    }

    /// Number of categories.
    pub fn len(&self) -> usize {
        self.probs.len()
    }

    /// Always `false`: construction rejects empty weight vectors.
    pub fn is_empty(&self) -> bool {
        self.probs.is_empty()
    }
}

impl Distribution<usize> for Categorical {
    fn sample(&self, rng: &mut dyn RngCore) -> usize {
        search_cumulative(&self.cumulative, rng.gen::<f64>())
    }

    fn log_pdf(&self, index: &usize) -> f64 {
        self.probs
            .get(*index)
            .map_or(f64::NEG_INFINITY, |p| p.ln())
    }
}

/// Running sum of `weights`. When the weights are normalized, every entry from
/// the last positive weight onward is pinned to exactly 1.0.
pub(crate) fn cumulative_sum(weights: &[f64]) -> Vec<f64> {
    let mut acc = 0.0;
    let mut cumulative: Vec<f64> = weights
        .iter()
        .map(|w| {
            acc += w;
            acc
        })
        .collect();
    if (acc - 1.0).abs() < 1e-9 {
        if let Some(last) = weights.iter().rposition(|w| *w > 0.0) {
            cumulative[last..].iter_mut().for_each(|c| *c = 1.0);
        }
    }
    cumulative
}

/// Smallest index `i` with `u < cumulative[i]`, clamped to the last index.
pub(crate) fn search_cumulative(cumulative: &[f64], u: f64) -> usize {
    let idx = cumulative.partition_point(|&c| c <= u);
    idx.min(cumulative.len().saturating_sub(1))
}

/**
An isotropic Gaussian over `Vec<f64>` with per-coordinate standard deviation `std`.

Useful as a multivariate prior for particle filters or as an independence
proposal for importance sampling.
*/
#[derive(Clone, Debug, PartialEq)]
pub struct IsotropicGaussian {
    pub mean: Vec<f64>,
    pub std: f64,
}

impl IsotropicGaussian {
    /// Creates the distribution; `std` must be positive and finite.
    pub fn new(mean: Vec<f64>, std: f64) -> Result<Self> {
        if !(std.is_finite() && std > 0.0) {
            return Err(McError::InvalidConfig(format!(
                "IsotropicGaussian requires a positive std, got {std}"
            )));
        }
        Ok(Self { mean, std })
    }
}

impl Distribution<Vec<f64>> for IsotropicGaussian {
    fn sample(&self, rng: &mut dyn RngCore) -> Vec<f64> {
        self.mean
            .iter()
            .map(|m| {
                let z: f64 = rng.sample(StandardNormal);
                m + self.std * z
            })
            .collect()
    }

    fn log_pdf(&self, value: &Vec<f64>) -> f64 {
        let d = self.mean.len() as f64;
        let var = self.std * self.std;
        let sq: f64 = value
            .iter()
            .zip(&self.mean)
            .map(|(x, m)| (x - m) * (x - m))
            .sum();
        -0.5 * sq / var - 0.5 * d * (2.0 * PI * var).ln()
    }
}

/**
A weighted mixture of components.

The same container backs mixture importance proposals (components implement
[`Distribution`]) and mixture MCMC proposals (components implement
[`crate::proposals::ProposalDistribution`]). Weights can be updated adaptively
with [`Mixture::update_weights`]; they are floored at `weight_floor` so no
component ever loses its support.

```rust
use mini_montecarlo::distributions::{Distribution, Gaussian, Mixture};

let mut mix = Mixture::uniform(vec![
    Gaussian::new(-3.0, 1.0).unwrap(),
    Gaussian::new(3.0, 1.0).unwrap(),
]).unwrap();
mix.update_weights(&[0.0, 10.0]);
assert!(mix.weights()[0] > 0.0);
assert!(mix.weights()[1] > 0.99);
```
*/
#[derive(Clone, Debug)]
pub struct Mixture<C> {
    components: Vec<C>,
    weights: Vec<f64>,
    cumulative: Vec<f64>,
    weight_floor: f64,
}

impl<C> Mixture<C> {
    /// Creates a mixture with the given (unnormalized) component weights.
    pub fn new(components: Vec<C>, weights: Vec<f64>) -> Result<Self> {
        if components.is_empty() {
            return Err(McError::InvalidConfig(
                "a mixture needs at least one component".into(),
            ));
        }
        if components.len() != weights.len() {
            return Err(McError::SizeMismatch {
                expected: components.len(),
                found: weights.len(),
            });
        }
        let cat = Categorical::new(weights)?;
        Ok(Self {
            components,
            cumulative: cat.cumulative,
            weights: cat.probs,
            weight_floor: DEFAULT_WEIGHT_FLOOR,
        })
    }

    /// Creates a mixture with equal component weights.
    pub fn uniform(components: Vec<C>) -> Result<Self> {
        let n = components.len();
        Self::new(components, vec![1.0; n])
    }

    /// Sets the minimum weight a component can be assigned by adaptation.
    pub fn with_weight_floor(mut self, floor: f64) -> Result<Self> {
        if !(floor > 0.0 && floor * (self.components.len() as f64) < 1.0) {
            return Err(McError::InvalidConfig(format!(
                "weight floor {floor} must be positive and leave room for {} components",
                self.components.len()
            )));
        }
        self.weight_floor = floor;
        Ok(self)
    }

    pub fn components(&self) -> &[C] {
        &self.components
    }

    pub fn components_mut(&mut self) -> &mut [C] {
        &mut self.components
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn weight_floor(&self) -> f64 {
        self.weight_floor
    }

    /// Draws a component index according to the current weights.
    pub fn sample_component(&self, rng: &mut dyn RngCore) -> usize {
        search_cumulative(&self.cumulative, rng.gen::<f64>())
    }

    /// Reweights the components proportionally to `masses`.
    ///
    /// Each new weight is `max(mass_k / Σ mass, floor)`, then renormalized.
    /// If the total mass is zero or not finite the weights are left untouched.
    /// Returns `true` if the weights changed.
    pub fn update_weights(&mut self, masses: &[f64]) -> bool {
        if masses.len() != self.weights.len() {
            return false;
        }
        let total: f64 = masses
            .iter()
            .map(|m| if m.is_finite() && *m > 0.0 { *m } else { 0.0 })
            .sum();
        if !(total.is_finite() && total > 0.0) {
            return false;
        }
        let floored: Vec<f64> = masses
            .iter()
            .map(|m| {
                let share = if m.is_finite() && *m > 0.0 { m / total } else { 0.0 };
                share.max(self.weight_floor)
            })
            .collect();
        let norm: f64 = floored.iter().sum();
        self.weights = floored.into_iter().map(|w| w / norm).collect();
        self.cumulative = cumulative_sum(&self.weights);
        true
    }
}

impl<V, D: Distribution<V>> Distribution<V> for Mixture<D> {
    fn sample(&self, rng: &mut dyn RngCore) -> V {
        let k = self.sample_component(rng);
        self.components[k].sample(rng)
    }

    fn log_pdf(&self, value: &V) -> f64 {
        let terms: Vec<f64> = self
            .components
            .iter()
            .zip(&self.weights)
            .map(|(c, w)| w.ln() + c.log_pdf(value))
            .collect();
        log_sum_exp(&terms)
    }
}
