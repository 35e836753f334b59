//! Error type shared by every sampler in the crate.
//!
//! Precondition violations and configuration errors are reported through
//! [`McError`]. Degenerate numerical states (all particle weights vanishing, a
//! proposal landing on a non-finite log-density) are *not* errors: they are
//! recovered locally and signalled through return values instead.

use thiserror::Error;

/// Errors returned by the Monte Carlo algorithms.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum McError {
    /// A particle set or weight vector with no entries was supplied.
    #[error("particle set is empty")]
    EmptyParticleSet,

    /// A weight was NaN or negative.
    #[error("invalid weight {value} at index {index}")]
    InvalidWeight { index: usize, value: f64 },

    /// The resampling threshold must lie in `[0, 1]`.
    #[error("resample threshold {0} is outside [0, 1]")]
    InvalidThreshold(f64),

    /// A particle set did not have the size the filter was configured for.
    #[error("particle set size mismatch: expected {expected}, found {found}")]
    SizeMismatch { expected: usize, found: usize },

    /// The chain cannot start because the log target is not finite at the initial state.
    #[error("log target density at the initial state is not finite ({0})")]
    NonFiniteInitialState(f64),

    /// A decision was requested from a tree that has not been searched.
    #[error("no simulations have been run from the root")]
    NoSimulations,

    /// The root state is not terminal but exposes no legal actions.
    #[error("root state is not terminal but has no legal actions")]
    NoLegalActions,

    /// A statistic was requested on an empty sample.
    #[error("sample is empty")]
    EmptySample,

    /// Any other invalid parameter.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, McError>;
