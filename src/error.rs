//! Error taxonomy for the modelling core

use thiserror::Error;

/// Result type for fitting, scoring and segmentation
pub type ModelResult<T> = std::result::Result<T, CltvError>;

/// Errors raised by the BG/NBD, Gamma-Gamma, CLV and segmentation routines
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CltvError {
    /// Malformed or out-of-domain input, detected before any optimisation starts
    #[error("invalid input ({context}): {reason}")]
    InvalidInput { context: String, reason: String },

    /// The optimizer ran out of iterations (or stalled) before reaching tolerance
    #[error(
        "{model} fit did not converge after {iterations} iterations (gradient norm {gradient_norm:.3e})"
    )]
    Convergence {
        model: &'static str,
        iterations: usize,
        gradient_norm: f64,
    },

    /// A fitted parameter violates a precondition of a downstream formula
    #[error("degenerate parameter {parameter} = {value}: {reason}")]
    DegenerateParameter {
        parameter: &'static str,
        value: f64,
        reason: &'static str,
    },

    /// Not enough distinct scores to form the requested number of tiers
    #[error("cannot form {requested} tiers from {distinct} distinct scores")]
    InsufficientData { distinct: usize, requested: usize },
}

impl CltvError {
    pub(crate) fn invalid(context: impl Into<String>, reason: impl Into<String>) -> Self {
        CltvError::InvalidInput {
            context: context.into(),
            reason: reason.into(),
        }
    }
}
