//! Error types for switchyard.

use thiserror::Error;

/// Errors raised while building a [`crate::WeightTable`] or selecting from it.
///
/// Everything except [`ConfigError::DrawOutOfRange`] is reported when the
/// scenario is compiled, before any load is generated.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// A weighted switch needs at least one option.
    #[error("weighted switch has no options")]
    EmptyOptions,

    /// Weights must be finite and strictly positive.
    #[error("option #{index} has invalid weight {weight}: weights must be finite and > 0")]
    NonPositiveWeight { index: usize, weight: f64 },

    /// Every weight is valid but their sum is not representable.
    #[error("sum of option weights overflows to {total}")]
    NonFiniteTotal { total: f64 },

    /// Percentage weights handed to a switch with a fallback add up to more than 100.
    #[error("percentages add up to {total}, which exceeds 100")]
    PercentagesExceed { total: f64 },

    /// The random source produced a draw outside `[0, total)`.
    #[error("draw {draw} is outside [0, {total})")]
    DrawOutOfRange { draw: f64, total: f64 },
}

/// Errors surfaced while running a branch inside an execution context.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The context was shut down before the selected action finished.
    #[error("branch cancelled before the selected action completed")]
    Cancelled,
}

/// Result type alias for table construction and selection.
pub type Result<T> = std::result::Result<T, ConfigError>;
