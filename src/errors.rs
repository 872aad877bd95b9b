use std::fmt;

use thiserror::Error;

/// Why the threshold search gave up and a fallback distribution was used
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FallbackReason {
    /// The iteration budget ran out before `|Σp − 1|` dropped below tolerance
    IterationBudgetExhausted { iterations: usize, residual: f64 },
    /// The bracket shrank to floating-point resolution without meeting tolerance
    BracketCollapsed { iterations: usize, residual: f64 },
    /// The clipped power sum evaluated to NaN
    NonFiniteSum { tau: f64 },
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackReason::IterationBudgetExhausted {
                iterations,
                residual,
            } => write!(
                f,
                "iteration budget exhausted after {iterations} steps (residual {residual:.3e})"
            ),
            FallbackReason::BracketCollapsed {
                iterations,
                residual,
            } => write!(
                f,
                "bracket collapsed after {iterations} steps (residual {residual:.3e})"
            ),
            FallbackReason::NonFiniteSum { tau } => {
                write!(f, "probability sum is not finite at tau = {tau}")
            }
        }
    }
}

#[derive(Error, Debug)]
pub enum RouterError {
    #[error("Invalid parameter: {message}")]
    InvalidParameter { message: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Threshold search did not converge: {reason}")]
    ConvergenceFailure { reason: FallbackReason },

    #[error("Serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },

    #[error("Configuration loading error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

impl RouterError {
    pub(crate) fn invalid_parameter(message: impl Into<String>) -> Self {
        RouterError::InvalidParameter {
            message: message.into(),
        }
    }

    pub(crate) fn invalid_input(message: impl Into<String>) -> Self {
        RouterError::InvalidInput {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RouterError>;
