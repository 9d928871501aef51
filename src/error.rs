//! Unified error hierarchy for sweat
//!
//! Every fallible numeric operation returns a [`SweatError`]. The three
//! numeric families (validation, convergence, not-fitted) carry structured
//! fields so callers can inspect what went wrong without parsing messages.

use thiserror::Error;

/// Top-level error type for all sweat operations
#[derive(Debug, Error)]
pub enum SweatError {
    /// Malformed input
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Regression optimizer failure
    #[error("Convergence error: {0}")]
    Convergence(#[from] ConvergenceError),

    /// Prediction requested before a successful fit
    #[error("Not fitted: {0}")]
    NotFitted(#[from] NotFittedError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Input validation errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// Fewer observations than free parameters
    #[error("{model} requires at least {required} observations, got {got}")]
    InsufficientData {
        model: String,
        required: usize,
        got: usize,
    },

    /// Feature and target sequences differ in length
    #[error("Length mismatch: {left_name} has {left} elements, {right_name} has {right}")]
    LengthMismatch {
        left_name: String,
        left: usize,
        right_name: String,
        right: usize,
    },

    /// Duration not strictly positive
    #[error("Duration at index {index} must be strictly positive, got {value}")]
    NonPositiveDuration { index: usize, value: f64 },

    /// Timestamp not strictly greater than its predecessor
    #[error("Timestamps must be strictly increasing: index {index} has {current} after {previous}")]
    NonMonotonicTimestamp {
        index: usize,
        previous: f64,
        current: f64,
    },

    /// NaN or infinite value in an input sequence
    #[error("Non-finite {field} at index {index}: {value}")]
    NonFinite {
        field: String,
        index: usize,
        value: f64,
    },

    /// Unrecognized name for a closed set of choices
    #[error("Invalid {parameter} '{value}', valid choices are: {}", choices.join(", "))]
    InvalidChoice {
        parameter: String,
        value: String,
        choices: Vec<String>,
    },

    /// Scalar parameter outside its valid range
    #[error("Invalid {parameter}={value}: {reason}")]
    InvalidParameter {
        parameter: String,
        value: f64,
        reason: String,
    },

    /// Empty input where at least one element is needed
    #[error("{what} must not be empty")]
    Empty { what: String },

    /// Fitted parameters that do not describe a usable model of their kind
    #[error("Inconsistent {kind} model: {reason}")]
    InconsistentModel { kind: String, reason: String },
}

/// Optimizer failures, each carrying the optimizer's diagnostic
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConvergenceError {
    /// Iteration cap reached before the tolerances were met
    #[error("Maximum number of iterations ({iterations}) reached, residual sum of squares {cost:.6e}")]
    MaxIterations { iterations: usize, cost: f64 },

    /// Normal equations could not be solved
    #[error("Singular system: {reason}")]
    Singular { reason: String },

    /// Damping parameter grew without any step reducing the cost
    #[error("Damping parameter diverged to {lambda:.3e} after {iterations} iterations")]
    Diverged { lambda: f64, iterations: usize },

    /// Estimate is non-finite or outside the physical domain
    #[error("Degenerate estimate {parameter}={value}")]
    Degenerate { parameter: String, value: f64 },
}

/// Raised when an estimator is used before `fit`
#[derive(Debug, Clone, PartialEq, Error)]
#[error("This {estimator} instance is not fitted yet. Call 'fit' with appropriate arguments before using this estimator")]
pub struct NotFittedError {
    pub estimator: String,
}

/// Result type alias for sweat operations
pub type Result<T> = std::result::Result<T, SweatError>;

impl SweatError {
    /// Check if error is retryable
    ///
    /// Fitting and reserve tracking are deterministic, so repeating a call
    /// with the same inputs reproduces the same failure.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SweatError::Io(_))
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            SweatError::Validation(_) => ErrorSeverity::Warning,
            SweatError::NotFitted(_) => ErrorSeverity::Warning,
            SweatError::Convergence(_) => ErrorSeverity::Error,
            SweatError::Configuration(_) => ErrorSeverity::Error,
            SweatError::Io(_) => ErrorSeverity::Error,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            SweatError::Validation(ValidationError::InsufficientData {
                model, required, ..
            }) => {
                format!(
                    "Not enough efforts to fit the {} model. Provide at least {} duration/power pairs.",
                    model, required
                )
            }
            SweatError::Validation(ValidationError::NonMonotonicTimestamp { index, .. }) => {
                format!(
                    "Power data is out of order at sample {}. Remove duplicate or unsorted timestamps first.",
                    index
                )
            }
            SweatError::Convergence(_) => {
                "The power-duration model could not be fitted to these efforts. Try efforts with more varied durations.".to_string()
            }
            _ => self.to_string(),
        }
    }
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Critical system error requiring immediate attention
    Critical,
    /// Error that prevents operation but system can continue
    Error,
    /// Warning that doesn't prevent operation
    Warning,
    /// Informational message
    Info,
}

impl ErrorSeverity {
    /// Convert to tracing level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            ErrorSeverity::Critical => tracing::Level::ERROR,
            ErrorSeverity::Error => tracing::Level::ERROR,
            ErrorSeverity::Warning => tracing::Level::WARN,
            ErrorSeverity::Info => tracing::Level::INFO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_severity() {
        let err = SweatError::from(ValidationError::Empty {
            what: "power series".to_string(),
        });
        assert_eq!(err.severity(), ErrorSeverity::Warning);

        let err = SweatError::from(ConvergenceError::Singular {
            reason: "zero pivot".to_string(),
        });
        assert_eq!(err.severity(), ErrorSeverity::Error);
        assert_eq!(err.severity().to_tracing_level(), tracing::Level::ERROR);
    }

    #[test]
    fn test_error_not_retryable() {
        let err = SweatError::from(ConvergenceError::MaxIterations {
            iterations: 200,
            cost: 1.5,
        });
        assert!(!err.is_retryable());

        let err = SweatError::from(NotFittedError {
            estimator: "CriticalPowerRegressor".to_string(),
        });
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_invalid_choice_lists_choices() {
        let err = ValidationError::InvalidChoice {
            parameter: "algorithm".to_string(),
            value: "bogus".to_string(),
            choices: vec!["waterworth".to_string(), "skiba".to_string()],
        };
        let message = err.to_string();
        assert!(message.contains("'bogus'"));
        assert!(message.contains("waterworth, skiba"));
    }

    #[test]
    fn test_user_messages() {
        let err = SweatError::from(ValidationError::InsufficientData {
            model: "2_param".to_string(),
            required: 2,
            got: 1,
        });
        assert!(err.user_message().contains("at least 2"));
    }
}
