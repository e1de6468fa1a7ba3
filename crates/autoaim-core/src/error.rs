//! Error types for the autoaim stack.
//!
//! Estimator hot paths (`push`, `update`, pose queries) are infallible by
//! design: malformed input is dropped and divergent filters reset themselves.
//! Errors therefore only surface where a caller hands us configuration: a
//! negative noise variance, a zero-length window, an inverted clamp range.

use thiserror::Error;

/// A specialized `Result` type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors produced while validating caller-supplied configuration.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum CoreError {
    /// A tuning parameter is outside its legal range.
    #[error("invalid parameter `{name}`: {value} (expected {expected})")]
    InvalidParameter {
        /// Name of the offending parameter
        name: &'static str,
        /// The rejected value
        value: f64,
        /// Human-readable description of the legal range
        expected: &'static str,
    },

    /// A pair of parameters is mutually inconsistent.
    #[error("inconsistent configuration: {message}")]
    Inconsistent {
        /// Description of the conflict
        message: String,
    },
}

impl CoreError {
    /// Creates a new invalid-parameter error.
    #[must_use]
    pub fn invalid_parameter(name: &'static str, value: f64, expected: &'static str) -> Self {
        Self::InvalidParameter {
            name,
            value,
            expected,
        }
    }

    /// Creates a new inconsistent-configuration error.
    #[must_use]
    pub fn inconsistent(message: impl Into<String>) -> Self {
        Self::Inconsistent {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_parameter_display() {
        let err = CoreError::invalid_parameter("r_min", -0.1, "> 0");
        let text = err.to_string();
        assert!(text.contains("r_min"));
        assert!(text.contains("-0.1"));
    }

    #[test]
    fn test_inconsistent_display() {
        let err = CoreError::inconsistent("r_min exceeds r_max");
        assert!(err.to_string().contains("r_min exceeds r_max"));
    }
}
