//! Custom error types for the application.
//!
//! This module defines the two error types used across the crate. Using the `thiserror`
//! crate, it provides a centralized and consistent way to handle the different kinds of
//! failures that can occur between a sample batch arriving and a result leaving.
//!
//! ## Error Hierarchy
//!
//! `EstimationError` covers everything that can go wrong while turning one drained
//! analysis window into vital signs:
//!
//! - **`InsufficientSamples`**: The window is shorter than the edge padding that zero-phase
//!   filtering needs for the configured filter order.
//! - **`DegenerateSignal`**: A denominator in the SpO2 ratio is zero or close enough to zero
//!   that the result would be infinite or NaN.
//! - **`LengthMismatch`**: The IR and red channels handed to the SpO2 estimator differ in length.
//! - **`InvalidFilter`**: Filter coefficients could not be designed (cutoff above Nyquist,
//!   non-positive frequency, zero order).
//!
//! `PpgError` is the application error. It wraps `EstimationError` and adds the
//! configuration, ingress, persistence and I/O failures of the surrounding service.
//!
//! Nothing in the pipeline is fatal to the process; `PpgError::is_recoverable` tells callers
//! whether the failure only cost them the current batch or window.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, PpgError>;

/// Failures while estimating vital signs for a single analysis window.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EstimationError {
    /// The window is shorter than zero-phase filtering needs.
    #[error("Insufficient samples for zero-phase filtering: need at least {required}, got {actual}")]
    InsufficientSamples {
        /// Minimum window length for the filter.
        required: usize,
        /// Length that was supplied.
        actual: usize,
    },

    /// A ratio denominator is zero or close to it.
    #[error("Degenerate signal: {0}")]
    DegenerateSignal(String),

    /// IR and red channels differ in length.
    #[error("Channel length mismatch: {ir} IR samples vs {red} red samples")]
    LengthMismatch {
        /// IR sample count.
        ir: usize,
        /// Red sample count.
        red: usize,
    },

    /// Filter coefficients could not be designed.
    #[error("Invalid filter design: {0}")]
    InvalidFilter(String),
}

/// Application error for everything outside a single estimation pass.
#[derive(Error, Debug)]
pub enum PpgError {
    /// The configuration file or environment could not be parsed.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// A parsed configuration value is out of range.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Filesystem or socket failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An incoming batch has the wrong shape.
    #[error("Malformed ingress batch: {0}")]
    MalformedIngress(String),

    /// A window could not be estimated.
    #[error("Estimation error: {0}")]
    Estimation(#[from] EstimationError),

    /// An archive file could not be written.
    #[error("Persistence failure: {0}")]
    Persistence(String),

    /// JSON encoding or decoding failed.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<figment::Error> for PpgError {
    fn from(value: figment::Error) -> Self {
        PpgError::Config(Box::new(value))
    }
}

impl From<csv::Error> for PpgError {
    fn from(value: csv::Error) -> Self {
        PpgError::Persistence(value.to_string())
    }
}

impl From<serde_json::Error> for PpgError {
    fn from(value: serde_json::Error) -> Self {
        PpgError::Serialization(value.to_string())
    }
}

impl PpgError {
    /// Whether the pipeline can keep accepting samples after this error.
    ///
    /// Ingress, estimation and persistence failures only cost the current batch, window
    /// or archive flush. Configuration problems stop the service from starting at all.
    pub fn is_recoverable(&self) -> bool {
        match self {
            PpgError::Config(_) | PpgError::Configuration(_) => false,
            PpgError::Io(_)
            | PpgError::MalformedIngress(_)
            | PpgError::Estimation(_)
            | PpgError::Persistence(_)
            | PpgError::Serialization(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimation_errors_are_recoverable() {
        let err: PpgError = EstimationError::InsufficientSamples {
            required: 34,
            actual: 10,
        }
        .into();
        assert!(err.is_recoverable());
        assert!(err.to_string().contains("need at least 34, got 10"));
    }

    #[test]
    fn configuration_errors_are_fatal() {
        let err = PpgError::Configuration("window_threshold too small".into());
        assert!(!err.is_recoverable());
    }

    #[test]
    fn converts_csv_error_to_persistence() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
        let err: PpgError = csv::Error::from(io).into();
        match err {
            PpgError::Persistence(msg) => assert!(msg.contains("read-only")),
            other => panic!("unexpected variant: {:?}", other),
        }
    }
}
