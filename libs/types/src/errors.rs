//! Validation errors raised when constructing data-model values

use thiserror::Error;

/// Errors that can occur while validating data-model invariants
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    /// Instrument identifier was empty or whitespace
    #[error("Instrument id cannot be empty")]
    EmptyInstrument,

    /// Price was zero, negative or not representable
    #[error("Invalid price for {field}: {value}")]
    InvalidPrice { field: &'static str, value: String },

    /// Confidence outside [0, 1]
    #[error("Confidence {value} outside [0, 1]")]
    ConfidenceOutOfRange { value: f64 },

    /// Feature vector length does not match the schema
    #[error("Feature vector has {actual} values, schema v{schema} requires {expected}")]
    FeatureLength {
        schema: u16,
        expected: usize,
        actual: usize,
    },

    /// Custom validation failure with message
    #[error("Validation failed: {message}")]
    Custom { message: String },
}
