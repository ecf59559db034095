use std::fmt;

/// The result type shared by every model unit.
pub type Result<T> = std::result::Result<T, MlError>;

/// Errors produced by model units when inputs are invalid.
#[derive(Debug, Clone, PartialEq)]
pub enum MlError {
    /// An input is invalid for semantic or domain reasons.
    InvalidInput(&'static str),

    /// A shape invariant was violated (e.g. mismatched lengths).
    ShapeMismatch {
        /// Human-readable context for the mismatch (e.g. "params", "batch").
        what: &'static str,
        /// Observed value.
        got: usize,
        /// Expected value.
        expected: usize,
    },

    /// A label lies outside the declared label set.
    LabelOutOfRange { label: usize, num_classes: usize },

    /// A computation produced NaN or an infinite value.
    NonFinite { what: &'static str },
}

impl fmt::Display for MlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MlError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            MlError::ShapeMismatch { what, got, expected } => {
                write!(f, "shape mismatch for {what}: got {got}, expected {expected}")
            }
            MlError::LabelOutOfRange { label, num_classes } => {
                write!(f, "label {label} is out of range for {num_classes} classes")
            }
            MlError::NonFinite { what } => write!(f, "non finite value in {what}"),
        }
    }
}

impl std::error::Error for MlError {}
