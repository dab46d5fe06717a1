//! Error types for saliency-rs.

use thiserror::Error;

/// Result type alias using [`SaliencyError`].
pub type Result<T> = std::result::Result<T, SaliencyError>;

/// Errors raised by the classification and explanation pipeline.
///
/// None of these are recovered internally: each one aborts the current run and
/// is surfaced to the operator.
#[derive(Error, Debug)]
pub enum SaliencyError {
    /// Missing or invalid setting (model variant, image path, top-k, ...).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The input image could not be decoded or has zero dimensions.
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    /// The requested compute backend is unknown or absent on this machine.
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The model has no layer producing a multi-channel spatial grid.
    #[error("No spatial layer: {0}")]
    NoSpatialLayer(String),

    /// An activation or gradient observation point never fired.
    #[error("Capture failure: {0}")]
    CaptureFailure(String),

    /// Out-of-range numeric parameter (blend factor, top-k, ...).
    #[error("Invalid parameter: {name} = {value} ({reason})")]
    InvalidParameter {
        /// Parameter name.
        name: String,
        /// Offending value, rendered as text.
        value: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// Model weights could not be loaded or saved.
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SaliencyError {
    /// Create an invalid parameter error.
    pub fn invalid_parameter(
        name: impl Into<String>,
        value: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        SaliencyError::InvalidParameter {
            name: name.into(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}
