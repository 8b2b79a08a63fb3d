//! Error types for encoder operations.

use thiserror::Error;

/// Errors that can occur while converting or encoding video frames.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Invalid parameter passed to the encoder.
    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    /// API call made in wrong sequence (e.g. a frame submitted after flush).
    #[error("invalid API call sequence: {0}")]
    InvalidCall(String),

    /// The backend could not be initialized.
    #[error("encoder not initialized: {0}")]
    InitFailed(String),

    /// The backend refused a frame or failed internally.
    #[error("encoder error: {0}")]
    Backend(String),

    /// Unsupported pixel format for the requested operation.
    #[error("unsupported pixel format: {0}")]
    UnsupportedPixelFormat(String),

    /// Invalid frame dimensions.
    #[error("invalid frame dimensions: {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    /// Frame conversion error.
    #[error("frame conversion error: {0}")]
    ConversionError(String),
}

impl CodecError {
    /// Create an InvalidParam error with a message.
    pub fn invalid_param(msg: impl Into<String>) -> Self {
        Self::InvalidParam(msg.into())
    }

    /// Create an InvalidCall error with a message.
    pub fn invalid_call(msg: impl Into<String>) -> Self {
        Self::InvalidCall(msg.into())
    }

    /// Create a Backend error with a message.
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }
}
