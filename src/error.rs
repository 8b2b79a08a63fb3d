//! Error taxonomy for a stamping session.
//!
//! Every variant except [`StampError::Io`] on a best-effort close is fatal:
//! the session flushes what is valid, writes the sequence-end code and stops.

use sei_stamp_codec::CodecError;
use thiserror::Error;

/// Errors raised while building, assembling or writing a stamped stream.
#[derive(Debug, Error)]
pub enum StampError {
    /// The timestamp clock could not be sampled.
    #[error("clock unavailable: {0}")]
    ClockUnavailable(String),

    /// SEI user data exceeds the safety ceiling.
    #[error("SEI payload too large: {len} bytes (max {max})")]
    PayloadTooLarge { len: usize, max: usize },

    /// The external encoder refused a frame or failed internally.
    #[error("encoder rejected input: {0}")]
    EncoderRejected(String),

    /// A write was attempted after the stream was closed.
    #[error("stream already closed")]
    StreamClosed,

    /// A write was attempted before the stream was opened.
    #[error("stream not opened")]
    NotOpened,

    /// The capture device could not be opened or read.
    #[error("capture device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The output sink failed.
    #[error("output error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<CodecError> for StampError {
    fn from(err: CodecError) -> Self {
        Self::EncoderRejected(err.to_string())
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, StampError>;
