//! Error taxonomy for the reconstruction pipeline.
//!
//! Core modules (window, flow, engine) return `SuperResError` directly. Ingest,
//! sink and driver code wraps these in `anyhow::Error`; callers classify a
//! failure with `err.downcast_ref::<SuperResError>()`.

use thiserror::Error;

/// Result alias for core operations.
pub type Result<T> = std::result::Result<T, SuperResError>;

#[derive(Error, Debug)]
pub enum SuperResError {
    /// Invalid startup configuration. Fatal before any frame is processed.
    #[error("configuration error: {0}")]
    Config(String),

    /// No decoding path could open the input.
    #[error("cannot open source '{input}': {reason}")]
    SourceOpen { input: String, reason: String },

    /// Sequence indices skipped or went backwards.
    #[error("stream discontinuity: expected frame {expected}, got {got}")]
    StreamDiscontinuity { expected: u64, got: u64 },

    /// A frame does not match the geometry of the frames already buffered.
    #[error("frame mismatch: {0}")]
    FrameMismatch(String),

    /// Motion estimation failed for one frame pair.
    #[error("motion estimation failed for frame {source_index} against reference {reference_index}: {reason}")]
    Estimation {
        reference_index: u64,
        source_index: u64,
        reason: String,
    },

    /// Output sink could not be opened or written.
    #[error("sink '{sink}' failed: {reason}")]
    Sink { sink: String, reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SuperResError {
    pub fn config(msg: impl Into<String>) -> Self {
        SuperResError::Config(msg.into())
    }

    pub fn source_open(input: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        SuperResError::SourceOpen {
            input: input.into(),
            reason: reason.to_string(),
        }
    }

    pub fn sink(sink: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        SuperResError::Sink {
            sink: sink.into(),
            reason: reason.to_string(),
        }
    }

    /// Errors that end the run. Estimation failures are degraded locally.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SuperResError::Estimation { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discontinuity_message_names_both_indices() {
        let err = SuperResError::StreamDiscontinuity {
            expected: 3,
            got: 4,
        };
        assert_eq!(
            err.to_string(),
            "stream discontinuity: expected frame 3, got 4"
        );
        assert!(err.is_fatal());
    }

    #[test]
    fn estimation_failures_are_not_fatal() {
        let err = SuperResError::Estimation {
            reference_index: 2,
            source_index: 3,
            reason: "singular".to_string(),
        };
        assert!(!err.is_fatal());
    }
}
