//! Media processing error types and handling
//!
//! Errors raised while building DSP stages, processing frames, packetizing
//! audio and talking to capture devices.

use thiserror::Error;

/// Main error type for media processing operations
#[derive(Error, Debug)]
pub enum MediaError {
    /// Invalid configuration provided
    #[error("Invalid configuration: {message}")]
    InvalidConfiguration {
        /// Error message
        message: String,
    },

    /// A DSP stage could not be built
    #[error("Stage construction failed: {stage} - {reason}")]
    StageConstruction {
        /// Stage name
        stage: &'static str,
        /// Failure reason
        reason: String,
    },

    /// Invalid frame data error
    #[error("Invalid frame data: expected {expected} samples, got {actual}")]
    InvalidFrameData {
        /// Expected frame length
        expected: usize,
        /// Actual frame length
        actual: usize,
    },

    /// Packet payload could not be decoded
    #[error("Malformed payload: {reason}")]
    MalformedPayload {
        /// Failure reason
        reason: String,
    },

    /// Device enumeration failed
    #[error("Device enumeration failed: {reason}")]
    DeviceEnumerationFailed {
        /// Failure reason
        reason: String,
    },

    /// Device not found error
    #[error("Device not found: {device_id}")]
    DeviceNotFound {
        /// Device identifier
        device_id: String,
    },

    /// Audio stream errors
    #[error("Audio error: {message}")]
    Audio {
        /// Error message
        message: String,
    },

    /// Sample rate mismatch
    #[error("Sample rate mismatch: expected {expected}, got {actual}")]
    SampleRateMismatch {
        /// Expected sample rate
        expected: u32,
        /// Actual sample rate
        actual: u32,
    },
}

/// Result type alias for media operations
pub type MediaResult<T> = Result<T, MediaError>;

impl MediaError {
    /// Check if error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            MediaError::InvalidFrameData { .. } => true,
            MediaError::MalformedPayload { .. } => true,
            MediaError::StageConstruction { .. } => true,
            MediaError::InvalidConfiguration { .. } => false,
            MediaError::DeviceNotFound { .. } => false,
            _ => false,
        }
    }

    /// Get error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            MediaError::InvalidConfiguration { .. } => ErrorCategory::Configuration,
            MediaError::StageConstruction { .. } => ErrorCategory::Configuration,
            MediaError::InvalidFrameData { .. } => ErrorCategory::Data,
            MediaError::MalformedPayload { .. } => ErrorCategory::Data,
            MediaError::DeviceEnumerationFailed { .. } => ErrorCategory::Device,
            MediaError::DeviceNotFound { .. } => ErrorCategory::Device,
            MediaError::Audio { .. } => ErrorCategory::Audio,
            MediaError::SampleRateMismatch { .. } => ErrorCategory::Audio,
        }
    }
}

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Configuration and parameter errors
    Configuration,
    /// Data validation errors
    Data,
    /// Device and hardware errors
    Device,
    /// Audio-specific errors
    Audio,
}
