//! Errors surfaced by a client session

use thiserror::Error;
use voxshift_core::VoxError;
use voxshift_media::MediaError;

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Failure of a session operation
#[derive(Error, Debug)]
pub enum SessionError {
    /// Signaling or SFU failure
    #[error(transparent)]
    Signaling(#[from] VoxError),

    /// Local audio processing failure
    #[error(transparent)]
    Media(#[from] MediaError),
}

impl SessionError {
    /// Machine readable error code
    pub fn error_code(&self) -> String {
        match self {
            SessionError::Signaling(e) => e.error_code(),
            SessionError::Media(_) => "MEDIA".to_string(),
        }
    }
}
