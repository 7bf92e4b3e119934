//! Error types for voxshift

use std::time::Duration;
use thiserror::Error;

/// Main error type for engine, room and signaling operations
#[derive(Error, Debug)]
pub enum VoxError {
    /// Unknown transport, producer, consumer or peer identifier
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Kind of object that was looked up
        kind: &'static str,
        /// Identifier that was not found
        id: String,
    },

    /// Remote capabilities share no codec/feedback profile with the producer
    #[error("Cannot consume producer {producer_id}: no common codec profile")]
    Unsatisfiable {
        /// Producer that could not be consumed
        producer_id: String,
    },

    /// Underlying engine call failed
    #[error("{operation} rejected: {reason}")]
    Rejected {
        /// Operation that failed
        operation: &'static str,
        /// Reason reported by the engine
        reason: String,
    },

    /// Media worker died or could not be started
    #[error("Media engine failure: {reason}")]
    EngineFatal {
        /// Reason for the failure
        reason: String,
    },

    /// Initialization error
    #[error("Initialization failed: {reason}")]
    Initialization {
        /// Reason for initialization failure
        reason: String,
    },

    /// Resource exhausted error
    #[error("Resource exhausted: {resource}")]
    ResourceExhausted {
        /// Resource that was exhausted
        resource: String,
    },

    /// Operation timed out error
    #[error("Operation timed out: {operation} after {duration:?}")]
    Timeout {
        /// Operation that timed out
        operation: String,
        /// Duration after which timeout occurred
        duration: Duration,
    },

    /// Invalid state error
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState {
        /// Expected state
        expected: String,
        /// Actual state
        actual: String,
    },

    /// Server start failed
    #[error("Failed to start server on {address}: {source}")]
    ServerStartFailed {
        /// Address that failed to bind
        address: std::net::SocketAddr,
        /// Underlying error
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Invalid message format
    #[error("Invalid message format: {message}, error: {source}")]
    InvalidMessage {
        /// Invalid message content
        message: String,
        /// Parsing error
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Signaling connection failure
    #[error("Signaling connection error: {reason}")]
    Connection {
        /// Reason for the failure
        reason: String,
    },

    /// Signaling connection closed while a request was pending
    #[error("Signaling connection closed")]
    ConnectionClosed,

    /// Error returned by the remote end of a signaling request
    #[error("Remote error ({code}): {message}")]
    Remote {
        /// Error code reported by the server
        code: String,
        /// Error message reported by the server
        message: String,
    },
}

/// Result type alias for voxshift operations
pub type VoxResult<T> = Result<T, VoxError>;

impl VoxError {
    /// Shorthand for a `NotFound` error
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        VoxError::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Shorthand for a `Rejected` error
    pub fn rejected(operation: &'static str, reason: impl Into<String>) -> Self {
        VoxError::Rejected {
            operation,
            reason: reason.into(),
        }
    }

    /// Get error code for programmatic handling
    pub fn error_code(&self) -> String {
        match self {
            VoxError::NotFound { .. } => "NOT_FOUND".to_string(),
            VoxError::Unsatisfiable { .. } => "UNSATISFIABLE".to_string(),
            VoxError::Rejected { .. } => "REJECTED".to_string(),
            VoxError::EngineFatal { .. } => "ENGINE_FATAL".to_string(),
            VoxError::Initialization { .. } => "INITIALIZATION_FAILED".to_string(),
            VoxError::ResourceExhausted { .. } => "RESOURCE_EXHAUSTED".to_string(),
            VoxError::Timeout { .. } => "TIMEOUT".to_string(),
            VoxError::InvalidState { .. } => "INVALID_STATE".to_string(),
            VoxError::ServerStartFailed { .. } => "SERVER_START_FAILED".to_string(),
            VoxError::InvalidMessage { .. } => "INVALID_MESSAGE".to_string(),
            VoxError::Connection { .. } => "CONNECTION_FAILED".to_string(),
            VoxError::ConnectionClosed => "CONNECTION_CLOSED".to_string(),
            VoxError::Remote { code, .. } => code.clone(),
        }
    }

    /// Whether the caller can keep using the session after this error
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            VoxError::EngineFatal { .. }
                | VoxError::Initialization { .. }
                | VoxError::ServerStartFailed { .. }
                | VoxError::ConnectionClosed
        )
    }

    /// True for `NotFound`, including one reported by a remote server
    pub fn is_not_found(&self) -> bool {
        match self {
            VoxError::NotFound { .. } => true,
            VoxError::Remote { code, .. } => code == "NOT_FOUND",
            _ => false,
        }
    }

    /// True for `Unsatisfiable`, including one reported by a remote server
    pub fn is_unsatisfiable(&self) -> bool {
        match self {
            VoxError::Unsatisfiable { .. } => true,
            VoxError::Remote { code, .. } => code == "UNSATISFIABLE",
            _ => false,
        }
    }
}
