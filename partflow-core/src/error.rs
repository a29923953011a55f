//! Error types for partflow

use std::fmt;
use thiserror::Error;

use crate::SessionId;

/// Remote object store call that produced a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteOperation {
    CreateMultipartUpload,
    UploadPart,
    CompleteMultipartUpload,
    AbortMultipartUpload,
    HeadObject,
}

impl fmt::Display for RemoteOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RemoteOperation::CreateMultipartUpload => "CreateMultipartUpload",
            RemoteOperation::UploadPart => "UploadPart",
            RemoteOperation::CompleteMultipartUpload => "CompleteMultipartUpload",
            RemoteOperation::AbortMultipartUpload => "AbortMultipartUpload",
            RemoteOperation::HeadObject => "HeadObject",
        };
        f.write_str(name)
    }
}

/// Upload error.
///
/// Cloneable because part results are shared futures: every waiter
/// (`parts`, `complete_upload`, `abort_upload`) observes the same failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UploadError {
    #[error("Missing object key")]
    MissingKey,

    #[error("Partial upload requires an upload id")]
    MissingUploadHandle,

    #[error("Unknown upload session: {0}")]
    UnknownSession(SessionId),

    #[error("{operation} failed: {message}")]
    RemoteRequest {
        operation: RemoteOperation,
        message: String,
    },

    #[error("Source stream error: {0}")]
    Source(String),

    #[error("Invalid resume parameters: {0}")]
    InvalidResume(String),

    #[error("Upload session {0} exceeded the part number limit")]
    PartLimitExceeded(SessionId),

    #[error("Upload session {0} is already being finalized")]
    FinalizationInProgress(SessionId),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Uploader has shut down")]
    Shutdown,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl UploadError {
    /// Build a remote request error from any displayable cause
    pub fn remote(operation: RemoteOperation, cause: impl fmt::Display) -> Self {
        UploadError::RemoteRequest {
            operation,
            message: cause.to_string(),
        }
    }

    /// Returns true if the failure came from the object store
    pub fn is_remote(&self) -> bool {
        matches!(self, UploadError::RemoteRequest { .. })
    }
}
