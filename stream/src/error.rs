//! Error taxonomy for multipart uploads.
//!
//! [`StoreError`] is what an object-store client reports for a single call.
//! [`UploadError`] is what the stream surfaces to its caller once retries,
//! aborts and state checks have been applied.

use std::fmt;

use thiserror::Error;

use crate::coordinator::SessionState;

/// Failure of a single object-store call.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Credentials missing, expired or lacking permission
    #[error("not authorized: {message}")]
    Auth { message: String },

    /// Bucket or upload session does not exist
    #[error("not found: {message}")]
    NotFound { message: String },

    /// Network or timeout class failure, safe to retry
    #[error("transient store failure: {message}")]
    Transient { message: String },

    /// Payload rejected, session expired, or anything else not worth retrying
    #[error("permanent store failure: {message}")]
    Permanent { message: String },

    /// Finalize rejected, e.g. non-contiguous part numbers or a part too small
    #[error("rejected by store: {message}")]
    Validation { message: String },
}

impl StoreError {
    pub fn transient(message: impl Into<String>) -> Self {
        StoreError::Transient {
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        StoreError::Permanent {
            message: message.into(),
        }
    }

    /// Returns true if the call may succeed when issued again unchanged
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Transient { .. })
    }
}

/// The store call an [`UploadError`] originated from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    Begin,
    UploadPart(u32),
    Complete,
    Abort,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Begin => write!(f, "begin-upload"),
            Operation::UploadPart(part_number) => write!(f, "upload-part {}", part_number),
            Operation::Complete => write!(f, "complete-upload"),
            Operation::Abort => write!(f, "abort-upload"),
        }
    }
}

/// Error surfaced by [`crate::UploadStream`].
#[derive(Clone, Debug, Error)]
pub enum UploadError {
    /// A retryable failure persisted through every allowed attempt
    #[error("{operation} failed after {attempts} attempts: {source}")]
    Transient {
        operation: Operation,
        attempts: u32,
        #[source]
        source: StoreError,
    },

    /// A failure that is not retried
    #[error("{operation} failed: {source}")]
    Permanent {
        operation: Operation,
        #[source]
        source: StoreError,
    },

    /// Operation invoked in the wrong session state
    #[error("cannot {operation} while upload is {state}")]
    State {
        operation: &'static str,
        state: SessionState,
    },

    /// Abort itself failed; the store may still hold an incomplete upload
    #[error("failed to abort upload {upload_id} ({cause}): {source}")]
    AbortFailure {
        upload_id: String,
        cause: Box<UploadError>,
        #[source]
        source: Box<UploadError>,
    },

    /// The producer side gave up on the upload
    #[error("upload cancelled")]
    Cancelled,

    /// Reading the byte source failed
    #[error("failed to read input: {message}")]
    Input { message: String },

    #[error("invalid upload configuration: {reason}")]
    Config { reason: String },
}

impl UploadError {
    /// The store-level failure behind this error, if any
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            UploadError::Transient { source, .. } | UploadError::Permanent { source, .. } => {
                Some(source)
            }
            UploadError::AbortFailure { source, .. } => source.store_error(),
            _ => None,
        }
    }

    /// Returns true if the store may have been left with an orphaned upload
    pub fn is_orphaned(&self) -> bool {
        match self {
            UploadError::AbortFailure { .. } => true,
            UploadError::Transient { operation, .. } | UploadError::Permanent { operation, .. } => {
                *operation == Operation::Complete
            }
            _ => false,
        }
    }
}
