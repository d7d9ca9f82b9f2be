//! Pipeline error taxonomy
//!
//! Every stage error maps onto one [`FailureKind`], which fixes the stable
//! error code, the HTTP status and whether a client may retry.

use crate::identity::IdentityError;
use crate::state::StateError;
use iop_archive::IntakeError;
use iop_rules::{DeadlineExceeded, EvaluationError};
use iop_store::StoreError;
use serde::Serialize;
use std::fmt;

/// Category of a failed request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Identity header missing or malformed
    InvalidIdentity,
    /// Archive unreadable, unsafe or without a cluster id
    InvalidArchive,
    /// Upload or its unpacked contents over the limit
    PayloadTooLarge,
    /// Required facts could not be gathered
    EvaluationFailure,
    /// Store transaction failed and was rolled back
    PersistenceFailure,
    /// Request budget exhausted
    Timeout,
    /// Service-side fault unrelated to the upload
    Internal,
}

impl FailureKind {
    /// Stable machine-readable code
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::InvalidIdentity => "invalid_identity",
            Self::InvalidArchive => "invalid_archive",
            Self::PayloadTooLarge => "payload_too_large",
            Self::EvaluationFailure => "evaluation_failure",
            Self::PersistenceFailure => "persistence_failure",
            Self::Timeout => "timeout",
            Self::Internal => "internal_error",
        }
    }

    /// HTTP status the binding responds with
    #[must_use]
    pub fn http_status(self) -> u16 {
        match self {
            Self::InvalidIdentity => 401,
            Self::InvalidArchive | Self::PayloadTooLarge => 400,
            Self::EvaluationFailure | Self::Internal => 500,
            Self::PersistenceFailure => 503,
            Self::Timeout => 504,
        }
    }

    /// Whether resubmitting the same upload may succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::PersistenceFailure | Self::Timeout)
    }

    /// Whether the client's input caused the failure
    #[inline]
    #[must_use]
    pub fn is_client_error(self) -> bool {
        matches!(
            self,
            Self::InvalidIdentity | Self::InvalidArchive | Self::PayloadTooLarge
        )
    }

    /// Fixed user-facing message
    #[must_use]
    pub fn message(self) -> &'static str {
        match self {
            Self::InvalidIdentity => "invalid identity",
            Self::InvalidArchive => "invalid archive",
            Self::PayloadTooLarge => "payload too large",
            Self::EvaluationFailure => "archive could not be evaluated",
            Self::PersistenceFailure => "results could not be stored; retry later",
            Self::Timeout => "request timed out; retry later",
            Self::Internal => "internal error",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Error from any pipeline stage
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Identity extraction failed
    #[error("identity: {0}")]
    Identity(#[from] IdentityError),

    /// Archive intake failed
    #[error("intake: {0}")]
    Intake(#[from] IntakeError),

    /// Evaluation aborted
    #[error("evaluation: {0}")]
    Evaluation(#[from] EvaluationError),

    /// Persistence rolled back
    #[error("store: {0}")]
    Store(#[from] StoreError),

    /// Budget ran out between stages
    #[error(transparent)]
    Deadline(#[from] DeadlineExceeded),

    /// Lifecycle bookkeeping went wrong
    #[error("lifecycle: {0}")]
    State(#[from] StateError),

    /// Worker could not run the pipeline
    #[error("worker: {0}")]
    Worker(String),
}

impl PipelineError {
    /// Category of this error
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Identity(_) => FailureKind::InvalidIdentity,
            Self::Intake(IntakeError::PayloadTooLarge { .. } | IntakeError::UnpackedTooLarge { .. }) => {
                FailureKind::PayloadTooLarge
            }
            Self::Intake(err) if err.is_client_error() => FailureKind::InvalidArchive,
            Self::Intake(_) | Self::State(_) | Self::Worker(_) => FailureKind::Internal,
            Self::Evaluation(err) if err.is_timeout() => FailureKind::Timeout,
            Self::Evaluation(_) => FailureKind::EvaluationFailure,
            Self::Store(err) if err.is_timeout() => FailureKind::Timeout,
            Self::Store(_) => FailureKind::PersistenceFailure,
            Self::Deadline(_) => FailureKind::Timeout,
        }
    }

    /// Whether the same request may succeed later
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// Message safe to return to the client
    ///
    /// Client-input kinds carry a sanitized reason; everything else gets the
    /// fixed message of its kind.
    #[must_use]
    pub fn public_message(&self) -> String {
        let kind = self.kind();
        match self {
            Self::Identity(err) => format!("{}: {err}", kind.message()),
            Self::Intake(err) if kind.is_client_error() => {
                format!("{}: {}", kind.message(), err.public_reason())
            }
            _ => kind.message().to_string(),
        }
    }
}

/// Failed request with its id
#[derive(Debug, thiserror::Error)]
#[error("request {request_id} failed ({}): {error}", .error.kind())]
pub struct PipelineFailure {
    /// Request id
    pub request_id: String,
    /// Cause
    #[source]
    pub error: PipelineError,
}

impl PipelineFailure {
    /// Category of the failure
    #[inline]
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        self.error.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    #[test]
    fn taxonomy_table() {
        let table = [
            (FailureKind::InvalidIdentity, "invalid_identity", 401, false),
            (FailureKind::InvalidArchive, "invalid_archive", 400, false),
            (FailureKind::PayloadTooLarge, "payload_too_large", 400, false),
            (FailureKind::EvaluationFailure, "evaluation_failure", 500, false),
            (FailureKind::PersistenceFailure, "persistence_failure", 503, true),
            (FailureKind::Timeout, "timeout", 504, true),
            (FailureKind::Internal, "internal_error", 500, false),
        ];
        for (kind, code, status, retry) in table {
            assert_eq!(kind.code(), code);
            assert_eq!(kind.http_status(), status);
            assert_eq!(kind.is_retryable(), retry);
        }
    }

    #[test]
    fn stage_errors_map_without_reinterpretation() {
        let timeout = DeadlineExceeded {
            budget: Duration::from_secs(1),
        };
        assert_eq!(PipelineError::from(IdentityError::Missing).kind(), FailureKind::InvalidIdentity);
        assert_eq!(
            PipelineError::from(IntakeError::PayloadTooLarge { size: 2, limit: 1 }).kind(),
            FailureKind::PayloadTooLarge
        );
        assert_eq!(
            PipelineError::from(IntakeError::UnpackedTooLarge { limit: 1 }).kind(),
            FailureKind::PayloadTooLarge
        );
        assert_eq!(
            PipelineError::from(IntakeError::invalid("no cluster id")).kind(),
            FailureKind::InvalidArchive
        );
        assert_eq!(
            PipelineError::from(EvaluationError::RequiredFact {
                parser: "metadata".into(),
                reason: "absent".into(),
            })
            .kind(),
            FailureKind::EvaluationFailure
        );
        assert_eq!(PipelineError::from(EvaluationError::from(timeout)).kind(), FailureKind::Timeout);
        assert_eq!(PipelineError::from(StoreError::from(timeout)).kind(), FailureKind::Timeout);
        assert_eq!(PipelineError::from(timeout).kind(), FailureKind::Timeout);
        assert_eq!(
            PipelineError::from(StoreError::Sqlite(rusqlite_busy())).kind(),
            FailureKind::PersistenceFailure
        );
    }

    #[test]
    fn public_messages_hide_internals() {
        let staging = PipelineError::from(IntakeError::Staging {
            path: PathBuf::from("/srv/private/staging"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        });
        assert_eq!(staging.kind(), FailureKind::Internal);
        assert_eq!(staging.public_message(), "internal error");

        let invalid = PipelineError::from(IntakeError::invalid("archive has no cluster id"));
        assert!(invalid.public_message().contains("no cluster id"));

        let store = PipelineError::from(StoreError::Sqlite(rusqlite_busy()));
        assert!(!store.public_message().contains("database"));
    }

    fn rusqlite_busy() -> iop_store::rusqlite::Error {
        iop_store::rusqlite::Error::SqliteFailure(
            iop_store::rusqlite::ffi::Error::new(iop_store::rusqlite::ffi::SQLITE_BUSY),
            None,
        )
    }
}
