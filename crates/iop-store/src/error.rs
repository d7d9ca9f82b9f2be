//! Store errors

use iop_rules::DeadlineExceeded;

/// Persistence failure; every variant rolls the transaction back
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// `SQLite` error
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON column could not be (de)serialized
    #[error("json column error: {0}")]
    Json(#[from] serde_json::Error),

    /// Deadline passed before commit
    #[error(transparent)]
    Deadline(#[from] DeadlineExceeded),

    /// Result does not belong to the addressed cluster
    #[error("result for cluster {found} cannot be stored under {expected}")]
    ClusterMismatch {
        /// Addressed cluster
        expected: String,
        /// Cluster in the result
        found: String,
    },

    /// Stored value could not be decoded
    #[error("corrupt {column} column: {reason}")]
    Corrupt {
        /// Column name
        column: &'static str,
        /// Decode failure
        reason: String,
    },
}

impl StoreError {
    /// Deadline expiry rather than a database fault
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Deadline(_))
    }

    /// Whether the same request may succeed later
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Sqlite(_) | Self::Deadline(_) => true,
            Self::Json(_) | Self::ClusterMismatch { .. } | Self::Corrupt { .. } => false,
        }
    }

    /// Database busy or locked by another writer
    #[must_use]
    pub fn is_contention(&self) -> bool {
        match self {
            Self::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}
