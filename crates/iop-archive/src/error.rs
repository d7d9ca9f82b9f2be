//! Error types for archive intake
//!
//! Covers:
//! - Upload size violations (declared, actual, unpacked)
//! - Malformed or unsafe archives
//! - Staging directory I/O

use std::path::PathBuf;

/// Archive intake error
#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    /// Upload exceeds the configured maximum
    #[error("payload too large: {size} bytes exceeds the limit of {limit} bytes")]
    PayloadTooLarge {
        /// Observed (or declared) size in bytes
        size: u64,
        /// Configured maximum in bytes
        limit: u64,
    },

    /// Archive cannot be opened or lacks required content
    #[error("invalid archive: {0}")]
    InvalidArchive(String),

    /// Archive expands past the configured unpacked limit
    #[error("archive unpacks to more than {limit} bytes")]
    UnpackedTooLarge {
        /// Configured unpacked limit in bytes
        limit: u64,
    },

    /// Client body could not be read
    #[error("upload body could not be read: {0}")]
    Read(#[source] std::io::Error),

    /// Staging directory or file I/O failed
    #[error("staging failed at {path}: {source}")]
    Staging {
        /// Directory or file involved
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

impl IntakeError {
    /// Shorthand for [`IntakeError::InvalidArchive`]
    #[inline]
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidArchive(reason.into())
    }

    /// Check whether the error was caused by the uploaded content
    #[inline]
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Self::Staging { .. })
    }

    /// Check whether the error is a size-limit violation
    #[inline]
    #[must_use]
    pub fn is_size_violation(&self) -> bool {
        matches!(self, Self::PayloadTooLarge { .. } | Self::UnpackedTooLarge { .. })
    }

    /// Reason that is safe to return to a client
    ///
    /// Carries no category prefix. Staging failures expose no paths.
    #[must_use]
    pub fn public_reason(&self) -> String {
        match self {
            Self::PayloadTooLarge { size, limit } => {
                format!("{size} bytes exceeds the limit of {limit} bytes")
            }
            Self::InvalidArchive(reason) => reason.clone(),
            Self::UnpackedTooLarge { limit } => format!("archive unpacks to more than {limit} bytes"),
            Self::Read(_) => "upload body could not be read".to_string(),
            Self::Staging { .. } => "upload could not be staged".to_string(),
        }
    }
}
