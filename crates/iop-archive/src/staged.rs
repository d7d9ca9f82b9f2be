//! Scoped staging of one upload
//!
//! A [`StagedArchive`] owns the staged file on disk. The file is removed
//! when the value is released or dropped, including during unwinding, so a
//! request can never leave an upload behind.

use crate::cluster::{ArchiveMetadata, ClusterId};
use crate::contents::ArchiveContents;
use chrono::{DateTime, Utc};
use std::path::Path;
use tempfile::TempPath;

/// An upload staged to disk and unpacked into memory
#[derive(Debug)]
pub struct StagedArchive {
    path: TempPath,
    declared_size: Option<u64>,
    actual_size: u64,
    sha256: String,
    contents: ArchiveContents,
    metadata: ArchiveMetadata,
}

impl StagedArchive {
    pub(crate) fn new(
        path: TempPath,
        declared_size: Option<u64>,
        actual_size: u64,
        sha256: String,
        contents: ArchiveContents,
        metadata: ArchiveMetadata,
    ) -> Self {
        Self {
            path,
            declared_size,
            actual_size,
            sha256,
            contents,
            metadata,
        }
    }

    /// Location of the staged file
    #[inline]
    #[must_use]
    pub fn staged_path(&self) -> &Path {
        &self.path
    }

    /// Size announced by the client, if any
    #[inline]
    #[must_use]
    pub fn declared_size(&self) -> Option<u64> {
        self.declared_size
    }

    /// Bytes actually received
    #[inline]
    #[must_use]
    pub fn actual_size(&self) -> u64 {
        self.actual_size
    }

    /// Hex SHA-256 of the uploaded bytes
    #[inline]
    #[must_use]
    pub fn sha256(&self) -> &str {
        &self.sha256
    }

    /// Unpacked files
    #[inline]
    #[must_use]
    pub fn contents(&self) -> &ArchiveContents {
        &self.contents
    }

    /// Cluster metadata
    #[inline]
    #[must_use]
    pub fn metadata(&self) -> &ArchiveMetadata {
        &self.metadata
    }

    /// Canonical cluster id
    #[inline]
    #[must_use]
    pub fn cluster_id(&self) -> &ClusterId {
        &self.metadata.cluster_id
    }

    /// Gatherer-reported collection time
    #[inline]
    #[must_use]
    pub fn gathered_at(&self) -> Option<DateTime<Utc>> {
        self.metadata.gathered_at
    }

    /// Delete the staged file now and report any I/O error
    pub fn release(self) -> std::io::Result<()> {
        let path = self.path.to_path_buf();
        let result = self.path.close();
        match &result {
            Ok(()) => tracing::debug!(path = %path.display(), "released staged upload"),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove staged upload"),
        }
        result
    }
}
