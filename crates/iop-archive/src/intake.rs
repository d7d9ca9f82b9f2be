//! Upload intake
//!
//! Order of checks for one upload:
//! 1. file name extension (when the client sent one)
//! 2. declared size against the maximum, before reading
//! 3. bounded read into memory; actual size against the maximum
//! 4. staging to a unique file under the staging directory
//! 5. unpacking and cluster id extraction
//!
//! Nothing touches the staging directory until steps 1-3 have passed.

use crate::cluster::ArchiveMetadata;
use crate::contents::{ArchiveContents, UnpackLimits, MAX_ENTRIES};
use crate::error::IntakeError;
use crate::staged::StagedArchive;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Default maximum upload size (100 MiB)
pub const DEFAULT_MAX_UPLOAD_SIZE: u64 = 100 * 1024 * 1024;

/// Default staging directory
pub const DEFAULT_STAGING_DIR: &str = "/tmp/insights-uploads";

/// Unpacked bytes allowed per uploaded byte when no explicit limit is set
pub const UNPACKED_SIZE_RATIO: u64 = 10;

/// Accepted archive file name suffixes
pub const ACCEPTED_EXTENSIONS: [&str; 3] = [".tar.gz", ".tgz", ".tar"];

/// Intake configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntakeConfig {
    /// Maximum accepted upload size in bytes
    pub max_upload_size: u64,
    /// Directory for staged uploads
    pub staging_dir: PathBuf,
    /// Maximum total unpacked size in bytes; derived from the upload limit when unset
    pub unpacked_size_limit: Option<u64>,
    /// Maximum number of files in one archive
    pub max_entries: usize,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            max_upload_size: DEFAULT_MAX_UPLOAD_SIZE,
            staging_dir: PathBuf::from(DEFAULT_STAGING_DIR),
            unpacked_size_limit: None,
            max_entries: MAX_ENTRIES,
        }
    }
}

impl IntakeConfig {
    /// Set maximum upload size
    #[inline]
    #[must_use]
    pub fn with_max_upload_size(mut self, bytes: u64) -> Self {
        self.max_upload_size = bytes;
        self
    }

    /// Set staging directory
    #[inline]
    #[must_use]
    pub fn with_staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = dir.into();
        self
    }

    /// Set unpacked size limit
    #[inline]
    #[must_use]
    pub fn with_unpacked_size_limit(mut self, bytes: Option<u64>) -> Self {
        self.unpacked_size_limit = bytes;
        self
    }

    /// Unpacked size bound actually enforced
    ///
    /// An explicit limit wins; otherwise `max_upload_size * UNPACKED_SIZE_RATIO`.
    #[must_use]
    pub fn effective_unpacked_limit(&self) -> u64 {
        self.unpacked_size_limit
            .unwrap_or_else(|| self.max_upload_size.saturating_mul(UNPACKED_SIZE_RATIO))
    }

    fn unpack_limits(&self) -> UnpackLimits {
        UnpackLimits {
            max_unpacked_bytes: self.effective_unpacked_limit(),
            max_entries: self.max_entries,
        }
    }
}

/// One upload as handed over by the transport
#[derive(Debug)]
pub struct Upload<R> {
    /// Label used in the staged file name (usually the request id)
    pub label: String,
    /// Client-supplied file name
    pub file_name: Option<String>,
    /// Client-declared content length
    pub declared_size: Option<u64>,
    /// Body stream
    pub body: R,
}

impl<R: Read> Upload<R> {
    /// Create an upload with only a label and a body
    pub fn new(label: impl Into<String>, body: R) -> Self {
        Self {
            label: label.into(),
            file_name: None,
            declared_size: None,
            body,
        }
    }

    /// Attach the client file name
    #[must_use]
    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }

    /// Attach the declared content length
    #[must_use]
    pub fn with_declared_size(mut self, size: u64) -> Self {
        self.declared_size = Some(size);
        self
    }
}

/// Validates, stages and unpacks uploads
#[derive(Debug, Clone, Default)]
pub struct ArchiveIntake {
    config: IntakeConfig,
}

impl ArchiveIntake {
    /// Create intake with configuration
    #[inline]
    #[must_use]
    pub fn new(config: IntakeConfig) -> Self {
        Self { config }
    }

    /// Active configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &IntakeConfig {
        &self.config
    }

    /// Accept one upload, returning the staged archive
    ///
    /// On error no staged file remains.
    pub fn accept<R: Read>(&self, upload: Upload<R>) -> Result<StagedArchive, IntakeError> {
        let limit = self.config.max_upload_size;

        if let Some(name) = upload.file_name.as_deref() {
            check_extension(name)?;
        }
        if let Some(declared) = upload.declared_size {
            if declared > limit {
                return Err(IntakeError::PayloadTooLarge {
                    size: declared,
                    limit,
                });
            }
        }

        let bytes = read_bounded(upload.body, limit)?;
        let actual_size = bytes.len() as u64;
        if actual_size == 0 {
            return Err(IntakeError::invalid("upload is empty"));
        }

        let sha256 = hex::encode(Sha256::digest(&bytes));
        let path = self.stage(&upload.label, upload.file_name.as_deref(), &bytes)?;
        drop(bytes);

        let file = File::open(&path).map_err(|source| IntakeError::Staging {
            path: path.to_path_buf(),
            source,
        })?;
        let contents = ArchiveContents::read_from(file, self.config.unpack_limits())?;
        let metadata = ArchiveMetadata::extract(&contents)?;

        tracing::debug!(
            path = %path.display(),
            bytes = actual_size,
            files = contents.len(),
            cluster_id = %metadata.cluster_id,
            "staged upload"
        );

        Ok(StagedArchive::new(
            path,
            upload.declared_size,
            actual_size,
            sha256,
            contents,
            metadata,
        ))
    }

    fn stage(
        &self,
        label: &str,
        file_name: Option<&str>,
        bytes: &[u8],
    ) -> Result<tempfile::TempPath, IntakeError> {
        let dir = &self.config.staging_dir;
        std::fs::create_dir_all(dir).map_err(|source| staging_error(dir, source))?;

        let prefix = format!("upload-{}-", sanitize_label(label));
        let suffix = file_name.and_then(matching_extension).unwrap_or("");
        let mut file = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(suffix)
            .tempfile_in(dir)
            .map_err(|source| staging_error(dir, source))?;

        file.write_all(bytes)
            .and_then(|()| file.flush())
            .map_err(|source| staging_error(file.path(), source))?;

        Ok(file.into_temp_path())
    }
}

fn staging_error(path: &Path, source: std::io::Error) -> IntakeError {
    IntakeError::Staging {
        path: path.to_path_buf(),
        source,
    }
}

fn read_bounded<R: Read>(body: R, limit: u64) -> Result<Vec<u8>, IntakeError> {
    let mut bytes = Vec::new();
    body.take(limit.saturating_add(1))
        .read_to_end(&mut bytes)
        .map_err(IntakeError::Read)?;
    let size = bytes.len() as u64;
    if size > limit {
        return Err(IntakeError::PayloadTooLarge { size, limit });
    }
    Ok(bytes)
}

fn matching_extension(name: &str) -> Option<&'static str> {
    let lower = name.to_ascii_lowercase();
    ACCEPTED_EXTENSIONS
        .into_iter()
        .find(|ext| lower.ends_with(ext))
}

fn check_extension(name: &str) -> Result<(), IntakeError> {
    if matching_extension(name).is_some() {
        Ok(())
    } else {
        Err(IntakeError::invalid(format!(
            "file must be one of {}",
            ACCEPTED_EXTENSIONS.join(", ")
        )))
    }
}

fn sanitize_label(label: &str) -> String {
    let cleaned: String = label
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
        .take(64)
        .collect();
    if cleaned.is_empty() {
        "anonymous".to_string()
    } else {
        cleaned
    }
}
