//! In-memory view of an unpacked archive
//!
//! Reads a gzip-compressed or plain tar stream into a path-indexed map of
//! regular files. Entries are vetted while reading:
//! - absolute paths and `..` components fail the whole archive
//! - symlinks, hard links, devices and FIFOs are skipped
//! - the unpacked byte total and the entry count are bounded
//!
//! When every file lives under one top-level wrapper directory (the usual
//! shape of a gathered archive), that directory is stripped so lookups use
//! paths like `config/version.json`. A single top-level directory that is
//! itself one of the gatherer's [`GATHER_DIRS`] is kept.

use crate::error::IntakeError;
use flate2::read::GzDecoder;
use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Read};
use std::path::{Component, Path};
use tar::EntryType;

/// Maximum number of regular files accepted in one archive
pub const MAX_ENTRIES: usize = 50_000;

/// Default bound on the total unpacked bytes (1 GiB)
pub const DEFAULT_MAX_UNPACKED_BYTES: u64 = 1024 * 1024 * 1024;

/// Top-level directories written by the gatherer; never stripped as a wrapper
pub const GATHER_DIRS: [&str; 5] = ["config", "events", "namespaces", "aggregated", "conditional"];

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Limits applied while unpacking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnpackLimits {
    /// Maximum total bytes of regular-file content
    pub max_unpacked_bytes: u64,
    /// Maximum number of regular files
    pub max_entries: usize,
}

impl Default for UnpackLimits {
    fn default() -> Self {
        Self {
            max_unpacked_bytes: DEFAULT_MAX_UNPACKED_BYTES,
            max_entries: MAX_ENTRIES,
        }
    }
}

/// Regular files of an archive keyed by normalized relative path
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveContents {
    files: BTreeMap<String, Vec<u8>>,
    unpacked_size: u64,
    stripped_root: Option<String>,
}

impl ArchiveContents {
    /// Read a tar stream, detecting gzip compression from the magic bytes
    pub fn read_from<R: Read>(reader: R, limits: UnpackLimits) -> Result<Self, IntakeError> {
        let mut buffered = BufReader::new(reader);
        let compressed = buffered
            .fill_buf()
            .map_err(IntakeError::Read)?
            .starts_with(&GZIP_MAGIC);

        if compressed {
            Self::read_tar(GzDecoder::new(buffered), limits)
        } else {
            Self::read_tar(buffered, limits)
        }
    }

    fn read_tar<R: Read>(reader: R, limits: UnpackLimits) -> Result<Self, IntakeError> {
        let mut archive = tar::Archive::new(reader);
        let entries = archive
            .entries()
            .map_err(|e| IntakeError::invalid(format!("not a tar archive: {e}")))?;

        let mut files = BTreeMap::new();
        let mut unpacked_size: u64 = 0;

        for entry in entries {
            let mut entry =
                entry.map_err(|e| IntakeError::invalid(format!("corrupt archive entry: {e}")))?;

            let kind = entry.header().entry_type();
            let raw_path = entry
                .path()
                .map_err(|e| IntakeError::invalid(format!("unreadable entry path: {e}")))?
                .into_owned();
            let Some(path) = normalize_entry_path(&raw_path)? else {
                continue;
            };

            match kind {
                EntryType::Regular | EntryType::Continuous => {}
                EntryType::Directory => continue,
                other => {
                    tracing::debug!(path = %path, kind = ?other, "skipping non-regular archive entry");
                    continue;
                }
            }

            if files.len() >= limits.max_entries {
                return Err(IntakeError::invalid(format!(
                    "archive holds more than {} files",
                    limits.max_entries
                )));
            }

            let declared = entry.size();
            unpacked_size = unpacked_size.saturating_add(declared);
            if unpacked_size > limits.max_unpacked_bytes {
                return Err(IntakeError::UnpackedTooLarge {
                    limit: limits.max_unpacked_bytes,
                });
            }

            let mut data = Vec::with_capacity(usize::try_from(declared).unwrap_or(0).min(1 << 20));
            entry
                .by_ref()
                .take(declared)
                .read_to_end(&mut data)
                .map_err(|e| IntakeError::invalid(format!("truncated entry {path}: {e}")))?;

            files.insert(path, data);
        }

        if files.is_empty() {
            return Err(IntakeError::invalid("archive contains no files"));
        }

        let stripped_root = common_root(&files);
        let files = match &stripped_root {
            Some(root) => {
                let prefix_len = root.len() + 1;
                files
                    .into_iter()
                    .map(|(path, data)| (path[prefix_len..].to_string(), data))
                    .collect()
            }
            None => files,
        };

        Ok(Self {
            files,
            unpacked_size,
            stripped_root,
        })
    }

    /// Build contents directly from path/bytes pairs
    #[must_use]
    pub fn from_files<I, P>(files: I) -> Self
    where
        I: IntoIterator<Item = (P, Vec<u8>)>,
        P: Into<String>,
    {
        let files: BTreeMap<String, Vec<u8>> =
            files.into_iter().map(|(p, d)| (p.into(), d)).collect();
        let unpacked_size = files.values().map(|d| d.len() as u64).sum();
        Self {
            files,
            unpacked_size,
            stripped_root: None,
        }
    }

    /// Raw bytes of the file at `path`
    #[inline]
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&[u8]> {
        self.files.get(path).map(Vec::as_slice)
    }

    /// File at `path` decoded as UTF-8
    #[must_use]
    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(|d| std::str::from_utf8(d).ok())
    }

    /// Check whether a file exists
    #[inline]
    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    /// All files in path order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.files.iter().map(|(p, d)| (p.as_str(), d.as_slice()))
    }

    /// Number of regular files
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Check for an empty archive
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Total bytes of regular-file content
    #[inline]
    #[must_use]
    pub fn unpacked_size(&self) -> u64 {
        self.unpacked_size
    }

    /// Top-level directory removed from every path, if any
    #[inline]
    #[must_use]
    pub fn stripped_root(&self) -> Option<&str> {
        self.stripped_root.as_deref()
    }
}

/// Normalize an entry path to `a/b/c` form.
///
/// Returns `Ok(None)` for paths that name nothing (`.`), and an error for
/// paths that could escape the archive root.
fn normalize_entry_path(path: &Path) -> Result<Option<String>, IntakeError> {
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => {
                let part = part
                    .to_str()
                    .ok_or_else(|| IntakeError::invalid("entry path is not valid UTF-8"))?;
                parts.push(part);
            }
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(IntakeError::invalid(
                    "entry path contains a parent-directory component",
                ));
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(IntakeError::invalid("entry path is absolute"));
            }
        }
    }
    if parts.is_empty() {
        Ok(None)
    } else {
        Ok(Some(parts.join("/")))
    }
}

/// Wrapper directory shared by every file, unless it is a gatherer directory
fn common_root(files: &BTreeMap<String, Vec<u8>>) -> Option<String> {
    let mut root: Option<&str> = None;
    for path in files.keys() {
        let (first, _) = path.split_once('/')?;
        match root {
            None => root = Some(first),
            Some(existing) if existing == first => {}
            Some(_) => return None,
        }
    }
    root.filter(|r| !GATHER_DIRS.contains(r)).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use iop_test_utils::ArchiveBuilder;
    use pretty_assertions::assert_eq;

    fn read(bytes: &[u8]) -> Result<ArchiveContents, IntakeError> {
        ArchiveContents::read_from(bytes, UnpackLimits::default())
    }

    #[test]
    fn reads_gzip_archive_and_strips_single_root() {
        let bytes = ArchiveBuilder::new()
            .root_dir("insights-cluster-abc-20260101")
            .text("config/id", "cluster-abc")
            .text("config/version.json", "{}")
            .build_tar_gz();

        let contents = read(&bytes).unwrap();
        assert_eq!(contents.stripped_root(), Some("insights-cluster-abc-20260101"));
        assert_eq!(contents.get_str("config/id"), Some("cluster-abc"));
        assert!(contents.contains("config/version.json"));
        assert_eq!(contents.len(), 2);
    }

    #[test]
    fn reads_plain_tar_without_root() {
        let bytes = ArchiveBuilder::new()
            .text("a.txt", "one")
            .text("config/b.txt", "two")
            .build_tar();

        let contents = read(&bytes).unwrap();
        assert_eq!(contents.stripped_root(), None);
        assert_eq!(contents.get_str("a.txt"), Some("one"));
        assert_eq!(contents.unpacked_size(), 6);
    }

    #[test]
    fn keeps_gather_directory_as_only_top_level() {
        let bytes = ArchiveBuilder::new()
            .text("config/id", "cluster-bare")
            .text("config/version.json", "{}")
            .build_tar_gz();

        let contents = read(&bytes).unwrap();
        assert_eq!(contents.stripped_root(), None);
        assert_eq!(contents.get_str("config/id"), Some("cluster-bare"));
        assert!(contents.contains("config/version.json"));
    }

    #[test]
    fn strips_wrapper_around_single_gather_directory() {
        let bytes = ArchiveBuilder::new()
            .root_dir("insights-c1")
            .text("config/id", "c1")
            .build_tar();

        let contents = read(&bytes).unwrap();
        assert_eq!(contents.stripped_root(), Some("insights-c1"));
        assert!(contents.contains("config/id"));
    }

    #[test]
    fn rejects_parent_directory_entries() {
        let bytes = ArchiveBuilder::new()
            .raw_entry("../escape.txt", b"x".to_vec())
            .build_tar();

        let err = read(&bytes).unwrap_err();
        assert!(matches!(err, IntakeError::InvalidArchive(_)), "{err:?}");
    }

    #[test]
    fn skips_symlinks() {
        let bytes = ArchiveBuilder::new()
            .text("config/id", "c1")
            .symlink("config/link", "config/id")
            .build_tar();

        let contents = read(&bytes).unwrap();
        assert!(!contents.contains("config/link"));
        assert_eq!(contents.len(), 1);
    }

    #[test]
    fn enforces_unpacked_limit() {
        let bytes = ArchiveBuilder::new()
            .file("big.bin", vec![0u8; 4096])
            .build_tar_gz();

        let limits = UnpackLimits {
            max_unpacked_bytes: 1024,
            ..UnpackLimits::default()
        };
        let err = ArchiveContents::read_from(bytes.as_slice(), limits).unwrap_err();
        assert!(matches!(err, IntakeError::UnpackedTooLarge { limit: 1024 }));
    }

    #[test]
    fn enforces_entry_cap() {
        let bytes = ArchiveBuilder::new()
            .text("a", "1")
            .text("b", "2")
            .text("c", "3")
            .build_tar();

        let limits = UnpackLimits {
            max_entries: 2,
            ..UnpackLimits::default()
        };
        assert!(ArchiveContents::read_from(bytes.as_slice(), limits).is_err());
    }

    #[test]
    fn garbage_is_not_an_archive() {
        let err = read(b"this is definitely not a tarball").unwrap_err();
        assert!(matches!(err, IntakeError::InvalidArchive(_)));
    }

    #[test]
    fn corrupt_gzip_is_invalid() {
        let mut bytes = vec![0x1f, 0x8b];
        bytes.extend_from_slice(b"truncated");
        assert!(read(&bytes).is_err());
    }
}
