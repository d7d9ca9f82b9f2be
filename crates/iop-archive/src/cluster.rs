//! Cluster identity carried inside an archive
//!
//! The canonical cluster id comes from the archive metadata document
//! (`insights_archive_metadata.json`, then `metadata.json`), falling back
//! to the plain-text `config/id` entry written by the gatherer.

use crate::contents::ArchiveContents;
use crate::error::IntakeError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Metadata documents searched for a cluster id, in order
pub const METADATA_ENTRIES: [&str; 2] = ["insights_archive_metadata.json", "metadata.json"];

/// Plain-text fallback holding only the cluster id
pub const CLUSTER_ID_ENTRY: &str = "config/id";

/// Maximum cluster id length
pub const MAX_CLUSTER_ID_LEN: usize = 128;

/// Validated cluster identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct ClusterId(String);

impl ClusterId {
    /// Validate and wrap a raw id (surrounding whitespace is trimmed)
    pub fn parse(raw: &str) -> Result<Self, IntakeError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(IntakeError::invalid("cluster id is empty"));
        }
        if trimmed.len() > MAX_CLUSTER_ID_LEN {
            return Err(IntakeError::invalid(format!(
                "cluster id is longer than {MAX_CLUSTER_ID_LEN} characters"
            )));
        }
        if !trimmed
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
        {
            return Err(IntakeError::invalid("cluster id contains invalid characters"));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Borrow as `&str`
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ClusterId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for ClusterId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Identity facts extracted from an archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveMetadata {
    /// Canonical cluster id
    pub cluster_id: ClusterId,
    /// Collection time reported by the gatherer
    pub gathered_at: Option<DateTime<Utc>>,
    /// Entry the cluster id was read from
    pub source: String,
}

#[derive(Debug, Deserialize)]
struct MetadataDocument {
    #[serde(default)]
    cluster_id: Option<String>,
    #[serde(default)]
    gathered_at: Option<String>,
}

impl ArchiveMetadata {
    /// Extract cluster metadata from unpacked contents
    pub fn extract(contents: &ArchiveContents) -> Result<Self, IntakeError> {
        let mut gathered_at = None;

        for entry in METADATA_ENTRIES {
            let Some(raw) = contents.get(entry) else {
                continue;
            };
            let doc: MetadataDocument = serde_json::from_slice(raw)
                .map_err(|e| IntakeError::invalid(format!("{entry} is not valid JSON: {e}")))?;

            if gathered_at.is_none() {
                gathered_at = doc.gathered_at.as_deref().and_then(parse_gathered_at);
            }
            if let Some(id) = doc.cluster_id {
                return Ok(Self {
                    cluster_id: ClusterId::parse(&id)?,
                    gathered_at,
                    source: entry.to_string(),
                });
            }
        }

        if let Some(raw) = contents.get(CLUSTER_ID_ENTRY) {
            let text = std::str::from_utf8(raw)
                .map_err(|_| IntakeError::invalid(format!("{CLUSTER_ID_ENTRY} is not UTF-8")))?;
            return Ok(Self {
                cluster_id: ClusterId::parse(text)?,
                gathered_at,
                source: CLUSTER_ID_ENTRY.to_string(),
            });
        }

        Err(IntakeError::invalid("archive metadata does not name a cluster"))
    }
}

fn parse_gathered_at(raw: &str) -> Option<DateTime<Utc>> {
    match DateTime::parse_from_rfc3339(raw.trim()) {
        Ok(ts) => Some(ts.with_timezone(&Utc)),
        Err(e) => {
            tracing::warn!(error = %e, "ignoring unparseable gathered_at in archive metadata");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn contents(files: &[(&str, &str)]) -> ArchiveContents {
        ArchiveContents::from_files(files.iter().map(|(p, d)| (*p, d.as_bytes().to_vec())))
    }

    #[test]
    fn cluster_id_validation() {
        assert_eq!(ClusterId::parse("  cluster-abc \n").unwrap().as_str(), "cluster-abc");
        assert!(ClusterId::parse("").is_err());
        assert!(ClusterId::parse("has space").is_err());
        assert!(ClusterId::parse("../etc").is_err());
        assert!(ClusterId::parse(&"a".repeat(129)).is_err());
        assert!(ClusterId::parse(&"a".repeat(128)).is_ok());
    }

    #[test]
    fn prefers_insights_metadata_document() {
        let c = contents(&[
            (
                "insights_archive_metadata.json",
                r#"{"cluster_id":"from-insights","gathered_at":"2026-01-02T03:04:05Z"}"#,
            ),
            ("metadata.json", r#"{"cluster_id":"from-metadata"}"#),
            ("config/id", "from-config"),
        ]);
        let meta = ArchiveMetadata::extract(&c).unwrap();
        assert_eq!(meta.cluster_id.as_str(), "from-insights");
        assert_eq!(meta.source, "insights_archive_metadata.json");
        assert_eq!(
            meta.gathered_at.map(|t| t.to_rfc3339()),
            Some("2026-01-02T03:04:05+00:00".to_string())
        );
    }

    #[test]
    fn falls_back_to_config_id() {
        let c = contents(&[("metadata.json", r#"{"other":1}"#), ("config/id", "cluster-xyz\n")]);
        let meta = ArchiveMetadata::extract(&c).unwrap();
        assert_eq!(meta.cluster_id.as_str(), "cluster-xyz");
        assert_eq!(meta.source, CLUSTER_ID_ENTRY);
    }

    #[test]
    fn malformed_metadata_is_invalid() {
        let c = contents(&[("metadata.json", "{not json")]);
        assert!(matches!(
            ArchiveMetadata::extract(&c),
            Err(IntakeError::InvalidArchive(_))
        ));
    }

    #[test]
    fn missing_cluster_is_invalid() {
        let c = contents(&[("config/version.json", "{}")]);
        assert!(ArchiveMetadata::extract(&c).is_err());
    }

    #[test]
    fn bad_gathered_at_is_ignored() {
        let c = contents(&[(
            "metadata.json",
            r#"{"cluster_id":"c1","gathered_at":"yesterday"}"#,
        )]);
        let meta = ArchiveMetadata::extract(&c).unwrap();
        assert_eq!(meta.gathered_at, None);
    }
}
