//! Error types for the rule catalog and evaluation engine
//!
//! Three layers:
//! - `CatalogError`: one plugin, error key or parser spec failed to load
//!   (recorded as a load warning, never fatal)
//! - `ConditionError`: one rule's condition failed at evaluation time
//!   (recorded in the report, rule treated as not fired)
//! - `EvaluationError`: the whole evaluation failed

use crate::deadline::DeadlineExceeded;
use std::path::PathBuf;

/// Errors while loading catalog content
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// File or directory could not be read
    #[error("io error reading {path}: {source}")]
    Io {
        /// Path involved
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// YAML document could not be parsed
    #[error("malformed yaml in {path}: {message}")]
    Yaml {
        /// File containing the document
        path: PathBuf,
        /// Parser message
        message: String,
    },

    /// Rule directory lacks `plugin.yaml`
    #[error("rule directory {0} has no plugin.yaml")]
    MissingPlugin(PathBuf),

    /// Condition or template could not be compiled
    #[error("rule {rule}|{error_key} has an invalid condition: {reason}")]
    InvalidCondition {
        /// Rule fqdn
        rule: String,
        /// Error key
        error_key: String,
        /// What was wrong
        reason: String,
    },

    /// Parser spec is unusable
    #[error("parser '{id}' is invalid: {reason}")]
    InvalidParser {
        /// Parser id
        id: String,
        /// What was wrong
        reason: String,
    },
}

impl CatalogError {
    /// Create IO error for path
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create YAML error for path
    pub fn yaml(path: impl Into<PathBuf>, err: &serde_yaml::Error) -> Self {
        Self::Yaml {
            path: path.into(),
            message: err.to_string(),
        }
    }
}

/// Errors while evaluating one condition
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConditionError {
    /// Ordering comparison between values of different kinds
    #[error("cannot compare {left} with {right} using {op}")]
    NotComparable {
        /// Operator name
        op: &'static str,
        /// Kind of the fact value
        left: &'static str,
        /// Kind of the rule value
        right: &'static str,
    },

    /// Operator applied to an unsupported value kind
    #[error("operator {op} expects {expected}, found {found}")]
    TypeMismatch {
        /// Operator name
        op: &'static str,
        /// Expected kind
        expected: &'static str,
        /// Actual kind
        found: &'static str,
    },

    /// Fact vanished between requirement check and evaluation
    #[error("fact '{0}' is not available")]
    MissingFact(String),
}

/// Errors that abort an evaluation
#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    /// A required parser found no source or could not parse it
    #[error("required fact '{parser}' unavailable: {reason}")]
    RequiredFact {
        /// Parser id
        parser: String,
        /// What went wrong
        reason: String,
    },

    /// The request deadline passed
    #[error(transparent)]
    Deadline(#[from] DeadlineExceeded),
}

impl EvaluationError {
    /// Check whether the failure was a deadline expiry
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Deadline(_))
    }
}
