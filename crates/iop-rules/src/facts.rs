//! Typed facts gathered from an archive
//!
//! Each parser contributes at most one [`Fact`] under its id. Rules name
//! the facts they need; a rule whose facts are absent is skipped rather
//! than evaluated.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// One document of a multi-document fact
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NamedDocument {
    /// Document name (source file stem)
    pub name: String,
    /// Parsed document
    pub value: Value,
}

/// Parser output
#[derive(Debug, Clone, PartialEq)]
pub enum Fact {
    /// A single structured document
    Document(Value),
    /// One structured document per matching source
    Documents(Vec<NamedDocument>),
    /// Raw text
    Text(String),
    /// Text split into lines
    Lines(Vec<String>),
}

impl Fact {
    /// Short kind name for diagnostics
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Document(_) => "document",
            Self::Documents(_) => "documents",
            Self::Text(_) => "text",
            Self::Lines(_) => "lines",
        }
    }

    /// JSON rendering used by templates
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::Document(v) => v.clone(),
            Self::Documents(docs) => Value::Array(
                docs.iter()
                    .map(|d| serde_json::json!({"name": d.name, "value": d.value}))
                    .collect(),
            ),
            Self::Text(t) => Value::String(t.clone()),
            Self::Lines(lines) => Value::Array(lines.iter().cloned().map(Value::String).collect()),
        }
    }

    /// Value at `path`, per document for multi-document facts
    #[must_use]
    pub fn resolve(&self, path: Option<&str>) -> Value {
        let Some(path) = path else {
            return self.to_json();
        };
        match self {
            Self::Document(v) => lookup(v, path).cloned().unwrap_or(Value::Null),
            Self::Documents(docs) => Value::Array(
                docs.iter()
                    .filter_map(|d| lookup(&d.value, path).cloned())
                    .collect(),
            ),
            Self::Text(_) | Self::Lines(_) => self.to_json(),
        }
    }
}

/// Look up a dot-separated path; numeric segments index arrays
#[must_use]
pub fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    let mut current = value;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Non-fatal parser failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParserFailure {
    /// Parser id
    pub parser: String,
    /// What went wrong
    pub reason: String,
}

/// Facts keyed by parser id
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FactBase {
    facts: BTreeMap<String, Fact>,
    failures: Vec<ParserFailure>,
}

impl FactBase {
    /// Empty fact base
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a fact
    pub fn insert(&mut self, id: impl Into<String>, fact: Fact) {
        self.facts.insert(id.into(), fact);
    }

    /// Record a parser that failed without aborting evaluation
    pub fn record_failure(&mut self, parser: impl Into<String>, reason: impl Into<String>) {
        self.failures.push(ParserFailure {
            parser: parser.into(),
            reason: reason.into(),
        });
    }

    /// Fact by id
    #[inline]
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Fact> {
        self.facts.get(id)
    }

    /// Check whether a fact exists
    #[inline]
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.facts.contains_key(id)
    }

    /// Ids of gathered facts in sorted order
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.facts.keys().map(String::as_str)
    }

    /// Number of facts
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.facts.len()
    }

    /// Check for an empty fact base
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    /// Non-fatal parser failures
    #[inline]
    #[must_use]
    pub fn failures(&self) -> &[ParserFailure] {
        &self.failures
    }
}
