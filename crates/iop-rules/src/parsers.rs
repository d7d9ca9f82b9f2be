//! Archive parsers
//!
//! A parser maps archive entries (selected by glob patterns) to a typed
//! fact. Built-in parsers cover the core cluster documents; the content
//! root may add more through `parsers.yaml`:
//!
//! ```yaml
//! parsers:
//!   - id: machine_configs
//!     sources: ["config/machineconfigs/*.json"]
//!     format: json
//!     multi: true
//! ```
//!
//! Registry order is by parser id, so gathering is deterministic.

use crate::error::{CatalogError, EvaluationError};
use crate::facts::{Fact, FactBase, NamedDocument};
use glob::{MatchOptions, Pattern};
use iop_archive::ArchiveContents;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Id of the parser that reads archive metadata
pub const METADATA_PARSER: &str = "metadata";

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// How source bytes become a fact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    /// JSON document
    #[default]
    Json,
    /// YAML document
    Yaml,
    /// UTF-8 text
    Text,
    /// UTF-8 text split into lines
    Lines,
}

/// Declarative parser description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParserSpec {
    /// Fact id produced by this parser
    pub id: String,
    /// Glob patterns over archive paths, tried in order
    pub sources: Vec<String>,
    /// Source format
    #[serde(default)]
    pub format: SourceFormat,
    /// Produce one document per matching entry
    #[serde(default)]
    pub multi: bool,
    /// Fail the evaluation when the fact cannot be produced
    #[serde(default)]
    pub required: bool,
}

impl ParserSpec {
    /// Single-source JSON parser
    pub fn json(id: &str, sources: &[&str]) -> Self {
        Self {
            id: id.to_string(),
            sources: sources.iter().map(|s| (*s).to_string()).collect(),
            format: SourceFormat::Json,
            multi: false,
            required: false,
        }
    }

    /// Set format
    #[must_use]
    pub fn with_format(mut self, format: SourceFormat) -> Self {
        self.format = format;
        self
    }

    /// Mark as multi-document
    #[must_use]
    pub fn multi(mut self) -> Self {
        self.multi = true;
        self
    }

    /// Mark as required
    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// Parsers shipped with the engine
#[must_use]
pub fn builtin_specs() -> Vec<ParserSpec> {
    vec![
        ParserSpec::json(
            METADATA_PARSER,
            &["insights_archive_metadata.json", "metadata.json"],
        )
        .required(),
        ParserSpec::json("cluster_id", &["config/id"]).with_format(SourceFormat::Text),
        ParserSpec::json("cluster_version", &["config/version.json"]),
        ParserSpec::json("infrastructure", &["config/infrastructure.json"]),
        ParserSpec::json("nodes", &["config/node/*.json"]).multi(),
        ParserSpec::json("cluster_operators", &["config/clusteroperator/*.json"]).multi(),
    ]
}

#[derive(Debug, Deserialize)]
struct ParserFile {
    #[serde(default)]
    parsers: Vec<ParserSpec>,
}

/// Parse a `parsers.yaml` document into specs
pub fn parse_parser_file(yaml: &str) -> Result<Vec<ParserSpec>, serde_yaml::Error> {
    let file: ParserFile = serde_yaml::from_str(yaml)?;
    Ok(file.parsers)
}

/// Parser with compiled source patterns
#[derive(Debug, Clone)]
pub struct CompiledParser {
    spec: ParserSpec,
    patterns: Vec<Pattern>,
}

impl CompiledParser {
    /// Validate and compile a spec
    pub fn compile(spec: ParserSpec) -> Result<Self, CatalogError> {
        let invalid = |reason: String| CatalogError::InvalidParser {
            id: spec.id.clone(),
            reason,
        };
        if spec.id.trim().is_empty() {
            return Err(invalid("empty id".to_string()));
        }
        if spec.sources.is_empty() {
            return Err(invalid("no sources".to_string()));
        }
        let patterns = spec
            .sources
            .iter()
            .map(|s| Pattern::new(s).map_err(|e| invalid(format!("bad pattern '{s}': {e}"))))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { spec, patterns })
    }

    /// Underlying spec
    #[inline]
    #[must_use]
    pub fn spec(&self) -> &ParserSpec {
        &self.spec
    }

    /// Produce this parser's fact
    ///
    /// `Ok(None)` means no source entry exists.
    pub fn run(&self, contents: &ArchiveContents) -> Result<Option<Fact>, String> {
        if self.spec.multi {
            return self.run_multi(contents).map(Some);
        }
        for pattern in &self.patterns {
            let found = contents
                .iter()
                .find(|(path, _)| pattern.matches_with(path, MATCH_OPTIONS));
            if let Some((path, data)) = found {
                return self.decode(path, data).map(Some);
            }
        }
        Ok(None)
    }

    fn run_multi(&self, contents: &ArchiveContents) -> Result<Fact, String> {
        let mut documents = Vec::new();
        for (path, data) in contents.iter() {
            if !self
                .patterns
                .iter()
                .any(|p| p.matches_with(path, MATCH_OPTIONS))
            {
                continue;
            }
            let value = match self.decode(path, data)? {
                Fact::Document(v) => v,
                other => other.to_json(),
            };
            documents.push(NamedDocument {
                name: document_name(path),
                value,
            });
        }
        Ok(Fact::Documents(documents))
    }

    fn decode(&self, path: &str, data: &[u8]) -> Result<Fact, String> {
        match self.spec.format {
            SourceFormat::Json => serde_json::from_slice::<Value>(data)
                .map(Fact::Document)
                .map_err(|e| format!("{path}: {e}")),
            SourceFormat::Yaml => serde_yaml::from_slice::<Value>(data)
                .map(Fact::Document)
                .map_err(|e| format!("{path}: {e}")),
            SourceFormat::Text => utf8(path, data).map(|t| Fact::Text(t.trim().to_string())),
            SourceFormat::Lines => {
                utf8(path, data).map(|t| Fact::Lines(t.lines().map(str::to_string).collect()))
            }
        }
    }
}

fn utf8<'a>(path: &str, data: &'a [u8]) -> Result<&'a str, String> {
    std::str::from_utf8(data).map_err(|_| format!("{path}: not valid UTF-8"))
}

fn document_name(path: &str) -> String {
    let file = path.rsplit('/').next().unwrap_or(path);
    match file.split_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ => file.to_string(),
    }
}

/// Parsers keyed by fact id
#[derive(Debug, Clone, Default)]
pub struct ParserRegistry {
    parsers: BTreeMap<String, CompiledParser>,
}

impl ParserRegistry {
    /// Create empty registry
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in parsers
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for spec in builtin_specs() {
            if let Ok(parser) = CompiledParser::compile(spec) {
                registry.insert(parser);
            }
        }
        registry
    }

    /// Compile and register a spec, replacing any content-defined parser with the same id
    ///
    /// Ids of built-in parsers are reserved.
    pub fn register(&mut self, spec: ParserSpec) -> Result<(), CatalogError> {
        if builtin_specs().iter().any(|b| b.id == spec.id) {
            return Err(CatalogError::InvalidParser {
                id: spec.id,
                reason: "id is reserved by a built-in parser".to_string(),
            });
        }
        let parser = CompiledParser::compile(spec)?;
        self.insert(parser);
        Ok(())
    }

    fn insert(&mut self, parser: CompiledParser) {
        let id = parser.spec.id.clone();
        if self.parsers.insert(id.clone(), parser).is_some() {
            tracing::debug!(parser = %id, "parser replaced by content-defined spec");
        }
    }

    /// Parser by id
    #[inline]
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&CompiledParser> {
        self.parsers.get(id)
    }

    /// Registered ids in order
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.parsers.keys().map(String::as_str)
    }

    /// Number of parsers
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.parsers.len()
    }

    /// Check for an empty registry
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parsers.is_empty()
    }

    /// Run every parser over the archive
    ///
    /// A required parser with no source or a parse error aborts; any other
    /// parser failure is recorded on the fact base.
    pub fn gather(&self, contents: &ArchiveContents) -> Result<FactBase, EvaluationError> {
        let mut facts = FactBase::new();
        for (id, parser) in &self.parsers {
            match parser.run(contents) {
                Ok(Some(fact)) => facts.insert(id.clone(), fact),
                Ok(None) if parser.spec.required => {
                    return Err(EvaluationError::RequiredFact {
                        parser: id.clone(),
                        reason: "no matching archive entry".to_string(),
                    });
                }
                Ok(None) => tracing::debug!(parser = %id, "no source for parser"),
                Err(reason) if parser.spec.required => {
                    return Err(EvaluationError::RequiredFact {
                        parser: id.clone(),
                        reason,
                    });
                }
                Err(reason) => {
                    tracing::warn!(parser = %id, %reason, "parser failed; fact left absent");
                    facts.record_failure(id.clone(), reason);
                }
            }
        }
        Ok(facts)
    }
}
