//! Rule catalog
//!
//! An immutable, sorted index of rule definitions loaded once from the
//! content root. Requests share one snapshot through [`CatalogHandle`];
//! a reload swaps the whole snapshot while in-flight requests keep the one
//! they started with.
//!
//! Loading never fails: unreadable plugins, malformed metadata and invalid
//! conditions are logged, kept as load warnings, and left out.

use crate::condition::{Condition, Template};
use crate::content::{self, ErrorKeyView, PluginContent, PluginInfo, RuleContent};
use crate::deadline::Deadline;
use crate::error::CatalogError;
use crate::parsers::{parse_parser_file, ParserRegistry};
use chrono::{DateTime, Utc};
use iop_archive::StagedArchive;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Module prefix of every rule fqdn
pub const RULE_MODULE_PREFIX: &str = "ccx_rules_ocp";

/// Content visibilities scanned under the root
pub const VISIBILITIES: [&str; 2] = ["external", "internal"];

/// Optional parser spec file under the root
pub const PARSERS_FILE: &str = "parsers.yaml";

/// Build the fqdn of a rule directory
#[must_use]
pub fn rule_fqdn(visibility: &str, rule: &str) -> String {
    format!("{RULE_MODULE_PREFIX}.{visibility}.rules.{rule}")
}

/// One error key of a rule plugin
#[derive(Debug, Clone)]
pub struct RuleDefinition {
    /// Rule fqdn
    pub fqdn: String,
    /// Error key
    pub error_key: String,
    /// Display content
    pub content: RuleContent,
    /// Firing condition; `None` for content-only keys
    pub condition: Option<Condition>,
    /// Template for hit data
    pub template: Template,
}

impl RuleDefinition {
    /// `fqdn|ERROR_KEY`
    #[must_use]
    pub fn rule_id(&self) -> String {
        format!("{}|{}", self.fqdn, self.error_key)
    }

    /// Check whether the rule can fire
    #[inline]
    #[must_use]
    pub fn is_evaluable(&self) -> bool {
        self.condition.is_some()
    }

    /// Facts the condition reads
    #[must_use]
    pub fn required_facts(&self) -> BTreeSet<&str> {
        self.condition
            .as_ref()
            .map(Condition::required_facts)
            .unwrap_or_default()
    }
}

/// A rule plugin and its error keys
#[derive(Debug, Clone)]
pub struct RulePlugin {
    /// Rule fqdn
    pub fqdn: String,
    /// `external` or `internal`
    pub visibility: String,
    /// Plugin identity
    pub info: PluginInfo,
    /// Error keys by name
    pub error_keys: BTreeMap<String, RuleDefinition>,
}

/// Immutable rule index
#[derive(Debug, Clone)]
pub struct RuleCatalog {
    root: Option<PathBuf>,
    plugins: BTreeMap<String, RulePlugin>,
    parsers: ParserRegistry,
    warnings: Vec<String>,
    loaded_at: DateTime<Utc>,
}

impl Default for RuleCatalog {
    fn default() -> Self {
        Self::empty()
    }
}

impl RuleCatalog {
    /// Catalog with no rules and the built-in parsers
    #[must_use]
    pub fn empty() -> Self {
        Self {
            root: None,
            plugins: BTreeMap::new(),
            parsers: ParserRegistry::builtin(),
            warnings: Vec::new(),
            loaded_at: Utc::now(),
        }
    }

    /// Scan a content root
    ///
    /// An absent or empty root yields an empty catalog.
    pub fn load(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        let mut catalog = Self::empty();
        catalog.root = Some(root.to_path_buf());

        if !root.is_dir() {
            tracing::warn!(root = %root.display(), "content root does not exist; catalog is empty");
            return catalog;
        }

        catalog.load_parsers(root);
        for visibility in VISIBILITIES {
            let rules_dir = root.join(visibility).join("rules");
            if rules_dir.is_dir() {
                catalog.load_visibility(&rules_dir, visibility);
            }
        }

        tracing::info!(
            root = %root.display(),
            plugins = catalog.plugins.len(),
            rules = catalog.size(),
            content = catalog.content_len(),
            parsers = catalog.parsers.len(),
            warnings = catalog.warnings.len(),
            "rule catalog loaded"
        );
        catalog
    }

    fn warn(&mut self, err: &CatalogError) {
        tracing::warn!(error = %err, "skipping catalog entry");
        self.warnings.push(err.to_string());
    }

    fn load_parsers(&mut self, root: &Path) {
        let path = root.join(PARSERS_FILE);
        if !path.is_file() {
            return;
        }
        let specs = match fs::read_to_string(&path) {
            Ok(raw) => parse_parser_file(&raw).map_err(|e| CatalogError::yaml(&path, &e)),
            Err(e) => Err(CatalogError::io(&path, e)),
        };
        match specs {
            Ok(specs) => {
                for spec in specs {
                    if let Err(err) = self.parsers.register(spec) {
                        self.warn(&err);
                    }
                }
            }
            Err(err) => self.warn(&err),
        }
    }

    fn load_visibility(&mut self, rules_dir: &Path, visibility: &str) {
        for rule_dir in sorted_subdirs(rules_dir) {
            let Some(name) = dir_name(&rule_dir) else {
                continue;
            };
            let fqdn = rule_fqdn(visibility, &name);
            match self.load_plugin(&rule_dir, &fqdn, visibility) {
                Ok(plugin) => {
                    self.plugins.insert(fqdn, plugin);
                }
                Err(err) => self.warn(&err),
            }
        }
    }

    fn load_plugin(
        &mut self,
        rule_dir: &Path,
        fqdn: &str,
        visibility: &str,
    ) -> Result<RulePlugin, CatalogError> {
        let info = content::load_plugin(rule_dir, fqdn)?;
        let mut error_keys = BTreeMap::new();

        for key_dir in sorted_subdirs(rule_dir) {
            let Some(key) = dir_name(&key_dir) else {
                continue;
            };
            match load_definition(&key_dir, fqdn, &key) {
                Ok(def) => {
                    error_keys.insert(key, def);
                }
                Err(err) => self.warn(&err),
            }
        }

        Ok(RulePlugin {
            fqdn: fqdn.to_string(),
            visibility: visibility.to_string(),
            info,
            error_keys,
        })
    }

    /// Borrow this snapshot and an archive for one evaluation
    #[must_use]
    pub fn build_context<'a>(&'a self, archive: &'a StagedArchive) -> EvaluationContext<'a> {
        EvaluationContext {
            catalog: self,
            archive,
            deadline: Deadline::unbounded(),
        }
    }

    /// Number of evaluable rules
    #[must_use]
    pub fn size(&self) -> usize {
        self.evaluable().count()
    }

    /// Number of error keys with content, evaluable or not
    #[must_use]
    pub fn content_len(&self) -> usize {
        self.plugins.values().map(|p| p.error_keys.len()).sum()
    }

    /// Every error key in (fqdn, error key) order
    pub fn rules(&self) -> impl Iterator<Item = &RuleDefinition> {
        self.plugins.values().flat_map(|p| p.error_keys.values())
    }

    /// Evaluable error keys in (fqdn, error key) order
    pub fn evaluable(&self) -> impl Iterator<Item = &RuleDefinition> {
        self.rules().filter(|r| r.is_evaluable())
    }

    /// Plugin by fqdn
    #[inline]
    #[must_use]
    pub fn get(&self, fqdn: &str) -> Option<&RulePlugin> {
        self.plugins.get(fqdn)
    }

    /// Content of one error key
    #[must_use]
    pub fn content_for(&self, fqdn: &str, error_key: &str) -> Option<&RuleContent> {
        self.plugins
            .get(fqdn)
            .and_then(|p| p.error_keys.get(error_key))
            .map(|d| &d.content)
    }

    /// All content grouped by plugin
    #[must_use]
    pub fn content_by_plugin(&self) -> Vec<PluginContent> {
        self.plugins
            .values()
            .map(|plugin| {
                let first = plugin.error_keys.values().next().map(|d| &d.content);
                let (generic, resolution, more_info, reason) = first
                    .map(|c| {
                        (
                            c.generic.clone(),
                            c.resolution.clone(),
                            c.more_info.clone(),
                            c.reason.clone(),
                        )
                    })
                    .unwrap_or_default();
                PluginContent {
                    plugin: plugin.info.clone(),
                    error_keys: plugin
                        .error_keys
                        .iter()
                        .map(|(k, d)| (k.clone(), ErrorKeyView::from(&d.content)))
                        .collect(),
                    generic,
                    summary: String::new(),
                    resolution,
                    more_info,
                    has_reason: !reason.is_empty(),
                    reason,
                }
            })
            .collect()
    }

    /// Parser registry
    #[inline]
    #[must_use]
    pub fn parsers(&self) -> &ParserRegistry {
        &self.parsers
    }

    /// Entries skipped during load
    #[inline]
    #[must_use]
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Content root, if loaded from disk
    #[inline]
    #[must_use]
    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Load time
    #[inline]
    #[must_use]
    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }
}

fn load_definition(key_dir: &Path, fqdn: &str, key: &str) -> Result<RuleDefinition, CatalogError> {
    let loaded = content::load_error_key(key_dir, fqdn, key)?;
    let invalid = |reason: String| CatalogError::InvalidCondition {
        rule: fqdn.to_string(),
        error_key: key.to_string(),
        reason,
    };
    let condition = loaded
        .condition
        .as_ref()
        .map(Condition::compile)
        .transpose()
        .map_err(invalid)?;
    let template = Template::compile(&loaded.template).map_err(invalid)?;

    Ok(RuleDefinition {
        fqdn: fqdn.to_string(),
        error_key: key.to_string(),
        content: loaded.content,
        condition,
        template,
    })
}

fn sorted_subdirs(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        tracing::warn!(dir = %dir.display(), "cannot list content directory");
        return Vec::new();
    };
    let mut dirs: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .filter(|p| dir_name(p).is_some_and(|n| !n.starts_with('.')))
        .collect();
    dirs.sort();
    dirs
}

fn dir_name(path: &Path) -> Option<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
}

/// Snapshot and archive borrowed for one evaluation
#[derive(Debug, Clone, Copy)]
pub struct EvaluationContext<'a> {
    catalog: &'a RuleCatalog,
    archive: &'a StagedArchive,
    deadline: Deadline,
}

impl<'a> EvaluationContext<'a> {
    /// Attach the request deadline
    #[must_use]
    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }

    /// Catalog snapshot
    #[inline]
    #[must_use]
    pub fn catalog(&self) -> &'a RuleCatalog {
        self.catalog
    }

    /// Archive under evaluation
    #[inline]
    #[must_use]
    pub fn archive(&self) -> &'a StagedArchive {
        self.archive
    }

    /// Request deadline
    #[inline]
    #[must_use]
    pub fn deadline(&self) -> Deadline {
        self.deadline
    }
}

/// Process-wide holder of the current catalog snapshot
#[derive(Debug)]
pub struct CatalogHandle {
    current: RwLock<Arc<RuleCatalog>>,
}

impl CatalogHandle {
    /// Wrap an initial catalog
    #[must_use]
    pub fn new(catalog: RuleCatalog) -> Self {
        Self {
            current: RwLock::new(Arc::new(catalog)),
        }
    }

    /// Current snapshot
    #[must_use]
    pub fn snapshot(&self) -> Arc<RuleCatalog> {
        Arc::clone(&self.current.read())
    }

    /// Swap in a new snapshot, returning the previous one
    pub fn replace(&self, catalog: RuleCatalog) -> Arc<RuleCatalog> {
        let next = Arc::new(catalog);
        let previous = std::mem::replace(&mut *self.current.write(), next);
        tracing::info!(
            rules = self.current.read().size(),
            "rule catalog snapshot replaced"
        );
        previous
    }
}

impl Default for CatalogHandle {
    fn default() -> Self {
        Self::new(RuleCatalog::empty())
    }
}
