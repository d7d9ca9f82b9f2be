//! Rule content loading
//!
//! Reads one rule plugin directory:
//!
//! ```text
//! <rule>/plugin.yaml
//! <rule>/<ERROR_KEY>/metadata.yaml
//! <rule>/<ERROR_KEY>/{generic,reason,resolution,more_info}.md
//! ```
//!
//! and exposes the content views served by the read endpoints.

use crate::condition::ConditionDef;
use crate::error::CatalogError;
use pulldown_cmark::{Event, Parser as MdParser, Tag, TagEnd};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Markdown documents read for every error key
pub const MARKDOWN_SECTIONS: [&str; 4] = ["generic", "reason", "resolution", "more_info"];

/// Plugin identity from `plugin.yaml`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginInfo {
    /// Display name
    pub name: String,
    /// Node id
    pub node_id: String,
    /// Product code
    pub product_code: String,
    /// Python module path of the rule
    pub python_module: String,
}

#[derive(Debug, Default, Deserialize)]
struct PluginFile {
    #[serde(default)]
    plugin: Option<PluginInfo>,
}

/// Content of one error key
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleContent {
    /// Rule fqdn
    pub rule_fqdn: String,
    /// Error key
    pub error_key: String,
    /// One-line description
    pub description: String,
    /// Generic explanation (markdown)
    pub generic: String,
    /// Reason (markdown)
    pub reason: String,
    /// Resolution steps (markdown)
    pub resolution: String,
    /// Further reading (markdown)
    pub more_info: String,
    /// Total risk 1-4
    pub total_risk: i64,
    /// Likelihood 1-4
    pub likelihood: i64,
    /// Impact 1-4
    pub impact: i64,
    /// Publication date as written
    pub publish_date: String,
    /// Tags
    pub tags: Vec<String>,
    /// Lifecycle status
    pub status: String,
}

impl RuleContent {
    /// Human-readable impact
    #[must_use]
    pub fn impact_label(&self) -> &'static str {
        impact_label(self.impact)
    }

    /// Check whether a reason text exists
    #[inline]
    #[must_use]
    pub fn has_reason(&self) -> bool {
        !self.reason.is_empty()
    }
}

/// Impact level label
#[must_use]
pub fn impact_label(impact: i64) -> &'static str {
    match impact {
        1 => "Low Impact",
        3 => "High Impact",
        4 => "Critical Impact",
        _ => "Medium Impact",
    }
}

/// `metadata.yaml` of one error key
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ErrorKeyMetadata {
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    impact: Option<serde_yaml::Value>,
    #[serde(default)]
    likelihood: Option<i64>,
    #[serde(default)]
    total_risk: Option<i64>,
    #[serde(default)]
    publish_date: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    pub(crate) condition: Option<ConditionDef>,
    #[serde(default)]
    pub(crate) template: BTreeMap<String, String>,
}

/// Everything loaded for one error key directory
#[derive(Debug)]
pub(crate) struct LoadedErrorKey {
    pub(crate) content: RuleContent,
    pub(crate) condition: Option<ConditionDef>,
    pub(crate) template: BTreeMap<String, String>,
}

/// Read `plugin.yaml`, defaulting the module path to the fqdn
pub(crate) fn load_plugin(rule_dir: &Path, fqdn: &str) -> Result<PluginInfo, CatalogError> {
    let path = rule_dir.join("plugin.yaml");
    if !path.is_file() {
        return Err(CatalogError::MissingPlugin(rule_dir.to_path_buf()));
    }
    let raw = fs::read_to_string(&path).map_err(|e| CatalogError::io(&path, e))?;
    let file: Option<PluginFile> =
        serde_yaml::from_str(&raw).map_err(|e| CatalogError::yaml(&path, &e))?;
    let mut info = file.and_then(|f| f.plugin).unwrap_or_default();
    if info.python_module.is_empty() {
        info.python_module = fqdn.to_string();
    }
    Ok(info)
}

/// Read one error key directory
pub(crate) fn load_error_key(
    key_dir: &Path,
    fqdn: &str,
    error_key: &str,
) -> Result<LoadedErrorKey, CatalogError> {
    let metadata_path = key_dir.join("metadata.yaml");
    let metadata: ErrorKeyMetadata = if metadata_path.is_file() {
        let raw = fs::read_to_string(&metadata_path).map_err(|e| CatalogError::io(&metadata_path, e))?;
        serde_yaml::from_str::<Option<ErrorKeyMetadata>>(&raw)
            .map_err(|e| CatalogError::yaml(&metadata_path, &e))?
            .unwrap_or_default()
    } else {
        ErrorKeyMetadata::default()
    };

    let mut texts: BTreeMap<&str, String> = BTreeMap::new();
    for section in MARKDOWN_SECTIONS {
        let path = key_dir.join(format!("{section}.md"));
        let text = if path.is_file() {
            fs::read_to_string(&path)
                .map_err(|e| CatalogError::io(&path, e))?
                .trim()
                .to_string()
        } else {
            String::new()
        };
        texts.insert(section, text);
    }
    let mut take = |section: &str| texts.remove(section).unwrap_or_default();
    let generic = take("generic");

    let description = metadata
        .description
        .filter(|d| !d.trim().is_empty())
        .unwrap_or_else(|| markdown_summary(&generic));

    let content = RuleContent {
        rule_fqdn: fqdn.to_string(),
        error_key: error_key.to_string(),
        description,
        reason: take("reason"),
        resolution: take("resolution"),
        more_info: take("more_info"),
        generic,
        total_risk: metadata.total_risk.unwrap_or(1),
        likelihood: metadata.likelihood.unwrap_or(1),
        impact: normalize_impact(metadata.impact.as_ref()),
        publish_date: metadata.publish_date.unwrap_or_default(),
        tags: metadata.tags,
        status: metadata.status.unwrap_or_else(|| "active".to_string()),
    };

    Ok(LoadedErrorKey {
        content,
        condition: metadata.condition,
        template: metadata.template,
    })
}

/// Impact as 1-4 from a number, a `{impact: n}` map, or a level name
fn normalize_impact(raw: Option<&serde_yaml::Value>) -> i64 {
    use serde_yaml::Value;
    match raw {
        None => 1,
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)).unwrap_or(1),
        Some(Value::Mapping(map)) => map
            .get("impact")
            .and_then(Value::as_i64)
            .unwrap_or(1),
        Some(Value::String(s)) => match s.to_ascii_lowercase().as_str() {
            "low" => 1,
            "high" => 3,
            "critical" => 4,
            _ => 2,
        },
        Some(_) => 2,
    }
}

/// Plain text of the first paragraph of a markdown document
#[must_use]
pub fn markdown_summary(markdown: &str) -> String {
    let mut out = String::new();
    let mut in_paragraph = false;
    for event in MdParser::new(markdown) {
        match event {
            Event::Start(Tag::Paragraph) => in_paragraph = true,
            Event::End(TagEnd::Paragraph) if in_paragraph => break,
            Event::Text(text) | Event::Code(text) if in_paragraph => out.push_str(&text),
            Event::SoftBreak | Event::HardBreak if in_paragraph => out.push(' '),
            _ => {}
        }
    }
    out.trim().to_string()
}

/// Error key entry in the grouped content view
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorKeyView {
    /// Content metadata
    pub metadata: ErrorKeyMetadataView,
    /// Total risk
    pub total_risk: i64,
    /// Generic text
    pub generic: String,
    /// Summary (unused, always empty)
    pub summary: String,
    /// Resolution text
    pub resolution: String,
    /// More info text
    pub more_info: String,
    /// Reason text
    pub reason: String,
    /// Whether a reason exists
    #[serde(rename = "HasReason")]
    pub has_reason: bool,
}

/// Metadata block of an [`ErrorKeyView`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorKeyMetadataView {
    /// Description
    pub description: String,
    /// Impact label
    pub impact: String,
    /// Likelihood
    pub likelihood: i64,
    /// Publication date
    pub publish_date: String,
    /// Status
    pub status: String,
    /// Tags
    pub tags: Vec<String>,
}

impl From<&RuleContent> for ErrorKeyView {
    fn from(c: &RuleContent) -> Self {
        Self {
            metadata: ErrorKeyMetadataView {
                description: c.description.clone(),
                impact: c.impact_label().to_string(),
                likelihood: c.likelihood,
                publish_date: c.publish_date.clone(),
                status: c.status.clone(),
                tags: c.tags.clone(),
            },
            total_risk: c.total_risk,
            generic: c.generic.clone(),
            summary: String::new(),
            resolution: c.resolution.clone(),
            more_info: c.more_info.clone(),
            reason: c.reason.clone(),
            has_reason: c.has_reason(),
        }
    }
}

/// One plugin with all its error keys, as served to content consumers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PluginContent {
    /// Plugin identity
    pub plugin: PluginInfo,
    /// Error keys by name
    pub error_keys: BTreeMap<String, ErrorKeyView>,
    /// Generic text of the first error key
    pub generic: String,
    /// Summary (unused, always empty)
    pub summary: String,
    /// Resolution of the first error key
    pub resolution: String,
    /// More info of the first error key
    pub more_info: String,
    /// Reason of the first error key
    pub reason: String,
    /// Whether the first error key has a reason
    #[serde(rename = "HasReason")]
    pub has_reason: bool,
}
