//! Evaluation engine
//!
//! Runs one evaluation over a catalog snapshot and a staged archive:
//! 1. gather facts with every registered parser
//! 2. walk evaluable rules in (fqdn, error key) order, checking the
//!    deadline before each one
//! 3. assemble the report document, hits and version info
//!
//! A failing rule never fails the evaluation; it is recorded under
//! `errors` and treated as not fired.

use crate::catalog::{EvaluationContext, RuleDefinition};
use crate::condition::Outcome;
use crate::error::EvaluationError;
use crate::facts::FactBase;
use chrono::{DateTime, SecondsFormat, Utc};
use iop_archive::ClusterId;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::time::Instant;

/// Engine name recorded in version info
pub const ENGINE_NAME: &str = "iop-rules";

/// Skip reason for rules whose facts are unavailable
pub const MISSING_REQUIREMENTS: &str = "MISSING_REQUIREMENTS";

/// One fired rule
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleHit {
    /// Rule fqdn
    pub rule_fqdn: String,
    /// Error key
    pub error_key: String,
    /// Rendered template data
    pub template_data: Value,
}

/// Immutable result of one evaluation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationResult {
    /// Cluster the archive came from
    pub cluster_id: ClusterId,
    /// Report document
    pub report: Value,
    /// Hits in evaluation order
    pub rule_hits: Vec<RuleHit>,
    /// Collection time (archive metadata, else evaluation time)
    pub gathered_at: DateTime<Utc>,
    /// Engine, catalog and archive versions
    pub version_info: Value,
}

impl EvaluationResult {
    /// Number of fired rules
    #[inline]
    #[must_use]
    pub fn rules_found(&self) -> usize {
        self.rule_hits.len()
    }
}

#[derive(Debug, Default)]
struct ReportSections {
    reports: Vec<Value>,
    pass: Vec<Value>,
    skips: Vec<Value>,
    errors: Vec<Value>,
}

/// Evaluates archives against catalog snapshots
#[derive(Debug, Clone, Copy, Default)]
pub struct EvaluationEngine;

impl EvaluationEngine {
    /// Create engine
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Evaluate the context's archive against its catalog snapshot
    pub fn evaluate(&self, ctx: &EvaluationContext<'_>) -> Result<EvaluationResult, EvaluationError> {
        let started = Instant::now();
        let catalog = ctx.catalog();
        let archive = ctx.archive();
        let deadline = ctx.deadline();

        deadline.check()?;
        let facts = catalog.parsers().gather(archive.contents())?;
        tracing::debug!(
            facts = facts.len(),
            parser_failures = facts.failures().len(),
            "fact base gathered"
        );

        let mut hits = Vec::new();
        let mut sections = ReportSections::default();

        for rule in catalog.evaluable() {
            deadline.check()?;
            evaluate_rule(rule, &facts, &mut hits, &mut sections);
        }

        let evaluated_at = Utc::now();
        let gathered_at = archive.gathered_at().unwrap_or(evaluated_at);
        let metadata = archive.metadata();

        let report = json!({
            "system": {
                "cluster_id": metadata.cluster_id,
                "metadata_source": metadata.source,
                "gathered_at": gathered_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            },
            "reports": sections.reports,
            "pass": sections.pass,
            "skips": sections.skips,
            "errors": sections.errors,
            "info": {
                "facts": facts.ids().collect::<Vec<_>>(),
                "parser_errors": facts.failures(),
            },
        });

        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let version_info = json!({
            "engine": {"name": ENGINE_NAME, "version": crate::VERSION},
            "catalog": {
                "rules": catalog.size(),
                "content": catalog.content_len(),
                "parsers": catalog.parsers().len(),
                "loaded_at": catalog.loaded_at().to_rfc3339_opts(SecondsFormat::Secs, true),
            },
            "archive": {
                "sha256": archive.sha256(),
                "size": archive.actual_size(),
                "files": archive.contents().len(),
            },
            "processing_time_ms": elapsed_ms,
            "processed_at": evaluated_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        });

        tracing::info!(
            cluster_id = %metadata.cluster_id,
            evaluated = catalog.size(),
            hits = hits.len(),
            elapsed_ms,
            "archive evaluated"
        );

        Ok(EvaluationResult {
            cluster_id: metadata.cluster_id.clone(),
            report,
            rule_hits: hits,
            gathered_at,
            version_info,
        })
    }
}

fn evaluate_rule(
    rule: &RuleDefinition,
    facts: &FactBase,
    hits: &mut Vec<RuleHit>,
    sections: &mut ReportSections,
) {
    let Some(condition) = rule.condition.as_ref() else {
        return;
    };

    let missing: Vec<&str> = rule
        .required_facts()
        .into_iter()
        .filter(|f| !facts.contains(f))
        .collect();
    if !missing.is_empty() {
        tracing::debug!(rule = %rule.rule_id(), ?missing, "rule skipped");
        sections.skips.push(json!({
            "rule_fqdn": rule.fqdn,
            "error_key": rule.error_key,
            "reason": MISSING_REQUIREMENTS,
            "details": {"missing": missing},
        }));
        return;
    }

    match condition.evaluate(facts) {
        Ok(outcome) if outcome.holds => {
            let template_data = render_hit(rule, facts, &outcome);
            sections.reports.push(json!({
                "rule_id": rule.rule_id(),
                "component": format!("{}.report", rule.fqdn),
                "type": "rule",
                "key": rule.error_key,
                "details": template_data,
                "tags": rule.content.tags,
                "links": {},
            }));
            hits.push(RuleHit {
                rule_fqdn: rule.fqdn.clone(),
                error_key: rule.error_key.clone(),
                template_data,
            });
        }
        Ok(_) => sections.pass.push(json!({
            "rule_id": rule.rule_id(),
            "component": format!("{}.report", rule.fqdn),
            "type": "pass",
            "key": rule.error_key,
        })),
        Err(err) => {
            tracing::warn!(rule = %rule.rule_id(), error = %err, "rule condition failed; treated as not fired");
            sections.errors.push(json!({
                "rule_id": rule.rule_id(),
                "component": format!("{}.report", rule.fqdn),
                "key": rule.error_key,
                "error": err.to_string(),
            }));
        }
    }
}

fn render_hit(rule: &RuleDefinition, facts: &FactBase, outcome: &Outcome) -> Value {
    let mut data = Map::new();
    data.insert("type".to_string(), Value::String("rule".to_string()));
    data.insert("error_key".to_string(), Value::String(rule.error_key.clone()));
    data.extend(rule.template.render(facts, outcome));
    Value::Object(data)
}
