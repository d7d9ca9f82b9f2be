//! Testing utilities for the ingress workspace
//!
//! Shared builders for identity headers, upload archives and rule content
//! trees, plus the standard fixtures used by scenario tests.

#![allow(missing_docs)]

mod archive;
mod content;

pub use archive::ArchiveBuilder;
pub use content::{ContentTree, RuleFixture};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{json, Value};

/// Encode an arbitrary identity document as a header value
pub fn encode_identity(document: &Value) -> String {
    STANDARD.encode(document.to_string())
}

/// Header value for a `User` principal
pub fn identity_header(org_id: &str, account_number: &str) -> String {
    encode_identity(&json!({
        "identity": {
            "org_id": org_id,
            "account_number": account_number,
            "type": "User",
        }
    }))
}

/// Archive for `cluster_id` in which two of the five standard rules fire
///
/// - cluster version 4.9.12 (older than 4.10)
/// - one of two nodes not ready
pub fn standard_archive(cluster_id: &str) -> ArchiveBuilder {
    ArchiveBuilder::new()
        .root_dir(format!("insights-{cluster_id}"))
        .cluster(cluster_id)
        .json(
            "config/version.json",
            &json!({
                "spec": {"channel": "stable-4.9"},
                "status": {"desired": {"version": "4.9.12"}},
            }),
        )
        .json("config/infrastructure.json", &json!({"status": {"platform": "AWS"}}))
        .json(
            "config/node/master-0.json",
            &json!({"metadata": {"name": "master-0"}, "status": {"ready": true}}),
        )
        .json(
            "config/node/worker-1.json",
            &json!({"metadata": {"name": "worker-1"}, "status": {"ready": false}}),
        )
        .json(
            "config/clusteroperator/dns.json",
            &json!({"metadata": {"name": "dns"}, "status": {"degraded": false}}),
        )
}

/// Archive for `cluster_id` in which none of the five standard rules fire
pub fn healthy_archive(cluster_id: &str) -> ArchiveBuilder {
    ArchiveBuilder::new()
        .root_dir(format!("insights-{cluster_id}"))
        .cluster(cluster_id)
        .json(
            "config/version.json",
            &json!({
                "spec": {"channel": "stable-4.12"},
                "status": {"desired": {"version": "4.12.3"}},
            }),
        )
        .json("config/infrastructure.json", &json!({"status": {"platform": "AWS"}}))
        .json(
            "config/node/master-0.json",
            &json!({"metadata": {"name": "master-0"}, "status": {"ready": true}}),
        )
}

/// Content tree with the five standard rules
///
/// | rule | fires on standard archive |
/// |---|---|
/// | `old_version` / `OLD_VERSION` | yes |
/// | `node_not_ready` / `NODE_NOT_READY` | yes |
/// | `bare_metal` / `BARE_METAL_PLATFORM` | no |
/// | `channel_missing` / `UPGRADE_CHANNEL_MISSING` (internal) | no |
/// | `degraded_operator` / `OPERATOR_DEGRADED` | no |
pub fn five_rule_content() -> ContentTree {
    let tree = ContentTree::new();
    tree.rule(
        RuleFixture::new("old_version", "OLD_VERSION")
            .condition(
                "fact: cluster_version\npath: status.desired.version\nop: version_lt\nvalue: \"4.10\"",
            )
            .template("version", "cluster_version:status.desired.version")
            .impact("high")
            .likelihood(3),
    );
    tree.rule(
        RuleFixture::new("node_not_ready", "NODE_NOT_READY")
            .condition("fact: nodes\npath: status.ready\nop: eq\nvalue: false")
            .template("nodes", "$matched"),
    );
    tree.rule(
        RuleFixture::new("bare_metal", "BARE_METAL_PLATFORM")
            .condition("fact: infrastructure\npath: status.platform\nop: eq\nvalue: BareMetal"),
    );
    tree.rule(
        RuleFixture::new("channel_missing", "UPGRADE_CHANNEL_MISSING")
            .internal()
            .condition("fact: cluster_version\npath: spec.channel\nop: missing"),
    );
    tree.rule(
        RuleFixture::new("degraded_operator", "OPERATOR_DEGRADED").condition(
            "all:\n  - fact: cluster_operators\n    path: status.degraded\n    op: eq\n    value: true",
        ),
    );
    tree
}
