//! Result store behaviour
//!
//! Tenet: a cluster's stored hit set is always exactly the set of one
//! upload, and `reported_at` never moves once written.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use iop_archive::ClusterId;
use iop_rules::{Deadline, EvaluationResult, RuleHit};
use iop_store::{OrgId, ResultStore, StoreError};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn org(id: i64) -> OrgId {
    OrgId::new(id).unwrap()
}

fn cluster(id: &str) -> ClusterId {
    ClusterId::parse(id).unwrap()
}

fn at(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw).unwrap().with_timezone(&Utc)
}

fn hit(rule: &str, key: &str) -> RuleHit {
    RuleHit {
        rule_fqdn: format!("ccx_rules_ocp.external.rules.{rule}"),
        error_key: key.to_string(),
        template_data: json!({"type": "rule", "error_key": key}),
    }
}

fn result(cluster_id: &str, hits: Vec<RuleHit>) -> EvaluationResult {
    EvaluationResult {
        cluster_id: cluster(cluster_id),
        report: json!({"reports": hits.iter().map(|h| &h.error_key).collect::<Vec<_>>()}),
        rule_hits: hits,
        gathered_at: at("2026-01-15T08:30:00Z"),
        version_info: json!({"engine": {"name": "iop-rules"}}),
    }
}

fn keys(store: &ResultStore, org_id: OrgId, cluster_id: &ClusterId) -> Vec<String> {
    store
        .rule_hits(org_id, cluster_id)
        .unwrap()
        .into_iter()
        .map(|h| h.error_key)
        .collect()
}

#[test]
fn first_upload_creates_rows() {
    let store = ResultStore::in_memory().unwrap();
    let c = cluster("cluster-abc");
    let now = at("2026-02-01T12:00:00Z");

    let summary = store
        .upsert_at(
            org(67890),
            &c,
            &result("cluster-abc", vec![hit("node_not_ready", "NODE_NOT_READY"), hit("old_version", "OLD_VERSION")]),
            &Deadline::unbounded(),
            now,
        )
        .unwrap();

    assert!(summary.first_report);
    assert_eq!(summary.rule_hits, 2);
    assert_eq!(summary.reported_at, now);

    let report = store.report(org(67890), &c).unwrap().unwrap();
    assert_eq!(report.reported_at, now);
    assert_eq!(report.last_checked_at, now);
    assert_eq!(report.gathered_at, at("2026-01-15T08:30:00Z"));
    assert_eq!(report.compatibility_offset, 0);
    assert_eq!(report.report, json!({"reports": ["NODE_NOT_READY", "OLD_VERSION"]}));
    assert_eq!(keys(&store, org(67890), &c), vec!["NODE_NOT_READY", "OLD_VERSION"]);
    assert_eq!(
        store.report_info(org(67890), &c).unwrap(),
        Some(json!({"engine": {"name": "iop-rules"}}))
    );
}

#[test]
fn second_upload_keeps_reported_at_and_advances_last_checked() {
    let store = ResultStore::in_memory().unwrap();
    let c = cluster("c1");
    let first = at("2026-02-01T12:00:00Z");
    let second = first + ChronoDuration::minutes(30);
    let r = result("c1", vec![hit("a", "A")]);

    store.upsert_at(org(1), &c, &r, &Deadline::unbounded(), first).unwrap();
    let summary = store.upsert_at(org(1), &c, &r, &Deadline::unbounded(), second).unwrap();

    assert!(!summary.first_report);
    assert_eq!(summary.reported_at, first);
    assert_eq!(summary.last_checked_at, second);

    let report = store.report(org(1), &c).unwrap().unwrap();
    assert_eq!(report.reported_at, first);
    assert_eq!(report.last_checked_at, second);
    assert_eq!(store.rule_hits(org(1), &c).unwrap()[0].updated_at, second);
}

#[test]
fn reprocessing_gives_same_hit_set() {
    let store = ResultStore::in_memory().unwrap();
    let c = cluster("c1");
    let r = result("c1", vec![hit("a", "A"), hit("b", "B")]);

    store.upsert(org(1), &c, &r, &Deadline::unbounded()).unwrap();
    let before = keys(&store, org(1), &c);
    store.upsert(org(1), &c, &r, &Deadline::unbounded()).unwrap();
    assert_eq!(keys(&store, org(1), &c), before);
}

#[test]
fn new_hit_set_replaces_old() {
    let store = ResultStore::in_memory().unwrap();
    let c = cluster("c1");

    store
        .upsert(org(1), &c, &result("c1", vec![hit("a", "A"), hit("b", "B")]), &Deadline::unbounded())
        .unwrap();
    store
        .upsert(org(1), &c, &result("c1", vec![hit("c", "C")]), &Deadline::unbounded())
        .unwrap();
    assert_eq!(keys(&store, org(1), &c), vec!["C"]);
}

#[test]
fn zero_hits_leaves_report_and_no_rows() {
    let store = ResultStore::in_memory().unwrap();
    let c = cluster("c1");

    store
        .upsert(org(1), &c, &result("c1", vec![hit("a", "A")]), &Deadline::unbounded())
        .unwrap();
    let summary = store
        .upsert(org(1), &c, &result("c1", vec![]), &Deadline::unbounded())
        .unwrap();

    assert_eq!(summary.rule_hits, 0);
    assert!(store.report(org(1), &c).unwrap().is_some());
    assert!(store.rule_hits(org(1), &c).unwrap().is_empty());
}

#[test]
fn organizations_are_isolated() {
    let store = ResultStore::in_memory().unwrap();
    let c = cluster("shared-name");

    store
        .upsert(org(1), &c, &result("shared-name", vec![hit("a", "A")]), &Deadline::unbounded())
        .unwrap();
    store
        .upsert(org(2), &c, &result("shared-name", vec![hit("b", "B")]), &Deadline::unbounded())
        .unwrap();

    assert_eq!(keys(&store, org(1), &c), vec!["A"]);
    assert_eq!(keys(&store, org(2), &c), vec!["B"]);
    assert!(store.report(org(3), &c).unwrap().is_none());
}

#[test]
fn expired_deadline_rolls_back_everything() {
    let store = ResultStore::in_memory().unwrap();
    let c = cluster("c1");
    let first = at("2026-02-01T12:00:00Z");

    store
        .upsert_at(org(1), &c, &result("c1", vec![hit("a", "A")]), &Deadline::unbounded(), first)
        .unwrap();

    let err = store
        .upsert_at(
            org(1),
            &c,
            &result("c1", vec![hit("b", "B")]),
            &Deadline::after(Duration::ZERO),
            first + ChronoDuration::hours(1),
        )
        .unwrap_err();
    assert!(err.is_timeout());

    assert_eq!(keys(&store, org(1), &c), vec!["A"]);
    assert_eq!(store.report(org(1), &c).unwrap().unwrap().last_checked_at, first);
}

#[test]
fn expired_deadline_on_first_upload_leaves_no_rows() {
    let store = ResultStore::in_memory().unwrap();
    let c = cluster("c1");

    let err = store
        .upsert(org(1), &c, &result("c1", vec![hit("a", "A")]), &Deadline::after(Duration::ZERO))
        .unwrap_err();
    assert!(matches!(err, StoreError::Deadline(_)));
    assert!(store.report(org(1), &c).unwrap().is_none());
    assert!(store.report_info(org(1), &c).unwrap().is_none());
    assert!(store.rule_hits(org(1), &c).unwrap().is_empty());
}

#[test]
fn mismatched_cluster_is_rejected() {
    let store = ResultStore::in_memory().unwrap();
    let err = store
        .upsert(org(1), &cluster("c1"), &result("c2", vec![]), &Deadline::unbounded())
        .unwrap_err();
    assert!(matches!(err, StoreError::ClusterMismatch { .. }));
    assert!(!err.is_retryable());
}

#[test]
fn cluster_reports_lists_org_reports_with_hits() {
    let store = ResultStore::in_memory().unwrap();
    store
        .upsert(org(5), &cluster("b"), &result("b", vec![hit("x", "X")]), &Deadline::unbounded())
        .unwrap();
    store
        .upsert(org(5), &cluster("a"), &result("a", vec![]), &Deadline::unbounded())
        .unwrap();
    store
        .upsert(org(6), &cluster("c"), &result("c", vec![]), &Deadline::unbounded())
        .unwrap();

    let reports = store.cluster_reports(org(5)).unwrap();
    let clusters: Vec<_> = reports.iter().map(|r| r.report.cluster.as_str()).collect();
    assert_eq!(clusters, vec!["a", "b"]);
    assert!(reports[0].rule_hits.is_empty());
    assert_eq!(reports[1].rule_hits[0].error_key, "X");
}

#[test]
fn concurrent_uploads_never_mix_hit_sets() {
    let store = Arc::new(ResultStore::in_memory().unwrap());
    let c = cluster("busy");
    let sets: Vec<Vec<String>> = (0..8)
        .map(|i| (0..=i).map(|j| format!("K{i}_{j}")).collect())
        .collect();

    let handles: Vec<_> = sets
        .iter()
        .cloned()
        .map(|set| {
            let store = Arc::clone(&store);
            let c = c.clone();
            thread::spawn(move || {
                let hits: Vec<RuleHit> = set.iter().map(|k| hit("r", k)).collect();
                for _ in 0..10 {
                    store
                        .upsert(org(1), &c, &result("busy", hits.clone()), &Deadline::unbounded())
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let stored = keys(&store, org(1), &c);
    assert!(sets.iter().any(|set| {
        let mut expected = set.clone();
        expected.sort();
        expected == stored
    }));
}

#[test]
fn separate_connections_share_a_file_database() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("insights.db");
    let writer = ResultStore::open(&path).unwrap();
    let reader = ResultStore::open(&path).unwrap();
    let c = cluster("c1");

    writer
        .upsert(org(1), &c, &result("c1", vec![hit("a", "A")]), &Deadline::unbounded())
        .unwrap();
    assert_eq!(keys(&reader, org(1), &c), vec!["A"]);

    let handles: Vec<_> = [writer, reader]
        .into_iter()
        .enumerate()
        .map(|(i, store)| {
            let c = c.clone();
            thread::spawn(move || {
                let key = format!("W{i}");
                for _ in 0..10 {
                    store
                        .upsert(org(1), &c, &result("c1", vec![hit("w", &key)]), &Deadline::unbounded())
                        .unwrap();
                }
                store
            })
        })
        .collect();
    let stores: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let stored = keys(&stores[0], org(1), &c);
    assert!(stored == vec!["W0"] || stored == vec!["W1"], "{stored:?}");
}
