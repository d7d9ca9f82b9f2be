//! SQLite result store
//!
//! One connection guarded by a mutex. Every upload is persisted in a single
//! `IMMEDIATE` transaction, so the database write lock is taken up front and
//! two uploads for the same cluster never interleave their delete/insert of
//! rule hits, even across processes sharing the file.

use crate::error::StoreError;
use crate::org::OrgId;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use iop_archive::ClusterId;
use iop_rules::{Deadline, EvaluationResult};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use std::time::Duration;

const SCHEMA: &str = include_str!("schema.sql");

/// Path that selects a private in-memory database
pub const IN_MEMORY: &str = ":memory:";

/// How long a writer waits on another connection's lock
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// What one upsert changed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpsertSummary {
    /// No report row existed for the cluster before
    pub first_report: bool,
    /// Rule hit rows now stored
    pub rule_hits: usize,
    /// First upload time, unchanged after the first upsert
    pub reported_at: DateTime<Utc>,
    /// This upload's time
    pub last_checked_at: DateTime<Utc>,
}

/// Persisted report row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredReport {
    /// Owning organization
    pub org_id: OrgId,
    /// Cluster
    pub cluster: ClusterId,
    /// Report document
    pub report: Value,
    /// First upload time
    pub reported_at: DateTime<Utc>,
    /// Latest upload time
    pub last_checked_at: DateTime<Utc>,
    /// Collection time of the latest archive
    pub gathered_at: DateTime<Utc>,
    /// Kept for schema compatibility; always 0
    pub compatibility_offset: i64,
}

/// Persisted rule hit row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredRuleHit {
    /// Rule fqdn
    pub rule_fqdn: String,
    /// Error key
    pub error_key: String,
    /// Template data
    pub template_data: Value,
    /// Upload that wrote the row
    pub updated_at: DateTime<Utc>,
}

/// Report plus its current hits
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterReport {
    /// Report row
    pub report: StoredReport,
    /// Hit rows in (fqdn, error key) order
    pub rule_hits: Vec<StoredRuleHit>,
}

/// Report, rule hit and report info tables behind one connection
pub struct ResultStore {
    conn: Mutex<Connection>,
    location: String,
}

impl std::fmt::Debug for ResultStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultStore")
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}

impl ResultStore {
    /// Open (creating if needed) a database file and bootstrap its schema
    ///
    /// File databases run in WAL mode with a busy timeout so readers do not
    /// block the writer. [`IN_MEMORY`] opens a private in-memory database.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if path.as_os_str() == IN_MEMORY {
            return Self::in_memory();
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let journal: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        tracing::debug!(path = %path.display(), %journal, "result store opened");
        Self::bootstrap(conn, path.display().to_string())
    }

    /// Private in-memory database
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::bootstrap(Connection::open_in_memory()?, IN_MEMORY.to_string())
    }

    fn bootstrap(conn: Connection, location: String) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            location,
        })
    }

    /// Where the database lives
    #[inline]
    #[must_use]
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Persist one evaluation, stamped with the current time
    pub fn upsert(
        &self,
        org_id: OrgId,
        cluster_id: &ClusterId,
        result: &EvaluationResult,
        deadline: &Deadline,
    ) -> Result<UpsertSummary, StoreError> {
        self.upsert_at(org_id, cluster_id, result, deadline, Utc::now())
    }

    /// Persist one evaluation as of `now`
    ///
    /// Upserts the report (keeping `reported_at`), replaces the cluster's
    /// rule hits, upserts the report info, checks the deadline and only then
    /// commits. Any error drops the transaction, which rolls it back.
    pub fn upsert_at(
        &self,
        org_id: OrgId,
        cluster_id: &ClusterId,
        result: &EvaluationResult,
        deadline: &Deadline,
        now: DateTime<Utc>,
    ) -> Result<UpsertSummary, StoreError> {
        if result.cluster_id != *cluster_id {
            return Err(StoreError::ClusterMismatch {
                expected: cluster_id.to_string(),
                found: result.cluster_id.to_string(),
            });
        }

        let report = serde_json::to_string(&result.report)?;
        let version_info = serde_json::to_string(&result.version_info)?;
        let hits = result
            .rule_hits
            .iter()
            .map(|hit| Ok((hit, serde_json::to_string(&hit.template_data)?)))
            .collect::<Result<Vec<_>, StoreError>>()?;

        // Stored precision, so the summary matches what a later read returns.
        let now = now.trunc_subsecs(6);
        let org = org_id.get();
        let cluster = cluster_id.as_str();
        let now_text = timestamp(now);

        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let previous: Option<String> = tx
            .query_row(
                "SELECT reported_at FROM report WHERE org_id = ?1 AND cluster = ?2",
                params![org, cluster],
                |row| row.get(0),
            )
            .optional()?;

        tx.execute(
            "INSERT INTO report \
                 (org_id, cluster, report, reported_at, last_checked_at, gathered_at, kafka_offset) \
             VALUES (?1, ?2, ?3, ?4, ?4, ?5, 0) \
             ON CONFLICT (org_id, cluster) DO UPDATE SET \
                 report = excluded.report, \
                 last_checked_at = excluded.last_checked_at, \
                 gathered_at = excluded.gathered_at",
            params![org, cluster, report, now_text, timestamp(result.gathered_at)],
        )?;

        tx.execute(
            "DELETE FROM rule_hit WHERE org_id = ?1 AND cluster_id = ?2",
            params![org, cluster],
        )?;
        {
            let mut insert = tx.prepare_cached(
                "INSERT INTO rule_hit \
                     (org_id, cluster_id, rule_fqdn, error_key, template_data, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for (hit, data) in &hits {
                insert.execute(params![org, cluster, hit.rule_fqdn, hit.error_key, data, now_text])?;
            }
        }

        tx.execute(
            "INSERT INTO report_info (org_id, cluster_id, version_info) VALUES (?1, ?2, ?3) \
             ON CONFLICT (org_id, cluster_id) DO UPDATE SET version_info = excluded.version_info",
            params![org, cluster, version_info],
        )?;

        if let Err(err) = deadline.check() {
            tracing::warn!(%org_id, cluster_id = %cluster, "deadline passed before commit; rolling back");
            return Err(err.into());
        }
        tx.commit()?;

        let first_report = previous.is_none();
        let reported_at = match previous {
            Some(raw) => parse_timestamp("reported_at", &raw)?,
            None => now,
        };
        tracing::debug!(
            %org_id,
            cluster_id = %cluster,
            rule_hits = hits.len(),
            first_report,
            "result persisted"
        );

        Ok(UpsertSummary {
            first_report,
            rule_hits: hits.len(),
            reported_at,
            last_checked_at: now,
        })
    }

    /// Report row for one cluster
    pub fn report(&self, org_id: OrgId, cluster_id: &ClusterId) -> Result<Option<StoredReport>, StoreError> {
        let conn = self.conn.lock();
        fetch_report(&conn, org_id, cluster_id.as_str())
    }

    /// Current rule hits for one cluster in (fqdn, error key) order
    pub fn rule_hits(&self, org_id: OrgId, cluster_id: &ClusterId) -> Result<Vec<StoredRuleHit>, StoreError> {
        let conn = self.conn.lock();
        fetch_hits(&conn, org_id, cluster_id.as_str())
    }

    /// Latest version info for one cluster
    pub fn report_info(&self, org_id: OrgId, cluster_id: &ClusterId) -> Result<Option<Value>, StoreError> {
        let conn = self.conn.lock();
        let raw: Option<String> = conn
            .query_row(
                "SELECT version_info FROM report_info WHERE org_id = ?1 AND cluster_id = ?2",
                params![org_id.get(), cluster_id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        raw.map(|raw| parse_json("version_info", &raw)).transpose()
    }

    /// Every report of an organization with its hits, ordered by cluster
    pub fn cluster_reports(&self, org_id: OrgId) -> Result<Vec<ClusterReport>, StoreError> {
        let conn = self.conn.lock();
        let clusters = {
            let mut stmt =
                conn.prepare_cached("SELECT cluster FROM report WHERE org_id = ?1 ORDER BY cluster")?;
            let rows = stmt.query_map(params![org_id.get()], |row| row.get::<_, String>(0))?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        let mut reports = Vec::with_capacity(clusters.len());
        for cluster in clusters {
            if let Some(report) = fetch_report(&conn, org_id, &cluster)? {
                let rule_hits = fetch_hits(&conn, org_id, &cluster)?;
                reports.push(ClusterReport { report, rule_hits });
            }
        }
        Ok(reports)
    }
}

fn fetch_report(conn: &Connection, org_id: OrgId, cluster: &str) -> Result<Option<StoredReport>, StoreError> {
    let row = conn
        .query_row(
            "SELECT cluster, report, reported_at, last_checked_at, gathered_at, kafka_offset \
             FROM report WHERE org_id = ?1 AND cluster = ?2",
            params![org_id.get(), cluster],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, i64>(5)?,
                ))
            },
        )
        .optional()?;

    let Some((cluster, report, reported_at, last_checked_at, gathered_at, offset)) = row else {
        return Ok(None);
    };
    Ok(Some(StoredReport {
        org_id,
        cluster: ClusterId::parse(&cluster).map_err(|e| StoreError::Corrupt {
            column: "cluster",
            reason: e.to_string(),
        })?,
        report: parse_json("report", &report)?,
        reported_at: parse_timestamp("reported_at", &reported_at)?,
        last_checked_at: parse_timestamp("last_checked_at", &last_checked_at)?,
        gathered_at: parse_timestamp("gathered_at", &gathered_at)?,
        compatibility_offset: offset,
    }))
}

fn fetch_hits(conn: &Connection, org_id: OrgId, cluster: &str) -> Result<Vec<StoredRuleHit>, StoreError> {
    let mut stmt = conn.prepare_cached(
        "SELECT rule_fqdn, error_key, template_data, updated_at FROM rule_hit \
         WHERE org_id = ?1 AND cluster_id = ?2 ORDER BY rule_fqdn, error_key",
    )?;
    let rows = stmt.query_map(params![org_id.get(), cluster], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
        ))
    })?;

    let mut hits = Vec::new();
    for row in rows {
        let (rule_fqdn, error_key, data, updated_at) = row?;
        hits.push(StoredRuleHit {
            rule_fqdn,
            error_key,
            template_data: parse_json("template_data", &data)?,
            updated_at: parse_timestamp("updated_at", &updated_at)?,
        });
    }
    Ok(hits)
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(column: &'static str, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt {
            column,
            reason: e.to_string(),
        })
}

fn parse_json(column: &'static str, raw: &str) -> Result<Value, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::Corrupt {
        column,
        reason: e.to_string(),
    })
}
