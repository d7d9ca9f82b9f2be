//! Result persistence
//!
//! Three tables keyed by organization and cluster:
//! - `report`: one row per (org, cluster); `reported_at` fixed on first insert
//! - `rule_hit`: the current hit set, replaced wholesale on each upload
//! - `report_info`: latest engine/catalog/archive version info
//!
//! Writes go through [`ResultStore::upsert`], a single `IMMEDIATE`
//! transaction that checks the request deadline right before commit.

pub mod error;
pub mod org;
pub mod store;

pub use error::StoreError;
pub use org::{InvalidOrgId, OrgId};
pub use rusqlite;
pub use store::{ClusterReport, ResultStore, StoredReport, StoredRuleHit, UpsertSummary, IN_MEMORY};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
