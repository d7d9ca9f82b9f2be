//! Request handlers

use crate::error::ApiError;
use crate::state::AppState;
use crate::{SERVICE_NAME, VERSION};
use axum::body::Bytes;
use axum::extract::multipart::{Multipart, MultipartRejection};
use axum::extract::State;
use axum::http::header::CONTENT_LENGTH;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::{DateTime, Utc};
use iop_core::{
    resolve_request_id, worker_failure, FailureKind, Identity, OrgId, UploadAck, UploadRequest,
    IDENTITY_HEADER, REQUEST_ID_HEADER,
};
use iop_rules::{PluginContent, RuleCatalog, RuleContent};
use iop_store::{ClusterReport, StoredRuleHit};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::io::{self, Cursor};
use std::sync::Arc;

/// Multipart field names that carry the archive
pub const ARCHIVE_FIELDS: [&str; 2] = ["file", "upload"];

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// `POST {api_prefix}/upload`
///
/// Requests without a usable identity are failed through the pipeline before
/// the body is read, so they are counted and logged like any other failure.
pub async fn upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, Json<UploadAck>), ApiError> {
    let request_id = resolve_request_id(header_value(&headers, REQUEST_ID_HEADER));
    let identity = header_value(&headers, IDENTITY_HEADER).map(str::to_owned);

    if Identity::from_header(identity.as_deref()).is_err() {
        let mut request = UploadRequest::new(io::empty()).with_request_id(request_id.as_str());
        if let Some(header) = identity {
            request = request.with_identity(header);
        }
        return match state.pipeline.process(request) {
            Ok(ack) => Ok((StatusCode::ACCEPTED, Json(ack))),
            Err(failure) => Err(failure.into()),
        };
    }

    let mut multipart = multipart.map_err(|rejection| {
        tracing::warn!(%request_id, status = %rejection.status(), "upload is not multipart");
        ApiError::not_multipart(&rejection).with_request_id(request_id.as_str())
    })?;
    let max_upload_size = state.config.max_upload_size;
    let field = read_archive_field(&mut multipart, max_upload_size)
        .await
        .map_err(|err| {
            tracing::warn!(%request_id, code = err.kind().code(), "upload body rejected");
            err.with_request_id(request_id.as_str())
        })?;

    let pipeline = Arc::clone(&state.pipeline);
    let worker_request_id = request_id.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        let mut request = UploadRequest::new(Cursor::new(field.body))
            .with_request_id(worker_request_id)
            .with_identity(identity.unwrap_or_default());
        if let Some(name) = field.file_name {
            request = request.with_file_name(name);
        }
        if let Some(size) = field.declared_size {
            request = request.with_declared_size(size);
        }
        pipeline.process(request)
    })
    .await;

    match outcome {
        Ok(Ok(ack)) => Ok((StatusCode::ACCEPTED, Json(ack))),
        Ok(Err(failure)) => Err(failure.into()),
        Err(join_error) => {
            tracing::error!(%request_id, error = %join_error, "upload worker died");
            Err(worker_failure(request_id, join_error.to_string()).into())
        }
    }
}

/// Archive part of a multipart upload
struct ArchiveField {
    file_name: Option<String>,
    /// Part `content-length`, when the client sent one
    declared_size: Option<u64>,
    body: Bytes,
}

/// Find the archive part and buffer it
///
/// A part declaring more than `max_upload_size` bytes is not read; the
/// pipeline rejects it on the declared size alone.
async fn read_archive_field(multipart: &mut Multipart, max_upload_size: u64) -> Result<ArchiveField, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::multipart(&err))?
    {
        let is_archive = field
            .name()
            .is_some_and(|name| ARCHIVE_FIELDS.contains(&name));
        if !is_archive {
            continue;
        }
        let file_name = field.file_name().map(str::to_owned);
        let declared_size = header_value(field.headers(), CONTENT_LENGTH.as_str())
            .and_then(|value| value.trim().parse::<u64>().ok());
        let body = match declared_size {
            Some(size) if size > max_upload_size => Bytes::new(),
            _ => field.bytes().await.map_err(|err| ApiError::multipart(&err))?,
        };
        return Ok(ArchiveField {
            file_name,
            declared_size,
            body,
        });
    }
    let kind = FailureKind::InvalidArchive;
    Err(ApiError::new(
        kind,
        format!("{}: multipart field `file` is missing", kind.message()),
    ))
}

/// `GET /health`
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

/// `GET /`
pub async fn root() -> Json<Value> {
    Json(json!({
        "service": SERVICE_NAME,
        "status": "running",
        "version": VERSION,
    }))
}

/// Rule hit with the catalog content of its error key
#[derive(Debug, Serialize)]
pub struct RuleHitView {
    /// Rule fqdn
    pub rule_fqdn: String,
    /// Error key
    pub error_key: String,
    /// Values bound by the rule's template
    pub template_data: Value,
    /// Catalog content, `null` once the rule left the catalog
    pub content: Option<RuleContent>,
    /// Time the hit was last written
    pub updated_at: DateTime<Utc>,
}

/// Stored report of one cluster
#[derive(Debug, Serialize)]
pub struct ClusterView {
    /// Cluster id
    pub cluster_id: String,
    /// Owning organization
    pub org_id: OrgId,
    /// Report document
    pub report: Value,
    /// First upload
    pub reported_at: DateTime<Utc>,
    /// Latest upload
    pub last_checked_at: DateTime<Utc>,
    /// Collection time of the latest archive
    pub gathered_at: DateTime<Utc>,
    /// Current hit set
    pub rule_hits: Vec<RuleHitView>,
}

impl ClusterView {
    fn new(stored: ClusterReport, catalog: &RuleCatalog) -> Self {
        let ClusterReport { report, rule_hits } = stored;
        Self {
            cluster_id: report.cluster.as_str().to_owned(),
            org_id: report.org_id,
            report: report.report,
            reported_at: report.reported_at,
            last_checked_at: report.last_checked_at,
            gathered_at: report.gathered_at,
            rule_hits: rule_hits
                .into_iter()
                .map(|hit| hit_view(hit, catalog))
                .collect(),
        }
    }
}

fn hit_view(hit: StoredRuleHit, catalog: &RuleCatalog) -> RuleHitView {
    let content = catalog.content_for(&hit.rule_fqdn, &hit.error_key).cloned();
    RuleHitView {
        rule_fqdn: hit.rule_fqdn,
        error_key: hit.error_key,
        template_data: hit.template_data,
        content,
        updated_at: hit.updated_at,
    }
}

/// Body of `GET /api/v1/clusters/reports`
#[derive(Debug, Serialize)]
pub struct ClustersResponse {
    /// Always `ok`
    pub status: &'static str,
    /// Reports keyed by cluster id
    pub clusters: BTreeMap<String, ClusterView>,
}

/// `GET /api/v1/clusters/reports`
pub async fn cluster_reports(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ClustersResponse>, ApiError> {
    let identity = Identity::from_header(header_value(&headers, IDENTITY_HEADER)).map_err(|err| {
        tracing::warn!(error = %err, "report query rejected");
        ApiError::identity(&err)
    })?;

    let store = Arc::clone(state.pipeline.store());
    let org_id = identity.org_id;
    let reports = tokio::task::spawn_blocking(move || store.cluster_reports(org_id))
        .await
        .map_err(|err| {
            tracing::error!(error = %err, "report query worker died");
            ApiError::of_kind(FailureKind::Internal)
        })?
        .map_err(|err| ApiError::store(&err))?;

    let catalog = state.pipeline.catalog().snapshot();
    let clusters: BTreeMap<_, _> = reports
        .into_iter()
        .map(|stored| {
            let view = ClusterView::new(stored, &catalog);
            (view.cluster_id.clone(), view)
        })
        .collect();
    tracing::info!(org_id = org_id.get(), clusters = clusters.len(), "cluster reports served");

    Ok(Json(ClustersResponse {
        status: "ok",
        clusters,
    }))
}

/// Body of `GET /api/v1/content`
#[derive(Debug, Serialize)]
pub struct ContentResponse {
    /// Always `ok`
    pub status: &'static str,
    /// Content grouped by plugin
    pub content: Vec<PluginContent>,
}

/// `GET /api/v1/content`
pub async fn content(State(state): State<AppState>) -> Json<ContentResponse> {
    let content = state.pipeline.catalog().snapshot().content_by_plugin();
    tracing::debug!(plugins = content.len(), "content served");
    Json(ContentResponse {
        status: "ok",
        content,
    })
}
