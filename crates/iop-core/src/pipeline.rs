//! Ingest-evaluate-persist pipeline
//!
//! [`Pipeline::process`] runs one upload synchronously on the calling
//! thread: identity, intake, evaluation, persistence, acknowledgement. The
//! staged file is released on every path out of the pipeline.

use crate::config::ServiceConfig;
use crate::error::{PipelineError, PipelineFailure};
use crate::identity::Identity;
use crate::state::{RequestLifecycle, RequestState};
use chrono::{DateTime, Utc};
use iop_archive::{ArchiveIntake, ClusterId, StagedArchive, Upload};
use iop_rules::{CatalogHandle, Deadline, EvaluationEngine};
use iop_store::ResultStore;
use serde::Serialize;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

/// Header carrying a caller-chosen request id
pub const REQUEST_ID_HEADER: &str = "x-rh-insights-request-id";

const MAX_REQUEST_ID_LEN: usize = 64;

/// One upload as handed over by a binding
#[derive(Debug)]
pub struct UploadRequest<R> {
    request_id: Option<String>,
    identity_header: Option<String>,
    file_name: Option<String>,
    declared_size: Option<u64>,
    body: R,
}

impl<R: Read> UploadRequest<R> {
    /// Request with only a body
    pub fn new(body: R) -> Self {
        Self {
            request_id: None,
            identity_header: None,
            file_name: None,
            declared_size: None,
            body,
        }
    }

    /// Caller-supplied request id; replaced when blank or unusable
    #[must_use]
    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    /// Raw `x-rh-identity` value
    #[must_use]
    pub fn with_identity(mut self, header: impl Into<String>) -> Self {
        self.identity_header = Some(header.into());
        self
    }

    /// Client file name
    #[must_use]
    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }

    /// Size announced by the client
    #[must_use]
    pub fn with_declared_size(mut self, size: u64) -> Self {
        self.declared_size = Some(size);
        self
    }
}

/// Successful upload acknowledgement
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadAck {
    /// Request id
    pub request_id: String,
    /// Always `processed`
    pub status: &'static str,
    /// Cluster the archive came from
    pub cluster_id: ClusterId,
    /// Number of fired rules (equals persisted rule hit rows)
    pub rules_found: usize,
    /// Time results were persisted
    pub uploaded_at: DateTime<Utc>,
}

/// Orchestrates the stages of one upload
#[derive(Debug)]
pub struct Pipeline {
    intake: ArchiveIntake,
    catalog: Arc<CatalogHandle>,
    engine: EvaluationEngine,
    store: Arc<ResultStore>,
    request_timeout: Option<Duration>,
}

impl Pipeline {
    /// Assemble a pipeline with no request budget
    pub fn new(intake: ArchiveIntake, catalog: Arc<CatalogHandle>, store: Arc<ResultStore>) -> Self {
        Self {
            intake,
            catalog,
            engine: EvaluationEngine::new(),
            store,
            request_timeout: None,
        }
    }

    /// Assemble a pipeline from service settings
    pub fn from_config(config: &ServiceConfig, catalog: Arc<CatalogHandle>, store: Arc<ResultStore>) -> Self {
        Self::new(ArchiveIntake::new(config.intake_config()), catalog, store)
            .with_request_timeout(config.request_timeout())
    }

    /// Wall-clock budget per request
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Catalog handle used for every evaluation
    #[inline]
    #[must_use]
    pub fn catalog(&self) -> &Arc<CatalogHandle> {
        &self.catalog
    }

    /// Result store
    #[inline]
    #[must_use]
    pub fn store(&self) -> &Arc<ResultStore> {
        &self.store
    }

    /// Run one upload to completion
    pub fn process<R: Read>(&self, request: UploadRequest<R>) -> Result<UploadAck, PipelineFailure> {
        let request_id = resolve_request_id(request.request_id.as_deref());
        let span = tracing::info_span!(
            "upload",
            request_id = %request_id,
            org_id = tracing::field::Empty,
            cluster_id = tracing::field::Empty,
        );
        let _entered = span.enter();

        let deadline = self
            .request_timeout
            .map_or_else(Deadline::unbounded, Deadline::after);
        let mut lifecycle = RequestLifecycle::new(request_id.clone());

        match self.run(&mut lifecycle, &span, request, deadline) {
            Ok(ack) => {
                metrics::counter!("iop_uploads_total", "outcome" => "processed").increment(1);
                metrics::counter!("iop_rule_hits_total").increment(ack.rules_found as u64);
                tracing::info!(
                    cluster_id = %ack.cluster_id,
                    rules_found = ack.rules_found,
                    elapsed_ms = elapsed_ms(&deadline),
                    "upload processed"
                );
                Ok(ack)
            }
            Err(error) => {
                let kind = error.kind();
                lifecycle.fail(kind);
                metrics::counter!("iop_uploads_total", "outcome" => kind.code()).increment(1);
                if kind.is_client_error() {
                    tracing::warn!(code = kind.code(), error = %error, "upload rejected");
                } else {
                    tracing::error!(code = kind.code(), error = %error, "upload failed");
                }
                Err(PipelineFailure { request_id, error })
            }
        }
    }

    fn run<R: Read>(
        &self,
        lifecycle: &mut RequestLifecycle,
        span: &tracing::Span,
        request: UploadRequest<R>,
        deadline: Deadline,
    ) -> Result<UploadAck, PipelineError> {
        let identity = Identity::from_header(request.identity_header.as_deref())?;
        span.record("org_id", identity.org_id.get());
        lifecycle.advance(RequestState::Authenticated)?;

        let mut upload = Upload::new(lifecycle.request_id(), request.body);
        if let Some(name) = request.file_name {
            upload = upload.with_file_name(name);
        }
        if let Some(size) = request.declared_size {
            upload = upload.with_declared_size(size);
        }
        let staged = self.intake.accept(upload)?;
        span.record("cluster_id", staged.cluster_id().as_str());
        lifecycle.advance(RequestState::Staged)?;

        let outcome = self.evaluate_and_persist(lifecycle, &identity, &staged, deadline);
        release(staged);
        outcome
    }

    fn evaluate_and_persist(
        &self,
        lifecycle: &mut RequestLifecycle,
        identity: &Identity,
        staged: &StagedArchive,
        deadline: Deadline,
    ) -> Result<UploadAck, PipelineError> {
        deadline.check()?;

        let catalog = self.catalog.snapshot();
        let ctx = catalog.build_context(staged).with_deadline(deadline);
        let result = self.engine.evaluate(&ctx)?;
        lifecycle.advance(RequestState::Evaluated)?;

        let summary = self
            .store
            .upsert(identity.org_id, staged.cluster_id(), &result, &deadline)?;
        lifecycle.advance(RequestState::Persisted)?;

        let ack = UploadAck {
            request_id: lifecycle.request_id().to_string(),
            status: "processed",
            cluster_id: result.cluster_id.clone(),
            rules_found: summary.rule_hits,
            uploaded_at: summary.last_checked_at,
        };
        lifecycle.advance(RequestState::Acknowledged)?;
        Ok(ack)
    }
}

fn release(staged: StagedArchive) {
    let path = staged.staged_path().to_path_buf();
    if let Err(err) = staged.release() {
        tracing::warn!(path = %path.display(), error = %err, "staged upload could not be removed");
    }
}

/// Caller id when it is short and made of `[A-Za-z0-9._-]`, a fresh UUID otherwise
#[must_use]
pub fn resolve_request_id(supplied: Option<&str>) -> String {
    supplied
        .map(str::trim)
        .filter(|id| {
            !id.is_empty()
                && id.len() <= MAX_REQUEST_ID_LEN
                && id
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        })
        .map_or_else(|| uuid::Uuid::new_v4().to_string(), str::to_string)
}

fn elapsed_ms(deadline: &Deadline) -> u64 {
    u64::try_from(deadline.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Failure for a request whose worker died before producing a result
#[must_use]
pub fn worker_failure(request_id: impl Into<String>, reason: impl Into<String>) -> PipelineFailure {
    PipelineFailure {
        request_id: request_id.into(),
        error: PipelineError::Worker(reason.into()),
    }
}
