//! Error responses
//!
//! Every failure leaves the binding as `{"error", "code", "request_id"}`
//! with the status fixed by its [`FailureKind`]. Internal error chains are
//! logged by the pipeline and never serialized.

use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use iop_core::{FailureKind, IdentityError, PipelineFailure};
use iop_store::StoreError;
use serde::Serialize;

/// Failure rendered as an HTTP response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    kind: FailureKind,
    message: String,
    request_id: Option<String>,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    code: &'static str,
    request_id: Option<&'a str>,
}

impl ApiError {
    /// Error with an explicit message
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            request_id: None,
        }
    }

    /// Error carrying only the fixed message of its kind
    #[must_use]
    pub fn of_kind(kind: FailureKind) -> Self {
        Self::new(kind, kind.message())
    }

    /// Attach the request id
    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Rejected identity header on a read endpoint
    #[must_use]
    pub fn identity(err: &IdentityError) -> Self {
        let kind = FailureKind::InvalidIdentity;
        Self::new(kind, format!("{}: {err}", kind.message()))
    }

    /// Store failure on a read endpoint
    #[must_use]
    pub fn store(err: &StoreError) -> Self {
        tracing::error!(error = %err, "store read failed");
        if err.is_timeout() {
            Self::of_kind(FailureKind::Timeout)
        } else {
            Self::of_kind(FailureKind::PersistenceFailure)
        }
    }

    /// Body that axum could not read as multipart
    #[must_use]
    pub fn multipart(err: &MultipartError) -> Self {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            let kind = FailureKind::PayloadTooLarge;
            Self::new(kind, format!("{}: upload exceeds the configured limit", kind.message()))
        } else {
            let kind = FailureKind::InvalidArchive;
            Self::new(kind, format!("{}: malformed multipart body", kind.message()))
        }
    }

    /// Request that was not multipart at all
    #[must_use]
    pub fn not_multipart(rejection: &MultipartRejection) -> Self {
        let kind = FailureKind::InvalidArchive;
        Self::new(kind, format!("{}: {}", kind.message(), rejection.body_text()))
    }

    /// Category
    #[inline]
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    /// Client-facing message
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Status this error responds with
    #[must_use]
    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.kind.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl From<PipelineFailure> for ApiError {
    fn from(failure: PipelineFailure) -> Self {
        Self::new(failure.kind(), failure.error.public_message()).with_request_id(failure.request_id)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: &self.message,
            code: self.kind.code(),
            request_id: self.request_id.as_deref(),
        };
        (self.status(), Json(body)).into_response()
    }
}
