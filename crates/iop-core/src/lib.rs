//! Insights on-premise ingress core
//!
//! Identity extraction, service configuration and the pipeline that ties
//! archive intake, rule evaluation and result persistence together.
//!
//! ```text
//! x-rh-identity ─► Identity ─┐
//!                            ▼
//! body ─► ArchiveIntake ─► StagedArchive ─► EvaluationEngine ─► ResultStore ─► UploadAck
//!                            │                                                  │
//!                            └──────────── released on every path ◄─────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use iop_core::prelude::*;
//!
//! let pipeline = Pipeline::from_config(&config, catalog, store);
//! let ack = pipeline.process(
//!     UploadRequest::new(body)
//!         .with_identity(header)
//!         .with_file_name("archive.tar.gz"),
//! )?;
//! assert_eq!(ack.status, "processed");
//! ```

pub mod config;
pub mod error;
pub mod identity;
pub mod pipeline;
pub mod state;

pub use config::{ConfigError, LogFormat, ServiceConfig};
pub use error::{FailureKind, PipelineError, PipelineFailure};
pub use identity::{Identity, IdentityError, PrincipalType, IDENTITY_HEADER};
pub use iop_store::OrgId;
pub use pipeline::{
    resolve_request_id, worker_failure, Pipeline, UploadAck, UploadRequest, REQUEST_ID_HEADER,
};
pub use state::{RequestLifecycle, RequestState, StateError};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for common imports
pub mod prelude {
    pub use crate::config::ServiceConfig;
    pub use crate::error::{FailureKind, PipelineFailure};
    pub use crate::identity::Identity;
    pub use crate::pipeline::{Pipeline, UploadAck, UploadRequest};
}
