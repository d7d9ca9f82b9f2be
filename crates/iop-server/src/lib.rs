//! HTTP binding for the Insights on-premise ingress
//!
//! A thin axum layer over [`iop_core::Pipeline`]. Handlers translate
//! headers and multipart bodies into an [`iop_core::UploadRequest`], run the
//! pipeline on the blocking pool and map failures onto the error taxonomy.
//!
//! | Method | Path | Handler |
//! |---|---|---|
//! | POST | `{api_prefix}/upload` | [`routes::upload`] |
//! | GET | `/health` | [`routes::health`] |
//! | GET | `/` | [`routes::root`] |
//! | GET | `/api/v1/clusters/reports` | [`routes::cluster_reports`] |
//! | GET | `/api/v1/content` | [`routes::content`] |

pub mod app;
pub mod error;
pub mod routes;
pub mod state;
pub mod telemetry;

pub use app::{router, serve, MULTIPART_OVERHEAD};
pub use error::ApiError;
pub use state::AppState;

/// Service name reported by `/`
pub const SERVICE_NAME: &str = "insights-on-premise-ingress";

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
