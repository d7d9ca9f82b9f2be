//! HTTP binding
//!
//! Tenet: the binding adds transport and nothing else. Status codes and
//! error codes come straight from the failure kind, and every error body
//! names the request it belongs to.

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use iop_core::{ServiceConfig, IDENTITY_HEADER, REQUEST_ID_HEADER};
use iop_server::{router, AppState, VERSION};
use iop_test_utils::{five_rule_content, identity_header, standard_archive, ContentTree};
use pretty_assertions::assert_eq;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

const BOUNDARY: &str = "iop-test-boundary";

struct TestApp {
    state: AppState,
    _staging: TempDir,
    _content: ContentTree,
}

impl TestApp {
    fn new() -> Self {
        Self::with_config(|config| config)
    }

    fn with_config(adjust: impl FnOnce(ServiceConfig) -> ServiceConfig) -> Self {
        let staging = tempfile::tempdir().unwrap();
        let content = five_rule_content();
        let config = adjust(ServiceConfig {
            staging_dir: staging.path().join("uploads"),
            content_dir: content.path().to_path_buf(),
            database: ":memory:".into(),
            ..ServiceConfig::default()
        });
        Self {
            state: AppState::from_config(config).unwrap(),
            _staging: staging,
            _content: content,
        }
    }

    fn app(&self) -> Router {
        router(self.state.clone())
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.app().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }
}

fn multipart(field: &str, file_name: &str, data: &[u8]) -> Vec<u8> {
    let mut body = format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\nContent-Type: application/gzip\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn upload_request(identity: Option<&str>, body: Vec<u8>) -> Request<Body> {
    let mut builder = Request::post("/api/ingress/v1/upload")
        .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
        .header(REQUEST_ID_HEADER, "req-http-1");
    if let Some(identity) = identity {
        builder = builder.header(IDENTITY_HEADER, identity);
    }
    builder.body(Body::from(body)).unwrap()
}

fn archive_upload(org: &str, cluster: &str) -> Request<Body> {
    let archive = standard_archive(cluster).build_tar_gz();
    upload_request(
        Some(&identity_header(org, "12345")),
        multipart("file", "archive.tar.gz", &archive),
    )
}

#[tokio::test]
async fn health_and_root() {
    let app = TestApp::new();
    let (status, body) = app
        .send(Request::get("/health").body(Body::empty()).unwrap())
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, serde_json::json!({ "status": "healthy" }));

    let (status, body) = app.send(Request::get("/").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "running");
    assert_eq!(body["version"], VERSION);
}

#[tokio::test]
async fn upload_is_accepted_and_reported() {
    let app = TestApp::new();
    let (status, ack) = app.send(archive_upload("67890", "cluster-abc")).await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(ack["status"], "processed");
    assert_eq!(ack["cluster_id"], "cluster-abc");
    assert_eq!(ack["rules_found"], 2);
    assert_eq!(ack["request_id"], "req-http-1");

    let (status, reports) = app
        .send(
            Request::get("/api/v1/clusters/reports")
                .header(IDENTITY_HEADER, identity_header("67890", "12345"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reports["status"], "ok");
    let cluster = &reports["clusters"]["cluster-abc"];
    assert_eq!(cluster["org_id"], 67890);
    let hits = cluster["rule_hits"].as_array().unwrap();
    assert_eq!(hits.len(), 2);
    assert!(hits.iter().all(|hit| hit["content"].is_object()));
}

#[tokio::test]
async fn reports_are_scoped_to_the_callers_org() {
    let app = TestApp::new();
    let (status, _) = app.send(archive_upload("67890", "cluster-abc")).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (status, reports) = app
        .send(
            Request::get("/api/v1/clusters/reports")
                .header(IDENTITY_HEADER, identity_header("11111", "12345"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reports["clusters"], serde_json::json!({}));
}

#[tokio::test]
async fn upload_field_alias_is_accepted() {
    let app = TestApp::new();
    let archive = standard_archive("cluster-alias").build_tar_gz();
    let (status, ack) = app
        .send(upload_request(
            Some(&identity_header("1", "a")),
            multipart("upload", "archive.tar.gz", &archive),
        ))
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(ack["cluster_id"], "cluster-alias");
}

#[tokio::test]
async fn missing_identity_is_unauthorized() {
    let app = TestApp::new();
    let archive = standard_archive("cluster-abc").build_tar_gz();
    let (status, body) = app
        .send(upload_request(None, multipart("file", "archive.tar.gz", &archive)))
        .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "invalid_identity");
    assert_eq!(body["request_id"], "req-http-1");
    assert_eq!(body["error"], "invalid identity: missing x-rh-identity header");
}

#[tokio::test]
async fn garbage_identity_is_not_echoed() {
    let app = TestApp::new();
    let (status, body) = app
        .send(upload_request(Some("bm90LWpzb24tc2VjcmV0"), multipart("file", "a.tar.gz", b"x")))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(!body["error"].as_str().unwrap().contains("bm90LWpzb24tc2VjcmV0"));
}

#[tokio::test]
async fn missing_file_field_is_invalid_archive() {
    let app = TestApp::new();
    let (status, body) = app
        .send(upload_request(
            Some(&identity_header("1", "a")),
            multipart("notes", "readme.txt", b"hello"),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_archive");
    assert_eq!(body["request_id"], "req-http-1");
}

#[tokio::test]
async fn non_multipart_body_is_invalid_archive() {
    let app = TestApp::new();
    let request = Request::post("/api/ingress/v1/upload")
        .header(IDENTITY_HEADER, identity_header("1", "a"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{}"))
        .unwrap();
    let (status, body) = app.send(request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_archive");
}

#[tokio::test]
async fn oversized_upload_is_payload_too_large() {
    let app = TestApp::with_config(|config| ServiceConfig {
        max_upload_size: 64,
        ..config
    });
    let (status, body) = app.send(archive_upload("67890", "cluster-abc")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "payload_too_large");
}

#[tokio::test]
async fn part_declaring_too_many_bytes_is_payload_too_large() {
    let app = TestApp::with_config(|config| ServiceConfig {
        max_upload_size: 16 * 1024,
        ..config
    });
    let archive = standard_archive("cluster-abc").build_tar_gz();
    let mut body = format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"archive.tar.gz\"\r\nContent-Length: 1048576\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(&archive);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    let (status, body) = app
        .send(upload_request(Some(&identity_header("67890", "12345")), body))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "payload_too_large");
    assert!(body["error"].as_str().unwrap().contains("1048576 bytes"), "{body}");
}

#[tokio::test]
async fn corrupt_archive_is_bad_request() {
    let app = TestApp::new();
    let (status, body) = app
        .send(upload_request(
            Some(&identity_header("1", "a")),
            multipart("file", "archive.tar.gz", b"not a tarball"),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_archive");
}

#[tokio::test]
async fn custom_api_prefix_moves_the_upload_route() {
    let app = TestApp::with_config(|config| ServiceConfig {
        api_prefix: "/ingress".to_string(),
        ..config
    });
    let archive = standard_archive("c1").build_tar_gz();
    let request = Request::post("/ingress/upload")
        .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
        .header(IDENTITY_HEADER, identity_header("1", "a"))
        .body(Body::from(multipart("file", "archive.tar.gz", &archive)))
        .unwrap();
    let (status, _) = app.send(request).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let response = app.app().oneshot(archive_upload("1", "c1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn reports_require_identity() {
    let app = TestApp::new();
    let (status, body) = app
        .send(Request::get("/api/v1/clusters/reports").body(Body::empty()).unwrap())
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "invalid_identity");
}

#[tokio::test]
async fn content_is_grouped_by_plugin() {
    let app = TestApp::new();
    let (status, body) = app
        .send(Request::get("/api/v1/content").body(Body::empty()).unwrap())
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    let plugins = body["content"].as_array().unwrap();
    assert!(!plugins.is_empty());
    assert!(plugins.iter().all(|p| p["error_keys"].is_object()));
}
