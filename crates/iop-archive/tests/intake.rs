//! Intake integration tests
//!
//! Tenet: an upload either becomes a `StagedArchive` or leaves the staging
//! directory exactly as it found it.

use iop_archive::{ArchiveIntake, IntakeConfig, IntakeError, Upload, UNPACKED_SIZE_RATIO};
use iop_test_utils::{standard_archive, ArchiveBuilder};
use std::path::Path;

fn intake_in(dir: &Path, max: u64) -> ArchiveIntake {
    ArchiveIntake::new(
        IntakeConfig::default()
            .with_staging_dir(dir)
            .with_max_upload_size(max),
    )
}

fn staged_files(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}

#[test]
fn accepts_standard_archive() {
    let dir = tempfile::tempdir().unwrap();
    let intake = intake_in(dir.path(), 1024 * 1024);
    let body = standard_archive("cluster-abc").build_tar_gz();

    let staged = intake
        .accept(
            Upload::new("req-1", body.as_slice())
                .with_file_name("insights.tar.gz")
                .with_declared_size(body.len() as u64),
        )
        .unwrap();

    assert_eq!(staged.cluster_id().as_str(), "cluster-abc");
    assert_eq!(staged.actual_size(), body.len() as u64);
    assert_eq!(staged.sha256().len(), 64);
    assert!(staged.gathered_at().is_some());
    assert!(staged.contents().contains("config/version.json"));

    let name = staged
        .staged_path()
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap()
        .to_string();
    assert!(name.starts_with("upload-req-1-"), "{name}");
    assert!(name.ends_with(".tar.gz"), "{name}");
}

#[test]
fn staged_file_is_removed_on_drop_and_release() {
    let dir = tempfile::tempdir().unwrap();
    let intake = intake_in(dir.path(), 1024 * 1024);
    let body = standard_archive("c1").build_tar_gz();

    let staged = intake.accept(Upload::new("drop", body.as_slice())).unwrap();
    let path = staged.staged_path().to_path_buf();
    assert!(path.exists());
    drop(staged);
    assert!(!path.exists());

    let staged = intake.accept(Upload::new("release", body.as_slice())).unwrap();
    let path = staged.staged_path().to_path_buf();
    staged.release().unwrap();
    assert!(!path.exists());
    assert_eq!(staged_files(dir.path()), 0);
}

#[test]
fn oversized_declared_upload_stages_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let staging = dir.path().join("staging");
    let intake = intake_in(&staging, 100);

    let err = intake
        .accept(Upload::new("big", [0u8; 10].as_slice()).with_declared_size(101))
        .unwrap_err();
    assert!(matches!(err, IntakeError::PayloadTooLarge { size: 101, limit: 100 }));
    assert!(!staging.exists());
}

#[test]
fn oversized_actual_upload_stages_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let staging = dir.path().join("staging");
    let intake = intake_in(&staging, 100);

    let err = intake
        .accept(Upload::new("big", vec![1u8; 500].as_slice()).with_declared_size(50))
        .unwrap_err();
    assert!(err.is_size_violation());
    assert!(!staging.exists());
}

#[test]
fn highly_compressed_upload_is_bounded_by_default_unpacked_limit() {
    let dir = tempfile::tempdir().unwrap();
    let intake = intake_in(dir.path(), 4096);
    let limit = 4096 * UNPACKED_SIZE_RATIO;
    let body = ArchiveBuilder::new()
        .cluster("c1")
        .file("padding.bin", vec![0u8; limit as usize + 1])
        .build_tar_gz();
    assert!((body.len() as u64) < 4096, "fixture must compress under the upload limit");

    let err = intake.accept(Upload::new("bomb", body.as_slice())).unwrap_err();
    assert!(matches!(err, IntakeError::UnpackedTooLarge { limit: l } if l == limit), "{err:?}");
    assert!(err.is_size_violation());
    assert_eq!(staged_files(dir.path()), 0);
}

#[test]
fn exact_limit_is_accepted_by_size_check() {
    let dir = tempfile::tempdir().unwrap();
    let body = standard_archive("c1").build_tar_gz();
    let intake = intake_in(dir.path(), body.len() as u64);
    assert!(intake.accept(Upload::new("exact", body.as_slice())).is_ok());
}

#[test]
fn wrong_extension_is_rejected_before_staging() {
    let dir = tempfile::tempdir().unwrap();
    let staging = dir.path().join("staging");
    let intake = intake_in(&staging, 1024);

    let err = intake
        .accept(Upload::new("ext", b"abc".as_slice()).with_file_name("report.zip"))
        .unwrap_err();
    assert!(matches!(err, IntakeError::InvalidArchive(_)));
    assert!(!staging.exists());
}

#[test]
fn empty_upload_is_invalid() {
    let dir = tempfile::tempdir().unwrap();
    let intake = intake_in(dir.path(), 1024);
    let err = intake.accept(Upload::new("empty", b"".as_slice())).unwrap_err();
    assert!(matches!(err, IntakeError::InvalidArchive(_)));
    assert_eq!(staged_files(dir.path()), 0);
}

#[test]
fn corrupt_archive_leaves_no_staged_file() {
    let dir = tempfile::tempdir().unwrap();
    let intake = intake_in(dir.path(), 1024 * 1024);
    let err = intake
        .accept(Upload::new("junk", b"not an archive at all".as_slice()))
        .unwrap_err();
    assert!(matches!(err, IntakeError::InvalidArchive(_)));
    assert_eq!(staged_files(dir.path()), 0);
}

#[test]
fn archive_without_cluster_is_invalid() {
    let dir = tempfile::tempdir().unwrap();
    let intake = intake_in(dir.path(), 1024 * 1024);
    let body = ArchiveBuilder::new()
        .text("config/version.json", "{}")
        .build_tar_gz();

    let err = intake.accept(Upload::new("anon", body.as_slice())).unwrap_err();
    assert!(matches!(err, IntakeError::InvalidArchive(_)));
    assert_eq!(staged_files(dir.path()), 0);
}

#[test]
fn staging_directory_is_created() {
    let dir = tempfile::tempdir().unwrap();
    let staging = dir.path().join("nested").join("uploads");
    let intake = intake_in(&staging, 1024 * 1024);
    let body = standard_archive("c1").build_tar_gz();

    let staged = intake.accept(Upload::new("mk", body.as_slice())).unwrap();
    assert!(staged.staged_path().starts_with(&staging));
}
