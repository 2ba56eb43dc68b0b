//! Phase 1 (P0): damaged record files and corrupted product bytes.
//! A bad record line fails loudly; a corrupted product never reaches its target path.

use hubfetch_core::download::{BadChecksumPolicy, TaskResolution, temp_path_for};
use hubfetch_core::failure::load_all;
use hubfetch_core::{FailureRecorder, RecordError};
use tempfile::TempDir;

use crate::support::critical_utils::{
    corrupted_record_file, mount_flaky_product, orchestrator, task_for,
};
use crate::support::socket_guard::start_mock_server_or_skip;

#[tokio::test]
async fn p0_record_file_with_garbage_line_fails_with_line_number() {
    let (_temp, path) = corrupted_record_file("this line has no tabs");

    let result = load_all(&path).await;

    match result {
        Err(RecordError::Malformed { line, .. }) => assert_eq!(line, 2),
        other => panic!("expected RecordError::Malformed, got {other:?}"),
    }
}

#[tokio::test]
async fn p0_record_file_with_bad_checksum_tag_fails() {
    let (_temp, path) = corrupted_record_file("/data/x.nc\tid-2\tcrc32:abcd\ttimeout");

    assert!(matches!(
        load_all(&path).await,
        Err(RecordError::Malformed { .. })
    ));
}

#[tokio::test]
async fn p0_record_file_comments_and_blank_lines_are_ignored() {
    let (_temp, path) = corrupted_record_file("# operator note\n\n");

    let records = load_all(&path).await.expect("load");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].remote_identifier, "good-id");
}

#[tokio::test]
async fn p0_corrupted_product_never_replaces_existing_target() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_flaky_product(&server, "p1", 0, 200, b"bit-flipped payload".to_vec()).await;

    let out = TempDir::new().expect("temp dir");
    let target = out.path().join("granule.nc");
    std::fs::write(&target, b"previous good copy").expect("seed target");
    let task = task_for(&server, "p1", &target, b"expected payload");

    let resolution = orchestrator(2, BadChecksumPolicy::Retry)
        .process_task(&task)
        .await;

    assert!(matches!(resolution, TaskResolution::Recorded { .. }));
    assert_eq!(std::fs::read(&target).expect("read"), b"previous good copy");
    assert!(!temp_path_for(&target).exists(), "temp file must be cleaned up");
}

#[tokio::test]
async fn p0_recorded_failure_survives_reload() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_flaky_product(&server, "p1", 0, 200, b"wrong".to_vec()).await;

    let out = TempDir::new().expect("temp dir");
    let record_path = out.path().join("nested").join("failed.txt");
    let task = task_for(&server, "p1", &out.path().join("p1.nc"), b"right");

    let mut recorder = FailureRecorder::new(&record_path);
    let stats = orchestrator(1, BadChecksumPolicy::Record)
        .run(std::slice::from_ref(&task), &mut recorder)
        .await
        .expect("run");
    assert_eq!(stats.recorded, 1);

    let records = load_all(&record_path).await.expect("reload");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].remote_identifier, "p1");
    assert_eq!(records[0].expected_checksum.as_ref(), Some(task.expected_checksum()));
}
