//! Phase 2 (P0): hub errors and refused connections.
//! Assert retries happen and the final failure is recorded, not fatal.

use hubfetch_core::download::{BadChecksumPolicy, ChecksumAlgorithm, ExpectedChecksum};
use hubfetch_core::failure::load_all;
use hubfetch_core::{DownloadTask, FailureRecorder};
use std::sync::atomic::Ordering;
use tempfile::TempDir;

use crate::support::critical_utils::{mount_flaky_product, orchestrator, task_for};
use crate::support::socket_guard::start_mock_server_or_skip;

#[tokio::test]
async fn p0_server_error_500_retries_then_commits() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let body = b"granule".to_vec();
    let requests = mount_flaky_product(&server, "p1", 2, 500, body.clone()).await;

    let out = TempDir::new().expect("temp dir");
    let target = out.path().join("p1.nc");
    let task = task_for(&server, "p1", &target, &body);
    let mut recorder = FailureRecorder::new(out.path().join("failed.txt"));

    let stats = orchestrator(3, BadChecksumPolicy::Record)
        .run(&[task], &mut recorder)
        .await
        .expect("run");

    assert_eq!(stats.committed, 1);
    assert_eq!(stats.retried, 2);
    assert_eq!(requests.load(Ordering::SeqCst), 3);
    assert_eq!(std::fs::read(&target).expect("read"), body);
}

#[tokio::test]
async fn p0_persistent_503_is_recorded_after_num_tries() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let requests = mount_flaky_product(&server, "p1", usize::MAX, 503, Vec::new()).await;

    let out = TempDir::new().expect("temp dir");
    let record_path = out.path().join("failed.txt");
    let task = task_for(&server, "p1", &out.path().join("p1.nc"), b"never served");
    let mut recorder = FailureRecorder::new(&record_path);

    let stats = orchestrator(3, BadChecksumPolicy::Record)
        .run(&[task], &mut recorder)
        .await
        .expect("run");

    assert_eq!(stats.recorded, 1);
    assert_eq!(requests.load(Ordering::SeqCst), 3);
    let records = load_all(&record_path).await.expect("reload");
    assert!(records[0].reason.contains("503"), "{}", records[0].reason);
}

#[tokio::test]
async fn p0_not_found_is_retried_like_other_statuses() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let requests = mount_flaky_product(&server, "gone", usize::MAX, 404, Vec::new()).await;

    let out = TempDir::new().expect("temp dir");
    let task = task_for(&server, "gone", &out.path().join("gone.nc"), b"x");
    let mut recorder = FailureRecorder::new(out.path().join("failed.txt"));

    let stats = orchestrator(2, BadChecksumPolicy::Record)
        .run(&[task], &mut recorder)
        .await
        .expect("run");

    assert_eq!(stats.recorded, 1);
    assert_eq!(requests.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn p0_connection_refused_is_recorded() {
    let out = TempDir::new().expect("temp dir");
    let record_path = out.path().join("failed.txt");
    let checksum =
        ExpectedChecksum::new(ChecksumAlgorithm::Md5, "0123456789abcdef0123456789abcdef")
            .expect("valid md5");
    // Port 9 (discard) is closed on test hosts.
    let task = DownloadTask::new(
        "offline",
        "http://127.0.0.1:9/odata/v1/Products('offline')/$value",
        out.path().join("offline.nc"),
        checksum,
    );
    let mut recorder = FailureRecorder::new(&record_path);

    let stats = orchestrator(2, BadChecksumPolicy::Record)
        .run(&[task], &mut recorder)
        .await
        .expect("run");

    assert_eq!(stats.recorded, 1);
    assert_eq!(stats.committed, 0);
    assert_eq!(load_all(&record_path).await.expect("reload").len(), 1);
}
