//! Phase 5: Ctrl+C during a batch.
//! The in-flight task and every task after it are recorded; nothing half-written stays behind.

use std::time::Duration;

use hubfetch_core::download::{
    BadChecksumPolicy, INTERRUPTED_BEFORE_DOWNLOAD, INTERRUPTED_DURING_DOWNLOAD, temp_path_for,
};
use hubfetch_core::FailureRecorder;
use hubfetch_core::failure::load_all;
use hubfetch_core::shutdown::ShutdownCoordinator;
use tempfile::TempDir;

use crate::support::critical_utils::{mount_slow_product, orchestrator, task_for};
use crate::support::socket_guard::start_mock_server_or_skip;

#[tokio::test]
async fn p1_interrupt_mid_download_records_in_flight_and_remaining() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_slow_product(&server, "slow", b"slow body", Duration::from_secs(5)).await;

    let out = TempDir::new().expect("temp dir");
    let record_path = out.path().join("failed.txt");
    let first = task_for(&server, "slow", &out.path().join("slow.nc"), b"slow body");
    let second = task_for(&server, "next", &out.path().join("next.nc"), b"next body");

    let shutdown = ShutdownCoordinator::shared();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.request_shutdown();
    });

    let mut recorder = FailureRecorder::new(&record_path);
    let stats = tokio::time::timeout(
        Duration::from_secs(10),
        orchestrator(3, BadChecksumPolicy::Record)
            .with_shutdown(shutdown)
            .run(&[first, second], &mut recorder),
    )
    .await
    .expect("interrupt must end the run promptly")
    .expect("run");

    assert!(stats.interrupted);
    assert_eq!(stats.recorded, 2);
    assert_eq!(stats.committed, 0);

    let records = load_all(&record_path).await.expect("reload");
    assert_eq!(records[0].remote_identifier, "slow");
    assert_eq!(records[0].reason, INTERRUPTED_DURING_DOWNLOAD);
    assert_eq!(records[1].remote_identifier, "next");
    assert_eq!(records[1].reason, INTERRUPTED_BEFORE_DOWNLOAD);
    assert!(!out.path().join("slow.nc").exists());
    assert!(!temp_path_for(&out.path().join("slow.nc")).exists());
}

#[tokio::test]
async fn p1_interrupted_records_resume_cleanly() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_slow_product(&server, "p1", b"body", Duration::from_millis(0)).await;

    let out = TempDir::new().expect("temp dir");
    let record_path = out.path().join("failed.txt");
    let task = task_for(&server, "p1", &out.path().join("p1.nc"), b"body");

    let shutdown = ShutdownCoordinator::shared();
    shutdown.request_shutdown();
    let mut recorder = FailureRecorder::new(&record_path);
    orchestrator(1, BadChecksumPolicy::Record)
        .with_shutdown(shutdown)
        .run(std::slice::from_ref(&task), &mut recorder)
        .await
        .expect("interrupted run");

    let records = load_all(&record_path).await.expect("reload");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].target_path, task.target_path());

    let resumed: Vec<_> = records
        .iter()
        .map(|r| task_for(&server, &r.remote_identifier, &r.target_path, b"body"))
        .collect();
    let mut fresh = FailureRecorder::new(out.path().join("failed-2.txt"));
    let stats = orchestrator(1, BadChecksumPolicy::Record)
        .run(&resumed, &mut fresh)
        .await
        .expect("resume");

    assert!(stats.all_succeeded());
    assert_eq!(std::fs::read(task.target_path()).expect("read"), b"body");
    assert!(load_all(fresh.path()).await.expect("reload").is_empty());
}
