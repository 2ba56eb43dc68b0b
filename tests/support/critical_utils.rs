//! Shared utilities for critical tests (corrupted record files, flaky hub, slow hub).
//!
//! Used by tests under `tests/critical/` to build damaged record files and
//! wiremock hubs that misbehave in controlled ways.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use hubfetch_core::download::{ChecksumAlgorithm, ExpectedChecksum, digest_bytes};
use hubfetch_core::{
    BadChecksumPolicy, DownloadOrchestrator, DownloadTask, HttpClient, RetryPolicy,
    StreamingDownloader,
};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Respond, ResponseTemplate};

/// Writes a record file with one valid line followed by `garbage`.
///
/// Returns the `TempDir` that must be kept alive and the file path.
pub fn corrupted_record_file(garbage: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let record = temp_dir.path().join("failed.txt");
    let valid = format!(
        "{}\tgood-id\tmd5:{}\tconnection reset\n",
        temp_dir.path().join("good.nc").display(),
        digest_bytes(b"x", ChecksumAlgorithm::Md5)
    );
    std::fs::write(&record, format!("{valid}{garbage}\n")).expect("Failed to write record file");
    (temp_dir, record)
}

/// Task for `id` served by `server`, expecting the MD5 of `content`.
pub fn task_for(server: &MockServer, id: &str, target: &Path, content: &[u8]) -> DownloadTask {
    let hex = digest_bytes(content, ChecksumAlgorithm::Md5);
    let checksum = ExpectedChecksum::new(ChecksumAlgorithm::Md5, &hex).expect("valid md5");
    DownloadTask::new(
        id,
        format!("{}/odata/v1/Products('{id}')/$value", server.uri()),
        target,
        checksum,
    )
}

/// Orchestrator over a real streaming downloader with no retry delay.
pub fn orchestrator(num_tries: u32, bad_checksum: BadChecksumPolicy) -> DownloadOrchestrator {
    let downloader = StreamingDownloader::new(HttpClient::new(None).expect("http client"));
    DownloadOrchestrator::new(
        Box::new(downloader),
        RetryPolicy::immediate(num_tries, bad_checksum),
    )
}

/// Responder that fails the first `fail_count` requests with `status`, then returns 200 with body.
struct FlakyResponder {
    request_count: Arc<AtomicUsize>,
    fail_count: usize,
    status: u16,
    success_body: Vec<u8>,
}

impl Respond for FlakyResponder {
    fn respond(&self, _request: &wiremock::Request) -> ResponseTemplate {
        let n = self.request_count.fetch_add(1, Ordering::SeqCst);
        if n < self.fail_count {
            ResponseTemplate::new(self.status).set_body_bytes(b"hub busy")
        } else {
            ResponseTemplate::new(200).set_body_bytes(self.success_body.clone())
        }
    }
}

/// Mounts a flaky product `id`: `fail_count` responses with `status`, then `success_body`.
///
/// Returns the shared request counter.
pub async fn mount_flaky_product(
    server: &MockServer,
    id: &str,
    fail_count: usize,
    status: u16,
    success_body: Vec<u8>,
) -> Arc<AtomicUsize> {
    let request_count = Arc::new(AtomicUsize::new(0));
    let responder = FlakyResponder {
        request_count: Arc::clone(&request_count),
        fail_count,
        status,
        success_body,
    };

    Mock::given(method("GET"))
        .and(path(format!("/odata/v1/Products('{id}')/$value")))
        .respond_with(responder)
        .mount(server)
        .await;
    request_count
}

/// Mounts product `id` answering after `delay`.
pub async fn mount_slow_product(server: &MockServer, id: &str, body: &[u8], delay: Duration) {
    Mock::given(method("GET"))
        .and(path(format!("/odata/v1/Products('{id}')/$value")))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(body.to_vec())
                .set_delay(delay),
        )
        .mount(server)
        .await;
}
