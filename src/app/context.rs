//! Shared runtime context built from the config file for one command.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

use hubfetch_core::config::HubConfig;
use hubfetch_core::download::{DownloadOrchestrator, HttpClient, StreamingDownloader};
use hubfetch_core::failure::{FailureRecord, FailureRecorder};
use hubfetch_core::hub::{HubClient, SearchQuery, TaskPlanner};
use hubfetch_core::shutdown::SharedShutdown;

/// Holds the config, HTTP client and shutdown handle so command handlers
/// can build planners and orchestrators without passing many arguments.
pub(crate) struct RunContext {
    pub(crate) config: HubConfig,
    pub(crate) http: HttpClient,
    pub(crate) shutdown: SharedShutdown,
}

impl RunContext {
    /// Loads `section` of `config_file` and builds the shared HTTP client.
    pub(crate) fn load(
        config_file: &Path,
        section: &str,
        shutdown: SharedShutdown,
    ) -> Result<Self> {
        let config = HubConfig::load(config_file, section)?;
        debug!(
            section = %config.section,
            hub = %config.hub,
            username = %config.username,
            product = ?config.product,
            num_tries = config.num_tries,
            on_bad_checksum = %config.on_bad_checksum,
            record_file = %config.record_file.display(),
            output_dir = %config.output_dir.display(),
            "configuration read"
        );
        let http = HttpClient::new(Some(config.credentials()))
            .context("Failed to initialise HTTP client")?;
        Ok(Self {
            config,
            http,
            shutdown,
        })
    }

    pub(crate) fn planner(&self) -> TaskPlanner {
        let client = HubClient::new(self.http.clone(), self.config.retry_policy())
            .with_shutdown(self.shutdown.clone());
        TaskPlanner::new(
            client,
            &self.config.hub,
            &self.config.output_dir,
            self.config.checksum_algorithm,
        )
    }

    pub(crate) fn search_query(&self) -> Result<SearchQuery> {
        Ok(SearchQuery {
            hub: self.config.hub.clone(),
            product: self.config.require_product()?.to_string(),
            platform: self.config.platform.clone(),
            mode: self.config.mode.clone(),
            rows: self.config.rows,
        })
    }

    pub(crate) fn orchestrator(&self, skip_existing: bool) -> DownloadOrchestrator {
        let downloader =
            StreamingDownloader::with_block_size(self.http.clone(), self.config.block_size);
        DownloadOrchestrator::new(Box::new(downloader), self.config.retry_policy())
            .with_log_block_size(self.config.log_block_size)
            .with_skip_existing(skip_existing)
            .with_shutdown(self.shutdown.clone())
    }

    pub(crate) fn recorder(&self) -> FailureRecorder {
        FailureRecorder::new(&self.config.record_file)
    }
}

/// Appends products that never became tasks.
pub(crate) async fn record_unresolved(
    recorder: &mut FailureRecorder,
    unresolved: &[FailureRecord],
) -> Result<usize> {
    for record in unresolved {
        recorder
            .append(record)
            .await
            .context("Failed to record unresolved product")?;
    }
    Ok(unresolved.len())
}
