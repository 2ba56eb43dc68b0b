//! Turns hub searches and failure records into download tasks.

use std::path::{Component, Path, PathBuf};

use chrono::NaiveDate;
use tracing::{info, warn};

use super::client::{HubClient, HubError};
use super::query::{ProductEntry, SearchQuery, product_urls};
use crate::download::{ChecksumAlgorithm, DownloadTask, ExpectedChecksum};
use crate::failure::FailureRecord;

/// Tasks ready to download plus products that could not become tasks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskPlan {
    /// Fully resolved tasks, in processing order.
    pub tasks: Vec<DownloadTask>,
    /// Products whose checksum could not be obtained; to be recorded as-is.
    pub unresolved: Vec<FailureRecord>,
}

impl TaskPlan {
    /// Number of products covered by the plan.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len() + self.unresolved.len()
    }

    /// True when the plan covers no products.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Every date from `start` to `end`, inclusive.
pub fn date_range(start: NaiveDate, end: NaiveDate) -> impl Iterator<Item = NaiveDate> {
    start.iter_days().take_while(move |d| *d <= end)
}

/// Builds [`DownloadTask`]s from hub metadata.
#[derive(Debug, Clone)]
pub struct TaskPlanner {
    client: HubClient,
    hub: String,
    output_dir: PathBuf,
    algorithm: ChecksumAlgorithm,
}

impl TaskPlanner {
    /// Creates a planner writing batch products into `output_dir`.
    #[must_use]
    pub fn new(
        client: HubClient,
        hub: impl Into<String>,
        output_dir: impl Into<PathBuf>,
        algorithm: ChecksumAlgorithm,
    ) -> Self {
        Self {
            client,
            hub: hub.into(),
            output_dir: output_dir.into(),
            algorithm,
        }
    }

    /// Plans every product sensed on `date`.
    ///
    /// # Errors
    ///
    /// Fails if the search itself cannot be completed. Per-product checksum
    /// failures land in [`TaskPlan::unresolved`] instead.
    pub async fn plan_for_date(
        &self,
        query: &SearchQuery,
        date: NaiveDate,
    ) -> Result<TaskPlan, HubError> {
        let products = self.client.search_day(query, date).await?;
        let mut plan = TaskPlan::default();
        for product in &products {
            let Some(target) = self.target_for(product) else {
                warn!(id = %product.id, title = %product.title, "refusing unsafe product title");
                plan.unresolved.push(FailureRecord::unresolved(
                    &product.id,
                    &self.output_dir,
                    format!("unsafe product title {:?}", product.title),
                ));
                continue;
            };
            self.plan_one(&mut plan, &product.id, target, None).await;
        }
        info!(
            %date,
            tasks = plan.tasks.len(),
            unresolved = plan.unresolved.len(),
            "planned downloads for date"
        );
        Ok(plan)
    }

    /// Plans one task per failure record, keeping each record's target path.
    ///
    /// A bare file name, as older record files store, is placed in the
    /// output directory.
    ///
    /// The checksum is fetched again; if that fails, the checksum stored in
    /// the record is used, and a record without one becomes unresolved.
    pub async fn plan_from_records(&self, records: &[FailureRecord]) -> TaskPlan {
        let mut plan = TaskPlan::default();
        for record in records {
            self.plan_one(
                &mut plan,
                &record.remote_identifier,
                self.resolve_recorded_target(&record.target_path),
                record.expected_checksum.clone(),
            )
            .await;
        }
        info!(
            records = records.len(),
            tasks = plan.tasks.len(),
            unresolved = plan.unresolved.len(),
            "planned downloads from record file"
        );
        plan
    }

    /// Plans a single product written to `target`.
    pub async fn plan_single(&self, id: &str, target: &Path) -> TaskPlan {
        let mut plan = TaskPlan::default();
        self.plan_one(&mut plan, id, target.to_path_buf(), None).await;
        plan
    }

    /// Local path a search result is downloaded to, or `None` when the
    /// title is not a plain file name and would escape the output directory.
    #[must_use]
    pub fn target_for(&self, product: &ProductEntry) -> Option<PathBuf> {
        is_plain_file_name(&product.title).then(|| self.output_dir.join(&product.title))
    }

    fn resolve_recorded_target(&self, target: &Path) -> PathBuf {
        match target.to_str() {
            Some(name) if is_plain_file_name(name) => self.output_dir.join(target),
            _ => target.to_path_buf(),
        }
    }

    async fn plan_one(
        &self,
        plan: &mut TaskPlan,
        id: &str,
        target: PathBuf,
        fallback: Option<ExpectedChecksum>,
    ) {
        let checksum = match self.client.fetch_checksum(&self.hub, id, self.algorithm).await {
            Ok(checksum) => checksum,
            Err(error) => match fallback {
                Some(previous) => {
                    warn!(id, error = %error, "using previously recorded checksum");
                    previous
                }
                None => {
                    warn!(id, error = %error, "could not fetch checksum");
                    plan.unresolved.push(FailureRecord::unresolved(
                        id,
                        target,
                        format!("checksum unavailable: {error}"),
                    ));
                    return;
                }
            },
        };

        let url = product_urls(&self.hub, id).data;
        plan.tasks.push(DownloadTask::new(id, url, target, checksum));
    }
}

/// True for a single normal path component with no separators.
fn is_plain_file_name(name: &str) -> bool {
    if name.contains(['/', '\\']) {
        return false;
    }
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}
