//! `check-by-dates` handler: verify local files against hub checksums.
//!
//! Nothing is downloaded. Every product whose local file is missing or has
//! the wrong checksum is appended to the record file, so `dlfailed` can fetch
//! exactly those.

use anyhow::{Context, Result, bail};
use tracing::{info, warn};

use hubfetch_core::download::{DownloadTask, verify_file};
use hubfetch_core::failure::FailureRecord;
use hubfetch_core::hub::{HubError, date_range};

use crate::ProcessExit;
use crate::app::context::{RunContext, record_unresolved};
use crate::cli::DateRangeArgs;

pub(crate) async fn run_check_command(
    ctx: &RunContext,
    args: &DateRangeArgs,
) -> Result<ProcessExit> {
    if args.start_date > args.end_date {
        bail!(
            "start date {} is after end date {}",
            args.start_date,
            args.end_date
        );
    }

    let query = ctx.search_query()?;
    let planner = ctx.planner();
    let mut recorder = ctx.recorder();
    let mut verified = 0usize;
    let mut recorded = 0usize;

    for date in date_range(args.start_date, args.end_date) {
        if ctx.shutdown.is_shutdown_requested() {
            warn!(from = %date, "interrupted; remaining dates were not checked");
            return Ok(ProcessExit::Partial);
        }

        let plan = match planner.plan_for_date(&query, date).await {
            Ok(plan) => plan,
            Err(HubError::Interrupted { .. }) => {
                warn!(from = %date, "interrupted while searching; remaining dates were not checked");
                return Ok(ProcessExit::Partial);
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to search the hub for {date}"));
            }
        };
        recorded += record_unresolved(&mut recorder, &plan.unresolved).await?;

        for task in &plan.tasks {
            match local_problem(task).await {
                None => verified += 1,
                Some(reason) => {
                    recorder
                        .append(&FailureRecord::from_task(task, reason))
                        .await
                        .context("Failed to record bad local file")?;
                    recorded += 1;
                }
            }
        }
    }

    info!(
        verified,
        recorded,
        record_file = %recorder.path().display(),
        "check complete"
    );
    Ok(if recorded == 0 {
        ProcessExit::Success
    } else {
        ProcessExit::Partial
    })
}

/// Why the local copy of `task` is unusable, or `None` if it verifies.
async fn local_problem(task: &DownloadTask) -> Option<String> {
    match verify_file(task.target_path(), task.expected_checksum()).await {
        Ok(verification) if verification.matches => None,
        Ok(verification) => Some(format!(
            "local checksum mismatch: expected {}, got {}",
            task.expected_checksum().hex(),
            verification.actual
        )),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Some("local file missing".to_string())
        }
        Err(e) => Some(format!("local file unreadable: {e}")),
    }
}
