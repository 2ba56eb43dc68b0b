//! `dlfailed` handler: resume from a record file.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};

use hubfetch_core::failure::{load_all, rotate_for_resume};

use crate::ProcessExit;
use crate::app::context::{RunContext, record_unresolved};
use crate::app::exit_handler::determine_exit_outcome;
use crate::cli::FailedArgs;

pub(crate) async fn run_failed_command(ctx: &RunContext, args: &FailedArgs) -> Result<ProcessExit> {
    let records = load_all(&args.failed_list_file).await.with_context(|| {
        format!(
            "Failed to read record file '{}'",
            args.failed_list_file.display()
        )
    })?;
    if records.is_empty() {
        info!(
            path = %args.failed_list_file.display(),
            "no failed downloads to retry"
        );
        return Ok(ProcessExit::Success);
    }

    // Loaded into memory first: the new run may write to the same file.
    if is_same_file(&args.failed_list_file, &ctx.config.record_file) {
        warn!(
            path = %args.failed_list_file.display(),
            "record file is also the active record file; backing it up"
        );
        rotate_for_resume(&args.failed_list_file).await?;
    }

    let plan = ctx.planner().plan_from_records(&records).await;
    let mut recorder = ctx.recorder();
    let unresolved = record_unresolved(&mut recorder, &plan.unresolved).await?;

    let mut stats = ctx
        .orchestrator(args.skip_existing)
        .run(&plan.tasks, &mut recorder)
        .await?;
    stats.recorded += unresolved;

    info!(
        records = records.len(),
        committed = stats.committed,
        recorded = stats.recorded,
        skipped = stats.skipped,
        "resume complete"
    );
    Ok(determine_exit_outcome(&stats))
}

fn is_same_file(a: &Path, b: &Path) -> bool {
    match (std::fs::canonicalize(a), std::fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}
