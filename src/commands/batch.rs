//! `dlbatch` handler: download every product sensed in a date range.

use anyhow::{Context, Result, bail};
use tracing::{info, warn};

use hubfetch_core::BatchStats;
use hubfetch_core::hub::{HubError, date_range};

use crate::ProcessExit;
use crate::app::context::{RunContext, record_unresolved};
use crate::app::exit_handler::determine_exit_outcome;
use crate::cli::DateRangeArgs;

/// Searches and downloads one day at a time, so checksums are fetched
/// shortly before their product.
pub(crate) async fn run_batch_command(
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
    let orchestrator = ctx.orchestrator(args.skip_existing);
    let mut recorder = ctx.recorder();
    let mut totals = BatchStats::default();

    for date in date_range(args.start_date, args.end_date) {
        if ctx.shutdown.is_shutdown_requested() {
            warn!(
                from = %date,
                to = %args.end_date,
                "interrupted; these dates were not searched, rerun dlbatch for them"
            );
            totals.interrupted = true;
            break;
        }

        info!(%date, product = %query.product, "searching hub");
        let plan = match planner.plan_for_date(&query, date).await {
            Ok(plan) => plan,
            Err(HubError::Interrupted { .. }) => {
                warn!(from = %date, "interrupted while searching; rerun dlbatch from this date");
                totals.interrupted = true;
                break;
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to search the hub for {date}"));
            }
        };
        if plan.is_empty() {
            info!(%date, "no products for date");
            continue;
        }

        totals.recorded += record_unresolved(&mut recorder, &plan.unresolved).await?;
        let stats = orchestrator.run(&plan.tasks, &mut recorder).await?;
        totals.merge(&stats);
    }

    info!(
        committed = totals.committed,
        recorded = totals.recorded,
        skipped = totals.skipped,
        retried = totals.retried,
        record_file = %recorder.path().display(),
        "batch complete"
    );
    Ok(determine_exit_outcome(&totals))
}
