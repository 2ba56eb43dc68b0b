//! `dlone` handler: download one product by identifier.

use anyhow::Result;
use tracing::info;

use crate::ProcessExit;
use crate::app::context::{RunContext, record_unresolved};
use crate::app::exit_handler::determine_exit_outcome;
use crate::cli::SingleArgs;

pub(crate) async fn run_single_command(ctx: &RunContext, args: &SingleArgs) -> Result<ProcessExit> {
    let plan = ctx
        .planner()
        .plan_single(&args.product_id, &args.output_name)
        .await;

    let mut recorder = ctx.recorder();
    let unresolved = record_unresolved(&mut recorder, &plan.unresolved).await?;
    let mut stats = ctx.orchestrator(false).run(&plan.tasks, &mut recorder).await?;
    stats.recorded += unresolved;

    if stats.committed == 1 {
        info!(path = %args.output_name.display(), "product downloaded");
    }
    Ok(determine_exit_outcome(&stats))
}
