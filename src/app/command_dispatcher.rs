//! CLI command routing: builds the run context and calls the handler.

use anyhow::Result;
use hubfetch_core::config::DEFAULT_SECTION;
use hubfetch_core::shutdown::SharedShutdown;

use crate::app::context::RunContext;
use crate::cli::{Cli, Command};
use crate::{ProcessExit, commands};

/// Runs the subcommand in `cli` and returns its exit outcome.
///
/// `make-cfg` never reads a config file; every other command loads its
/// section first, so a bad config fails before any network traffic.
pub(crate) async fn dispatch(cli: &Cli, shutdown: SharedShutdown) -> Result<ProcessExit> {
    match &cli.command {
        Command::MakeCfg(args) => {
            commands::run_make_cfg_command(args)?;
            Ok(ProcessExit::Success)
        }
        Command::DlBatch(args) => {
            let ctx = RunContext::load(&args.config_file, &args.section, shutdown)?;
            commands::run_batch_command(&ctx, args).await
        }
        Command::CheckByDates(args) => {
            let ctx = RunContext::load(&args.config_file, &args.section, shutdown)?;
            commands::run_check_command(&ctx, args).await
        }
        Command::DlFailed(args) => {
            let ctx = RunContext::load(&args.config_file, &args.section, shutdown)?;
            commands::run_failed_command(&ctx, args).await
        }
        Command::DlOne(args) => {
            let ctx = RunContext::load(&args.config_file, DEFAULT_SECTION, shutdown)?;
            commands::run_single_command(&ctx, args).await
        }
    }
}
