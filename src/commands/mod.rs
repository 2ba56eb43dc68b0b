//! CLI command handlers.

mod batch;
mod check;
mod failed;
mod make_cfg;
mod single;

pub(crate) use batch::run_batch_command;
pub(crate) use check::run_check_command;
pub(crate) use failed::run_failed_command;
pub(crate) use make_cfg::run_make_cfg_command;
pub(crate) use single::run_single_command;
