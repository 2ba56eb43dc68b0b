//! CLI entry point for hubfetch.

use std::process::ExitCode;

use clap::Parser;
use hubfetch_core::shutdown::{SharedShutdown, ShutdownCoordinator};
use tracing::{debug, error, warn};

mod app;
mod cli;
mod commands;

use app::{command_dispatcher, terminal};
use cli::Cli;

/// Process outcome mapped to the exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProcessExit {
    /// Every task committed or skipped.
    Success,
    /// The run finished but left entries in the record file, or was interrupted.
    Partial,
    /// Configuration, search, or record-file failure.
    Failure,
}

impl ProcessExit {
    pub(crate) fn code(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::Failure => 1,
            Self::Partial => 2,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Parse before tracing so --help prints without logs
    let cli = Cli::parse();
    terminal::init_tracing(terminal::default_level(cli.verbose, cli.quiet));
    debug!(?cli, "CLI arguments parsed");

    let shutdown = ShutdownCoordinator::shared();
    spawn_interrupt_listener(shutdown.clone());

    let exit = match command_dispatcher::dispatch(&cli, shutdown).await {
        Ok(exit) => exit,
        Err(e) => {
            error!(error = %format!("{e:#}"), "hubfetch failed");
            ProcessExit::Failure
        }
    };
    ExitCode::from(exit.code())
}

/// First Ctrl+C asks the run to wind down; a second one exits immediately.
fn spawn_interrupt_listener(shutdown: SharedShutdown) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        warn!("interrupt received; recording remaining downloads, press Ctrl+C again to abort");
        shutdown.request_shutdown();
        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(130);
        }
    });
}
