//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};

/// Download satellite data products from a data hub.
///
/// Products are streamed to disk, checked against the hub's checksum and
/// retried on failure. Anything that still fails is written to a record file
/// that `dlfailed` can resume from.
#[derive(Parser, Debug)]
#[command(name = "hubfetch")]
#[command(author, version, about)]
pub struct Cli {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Download every product sensed in a date range
    #[command(name = "dlbatch")]
    DlBatch(DateRangeArgs),

    /// Re-download the products listed in a failed-downloads record file
    #[command(name = "dlfailed")]
    DlFailed(FailedArgs),

    /// Verify local files for a date range, recording missing or corrupt ones
    #[command(name = "check-by-dates", visible_alias = "cbd")]
    CheckByDates(DateRangeArgs),

    /// Download a single product by its hub identifier
    #[command(name = "dlone")]
    DlOne(SingleArgs),

    /// Write a sample config file, or print config help with `make-cfg help`
    #[command(name = "make-cfg")]
    MakeCfg(MakeCfgArgs),
}

/// Arguments shared by the date-range commands.
#[derive(Args, Debug, Clone)]
pub struct DateRangeArgs {
    /// Path to an INI-style config file with the download options
    pub config_file: PathBuf,

    /// Section of the config with the settings to use
    pub section: String,

    /// First date, in YYYYMMDD or YYYY-MM-DD format
    #[arg(value_parser = parse_date)]
    pub start_date: NaiveDate,

    /// Last date (inclusive), in YYYYMMDD or YYYY-MM-DD format
    #[arg(value_parser = parse_date)]
    pub end_date: NaiveDate,

    /// Skip products whose local file already has the expected checksum
    #[arg(long)]
    pub skip_existing: bool,
}

/// Arguments for `dlfailed`.
#[derive(Args, Debug, Clone)]
pub struct FailedArgs {
    /// Path to an INI-style config file with the download options
    pub config_file: PathBuf,

    /// Section of the config with the settings to use
    pub section: String,

    /// Record file listing the failed downloads to retry
    pub failed_list_file: PathBuf,

    /// Skip products whose local file already has the expected checksum
    #[arg(long)]
    pub skip_existing: bool,
}

/// Arguments for `dlone`.
#[derive(Args, Debug, Clone)]
pub struct SingleArgs {
    /// Path to an INI-style config file (its DEFAULT section is used)
    pub config_file: PathBuf,

    /// Hub identifier of the product to download
    pub product_id: String,

    /// Path to write the downloaded file to
    pub output_name: PathBuf,
}

/// Arguments for `make-cfg`.
#[derive(Args, Debug, Clone)]
pub struct MakeCfgArgs {
    /// Path to create the sample config at, or `help` to print config help
    pub config_file: String,
}

/// Parses `YYYYMMDD` or `YYYY-MM-DD`.
pub fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    let format = match raw.len() {
        8 => "%Y%m%d",
        10 => "%Y-%m-%d",
        _ => return Err(format!("bad date '{raw}': expected YYYYMMDD or YYYY-MM-DD")),
    };
    NaiveDate::parse_from_str(raw, format).map_err(|e| format!("bad date '{raw}': {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("hubfetch").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_cli_dlbatch_parses_dates_in_both_formats() {
        let cli = parse(&["dlbatch", "hub.cfg", "NO2", "20190101", "2019-01-03"]);
        let Command::DlBatch(args) = cli.command else {
            panic!("expected dlbatch");
        };
        assert_eq!(args.config_file, PathBuf::from("hub.cfg"));
        assert_eq!(args.section, "NO2");
        assert_eq!(args.start_date, NaiveDate::from_ymd_opt(2019, 1, 1).unwrap());
        assert_eq!(args.end_date, NaiveDate::from_ymd_opt(2019, 1, 3).unwrap());
        assert!(!args.skip_existing);
    }

    #[test]
    fn test_cli_bad_date_rejected() {
        let result = Cli::try_parse_from(["hubfetch", "dlbatch", "c", "S", "2019-13-01", "20190101"]);
        let err = result.unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);

        let result = Cli::try_parse_from(["hubfetch", "dlbatch", "c", "S", "2019011", "20190101"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_cbd_alias() {
        let cli = parse(&["cbd", "hub.cfg", "NO2", "20190101", "20190101"]);
        assert!(matches!(cli.command, Command::CheckByDates(_)));

        let cli = parse(&["check-by-dates", "hub.cfg", "NO2", "20190101", "20190101"]);
        assert!(matches!(cli.command, Command::CheckByDates(_)));
    }

    #[test]
    fn test_cli_dlfailed_and_dlone() {
        let cli = parse(&["dlfailed", "hub.cfg", "NO2", "failed.txt", "--skip-existing"]);
        let Command::DlFailed(args) = cli.command else {
            panic!("expected dlfailed");
        };
        assert_eq!(args.failed_list_file, PathBuf::from("failed.txt"));
        assert!(args.skip_existing);

        let cli = parse(&["dlone", "hub.cfg", "abc-123", "out.nc"]);
        let Command::DlOne(args) = cli.command else {
            panic!("expected dlone");
        };
        assert_eq!(args.product_id, "abc-123");
        assert_eq!(args.output_name, PathBuf::from("out.nc"));
    }

    #[test]
    fn test_cli_make_cfg_help() {
        let cli = parse(&["make-cfg", "help"]);
        let Command::MakeCfg(args) = cli.command else {
            panic!("expected make-cfg");
        };
        assert_eq!(args.config_file, "help");
    }

    #[test]
    fn test_cli_global_verbosity_flags() {
        let cli = parse(&["-vv", "make-cfg", "help"]);
        assert_eq!(cli.verbose, 2);

        let cli = parse(&["make-cfg", "help", "-q"]);
        assert!(cli.quiet);
    }

    #[test]
    fn test_cli_missing_subcommand_is_error() {
        let result = Cli::try_parse_from(["hubfetch"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_version_flag_shows_version() {
        let err = Cli::try_parse_from(["hubfetch", "--version"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
    }
}
