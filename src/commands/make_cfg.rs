//! `make-cfg` handler: write a sample config or print config help.

use std::path::Path;

use anyhow::Result;

use hubfetch_core::config::{config_help, write_sample_config};

use crate::cli::MakeCfgArgs;

pub(crate) fn run_make_cfg_command(args: &MakeCfgArgs) -> Result<()> {
    if args.config_file == "help" {
        print!("{}", config_help());
        return Ok(());
    }

    let path = Path::new(&args.config_file);
    write_sample_config(path)?;
    println!("Wrote sample config to {}", path.display());
    println!("Fill in username and password, then run `hubfetch make-cfg help` for all keys.");
    Ok(())
}
