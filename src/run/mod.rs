pub mod install;
pub mod validate;

use std::path::Path;

use colored::Colorize;

use crate::errors::SupError;
use crate::manifest::{validation, Manifest};
use crate::topology::trace_blk;
use crate::utils::shell::Shell;
use crate::cli;

pub fn run(cli_args: cli::Cli) -> Result<(), SupError> {
    match &cli_args.commands {
        // Default is to validate
        None | Some(cli::Commands::Validate) => validate::run(&cli_args.manifest),
        Some(cli::Commands::Fstab) => print_fstab(&cli_args.manifest),
        Some(cli::Commands::Install(args_install)) => {
            if !nix::unistd::Uid::effective().is_root() {
                println!("{}", "WARN: running as non-root user".yellow())
            }

            let missing = validation::missing_commands();
            if !missing.is_empty() {
                println!(
                    "{}",
                    format!("WARN: commands not found in $PATH: {}", missing.join(", ")).yellow()
                );
            }

            let report = install::run(&cli_args, args_install)?;
            println!("{}", report.to_json_string());

            Ok(())
        }
    }
}

fn print_fstab(manifest_file: &str) -> Result<(), SupError> {
    let manifest = Manifest::from_file(Path::new(manifest_file))?;
    let records = trace_blk::query_block_attributes(&Shell)?;

    for entry in manifest.topology().fstab_entries(&records) {
        println!("{entry}");
    }

    Ok(())
}
