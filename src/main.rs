mod apply;
mod cli;
mod config;
mod constants;
mod distro;
mod entity;
mod errors;
mod linux;
mod manifest;
mod pkg;
mod run;
mod topology;
mod utils;
mod verify;

use clap::Parser;
use colored::Colorize;

fn main() {
    let cli_args = cli::Cli::parse();
    utils::logging::init(cli_args.verbose);

    if let Err(err) = run::run(cli_args) {
        eprintln!("{}", format!("error: {err}").red());
        std::process::exit(1);
    }
}
