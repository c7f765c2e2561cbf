use clap::{Args, Parser, Subcommand};

use crate::entity::report::Step;
use crate::errors::SupError;

#[derive(Debug, Parser)]
#[clap(
    author = "github.com/sup-rs",
    version,
    about = "Rust-based Arch and Gentoo installer"
)]
pub struct Cli {
    #[command(subcommand)]
    pub commands: Option<Commands>,

    /// Manifest file (.yaml, .json or .toml)
    #[arg(
        global = true,
        short = 'f',
        long = "file",
        value_parser = validate_filename,
        default_value_t = String::from("./manifest.yaml")
    )]
    pub manifest: String,

    /// Where the new root is mounted.
    /// Overrides $SUP_LOC and the manifest's mount_point
    #[arg(global = true, short = 'm', long = "mount-point")]
    pub mount_point: Option<String>,

    /// Debug logging, unless RUST_LOG says otherwise
    #[arg(global = true, short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Provision the running system in place instead of chrooting
    #[arg(global = true, long = "no-chroot")]
    pub no_chroot: bool,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Check the manifest without touching the system
    Validate,

    /// Print the fstab rows the manifest's devices would get
    Fstab,

    /// Run provisioning steps
    Install(ArgsInstall),
}

#[derive(Debug, Args)]
pub struct ArgsInstall {
    /// Comma-separated steps to run. They always run in install order
    #[arg(
        short = 's',
        long = "steps",
        value_enum,
        value_delimiter = ',',
        required_unless_present = "all",
        conflicts_with = "all"
    )]
    pub steps: Vec<Step>,

    /// Run every step
    #[arg(short = 'a', long = "all")]
    pub all: bool,

    /// Allow prepdisks to wipe the manifest's disks
    #[arg(short = 'o', long = "overwrite")]
    pub overwrite: bool,

    /// Kernel config to build the kernel with
    #[arg(short = 'k', long = "kconfig")]
    pub kconfig: Option<String>,

    /// Do not validate manifest entries
    #[arg(long = "no-validate")]
    pub no_validate: bool,
}

impl ArgsInstall {
    /// Requested steps, deduplicated, in install order
    pub fn selected_steps(&self) -> Vec<Step> {
        Step::ALL
            .into_iter()
            .filter(|step| self.all || self.steps.contains(step))
            .collect()
    }
}

fn validate_filename(name: &str) -> Result<String, SupError> {
    if name.is_empty() {
        return Err(SupError::BadArgs(String::from("empty filename")));
    }

    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn install_args(argv: &[&str]) -> ArgsInstall {
        match Cli::try_parse_from(argv).unwrap().commands {
            Some(Commands::Install(args)) => args,
            other => panic!("expected install, got {other:?}"),
        }
    }

    #[test]
    fn test_steps_run_in_install_order() {
        let args = install_args(&["sup", "install", "--steps", "kernel,prepdisks,sysconf,kernel"]);
        assert_eq!(
            args.selected_steps(),
            vec![Step::Prepdisks, Step::Sysconf, Step::Kernel],
        );

        let args = install_args(&["sup", "-f", "gentoo.yaml", "install", "-a", "-o"]);
        assert_eq!(args.selected_steps(), Step::ALL.to_vec());
        assert!(args.overwrite);
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::try_parse_from([
            "sup",
            "install",
            "-s",
            "config-pkgmgr",
            "-m",
            "/mnt/target",
            "--no-chroot",
        ])
        .unwrap();

        assert_eq!(cli.mount_point.as_deref(), Some("/mnt/target"));
        assert!(cli.no_chroot);
        assert_eq!(cli.manifest, "./manifest.yaml");
    }

    #[test]
    fn test_bad_invocations() {
        assert!(Cli::try_parse_from(["sup", "install"]).is_err());
        assert!(Cli::try_parse_from(["sup", "install", "--all", "-s", "fstab"]).is_err());
        assert!(Cli::try_parse_from(["sup", "install", "-s", "reboot"]).is_err());
        assert!(Cli::try_parse_from(["sup", "-f", "", "validate"]).is_err());
    }
}
