use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::json;

/// Provisioning steps, in the order `--all` runs them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Step {
    Prepdisks,
    Bootstrap,
    Setupenv,
    ConfigPkgmgr,
    Sysconf,
    UpdateWorld,
    Kernel,
    Fstab,
    Packages,
    RemovePackages,
    Network,
    Services,
    Bootloader,
    MiscConfig,
}

impl Step {
    pub const ALL: [Step; 14] = [
        Step::Prepdisks,
        Step::Bootstrap,
        Step::Setupenv,
        Step::ConfigPkgmgr,
        Step::Sysconf,
        Step::UpdateWorld,
        Step::Kernel,
        Step::Fstab,
        Step::Packages,
        Step::RemovePackages,
        Step::Network,
        Step::Services,
        Step::Bootloader,
        Step::MiscConfig,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Prepdisks => "prepdisks",
            Self::Setupenv => "setupenv",
            Self::Bootstrap => "bootstrap",
            Self::ConfigPkgmgr => "config-pkgmgr",
            Self::Sysconf => "sysconf",
            Self::UpdateWorld => "update-world",
            Self::Kernel => "kernel",
            Self::Fstab => "fstab",
            Self::Packages => "packages",
            Self::RemovePackages => "remove-packages",
            Self::Network => "network",
            Self::Services => "services",
            Self::Bootloader => "bootloader",
            Self::MiscConfig => "misc-config",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub struct Report {
    pub location: String,
    pub distro: String,
    pub steps: Vec<Step>,
    pub modified: Vec<PathBuf>,
    pub duration: std::time::Duration,
}

impl Report {
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "location": self.location,
            "distro": self.distro,
            "steps": self.steps,
            "modifiedFiles": self.modified,
            "elaspedTime": self.duration,
        })
    }

    pub fn to_json_string(&self) -> String {
        self.to_json().to_string()
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_json_string())
    }
}
