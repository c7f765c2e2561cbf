use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::portage::{append_package_lines, normalize_package_name, PackageFile};
use crate::constants::{CHANGE_LINE_MARKERS, UNMASK_MARKER};
use crate::errors::{FailureClass, SupError};
use crate::utils::shell::{ExecOpts, Executor};

/// How an emerge blocked on unmasking is repaired
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutoUnmask {
    /// Let emerge write the changes, then review them with dispatch-conf
    #[default]
    Interactive,
    /// Copy the suggested changes into package.* files ourselves
    Automerge,
}

const CHANGE_BLOCKS: [(&str, PackageFile); 3] = [
    ("The following USE changes", PackageFile::Use),
    ("The following keyword changes", PackageFile::AcceptKeywords),
    ("The following license changes", PackageFile::License),
];

pub struct ConflictResolver {
    pub strategy: AutoUnmask,
    pub portage_dir: PathBuf,
}

impl ConflictResolver {
    pub fn new(strategy: AutoUnmask, portage_dir: &Path) -> Self {
        Self {
            strategy,
            portage_dir: portage_dir.to_path_buf(),
        }
    }

    /// Runs `emerge <flags> <target>`. A failure asking for unmask changes is
    /// repaired once with the configured strategy, then the transaction is
    /// reissued. Any other failure propagates as-is.
    ///
    /// Returns the package.* files written by automerge.
    pub fn emerge(
        &self,
        exec: &dyn Executor,
        target: &str,
        flags: &[&str],
        env: &[(String, String)],
    ) -> Result<Vec<PathBuf>, SupError> {
        let mut argv = vec!["emerge"];
        argv.extend(flags);
        argv.push(target);

        let opts = ExecOpts {
            env: env.to_vec(),
            truncate: false,
            ..ExecOpts::default()
        };

        let err = match exec.exec_with(&argv, &opts) {
            Ok(_) => return Ok(Vec::new()),
            Err(err) => err,
        };

        let output = match err.cmd_failure() {
            Some(failure)
                if failure.class() == FailureClass::Permission
                    && failure.output_contains(UNMASK_MARKER) =>
            {
                failure.output.clone()
            }
            _ => return Err(err),
        };

        let mut retry_flags: Vec<&str> = flags.to_vec();
        if !retry_flags.contains(&"--quiet-build") {
            retry_flags.push("--quiet-build");
        }

        let written = match self.strategy {
            AutoUnmask::Interactive => {
                let mut write = vec!["emerge", "--autounmask-write"];
                write.extend(flags);
                write.push(target);

                if let Err(err) = exec.exec(&write) {
                    tracing::error!("error setting autounmask: {err}");
                }

                tracing::info!("resolving unmask conflict with dispatch-conf");
                exec.exec_interactive(&["dispatch-conf"])?;

                Vec::new()
            }

            AutoUnmask::Automerge => {
                let name = normalize_package_name(target);
                tracing::info!("automerging unmask conflict for {name}");

                let mut written = Vec::new();
                for (header, kind) in CHANGE_BLOCKS {
                    let lines = change_lines(&output, header);
                    if lines.is_empty() {
                        continue;
                    }

                    if let Some(path) = append_package_lines(&self.portage_dir, kind, name, &lines)? {
                        written.push(path);
                    }
                }

                written
            }
        };

        let mut reissue = vec!["emerge"];
        reissue.extend(retry_flags);
        reissue.push(target);
        exec.exec_with(&reissue, &opts)?;

        Ok(written)
    }
}

/// Collects atom lines from every block opened by `header`.
/// A block runs from its header to the next blank line.
pub fn change_lines(output: &str, header: &str) -> Vec<String> {
    let lines: Vec<&str> = output.lines().collect();
    let mut collected = Vec::new();

    for (i, line) in lines.iter().enumerate() {
        if !line.contains(header) {
            continue;
        }

        for block_line in &lines[i..] {
            if block_line.trim().is_empty() {
                break;
            }
            if block_line.starts_with(CHANGE_LINE_MARKERS) {
                collected.push(block_line.to_string());
            }
        }
    }

    collected
}
