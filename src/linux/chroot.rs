use std::fs::File;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};
use std::path::{Path, PathBuf};

use crate::constants::defaults;
use crate::errors::SupError;
use crate::utils::fs;

/// The privileged syscalls behind a root switch
pub trait RootOps {
    /// Opens a handle to the current root directory
    fn open_root(&self) -> Result<OwnedFd, SupError>;

    /// chdir into `target`, then chroot into it
    fn switch_root(&self, target: &Path) -> Result<(), SupError>;

    /// fchdir to `root`, then chroot(".")
    fn restore_root(&self, root: BorrowedFd<'_>) -> Result<(), SupError>;
}

pub struct SysRoot;

impl RootOps for SysRoot {
    fn open_root(&self) -> Result<OwnedFd, SupError> {
        File::open("/")
            .map(OwnedFd::from)
            .map_err(|err| SupError::FileError(err, "open real root /".to_string()))
    }

    fn switch_root(&self, target: &Path) -> Result<(), SupError> {
        nix::unistd::chdir(target)
            .map_err(|errno| SupError::Chroot(format!("chdir {}: {errno}", target.display())))?;

        nix::unistd::chroot(target)
            .map_err(|errno| SupError::Chroot(format!("chroot {}: {errno}", target.display())))
    }

    fn restore_root(&self, root: BorrowedFd<'_>) -> Result<(), SupError> {
        nix::unistd::fchdir(root.as_raw_fd())
            .map_err(|errno| SupError::Chroot(format!("fchdir to real root: {errno}")))?;

        nix::unistd::chroot(".")
            .map_err(|errno| SupError::Chroot(format!("chroot back to real root: {errno}")))
    }
}

/// Tracks whether this process is inside the target root.
/// One value lives for the whole installer run and is passed to whoever needs it.
pub struct ChrootContext {
    inside: bool,
    /// Opened on the first enter, kept for every later exit
    real_root: Option<OwnedFd>,
    host_resolv: PathBuf,
    ops: Box<dyn RootOps>,
}

impl Default for ChrootContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ChrootContext {
    pub fn new() -> Self {
        Self::with_ops(Box::new(SysRoot), PathBuf::from(defaults::RESOLV_CONF))
    }

    pub fn with_ops(ops: Box<dyn RootOps>, host_resolv: PathBuf) -> Self {
        Self {
            inside: false,
            real_root: None,
            host_resolv,
            ops,
        }
    }

    pub fn is_inside(&self) -> bool {
        self.inside
    }

    /// Switches the process root to `target`. No-op when already inside.
    pub fn enter(&mut self, target: &Path) -> Result<(), SupError> {
        if self.inside {
            return Ok(());
        }

        if self.real_root.is_none() {
            self.real_root = Some(self.ops.open_root()?);
        }

        copy_resolv_conf(&self.host_resolv, target)?;

        tracing::info!("entering chroot {}", target.display());
        self.ops.switch_root(target)?;
        self.inside = true;

        Ok(())
    }

    /// Returns to the root saved by the first [`enter`](Self::enter)
    pub fn exit(&mut self) -> Result<(), SupError> {
        let Some(root) = &self.real_root else {
            return Err(SupError::Chroot(
                "not currently in a chroot, or no saved root to return to".to_string(),
            ));
        };

        tracing::info!("exiting chroot");
        self.ops.restore_root(root.as_fd())?;
        self.inside = false;

        Ok(())
    }
}

/// Copies the host resolver config into `target` so name resolution works
/// inside the chroot. An identical destination is left alone.
fn copy_resolv_conf(host: &Path, target: &Path) -> Result<(), SupError> {
    if !fs::file_exists(host) {
        tracing::warn!("no {} on host, skipping copy", host.display());
        return Ok(());
    }

    let dest = target.join("etc").join("resolv.conf");
    if same_file(host, &dest) {
        return Ok(());
    }

    let text = fs::read(host)?;
    if let Ok(meta) = std::fs::symlink_metadata(&dest) {
        if meta.file_type().is_symlink() {
            std::fs::remove_file(&dest)
                .map_err(|err| SupError::FileError(err, format!("remove symlink {}", dest.display())))?;
        }
    }

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }

    fs::write_if_changed(&dest, &text)?;

    Ok(())
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (std::fs::canonicalize(a), std::fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

#[cfg(test)]
pub mod test_utils {
    use super::*;

    /// Keeps the root where it is
    pub struct NoopRoot;

    impl RootOps for NoopRoot {
        fn open_root(&self) -> Result<OwnedFd, SupError> {
            SysRoot.open_root()
        }

        fn switch_root(&self, _target: &Path) -> Result<(), SupError> {
            Ok(())
        }

        fn restore_root(&self, _root: BorrowedFd<'_>) -> Result<(), SupError> {
            Ok(())
        }
    }
}
