use std::path::Path;

use crate::errors::SupError;
use crate::utils::fs;
use crate::utils::shell::Executor;

const PROC_MOUNTS: &str = "/proc/mounts";

/// Whether `path` is a mount target in a /proc/mounts style table
pub fn is_mounted_in(mounts: &str, path: &str) -> bool {
    let path = match path.trim_end_matches('/') {
        "" => "/",
        trimmed => trimmed,
    };

    mounts
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .any(|target| target == path)
}

pub fn is_mounted(path: &Path) -> Result<bool, SupError> {
    let mounts = fs::read(Path::new(PROC_MOUNTS))?;
    Ok(is_mounted_in(&mounts, &path.to_string_lossy()))
}

/// Mounts `device` on `target` unless something is already mounted there.
/// Returns whether a mount happened.
pub fn mount_device(exec: &dyn Executor, device: &str, target: &Path) -> Result<bool, SupError> {
    if is_mounted(target)? {
        tracing::debug!("{} already mounted", target.display());
        return Ok(false);
    }

    fs::create_dir_all(target)?;
    exec.exec(&["mount", device, &target.to_string_lossy()])?;

    Ok(true)
}

/// Mounts proc, sys and dev under `root` for use as a chroot.
/// Each mount is skipped if already present.
///
/// Executes:
/// ```shell
/// mount -t proc proc ${{ root }}/proc
/// mount --rbind /sys ${{ root }}/sys
/// mount --make-rslave ${{ root }}/sys
/// mount --rbind /dev ${{ root }}/dev
/// mount --make-rslave ${{ root }}/dev
/// ```
pub fn mount_core_filesystems(exec: &dyn Executor, root: &Path) -> Result<(), SupError> {
    let proc = root.join("proc");
    if !is_mounted(&proc)? {
        fs::create_dir_all(&proc)?;
        exec.exec(&["mount", "-t", "proc", "proc", &proc.to_string_lossy()])?;
    }

    for dir in ["sys", "dev"] {
        let target = root.join(dir);
        if is_mounted(&target)? {
            continue;
        }

        fs::create_dir_all(&target)?;

        let target = target.to_string_lossy();
        let host = format!("/{dir}");
        exec.exec(&["mount", "--rbind", &host, &target])?;
        exec.exec(&["mount", "--make-rslave", &target])?;
    }

    Ok(())
}

/// Binds the host /run into `root` as a slave mount.
/// os-prober and lvm hang inside a chroot without it.
pub fn bind_run(exec: &dyn Executor, root: &Path) -> Result<(), SupError> {
    let target = root.join("run");
    if is_mounted(&target)? {
        return Ok(());
    }

    fs::create_dir_all(&target)?;

    let target = target.to_string_lossy();
    exec.exec(&["mount", "--bind", "/run", &target])?;
    exec.exec(&["mount", "--make-slave", &target])?;

    Ok(())
}
