use crate::entity::blockdev::{Disk, Partition};
use crate::errors::SupError;
use crate::utils::retry;
use crate::utils::shell::Executor;

/// Executes:
/// ```shell
/// parted -s ${{ disk }} mklabel ${{ label }}
/// ```
/// parted exits 1 when the disk already carries that label, which is fine.
pub fn make_label(exec: &dyn Executor, disk: &str, label: &str) -> Result<(), SupError> {
    match exec.exec(&["parted", "-s", disk, "mklabel", label]) {
        Err(err) if retry::is_permission(&err) => {
            tracing::warn!("parted mklabel {label} on {disk}: {err}, continuing");
            Ok(())
        }
        result => result.map(|_| ()),
    }
}

/// Creates the partition at 1-based `index` and applies its name and flags.
///
/// Executes:
/// ```shell
/// parted --align optimal -s ${{ disk }} mkpart ${{ type }} ${{ start }} ${{ end }}
/// parted ${{ disk }} name ${{ index }} ${{ name }}
/// parted ${{ disk }} set ${{ index }} ${{ flag }} on
/// ```
pub fn make_partition(
    exec: &dyn Executor,
    disk: &Disk,
    index: usize,
    part: &Partition,
) -> Result<(), SupError> {
    let idx = index.to_string();

    exec.exec(&[
        "parted",
        "--align",
        "optimal",
        "-s",
        &disk.name,
        "mkpart",
        &part.part_type,
        &part.start,
        &part.end,
    ])?;

    if let Some(name) = &part.name {
        exec.exec(&["parted", &disk.name, "name", &idx, name])?;
    }

    for flag in &part.flags {
        exec.exec(&["parted", &disk.name, "set", &idx, flag, "on"])?;
    }

    Ok(())
}
