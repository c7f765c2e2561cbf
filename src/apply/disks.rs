use std::collections::HashSet;

use crate::constants::defaults;
use crate::distro::Installer;
use crate::entity::blockdev::{Disk, Partition};
use crate::errors::SupError;
use crate::linux::{luks, lvm, mkfs, parted};
use crate::utils::retry::Policy;
use crate::utils::shell::{as_strs, Executor};

/// Partitions, encrypts, and formats every disk in the manifest, then builds
/// its volume groups and mounts the new root. Devices that appear late are
/// retried under `policy`.
pub fn prepare_disks(inst: &Installer, policy: Policy) -> Result<(), SupError> {
    tracing::info!("preparing disks");

    let manifest = inst.manifest;
    let mut modules_loaded = false;

    for disk in &manifest.disks {
        if let Some(label) = &disk.label {
            parted::make_label(inst.exec, &disk.name, label)?;
        }

        for (i, part) in disk.partitions.iter().enumerate() {
            let index = i + 1;
            parted::make_partition(inst.exec, disk, index, part)?;

            if part.crypt.is_some() && !modules_loaded {
                luks::load_modules(inst.exec)?;
                modules_loaded = true;
            }

            apply_partition(inst.exec, disk, index, part, policy)?;
        }
    }

    let mut physvols = HashSet::new();
    for vg in &manifest.volume_groups {
        if physvols.insert(vg.physvol.as_str()) {
            lvm::create_pv(inst.exec, &vg.physvol, policy)?;
        }

        lvm::create_vg(inst.exec, vg)?;
        for lv in &vg.volumes {
            lvm::create_lv(inst.exec, vg, lv)?;

            if let Some(fs) = &lv.fs {
                make_fs(inst.exec, fs, &vg.volume_device(lv), lv.label.as_deref())?;
            }
        }
    }

    inst.mount_rootfs()
}

/// Sets up the crypt container of one new partition, then its filesystem.
/// An encrypted partition is formatted through its mapping.
fn apply_partition(
    exec: &dyn Executor,
    disk: &Disk,
    index: usize,
    part: &Partition,
    policy: Policy,
) -> Result<(), SupError> {
    let mut device = disk.partition_device(index);

    if let Some(crypt) = &part.crypt {
        luks::format(exec, &device, policy)?;

        let mapping = crypt.mapping.as_deref().unwrap_or(defaults::CRYPT_MAPPING);
        luks::open(exec, &device, mapping)?;
        device = format!("/dev/mapper/{mapping}");
    }

    match &part.fs {
        Some(fs) => make_fs(exec, fs, &device, part.label.as_deref()),
        None => Ok(()),
    }
}

fn make_fs(exec: &dyn Executor, fs: &str, device: &str, label: Option<&str>) -> Result<(), SupError> {
    let argv = mkfs::format_cmd(fs, device, label)?;
    exec.exec(&as_strs(&argv)).map(|_| ())
}
