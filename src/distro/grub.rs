//! GRUB setup shared by both distros. Runs inside the chroot.

use std::path::Path;

use super::common::{is_block_device, merge_var, set_var_quoted};
use super::Installer;
use crate::constants::defaults;
use crate::errors::SupError;
use crate::manifest::{Bootloader, FirmwareInterface, Init};

pub const DEFAULT_GRUB: &str = "/etc/default/grub";
pub const GRUB_CFG: &str = "/boot/grub/grub.cfg";
const CMDLINE: &str = "GRUB_CMDLINE_LINUX";
const PM_CONFIG: &str = "/etc/pm/config.d/gentoo";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavor {
    Arch,
    Gentoo,
}

pub fn firmware_interface(bootloader: &Bootloader) -> Result<FirmwareInterface, SupError> {
    bootloader
        .fwiface
        .ok_or_else(|| SupError::BadManifest("no firmware interface specified".to_string()))
}

pub fn install_cmd(fwiface: FirmwareInterface, flavor: Flavor, boot_disk: &str) -> Vec<String> {
    let argv: Vec<&str> = match (fwiface, flavor) {
        (FirmwareInterface::Uefi, _) => {
            vec!["grub-install", "--target=x86_64-efi", "--efi-directory=/boot"]
        }
        (FirmwareInterface::Bios, Flavor::Arch) => vec!["grub-install", "--target=i386-pc", boot_disk],
        (FirmwareInterface::Bios, Flavor::Gentoo) => vec!["grub-install", boot_disk],
    };

    argv.into_iter().map(String::from).collect()
}

/// Tokens for `GRUB_CMDLINE_LINUX`, apart from hibernation
pub fn kernel_params(inst: &Installer, flavor: Flavor) -> Result<Vec<String>, SupError> {
    let mut params = Vec::new();

    if inst.topology.has_volume_groups() {
        params.push("dolvm".to_string());
    }

    if flavor == Flavor::Arch || inst.init() == Init::Systemd {
        params.push("init=/usr/lib/systemd/systemd".to_string());
    }

    if inst.topology.root_encrypted() {
        let records = inst.block_attrs()?;
        if let Some(root) = inst.topology.resolve_root_encryption(&records)? {
            params.push(match flavor {
                Flavor::Gentoo => format!("crypt_root=UUID={}", root.uuid),
                Flavor::Arch => format!(
                    "cryptdevice=UUID={}:{}",
                    root.uuid,
                    root.mapping.as_deref().unwrap_or(defaults::CRYPT_MAPPING)
                ),
            });
        }
    }

    Ok(params)
}

/// Installs GRUB to the boot disk and fills /etc/default/grub.
/// Does not run grub-mkconfig.
pub fn install(inst: &mut Installer, bootloader: &Bootloader, flavor: Flavor) -> Result<(), SupError> {
    let fwiface = firmware_interface(bootloader)?;
    let (boot_disk, crypt_boot) = {
        let boot = inst.topology.boot_partition()?;
        (boot.disk.name.clone(), inst.topology.boot_disk_has_crypt()?)
    };

    if crypt_boot {
        set_var_quoted(inst, DEFAULT_GRUB, "GRUB_ENABLE_CRYPTODISK", "y", false)?;
    }

    tracing::info!("installing grub ({fwiface:?}) for {boot_disk}");
    let argv = install_cmd(fwiface, flavor, &boot_disk);
    inst.exec
        .exec(&argv.iter().map(String::as_str).collect::<Vec<_>>())?;

    let params = kernel_params(inst, flavor)?;
    let params: Vec<&str> = params.iter().map(String::as_str).collect();
    if !params.is_empty() {
        merge_var(inst, DEFAULT_GRUB, CMDLINE, &params)?;
    }

    for (key, value) in &bootloader.conf {
        merge_var(inst, DEFAULT_GRUB, key, &[value])?;
    }

    if let Some(hibernation) = &bootloader.hibernation {
        configure_resume(inst, &hibernation.swap_path, flavor)?;
    }

    Ok(())
}

fn configure_resume(inst: &mut Installer, swap_path: &str, flavor: Flavor) -> Result<(), SupError> {
    if is_block_device(Path::new(swap_path)) {
        merge_var(inst, DEFAULT_GRUB, CMDLINE, &[&format!("resume={swap_path}")])?;
    } else {
        tracing::warn!("hibernation to swap file {swap_path} is not supported, skipping resume=");
    }

    if flavor == Flavor::Gentoo && inst.target(PM_CONFIG).is_file() {
        set_var_quoted(inst, PM_CONFIG, "SLEEP_MODULE", "kernel", true)?;
    }

    Ok(())
}

pub fn mkconfig(inst: &Installer) -> Result<(), SupError> {
    inst.exec
        .exec(&["grub-mkconfig", "-o", GRUB_CFG])
        .map(|_| ())
}
