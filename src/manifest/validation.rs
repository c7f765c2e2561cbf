use std::collections::HashSet;

use crate::constants::REQUIRED_COMMANDS;
use crate::entity::parse_human_bytes;
use crate::errors::SupError;
use crate::linux::mkfs;
use crate::manifest::{Distro, Init, Manifest, NetworkManager};
use crate::topology::Attr;
use crate::utils::shell::in_path;

/// Checks a manifest before any step touches the system
pub fn validate(manifest: &Manifest) -> Result<(), SupError> {
    validate_blk(manifest)?;
    validate_mounts(manifest)?;

    if let Some(bootloader) = &manifest.bootloader {
        if !bootloader.name.eq_ignore_ascii_case("grub") {
            return Err(SupError::BadManifest(format!(
                "unsupported boot loader {}, only grub is supported",
                bootloader.name
            )));
        }

        if bootloader.fwiface.is_none() {
            return Err(SupError::BadManifest(
                "no firmware interface specified for boot loader".to_string(),
            ));
        }

        if let Some(hibernation) = &bootloader.hibernation {
            if !hibernation.swap_path.starts_with('/') {
                return Err(SupError::BadManifest(format!(
                    "hibernation swap_path {} is not absolute",
                    hibernation.swap_path
                )));
            }
        }
    }

    if let Some(network) = &manifest.network {
        if network.manager == Some(NetworkManager::Netifrc) && manifest.init() != Init::Openrc {
            return Err(SupError::BadManifest(
                "netifrc network manager requires openrc init".to_string(),
            ));
        }
    }

    if manifest.distro == Distro::Arch && manifest.init() == Init::Openrc {
        return Err(SupError::BadManifest(
            "arch installs only support systemd init".to_string(),
        ));
    }

    let locales = &manifest.sysconfig.locales;
    if manifest.distro == Distro::Gentoo
        && !locales.is_empty()
        && !locales.iter().any(|l| is_utf8_locale(l))
    {
        return Err(SupError::BadManifest(
            "need at least one utf-8 locale".to_string(),
        ));
    }

    for misc in &manifest.misc_config {
        if !misc.path.starts_with('/') {
            return Err(SupError::BadManifest(format!(
                "misc_config path {} is not absolute",
                misc.path
            )));
        }
    }

    Ok(())
}

pub fn is_utf8_locale(locale: &str) -> bool {
    locale.replace('-', "").to_lowercase().contains("utf8")
}

fn validate_blk(manifest: &Manifest) -> Result<(), SupError> {
    let topology = manifest.topology();

    let boots = topology.find_partitions(Attr::Flags, Some("boot"));
    if boots.len() > 1 {
        return Err(SupError::BadManifest(format!(
            "ambiguous boot partition: {} partitions flagged boot",
            boots.len()
        )));
    }

    for disk in &manifest.disks {
        if !disk.name.starts_with("/dev/") {
            return Err(SupError::BadManifest(format!(
                "disk {} is not a /dev path",
                disk.name
            )));
        }
    }

    for part in topology.partitions() {
        if let Some(fs) = &part.partition.fs {
            mkfs::format_cmd(fs, &part.device, part.partition.label.as_deref())?;
        }
    }

    for vg in &manifest.volume_groups {
        if !vg.physvol.starts_with('/') {
            return Err(SupError::BadManifest(format!(
                "volume group {}: physvol {} is not an absolute path",
                vg.name, vg.physvol
            )));
        }

        for lv in &vg.volumes {
            if lv.is_relative_size() {
                let (number, _) = lv.size.split_once('%').unwrap_or((lv.size.as_str(), ""));
                if number.parse::<u32>().is_err() {
                    return Err(SupError::BadManifest(format!(
                        "bad relative size {} for volume {}",
                        lv.size, lv.name
                    )));
                }
            } else {
                parse_human_bytes(&lv.size)?;
            }

            if let Some(fs) = &lv.fs {
                mkfs::format_cmd(fs, &vg.volume_device(lv), lv.label.as_deref())?;
            }
        }
    }

    Ok(())
}

fn validate_mounts(manifest: &Manifest) -> Result<(), SupError> {
    let mut seen = HashSet::new();

    for (mount, device) in manifest.topology().mounts() {
        if !mount.starts_with('/') {
            return Err(SupError::BadManifest(format!(
                "mount point {mount} for {device} is not absolute"
            )));
        }

        if !seen.insert(mount.trim_end_matches('/').to_string()) {
            return Err(SupError::BadManifest(format!(
                "duplicate mount point {mount}"
            )));
        }
    }

    // Relative mount targets never reach mounts()
    let relative = manifest
        .disks
        .iter()
        .flat_map(|d| d.partitions.iter().filter_map(|p| p.mount.as_deref()))
        .chain(
            manifest
                .volume_groups
                .iter()
                .flat_map(|vg| vg.volumes.iter().filter_map(|v| v.mount.as_deref())),
        )
        .find(|m| !m.starts_with('/'));

    if let Some(mount) = relative {
        return Err(SupError::BadManifest(format!(
            "mount point {mount} is not absolute"
        )));
    }

    Ok(())
}

/// Host programs sup-rs shells out to that are not in $PATH
pub fn missing_commands() -> Vec<&'static str> {
    REQUIRED_COMMANDS
        .into_iter()
        .filter(|cmd| !in_path(cmd))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::tests::{ARCH_YAML, GENTOO_YAML};

    fn manifest(yaml: &str) -> Manifest {
        Manifest::from_yaml(yaml).unwrap()
    }

    #[test]
    fn test_validate_examples() {
        validate(&manifest(GENTOO_YAML)).unwrap();
        validate(&manifest(ARCH_YAML)).unwrap();
    }

    #[test]
    fn test_validate_bad() {
        let tests = [
            (
                "two boot flags",
                "
distro: arch
disks:
  - name: /dev/sda
    partitions:
      - { start: 1MiB, end: 1GiB, flags: boot }
      - { start: 1GiB, end: 2GiB, flags: [boot, esp] }
",
            ),
            (
                "bad lv size",
                "
distro: arch
volume_groups:
  - name: vg0
    physvol: /dev/sda2
    volumes:
      - { name: root, size: 12 parsecs }
",
            ),
            (
                "relative physvol",
                "
distro: arch
volume_groups:
  - name: vg0
    physvol: sda2
    volumes: []
",
            ),
            (
                "duplicate mount",
                "
distro: arch
disks:
  - name: /dev/sda
    partitions:
      - { start: 1MiB, end: 1GiB, mount: /boot }
      - { start: 1GiB, end: 2GiB, mount: /boot/ }
",
            ),
            (
                "relative mount",
                "
distro: arch
disks:
  - name: /dev/sda
    partitions:
      - { start: 1MiB, end: 1GiB, mount: boot }
",
            ),
            (
                "bad fat size",
                "
distro: arch
disks:
  - name: /dev/sda
    partitions:
      - { start: 1MiB, end: 1GiB, fs: fatty }
",
            ),
            (
                "non-grub loader",
                "
distro: arch
bootloader: { name: systemd-boot, fwiface: uefi }
",
            ),
            (
                "no fwiface",
                "
distro: gentoo
bootloader: { name: grub }
",
            ),
            (
                "netifrc on systemd",
                "
distro: gentoo
network: { manager: netifrc }
",
            ),
            (
                "no utf-8 locale",
                "
distro: gentoo
sysconfig: { init: openrc, locales: [en_US] }
",
            ),
        ];

        for (case, yaml) in tests {
            let result = validate(&manifest(yaml));
            assert!(
                matches!(result, Err(SupError::BadManifest(_))),
                "case {case}: got {result:?}"
            );
        }
    }

    #[test]
    fn test_is_utf8_locale() {
        assert!(is_utf8_locale("en_US.UTF-8"));
        assert!(is_utf8_locale("de_DE.utf8"));
        assert!(!is_utf8_locale("en_US"));
    }
}
