//! Steps both distros do the same way. Callers enter the chroot first.

use std::path::Path;

use super::{Distro, Installer};
use crate::config::ini::Section;
use crate::config::uncomment;
use crate::constants::defaults;
use crate::errors::SupError;
use crate::manifest::{Init, Interface};
use crate::topology::fstab;
use crate::utils::fs;

/// Writes `text` to the target path `path`, creating parent directories
pub fn write_file(inst: &mut Installer, path: &str, text: &str) -> Result<(), SupError> {
    let path = inst.target(path);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let changed = fs::write_if_changed(&path, text)?;
    inst.configs.record(&path, changed);

    Ok(())
}

/// Appends each of `lines` the file does not already have
pub fn merge_lines(inst: &mut Installer, path: &str, lines: &[String]) -> Result<(), SupError> {
    let path = inst.target(path);
    let mut text = fs::read_or_empty(&path)?;
    let before = text.len();

    for line in lines.iter().map(|l| l.trim_end()) {
        if text.lines().any(|l| l == line) {
            continue;
        }

        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(line);
        text.push('\n');
    }

    if text.len() != before {
        let changed = fs::write_if_changed(&path, &text)?;
        inst.configs.record(&path, changed);
    }

    Ok(())
}

/// key-value write on a target path, creating its directory
pub fn set_var(inst: &mut Installer, path: &str, key: &str, value: &str) -> Result<(), SupError> {
    set_var_quoted(inst, path, key, value, true)
}

pub fn set_var_quoted(
    inst: &mut Installer,
    path: &str,
    key: &str,
    value: &str,
    quoted: bool,
) -> Result<(), SupError> {
    let path = inst.target(path);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    inst.configs.set_value(&path, key, value, quoted)
}

pub fn merge_var(inst: &mut Installer, path: &str, key: &str, tokens: &[&str]) -> Result<(), SupError> {
    let path = inst.target(path);
    inst.configs.merge_value(&path, key, tokens)
}

/// Regenerates /etc/fstab from the topology and live blkid output
pub fn write_fstab(inst: &mut Installer) -> Result<(), SupError> {
    tracing::info!("writing fstab");

    let records = inst.block_attrs()?;
    let entries = inst.topology.fstab_entries(&records);

    let path = inst.target(defaults::FSTAB);
    let changed = fstab::write_fstab(&path, &entries)?;
    inst.configs.record(&path, changed);

    Ok(())
}

/// Installs the manifest's extra packages one at a time
pub fn install_misc_packages(distro: &mut dyn Distro, inst: &mut Installer) -> Result<(), SupError> {
    let flags = distro.default_flags();
    let manifest = inst.manifest;
    for package in &manifest.packages {
        distro.install_packages(inst, &[package], flags)?;
    }

    Ok(())
}

/// Removes the manifest's unwanted packages. Failures are logged and skipped.
pub fn remove_misc_packages(distro: &mut dyn Distro, inst: &mut Installer) -> Result<(), SupError> {
    let manifest = inst.manifest;
    for package in &manifest.remove_packages {
        if let Err(err) = distro.remove_packages(inst, &[package]) {
            tracing::error!("error removing {package}: {err}");
        }
    }

    Ok(())
}

pub fn enable_service(inst: &Installer, service: &str) -> Result<(), SupError> {
    match inst.init() {
        Init::Openrc => inst.exec.exec(&["rc-update", "add", service, "default"]),
        Init::Systemd => inst.exec.exec(&["systemctl", "enable", service]),
    }
    .map(|_| ())
}

pub fn install_services(inst: &Installer) -> Result<(), SupError> {
    for service in &inst.manifest.services {
        enable_service(inst, service)?;
    }

    Ok(())
}

/// Applies each `misc_config` value through the file's own dialect
pub fn misc_config(inst: &mut Installer) -> Result<(), SupError> {
    let manifest = inst.manifest;
    for cfg in &manifest.misc_config {
        let path = inst.target(&cfg.path);
        for section in &cfg.sections {
            for (key, value) in &section.values {
                inst.configs
                    .set_any(&path, section.name.as_deref(), key, value)?;
            }
        }
    }

    Ok(())
}

/// Uncomments `locales` in /etc/locale.gen, appending missing ones if asked
pub fn enable_locales(inst: &mut Installer, locales: &[&str], append_missing: bool) -> Result<(), SupError> {
    let path = inst.target(defaults::LOCALE_GEN);
    let text = fs::read_or_empty(&path)?;

    let changed = fs::write_if_changed(&path, &uncomment::enable_locales(&text, locales, append_missing))?;
    inst.configs.record(&path, changed);

    Ok(())
}

pub fn set_keymap(inst: &mut Installer, keymap: &str) -> Result<(), SupError> {
    tracing::info!("setting keymap {keymap}");
    match inst.init() {
        Init::Openrc => set_var(inst, "/etc/conf.d/keymaps", "keymap", keymap),
        Init::Systemd => set_var(inst, "/etc/vconsole.conf", "KEYMAP", keymap),
    }
}

pub fn set_clock(inst: &mut Installer, clock: &str) -> Result<(), SupError> {
    tracing::info!("setting system clock to {clock}");
    if inst.init() == Init::Openrc {
        return set_var(inst, "/etc/conf.d/hwclock", "clock", clock);
    }

    let scale = match clock {
        "UTC" | "utc" => "--utc",
        "local" => "--localtime",
        other => {
            tracing::warn!("unknown hwclock scale {other}, leaving clock alone");
            return Ok(());
        }
    };

    inst.exec.exec(&["hwclock", "--systohc", scale]).map(|_| ())
}

/// Checks `timezone` against zoneinfo and writes /etc/timezone
pub fn write_timezone(inst: &mut Installer, timezone: &str) -> Result<(), SupError> {
    let zoneinfo = inst.target(&format!("/usr/share/zoneinfo/{timezone}"));
    if !fs::file_exists(&zoneinfo) {
        return Err(SupError::BadManifest(format!("invalid timezone {timezone}")));
    }

    write_file(inst, "/etc/timezone", &format!("{timezone}\n"))
}

/// Appends manifest sudo lines to /etc/sudoers, installing sudo first if
/// the file is missing
pub fn merge_sudoers(
    distro: &mut dyn Distro,
    inst: &mut Installer,
    sudo_package: &str,
) -> Result<(), SupError> {
    let manifest = inst.manifest;
    let lines = &manifest.sysconfig.sudo;
    if lines.is_empty() {
        return Ok(());
    }

    if !fs::file_exists(inst.target("/etc/sudoers")) {
        let flags = distro.default_flags();
        distro.install_packages(inst, &[sudo_package], flags)?;
    }

    merge_lines(inst, "/etc/sudoers", lines)
}

pub fn set_hostname(inst: &mut Installer, hostname: &str) -> Result<(), SupError> {
    match inst.init() {
        Init::Openrc => set_var(inst, "/etc/conf.d/hostname", "hostname", hostname),
        Init::Systemd => write_file(inst, "/etc/hostname", &format!("{hostname}\n")),
    }
}

fn network_file(name: &str) -> String {
    format!("/etc/systemd/network/{name}.network")
}

/// Writes one `.network` file per interface and enables networkd
pub fn config_networkd(inst: &mut Installer, interfaces: &[Interface]) -> Result<(), SupError> {
    for iface in interfaces {
        let path = inst.target(&network_file(&iface.name));
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut sections = vec![Section::new("Match", [("Name", iface.name.as_str())])];
        sections.extend(
            iface
                .network
                .iter()
                .map(|(name, values)| Section::new(name, values.clone())),
        );

        inst.configs.set_sections(&path, &sections, false)?;
    }

    inst.exec
        .exec(&["systemctl", "enable", "systemd-networkd.service"])
        .map(|_| ())
}

/// Whether `path` is a block device on the running system
pub fn is_block_device(path: &Path) -> bool {
    use std::os::unix::fs::FileTypeExt;

    std::fs::metadata(path).is_ok_and(|m| m.file_type().is_block_device())
}
