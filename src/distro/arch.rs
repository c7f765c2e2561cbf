use std::path::Path;

use super::common;
use super::grub::{self, Flavor};
use super::{Distro, Installer};
use crate::errors::SupError;
use crate::linux::mount;
use crate::manifest::{FirmwareInterface, NetworkManager, PacmanMirrors};
use crate::pkg::pacman::Pacman;
use crate::pkg::PackageManager;
use crate::utils::fs;
use crate::utils::shell::{as_strs, in_path};

const MIRRORLIST: &str = "/etc/pacman.d/mirrorlist";
const MKINITCPIO_CONF: &str = "/etc/mkinitcpio.conf";
const RUN_LVM: &str = "/run/lvm";
const CHROOT_LVM: &str = "/tmplvm";

pub struct Arch {
    pacman: Pacman,
}

impl Arch {
    pub fn new() -> Self {
        Self { pacman: Pacman }
    }
}

impl Default for Arch {
    fn default() -> Self {
        Self::new()
    }
}

/// URL of a `Server = <url>` line, commented or not
fn server_url(line: &str) -> Option<&str> {
    line.trim_start_matches('#')
        .trim_start()
        .strip_prefix("Server")?
        .trim_start()
        .strip_prefix('=')?
        .split_whitespace()
        .next()
}

/// Country of a `## Country` line
fn country_name(line: &str) -> Option<&str> {
    let rest = line.strip_prefix("## ")?;
    let end = rest
        .find(|c: char| !(c.is_ascii_alphabetic() || c == ' '))
        .unwrap_or(rest.len());

    match rest[..end].trim() {
        "" => None,
        name => Some(name),
    }
}

fn url_host(url: &str) -> &str {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    rest.split('/').next().unwrap_or(rest)
}

/// Keeps the mirrorlist header plus the `## Country` / `Server =` pairs whose
/// country or host is whitelisted. Kept servers are uncommented.
pub fn filter_mirrorlist(text: &str, mirrors: &PacmanMirrors) -> Result<String, SupError> {
    let lines: Vec<&str> = text.lines().collect();
    if lines.len() < 2 {
        return Err(SupError::BadConfig("invalid pacman mirrorlist".to_string()));
    }

    let countries: Vec<String> = mirrors
        .countries
        .iter()
        .map(|c| match c.to_lowercase().as_str() {
            "usa" => "united states".to_string(),
            other => other.to_string(),
        })
        .collect();

    let servers: Vec<String> = mirrors.servers.iter().map(|s| s.to_lowercase()).collect();

    let mut out: Vec<String> = Vec::new();
    let mut header_done = false;

    for (i, line) in lines.iter().enumerate() {
        let Some(url) = server_url(line) else {
            continue;
        };

        let country_line = i
            .checked_sub(1)
            .map(|j| lines[j])
            .ok_or_else(|| SupError::BadConfig("mirrorlist starts with a server".to_string()))?;

        if !header_done {
            out.extend(lines[..i - 1].iter().map(|l| l.to_string()));
            header_done = true;
        }

        let country = country_name(country_line).ok_or_else(|| {
            SupError::BadConfig(format!("mirrorlist: no country line above {line}"))
        })?;

        let host = url_host(url).to_lowercase();
        let keep = countries.contains(&country.to_lowercase())
            || servers.iter().any(|s| host.contains(s.as_str()));

        if keep {
            out.push(country_line.to_string());
            out.push(line.trim_start_matches('#').to_string());
        }
    }

    let mut text = out.join("\n");
    text.push('\n');
    Ok(text)
}

/// Hooks mkinitcpio needs for the target's root
#[derive(Debug, Default, Clone, Copy)]
pub struct HookNeeds {
    pub lvm: bool,
    pub encrypt: bool,
    pub resume: bool,
}

/// Edits a `HOOKS=(...)` value. `lvm2` and `encrypt` go right after `block`
/// (as `sd-*` when the array uses the systemd hook), `resume` before `fsck`.
pub fn edit_hooks(hooks: &str, needs: HookNeeds) -> Result<String, SupError> {
    let mut hooks: Vec<String> = hooks
        .trim()
        .trim_start_matches('(')
        .trim_end_matches(')')
        .split_whitespace()
        .map(String::from)
        .collect();

    let systemd = hooks.iter().any(|h| h == "systemd");
    let name = |hook: &str| {
        if systemd {
            format!("sd-{hook}")
        } else {
            hook.to_string()
        }
    };

    for (wanted, hook) in [(needs.lvm, "lvm2"), (needs.encrypt, "encrypt")] {
        let hook = name(hook);
        if !wanted || hooks.contains(&hook) {
            continue;
        }

        let block = hooks
            .iter()
            .position(|h| h == "block")
            .ok_or_else(|| SupError::BadConfig("mkinitcpio HOOKS has no block hook".to_string()))?;

        hooks.insert(block + 1, hook);
    }

    if needs.resume && !hooks.iter().any(|h| h == "resume") {
        match hooks.iter().position(|h| h == "fsck") {
            Some(fsck) => hooks.insert(fsck, "resume".to_string()),
            None => hooks.push("resume".to_string()),
        }
    }

    Ok(format!("({})", hooks.join(" ")))
}

impl Arch {
    /// Filters the pacman mirrorlist at `path`, keeping a one-time `.bak`
    fn config_mirrors(&self, inst: &mut Installer, path: &Path) -> Result<(), SupError> {
        let manifest = inst.manifest;
        let Some(mirrors) = &manifest.pacman.mirrors else {
            tracing::info!("no mirrors supplied, using defaults");
            return Ok(());
        };

        tracing::info!("configuring mirrors in {}", path.display());

        let text = fs::read(path)?;
        let backup = path.with_extension("bak");
        if !fs::file_exists(&backup) {
            std::fs::write(&backup, &text)
                .map_err(|err| SupError::FileError(err, format!("write {}", backup.display())))?;
        }

        let changed = fs::write_if_changed(path, &filter_mirrorlist(&text, mirrors)?)?;
        inst.configs.record(path, changed);

        Ok(())
    }

    fn config_mkinitcpio(&mut self, inst: &mut Installer) -> Result<(), SupError> {
        let path = inst.target(MKINITCPIO_CONF);
        let hooks = inst
            .configs
            .get_value(&path, "HOOKS")?
            .ok_or_else(|| SupError::BadConfig(format!("no HOOKS in {}", path.display())))?;

        let needs = HookNeeds {
            lvm: inst.topology.root_on_lvm(),
            encrypt: inst.topology.root_encrypted(),
            resume: inst
                .manifest
                .bootloader
                .as_ref()
                .is_some_and(|b| b.hibernation.is_some()),
        };

        if needs.lvm {
            self.install_packages(inst, &["lvm2"], &[])?;
        }

        let hooks = edit_hooks(&hooks, needs)?;
        inst.configs.set_value(&path, "HOOKS", &hooks, false)?;

        inst.exec.exec(&["mkinitcpio", "-p", "linux"]).map(|_| ())
    }

    /// grub-mkconfig with the host's lvm runtime dir visible in the chroot,
    /// so lvm does not stall looking for it
    fn mkconfig_with_lvm(&mut self, inst: &mut Installer) -> Result<(), SupError> {
        if inst.no_chroot {
            return grub::mkconfig(inst);
        }

        inst.exit_chroot()?;
        let run_lvm = inst.host(RUN_LVM);
        if !run_lvm.is_dir() {
            inst.enter_chroot()?;
            return grub::mkconfig(inst);
        }

        let host_dir = inst.target(CHROOT_LVM);
        fs::create_dir_all(&host_dir)?;
        let host_dir_str = host_dir.to_string_lossy().to_string();
        inst.exec
            .exec(&["mount", "--bind", &run_lvm.to_string_lossy(), &host_dir_str])?;

        inst.enter_chroot()?;
        let link = inst.target(RUN_LVM);
        if let Some(parent) = link.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::force_symlink(Path::new(CHROOT_LVM), &link)?;

        let result = grub::mkconfig(inst);
        std::fs::remove_file(&link)
            .map_err(|err| SupError::FileError(err, format!("remove {}", link.display())))?;

        inst.exit_chroot()?;
        inst.exec.exec(&["umount", &host_dir_str])?;
        std::fs::remove_dir(&host_dir)
            .map_err(|err| SupError::FileError(err, format!("rmdir {}", host_dir.display())))?;

        result
    }
}

impl Distro for Arch {
    fn name(&self) -> &'static str {
        "arch"
    }

    fn package_manager(&self) -> &dyn PackageManager {
        &self.pacman
    }

    fn ensure_chroot(&mut self, inst: &mut Installer) -> Result<(), SupError> {
        if inst.no_chroot || inst.chroot.is_inside() {
            return Ok(());
        }

        inst.mount_block_devs(None)?;
        inst.enter_chroot()
    }

    fn install_packages(
        &mut self,
        inst: &mut Installer,
        names: &[&str],
        flags: &[&str],
    ) -> Result<(), SupError> {
        let argv = self.pacman.install_cmd(names, flags);
        inst.exec.exec(&as_strs(&argv)).map(|_| ())
    }

    fn bootstrap(&mut self, inst: &mut Installer) -> Result<(), SupError> {
        let mirrorlist = inst.host(MIRRORLIST);
        self.config_mirrors(inst, &mirrorlist)?;

        inst.mount_rootfs()?;
        inst.mount_block_devs(None)?;

        let mount_point = inst.mount_point.to_string_lossy().to_string();
        inst.exec.exec(&["pacstrap", &mount_point, "base"]).map(|_| ())
    }

    fn setup_environment(&mut self, inst: &mut Installer) -> Result<(), SupError> {
        if inst.no_chroot {
            return Ok(());
        }

        mount::mount_core_filesystems(inst.exec, &inst.mount_point)
    }

    fn config_package_manager(&mut self, inst: &mut Installer) -> Result<(), SupError> {
        let mirrorlist = inst.target(MIRRORLIST);
        self.config_mirrors(inst, &mirrorlist)
    }

    fn config_system(&mut self, inst: &mut Installer) -> Result<(), SupError> {
        inst.exec.exec(&["systemd-machine-id-setup"])?;

        let manifest = inst.manifest;
        let sysconfig = &manifest.sysconfig;

        if !sysconfig.locales.is_empty() {
            let locales: Vec<&str> = sysconfig.locales.iter().map(String::as_str).collect();
            common::enable_locales(inst, &locales, false)?;
            inst.exec.exec(&["locale-gen"])?;
        }

        if let Some(keymap) = &sysconfig.keymap {
            common::set_keymap(inst, keymap)?;
        }

        if let Some(timezone) = &sysconfig.timezone {
            common::write_timezone(inst, timezone)?;
            let zone = format!("/usr/share/zoneinfo/{timezone}");
            fs::force_symlink(Path::new(&zone), &inst.target("/etc/localtime"))?;
        }

        if let Some(clock) = &sysconfig.clock {
            common::set_clock(inst, clock)?;
        }

        common::merge_sudoers(self, inst, "sudo")
    }

    fn build_kernel(&mut self, inst: &mut Installer) -> Result<(), SupError> {
        self.install_packages(inst, &["linux"], &[])?;

        if inst.kconfig.is_some() {
            return Err(SupError::NotImplemented(
                "custom kernel config builds on arch".to_string(),
            ));
        }

        self.config_mkinitcpio(inst)
    }

    fn config_boot_loader(&mut self, inst: &mut Installer) -> Result<(), SupError> {
        let manifest = inst.manifest;
        let Some(bootloader) = &manifest.bootloader else {
            tracing::info!("no boot loader configured");
            return Ok(());
        };

        let fwiface = grub::firmware_interface(bootloader)?;
        self.install_packages(inst, &["core/grub"], &[])?;
        if fwiface == FirmwareInterface::Uefi && !in_path("efibootmgr") {
            self.install_packages(inst, &["core/efibootmgr"], &[])?;
        }

        grub::install(inst, bootloader, Flavor::Arch)?;
        self.mkconfig_with_lvm(inst)
    }

    fn config_network(&mut self, inst: &mut Installer) -> Result<(), SupError> {
        let manifest = inst.manifest;
        let Some(network) = &manifest.network else {
            tracing::info!("no network configured");
            return Ok(());
        };

        tracing::info!("configuring network");
        if let Some(hostname) = manifest.hostname() {
            common::set_hostname(inst, hostname)?;
        }

        match network.manager {
            Some(NetworkManager::Networkd) => {
                common::config_networkd(inst, &network.interfaces)?;
                inst.exec
                    .exec(&["ln", "-snf", "/run/systemd/resolve/resolv.conf", "/etc/resolv.conf"])?;
                inst.exec
                    .exec(&["systemctl", "enable", "systemd-resolved.service"])?;
            }
            Some(NetworkManager::Networkmanager) => {
                self.install_packages(inst, &["extra/networkmanager"], &[])?;
                inst.exec.exec(&["systemctl", "enable", "NetworkManager"])?;
            }
            Some(NetworkManager::Netifrc) => {
                return Err(SupError::BadManifest(
                    "netifrc is not available on arch".to_string(),
                ))
            }
            None => {}
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distro::tests::{get, put, test_installer};
    use crate::manifest::tests::ARCH_YAML;
    use crate::manifest::Manifest;
    use crate::utils::shell::test_utils::FakeExec;

    const MIRRORS_TEXT: &str = "\
##
## Arch Linux repository mirrorlist
##

## Germany
#Server = https://ftp.fau.de/archlinux/$repo/os/$arch
## United States
#Server = https://mirrors.rit.edu/archlinux/$repo/os/$arch
## United States
Server = https://mirrors.kernel.org/archlinux/$repo/os/$arch
## France
Server = https://mirror.cyberbits.eu/archlinux/$repo/os/$arch
";

    #[test]
    fn test_filter_mirrorlist() {
        let mirrors = PacmanMirrors {
            countries: vec!["usa".into()],
            servers: vec!["cyberbits".into()],
        };

        assert_eq!(
            filter_mirrorlist(MIRRORS_TEXT, &mirrors).unwrap(),
            "##\n\
             ## Arch Linux repository mirrorlist\n\
             ##\n\
             \n\
             ## United States\n\
             Server = https://mirrors.rit.edu/archlinux/$repo/os/$arch\n\
             ## United States\n\
             Server = https://mirrors.kernel.org/archlinux/$repo/os/$arch\n\
             ## France\n\
             Server = https://mirror.cyberbits.eu/archlinux/$repo/os/$arch\n",
        );

        assert!(filter_mirrorlist("## x\n", &mirrors).is_err());
        assert!(filter_mirrorlist("Server = https://a/\n## b\n", &mirrors).is_err());
    }

    #[test]
    fn test_edit_hooks() {
        let base = "(base udev autodetect modconf block filesystems keyboard fsck)";
        let tests = [
            (HookNeeds::default(), base.to_string()),
            (
                HookNeeds { lvm: true, encrypt: true, resume: true },
                "(base udev autodetect modconf block encrypt lvm2 filesystems keyboard resume fsck)".to_string(),
            ),
        ];

        for (needs, expected) in tests {
            assert_eq!(edit_hooks(base, needs).unwrap(), expected);
        }

        assert_eq!(
            edit_hooks("(base systemd block filesystems)", HookNeeds { lvm: true, ..Default::default() }).unwrap(),
            "(base systemd block sd-lvm2 filesystems)",
        );

        // Already present hooks stay where they are
        assert_eq!(
            edit_hooks("(base block lvm2 filesystems)", HookNeeds { lvm: true, ..Default::default() }).unwrap(),
            "(base block lvm2 filesystems)",
        );

        assert!(matches!(
            edit_hooks("(base udev)", HookNeeds { lvm: true, ..Default::default() }),
            Err(SupError::BadConfig(_))
        ));
    }

    #[test]
    fn test_bootstrap() {
        let manifest = Manifest::from_yaml(ARCH_YAML).unwrap();
        let exec = FakeExec::new();
        let dir = tempfile::tempdir().unwrap();
        let mut inst = test_installer(&exec, &manifest, dir.path());
        put(dir.path(), MIRRORLIST, MIRRORS_TEXT);

        Arch::new().bootstrap(&mut inst).unwrap();

        let root = dir.path().display();
        assert_eq!(
            exec.calls(),
            vec![
                format!("mount /dev/vg0/root {root}"),
                format!("mount /dev/vg0/root {root}"),
                format!("mount /dev/nvme0n1p1 {root}/boot"),
                format!("pacstrap {root} base"),
            ],
        );
        assert_eq!(get(dir.path(), "/etc/pacman.d/mirrorlist.bak"), MIRRORS_TEXT);
        assert!(!get(dir.path(), MIRRORLIST).contains("France"));
    }

    #[test]
    fn test_build_kernel() {
        let manifest = Manifest::from_yaml(ARCH_YAML).unwrap();
        let exec = FakeExec::new();
        let dir = tempfile::tempdir().unwrap();
        let mut inst = test_installer(&exec, &manifest, dir.path());
        put(
            dir.path(),
            MKINITCPIO_CONF,
            "MODULES=()\n#    HOOKS=(base)\nHOOKS=(base udev block filesystems fsck)\n",
        );

        Arch::new().build_kernel(&mut inst).unwrap();

        assert_eq!(
            get(dir.path(), MKINITCPIO_CONF),
            "MODULES=()\n#    HOOKS=(base)\nHOOKS=(base udev block lvm2 filesystems fsck)\n",
        );
        assert_eq!(
            exec.calls(),
            vec![
                "pacman --noconfirm -S linux",
                "pacman --noconfirm -S lvm2",
                "mkinitcpio -p linux",
            ],
        );

        inst.kconfig = Some("CONFIG_MODULES=y\n".into());
        assert!(matches!(
            Arch::new().build_kernel(&mut inst),
            Err(SupError::NotImplemented(_))
        ));
    }

    #[test]
    fn test_config_system() {
        let manifest = Manifest::from_yaml(ARCH_YAML).unwrap();
        let exec = FakeExec::new();
        let dir = tempfile::tempdir().unwrap();
        let mut inst = test_installer(&exec, &manifest, dir.path());
        put(dir.path(), "/etc/locale.gen", "# Uncomment locales\n#en_US.UTF-8 UTF-8\n#de_DE.UTF-8 UTF-8\n");
        put(dir.path(), "/usr/share/zoneinfo/Europe/Berlin", "TZif");

        Arch::new().config_system(&mut inst).unwrap();

        assert_eq!(
            get(dir.path(), "/etc/locale.gen"),
            "# Uncomment locales\nen_US.UTF-8 UTF-8\n#de_DE.UTF-8 UTF-8\n",
        );
        assert_eq!(get(dir.path(), "/etc/vconsole.conf"), "KEYMAP=\"us\"\n");
        assert_eq!(get(dir.path(), "/etc/timezone"), "Europe/Berlin\n");
        assert_eq!(
            std::fs::read_link(dir.path().join("etc/localtime")).unwrap(),
            Path::new("/usr/share/zoneinfo/Europe/Berlin"),
        );
        assert_eq!(
            exec.calls(),
            vec!["systemd-machine-id-setup", "locale-gen", "hwclock --systohc --utc"],
        );
    }

    #[test]
    fn test_config_network_networkd() {
        let manifest = Manifest::from_yaml(ARCH_YAML).unwrap();
        let exec = FakeExec::new();
        let dir = tempfile::tempdir().unwrap();
        let mut inst = test_installer(&exec, &manifest, dir.path());

        Arch::new().config_network(&mut inst).unwrap();

        assert_eq!(get(dir.path(), "/etc/hostname"), "archbox\n");
        assert_eq!(
            exec.calls(),
            vec![
                "systemctl enable systemd-networkd.service",
                "ln -snf /run/systemd/resolve/resolv.conf /etc/resolv.conf",
                "systemctl enable systemd-resolved.service",
            ],
        );
    }

    #[test]
    fn test_remove_packages_skips_failures() {
        let manifest = Manifest::from_yaml("distro: arch\nremove_packages: [nano, vi]\n").unwrap();
        let exec = FakeExec::new().once(
            "pacman --noconfirm -R nano",
            crate::utils::shell::test_utils::Reply::Fail { code: 1, output: "target not found".into() },
        );
        let dir = tempfile::tempdir().unwrap();
        let mut inst = test_installer(&exec, &manifest, dir.path());

        common::remove_misc_packages(&mut Arch::new(), &mut inst).unwrap();
        assert_eq!(
            exec.calls(),
            vec!["pacman --noconfirm -R nano", "pacman --noconfirm -R vi"],
        );
    }
}
