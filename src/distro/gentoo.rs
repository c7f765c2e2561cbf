use std::path::Path;

use super::common;
use super::grub::{self, Flavor};
use super::{Distro, Installer};
use crate::config::ini::Section;
use crate::config::varval;
use crate::config::uncomment;
use crate::constants::{defaults, RETRY_DELAY, SYNC_ATTEMPTS};
use crate::errors::SupError;
use crate::linux::mount;
use crate::manifest::{
    FirmwareInterface, Init, Interface, Kernel, NetworkManager, PortageConfig, PortageMirrors,
};
use crate::manifest::validation::is_utf8_locale;
use crate::pkg::portage::{append_package_lines, PackageFile, Portage};
use crate::pkg::resolver::{AutoUnmask, ConflictResolver};
use crate::pkg::PackageManager;
use crate::utils::fs;
use crate::utils::retry::{is_permission, retry, Policy};
use crate::utils::shell::{as_strs, in_path, ExecOpts};
use crate::verify::verify_sha512;

const MAKE_CONF: &str = "/etc/portage/make.conf";
const REPOS_CONF: &str = "/etc/portage/repos.conf/gentoo.conf";
const REPOS_CONF_DEFAULT: &str = "/usr/share/portage/config/repos.conf";
const PROFILE_ENV: &str = "/etc/profile.env";
const I18N_SUPPORTED: &str = "/usr/share/i18n/SUPPORTED";
const KERNEL_SRC: &str = "/usr/src/linux";
const DEFAULT_SOURCES: &str = "sys-kernel/gentoo-sources";
const KEY_SERVER: &str = "hkps://keys.gentoo.org";

const QUIET: &[&str] = &["--quiet-build"];

pub struct Gentoo {
    autounmask: AutoUnmask,
    profile: Option<String>,
    /// Set once a profile has been selected during a sync retry
    profile_set: bool,
    sync_policy: Policy,
}

impl Gentoo {
    pub fn new(portage: &PortageConfig) -> Self {
        Self {
            autounmask: portage.autounmask,
            profile: portage.profile.clone(),
            profile_set: false,
            sync_policy: Policy::new(SYNC_ATTEMPTS, RETRY_DELAY),
        }
    }
}

/// `export KEY='value'` lines of /etc/profile.env
pub fn parse_profile_env(text: &str) -> Vec<(String, String)> {
    text.lines()
        .filter_map(|line| line.trim().strip_prefix("export "))
        .filter_map(|assignment| {
            let (key, value) = assignment.trim().split_once('=')?;
            let value = shlex::split(value)
                .map(|words| words.join(" "))
                .unwrap_or_else(|| value.to_string());

            Some((key.to_string(), value))
        })
        .collect()
}

/// Flags after the `CPU_FLAGS_X86:` label of cpuid2cpuflags output
pub fn parse_cpu_flags(output: &str) -> Result<String, SupError> {
    let mut words = output.split_whitespace();
    if words.next() != Some("CPU_FLAGS_X86:") {
        return Err(SupError::BadConfig(format!(
            "cpuid2cpuflags output in unknown format: {output}"
        )));
    }

    Ok(words.collect::<Vec<_>>().join(" "))
}

/// Profile names listed by `eselect profile list`
pub fn listed_profiles(output: &str) -> Vec<&str> {
    output
        .lines()
        .filter_map(|line| {
            line.split_whitespace()
                .find(|word| !word.starts_with('[') && *word != "*")
        })
        .collect()
}

/// Module names from a kernel `modules.order`
pub fn built_modules(order: &str) -> Vec<String> {
    order
        .lines()
        .filter_map(|line| Path::new(line.trim()).file_stem())
        .map(|stem| stem.to_string_lossy().to_string())
        .collect()
}

/// `--`-prefixed genkernel options
fn genkernel_opts(opts: &str) -> Vec<String> {
    opts.split_whitespace()
        .map(|opt| {
            if opt.starts_with("--") {
                opt.to_string()
            } else {
                format!("--{opt}")
            }
        })
        .collect()
}

fn make_jobs() -> String {
    let cores = std::thread::available_parallelism().map_or(1, |n| n.get());
    format!("-j{}", cores + 1)
}

impl Gentoo {
    fn resolver(&self, inst: &Installer) -> ConflictResolver {
        ConflictResolver::new(self.autounmask, &inst.target(defaults::PORTAGE_DIR))
    }

    fn emerge_with_env(
        &mut self,
        inst: &mut Installer,
        name: &str,
        flags: &[&str],
        env: &[(String, String)],
    ) -> Result<(), SupError> {
        let written = self.resolver(inst).emerge(inst.exec, name, flags, env)?;
        for path in written {
            inst.configs.record(&path, true);
        }

        Ok(())
    }

    /// Imports /etc/profile.env of the target into our environment
    fn update_chroot_env(&self, inst: &mut Installer) -> Result<(), SupError> {
        let profile_env = inst.target(PROFILE_ENV);
        if !fs::file_exists(&profile_env) {
            inst.exec.exec(&["env-update"])?;
        }

        for (key, value) in parse_profile_env(&fs::read_or_empty(&profile_env)?) {
            tracing::debug!("chroot env {key}={value}");
            std::env::set_var(key, value);
        }

        if let Some(locale) = inst.manifest.sysconfig.locales.first() {
            std::env::set_var("LC_ALL", locale);
            std::env::set_var("LC_CTYPE", locale);
        }

        Ok(())
    }

    /// Selects the configured profile, once per run
    fn select_profile(&mut self, inst: &Installer) -> Result<(), SupError> {
        if self.profile_set {
            return Ok(());
        }

        let Some(profile) = &self.profile else {
            tracing::warn!("no portage profile configured, keeping the stage default");
            self.profile_set = true;
            return Ok(());
        };

        let listing = inst.exec.exec_quiet(&["eselect", "profile", "list"])?;
        if !listed_profiles(&listing.output).contains(&profile.as_str()) {
            return Err(SupError::BadManifest(format!(
                "unable to set portage profile {profile}"
            )));
        }

        inst.exec.exec(&["eselect", "profile", "set", profile])?;
        self.profile_set = true;

        Ok(())
    }

    /// `emerge --sync`, retried while snapshot verification is refused.
    /// The first refusal also selects the profile.
    pub fn resync(&mut self, inst: &mut Installer) -> Result<(), SupError> {
        let policy = self.sync_policy;
        retry("emerge --sync", policy, is_permission, || {
            let result = inst.exec.exec(&["emerge", "--sync"]);
            if let Err(err) = &result {
                if is_permission(err) {
                    self.select_profile(inst)?;
                }
            }

            result.map(|_| ())
        })
    }

    /// Asks mirrorselect for mirrors. In rsync mode returns the sync URI,
    /// otherwise the GENTOO_MIRRORS list merged with the manifest urls.
    fn mirror_list(
        &mut self,
        inst: &mut Installer,
        mirrors: &PortageMirrors,
        rsync: bool,
    ) -> Result<String, SupError> {
        if !in_path("mirrorselect") {
            let package = ["app-portage/mirrorselect"];
            let flags = ["--quiet-build", "--oneshot"];
            if let Err(err) = self.install_packages(inst, &package, &flags) {
                if !is_permission(&err) {
                    return Err(err);
                }

                self.resync(inst)?;
                self.install_packages(inst, &package, &flags)?;
            }
        }

        let country = mirrors.country.as_deref().unwrap_or("USA");
        let mut argv = vec!["mirrorselect", "-q", "-o"];
        if rsync {
            argv.push("-r");
        }
        argv.extend(["-c", country]);

        let output = inst.exec.exec(&argv)?.output;

        if rsync {
            let words: Vec<&str> = output.split_whitespace().collect();
            return match (words.first(), words.last()) {
                (Some(&"sync-uri"), Some(uri)) => Ok(uri.to_string()),
                _ => Err(SupError::BadConfig(format!("invalid sync-uri from mirrorselect: {output}"))),
            };
        }

        let listed = output.split('"').nth(1).ok_or_else(|| {
            SupError::BadConfig(format!("invalid GENTOO_MIRRORS from mirrorselect: {output}"))
        })?;

        let urls: Vec<&str> = mirrors.urls.iter().map(String::as_str).collect();
        Ok(varval::merge_tokens(listed, &urls))
    }

    fn set_rsync_mirror(&mut self, inst: &mut Installer, mirrors: &PortageMirrors) -> Result<(), SupError> {
        let sync_uri = match &mirrors.rsync {
            Some(uri) => uri.clone(),
            None => format!("{}/gentoo-portage/", self.mirror_list(inst, mirrors, true)?),
        };

        let path = inst.target(REPOS_CONF);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let section = Section::new(
            "gentoo",
            [
                ("location", "/var/db/repos/gentoo"),
                ("sync-type", "rsync"),
                ("sync-uri", sync_uri.as_str()),
                ("sync-webrsync-verify-signature", "true"),
                ("auto-sync", "yes"),
                ("sync-rsync-verify-jobs", "1"),
                ("sync-rsync-verify-metamanifest", "yes"),
                ("sync-rsync-verify-max-age", "24"),
                ("sync-openpgp-key-path", "/usr/share/openpgp-keys/gentoo-release.asc"),
                ("sync-openpgp-keyserver", KEY_SERVER),
                ("sync-openpgp-key-refresh-retry-count", "40"),
                ("sync-openpgp-key-refresh-retry-overall-timeout", "1200"),
                ("sync-openpgp-key-refresh-retry-delay-exp-base", "2"),
                ("sync-openpgp-key-refresh-retry-delay-max", "60"),
                ("sync-openpgp-key-refresh-retry-delay-mult", "4"),
            ],
        );

        inst.configs.set_sections(&path, &[section], true)
    }

    fn write_package_files(&self, inst: &mut Installer) -> Result<(), SupError> {
        let manifest = inst.manifest;
        let portage = &manifest.portage;
        let mut entries: Vec<(PackageFile, &str, String)> = Vec::new();

        for (file, atom, flags) in &portage.packuse {
            entries.push((PackageFile::Use, file, format!("{atom} {flags}")));
        }
        for (file, atom, keywords) in &portage.packaccept {
            entries.push((PackageFile::AcceptKeywords, file, format!("{atom} {keywords}")));
        }
        for (file, atom) in &portage.packmask {
            entries.push((PackageFile::Mask, file, atom.clone()));
        }
        for (file, atom, licenses) in &portage.packlicense {
            entries.push((PackageFile::License, file, format!("{atom} {licenses}")));
        }

        let portage_dir = inst.target(defaults::PORTAGE_DIR);
        for (kind, file, line) in entries {
            if let Some(path) = append_package_lines(&portage_dir, kind, file, &[line])? {
                inst.configs.record(&path, true);
            }
        }

        Ok(())
    }

    fn set_locales(&mut self, inst: &mut Installer, locales: &[&str]) -> Result<(), SupError> {
        tracing::info!("setting locales");

        let supported = fs::read_or_empty(&inst.target(I18N_SUPPORTED))?;
        let entries = uncomment::supported_entries(&supported, locales);
        let entries: Vec<&str> = entries.iter().map(String::as_str).collect();

        common::enable_locales(inst, &entries, true)?;
        inst.exec.exec(&["locale-gen"])?;

        let listing = inst
            .exec
            .exec_quiet(&["eselect", "locale", "list"])?
            .output
            .to_lowercase();

        for locale in locales {
            let normalized = locale.replace('-', "").to_lowercase();
            if !listing.contains(&normalized) {
                return Err(SupError::BadManifest(format!("invalid locale: {locale}")));
            }

            if is_utf8_locale(locale) {
                inst.exec.exec(&["eselect", "locale", "set", locale])?;
            }
        }

        inst.exec.exec(&["env-update"]).map(|_| ())
    }

    fn install_initramfs(&mut self, inst: &mut Installer, initramfs: &str) -> Result<(), SupError> {
        let env = [("USE".to_string(), "-firmware".to_string())];
        self.emerge_with_env(inst, "sys-kernel/genkernel", &["--quiet-build", "--newuse"], &env)?;

        let opts = genkernel_opts(initramfs);
        if opts.iter().any(|o| o == "--zfs") {
            self.install_packages(inst, &["sys-fs/zfs"], QUIET)?;
        }

        let mut argv = vec!["genkernel"];
        argv.extend(as_strs(&opts));
        argv.extend(["--install", "initramfs"]);

        inst.exec.exec(&argv).map(|_| ())
    }

    fn build_genkernel(&mut self, inst: &mut Installer, opts: &str, action: &str) -> Result<(), SupError> {
        self.install_packages(inst, &["sys-kernel/genkernel"], &["--newuse", "--quiet-build"])?;

        // genkernel reads the fstab
        common::write_fstab(inst)?;

        let opts = genkernel_opts(opts);
        let mut argv = vec!["genkernel"];
        argv.extend(as_strs(&opts));
        argv.push(action);

        inst.exec.exec(&argv).map(|_| ())
    }

    fn build_from_sources(&mut self, inst: &mut Installer, kernel: &Kernel) -> Result<(), SupError> {
        let sources = kernel.sources.as_deref().unwrap_or(DEFAULT_SOURCES);
        self.install_packages(inst, &[sources], QUIET)?;

        let src = inst.target(KERNEL_SRC);
        if !src.exists() {
            inst.exec.exec(&["eselect", "kernel", "set", "1"])?;
        }

        let config = src.join(".config");
        if let Some(kconfig) = &inst.kconfig {
            fs::write_if_changed(&config, kconfig)?;
        }

        let config_text = fs::read_or_empty(&config)?;
        let firmware = varval::get_value_text(&config_text, "CONFIG_EXTRA_FIRMWARE");
        if firmware.is_some_and(|f| !f.is_empty()) {
            for package in [
                "sys-kernel/linux-firmware",
                "sys-firmware/sof-firmware",
                "net-wireless/wireless-regdb",
            ] {
                self.install_packages(inst, &[package], QUIET)?;
            }
        }

        let in_src = ExecOpts {
            cwd: Some(src.clone()),
            ..ExecOpts::default()
        };

        let targets: Vec<&str> = kernel
            .targets
            .as_deref()
            .map(|t| t.split_whitespace().collect())
            .unwrap_or_default();

        if !targets.is_empty() {
            let mut argv = vec!["make"];
            argv.extend(targets);
            inst.exec.exec_with(&argv, &in_src)?;
        }

        let jobs = make_jobs();
        inst.exec.exec_with(&["make", &jobs], &in_src)?;
        inst.exec.exec_with(&["make", "install"], &in_src)?;

        let modules: Vec<&str> = kernel
            .modules
            .as_deref()
            .map(|m| m.split_whitespace().collect())
            .unwrap_or_default();

        let modules_enabled = varval::get_value_text(&config_text, "CONFIG_MODULES").as_deref() == Some("y");
        if !modules_enabled && !modules.is_empty() {
            return Err(SupError::BadManifest(
                "kernel module loading is disabled but autoload modules were set".to_string(),
            ));
        }

        if modules_enabled {
            inst.exec.exec_with(&["make", "modules_install"], &in_src)?;
            self.autoload_modules(inst, &src, &modules)?;
        }

        if let Some(initramfs) = &kernel.initramfs {
            self.install_initramfs(inst, initramfs)?;
        }

        Ok(())
    }

    fn autoload_modules(&self, inst: &mut Installer, src: &Path, modules: &[&str]) -> Result<(), SupError> {
        if modules.is_empty() {
            return Ok(());
        }

        let built = built_modules(&fs::read_or_empty(&src.join("modules.order"))?);
        if let Some(missing) = modules.iter().find(|m| !built.iter().any(|b| b == *m)) {
            return Err(SupError::BadManifest(format!(
                "module {missing} was not built, but set to autoload"
            )));
        }

        match inst.init() {
            Init::Openrc => common::set_var(inst, "/etc/conf.d/modules", "modules", &modules.join(" ")),
            Init::Systemd => {
                let text: String = modules.iter().map(|m| format!("{m}\n")).collect();
                common::write_file(inst, "/etc/modules-load.d/autoload.conf", &text)
            }
        }
    }

    fn config_netifrc(&self, inst: &mut Installer, domain: Option<&str>, interfaces: &[Interface]) -> Result<(), SupError> {
        const NET: &str = "/etc/conf.d/net";

        if let Some(domain) = domain {
            common::set_var(inst, NET, "dns_domain_lo", domain)?;
        }

        for iface in interfaces {
            if let Some(config) = &iface.config {
                common::set_var(inst, NET, &format!("config_{}", iface.name), config)?;
            }

            if let Some(routes) = &iface.routes {
                common::set_var(inst, NET, &format!("routes_{}", iface.name), routes)?;
            }
        }

        let init_d = inst.target("/etc/init.d");
        fs::create_dir_all(&init_d)?;
        for iface in interfaces {
            let service = format!("net.{}", iface.name);
            fs::force_symlink(Path::new("net.lo"), &init_d.join(&service))?;
            inst.exec.exec(&["rc-update", "add", &service, "default"])?;
        }

        Ok(())
    }
}

impl Distro for Gentoo {
    fn name(&self) -> &'static str {
        "gentoo"
    }

    fn package_manager(&self) -> &dyn PackageManager {
        &Portage
    }

    fn default_flags(&self) -> &'static [&'static str] {
        QUIET
    }

    fn ensure_chroot(&mut self, inst: &mut Installer) -> Result<(), SupError> {
        if inst.no_chroot || inst.chroot.is_inside() {
            return Ok(());
        }

        inst.enter_chroot()?;
        self.update_chroot_env(inst)
    }

    fn install_packages(
        &mut self,
        inst: &mut Installer,
        names: &[&str],
        flags: &[&str],
    ) -> Result<(), SupError> {
        for name in names {
            self.emerge_with_env(inst, name, flags, &[])?;
        }

        Ok(())
    }

    fn bootstrap(&mut self, inst: &mut Installer) -> Result<(), SupError> {
        let stage = inst.manifest.portage.stage.as_ref().ok_or_else(|| {
            SupError::BadManifest("gentoo bootstrap needs portage.stage".to_string())
        })?;

        // Not retried: the archive is a local file, so a mismatch cannot heal
        verify_sha512(Path::new(&stage.archive), Path::new(&stage.digests))?;
        inst.mount_rootfs()?;

        let root = inst.target("/").to_string_lossy().to_string();
        inst.exec
            .exec(&["tar", "xpf", &stage.archive, "--xattrs", "-C", &root])
            .map(|_| ())
    }

    fn setup_environment(&mut self, inst: &mut Installer) -> Result<(), SupError> {
        tracing::info!("setting up environment");

        let repos_conf = inst.target(REPOS_CONF);
        if let Some(parent) = repos_conf.parent() {
            fs::create_dir_all(parent)?;
        }

        if !inst.no_chroot {
            mount::mount_core_filesystems(inst.exec, &inst.mount_point)?;
            mount::bind_run(inst.exec, &inst.mount_point)?;
        }

        if !fs::file_exists(&repos_conf) {
            let default = inst.target(REPOS_CONF_DEFAULT);
            std::fs::copy(&default, &repos_conf).map_err(|err| {
                SupError::FileError(err, format!("copy {} to {}", default.display(), repos_conf.display()))
            })?;
            inst.configs.record(&repos_conf, true);
        }

        Ok(())
    }

    fn config_package_manager(&mut self, inst: &mut Installer) -> Result<(), SupError> {
        self.ensure_chroot(inst)?;

        let manifest = inst.manifest;
        let portage = &manifest.portage;
        let mirrors = portage.mirrors.clone().unwrap_or_default();

        self.set_rsync_mirror(inst, &mirrors)?;
        if portage.mirrors.is_some() {
            let list = self.mirror_list(inst, &mirrors, false)?;
            common::merge_var(inst, MAKE_CONF, "GENTOO_MIRRORS", &[&list])?;
        }

        common::set_var(inst, MAKE_CONF, "MAKEOPTS", &make_jobs())?;
        for (key, value) in &portage.vars {
            common::set_var(inst, MAKE_CONF, key, value)?;
        }

        self.write_package_files(inst)?;

        if !portage.vars.iter().any(|(k, _)| k.eq_ignore_ascii_case("CPU_FLAGS_X86")) {
            self.install_packages(inst, &["app-portage/cpuid2cpuflags"], &["--quiet-build", "--oneshot"])?;
            let output = inst.exec.exec(&["cpuid2cpuflags"])?.output;
            common::set_var(inst, MAKE_CONF, "CPU_FLAGS_X86", &parse_cpu_flags(&output)?)?;
        }

        self.resync(inst)?;
        inst.exec.exec(&["emerge", "--oneshot", "portage"]).map(|_| ())
    }

    fn config_system(&mut self, inst: &mut Installer) -> Result<(), SupError> {
        let manifest = inst.manifest;
        let sysconfig = &manifest.sysconfig;

        if inst.init() == Init::Systemd {
            inst.exec.exec(&["systemd-machine-id-setup"])?;
        }

        if !sysconfig.locales.is_empty() {
            let locales: Vec<&str> = sysconfig.locales.iter().map(String::as_str).collect();
            self.set_locales(inst, &locales)?;
        }

        if let Some(keymap) = &sysconfig.keymap {
            common::set_keymap(inst, keymap)?;
        }

        if let Some(timezone) = &sysconfig.timezone {
            common::write_timezone(inst, timezone)?;
            inst.exec.exec(&["emerge", "--config", "sys-libs/timezone-data"])?;
        }

        if let Some(clock) = &sysconfig.clock {
            common::set_clock(inst, clock)?;
        }

        common::merge_sudoers(self, inst, "app-admin/sudo")
    }

    fn update_world(&mut self, inst: &mut Installer) -> Result<(), SupError> {
        self.resync(inst)?;
        self.install_packages(
            inst,
            &["@world"],
            &["--update", "--deep", "--newuse", "--quiet", "--quiet-build"],
        )
    }

    fn build_kernel(&mut self, inst: &mut Installer) -> Result<(), SupError> {
        tracing::info!("building kernel");
        inst.mount_block_devs(None)?;

        let kernel = inst.manifest.kernel.clone().unwrap_or_default();
        match &kernel.genkernel {
            Some(genkernel) => self.build_genkernel(inst, &genkernel.opts, &genkernel.action),
            None => self.build_from_sources(inst, &kernel),
        }
    }

    fn config_boot_loader(&mut self, inst: &mut Installer) -> Result<(), SupError> {
        let manifest = inst.manifest;
        let Some(bootloader) = &manifest.bootloader else {
            tracing::info!("no boot loader configured");
            return Ok(());
        };

        if bootloader.hibernation.is_some() && manifest.kernel.is_none() {
            return Err(SupError::BadManifest(
                "hibernation needs a kernel config".to_string(),
            ));
        }

        inst.mount_block_devs(None)?;

        if inst.topology.has_volume_groups() {
            let line = ["sys-boot/grub:2 device-mapper".to_string()];
            let portage_dir = inst.target(defaults::PORTAGE_DIR);
            if let Some(path) = append_package_lines(&portage_dir, PackageFile::Use, "grub2", &line)? {
                inst.configs.record(&path, true);
            }
        }

        let fwiface = grub::firmware_interface(bootloader)?;
        if fwiface == FirmwareInterface::Uefi {
            common::set_var(inst, MAKE_CONF, "GRUB_PLATFORMS", "efi-64")?;
        }

        if !in_path("grub-mkconfig") && !in_path("grub-install") {
            self.install_packages(inst, &["sys-boot/grub:2"], &["--verbose", "--quiet-build"])?;
        }

        grub::install(inst, bootloader, Flavor::Gentoo)?;

        // os-prober loops forever without /run
        if !inst.no_chroot {
            inst.exit_chroot()?;
            mount::bind_run(inst.exec, &inst.mount_point)?;
            self.ensure_chroot(inst)?;
        }

        grub::mkconfig(inst)?;

        let initramfs = manifest.kernel.as_ref().and_then(|k| k.initramfs.as_deref());
        if let (Some(_), Some(initramfs)) = (&bootloader.hibernation, initramfs) {
            self.install_initramfs(inst, initramfs)?;
        }

        Ok(())
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

        match (inst.init(), network.manager) {
            (Init::Openrc, Some(NetworkManager::Netifrc)) => {
                self.config_netifrc(inst, network.domain.as_deref(), &network.interfaces)
            }
            (Init::Systemd, Some(NetworkManager::Networkd)) => {
                common::config_networkd(inst, &network.interfaces)
            }
            (_, Some(NetworkManager::Networkmanager)) => {
                self.install_packages(inst, &["net-misc/networkmanager"], QUIET)?;
                common::enable_service(inst, "NetworkManager")
            }
            (init, Some(manager)) => Err(SupError::BadManifest(format!(
                "network manager {manager:?} is not supported with {init:?}"
            ))),
            (_, None) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::distro::tests::{get, put, test_installer};
    use crate::manifest::tests::GENTOO_YAML;
    use crate::manifest::{Manifest, Stage};
    use crate::utils::shell::test_utils::{FakeExec, Reply};

    fn test_gentoo(manifest: &Manifest) -> Gentoo {
        let mut gentoo = Gentoo::new(&manifest.portage);
        gentoo.sync_policy = Policy::new(3, Duration::ZERO);
        gentoo
    }

    fn refused() -> Reply {
        Reply::Fail {
            code: 1,
            output: "!!! Manifest verification failed".into(),
        }
    }

    const PROFILES: &str = "Available profile symlink targets:\n  \
        [1]   default/linux/amd64/23.0 (stable) *\n  \
        [2]   default/linux/amd64/23.0/systemd (stable)\n";

    #[test]
    fn test_parse_helpers() {
        let env = parse_profile_env(
            "# autogenerated\nexport EDITOR='/bin/nano'\nexport INFOPATH='/usr/share/info:/usr/share/gcc-data/info'\nunset LESS\n",
        );
        assert_eq!(
            env,
            vec![
                ("EDITOR".to_string(), "/bin/nano".to_string()),
                (
                    "INFOPATH".to_string(),
                    "/usr/share/info:/usr/share/gcc-data/info".to_string()
                ),
            ],
        );

        assert_eq!(parse_cpu_flags("CPU_FLAGS_X86: aes avx sse2\n").unwrap(), "aes avx sse2");
        assert!(matches!(parse_cpu_flags("aes avx"), Err(SupError::BadConfig(_))));

        assert_eq!(
            listed_profiles(PROFILES),
            vec!["default/linux/amd64/23.0", "default/linux/amd64/23.0/systemd"],
        );

        assert_eq!(
            built_modules("kernel/drivers/net/e1000e/e1000e.ko\nkernel/fs/fuse/fuse.ko\n"),
            vec!["e1000e", "fuse"],
        );
        assert_eq!(genkernel_opts("lvm --luks"), vec!["--lvm", "--luks"]);
    }

    #[test]
    fn test_resync_selects_profile_once() {
        let manifest = Manifest::from_yaml(GENTOO_YAML).unwrap();
        let exec = FakeExec::new()
            .once("emerge --sync", refused())
            .once("eselect profile list", Reply::Output(PROFILES.into()));
        let dir = tempfile::tempdir().unwrap();
        let mut inst = test_installer(&exec, &manifest, dir.path());
        let mut gentoo = test_gentoo(&manifest);

        gentoo.resync(&mut inst).unwrap();
        assert_eq!(
            exec.calls(),
            vec![
                "emerge --sync",
                "eselect profile list",
                "eselect profile set default/linux/amd64/23.0",
                "emerge --sync",
            ],
        );

        // Already selected: a later refusal only retries
        let exec = FakeExec::new().once("emerge --sync", refused());
        let mut inst = test_installer(&exec, &manifest, dir.path());
        gentoo.resync(&mut inst).unwrap();
        assert_eq!(exec.calls(), vec!["emerge --sync", "emerge --sync"]);
    }

    #[test]
    fn test_resync_unknown_profile() {
        let mut manifest = Manifest::from_yaml(GENTOO_YAML).unwrap();
        manifest.portage.profile = Some("default/linux/riscv/23.0".to_string());

        let exec = FakeExec::new()
            .always("emerge --sync", refused())
            .once("eselect profile list", Reply::Output(PROFILES.into()));
        let dir = tempfile::tempdir().unwrap();
        let mut inst = test_installer(&exec, &manifest, dir.path());

        let err = test_gentoo(&manifest).resync(&mut inst).unwrap_err();
        assert!(matches!(err, SupError::BadManifest(_)));
        assert!(!exec.called("eselect profile set"));
    }

    #[test]
    fn test_resync_exhausted() {
        let mut manifest = Manifest::from_yaml(GENTOO_YAML).unwrap();
        manifest.portage.profile = None;

        let exec = FakeExec::new().always("emerge --sync", refused());
        let dir = tempfile::tempdir().unwrap();
        let mut inst = test_installer(&exec, &manifest, dir.path());

        let err = test_gentoo(&manifest).resync(&mut inst).unwrap_err();
        assert!(matches!(err, SupError::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(exec.calls().len(), 3);
    }

    #[test]
    fn test_bootstrap_verifies_stage() {
        let dir = tempfile::tempdir().unwrap();
        let stage_dir = tempfile::tempdir().unwrap();
        let archive = stage_dir.path().join("stage3.tar.xz");
        let digests = stage_dir.path().join("stage3.tar.xz.DIGESTS");
        std::fs::write(&archive, "hello\n").unwrap();
        std::fs::write(
            &digests,
            "# SHA512 HASH\ne7c22b994c59d9cf2b48e549b1e24666636045930d3da7c1acb299d1c3b7f931f94aae41edda2c2b207a36e10f8bcb8d45223e54878f5b316e7ce3b6bc019629  stage3.tar.xz\n",
        )
        .unwrap();

        let mut manifest = Manifest::from_yaml(GENTOO_YAML).unwrap();
        manifest.portage.stage = Some(Stage {
            archive: archive.display().to_string(),
            digests: digests.display().to_string(),
        });

        let exec = FakeExec::new();
        let mut inst = test_installer(&exec, &manifest, dir.path());
        test_gentoo(&manifest).bootstrap(&mut inst).unwrap();
        assert_eq!(
            exec.calls(),
            vec![
                format!("mount /dev/vg0/root {}", dir.path().display()),
                format!(
                    "tar xpf {} --xattrs -C {}",
                    archive.display(),
                    dir.path().display()
                ),
            ],
        );

        std::fs::write(&archive, "tampered\n").unwrap();
        let exec = FakeExec::new();
        let mut inst = test_installer(&exec, &manifest, dir.path());
        let err = test_gentoo(&manifest).bootstrap(&mut inst).unwrap_err();
        assert!(matches!(err, SupError::VerificationFailed(_)));
        assert!(exec.calls().is_empty());
    }

    #[test]
    fn test_bootstrap_needs_stage() {
        let mut manifest = Manifest::from_yaml(GENTOO_YAML).unwrap();
        manifest.portage.stage = None;

        let exec = FakeExec::new();
        let dir = tempfile::tempdir().unwrap();
        let mut inst = test_installer(&exec, &manifest, dir.path());

        let err = test_gentoo(&manifest).bootstrap(&mut inst).unwrap_err();
        assert!(matches!(err, SupError::BadManifest(_)));
    }

    #[test]
    fn test_config_package_manager() {
        let manifest = Manifest::from_yaml(GENTOO_YAML).unwrap();
        let exec = FakeExec::new()
            .once(
                "mirrorselect -q -o -c USA",
                Reply::Output("GENTOO_MIRRORS=\"https://a.example/gentoo/ https://mirrors.kernel.org/gentoo/\"\n".into()),
            )
            .once("cpuid2cpuflags", Reply::Output("CPU_FLAGS_X86: aes avx sse2\n".into()));
        let dir = tempfile::tempdir().unwrap();
        put(dir.path(), PROFILE_ENV, "export SUP_TEST_PORTAGE_EDITOR='/bin/nano'\n");
        let mut inst = test_installer(&exec, &manifest, dir.path());

        test_gentoo(&manifest).config_package_manager(&mut inst).unwrap();

        assert!(inst.chroot.is_inside());
        assert_eq!(
            std::env::var("SUP_TEST_PORTAGE_EDITOR").as_deref(),
            Ok("/bin/nano")
        );

        let make_conf = get(dir.path(), MAKE_CONF);
        assert!(make_conf.contains(
            "GENTOO_MIRRORS=\"https://a.example/gentoo/ https://mirrors.kernel.org/gentoo/\"\n"
        ));
        assert!(make_conf.contains("MAKEOPTS=\"-j"));
        assert!(make_conf.contains("USE=\"lvm cryptsetup -systemd\"\n"));
        assert!(make_conf.contains("VIDEO_CARDS=\"intel\"\n"));
        assert!(make_conf.contains("CPU_FLAGS_X86=\"aes avx sse2\"\n"));

        let repos = get(dir.path(), REPOS_CONF);
        assert!(repos.starts_with("[gentoo]\n"));
        assert!(repos.contains("sync-uri=rsync://rsync.us.gentoo.org/gentoo-portage/\n"));
        assert!(repos.contains("sync-openpgp-keyserver=hkps://keys.gentoo.org\n"));

        assert_eq!(get(dir.path(), "/etc/portage/package.use/lvm2"), "sys-fs/lvm2 lvm\n");
        assert_eq!(
            get(dir.path(), "/etc/portage/package.accept_keywords/vim"),
            "app-editors/vim ~amd64\n"
        );
        assert_eq!(get(dir.path(), "/etc/portage/package.mask/systemd"), "sys-apps/systemd\n");

        assert!(exec.called("emerge --quiet-build --oneshot app-portage/cpuid2cpuflags"));
        let calls = exec.calls();
        assert_eq!(calls[calls.len() - 2], "emerge --sync");
        assert_eq!(calls[calls.len() - 1], "emerge --oneshot portage");
        assert!(inst.modified().contains(&dir.path().join("etc/portage/package.mask/systemd")));
    }

    #[test]
    fn test_config_system_locales() {
        let manifest = Manifest::from_yaml(GENTOO_YAML).unwrap();
        let exec = FakeExec::new().once(
            "eselect locale list",
            Reply::Output(
                "Available targets for the LANG variable:\n  [1]   C\n  [2]   en_US\n  [3]   en_US.utf8\n".into(),
            ),
        );
        let dir = tempfile::tempdir().unwrap();
        put(dir.path(), I18N_SUPPORTED, "de_DE.UTF-8 UTF-8\nen_US.UTF-8 UTF-8\nen_US ISO-8859-1\n");
        put(dir.path(), defaults::LOCALE_GEN, "# locales to build\n");
        put(dir.path(), "/usr/share/zoneinfo/America/New_York", "TZif");
        put(dir.path(), "/etc/sudoers", "root ALL=(ALL) ALL\n");
        let mut inst = test_installer(&exec, &manifest, dir.path());

        test_gentoo(&manifest).config_system(&mut inst).unwrap();

        assert_eq!(
            get(dir.path(), defaults::LOCALE_GEN),
            "# locales to build\nen_US.UTF-8 UTF-8\nen_US ISO-8859-1\n",
        );
        assert_eq!(
            exec.calls(),
            vec![
                "locale-gen",
                "eselect locale list",
                "eselect locale set en_US.UTF-8",
                "env-update",
                "emerge --config sys-libs/timezone-data",
            ],
        );
        assert_eq!(get(dir.path(), "/etc/conf.d/keymaps"), "keymap=\"us\"\n");
        assert_eq!(get(dir.path(), "/etc/conf.d/hwclock"), "clock=\"UTC\"\n");
        assert_eq!(get(dir.path(), "/etc/timezone"), "America/New_York\n");
        assert_eq!(
            get(dir.path(), "/etc/sudoers"),
            "root ALL=(ALL) ALL\n%wheel ALL=(ALL) ALL\n"
        );
    }

    #[test]
    fn test_config_system_unknown_locale() {
        let manifest = Manifest::from_yaml(GENTOO_YAML).unwrap();
        let exec = FakeExec::new().once(
            "eselect locale list",
            Reply::Output("Available targets for the LANG variable:\n  [1]   C\n".into()),
        );
        let dir = tempfile::tempdir().unwrap();
        put(dir.path(), defaults::LOCALE_GEN, "");
        let mut inst = test_installer(&exec, &manifest, dir.path());

        let err = test_gentoo(&manifest).config_system(&mut inst).unwrap_err();
        assert!(matches!(err, SupError::BadManifest(_)));
    }

    fn kernel_tree(dir: &Path, config: &str) {
        put(dir, "/usr/src/linux/.config", config);
        put(
            dir,
            "/usr/src/linux/modules.order",
            "kernel/drivers/net/ethernet/intel/e1000e/e1000e.ko\n",
        );
    }

    #[test]
    fn test_build_kernel_from_sources() {
        let manifest = Manifest::from_yaml(GENTOO_YAML).unwrap();
        let exec = FakeExec::new();
        let dir = tempfile::tempdir().unwrap();
        kernel_tree(dir.path(), "CONFIG_MODULES=y\nCONFIG_EXTRA_FIRMWARE=\"\"\n");
        let mut inst = test_installer(&exec, &manifest, dir.path());

        test_gentoo(&manifest).build_kernel(&mut inst).unwrap();

        let calls: Vec<String> = exec
            .calls()
            .into_iter()
            .filter(|c| !c.starts_with("mount "))
            .collect();
        assert_eq!(calls.len(), 7);
        assert_eq!(calls[0], "emerge --quiet-build sys-kernel/gentoo-sources");
        assert_eq!(calls[1], "make olddefconfig");
        assert!(calls[2].starts_with("make -j"));
        assert_eq!(calls[3], "make install");
        assert_eq!(calls[4], "make modules_install");
        assert_eq!(calls[5], "emerge --quiet-build --newuse sys-kernel/genkernel");
        assert_eq!(calls[6], "genkernel --lvm --luks --install initramfs");

        let envs = exec.envs.borrow();
        assert!(envs
            .iter()
            .any(|env| env.contains(&("USE".to_string(), "-firmware".to_string()))));
        assert_eq!(get(dir.path(), "/etc/conf.d/modules"), "modules=\"e1000e\"\n");
    }

    #[test]
    fn test_build_kernel_module_errors() {
        let mut manifest = Manifest::from_yaml(GENTOO_YAML).unwrap();
        let dir = tempfile::tempdir().unwrap();

        // Autoload modules without module support
        kernel_tree(dir.path(), "# CONFIG_MODULES is not set\n");
        let exec = FakeExec::new();
        let mut inst = test_installer(&exec, &manifest, dir.path());
        let err = test_gentoo(&manifest).build_kernel(&mut inst).unwrap_err();
        assert!(matches!(err, SupError::BadManifest(_)));
        assert!(!exec.called("make modules_install"));

        // A module the build did not produce
        kernel_tree(dir.path(), "CONFIG_MODULES=y\n");
        if let Some(kernel) = manifest.kernel.as_mut() {
            kernel.modules = Some("e1000e iwlwifi".to_string());
        }
        let exec = FakeExec::new();
        let mut inst = test_installer(&exec, &manifest, dir.path());
        let err = test_gentoo(&manifest).build_kernel(&mut inst).unwrap_err();
        assert!(matches!(err, SupError::BadManifest(msg) if msg.contains("iwlwifi")));
    }

    #[test]
    fn test_config_network_netifrc() {
        let manifest = Manifest::from_yaml(GENTOO_YAML).unwrap();
        let exec = FakeExec::new();
        let dir = tempfile::tempdir().unwrap();
        let mut inst = test_installer(&exec, &manifest, dir.path());

        test_gentoo(&manifest).config_network(&mut inst).unwrap();

        assert_eq!(get(dir.path(), "/etc/conf.d/hostname"), "hostname=\"gentoobox\"\n");
        assert_eq!(
            get(dir.path(), "/etc/conf.d/net"),
            "dns_domain_lo=\"example.org\"\nconfig_eth0=\"dhcp\"\n",
        );
        assert_eq!(
            std::fs::read_link(dir.path().join("etc/init.d/net.eth0")).unwrap(),
            Path::new("net.lo"),
        );
        assert_eq!(exec.calls(), vec!["rc-update add net.eth0 default"]);
    }

    #[test]
    fn test_config_network_rejects_networkd_on_openrc() {
        let mut manifest = Manifest::from_yaml(GENTOO_YAML).unwrap();
        if let Some(network) = manifest.network.as_mut() {
            network.manager = Some(NetworkManager::Networkd);
        }

        let exec = FakeExec::new();
        let dir = tempfile::tempdir().unwrap();
        let mut inst = test_installer(&exec, &manifest, dir.path());

        let err = test_gentoo(&manifest).config_network(&mut inst).unwrap_err();
        assert!(matches!(err, SupError::BadManifest(_)));
    }
}
