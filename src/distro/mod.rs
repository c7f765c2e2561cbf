//! Per-distro provisioning on top of one shared [`Installer`] context.

pub mod arch;
pub mod common;
pub mod gentoo;
pub mod grub;

use std::path::{Path, PathBuf};

use crate::config::ConfigStore;
use crate::entity::blockdev::BlockDevRecord;
use crate::errors::SupError;
use crate::linux::chroot::ChrootContext;
use crate::linux::mount;
use crate::manifest::{self, Init, Manifest};
use crate::pkg::PackageManager;
use crate::topology::{trace_blk, Topology};
use crate::utils::shell::Executor;

/// Everything a provisioning step works with. Created once per run.
pub struct Installer<'a> {
    pub exec: &'a dyn Executor,
    pub manifest: &'a Manifest,
    pub topology: Topology,
    pub configs: ConfigStore,
    pub chroot: ChrootContext,
    pub mount_point: PathBuf,
    /// Run every step against the live root instead of chrooting
    pub no_chroot: bool,
    /// Kernel config text to build with
    pub kconfig: Option<String>,
    /// Where the target root appears once inside the chroot
    pub sysroot: PathBuf,
}

impl<'a> Installer<'a> {
    pub fn new(exec: &'a dyn Executor, manifest: &'a Manifest, mount_point: &Path) -> Self {
        Self {
            exec,
            manifest,
            topology: manifest.topology(),
            configs: ConfigStore::new(),
            chroot: ChrootContext::new(),
            mount_point: mount_point.to_path_buf(),
            no_chroot: false,
            kconfig: None,
            sysroot: PathBuf::from("/"),
        }
    }

    pub fn init(&self) -> Init {
        self.manifest.init()
    }

    /// Resolves an absolute path of the target system to where it is
    /// reachable right now
    pub fn target(&self, path: &str) -> PathBuf {
        let root = if self.chroot.is_inside() || self.no_chroot {
            &self.sysroot
        } else {
            &self.mount_point
        };

        match path.trim_start_matches('/') {
            "" => root.clone(),
            relative => root.join(relative),
        }
    }

    /// Path on the machine running sup, whether or not we are chrooted
    pub fn host(&self, path: &str) -> PathBuf {
        match path.trim_start_matches('/') {
            "" => self.sysroot.clone(),
            relative => self.sysroot.join(relative),
        }
    }

    pub fn enter_chroot(&mut self) -> Result<(), SupError> {
        if self.no_chroot {
            return Ok(());
        }

        self.chroot.enter(&self.mount_point)
    }

    pub fn exit_chroot(&mut self) -> Result<(), SupError> {
        if self.no_chroot {
            return Ok(());
        }

        self.chroot.exit()
    }

    /// Live blkid facts; never cached since devices change between steps
    pub fn block_attrs(&self) -> Result<Vec<BlockDevRecord>, SupError> {
        trace_blk::query_block_attributes(self.exec)
    }

    /// Mounts the manifest's partitions and volumes under the target root,
    /// shallowest first. With `subset`, only those mount targets.
    pub fn mount_block_devs(&self, subset: Option<&[&str]>) -> Result<(), SupError> {
        for (mnt, device) in self.topology.mounts() {
            if subset.is_some_and(|s| !s.contains(&mnt.as_str())) {
                continue;
            }

            mount::mount_device(self.exec, &device, &self.target(&mnt))?;
        }

        Ok(())
    }

    pub fn mount_rootfs(&self) -> Result<(), SupError> {
        self.mount_block_devs(Some(&["/"]))
    }

    pub fn modified(&self) -> Vec<PathBuf> {
        self.configs.modified().to_vec()
    }
}

/// What one distro does for each provisioning step.
/// Steps that need the chroot call [`Distro::ensure_chroot`] first.
pub trait Distro {
    fn name(&self) -> &'static str;

    fn package_manager(&self) -> &dyn PackageManager;

    /// Flags for installing the manifest's extra packages
    fn default_flags(&self) -> &'static [&'static str] {
        &[]
    }

    /// Enters the target root along with whatever the distro needs in it
    fn ensure_chroot(&mut self, inst: &mut Installer) -> Result<(), SupError>;

    fn install_packages(
        &mut self,
        inst: &mut Installer,
        names: &[&str],
        flags: &[&str],
    ) -> Result<(), SupError>;

    fn remove_packages(&mut self, inst: &mut Installer, names: &[&str]) -> Result<(), SupError> {
        let argv = self.package_manager().remove_cmd(names, &[]);
        let argv: Vec<&str> = argv.iter().map(String::as_str).collect();
        inst.exec.exec(&argv).map(|_| ())
    }

    /// Puts a base system under the mount point
    fn bootstrap(&mut self, inst: &mut Installer) -> Result<(), SupError>;

    /// Mounts and files the chroot needs before first entry
    fn setup_environment(&mut self, inst: &mut Installer) -> Result<(), SupError>;

    fn config_package_manager(&mut self, inst: &mut Installer) -> Result<(), SupError>;

    fn config_system(&mut self, inst: &mut Installer) -> Result<(), SupError>;

    fn update_world(&mut self, _inst: &mut Installer) -> Result<(), SupError> {
        tracing::info!("{}: nothing to do for update-world", self.name());
        Ok(())
    }

    fn build_kernel(&mut self, inst: &mut Installer) -> Result<(), SupError>;

    fn config_boot_loader(&mut self, inst: &mut Installer) -> Result<(), SupError>;

    fn config_network(&mut self, inst: &mut Installer) -> Result<(), SupError>;
}

pub fn new_distro(distro: manifest::Distro, manifest: &Manifest) -> Box<dyn Distro> {
    match distro {
        manifest::Distro::Arch => Box::new(arch::Arch::new()),
        manifest::Distro::Gentoo => Box::new(gentoo::Gentoo::new(&manifest.portage)),
    }
}
