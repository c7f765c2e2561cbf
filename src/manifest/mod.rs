pub mod validation;

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};

use crate::constants::{defaults, ENV_SUP_LOC};
use crate::entity::blockdev::{Disk, LogicalVolume, VolumeGroup};
use crate::errors::SupError;
use crate::pkg::resolver::AutoUnmask;
use crate::topology::Topology;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Distro {
    Arch,
    Gentoo,
}

impl Distro {
    pub fn default_mount_point(&self) -> &'static str {
        match self {
            Self::Arch => defaults::MOUNT_POINT_ARCH,
            Self::Gentoo => defaults::MOUNT_POINT_GENTOO,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Init {
    #[default]
    Systemd,
    Openrc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub distro: Distro,

    #[serde(alias = "mount", alias = "location")]
    pub mount_point: Option<String>,

    #[serde(default)]
    pub disks: Vec<Disk>,

    #[serde(default, alias = "lvms", deserialize_with = "de_volume_groups")]
    pub volume_groups: Vec<VolumeGroup>,

    #[serde(default)]
    pub sysconfig: SysConfig,

    pub network: Option<Network>,

    pub kernel: Option<Kernel>,

    pub bootloader: Option<Bootloader>,

    #[serde(default)]
    pub packages: Vec<String>,

    #[serde(default)]
    pub remove_packages: Vec<String>,

    #[serde(default)]
    pub services: Vec<String>,

    #[serde(default)]
    pub misc_config: Vec<MiscConfig>,

    #[serde(default)]
    pub portage: PortageConfig,

    #[serde(default)]
    pub pacman: PacmanConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SysConfig {
    #[serde(default)]
    pub init: Init,

    #[serde(alias = "host")]
    pub hostname: Option<String>,

    pub keymap: Option<String>,

    /// `UTC` or `local`
    pub clock: Option<String>,

    #[serde(default)]
    pub locales: Vec<String>,

    #[serde(alias = "tz")]
    pub timezone: Option<String>,

    /// Lines appended to /etc/sudoers
    #[serde(default)]
    pub sudo: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkManager {
    Networkd,
    Netifrc,
    #[serde(alias = "nm")]
    Networkmanager,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Network {
    pub hostname: Option<String>,

    pub domain: Option<String>,

    pub manager: Option<NetworkManager>,

    #[serde(default)]
    pub interfaces: Vec<Interface>,
}

/// Section name to ordered key/value pairs
pub type SectionMap = BTreeMap<String, BTreeMap<String, String>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interface {
    pub name: String,

    /// netifrc `config_<name>`
    pub config: Option<String>,

    /// netifrc `routes_<name>`
    pub routes: Option<String>,

    /// Extra sections for the networkd `<name>.network` file
    #[serde(default, alias = ".network")]
    pub network: SectionMap,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Kernel {
    /// Portage atom of the kernel sources
    pub sources: Option<String>,

    /// Extra `make` targets run before the build, e.g. `olddefconfig`
    pub targets: Option<String>,

    /// Modules to load at boot, whitespace separated
    pub modules: Option<String>,

    /// genkernel options for building an initramfs, e.g. `lvm luks`
    pub initramfs: Option<String>,

    pub genkernel: Option<Genkernel>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Genkernel {
    #[serde(default)]
    pub opts: String,

    #[serde(default = "default_genkernel_action")]
    pub action: String,
}

fn default_genkernel_action() -> String {
    "all".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FirmwareInterface {
    Uefi,
    Bios,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bootloader {
    pub name: String,

    pub fwiface: Option<FirmwareInterface>,

    /// Extra values merged into /etc/default/grub
    #[serde(default)]
    pub conf: Vec<(String, String)>,

    pub hibernation: Option<Hibernation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hibernation {
    pub swap_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MiscConfig {
    pub path: String,

    #[serde(default)]
    pub sections: Vec<MiscSection>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MiscSection {
    pub name: Option<String>,

    #[serde(default)]
    pub values: Vec<(String, String)>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortageConfig {
    pub profile: Option<String>,

    #[serde(default)]
    pub autounmask: AutoUnmask,

    /// make.conf variables
    #[serde(default)]
    pub vars: Vec<(String, String)>,

    /// `[file, atom, flags]`
    #[serde(default)]
    pub packuse: Vec<(String, String, String)>,

    /// `[file, atom, keywords]`
    #[serde(default)]
    pub packaccept: Vec<(String, String, String)>,

    /// `[file, atom, licenses]`
    #[serde(default)]
    pub packlicense: Vec<(String, String, String)>,

    /// `[file, atom]`
    #[serde(default)]
    pub packmask: Vec<(String, String)>,

    pub mirrors: Option<PortageMirrors>,

    pub stage: Option<Stage>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortageMirrors {
    pub rsync: Option<String>,

    pub country: Option<String>,

    #[serde(default)]
    pub urls: Vec<String>,
}

/// A stage tarball already downloaded to the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub archive: String,

    /// The `.DIGESTS` file published next to the archive
    pub digests: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PacmanConfig {
    pub mirrors: Option<PacmanMirrors>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PacmanMirrors {
    #[serde(default)]
    pub countries: Vec<String>,

    #[serde(default)]
    pub servers: Vec<String>,
}

/// Accepts both the flat `volume_groups` list and the nested
/// `lvms: [{ physvol, volgroups: [...] }]` layout
fn de_volume_groups<'de, D>(deserializer: D) -> Result<Vec<VolumeGroup>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct NestedGroup {
        name: String,
        #[serde(default)]
        volumes: Vec<LogicalVolume>,
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Entry {
        Flat(VolumeGroup),
        Nested {
            physvol: String,
            volgroups: Vec<NestedGroup>,
        },
    }

    let entries = Vec::<Entry>::deserialize(deserializer)?;
    let mut groups = Vec::new();
    for entry in entries {
        match entry {
            Entry::Flat(vg) => groups.push(vg),
            Entry::Nested { physvol, volgroups } => {
                groups.extend(volgroups.into_iter().map(|g| VolumeGroup {
                    name: g.name,
                    physvol: physvol.clone(),
                    volumes: g.volumes,
                }));
            }
        }
    }

    Ok(groups)
}

impl Manifest {
    #[inline]
    pub fn from_yaml(manifest_yaml: &str) -> Result<Self, SupError> {
        serde_yaml::from_str(manifest_yaml).map_err(|err| SupError::BadManifest(err.to_string()))
    }

    /// Parses by file extension: `.json`, `.toml`, anything else as YAML
    pub fn from_file(path: &Path) -> Result<Self, SupError> {
        let text = std::fs::read_to_string(path)
            .map_err(|err| SupError::FileError(err, format!("read manifest {}", path.display())))?;

        let ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_lowercase);

        match ext.as_deref() {
            Some("json") => {
                serde_json::from_str(&text).map_err(|err| SupError::BadManifest(err.to_string()))
            }
            Some("toml") => toml::from_str(&text).map_err(|err| SupError::BadManifest(err.to_string())),
            _ => Self::from_yaml(&text),
        }
    }

    /// `cli` beats `$SUP_LOC`, which beats the manifest, which beats the distro default
    pub fn resolve_mount_point(&self, cli: Option<&str>) -> String {
        if let Some(mount_point) = cli {
            return mount_point.to_string();
        }

        if let Ok(location) = std::env::var(ENV_SUP_LOC) {
            if !location.is_empty() {
                return location;
            }
        }

        self.mount_point
            .clone()
            .unwrap_or_else(|| self.distro.default_mount_point().to_string())
    }

    pub fn topology(&self) -> Topology {
        Topology::new(self.disks.clone(), self.volume_groups.clone())
    }

    pub fn init(&self) -> Init {
        self.sysconfig.init
    }

    /// Hostname from the network block, falling back to sysconfig
    pub fn hostname(&self) -> Option<&str> {
        self.network
            .as_ref()
            .and_then(|n| n.hostname.as_deref())
            .or(self.sysconfig.hostname.as_deref())
    }
}
