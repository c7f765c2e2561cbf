//! Disks, partitions and volume groups from the manifest, plus the facts
//! derived from them: device paths, fstab rows, the boot partition and the
//! crypt/LVM chain under the root filesystem.

pub mod fstab;
pub mod trace_blk;

use std::path::Path;

use crate::entity::blockdev::{
    BlockDevRecord,
    Disk,
    LogicalVolume,
    Partition,
    VolumeGroup,
};
use crate::errors::SupError;

/// Partition attributes that lookups can filter on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attr {
    Mount,
    Opts,
    Flags,
    Fs,
    Crypt,
    Label,
}

/// A partition together with its disk and derived device path
#[derive(Debug, Clone)]
pub struct PartRef<'a> {
    pub disk: &'a Disk,
    pub index: usize,
    pub device: String,
    pub partition: &'a Partition,
}

/// A logical volume together with its group and derived device path
#[derive(Debug, Clone)]
pub struct VolRef<'a> {
    pub group: &'a VolumeGroup,
    pub volume: &'a LogicalVolume,
    pub device: String,
}

/// Where the root filesystem's encryption lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedRoot {
    /// The raw LUKS partition
    pub device: String,
    /// Filesystem UUID of the raw partition
    pub uuid: String,
    pub mapping: Option<String>,
}

fn matches(attr: Attr, value: Option<&str>, single: Option<&str>, flags: &std::collections::BTreeSet<String>) -> bool {
    match attr {
        Attr::Flags => match value {
            Some(v) => flags.contains(v),
            None => !flags.is_empty(),
        },
        _ => match (single, value) {
            (Some(s), Some(v)) => s == v,
            (Some(_), None) => true,
            (None, _) => false,
        },
    }
}

impl Partition {
    /// Whether the attribute is set, and equal to `value` when given.
    /// For `Flags`, `value` is tested for membership.
    pub fn has(&self, attr: Attr, value: Option<&str>) -> bool {
        let single = match attr {
            Attr::Mount => self.mount.as_deref(),
            Attr::Opts => self.opts.as_deref(),
            Attr::Fs => self.fs.as_deref(),
            Attr::Label => self.label.as_deref(),
            Attr::Crypt => match &self.crypt {
                Some(crypt) => Some(crypt.mapping.as_deref().unwrap_or_default()),
                None => None,
            },
            Attr::Flags => None,
        };

        matches(attr, value, single, &self.flags)
    }
}

impl LogicalVolume {
    pub fn has(&self, attr: Attr, value: Option<&str>) -> bool {
        let single = match attr {
            Attr::Mount => self.mount.as_deref(),
            Attr::Opts => self.opts.as_deref(),
            Attr::Fs => self.fs.as_deref(),
            Attr::Label => self.label.as_deref(),
            Attr::Crypt | Attr::Flags => None,
        };

        matches(attr, value, single, &self.flags)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Topology {
    pub disks: Vec<Disk>,
    pub volume_groups: Vec<VolumeGroup>,
}

impl Topology {
    pub fn new(disks: Vec<Disk>, volume_groups: Vec<VolumeGroup>) -> Self {
        Self {
            disks,
            volume_groups,
        }
    }

    pub fn partitions(&self) -> impl Iterator<Item = PartRef<'_>> {
        self.disks.iter().flat_map(|disk| {
            disk.partitions
                .iter()
                .enumerate()
                .map(move |(i, partition)| PartRef {
                    disk,
                    index: i + 1,
                    device: disk.partition_device(i + 1),
                    partition,
                })
        })
    }

    pub fn volumes(&self) -> impl Iterator<Item = VolRef<'_>> {
        self.volume_groups.iter().flat_map(|group| {
            group.volumes.iter().map(move |volume| VolRef {
                group,
                volume,
                device: group.volume_device(volume),
            })
        })
    }

    pub fn find_partitions(&self, attr: Attr, value: Option<&str>) -> Vec<PartRef<'_>> {
        self.partitions()
            .filter(|p| p.partition.has(attr, value))
            .collect()
    }

    pub fn find_volumes(&self, attr: Attr, value: Option<&str>) -> Vec<VolRef<'_>> {
        self.volumes()
            .filter(|v| v.volume.has(attr, value))
            .collect()
    }

    pub fn partition_mounted_at(&self, mount: &str) -> Option<PartRef<'_>> {
        self.find_partitions(Attr::Mount, Some(mount)).into_iter().next()
    }

    pub fn volume_mounted_at(&self, mount: &str) -> Option<VolRef<'_>> {
        self.find_volumes(Attr::Mount, Some(mount)).into_iter().next()
    }

    pub fn has_volume_groups(&self) -> bool {
        !self.volume_groups.is_empty()
    }

    pub fn root_on_lvm(&self) -> bool {
        self.volume_mounted_at("/").is_some()
    }

    /// Crypt partition whose mapping is the basename of `physvol`,
    /// e.g. mapping `cryptroot` for `/dev/mapper/cryptroot`
    pub fn partition_for_mapping(&self, physvol: &str) -> Option<PartRef<'_>> {
        let basename = Path::new(physvol).file_name()?.to_str()?;

        self.partitions().find(|p| {
            p.partition
                .crypt
                .as_ref()
                .and_then(|c| c.mapping.as_deref())
                .is_some_and(|m| m.trim() == basename)
        })
    }

    /// The single partition flagged `boot`
    pub fn boot_partition(&self) -> Result<PartRef<'_>, SupError> {
        let mut boots = self.find_partitions(Attr::Flags, Some("boot"));
        match boots.len() {
            0 => Err(SupError::BadManifest("no boot partition".to_string())),
            1 => Ok(boots.remove(0)),
            n => Err(SupError::BadManifest(format!(
                "ambiguous boot partition: {n} partitions flagged boot"
            ))),
        }
    }

    /// Whether the disk holding the boot partition also holds a crypt partition
    pub fn boot_disk_has_crypt(&self) -> Result<bool, SupError> {
        let boot = self.boot_partition()?;

        Ok(self
            .find_partitions(Attr::Crypt, None)
            .iter()
            .any(|p| p.disk.name == boot.disk.name))
    }

    /// The raw crypt partition under `/`, if any.
    /// Follows `/` on a plain partition, or `/` on a logical volume whose
    /// group's physvol is an opened crypt mapping.
    pub fn root_crypt_partition(&self) -> Option<PartRef<'_>> {
        if let Some(root) = self.partition_mounted_at("/") {
            return root.partition.crypt.is_some().then_some(root);
        }

        let root = self.volume_mounted_at("/")?;
        self.partition_for_mapping(&root.group.physvol)
    }

    pub fn root_encrypted(&self) -> bool {
        self.root_crypt_partition().is_some()
    }

    /// Resolves the root encryption chain against live blkid records.
    /// An encrypted root whose partition has no UUID is an error, since the
    /// kernel command line cannot reference it.
    pub fn resolve_root_encryption(
        &self,
        records: &[BlockDevRecord],
    ) -> Result<Option<EncryptedRoot>, SupError> {
        let Some(part) = self.root_crypt_partition() else {
            return Ok(None);
        };

        let uuid = trace_blk::find_record(records, &part.device)
            .and_then(|r| r.uuid.clone())
            .ok_or_else(|| {
                SupError::NoSuchDevice(format!("no filesystem UUID for {}", part.device))
            })?;

        Ok(Some(EncryptedRoot {
            device: part.device.clone(),
            uuid,
            mapping: part.partition.crypt.as_ref().and_then(|c| c.mapping.clone()),
        }))
    }

    /// Mount targets and their devices, shallowest first so `/` mounts
    /// before anything below it
    pub fn mounts(&self) -> Vec<(String, String)> {
        let mut mounts: Vec<(String, String)> = self
            .partitions()
            .filter_map(|p| p.partition.mount.clone().map(|m| (m, p.device)))
            .chain(
                self.volumes()
                    .filter_map(|v| v.volume.mount.clone().map(|m| (m, v.device))),
            )
            .filter(|(m, _)| m.starts_with('/'))
            .collect();

        mounts.sort_by_key(|(m, _)| m.trim_end_matches('/').matches('/').count());
        mounts
    }
}
