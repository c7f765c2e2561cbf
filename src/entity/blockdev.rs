use std::collections::BTreeSet;

use serde::{Deserialize, Deserializer, Serialize};

use crate::linux::partition_name;

/// Flags accept both `flags: boot` and `flags: [boot, esp]`
fn de_flags<'de, D>(deserializer: D) -> Result<BTreeSet<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flags {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<Flags>::deserialize(deserializer)? {
        None => BTreeSet::new(),
        Some(Flags::One(s)) => s.split_whitespace().map(String::from).collect(),
        Some(Flags::Many(v)) => v.into_iter().collect(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disk {
    #[serde(alias = "device")]
    pub name: String,

    /// Partition table type given to `parted mklabel`, e.g. gpt or msdos
    pub label: Option<String>,

    #[serde(default)]
    pub partitions: Vec<Partition>,
}

impl Disk {
    /// Device path of the partition at 1-based `index`
    pub fn partition_device(&self, index: usize) -> String {
        partition_name(&self.name, index)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    #[serde(rename = "type", alias = "part_type", default = "default_part_type")]
    pub part_type: String,

    #[serde(default)]
    pub start: String,

    #[serde(default)]
    pub end: String,

    pub name: Option<String>,

    #[serde(default, deserialize_with = "de_flags", skip_serializing_if = "BTreeSet::is_empty")]
    pub flags: BTreeSet<String>,

    #[serde(alias = "fstype")]
    pub fs: Option<String>,

    pub label: Option<String>,

    #[serde(alias = "mnt")]
    pub mount: Option<String>,

    #[serde(alias = "mntopts")]
    pub opts: Option<String>,

    pub crypt: Option<CryptSpec>,
}

fn default_part_type() -> String {
    "primary".to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CryptSpec {
    /// Name under /dev/mapper once opened
    pub mapping: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeGroup {
    pub name: String,

    #[serde(alias = "pv")]
    pub physvol: String,

    #[serde(default, alias = "lvs")]
    pub volumes: Vec<LogicalVolume>,
}

impl VolumeGroup {
    /// `/dev/<vg>/<lv>`
    pub fn volume_device(&self, volume: &LogicalVolume) -> String {
        format!("/dev/{}/{}", self.name, volume.name)
    }

    /// `/dev/mapper/<vg>-<lv>`, the form blkid reports.
    /// Device-mapper doubles dashes inside each name.
    pub fn mapper_device(&self, volume: &LogicalVolume) -> String {
        format!(
            "/dev/mapper/{}-{}",
            self.name.replace('-', "--"),
            volume.name.replace('-', "--")
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalVolume {
    pub name: String,

    /// `lvcreate` size, absolute (20G) or relative (100%FREE)
    pub size: String,

    #[serde(alias = "fstype")]
    pub fs: Option<String>,

    pub label: Option<String>,

    #[serde(alias = "mnt")]
    pub mount: Option<String>,

    #[serde(alias = "mntopts")]
    pub opts: Option<String>,

    #[serde(default, deserialize_with = "de_flags", skip_serializing_if = "BTreeSet::is_empty")]
    pub flags: BTreeSet<String>,
}

impl LogicalVolume {
    pub fn is_relative_size(&self) -> bool {
        self.size.contains('%')
    }

    /// `-l` for extents/percentages, `-L` for byte sizes
    pub fn size_flag(&self) -> &'static str {
        if self.is_relative_size() {
            "-l"
        } else {
            "-L"
        }
    }
}

/// One row of `blkid` output
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BlockDevRecord {
    pub device: String,
    pub uuid: Option<String>,
    pub fs_type: Option<String>,
    pub label: Option<String>,
}
