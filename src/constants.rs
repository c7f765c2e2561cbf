use std::time::Duration;

pub mod defaults {
    pub const MOUNT_POINT_ARCH: &str = "/mnt";
    pub const MOUNT_POINT_GENTOO: &str = "/mnt/gentoo";
    pub const PORTAGE_DIR: &str = "/etc/portage";
    pub const LOCALE_GEN: &str = "/etc/locale.gen";
    pub const FSTAB: &str = "/etc/fstab";
    pub const RESOLV_CONF: &str = "/etc/resolv.conf";
    pub const ROOT_NOOPTS: &str = "defaults";
    pub const CRYPT_MAPPING: &str = "cryptroot";
}

/// Overrides the manifest mount point
pub const ENV_SUP_LOC: &str = "SUP_LOC";

/// Keeps the tail of failed command output in errors
pub const MAX_ERR_OUTPUT: usize = 2000;

/// Attempts for pvcreate and luksFormat on a busy device
pub const DEVICE_RETRY_ATTEMPTS: usize = 10;

/// Attempts for `emerge --sync`
pub const SYNC_ATTEMPTS: usize = 40;

pub const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Marker emerge prints when a transaction needs unmasking
pub const UNMASK_MARKER: &str = "--autounmask-write";

/// Leading characters of atom lines inside an emerge change block
pub const CHANGE_LINE_MARKERS: [char; 4] = ['#', '<', '>', '='];

// Use programs instead of bindings to avoid API dependencies
pub const REQUIRED_COMMANDS: [&str; 12] = [
    "parted",
    "blkid",
    "cryptsetup",
    "pvcreate",
    "vgcreate",
    "lvcreate",
    "mount",
    "tar",
    "sh",
    "grub-install",
    "grub-mkconfig",
    "modprobe",
];
