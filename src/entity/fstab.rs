use std::fmt;

use serde::Serialize;

/// One `/etc/fstab` row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FstabEntry {
    /// `UUID=<uuid>`, or the raw device path when blkid has no UUID
    pub device: String,
    pub mount: String,
    pub fs_type: String,
    pub opts: String,
    pub dump: u8,
    pub pass: u8,
}

impl fmt::Display for FstabEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t\t{}\t\t{}\t\t{}\t\t{} {}",
            self.device, self.mount, self.fs_type, self.opts, self.dump, self.pass
        )
    }
}

#[test]
fn test_fstab_entry_display() {
    let entry = FstabEntry {
        device: "UUID=1234-ABCD".into(),
        mount: "/boot".into(),
        fs_type: "vfat".into(),
        opts: "noauto,noatime".into(),
        dump: 0,
        pass: 2,
    };

    assert_eq!(
        "UUID=1234-ABCD\t\t/boot\t\tvfat\t\tnoauto,noatime\t\t0 2",
        entry.to_string()
    );
}
