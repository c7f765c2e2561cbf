use std::collections::BTreeSet;
use std::path::Path;

use super::trace_blk::find_record;
use super::Topology;
use crate::constants::defaults;
use crate::entity::blockdev::BlockDevRecord;
use crate::entity::fstab::FstabEntry;
use crate::errors::SupError;
use crate::utils::fs;

/// Builds the fstab row for `device`.
///
/// Returns None when the device has neither a mount nor options (it is not
/// meant to be mounted at boot), or when blkid knows no filesystem type for it.
pub fn build_fstab_entry(
    records: &[BlockDevRecord],
    mount: Option<&str>,
    opts: Option<&str>,
    flags: &BTreeSet<String>,
    device: &str,
) -> Option<FstabEntry> {
    if mount.is_none() && opts.is_none() {
        return None;
    }

    let Some(record) = find_record(records, device) else {
        tracing::warn!("skipping fstab row for {device}: not found in blkid output");
        return None;
    };

    let Some(fs_type) = record.fs_type.clone() else {
        tracing::warn!("skipping fstab row for {device}: no filesystem type");
        return None;
    };

    let device = match &record.uuid {
        Some(uuid) => format!("UUID={uuid}"),
        None => device.to_string(),
    };

    let opts = match opts.map(str::trim) {
        Some(opts) if !opts.is_empty() => opts
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|o| !o.is_empty())
            .collect::<Vec<_>>()
            .join(","),
        _ => defaults::ROOT_NOOPTS.to_string(),
    };

    let pass = match mount {
        Some("/") => 1,
        Some(_) if flags.contains("boot") => 2,
        _ => 0,
    };
    let mount = mount.unwrap_or("none").to_string();

    Some(FstabEntry {
        device,
        mount,
        fs_type,
        opts,
        dump: 0,
        pass,
    })
}

impl Topology {
    /// fstab rows for every partition then every logical volume.
    /// Volumes are looked up by their /dev/mapper name, which is what blkid prints.
    pub fn fstab_entries(&self, records: &[BlockDevRecord]) -> Vec<FstabEntry> {
        let parts = self.partitions().filter_map(|p| {
            build_fstab_entry(
                records,
                p.partition.mount.as_deref(),
                p.partition.opts.as_deref(),
                &p.partition.flags,
                &p.device,
            )
        });

        let vols = self.volumes().filter_map(|v| {
            build_fstab_entry(
                records,
                v.volume.mount.as_deref(),
                v.volume.opts.as_deref(),
                &v.volume.flags,
                &v.group.mapper_device(v.volume),
            )
        });

        parts.chain(vols).collect()
    }
}

/// fstab text: the comment lines of `existing`, then one line per entry
pub fn render_fstab(existing: &str, entries: &[FstabEntry]) -> String {
    let mut out = String::new();
    for line in existing.lines().filter(|l| l.trim_start().starts_with('#')) {
        out.push_str(line);
        out.push('\n');
    }

    for entry in entries {
        out.push_str(&entry.to_string());
        out.push('\n');
    }

    out
}

/// Rewrites the fstab at `path`. Returns whether it changed.
pub fn write_fstab(path: &Path, entries: &[FstabEntry]) -> Result<bool, SupError> {
    let existing = fs::read_or_empty(path)?;
    fs::write_if_changed(path, &render_fstab(&existing, entries))
}
