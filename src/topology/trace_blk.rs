use crate::entity::blockdev::BlockDevRecord;
use crate::errors::SupError;
use crate::utils::shell::Executor;

/// Parses `blkid` output lines such as
/// `/dev/sda1: UUID="1234-ABCD" BLOCK_SIZE="512" TYPE="vfat" PARTUUID="..."`.
/// Lines without a device or with unbalanced quotes are skipped.
pub fn parse_blkid(output: &str) -> Vec<BlockDevRecord> {
    let mut records = Vec::new();
    for line in output.lines() {
        let Some((device, attrs)) = line.split_once(':') else {
            continue;
        };

        let device = device.trim();
        if device.is_empty() {
            continue;
        }

        let Some(attrs) = shlex::split(attrs) else {
            tracing::warn!("skipping unparsable blkid line: {line}");
            continue;
        };

        let mut record = BlockDevRecord {
            device: device.to_string(),
            ..Default::default()
        };

        for attr in attrs {
            let Some((key, value)) = attr.split_once('=') else {
                continue;
            };

            match key {
                "UUID" => record.uuid = Some(value.to_string()),
                "TYPE" => record.fs_type = Some(value.to_string()),
                "LABEL" => record.label = Some(value.to_string()),
                _ => {}
            }
        }

        records.push(record);
    }

    records
}

/// Runs `blkid` and parses its output. blkid exits 2 when it finds
/// nothing, which is an empty table rather than a failure.
pub fn query_block_attributes(exec: &dyn Executor) -> Result<Vec<BlockDevRecord>, SupError> {
    match exec.exec_quiet(&["blkid"]) {
        Ok(out) => Ok(parse_blkid(&out.output)),
        Err(SupError::CmdFailed(failure)) if failure.code == 2 => Ok(Vec::new()),
        Err(err) => Err(err),
    }
}

/// Record for `device`, compared case-insensitively
pub fn find_record<'a>(records: &'a [BlockDevRecord], device: &str) -> Option<&'a BlockDevRecord> {
    records
        .iter()
        .find(|r| r.device.eq_ignore_ascii_case(device))
}
