pub mod blockdev;
pub mod fstab;
pub mod report;

use humanize_rs::bytes;

use crate::errors::SupError;

pub fn parse_human_bytes(s: &str) -> std::result::Result<bytes::Bytes, SupError> {
    (s.to_lowercase())
        .parse::<bytes::Bytes>()
        .map_err(|err| SupError::BadManifest(format!("bad byte unit string {s}: {err}")))
}

#[test]
#[rustfmt::skip]
fn test_parse_human_bytes() {
    let valids = vec![
        "1k", "1kb", "1K", "1KB", "1ki", "1KiB",
        "512m", "512M", "512MiB",
        "20g", "20G", "20GB", "1 GiB",
        "2t", "2T",
    ];

    for s in valids {
        assert!(parse_human_bytes(s).is_ok(), "{s} should be valid");
    }

    let invalids = vec!["", "g", "-1G", "12 parsecs", "100%FREE"];
    for s in invalids {
        assert!(parse_human_bytes(s).is_err(), "{s} should be invalid");
    }
}
