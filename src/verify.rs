use std::fs::File;
use std::io;
use std::path::Path;

use sha2::{Digest, Sha512};

use crate::errors::SupError;
use crate::utils::fs;

/// SHA512 entries of a Gentoo `.DIGESTS` file as `(hex, file name)`
pub fn parse_sha512_digests(text: &str) -> Vec<(String, String)> {
    let mut entries = Vec::new();
    let mut lines = text.lines();

    while let Some(line) = lines.next() {
        if !line.contains("SHA512 HASH") {
            continue;
        }

        let Some(entry) = lines.by_ref().map(str::trim).find(|l| !l.is_empty()) else {
            break;
        };

        let mut fields = entry.split_whitespace();
        if let Some(hex) = fields.next() {
            let name = fields.next().unwrap_or_default();
            entries.push((hex.to_lowercase(), name.to_string()));
        }
    }

    entries
}

pub fn sha512_hex(path: &Path) -> Result<String, SupError> {
    let mut file = File::open(path)
        .map_err(|err| SupError::FileError(err, format!("open {}", path.display())))?;

    let mut hasher = Sha512::new();
    io::copy(&mut file, &mut hasher)
        .map_err(|err| SupError::FileError(err, format!("hash {}", path.display())))?;

    Ok(hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect())
}

/// Checks `archive` against the SHA512 digest listed for it in `digests`.
/// Falls back to the first SHA512 entry when none names the archive.
pub fn verify_sha512(archive: &Path, digests: &Path) -> Result<(), SupError> {
    let entries = parse_sha512_digests(&fs::read(digests)?);

    let file_name = archive
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let expected = entries
        .iter()
        .find(|(_, name)| *name == file_name)
        .or_else(|| entries.first())
        .map(|(hex, _)| hex.as_str())
        .ok_or_else(|| {
            SupError::VerificationFailed(format!("no SHA512 digest in {}", digests.display()))
        })?;

    tracing::info!("verifying {} against {}", archive.display(), digests.display());
    let actual = sha512_hex(archive)?;
    if actual != expected {
        return Err(SupError::VerificationFailed(format!(
            "SHA512 mismatch for {}: expected {expected}, got {actual}",
            archive.display()
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // sha512("hello\n")
    const HELLO_SHA512: &str = "e7c22b994c59d9cf2b48e549b1e24666636045930d3da7c1acb299d1c3b7f931f94aae41edda2c2b207a36e10f8bcb8d45223e54878f5b316e7ce3b6bc019629";

    fn digests(hex: &str) -> String {
        format!(
            "# BLAKE2B HASH\n\
             0123abcd  stage3.tar.xz\n\
             # SHA512 HASH\n\
             {hex}  stage3.tar.xz\n\
             # SHA512 HASH\n\
             ffff  stage3.tar.xz.CONTENTS.gz\n"
        )
    }

    #[test]
    fn test_parse_sha512_digests() {
        let entries = parse_sha512_digests(&digests("ABCD"));
        assert_eq!(
            entries,
            vec![
                ("abcd".to_string(), "stage3.tar.xz".to_string()),
                ("ffff".to_string(), "stage3.tar.xz.CONTENTS.gz".to_string()),
            ],
        );
    }

    #[test]
    fn test_verify_sha512() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("stage3.tar.xz");
        let digests_path = dir.path().join("stage3.tar.xz.DIGESTS");
        std::fs::write(&archive, "hello\n").unwrap();

        std::fs::write(&digests_path, digests(HELLO_SHA512)).unwrap();
        verify_sha512(&archive, &digests_path).unwrap();

        std::fs::write(&digests_path, digests(&"0".repeat(128))).unwrap();
        let err = verify_sha512(&archive, &digests_path).unwrap_err();
        assert!(matches!(err, SupError::VerificationFailed(_)));

        std::fs::write(&digests_path, "# BLAKE2B HASH\n0123  stage3.tar.xz\n").unwrap();
        let err = verify_sha512(&archive, &digests_path).unwrap_err();
        assert!(matches!(err, SupError::VerificationFailed(_)));
    }
}
