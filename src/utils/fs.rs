use std::fs;
use std::io::Write;
use std::path::Path;

use crate::errors::SupError;

pub fn file_exists<P>(path: P) -> bool
where
    P: AsRef<Path>,
{
    path.as_ref().exists()
}

/// Reads `path`, treating a missing file as empty
pub fn read_or_empty(path: &Path) -> Result<String, SupError> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(text),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(err) => Err(SupError::FileError(
            err,
            format!("read {}", path.display()),
        )),
    }
}

pub fn read(path: &Path) -> Result<String, SupError> {
    fs::read_to_string(path)
        .map_err(|err| SupError::FileError(err, format!("read {}", path.display())))
}

/// Writes `text` to `path` unless the file already holds exactly `text`.
/// Returns whether the file was written.
pub fn write_if_changed(path: &Path, text: &str) -> Result<bool, SupError> {
    if read_or_empty(path)? == text && path.exists() {
        return Ok(false);
    }

    fs::write(path, text)
        .map_err(|err| SupError::FileError(err, format!("write {}", path.display())))?;

    Ok(true)
}

pub fn append(path: &Path, text: &str) -> Result<(), SupError> {
    let mut f = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|err| SupError::FileError(err, format!("open {} for append", path.display())))?;

    f.write_all(text.as_bytes())
        .map_err(|err| SupError::FileError(err, format!("append to {}", path.display())))
}

pub fn create_dir_all(path: &Path) -> Result<(), SupError> {
    fs::create_dir_all(path)
        .map_err(|err| SupError::FileError(err, format!("mkdir -p {}", path.display())))
}

/// Points `link` at `target`, replacing whatever `link` was
pub fn force_symlink(target: &Path, link: &Path) -> Result<(), SupError> {
    if link.symlink_metadata().is_ok() {
        fs::remove_file(link)
            .map_err(|err| SupError::FileError(err, format!("remove {}", link.display())))?;
    }

    std::os::unix::fs::symlink(target, link).map_err(|err| {
        SupError::FileError(
            err,
            format!("symlink {} -> {}", link.display(), target.display()),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_if_changed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("foo.conf");

        assert!(write_if_changed(&path, "a=b\n").unwrap());
        assert!(!write_if_changed(&path, "a=b\n").unwrap());
        assert!(write_if_changed(&path, "a=c\n").unwrap());
        assert_eq!("a=c\n", read(&path).unwrap());
    }

    #[test]
    fn test_write_if_changed_empty_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty");

        assert!(write_if_changed(&path, "").unwrap());
        assert!(path.exists());
    }

    #[test]
    fn test_force_symlink() {
        let dir = tempfile::tempdir().unwrap();
        let link = dir.path().join("localtime");

        force_symlink(Path::new("/usr/share/zoneinfo/UTC"), &link).unwrap();
        force_symlink(Path::new("/usr/share/zoneinfo/Asia/Bangkok"), &link).unwrap();

        assert_eq!(
            Path::new("/usr/share/zoneinfo/Asia/Bangkok"),
            fs::read_link(&link).unwrap()
        );
    }
}
