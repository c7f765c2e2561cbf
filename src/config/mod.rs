//! Line-oriented editing of the three config dialects sup-rs touches:
//! shell-style `KEY=value` files, `[Section]` INI files, and the
//! brace-nested `section { key = value }` format of lvm.conf.
//!
//! Every writer rewrites only the lines it owns and leaves the file
//! untouched when nothing changed, so applying a manifest twice is a no-op.

pub mod ini;
pub mod nested;
pub mod uncomment;
pub mod varval;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::errors::SupError;
use crate::utils::fs;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Dialect {
    KeyValue,
    BracketSection,
    BraceNested,
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::KeyValue => "key-value",
            Self::BracketSection => "bracket-section",
            Self::BraceNested => "brace-nested",
        };

        f.write_str(s)
    }
}

pub(crate) fn is_comment(line: &str) -> bool {
    let line = line.trim_start();
    line.starts_with('#') || line.starts_with(';')
}

/// Name inside a `[Section]` header line
pub(crate) fn section_header(line: &str) -> Option<&str> {
    let inner = line.trim().strip_prefix('[')?.strip_suffix(']')?;
    if inner.is_empty() || inner.contains(['[', ']']) {
        return None;
    }

    Some(inner.trim())
}

/// Key of an `key = value` or `key=value` line
pub(crate) fn assignment_key(line: &str) -> Option<&str> {
    if is_comment(line) {
        return None;
    }

    let (key, _) = line.split_once('=')?;
    let key = key.trim();
    if key.is_empty() || key.contains(char::is_whitespace) {
        return None;
    }

    Some(key)
}

/// Guesses the dialect of a config text, or None when it matches none
pub fn classify_text(text: &str) -> Option<Dialect> {
    let content: Vec<&str> = text
        .lines()
        .filter(|l| !l.trim().is_empty() && !is_comment(l))
        .collect();

    if content.is_empty() {
        return None;
    }

    if nested::has_block_with_assignment(text) {
        return Some(Dialect::BraceNested);
    }

    let headers = content.iter().filter(|l| section_header(l).is_some()).count();
    let all_entries = content
        .iter()
        .all(|l| section_header(l).is_some() || assignment_key(l).is_some());

    if headers > 0 && all_entries {
        return Some(Dialect::BracketSection);
    }

    let all_kv = content.iter().all(|l| varval::is_kv_line(l));
    if all_kv {
        return Some(Dialect::KeyValue);
    }

    None
}

fn is_lvm_conf(path: &Path) -> bool {
    path.file_name().is_some_and(|name| name == "lvm.conf")
}

/// Dialect of the file at `path`. A file named lvm.conf is always brace-nested.
pub fn classify(path: &Path) -> Result<Dialect, SupError> {
    if is_lvm_conf(path) {
        return Ok(Dialect::BraceNested);
    }

    let text = fs::read(path)?;
    classify_text(&text).ok_or_else(|| SupError::UnknownConfigFormat(path.display().to_string()))
}

/// Like `classify`, but a missing, empty or unrecognized file gives None
fn classify_existing(path: &Path) -> Result<Option<Dialect>, SupError> {
    if is_lvm_conf(path) {
        return Ok(Some(Dialect::BraceNested));
    }

    Ok(classify_text(&fs::read_or_empty(path)?))
}

/// Config writes for one run. Remembers each file's dialect so it is
/// inferred once per path, and collects the paths actually modified.
#[derive(Debug, Default)]
pub struct ConfigStore {
    dialects: HashMap<PathBuf, Dialect>,
    modified: Vec<PathBuf>,
}

impl ConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dialect(&mut self, path: &Path) -> Result<Dialect, SupError> {
        if let Some(dialect) = self.dialects.get(path) {
            return Ok(*dialect);
        }

        let dialect = classify(path)?;
        tracing::debug!("{} is {dialect}", path.display());
        self.dialects.insert(path.to_path_buf(), dialect);

        Ok(dialect)
    }

    /// Claims `path` for `dialect`, failing if it is already known as another.
    /// On first touch an existing file's content decides what it is.
    fn claim(&mut self, path: &Path, dialect: Dialect) -> Result<(), SupError> {
        let known = match self.dialects.get(path) {
            Some(known) => Some(*known),
            None => classify_existing(path)?,
        };

        match known {
            Some(known) if known != dialect => Err(SupError::BadConfig(format!(
                "{} is {known}, not {dialect}",
                path.display()
            ))),
            _ => {
                self.dialects.insert(path.to_path_buf(), dialect);
                Ok(())
            }
        }
    }

    /// Notes a file written outside the dialect writers
    pub fn record(&mut self, path: &Path, changed: bool) {
        if changed && !self.modified.iter().any(|p| p == path) {
            tracing::info!("updated {}", path.display());
            self.modified.push(path.to_path_buf());
        }
    }

    pub fn modified(&self) -> &[PathBuf] {
        &self.modified
    }

    pub fn get_value(&mut self, path: &Path, key: &str) -> Result<Option<String>, SupError> {
        self.claim(path, Dialect::KeyValue)?;
        varval::get_value(path, key)
    }

    pub fn set_value(
        &mut self,
        path: &Path,
        key: &str,
        value: &str,
        quoted: bool,
    ) -> Result<(), SupError> {
        self.claim(path, Dialect::KeyValue)?;
        let changed = varval::set_value(path, key, value, quoted)?;
        self.record(path, changed);

        Ok(())
    }

    pub fn merge_value(&mut self, path: &Path, key: &str, tokens: &[&str]) -> Result<(), SupError> {
        self.claim(path, Dialect::KeyValue)?;
        let changed = varval::merge_value(path, key, tokens)?;
        self.record(path, changed);

        Ok(())
    }

    pub fn set_sections(
        &mut self,
        path: &Path,
        sections: &[ini::Section],
        merge: bool,
    ) -> Result<(), SupError> {
        self.claim(path, Dialect::BracketSection)?;
        let changed = ini::set_sections(path, sections, merge)?;
        self.record(path, changed);

        Ok(())
    }

    pub fn set_nested(
        &mut self,
        path: &Path,
        section: &str,
        key: &str,
        value: &str,
    ) -> Result<(), SupError> {
        self.claim(path, Dialect::BraceNested)?;
        let changed = nested::set_value(path, section, key, value)?;
        self.record(path, changed);

        Ok(())
    }

    /// Sets `key` in an existing file of any dialect.
    /// Key-value files ignore `section`; the other dialects require it.
    pub fn set_any(
        &mut self,
        path: &Path,
        section: Option<&str>,
        key: &str,
        value: &str,
    ) -> Result<(), SupError> {
        let dialect = self.dialect(path)?;
        match (dialect, section) {
            (Dialect::KeyValue, _) => self.set_value(path, key, value, true),
            (Dialect::BracketSection, Some(section)) => {
                let section = ini::Section::new(section, [(key, value)]);
                self.set_sections(path, &[section], true)
            }
            (Dialect::BraceNested, Some(section)) => self.set_nested(path, section, key, value),
            (dialect, None) => Err(SupError::BadConfig(format!(
                "{}: {dialect} config needs a section for key {key}",
                path.display()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_text() {
        let tests = [
            ("FOO=bar\n# comment\nBAZ=\"a b\"\n", Some(Dialect::KeyValue)),
            ("[Match]\nName=eth0\n\n[Network]\nDHCP=yes\n", Some(Dialect::BracketSection)),
            ("; comment\n[gentoo]\nlocation = /var/db/repos/gentoo\n", Some(Dialect::BracketSection)),
            ("global {\n\tuse_lvmetad = 0\n}\n", Some(Dialect::BraceNested)),
            ("devices {\n    # x\n    filter = [ \"a|.*|\" ]\n}\n", Some(Dialect::BraceNested)),
            ("FOO = bar\n", None),
            ("just some words\n", None),
            ("[Match]\nsome words\n", None),
            ("", None),
            ("# only comments\n\n", None),
        ];

        for (text, expected) in tests {
            assert_eq!(expected, classify_text(text), "{text:?}");
        }
    }

    #[test]
    fn test_classify_lvm_conf_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lvm.conf");
        std::fs::write(&path, "").unwrap();

        assert_eq!(Dialect::BraceNested, classify(&path).unwrap());
    }

    #[test]
    fn test_classify_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("foo.conf");
        std::fs::write(&path, "").unwrap();

        assert!(matches!(classify(&path), Err(SupError::UnknownConfigFormat(_))));
    }

    #[test]
    fn test_store_caches_dialect() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("make.conf");
        std::fs::write(&path, "USE=\"X\"\n").unwrap();

        let mut store = ConfigStore::new();
        assert_eq!(Dialect::KeyValue, store.dialect(&path).unwrap());

        // Once known, rewriting the file does not change the answer
        std::fs::write(&path, "[x]\na=b\n").unwrap();
        assert_eq!(Dialect::KeyValue, store.dialect(&path).unwrap());
        assert!(store.set_sections(&path, &[], true).is_err());
    }

    #[test]
    fn test_store_rejects_writer_of_another_dialect() {
        let dir = tempfile::tempdir().unwrap();
        let lvm = dir.path().join("lvm.conf");
        let ini = dir.path().join("eth0.network");
        let lvm_text = "global {\n\tuse_lvmetad = 1\n}\n";
        std::fs::write(&lvm, lvm_text).unwrap();
        std::fs::write(&ini, "[Match]\nName=eth0\n").unwrap();

        let mut store = ConfigStore::new();
        assert!(matches!(
            store.set_value(&lvm, "use_lvmetad", "0", true),
            Err(SupError::BadConfig(_))
        ));
        assert!(matches!(
            store.set_value(&ini, "Name", "eth1", false),
            Err(SupError::BadConfig(_))
        ));
        assert_eq!(lvm_text, fs::read(&lvm).unwrap());
        assert!(store.modified().is_empty());

        // Missing files take the dialect of their first writer
        let fresh = dir.path().join("vconsole.conf");
        store.set_value(&fresh, "KEYMAP", "us", false).unwrap();
        assert!(store.set_nested(&fresh, "global", "x", "1").is_err());
    }

    #[test]
    fn test_store_set_any() {
        let dir = tempfile::tempdir().unwrap();
        let kv = dir.path().join("make.conf");
        let ini = dir.path().join("eth0.network");
        let lvm = dir.path().join("lvm.conf");
        std::fs::write(&kv, "USE=\"X\"\n").unwrap();
        std::fs::write(&ini, "[Match]\nName=eth0\n").unwrap();
        std::fs::write(&lvm, "global {\n\tlocking_type = 1\n}\n").unwrap();

        let mut store = ConfigStore::new();
        store.set_any(&kv, None, "MAKEOPTS", "-j4").unwrap();
        store.set_any(&ini, Some("Network"), "DHCP", "yes").unwrap();
        store.set_any(&lvm, Some("global"), "use_lvmetad", "0").unwrap();

        assert_eq!("USE=\"X\"\nMAKEOPTS=\"-j4\"\n", fs::read(&kv).unwrap());
        assert_eq!("[Match]\nName=eth0\n\n[Network]\nDHCP=yes\n", fs::read(&ini).unwrap());
        assert_eq!(
            "global {\n\tlocking_type = 1\n\tuse_lvmetad = 0\n}\n",
            fs::read(&lvm).unwrap()
        );
        assert_eq!(3, store.modified().len());

        // Same values again: nothing modified
        let mut store = ConfigStore::new();
        store.set_any(&kv, None, "MAKEOPTS", "-j4").unwrap();
        store.set_any(&ini, Some("Network"), "DHCP", "yes").unwrap();
        store.set_any(&lvm, Some("global"), "use_lvmetad", "0").unwrap();
        assert!(store.modified().is_empty());

        assert!(store.set_any(&ini, None, "DHCP", "no").is_err());
    }
}
