use std::path::{Path, PathBuf};

use super::{argv, PackageManager};
use crate::errors::SupError;
use crate::utils::fs;

pub struct Portage;

impl PackageManager for Portage {
    fn name(&self) -> &'static str {
        "portage"
    }

    fn install_cmd(&self, names: &[&str], flags: &[&str]) -> Vec<String> {
        argv(&["emerge"], flags, names)
    }

    fn remove_cmd(&self, names: &[&str], flags: &[&str]) -> Vec<String> {
        argv(&["emerge", "--depclean"], flags, names)
    }
}

/// Per-package config directories under /etc/portage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageFile {
    Use,
    AcceptKeywords,
    License,
    Mask,
}

impl PackageFile {
    pub fn dir_name(&self) -> &'static str {
        match self {
            Self::Use => "package.use",
            Self::AcceptKeywords => "package.accept_keywords",
            Self::License => "package.license",
            Self::Mask => "package.mask",
        }
    }
}

/// Reduces an atom like `>=app-foo/bar-1.2.3:0` to `bar`
pub fn normalize_package_name(atom: &str) -> &str {
    let mut name = match atom.find('/') {
        Some(idx) if idx > 0 => &atom[idx + 1..],
        _ => atom,
    };

    if let Some(colon) = name.find(':') {
        if colon > 0 {
            name = &name[..colon];
        }
    }

    // The version starts at the last dash followed by a digit
    let bytes = name.as_bytes();
    let version = name
        .rmatch_indices('-')
        .map(|(dash, _)| dash)
        .find(|&dash| dash > 0 && bytes.get(dash + 1).is_some_and(u8::is_ascii_digit));

    match version {
        Some(dash) => &name[..dash],
        None => name,
    }
}

/// Appends `lines` to `<portage_dir>/<kind>/<file_name>`, skipping lines the
/// file already has. When `<kind>` is a plain file it is appended to instead.
/// Returns the path written, or `None` if nothing was new.
pub fn append_package_lines(
    portage_dir: &Path,
    kind: PackageFile,
    file_name: &str,
    lines: &[String],
) -> Result<Option<PathBuf>, SupError> {
    let base = portage_dir.join(kind.dir_name());
    let path = if base.is_file() {
        base
    } else {
        fs::create_dir_all(&base)?;
        base.join(file_name)
    };

    let existing = fs::read_or_empty(&path)?;
    let mut new_lines: Vec<&str> = Vec::new();
    for line in lines.iter().map(|l| l.trim()) {
        if line.is_empty() || existing.lines().any(|l| l.trim() == line) || new_lines.contains(&line) {
            continue;
        }

        new_lines.push(line);
    }

    if new_lines.is_empty() {
        return Ok(None);
    }

    let mut text = String::new();
    if !existing.is_empty() && !existing.ends_with('\n') {
        text.push('\n');
    }
    for line in new_lines {
        text.push_str(line);
        text.push('\n');
    }

    fs::append(&path, &text)?;
    tracing::info!("updated {}", path.display());

    Ok(Some(path))
}
