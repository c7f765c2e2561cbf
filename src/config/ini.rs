use std::path::Path;

use super::{assignment_key, section_header};
use crate::errors::SupError;
use crate::utils::fs;

/// A `[name]` section and the entries to set in it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub name: String,
    pub entries: Vec<(String, String)>,
}

impl Section {
    pub fn new<K, V>(name: &str, entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            name: name.to_string(),
            entries: entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[derive(Debug)]
struct Block {
    header: Option<String>,
    name: Option<String>,
    lines: Vec<String>,
}

impl Block {
    fn entry(key: &str, value: &str, spaced: bool) -> String {
        if spaced {
            format!("{key} = {value}")
        } else {
            format!("{key}={value}")
        }
    }

    /// Index just past the last non-blank line
    fn content_end(&self) -> usize {
        self.lines
            .iter()
            .rposition(|l| !l.trim().is_empty())
            .map_or(0, |i| i + 1)
    }

    fn set(&mut self, key: &str, value: &str, spaced: bool) {
        let existing = self
            .lines
            .iter()
            .position(|l| assignment_key(l) == Some(key));

        match existing {
            Some(i) => {
                let line = &self.lines[i];
                let (lhs, current) = line.split_once('=').unwrap_or((line.as_str(), ""));
                if current.trim() == value {
                    return;
                }

                let line_spaced = lhs.ends_with(char::is_whitespace);
                self.lines[i] = Self::entry(key, value, line_spaced);
            }
            None => {
                let at = self.content_end();
                self.lines.insert(at, Self::entry(key, value, spaced));
            }
        }
    }

    fn replace(&mut self, entries: &[(String, String)], spaced: bool) {
        let trailing_blanks = self.lines.len() - self.content_end();
        self.lines = entries
            .iter()
            .map(|(k, v)| Self::entry(k, v, spaced))
            .chain(std::iter::repeat(String::new()).take(trailing_blanks))
            .collect();
    }
}

#[derive(Debug)]
struct Doc {
    blocks: Vec<Block>,
}

impl Doc {
    fn parse(text: &str) -> Self {
        let mut blocks = vec![Block {
            header: None,
            name: None,
            lines: Vec::new(),
        }];

        for line in text.lines() {
            if let Some(name) = section_header(line) {
                blocks.push(Block {
                    header: Some(line.to_string()),
                    name: Some(name.to_string()),
                    lines: Vec::new(),
                });
                continue;
            }

            if let Some(block) = blocks.last_mut() {
                block.lines.push(line.to_string());
            }
        }

        Self { blocks }
    }

    /// Whether existing entries are written `key = value`
    fn spaced(&self) -> bool {
        self.blocks
            .iter()
            .flat_map(|b| b.lines.iter())
            .filter(|l| assignment_key(l).is_some())
            .any(|l| l.split_once('=').is_some_and(|(lhs, _)| lhs.ends_with(char::is_whitespace)))
    }

    fn is_empty(&self) -> bool {
        self.blocks
            .iter()
            .all(|b| b.header.is_none() && b.lines.iter().all(|l| l.trim().is_empty()))
    }

    fn find(&self, name: &str) -> Option<usize> {
        self.blocks
            .iter()
            .position(|b| b.name.as_deref() == Some(name))
    }

    fn append(&mut self, section: &Section, spaced: bool) {
        if self.is_empty() {
            self.blocks.clear();
        } else if let Some(last) = self.blocks.last_mut() {
            if last.lines.last().map_or(true, |l| !l.trim().is_empty()) {
                last.lines.push(String::new());
            }
        }

        self.blocks.push(Block {
            header: Some(format!("[{}]", section.name)),
            name: Some(section.name.clone()),
            lines: section
                .entries
                .iter()
                .map(|(k, v)| Block::entry(k, v, spaced))
                .collect(),
        });
    }

    fn render(&self) -> String {
        let mut out = String::new();
        for block in &self.blocks {
            for line in block.header.iter().chain(block.lines.iter()) {
                out.push_str(line);
                out.push('\n');
            }
        }

        out
    }
}

/// Applies `sections` to an INI text. With `merge`, listed keys are set and
/// other keys kept; without it, each listed section's body is replaced.
/// Missing sections are appended.
pub fn set_sections_text(text: &str, sections: &[Section], merge: bool) -> String {
    let mut doc = Doc::parse(text);
    let spaced = doc.spaced();

    for section in sections {
        match doc.find(&section.name) {
            Some(i) if merge => {
                for (key, value) in &section.entries {
                    doc.blocks[i].set(key, value, spaced);
                }
            }
            Some(i) => doc.blocks[i].replace(&section.entries, spaced),
            None => doc.append(section, spaced),
        }
    }

    doc.render()
}

/// Returns whether the file changed
pub fn set_sections(path: &Path, sections: &[Section], merge: bool) -> Result<bool, SupError> {
    let text = fs::read_or_empty(path)?;
    fs::write_if_changed(path, &set_sections_text(&text, sections, merge))
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPOS_CONF: &str = "\
[DEFAULT]
main-repo = gentoo

# the main tree
[gentoo]
location = /var/db/repos/gentoo
sync-type = rsync
sync-uri = rsync://rsync.gentoo.org/gentoo-portage
auto-sync = yes
";

    #[test]
    fn test_merge_sets_existing_and_new_keys() {
        let section = Section::new(
            "gentoo",
            [("sync-uri", "rsync://mirror.example/gentoo-portage"), ("sync-rsync-verify-metamanifest", "yes")],
        );
        let out = set_sections_text(REPOS_CONF, &[section], true);

        assert_eq!(
            "\
[DEFAULT]
main-repo = gentoo

# the main tree
[gentoo]
location = /var/db/repos/gentoo
sync-type = rsync
sync-uri = rsync://mirror.example/gentoo-portage
auto-sync = yes
sync-rsync-verify-metamanifest = yes
",
            out
        );
    }

    #[test]
    fn test_replace_section_body() {
        let text = "[Match]\nName=eth0\n\n[Network]\nDHCP=yes\nDNS=1.1.1.1\n";
        let section = Section::new("Match", [("Name", "enp1s0")]);

        assert_eq!(
            "[Match]\nName=enp1s0\n\n[Network]\nDHCP=yes\nDNS=1.1.1.1\n",
            set_sections_text(text, &[section], false)
        );
    }

    #[test]
    fn test_new_file() {
        let sections = [
            Section::new("Match", [("Name", "eth0")]),
            Section::new("Network", [("DHCP", "ipv4")]),
        ];

        assert_eq!(
            "[Match]\nName=eth0\n\n[Network]\nDHCP=ipv4\n",
            set_sections_text("", &sections, false)
        );
    }

    #[test]
    fn test_idempotent() {
        let sections = [Section::new("gentoo", [("sync-uri", "rsync://x/gentoo-portage")])];
        let once = set_sections_text(REPOS_CONF, &sections, true);
        let twice = set_sections_text(&once, &sections, true);

        assert_eq!(once, twice);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gentoo.conf");
        std::fs::write(&path, REPOS_CONF).unwrap();

        assert!(set_sections(&path, &sections, true).unwrap());
        assert!(!set_sections(&path, &sections, true).unwrap());
    }

    #[test]
    fn test_keeps_unrelated_comments() {
        let text = "# managed elsewhere\n[A]\n; note\nx=1\n";
        let out = set_sections_text(text, &[Section::new("A", [("y", "2")])], true);

        assert_eq!("# managed elsewhere\n[A]\n; note\nx=1\ny=2\n", out);
    }
}
