use std::path::Path;

use super::assignment_key;
use crate::errors::SupError;
use crate::utils::fs;

/// Code part of a line, without a trailing `#` comment outside quotes
fn strip_comment(line: &str) -> &str {
    let mut quoted = false;
    for (i, c) in line.char_indices() {
        match c {
            '"' => quoted = !quoted,
            '#' if !quoted => return &line[..i],
            _ => {}
        }
    }

    line
}

/// Name of a `name {` line opening a block
fn block_open(code: &str) -> Option<&str> {
    let name = code.trim().strip_suffix('{')?.trim();
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ' ');

    valid.then_some(name)
}

fn brace_delta(code: &str) -> i32 {
    let mut quoted = false;
    let mut delta = 0;
    for c in code.chars() {
        match c {
            '"' => quoted = !quoted,
            '{' if !quoted => delta += 1,
            '}' if !quoted => delta -= 1,
            _ => {}
        }
    }

    delta
}

/// Whether `text` has a top-level block containing a `key = value` line
pub(super) fn has_block_with_assignment(text: &str) -> bool {
    let mut depth = 0;
    let mut in_block = false;
    for line in text.lines() {
        let code = strip_comment(line);
        if depth == 0 && block_open(code).is_some() {
            in_block = true;
        } else if in_block && depth == 1 && assignment_key(code).is_some() {
            return true;
        }

        depth += brace_delta(code);
        if depth <= 0 {
            depth = 0;
            in_block = false;
        }
    }

    false
}

/// Sets `key = value` directly inside top-level block `section`.
/// An existing key keeps its indentation; a new key goes right before
/// the closing brace. `value` is written verbatim.
pub fn set_value_text(text: &str, section: &str, key: &str, value: &str) -> Result<String, SupError> {
    let mut lines: Vec<String> = text.lines().map(String::from).collect();
    let mut depth = 0;
    let mut in_target = false;
    let mut indent: Option<String> = None;

    for i in 0..lines.len() {
        let code = strip_comment(&lines[i]).to_string();
        let depth_before = depth;

        if depth_before == 0 && block_open(&code) == Some(section) {
            in_target = true;
        } else if in_target && depth_before == 1 {
            if let Some(k) = assignment_key(&code) {
                let line_indent: String = lines[i]
                    .chars()
                    .take_while(|c| c.is_whitespace())
                    .collect();

                if k == key {
                    let (_, current) = code.split_once('=').unwrap_or((code.as_str(), ""));
                    if current.trim() != value {
                        lines[i] = format!("{line_indent}{key} = {value}");
                    }

                    return Ok(render(&lines));
                }

                indent.get_or_insert(line_indent);
            }
        }

        depth += brace_delta(&code);

        if in_target && depth == 0 {
            if depth_before == 0 {
                return Err(SupError::BadConfig(format!(
                    "one-line block {section} is not supported"
                )));
            }

            let indent = indent.unwrap_or_else(|| "\t".to_string());
            lines.insert(i, format!("{indent}{key} = {value}"));
            return Ok(render(&lines));
        }
    }

    Err(SupError::BadConfig(format!("no block named {section}")))
}

fn render(lines: &[String]) -> String {
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// Returns whether the file changed
pub fn set_value(path: &Path, section: &str, key: &str, value: &str) -> Result<bool, SupError> {
    let text = fs::read(path)?;
    let updated = set_value_text(&text, section, key, value)
        .map_err(|err| SupError::BadConfig(format!("{}: {err}", path.display())))?;

    fs::write_if_changed(path, &updated)
}
