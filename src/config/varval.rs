use std::path::Path;

use super::is_comment;
use crate::errors::SupError;
use crate::utils::fs;

/// Whether `line` looks like `KEY=value` with no whitespace before the `=`
pub fn is_kv_line(line: &str) -> bool {
    let line = line.trim_start();
    match line.find('=') {
        Some(eq) => {
            let key = &line[..eq];
            !key.is_empty() && !key.contains(char::is_whitespace)
        }
        None => false,
    }
}

fn line_key(line: &str) -> Option<&str> {
    if is_comment(line) {
        return None;
    }

    let (key, _) = line.split_once('=')?;
    let key = key.trim();
    (!key.is_empty()).then_some(key)
}

fn line_value(line: &str) -> String {
    let (_, value) = line.split_once('=').unwrap_or((line, ""));
    value
        .trim_matches(|c: char| c == '"' || c.is_whitespace())
        .to_string()
}

pub fn get_value_text(text: &str, key: &str) -> Option<String> {
    text.lines()
        .find(|line| line_key(line) == Some(key))
        .map(line_value)
}

/// Rewrites the first `key` line, or appends one.
/// Output always ends with a newline.
pub fn set_value_text(text: &str, key: &str, value: &str, quoted: bool) -> String {
    let kv = if quoted {
        format!("{key}=\"{value}\"")
    } else {
        format!("{key}={value}")
    };

    let mut lines: Vec<&str> = text.lines().collect();
    match lines.iter().position(|line| line_key(line) == Some(key)) {
        Some(i) => lines[i] = &kv,
        None => lines.push(&kv),
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// Union of whitespace-separated tokens, keeping first-seen order
pub fn merge_tokens(current: &str, new: &[&str]) -> String {
    let mut tokens: Vec<&str> = Vec::new();
    let all = current
        .split_whitespace()
        .chain(new.iter().flat_map(|t| t.split_whitespace()));

    for token in all {
        if !tokens.contains(&token) {
            tokens.push(token);
        }
    }

    tokens.join(" ")
}

pub fn get_value(path: &Path, key: &str) -> Result<Option<String>, SupError> {
    let text = fs::read_or_empty(path)?;
    Ok(get_value_text(&text, key))
}

/// Returns whether the file changed
pub fn set_value(path: &Path, key: &str, value: &str, quoted: bool) -> Result<bool, SupError> {
    let text = fs::read_or_empty(path)?;
    fs::write_if_changed(path, &set_value_text(&text, key, value, quoted))
}

/// Adds `tokens` to the quoted value of `key`. Tokens already present stay put.
pub fn merge_value(path: &Path, key: &str, tokens: &[&str]) -> Result<bool, SupError> {
    let text = fs::read_or_empty(path)?;
    let current = get_value_text(&text, key).unwrap_or_default();
    let merged = merge_tokens(&current, tokens);

    fs::write_if_changed(path, &set_value_text(&text, key, &merged, true))
}
