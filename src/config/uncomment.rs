/// Folds a locale name or locale.gen line for comparison:
/// `#en_US.UTF-8 UTF-8` and `en_US.utf8` both start with `en_usutf8`
fn fold(s: &str) -> String {
    s.trim()
        .chars()
        .filter(|c| !matches!(c, '.' | '-' | '#' | ' '))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Prose comments look like `# text`, entries like `#en_US.UTF-8 UTF-8`
fn is_prose(line: &str) -> bool {
    line.strip_prefix('#')
        .is_some_and(|rest| rest.starts_with(char::is_whitespace) && rest.trim_start().starts_with(char::is_alphanumeric))
}

fn matches_locale(line: &str, locale: &str) -> bool {
    let folded = fold(locale);
    !folded.is_empty() && fold(line).starts_with(&folded)
}

/// Uncomments every locale.gen entry matching one of `locales`.
/// With `append_missing`, wanted entries with no line at all are appended verbatim.
pub fn enable_locales(text: &str, locales: &[&str], append_missing: bool) -> String {
    let mut lines: Vec<String> = text.lines().map(String::from).collect();
    let mut seen = vec![false; locales.len()];

    for line in lines.iter_mut() {
        if is_prose(line) {
            continue;
        }

        for (i, locale) in locales.iter().enumerate() {
            if !matches_locale(line, locale) {
                continue;
            }

            seen[i] = true;
            if let Some(uncommented) = line.strip_prefix('#') {
                tracing::info!("enabling locale {}", uncommented.trim());
                *line = uncommented.to_string();
            }
        }
    }

    for (locale, seen) in locales.iter().zip(seen) {
        if seen {
            continue;
        }

        if append_missing {
            lines.push(locale.to_string());
        } else {
            tracing::warn!("locale {locale} not found in locale.gen");
        }
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// Entries of an i18n SUPPORTED list matching `locales`
pub fn supported_entries(supported: &str, locales: &[&str]) -> Vec<String> {
    let mut entries: Vec<String> = Vec::new();
    for locale in locales {
        for line in supported.lines() {
            let line = line.trim();
            if matches_locale(line, locale) && !entries.iter().any(|e| e == line) {
                entries.push(line.to_string());
            }
        }
    }

    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOCALE_GEN: &str = "\
# Configuration file for locale-gen
#  en_US ISO-8859-1
#en_US ISO-8859-1
#en_US.UTF-8 UTF-8
#th_TH.UTF-8 UTF-8
#th_TH TIS-620";

    #[test]
    fn test_enable_locales() {
        let out = enable_locales(LOCALE_GEN, &["en_US.UTF-8", "th_TH.UTF-8"], false);

        assert_eq!(
            "\
# Configuration file for locale-gen
#  en_US ISO-8859-1
#en_US ISO-8859-1
en_US.UTF-8 UTF-8
th_TH.UTF-8 UTF-8
#th_TH TIS-620
",
            out
        );

        // Enabled lines stay enabled
        assert_eq!(out, enable_locales(&out, &["en_US.UTF-8"], false));
    }

    #[test]
    fn test_enable_locales_append_missing() {
        let out = enable_locales("# empty\n", &["de_DE.UTF-8 UTF-8"], true);

        assert_eq!("# empty\nde_DE.UTF-8 UTF-8\n", out);
        assert_eq!(out, enable_locales(&out, &["de_DE.UTF-8 UTF-8"], true));
    }

    #[test]
    fn test_supported_entries() {
        let supported = "en_US.UTF-8 UTF-8\nen_US ISO-8859-1\nen_ZA.UTF-8 UTF-8\n";

        assert_eq!(
            vec!["en_US.UTF-8 UTF-8".to_string()],
            supported_entries(supported, &["en_US.utf8", "en-US.UTF-8"])
        );
    }
}
