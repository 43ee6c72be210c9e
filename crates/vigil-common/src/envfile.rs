//! Shell-style `KEY=VALUE` file parsing for the encoder profile.
//!
//! The format is what operators already maintain by hand: one assignment per
//! line, `#` comments, blank lines, optional single or double quotes around
//! the value. Lines without `=` are skipped.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

/// Parse an env-style file from disk.
pub fn load_env_file(path: &Path) -> Result<BTreeMap<String, String>> {
    let content =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(parse_env_str(&content))
}

/// Parse env-style content.
pub fn parse_env_str(content: &str) -> BTreeMap<String, String> {
    let mut values = BTreeMap::new();
    for line in content.lines() {
        let stripped = line.trim();
        if stripped.is_empty() || stripped.starts_with('#') {
            continue;
        }
        let Some((key, value)) = stripped.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        values.insert(key.to_string(), unquote(value.trim()).to_string());
    }
    values
}

fn unquote(value: &str) -> &str {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            return &value[1..value.len() - 1];
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_assignments_comments_and_quotes() {
        let parsed = parse_env_str(
            r#"
# slate profile
YT_KEY=abcd-1234
PRESET="veryfast"
OVERLAY_TEXT='Transmissão de contingência'
BROKEN LINE
EMPTY=
"#,
        );

        assert_eq!(parsed["YT_KEY"], "abcd-1234");
        assert_eq!(parsed["PRESET"], "veryfast");
        assert_eq!(parsed["OVERLAY_TEXT"], "Transmissão de contingência");
        assert_eq!(parsed["EMPTY"], "");
        assert!(!parsed.contains_key("BROKEN LINE"));
    }

    #[test]
    fn value_may_contain_equals() {
        let parsed = parse_env_str("SCENE=life=size=1280x720:rate=30\n");
        assert_eq!(parsed["SCENE"], "life=size=1280x720:rate=30");
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_env_file(&dir.path().join("absent.env")).is_err());
    }
}
