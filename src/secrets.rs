//! The Secret Resolver: looks up keys in a caller-supplied mapping and
//! performs inline `{ $secrets: KEY }` string interpolation.

use crate::error::Error;
use std::collections::HashMap;

pub const REDACTED: &str = "***REDACTED***";

/// Resolves a single secret key.
///
/// If `redact` is set, the sentinel is returned instead of the real value —
/// unless a secrets map *was* supplied and it lacks the key, in which case
/// the lookup still fails. This lets `validate`/`resolve` run without
/// `--secrets` (every reference redacted, nothing fails) while still
/// catching a genuinely wrong key when a secrets file is present.
pub fn resolve(
    key: &str,
    secrets: Option<&HashMap<String, String>>,
    redact: bool,
) -> Result<String, Error> {
    if redact {
        if let Some(map) = secrets {
            if !map.contains_key(key) {
                return Err(Error::missing_secret(key));
            }
        }
        return Ok(REDACTED.to_string());
    }

    secrets
        .and_then(|map| map.get(key))
        .cloned()
        .ok_or_else(|| Error::missing_secret(key))
}

/// Parses a `KEY=VALUE` secrets file. Lines starting with `#` are comments;
/// blank lines are ignored.
pub fn parse_file(content: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            out.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    out
}

/// Substitutes every `{ $secrets: KEY }` span in `input` (arbitrary inner
/// spacing allowed) with the resolved secret value. Text that merely
/// resembles the pattern but doesn't complete it (unclosed brace, missing
/// `$secrets` marker) is left untouched.
pub fn interpolate_inline(
    input: &str,
    secrets: Option<&HashMap<String, String>>,
    redact: bool,
) -> Result<String, Error> {
    let mut out = String::with_capacity(input.len());
    let mut remaining = input;

    while let Some(start) = remaining.find('{') {
        let (before, after_brace) = remaining.split_at(start);
        let after_brace = &after_brace[1..];

        match parse_inline_span(after_brace) {
            Some((key, rest)) => {
                out.push_str(before);
                out.push_str(&resolve(key, secrets, redact)?);
                remaining = rest;
            }
            None => {
                out.push_str(before);
                out.push('{');
                remaining = after_brace;
            }
        }
    }

    out.push_str(remaining);
    Ok(out)
}

/// Parses `<ws> $secrets <ws> : <ws> KEY <ws> }` immediately following an
/// opening `{`. Returns the key and the remainder of the string after the
/// closing `}` on success.
fn parse_inline_span(s: &str) -> Option<(&str, &str)> {
    let s = s.trim_start();
    let s = s.strip_prefix("$secrets")?;
    let s = s.trim_start();
    let s = s.strip_prefix(':')?;
    let s = s.trim_start();
    let end = s.find(|c: char| c == '}' || c.is_whitespace())?;
    let key = &s[..end];
    if key.is_empty() {
        return None;
    }
    let rest = s[end..].trim_start();
    let rest = rest.strip_prefix('}')?;
    Some((key, rest))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secrets_map() -> HashMap<String, String> {
        let mut m = HashMap::new();
        m.insert("API_KEY".to_string(), "abc123".to_string());
        m
    }

    #[test]
    fn resolve_returns_value() {
        let map = secrets_map();
        assert_eq!(resolve("API_KEY", Some(&map), false).unwrap(), "abc123");
    }

    #[test]
    fn resolve_missing_key_errors() {
        let map = secrets_map();
        assert!(resolve("NOPE", Some(&map), false).is_err());
    }

    #[test]
    fn resolve_without_map_errors_when_not_redacting() {
        assert!(resolve("API_KEY", None, false).is_err());
    }

    #[test]
    fn redact_without_secrets_map_succeeds() {
        assert_eq!(resolve("ANYTHING", None, true).unwrap(), REDACTED);
    }

    #[test]
    fn redact_with_map_still_validates_key_presence() {
        let map = secrets_map();
        assert!(resolve("NOPE", Some(&map), true).is_err());
        assert_eq!(resolve("API_KEY", Some(&map), true).unwrap(), REDACTED);
    }

    #[test]
    fn parse_file_skips_comments_and_blanks() {
        let content = "# comment\nAPI_KEY=abc123\n\nSECOND=value\n";
        let parsed = parse_file(content);
        assert_eq!(parsed.get("API_KEY").unwrap(), "abc123");
        assert_eq!(parsed.get("SECOND").unwrap(), "value");
        assert_eq!(parsed.len(), 2);
    }

    #[test]
    fn inline_interpolation_substitutes_span() {
        let map = secrets_map();
        let result =
            interpolate_inline("Bearer { $secrets: API_KEY }", Some(&map), false).unwrap();
        assert_eq!(result, "Bearer abc123");
    }

    #[test]
    fn inline_interpolation_tolerates_tight_spacing() {
        let map = secrets_map();
        let result = interpolate_inline("{$secrets:API_KEY}", Some(&map), false).unwrap();
        assert_eq!(result, "abc123");
    }

    #[test]
    fn inline_interpolation_leaves_unrelated_braces_alone() {
        let map = secrets_map();
        let result = interpolate_inline("{not_an_operator}", Some(&map), false).unwrap();
        assert_eq!(result, "{not_an_operator}");
    }

    #[test]
    fn inline_interpolation_multiple_spans() {
        let mut map = secrets_map();
        map.insert("OTHER".to_string(), "xyz".to_string());
        let result = interpolate_inline(
            "{ $secrets: API_KEY }-{ $secrets: OTHER }",
            Some(&map),
            false,
        )
        .unwrap();
        assert_eq!(result, "abc123-xyz");
    }
}
