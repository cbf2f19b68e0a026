//! The Dynamic Expander: expands `${...}` placeholders inside a pattern
//! template into a concrete string.
//!
//! Scans left-to-right, tracking delimiter spans one at a time, with `${` /
//! `}` delimiters and a richer set of placeholder kinds than a plain
//! variable substitution.

use crate::error::Error;
use chrono::Utc;
use indexmap::IndexMap;
use std::collections::HashMap;

const HEX_ALPHABET: &[u8] = b"0123456789ABCDEF";
const NUMERIC_ALPHABET: &[u8] = b"0123456789";
const ALPHA_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
const ALPHANUMERIC_ALPHABET: &[u8] =
    b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Expands every `${...}` placeholder in `template`. Unknown placeholders
/// are left verbatim, not an error.
pub fn expand(
    template: &str,
    sets: &IndexMap<String, Vec<String>>,
    secrets: Option<&HashMap<String, String>>,
    redact: bool,
) -> Result<String, Error> {
    let mut out = String::with_capacity(template.len());
    let mut remaining = template;

    while let Some(start) = remaining.find("${") {
        out.push_str(&remaining[..start]);
        let after_open = &remaining[start + 2..];

        let Some(end) = after_open.find('}') else {
            out.push_str("${");
            remaining = after_open;
            continue;
        };

        let spec = &after_open[..end];
        remaining = &after_open[end + 1..];

        match expand_placeholder(spec, sets, secrets, redact)? {
            Some(value) => out.push_str(&value),
            None => {
                // Unknown placeholder form: emit the whole span verbatim.
                out.push_str("${");
                out.push_str(spec);
                out.push('}');
            }
        }
    }

    out.push_str(remaining);
    Ok(out)
}

/// Expands a single placeholder body (the text between `${` and `}`).
/// Returns `Ok(None)` for unrecognized forms so the caller emits them
/// verbatim; returns `Err` only for recognized-but-invalid forms (bad
/// count, missing set, missing secret).
fn expand_placeholder(
    spec: &str,
    sets: &IndexMap<String, Vec<String>>,
    secrets: Option<&HashMap<String, String>>,
    redact: bool,
) -> Result<Option<String>, Error> {
    let spec = spec.trim();
    let body = spec.strip_prefix('@').unwrap_or(spec);

    if body == "uuidv4" {
        return Ok(Some(uuid::Uuid::new_v4().to_string()));
    }

    if body == "timestamp" {
        return Ok(Some(format_timestamp("iso_8601")?));
    }

    if let Some(fmt) = body.strip_prefix("timestamp:") {
        return Ok(Some(format_timestamp(fmt)?));
    }

    if let Some(name) = body.strip_prefix("choice:") {
        let values = sets.get(name).ok_or_else(|| Error::unknown_set(name))?;
        if values.is_empty() {
            return Err(Error::runtime(format!("dynamics set '{name}' is empty")));
        }
        let idx = fastrand::usize(..values.len());
        return Ok(Some(values[idx].clone()));
    }

    if let Some(key) = body.strip_prefix("secrets:") {
        return crate::secrets::resolve(key, secrets, redact).map(Some);
    }

    if let Some(n_str) = body.strip_prefix("hex:") {
        return Ok(Some(random_chars(n_str, HEX_ALPHABET)?));
    }
    if let Some(n_str) = body.strip_prefix("alphanumeric:") {
        return Ok(Some(random_chars(n_str, ALPHANUMERIC_ALPHABET)?));
    }
    if let Some(n_str) = body.strip_prefix("numeric:") {
        return Ok(Some(random_chars(n_str, NUMERIC_ALPHABET)?));
    }
    if let Some(n_str) = body.strip_prefix("alpha:") {
        return Ok(Some(random_chars(n_str, ALPHA_ALPHABET)?));
    }

    Ok(None)
}

fn random_chars(n_str: &str, alphabet: &[u8]) -> Result<String, Error> {
    let n: usize = n_str
        .trim()
        .parse()
        .map_err(|_| Error::runtime(format!("invalid placeholder count '{n_str}'")))?;
    Ok((0..n)
        .map(|_| alphabet[fastrand::usize(..alphabet.len())] as char)
        .collect())
}

pub fn format_timestamp(fmt: &str) -> Result<String, Error> {
    let now = Utc::now();
    match fmt {
        "iso_8601" => Ok(now.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)),
        "epoch_ms" => Ok(now.timestamp_millis().to_string()),
        "epoch_s" => Ok(now.timestamp().to_string()),
        other => Err(Error::validation(format!(
            "unknown timestamp format '{other}'"
        ))),
    }
}
