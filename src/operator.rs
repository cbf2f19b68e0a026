//! The Operator Resolver: walks a value tree and rewrites `$dynamic`,
//! `$secrets`, `$timestamp`/`$func:timestamp` nodes into literals or
//! deferred markers.
//!
//! Each authored operator shape is normalized into a tagged `Detected`
//! variant in one pass (this module), so no downstream code ever
//! re-detects the `$`-prefixed mapping syntax.

use crate::error::Error;
use crate::model::Dynamics;
use serde_yaml::{Mapping, Value};
use std::collections::HashMap;

const RESERVED_KEYS: &[&str] = &["$dynamic", "$secrets", "$func", "$timestamp", "$deferred"];

/// Per-document resolution context. The pattern cache makes non-deferred
/// `$dynamic` references to the same pattern name resolve to the same
/// string everywhere in the document.
pub struct ResolveCtx<'a> {
    pub dynamics: &'a Dynamics,
    pub secrets: Option<&'a HashMap<String, String>>,
    pub redact: bool,
    pattern_cache: HashMap<String, String>,
}

impl<'a> ResolveCtx<'a> {
    #[must_use]
    pub fn new(dynamics: &'a Dynamics, secrets: Option<&'a HashMap<String, String>>, redact: bool) -> Self {
        Self {
            dynamics,
            secrets,
            redact,
            pattern_cache: HashMap::new(),
        }
    }
}

enum Detected {
    Dynamic { pattern: String, when_request: bool },
    Timestamp { format: String, when_request: bool },
    Secrets { key: String },
}

fn key(name: &str) -> Value {
    Value::String(name.to_string())
}

fn reserved_keys_present(map: &Mapping) -> Vec<&'static str> {
    RESERVED_KEYS
        .iter()
        .copied()
        .filter(|k| map.contains_key(key(k)))
        .collect()
}

fn detect_operator(map: &Mapping) -> Result<Option<Detected>, Error> {
    let present = reserved_keys_present(map);
    if present.is_empty() {
        return Ok(None);
    }
    if present.len() > 1 {
        return Err(Error::validation(format!(
            "mapping contains multiple operator keys: {present:?}"
        )));
    }

    let when = map.get(key("when")).and_then(Value::as_str);
    let sibling_format = map.get(key("format")).and_then(Value::as_str);

    match present[0] {
        "$dynamic" => {
            let pattern = map
                .get(key("$dynamic"))
                .and_then(Value::as_str)
                .ok_or_else(|| Error::validation("$dynamic value must be a pattern name string"))?
                .to_string();
            Ok(Some(Detected::Dynamic {
                pattern,
                when_request: when == Some("request"),
            }))
        }
        "$secrets" => {
            let k = map
                .get(key("$secrets"))
                .and_then(Value::as_str)
                .ok_or_else(|| Error::validation("$secrets value must be a key string"))?
                .to_string();
            Ok(Some(Detected::Secrets { key: k }))
        }
        "$timestamp" => {
            let ts_val = map.get(key("$timestamp")).unwrap_or(&Value::Null);
            let (format, nested_when) = parse_timestamp_value(ts_val)?;
            let when_request = when == Some("request") || nested_when.as_deref() == Some("request");
            Ok(Some(Detected::Timestamp { format, when_request }))
        }
        "$func" => {
            let func_name = map
                .get(key("$func"))
                .and_then(Value::as_str)
                .ok_or_else(|| Error::validation("$func value must be a string"))?;
            if func_name != "timestamp" {
                return Err(Error::validation(format!("unsupported $func '{func_name}'")));
            }
            let format = sibling_format.unwrap_or("iso_8601").to_string();
            Ok(Some(Detected::Timestamp {
                format,
                when_request: when == Some("request"),
            }))
        }
        "$deferred" => Err(Error::validation(
            "$deferred is a resolver-internal marker and cannot be authored",
        )),
        other => unreachable!("unhandled reserved key {other}"),
    }
}

fn parse_timestamp_value(value: &Value) -> Result<(String, Option<String>), Error> {
    match value {
        Value::String(s) => Ok((s.clone(), None)),
        Value::Null => Ok(("iso_8601".to_string(), None)),
        Value::Mapping(inner) => {
            let format = inner
                .get(key("format"))
                .and_then(Value::as_str)
                .unwrap_or("iso_8601")
                .to_string();
            let when = inner.get(key("when")).and_then(Value::as_str).map(String::from);
            Ok((format, when))
        }
        _ => Err(Error::validation("$timestamp value must be a string or mapping")),
    }
}

fn deferred_marker(kind: &str, extra_key: &str, extra_value: &str) -> Value {
    let mut inner = Mapping::new();
    inner.insert(key("kind"), Value::String(kind.to_string()));
    inner.insert(key(extra_key), Value::String(extra_value.to_string()));
    let mut outer = Mapping::new();
    outer.insert(key("$deferred"), Value::Mapping(inner));
    Value::Mapping(outer)
}

/// First-pass resolution: run once per document during Config Resolution.
/// Non-deferred `$dynamic`/`$timestamp`/`$secrets` nodes become literal
/// strings; `when: request` operators become `{$deferred: {...}}` markers
/// preserved verbatim in the resolved document.
pub fn resolve(value: &Value, ctx: &mut ResolveCtx<'_>) -> Result<Value, Error> {
    match value {
        Value::Mapping(map) => {
            if let Some(detected) = detect_operator(map)? {
                return resolve_detected(detected, ctx);
            }
            let mut new_map = Mapping::new();
            for (k, v) in map {
                new_map.insert(k.clone(), resolve(v, ctx)?);
            }
            Ok(Value::Mapping(new_map))
        }
        Value::Sequence(seq) => Ok(Value::Sequence(
            seq.iter().map(|v| resolve(v, ctx)).collect::<Result<_, _>>()?,
        )),
        Value::String(s) => Ok(Value::String(crate::secrets::interpolate_inline(
            s,
            ctx.secrets,
            ctx.redact,
        )?)),
        other => Ok(other.clone()),
    }
}

fn resolve_detected(detected: Detected, ctx: &mut ResolveCtx<'_>) -> Result<Value, Error> {
    match detected {
        Detected::Dynamic { pattern, when_request } => {
            if when_request {
                return Ok(deferred_marker("dynamic", "pattern", &pattern));
            }
            Ok(Value::String(expand_pattern(&pattern, ctx)?))
        }
        Detected::Timestamp { format, when_request } => {
            if when_request {
                return Ok(deferred_marker("timestamp", "format", &format));
            }
            Ok(Value::String(crate::dynamic::format_timestamp(&format)?))
        }
        Detected::Secrets { key } => Ok(Value::String(crate::secrets::resolve(
            &key,
            ctx.secrets,
            ctx.redact,
        )?)),
    }
}

fn expand_pattern(pattern: &str, ctx: &mut ResolveCtx<'_>) -> Result<String, Error> {
    if let Some(cached) = ctx.pattern_cache.get(pattern) {
        return Ok(cached.clone());
    }
    let def = ctx
        .dynamics
        .patterns
        .get(pattern)
        .ok_or_else(|| Error::unknown_pattern(pattern))?;
    let expanded = crate::dynamic::expand(&def.template, &ctx.dynamics.sets, ctx.secrets, ctx.redact)?;
    ctx.pattern_cache.insert(pattern.to_string(), expanded.clone());
    Ok(expanded)
}

/// Second-pass resolution: run immediately before each send. Replaces any
/// `{$deferred: {...}}` marker with a freshly-computed value; everything
/// else passes through unchanged (secrets and non-deferred dynamics were
/// already made literal in the first pass and are never re-expanded).
pub fn resolve_deferred(
    value: &Value,
    dynamics: &Dynamics,
    secrets: Option<&HashMap<String, String>>,
    redact: bool,
) -> Result<Value, Error> {
    match value {
        Value::Mapping(map) => {
            if map.len() == 1 {
                if let Some(inner) = map.get(key("$deferred")) {
                    return materialize_deferred(inner, dynamics, secrets, redact);
                }
            }
            let mut new_map = Mapping::new();
            for (k, v) in map {
                new_map.insert(k.clone(), resolve_deferred(v, dynamics, secrets, redact)?);
            }
            Ok(Value::Mapping(new_map))
        }
        Value::Sequence(seq) => Ok(Value::Sequence(
            seq.iter()
                .map(|v| resolve_deferred(v, dynamics, secrets, redact))
                .collect::<Result<_, _>>()?,
        )),
        other => Ok(other.clone()),
    }
}

fn materialize_deferred(
    inner: &Value,
    dynamics: &Dynamics,
    secrets: Option<&HashMap<String, String>>,
    redact: bool,
) -> Result<Value, Error> {
    let kind = crate::value::get(inner, "kind")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::validation("$deferred marker missing 'kind'"))?;
    match kind {
        "dynamic" => {
            let pattern = crate::value::get(inner, "pattern")
                .and_then(Value::as_str)
                .ok_or_else(|| Error::validation("$deferred dynamic marker missing 'pattern'"))?;
            let def = dynamics
                .patterns
                .get(pattern)
                .ok_or_else(|| Error::unknown_pattern(pattern))?;
            Ok(Value::String(crate::dynamic::expand(
                &def.template,
                &dynamics.sets,
                secrets,
                redact,
            )?))
        }
        "timestamp" => {
            let format = crate::value::get(inner, "format")
                .and_then(Value::as_str)
                .unwrap_or("iso_8601");
            Ok(Value::String(crate::dynamic::format_timestamp(format)?))
        }
        other => Err(Error::validation(format!("unknown deferred kind '{other}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Pattern;
    use indexmap::IndexMap;

    fn dynamics_with_pattern(name: &str, template: &str) -> Dynamics {
        let mut patterns = IndexMap::new();
        patterns.insert(
            name.to_string(),
            Pattern {
                template: template.to_string(),
            },
        );
        Dynamics {
            patterns,
            sets: IndexMap::new(),
        }
    }

    fn yaml(s: &str) -> Value {
        serde_yaml::from_str(s).unwrap()
    }

    #[test]
    fn non_deferred_dynamic_resolves_to_literal() {
        let dynamics = dynamics_with_pattern("uid", "u-${hex:4}");
        let mut ctx = ResolveCtx::new(&dynamics, None, false);
        let node = yaml("$dynamic: uid");
        let resolved = resolve(&node, &mut ctx).unwrap();
        let s = resolved.as_str().unwrap();
        assert!(s.starts_with("u-"));
        assert_eq!(s.len(), 6);
    }

    #[test]
    fn same_pattern_name_is_cached_across_document() {
        let dynamics = dynamics_with_pattern("uid", "${hex:16}");
        let mut ctx = ResolveCtx::new(&dynamics, None, false);
        let node = yaml("a: {$dynamic: uid}\nb: {$dynamic: uid}\n");
        let resolved = resolve(&node, &mut ctx).unwrap();
        assert_eq!(
            crate::value::get(&resolved, "a"),
            crate::value::get(&resolved, "b")
        );
    }

    #[test]
    fn deferred_dynamic_becomes_marker() {
        let dynamics = dynamics_with_pattern("uid", "u-${hex:4}");
        let mut ctx = ResolveCtx::new(&dynamics, None, false);
        let node = yaml("$dynamic: uid\nwhen: request\n");
        let resolved = resolve(&node, &mut ctx).unwrap();
        assert!(crate::value::contains_key(&resolved, "$deferred"));
    }

    #[test]
    fn deferred_marker_resolves_fresh_value_each_time() {
        let dynamics = dynamics_with_pattern("uid", "u-${hex:8}");
        let node = yaml("$deferred:\n  kind: dynamic\n  pattern: uid\n");
        let a = resolve_deferred(&node, &dynamics, None, false).unwrap();
        let b = resolve_deferred(&node, &dynamics, None, false).unwrap();
        // Both match the pattern shape; values may coincide but the path
        // re-expands independently rather than reusing a cache.
        assert!(a.as_str().unwrap().starts_with("u-"));
        assert!(b.as_str().unwrap().starts_with("u-"));
    }

    #[test]
    fn unknown_pattern_is_validation_error() {
        let dynamics = Dynamics::default();
        let mut ctx = ResolveCtx::new(&dynamics, None, false);
        let node = yaml("$dynamic: missing");
        assert!(resolve(&node, &mut ctx).is_err());
    }

    #[test]
    fn secrets_operator_resolves_value() {
        let dynamics = Dynamics::default();
        let mut secrets = HashMap::new();
        secrets.insert("TOKEN".to_string(), "abc".to_string());
        let mut ctx = ResolveCtx::new(&dynamics, Some(&secrets), false);
        let node = yaml("$secrets: TOKEN");
        let resolved = resolve(&node, &mut ctx).unwrap();
        assert_eq!(resolved.as_str(), Some("abc"));
    }

    #[test]
    fn timestamp_shorthand_resolves_immediately() {
        let dynamics = Dynamics::default();
        let mut ctx = ResolveCtx::new(&dynamics, None, false);
        let node = yaml("$timestamp: epoch_s");
        let resolved = resolve(&node, &mut ctx).unwrap();
        assert!(resolved.as_str().unwrap().chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn timestamp_nested_form_with_deferral() {
        let dynamics = Dynamics::default();
        let mut ctx = ResolveCtx::new(&dynamics, None, false);
        let node = yaml("$timestamp:\n  format: epoch_ms\n  when: request\n");
        let resolved = resolve(&node, &mut ctx).unwrap();
        assert!(crate::value::contains_key(&resolved, "$deferred"));
    }

    #[test]
    fn inline_secret_interpolation_inside_plain_strings() {
        let dynamics = Dynamics::default();
        let mut secrets = HashMap::new();
        secrets.insert("TOKEN".to_string(), "xyz".to_string());
        let mut ctx = ResolveCtx::new(&dynamics, Some(&secrets), false);
        let node = yaml("Authorization: 'Bearer { $secrets: TOKEN }'\n");
        let resolved = resolve(&node, &mut ctx).unwrap();
        assert_eq!(
            crate::value::get(&resolved, "Authorization").and_then(Value::as_str),
            Some("Bearer xyz")
        );
    }

    #[test]
    fn multiple_reserved_keys_is_error() {
        let dynamics = Dynamics::default();
        let mut ctx = ResolveCtx::new(&dynamics, None, false);
        let node = yaml("$dynamic: uid\n$secrets: TOKEN\n");
        assert!(resolve(&node, &mut ctx).is_err());
    }
}
