//! The Config Resolver: validates the authored document, computes each
//! request's effective Headers/Body/Query/FlowControl/Retry, resolves
//! operator nodes, and emits the fully-resolved document.

use crate::error::Error;
use crate::model::{
    BackoffStrategy, Dynamics, EffectiveRequest, FlowControl, Jitter, Method, RetryPolicy,
    RetryPrecedence, SequenceType,
};
use crate::operator::{self, ResolveCtx};
use crate::value::{self, contains_key, get};
use serde_yaml::{Mapping, Value};
use std::collections::{HashMap, HashSet};

/// Whether a document is being validated as freshly authored (strict — a
/// `Request` may never carry `URLRoot`) or as a previously-resolved
/// document being re-validated (relaxed — resolved requests legitimately
/// carry an inlined `URLRoot`/`Retry`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationMode {
    Authored,
    Resolved,
}

/// Per-sequence bookkeeping the Sequence Scheduler needs.
#[derive(Debug, Clone)]
pub struct SequenceMeta {
    pub name: String,
    pub kind: SequenceType,
    pub concurrency_limit: Option<usize>,
    pub request_count: usize,
}

/// Output of the Config Resolver: the concrete request plan plus the
/// document to persist as `<cfg>-resolved.yml`.
pub struct ResolvedPlan {
    pub stash_name: String,
    pub sequences: Vec<SequenceMeta>,
    pub requests: Vec<EffectiveRequest>,
    pub resolved_document: Value,
    pub dynamics: Dynamics,
    pub inter_sequence_delay_seconds: u64,
}

fn s(name: &str) -> Value {
    Value::String(name.to_string())
}

fn required<'a>(container: &'a Value, key: &str, context: &str) -> Result<&'a Value, Error> {
    get(container, key).ok_or_else(|| Error::validation(format!("missing required field '{key}' in {context}")))
}

fn required_str<'a>(container: &'a Value, key: &str, context: &str) -> Result<&'a str, Error> {
    required(container, key, context)?
        .as_str()
        .ok_or_else(|| Error::validation(format!("field '{key}' in {context} must be a string")))
}

fn required_nonempty_str<'a>(container: &'a Value, key: &str, context: &str) -> Result<&'a str, Error> {
    let val = required_str(container, key, context)?;
    if val.is_empty() {
        return Err(Error::validation(format!("field '{key}' in {context} must be non-empty")));
    }
    Ok(val)
}

fn required_u64(container: &Value, key: &str, context: &str) -> Result<u64, Error> {
    let v = required(container, key, context)?;
    v.as_u64()
        .ok_or_else(|| Error::validation(format!("field '{key}' in {context} must be a non-negative integer")))
}

/// Rejects any mapping key not in `allowed`. Typed sections (`Request`,
/// `Retry`, `FlowControl`) are closed shapes; an unrecognized key is almost
/// always a typo and must fail validation rather than be silently ignored.
fn reject_unknown_keys(value: &Value, allowed: &[&str], context: &str) -> Result<(), Error> {
    let Some(mapping) = value.as_mapping() else {
        return Ok(());
    };
    for key in mapping.keys() {
        let Some(key_str) = key.as_str() else {
            return Err(Error::validation(format!("{context}: keys must be strings")));
        };
        if !allowed.contains(&key_str) {
            return Err(Error::validation(format!("{context}: unknown field '{key_str}'")));
        }
    }
    Ok(())
}

/// Parses the full document and produces a concrete request plan.
///
/// # Errors
/// Returns a `Validation` error for any schema violation, unknown `$dynamic`
/// pattern, duplicate name, or forbidden field; returns a `Runtime` error if
/// a referenced secret is missing.
pub fn resolve_document(
    raw: &str,
    secrets: Option<&HashMap<String, String>>,
    redact: bool,
) -> Result<ResolvedPlan, Error> {
    let doc: Value = serde_yaml::from_str(raw)?;
    let stash_config = required(&doc, "StashConfig", "document")?;

    let name = required_nonempty_str(stash_config, "Name", "StashConfig")?.to_string();

    let defaults = required(stash_config, "Defaults", "StashConfig")?;
    let url_root = required_nonempty_str(defaults, "URLRoot", "StashConfig.Defaults")?.to_string();
    let default_flow_control = parse_flow_control(
        required(defaults, "FlowControl", "StashConfig.Defaults")?,
        "StashConfig.Defaults.FlowControl",
    )?;

    let forced = get(stash_config, "Forced");

    let dynamics: Dynamics = match get(&doc, "dynamics") {
        Some(v) => serde_yaml::from_value(v.clone())?,
        None => Dynamics::default(),
    };

    let sequences_val = required(stash_config, "Sequences", "StashConfig")?;
    let sequences_seq = sequences_val
        .as_sequence()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::validation("StashConfig.Sequences must be a non-empty list"))?;

    let mut seen_sequence_names: HashSet<String> = HashSet::new();
    let mut sequence_metas = Vec::with_capacity(sequences_seq.len());
    let mut requests = Vec::new();
    let mut resolved_sequences = Vec::with_capacity(sequences_seq.len());

    let mut ctx = ResolveCtx::new(&dynamics, secrets, redact);

    for (seq_idx0, seq_val) in sequences_seq.iter().enumerate() {
        let sequence_index = seq_idx0 + 1;
        let seq_name = required_nonempty_str(seq_val, "Name", "sequence")?.to_string();
        if !seen_sequence_names.insert(seq_name.clone()) {
            return Err(Error::duplicate_sequence_name(seq_name));
        }

        let type_str = required_str(seq_val, "Type", &format!("sequence '{seq_name}'"))?;
        let kind = match type_str {
            "Sequential" => SequenceType::Sequential,
            "Concurrent" => SequenceType::Concurrent,
            other => {
                return Err(Error::validation(format!(
                    "sequence '{seq_name}': unknown Type '{other}' (expected Sequential or Concurrent)"
                )))
            }
        };

        let concurrency_limit = match kind {
            SequenceType::Concurrent => {
                let limit = required_u64(seq_val, "ConcurrencyLimit", &format!("sequence '{seq_name}'"))?;
                if limit < 1 {
                    return Err(Error::validation(format!(
                        "sequence '{seq_name}': ConcurrencyLimit must be >= 1"
                    )));
                }
                Some(limit as usize)
            }
            SequenceType::Sequential => {
                if contains_key(seq_val, "ConcurrencyLimit") {
                    return Err(Error::validation(format!(
                        "sequence '{seq_name}': ConcurrencyLimit is only valid for Concurrent sequences"
                    )));
                }
                None
            }
        };

        let requests_val = required(seq_val, "Requests", &format!("sequence '{seq_name}'"))?;
        let requests_seq = requests_val
            .as_sequence()
            .filter(|r| !r.is_empty())
            .ok_or_else(|| Error::validation(format!("sequence '{seq_name}': Requests must be a non-empty list")))?;

        let mut seen_request_keys: HashSet<String> = HashSet::new();
        let mut resolved_requests = Vec::with_capacity(requests_seq.len());

        for (req_idx0, item) in requests_seq.iter().enumerate() {
            let request_index = req_idx0 + 1;
            let item_map = item
                .as_mapping()
                .ok_or_else(|| Error::validation(format!("sequence '{seq_name}': request item must be a mapping")))?;
            if item_map.len() != 1 {
                return Err(Error::validation(format!(
                    "sequence '{seq_name}': request item must have exactly one key"
                )));
            }
            let (key_val, request_body) = item_map.iter().next().expect("checked len == 1");
            let request_key = key_val
                .as_str()
                .ok_or_else(|| Error::validation("request key must be a string"))?
                .to_string();
            if !seen_request_keys.insert(request_key.clone()) {
                return Err(Error::duplicate_request_key(seq_name.clone(), request_key));
            }

            if contains_key(request_body, "URLRoot") {
                return Err(Error::validation(format!(
                    "sequence '{seq_name}', request '{request_key}': URLRoot is forbidden inside a Request"
                )));
            }
            reject_unknown_keys(
                request_body,
                &["Method", "URLPath", "Headers", "Body", "Query", "FlowControl", "Retry"],
                &format!("sequence '{seq_name}', request '{request_key}'"),
            )?;

            let method_str = required_str(
                request_body,
                "Method",
                &format!("sequence '{seq_name}', request '{request_key}'"),
            )?;
            let method = Method::parse(method_str).ok_or_else(|| {
                Error::validation(format!(
                    "sequence '{seq_name}', request '{request_key}': unknown Method '{method_str}'"
                ))
            })?;
            let url_path = required_str(
                request_body,
                "URLPath",
                &format!("sequence '{seq_name}', request '{request_key}'"),
            )?
            .to_string();

            let headers_merged = merge_section(request_body, defaults, forced, "Headers");
            let body_merged = merge_section(request_body, defaults, forced, "Body");
            let query_merged = merge_section(request_body, defaults, forced, "Query");

            let headers = operator::resolve(&headers_merged, &mut ctx)?;
            let body = operator::resolve(&body_merged, &mut ctx)?;
            let query = operator::resolve(&query_merged, &mut ctx)?;

            let flow_control = overlay_flow_control(default_flow_control, get(request_body, "FlowControl"))?;

            let retry = retry_precedence(request_body, defaults, stash_config)?;

            let effective = EffectiveRequest {
                sequence_name: seq_name.clone(),
                sequence_index,
                request_key: request_key.clone(),
                request_index,
                method,
                url_root: url_root.clone(),
                url_path,
                headers,
                body,
                query,
                flow_control,
                retry,
            };

            resolved_requests.push(request_to_resolved_value(&request_key, &effective));
            requests.push(effective);
        }

        sequence_metas.push(SequenceMeta {
            name: seq_name.clone(),
            kind,
            concurrency_limit,
            request_count: requests_seq.len(),
        });

        resolved_sequences.push(sequence_to_resolved_value(
            seq_val,
            &seq_name,
            type_str,
            concurrency_limit,
            resolved_requests,
        ));
    }

    let resolved_document = build_resolved_document(stash_config, &doc, resolved_sequences);

    Ok(ResolvedPlan {
        stash_name: name,
        sequences: sequence_metas,
        requests,
        resolved_document,
        dynamics,
        inter_sequence_delay_seconds: default_flow_control.delay_seconds,
    })
}

fn merge_section(request: &Value, defaults: &Value, forced: Option<&Value>, section: &str) -> Value {
    let request_section = get(request, section);
    let defaults_section = get(defaults, section);
    let base = request_section.or(defaults_section);
    let overlay = forced.and_then(|f| get(f, section));
    value::shallow_merge(base, overlay).unwrap_or(Value::Null)
}

fn parse_flow_control(value: &Value, context: &str) -> Result<FlowControl, Error> {
    reject_unknown_keys(value, &["DelaySeconds", "TimeoutSeconds"], context)?;
    Ok(FlowControl {
        delay_seconds: required_u64(value, "DelaySeconds", context)?,
        timeout_seconds: required_u64(value, "TimeoutSeconds", context)?,
    })
}

fn overlay_flow_control(defaults: FlowControl, request_fc: Option<&Value>) -> Result<FlowControl, Error> {
    let Some(fc) = request_fc else {
        return Ok(defaults);
    };
    reject_unknown_keys(fc, &["DelaySeconds", "TimeoutSeconds"], "FlowControl")?;
    let delay_seconds = match get(fc, "DelaySeconds") {
        Some(v) => v
            .as_u64()
            .ok_or_else(|| Error::validation("FlowControl.DelaySeconds must be a non-negative integer"))?,
        None => defaults.delay_seconds,
    };
    let timeout_seconds = match get(fc, "TimeoutSeconds") {
        Some(v) => v
            .as_u64()
            .ok_or_else(|| Error::validation("FlowControl.TimeoutSeconds must be a non-negative integer"))?,
        None => defaults.timeout_seconds,
    };
    Ok(FlowControl {
        delay_seconds,
        timeout_seconds,
    })
}

/// Retry precedence: request → Defaults → StashConfig, stopping at the
/// first source where `Retry` is present in the authored mapping (even if
/// its value is `null`).
fn retry_precedence(request: &Value, defaults: &Value, stash_config: &Value) -> Result<RetryPrecedence, Error> {
    for container in [request, defaults, stash_config] {
        if contains_key(container, "Retry") {
            let v = get(container, "Retry").expect("checked contains_key");
            if v.is_null() {
                return Ok(RetryPrecedence::Disabled);
            }
            return Ok(RetryPrecedence::Set(parse_retry_policy(v)?));
        }
    }
    Ok(RetryPrecedence::Absent)
}

const RETRY_KEYS: &[&str] = &[
    "Attempts",
    "BackoffStrategy",
    "BackoffSeconds",
    "Multiplier",
    "MaxBackoffSeconds",
    "MaxElapsedSeconds",
    "Jitter",
    "RetryOnStatus",
    "RetryOnNetworkErrors",
    "RetryOnTimeouts",
];

fn parse_retry_policy(value: &Value) -> Result<RetryPolicy, Error> {
    reject_unknown_keys(value, RETRY_KEYS, "Retry")?;
    let attempts = required_u64(value, "Attempts", "Retry")?;
    if attempts < 1 {
        return Err(Error::validation("Retry.Attempts must be >= 1"));
    }

    let backoff_strategy = match required_str(value, "BackoffStrategy", "Retry")? {
        "fixed" => BackoffStrategy::Fixed,
        "exponential" => BackoffStrategy::Exponential,
        other => {
            return Err(Error::validation(format!(
                "Retry.BackoffStrategy must be 'fixed' or 'exponential', got '{other}'"
            )))
        }
    };

    let backoff_seconds = required(value, "BackoffSeconds", "Retry")?
        .as_f64()
        .ok_or_else(|| Error::validation("Retry.BackoffSeconds must be a number"))?;
    if backoff_seconds < 0.0 {
        return Err(Error::validation("Retry.BackoffSeconds must be >= 0"));
    }

    let multiplier = match get(value, "Multiplier") {
        Some(v) => {
            let m = v.as_f64().ok_or_else(|| Error::validation("Retry.Multiplier must be a number"))?;
            if m <= 0.0 {
                return Err(Error::validation("Retry.Multiplier must be > 0"));
            }
            m
        }
        None => 2.0,
    };

    let max_backoff_seconds = match get(value, "MaxBackoffSeconds") {
        Some(v) => Some(
            v.as_f64()
                .ok_or_else(|| Error::validation("Retry.MaxBackoffSeconds must be a number"))?,
        ),
        None => None,
    };

    let max_elapsed_seconds = match get(value, "MaxElapsedSeconds") {
        Some(v) => Some(
            v.as_f64()
                .ok_or_else(|| Error::validation("Retry.MaxElapsedSeconds must be a number"))?,
        ),
        None => None,
    };

    let jitter = match get(value, "Jitter") {
        None => Jitter::None,
        Some(Value::Bool(true)) => Jitter::Full,
        Some(Value::Bool(false)) => Jitter::None,
        Some(Value::String(s)) if s == "max" => Jitter::Full,
        Some(Value::String(s)) if s == "min" => Jitter::Equal,
        Some(other) => {
            return Err(Error::validation(format!(
                "Retry.Jitter must be a boolean, 'min', or 'max', got {other:?}"
            )))
        }
    };

    let retry_on_status = match get(value, "RetryOnStatus") {
        Some(v) => v
            .as_sequence()
            .ok_or_else(|| Error::validation("Retry.RetryOnStatus must be a list of integers"))?
            .iter()
            .map(|item| {
                item.as_u64()
                    .and_then(|n| u16::try_from(n).ok())
                    .ok_or_else(|| Error::validation("Retry.RetryOnStatus entries must be integers"))
            })
            .collect::<Result<Vec<_>, _>>()?,
        None => Vec::new(),
    };

    let retry_on_network_errors = get(value, "RetryOnNetworkErrors")
        .map_or(Ok(true), |v| {
            v.as_bool().ok_or_else(|| Error::validation("Retry.RetryOnNetworkErrors must be a boolean"))
        })?;
    let retry_on_timeouts = get(value, "RetryOnTimeouts").map_or(Ok(true), |v| {
        v.as_bool().ok_or_else(|| Error::validation("Retry.RetryOnTimeouts must be a boolean"))
    })?;

    Ok(RetryPolicy {
        attempts: attempts as u32,
        backoff_strategy,
        backoff_seconds,
        multiplier,
        max_backoff_seconds,
        max_elapsed_seconds,
        jitter,
        retry_on_status,
        retry_on_network_errors,
        retry_on_timeouts,
    })
}

fn retry_to_value(retry: &RetryPrecedence) -> Option<Value> {
    match retry {
        RetryPrecedence::Absent => None,
        RetryPrecedence::Disabled => Some(Value::Null),
        RetryPrecedence::Set(policy) => {
            let mut m = Mapping::new();
            m.insert(s("Attempts"), Value::from(policy.attempts));
            m.insert(
                s("BackoffStrategy"),
                Value::String(match policy.backoff_strategy {
                    BackoffStrategy::Fixed => "fixed".to_string(),
                    BackoffStrategy::Exponential => "exponential".to_string(),
                }),
            );
            m.insert(s("BackoffSeconds"), Value::from(policy.backoff_seconds));
            m.insert(s("Multiplier"), Value::from(policy.multiplier));
            if let Some(max) = policy.max_backoff_seconds {
                m.insert(s("MaxBackoffSeconds"), Value::from(max));
            }
            if let Some(max) = policy.max_elapsed_seconds {
                m.insert(s("MaxElapsedSeconds"), Value::from(max));
            }
            m.insert(
                s("Jitter"),
                match policy.jitter {
                    Jitter::None => Value::Bool(false),
                    Jitter::Full => Value::String("max".to_string()),
                    Jitter::Equal => Value::String("min".to_string()),
                },
            );
            m.insert(
                s("RetryOnStatus"),
                Value::Sequence(policy.retry_on_status.iter().map(|v| Value::from(*v)).collect()),
            );
            m.insert(s("RetryOnNetworkErrors"), Value::Bool(policy.retry_on_network_errors));
            m.insert(s("RetryOnTimeouts"), Value::Bool(policy.retry_on_timeouts));
            Some(Value::Mapping(m))
        }
    }
}

fn request_to_resolved_value(request_key: &str, effective: &EffectiveRequest) -> Value {
    let mut req_map = Mapping::new();
    req_map.insert(s("Method"), Value::String(effective.method.as_str().to_string()));
    req_map.insert(s("URLRoot"), Value::String(effective.url_root.clone()));
    req_map.insert(s("URLPath"), Value::String(effective.url_path.clone()));
    req_map.insert(s("Headers"), effective.headers.clone());
    req_map.insert(s("Body"), effective.body.clone());
    req_map.insert(s("Query"), effective.query.clone());

    let mut fc_map = Mapping::new();
    fc_map.insert(s("DelaySeconds"), Value::from(effective.flow_control.delay_seconds));
    fc_map.insert(s("TimeoutSeconds"), Value::from(effective.flow_control.timeout_seconds));
    req_map.insert(s("FlowControl"), Value::Mapping(fc_map));

    if let Some(retry_value) = retry_to_value(&effective.retry) {
        req_map.insert(s("Retry"), retry_value);
    }

    let mut item = Mapping::new();
    item.insert(s(request_key), Value::Mapping(req_map));
    Value::Mapping(item)
}

fn sequence_to_resolved_value(
    original: &Value,
    name: &str,
    type_str: &str,
    concurrency_limit: Option<usize>,
    requests: Vec<Value>,
) -> Value {
    let mut m = Mapping::new();
    m.insert(s("Name"), Value::String(name.to_string()));
    m.insert(s("Type"), Value::String(type_str.to_string()));
    if let Some(limit) = concurrency_limit {
        m.insert(s("ConcurrencyLimit"), Value::from(limit as u64));
    }
    // Preserve any extra top-level sequence keys the original authored.
    if let Some(orig_map) = original.as_mapping() {
        for (k, v) in orig_map {
            let key_str = k.as_str().unwrap_or("");
            if !matches!(key_str, "Name" | "Type" | "ConcurrencyLimit" | "Requests") {
                m.insert(k.clone(), v.clone());
            }
        }
    }
    m.insert(s("Requests"), Value::Sequence(requests));
    Value::Mapping(m)
}

fn build_resolved_document(stash_config: &Value, doc: &Value, resolved_sequences: Vec<Value>) -> Value {
    let mut resolved_stash = stash_config.as_mapping().cloned().unwrap_or_default();
    resolved_stash.insert(s("Sequences"), Value::Sequence(resolved_sequences));

    let mut resolved_doc = doc.as_mapping().cloned().unwrap_or_default();
    resolved_doc.insert(s("StashConfig"), Value::Mapping(resolved_stash));
    Value::Mapping(resolved_doc)
}

/// Re-validates a resolved document's structural shape, with `$deferred`
/// markers treated as opaque placeholders. Used by `validate`/`resolve` test
/// coverage for the "resolved document stays valid" property.
pub fn revalidate_resolved(document: &Value) -> Result<(), Error> {
    let stash_config = required(document, "StashConfig", "document")?;
    required_nonempty_str(stash_config, "Name", "StashConfig")?;
    let defaults = required(stash_config, "Defaults", "StashConfig")?;
    required_nonempty_str(defaults, "URLRoot", "StashConfig.Defaults")?;
    parse_flow_control(
        required(defaults, "FlowControl", "StashConfig.Defaults")?,
        "StashConfig.Defaults.FlowControl",
    )?;

    let sequences = required(stash_config, "Sequences", "StashConfig")?
        .as_sequence()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::validation("StashConfig.Sequences must be a non-empty list"))?;

    for seq in sequences {
        required_nonempty_str(seq, "Name", "sequence")?;
        let requests = required(seq, "Requests", "sequence")?
            .as_sequence()
            .filter(|r| !r.is_empty())
            .ok_or_else(|| Error::validation("sequence Requests must be a non-empty list"))?;
        for item in requests {
            let map = item
                .as_mapping()
                .ok_or_else(|| Error::validation("request item must be a mapping"))?;
            let (_, body) = map.iter().next().ok_or_else(|| Error::validation("empty request item"))?;
            required_str(body, "Method", "request")?;
            required_str(body, "URLPath", "request")?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r"
StashConfig:
  Name: Mini
  Defaults:
    URLRoot: https://x/y
    FlowControl: {DelaySeconds: 0, TimeoutSeconds: 5}
  Sequences:
    - Name: Solo
      Type: Sequential
      Requests:
        - Ping: {Method: GET, URLPath: /health}
";

    #[test]
    fn minimal_document_resolves_one_request() {
        let plan = resolve_document(MINIMAL, None, false).unwrap();
        assert_eq!(plan.requests.len(), 1);
        assert_eq!(plan.requests[0].url_root, "https://x/y");
        assert_eq!(plan.requests[0].url_path, "/health");
        assert_eq!(plan.requests[0].sequence_index, 1);
        assert_eq!(plan.requests[0].request_index, 1);
    }

    #[test]
    fn forced_overrides_default_body() {
        let doc = r"
StashConfig:
  Name: Test
  Defaults:
    URLRoot: https://x
    FlowControl: {DelaySeconds: 0, TimeoutSeconds: 5}
    Body: {team: blue}
  Forced:
    Body: {team: green}
  Sequences:
    - Name: Seq
      Type: Sequential
      Requests:
        - Req: {Method: POST, URLPath: /a}
";
        let plan = resolve_document(doc, None, false).unwrap();
        let body = &plan.requests[0].body;
        assert_eq!(get(body, "team").and_then(Value::as_str), Some("green"));
    }

    #[test]
    fn request_section_overrides_defaults_but_not_forced() {
        let doc = r"
StashConfig:
  Name: Test
  Defaults:
    URLRoot: https://x
    FlowControl: {DelaySeconds: 0, TimeoutSeconds: 5}
    Headers: {X-A: default, X-B: default}
  Forced:
    Headers: {X-B: forced}
  Sequences:
    - Name: Seq
      Type: Sequential
      Requests:
        - Req: {Method: GET, URLPath: /a, Headers: {X-A: request}}
";
        let plan = resolve_document(doc, None, false).unwrap();
        let headers = &plan.requests[0].headers;
        assert_eq!(get(headers, "X-A").and_then(Value::as_str), Some("request"));
        assert_eq!(get(headers, "X-B").and_then(Value::as_str), Some("forced"));
    }

    #[test]
    fn duplicate_sequence_name_is_rejected() {
        let doc = r"
StashConfig:
  Name: Test
  Defaults:
    URLRoot: https://x
    FlowControl: {DelaySeconds: 0, TimeoutSeconds: 5}
  Sequences:
    - Name: Dup
      Type: Sequential
      Requests: [{A: {Method: GET, URLPath: /a}}]
    - Name: Dup
      Type: Sequential
      Requests: [{B: {Method: GET, URLPath: /b}}]
";
        assert!(resolve_document(doc, None, false).is_err());
    }

    #[test]
    fn url_root_inside_request_is_rejected() {
        let doc = r"
StashConfig:
  Name: Test
  Defaults:
    URLRoot: https://x
    FlowControl: {DelaySeconds: 0, TimeoutSeconds: 5}
  Sequences:
    - Name: Seq
      Type: Sequential
      Requests:
        - Req: {Method: GET, URLPath: /a, URLRoot: https://evil}
";
        assert!(resolve_document(doc, None, false).is_err());
    }

    #[test]
    fn explicit_null_retry_disables_and_stops_descent() {
        let doc = r"
StashConfig:
  Name: Test
  Defaults:
    URLRoot: https://x
    FlowControl: {DelaySeconds: 0, TimeoutSeconds: 5}
    Retry: {Attempts: 5, BackoffStrategy: fixed, BackoffSeconds: 1}
  Sequences:
    - Name: Seq
      Type: Sequential
      Requests:
        - A: {Method: GET, URLPath: /a, Retry: null}
        - B: {Method: GET, URLPath: /b}
";
        let plan = resolve_document(doc, None, false).unwrap();
        assert!(matches!(plan.requests[0].retry, RetryPrecedence::Disabled));
        assert!(matches!(plan.requests[1].retry, RetryPrecedence::Set(_)));
    }

    #[test]
    fn retry_precedence_falls_through_to_top_level() {
        let doc = r"
StashConfig:
  Name: Test
  Retry: {Attempts: 2, BackoffStrategy: fixed, BackoffSeconds: 0}
  Defaults:
    URLRoot: https://x
    FlowControl: {DelaySeconds: 0, TimeoutSeconds: 5}
  Sequences:
    - Name: Seq
      Type: Sequential
      Requests:
        - A: {Method: GET, URLPath: /a}
";
        let plan = resolve_document(doc, None, false).unwrap();
        let RetryPrecedence::Set(policy) = &plan.requests[0].retry else {
            panic!("expected Set");
        };
        assert_eq!(policy.attempts, 2);
    }

    #[test]
    fn concurrency_limit_required_for_concurrent_sequence() {
        let doc = r"
StashConfig:
  Name: Test
  Defaults:
    URLRoot: https://x
    FlowControl: {DelaySeconds: 0, TimeoutSeconds: 5}
  Sequences:
    - Name: Seq
      Type: Concurrent
      Requests:
        - A: {Method: GET, URLPath: /a}
";
        assert!(resolve_document(doc, None, false).is_err());
    }

    #[test]
    fn flow_control_overlay_is_field_wise() {
        let doc = r"
StashConfig:
  Name: Test
  Defaults:
    URLRoot: https://x
    FlowControl: {DelaySeconds: 3, TimeoutSeconds: 5}
  Sequences:
    - Name: Seq
      Type: Sequential
      Requests:
        - A: {Method: GET, URLPath: /a, FlowControl: {TimeoutSeconds: 99}}
";
        let plan = resolve_document(doc, None, false).unwrap();
        assert_eq!(plan.requests[0].flow_control.delay_seconds, 3);
        assert_eq!(plan.requests[0].flow_control.timeout_seconds, 99);
    }

    #[test]
    fn resolved_document_revalidates() {
        let plan = resolve_document(MINIMAL, None, false).unwrap();
        revalidate_resolved(&plan.resolved_document).unwrap();
    }

    #[test]
    fn deferred_dynamic_preserved_in_resolved_document() {
        let doc = r"
StashConfig:
  Name: Test
  Defaults:
    URLRoot: https://x
    FlowControl: {DelaySeconds: 0, TimeoutSeconds: 5}
  Sequences:
    - Name: Seq
      Type: Sequential
      Requests:
        - A:
            Method: POST
            URLPath: /a
            Body:
              id: {$dynamic: uid, when: request}
dynamics:
  patterns:
    uid:
      template: 'u-${hex:4}'
";
        let plan = resolve_document(doc, None, false).unwrap();
        assert!(value::contains_key(&plan.requests[0].body, "id"));
        let id_node = value::get(&plan.requests[0].body, "id").unwrap();
        assert!(value::contains_key(id_node, "$deferred"));
    }

    #[test]
    fn unknown_key_in_request_is_rejected() {
        let doc = r"
StashConfig:
  Name: Test
  Defaults:
    URLRoot: https://x
    FlowControl: {DelaySeconds: 0, TimeoutSeconds: 5}
  Sequences:
    - Name: Seq
      Type: Sequential
      Requests:
        - A: {Method: GET, URLPath: /a, Bogus: oops}
";
        assert!(resolve_document(doc, None, false).is_err());
    }

    #[test]
    fn unknown_key_in_retry_is_rejected() {
        let doc = r"
StashConfig:
  Name: Test
  Defaults:
    URLRoot: https://x
    FlowControl: {DelaySeconds: 0, TimeoutSeconds: 5}
  Sequences:
    - Name: Seq
      Type: Sequential
      Requests:
        - A: {Method: GET, URLPath: /a, Retry: {Attempts: 1, BackoffStrategy: fixed, BackoffSeconds: 0, Bogus: oops}}
";
        assert!(resolve_document(doc, None, false).is_err());
    }

    #[test]
    fn unknown_key_in_flow_control_is_rejected() {
        let doc = r"
StashConfig:
  Name: Test
  Defaults:
    URLRoot: https://x
    FlowControl: {DelaySeconds: 0, TimeoutSeconds: 5}
  Sequences:
    - Name: Seq
      Type: Sequential
      Requests:
        - A: {Method: GET, URLPath: /a, FlowControl: {TimeoutSeconds: 1, Bogus: oops}}
";
        assert!(resolve_document(doc, None, false).is_err());
    }
}
