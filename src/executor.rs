//! The Request Executor: turns one `EffectiveRequest` into a sent HTTP call,
//! materializing any `$deferred` markers immediately before each attempt and
//! driving the attempt through the Retry Controller.

use crate::error::Error;
use crate::model::{Dynamics, EffectiveRequest, Method};
use crate::retry::{self, AttemptOutcome};
use crate::value::Value;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Outcome of sending one `EffectiveRequest`, including every retry
/// attempt. This is the unit the Artifact Writer turns into a results row.
#[derive(Debug, Clone)]
pub struct RequestOutcome {
    pub sequence_name: String,
    pub sequence_index: usize,
    pub request_key: String,
    pub request_index: usize,
    pub method: Method,
    pub url: String,
    pub started_at: DateTime<Utc>,
    pub status: Option<u16>,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
    pub elapsed: Duration,
    pub attempts: u32,
    pub error: Option<String>,
}

impl RequestOutcome {
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.status.is_some_and(|s| (200..300).contains(&s)) && self.error.is_none()
    }
}

#[derive(Clone)]
pub struct Executor {
    client: reqwest::Client,
    dynamics: Dynamics,
    secrets: Option<HashMap<String, String>>,
    redact: bool,
}

impl Executor {
    /// # Errors
    /// Returns an error if the underlying HTTP client cannot be constructed.
    pub fn new(dynamics: Dynamics, secrets: Option<HashMap<String, String>>, redact: bool) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::runtime(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            dynamics,
            secrets,
            redact,
        })
    }

    /// Sends `request`, retrying per its resolved retry policy.
    pub async fn execute(&self, request: &EffectiveRequest) -> RequestOutcome {
        let url = join_url(&request.url_root, &request.url_path);
        let policy = request.retry.policy();
        let started_at = Utc::now();
        let overall_start = Instant::now();

        let outcome = retry::execute(policy, |_attempt| {
            let url = url.clone();
            async move { self.send_once(request, &url).await }
        })
        .await;

        let elapsed = overall_start.elapsed();

        match outcome.result {
            Ok((status, content_type, body)) => RequestOutcome {
                sequence_name: request.sequence_name.clone(),
                sequence_index: request.sequence_index,
                request_key: request.request_key.clone(),
                request_index: request.request_index,
                method: request.method,
                url,
                started_at,
                status: Some(status),
                content_type,
                body,
                elapsed,
                attempts: outcome.attempts,
                error: None,
            },
            Err(e) => {
                let (status, content_type, body) = match outcome.last_value {
                    Some((status, content_type, body)) => (Some(status), content_type, body),
                    None => (None, None, Vec::new()),
                };
                RequestOutcome {
                    sequence_name: request.sequence_name.clone(),
                    sequence_index: request.sequence_index,
                    request_key: request.request_key.clone(),
                    request_index: request.request_index,
                    method: request.method,
                    url,
                    started_at,
                    status,
                    content_type,
                    body,
                    elapsed,
                    attempts: outcome.attempts,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn send_once(
        &self,
        request: &EffectiveRequest,
        url: &str,
    ) -> AttemptOutcome<(u16, Option<String>, Vec<u8>)> {
        let headers = match operator_resolve_deferred(&request.headers, &self.dynamics, self.secrets.as_ref(), self.redact) {
            Ok(v) => v,
            Err(e) => return AttemptOutcome::TerminalFailure(e.to_string()),
        };
        let body = match operator_resolve_deferred(&request.body, &self.dynamics, self.secrets.as_ref(), self.redact) {
            Ok(v) => v,
            Err(e) => return AttemptOutcome::TerminalFailure(e.to_string()),
        };
        let query = match operator_resolve_deferred(&request.query, &self.dynamics, self.secrets.as_ref(), self.redact) {
            Ok(v) => v,
            Err(e) => return AttemptOutcome::TerminalFailure(e.to_string()),
        };

        let mut builder = self
            .client
            .request(method_to_reqwest(request.method), url)
            .timeout(Duration::from_secs(request.flow_control.timeout_seconds));

        match header_map(&headers) {
            Ok(map) => builder = builder.headers(map),
            Err(e) => return AttemptOutcome::TerminalFailure(e.to_string()),
        }

        let query = query_pairs(&query);
        if !query.is_empty() {
            builder = builder.query(&query);
        }

        if !body.is_null() {
            match serde_json::to_vec(&body) {
                Ok(bytes) => builder = builder.body(bytes).header("content-type", "application/json"),
                Err(e) => return AttemptOutcome::TerminalFailure(e.to_string()),
            }
        }

        match builder.send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                let content_type = response
                    .headers()
                    .get("content-type")
                    .and_then(|v| v.to_str().ok())
                    .map(String::from);
                let bytes = match response.bytes().await {
                    Ok(b) => b.to_vec(),
                    Err(e) => return classify_network_error(&e),
                };
                let value = (status, content_type, bytes);

                if let Some(policy) = request.retry.policy() {
                    retry::status_outcome(status, policy, value)
                } else if (200..300).contains(&status) {
                    AttemptOutcome::Succeeded(value)
                } else {
                    AttemptOutcome::TerminalStatus(status, value)
                }
            }
            Err(e) => classify_network_error(&e),
        }
    }
}

/// Computes the URL a request would be sent to, for reporting (e.g.
/// dry-run log lines) without actually sending it.
#[must_use]
pub fn preview_url(request: &EffectiveRequest) -> String {
    join_url(&request.url_root, &request.url_path)
}

fn classify_network_error<T>(e: &reqwest::Error) -> AttemptOutcome<T> {
    if e.is_timeout() {
        AttemptOutcome::RetryableTimeout(e.to_string())
    } else if e.is_connect() {
        AttemptOutcome::RetryableNetwork(e.to_string())
    } else {
        AttemptOutcome::TerminalFailure(e.to_string())
    }
}

fn operator_resolve_deferred(
    value: &Value,
    dynamics: &Dynamics,
    secrets: Option<&HashMap<String, String>>,
    redact: bool,
) -> Result<Value, Error> {
    crate::operator::resolve_deferred(value, dynamics, secrets, redact)
}

fn method_to_reqwest(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
        Method::Head => reqwest::Method::HEAD,
        Method::Options => reqwest::Method::OPTIONS,
    }
}

fn header_map(value: &Value) -> Result<HeaderMap, Error> {
    let mut map = HeaderMap::new();
    if let Some(mapping) = value.as_mapping() {
        for (k, v) in mapping {
            let name = k
                .as_str()
                .ok_or_else(|| Error::runtime("header name must be a string"))?;
            let value_str = scalar_to_string(v);
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| Error::runtime(format!("invalid header name '{name}': {e}")))?;
            let header_value = HeaderValue::from_str(&value_str)
                .map_err(|e| Error::runtime(format!("invalid header value for '{name}': {e}")))?;
            map.insert(header_name, header_value);
        }
    }
    Ok(map)
}

fn query_pairs(value: &Value) -> Vec<(String, String)> {
    value
        .as_mapping()
        .map(|m| {
            m.iter()
                .filter_map(|(k, v)| k.as_str().map(|key| (key.to_string(), scalar_to_string(v))))
                .collect()
        })
        .unwrap_or_default()
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Null => String::new(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

fn join_url(root: &str, path: &str) -> String {
    let root = root.trim_end_matches('/');
    if path.is_empty() {
        return root.to_string();
    }
    if let Some(stripped) = path.strip_prefix('/') {
        format!("{root}/{stripped}")
    } else {
        format!("{root}/{path}")
    }
}
