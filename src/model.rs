//! Shared data model: patterns/sets, retry policy, flow control, and the
//! effective request produced by the Config Resolver.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A named template, addressable by the Dynamic Expander.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Pattern {
    pub template: String,
}

/// The `dynamics` section of the authored document.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Dynamics {
    #[serde(default)]
    pub patterns: IndexMap<String, Pattern>,
    #[serde(default)]
    pub sets: IndexMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl Method {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Some(Self::Get),
            "POST" => Some(Self::Post),
            "PUT" => Some(Self::Put),
            "PATCH" => Some(Self::Patch),
            "DELETE" => Some(Self::Delete),
            "HEAD" => Some(Self::Head),
            "OPTIONS" => Some(Self::Options),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceType {
    Sequential,
    Concurrent,
}

/// `true`/`"max"` = full jitter; `"min"` = equal jitter; absent/`false` =
/// no jitter. Any other non-boolean string is a validation error (resolved
/// open question, see DESIGN.md).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Jitter {
    None,
    Full,
    Equal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStrategy {
    Fixed,
    Exponential,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff_strategy: BackoffStrategy,
    pub backoff_seconds: f64,
    pub multiplier: f64,
    pub max_backoff_seconds: Option<f64>,
    pub max_elapsed_seconds: Option<f64>,
    pub jitter: Jitter,
    pub retry_on_status: Vec<u16>,
    pub retry_on_network_errors: bool,
    pub retry_on_timeouts: bool,
}

/// Tri-state needed by retry precedence: a key can be absent from the
/// authored mapping, explicitly `null` (disabling retries and stopping
/// descent), or carry a concrete policy.
#[derive(Debug, Clone)]
pub enum RetryPrecedence {
    Absent,
    Disabled,
    Set(RetryPolicy),
}

impl RetryPrecedence {
    #[must_use]
    pub fn policy(&self) -> Option<&RetryPolicy> {
        match self {
            Self::Set(policy) => Some(policy),
            Self::Absent | Self::Disabled => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FlowControl {
    pub delay_seconds: u64,
    pub timeout_seconds: u64,
}

/// The fully-merged, resolved-modulo-deferred specification for one HTTP
/// call. Identity is `(sequence_index, request_index)`, both 1-based.
#[derive(Debug, Clone)]
pub struct EffectiveRequest {
    pub sequence_name: String,
    pub sequence_index: usize,
    pub request_key: String,
    pub request_index: usize,
    pub method: Method,
    pub url_root: String,
    pub url_path: String,
    pub headers: serde_yaml::Value,
    pub body: serde_yaml::Value,
    pub query: serde_yaml::Value,
    pub flow_control: FlowControl,
    pub retry: RetryPrecedence,
}
