//! Error handling for the PayloadStash engine.
//!
//! All errors collapse into a small set of `ErrorKind`s so the CLI driver can
//! map them onto the exit codes defined by the run contract: validation and
//! output-write failures are fatal (exit 9), everything else surfaces only
//! through the results artifacts.

use std::borrow::Cow;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{kind}: {message}")]
    Internal {
        kind: ErrorKind,
        message: Cow<'static, str>,
    },
}

/// Error categories, corresponding to the exit-code classes in the run
/// contract: `Validation` and `OutputWrite` are fatal and short-circuit
/// before any request is dispatched; `Runtime` covers everything else that
/// is caught and converted into a per-request failure rather than
/// propagated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Schema violation, duplicate names, unknown pattern, bad enum value.
    Validation,
    /// Could not create the run directory or write an output artifact.
    OutputWrite,
    /// Secret lookup failure, dynamic pattern failure, or other non-fatal
    /// condition encountered while resolving or sending a single request.
    Runtime,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Validation => "validation error",
            Self::OutputWrite => "output-write error",
            Self::Runtime => "runtime error",
        };
        f.write_str(s)
    }
}

impl Error {
    fn internal(kind: ErrorKind, message: impl Into<Cow<'static, str>>) -> Self {
        Self::Internal {
            kind,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Internal { kind, .. } => *kind,
            Self::Io(_) => ErrorKind::OutputWrite,
            Self::Network(_) => ErrorKind::Runtime,
            Self::Yaml(_) | Self::Json(_) => ErrorKind::Validation,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::internal(ErrorKind::Validation, message.into())
    }

    pub fn output_write(message: impl Into<String>) -> Self {
        Self::internal(ErrorKind::OutputWrite, message.into())
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::internal(ErrorKind::Runtime, message.into())
    }

    pub fn missing_secret(key: impl Into<String>) -> Self {
        Self::runtime(format!("secret '{}' is not present in the secrets map", key.into()))
    }

    pub fn unknown_pattern(name: impl Into<String>) -> Self {
        Self::validation(format!("no dynamics pattern named '{}'", name.into()))
    }

    pub fn unknown_set(name: impl Into<String>) -> Self {
        Self::runtime(format!("no dynamics set named '{}'", name.into()))
    }

    pub fn duplicate_sequence_name(name: impl Into<String>) -> Self {
        Self::validation(format!("duplicate sequence name '{}'", name.into()))
    }

    pub fn duplicate_request_key(sequence: impl Into<String>, key: impl Into<String>) -> Self {
        Self::validation(format!(
            "duplicate request key '{}' in sequence '{}'",
            key.into(),
            sequence.into()
        ))
    }
}
