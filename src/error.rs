//! Error types for the harvesting pipeline.
//!
//! Three families live here:
//! - [`TransportError`]: what a remote capability (page transport, search
//!   backend, assistant API) reports for a single call.
//! - [`HarvestError`]: classification of a per-URL or per-question failure.
//!   These are always recovered locally and only ever logged or counted.
//! - [`ConfigError`]: startup failures. These are the only errors that
//!   abort a run.

use thiserror::Error;

/// Failure of a single call against a remote capability.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("remote returned status {code}")]
    Status { code: u16 },

    #[error("network error: {0}")]
    Network(String),

    #[error("unsupported content type: {0}")]
    UnsupportedContent(String),

    #[error("could not decode response: {0}")]
    Decode(String),
}

impl TransportError {
    /// Status codes that bot defenses and paywalls answer with.
    pub fn is_blocking_status(&self) -> bool {
        matches!(self, TransportError::Status { code } if matches!(code, 401 | 403 | 429 | 451))
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else if err.is_decode() {
            TransportError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            TransportError::Status {
                code: status.as_u16(),
            }
        } else {
            TransportError::Network(err.to_string())
        }
    }
}

/// A recovered failure for one URL or one question.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HarvestError {
    #[error("transport timed out after {attempts} attempt(s)")]
    TransportTimeout { attempts: u32 },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("content blocked: {0}")]
    ContentBlocked(String),

    #[error("content too short: {len} chars (needs more than {min})")]
    ContentInsufficient { len: usize, min: usize },

    #[error("remote job reported failure: {0}")]
    RemoteStatusFailure(String),

    #[error("remote job did not finish within {secs}s")]
    RemoteTimeout { secs: u64 },
}

/// Startup failures: bad registry, bad templates, bad config, missing secrets.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no valid `Name (TICKER)` entries found in {0}")]
    EmptyRegistry(String),

    #[error("template for field `{field}` is malformed: {reason}")]
    Template { field: String, reason: String },

    #[error("invalid configuration in {path}: {reason}")]
    Invalid { path: String, reason: String },

    #[error("missing required setting: {0}")]
    Missing(&'static str),
}
