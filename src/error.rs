//! Error taxonomy for the metrics query pipeline.
//!
//! Every failure is terminal for the process. The variants only exist so that
//! the single dispatcher in [`crate::cli::dispatch`] can log the right context
//! and pick an exit code.

use thiserror::Error;

/// Bad or missing operator input, detected before any network activity.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// `--metric` was something other than `buckets` or `accounts`.
    #[error("metric must be \"buckets\" or \"accounts\", got {0:?}")]
    InvalidMetric(String),

    /// A required option was absent or empty.
    #[error("missing required option: {field}")]
    Missing { field: &'static str },

    /// `start`/`end` did not parse as a non-zero base-10 integer.
    #[error("{field} must be a non-zero base-10 integer, got {value:?}")]
    InvalidEpoch { field: &'static str, value: String },

    /// `end` was supplied but precedes `start`.
    #[error("end ({end}) must not precede start ({start})")]
    EndBeforeStart { start: i64, end: i64 },
}

impl ValidationError {
    /// Name of the offending option, as logged under the `field` key.
    pub fn field(&self) -> &'static str {
        match self {
            ValidationError::InvalidMetric(_) => "metric",
            ValidationError::Missing { field } => *field,
            ValidationError::InvalidEpoch { field, .. } => *field,
            ValidationError::EndBeforeStart { .. } => "end",
        }
    }
}

/// Failure loading the optional TOML profile file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read profile {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse profile {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

/// Failure inside the request-signing primitive.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SigningError {
    #[error("invalid signing key material")]
    InvalidKey,

    #[error("request is missing the host header")]
    MissingHost,
}

/// Failure between "request built" and "response body fully read".
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to build HTTP client: {0}")]
    Build(#[source] reqwest::Error),

    #[error("failed to sign request: {0}")]
    Signing(#[from] SigningError),

    #[error("failed to encode request body: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("invalid header {name}: {detail}")]
    Header { name: String, detail: String },

    #[error("connection to {url} failed: {source}")]
    Connect {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed reading response body from {url}: {source}")]
    Body {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Failure handing a usage event to an in-process push client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PushError {
    #[error("push channel closed; usage event for action {action} dropped")]
    Closed { action: String },
}

/// Umbrella error returned up to the dispatcher.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("failed writing output: {0}")]
    Output(#[from] std::io::Error),
}

impl MetricsError {
    /// Every failure maps to exit code 1.
    pub fn exit_code(&self) -> i32 {
        1
    }
}
