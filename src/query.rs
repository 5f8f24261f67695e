//! Query construction: raw operator options in, validated [`QueryRequest`] out.
//!
//! Validation runs in a fixed order and stops at the first failure so the
//! operator sees exactly one diagnostic per invocation:
//!
//! 1. metric kind (generic mode only; legacy mode is always `buckets`)
//! 2. presence of host, port, access key, secret key, the resource list, and
//!    `start` unless `recent` is set
//! 3. `start` / `end` parse as non-zero base-10 integers, `end >= start`
//!
//! A literal `0` for `start` or `end` is rejected the same way as a missing or
//! unparseable value. Existing callers rely on this, so it is kept.

use serde::ser::{Serialize, SerializeSeq, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;

// ---------------------------------------------------------------------------
// Metric kind
// ---------------------------------------------------------------------------

/// Which resource family the metering service aggregates over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    Buckets,
    Accounts,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Buckets => "buckets",
            MetricKind::Accounts => "accounts",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = ValidationError;

    /// Exact, case-sensitive match.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buckets" => Ok(MetricKind::Buckets),
            "accounts" => Ok(MetricKind::Accounts),
            other => Err(ValidationError::InvalidMetric(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Time range
// ---------------------------------------------------------------------------

/// An explicit `[start]` or `[start, end]` window, serialized as a JSON array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: i64,
    pub end: Option<i64>,
}

impl TimeRange {
    pub fn to_vec(&self) -> Vec<i64> {
        match self.end {
            Some(end) => vec![self.start, end],
            None => vec![self.start],
        }
    }
}

impl Serialize for TimeRange {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = if self.end.is_some() { 2 } else { 1 };
        let mut seq = serializer.serialize_seq(Some(len))?;
        seq.serialize_element(&self.start)?;
        if let Some(end) = &self.end {
            seq.serialize_element(end)?;
        }
        seq.end()
    }
}

// ---------------------------------------------------------------------------
// Raw options
// ---------------------------------------------------------------------------

/// How the options were collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// `--metric` chooses between `--buckets` and `--accounts`.
    #[default]
    Generic,
    /// Metric is fixed to `buckets`; only `-b/--buckets` exists.
    Legacy,
}

/// Immutable snapshot of everything the operator supplied, after merging the
/// command line over the optional profile file. Nothing is validated yet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryOptions {
    pub mode: Mode,
    pub metric: Option<String>,
    pub buckets: Option<String>,
    pub accounts: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub ssl: bool,
    pub verbose: bool,
    pub recent: bool,
}

// ---------------------------------------------------------------------------
// Validated request
// ---------------------------------------------------------------------------

/// Access key id / secret key pair used for signing.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// A fully validated query.
///
/// Invariants: `resources` is non-empty; `time_range` is `None` exactly when
/// `recent` is set; when both bounds are present `start <= end`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    pub host: String,
    pub port: u16,
    pub metric: MetricKind,
    pub resources: Vec<String>,
    pub time_range: Option<TimeRange>,
    pub credentials: Credentials,
    pub verbose: bool,
    pub recent: bool,
    pub ssl: bool,
}

/// Split a comma-separated resource list. Empty segments are kept verbatim,
/// so the result always has `count(',') + 1` entries.
pub fn split_resources(raw: &str) -> Vec<String> {
    raw.split(',').map(str::to_string).collect()
}

/// Parse an epoch bound. Zero is treated like a missing value.
fn parse_epoch(field: &'static str, raw: &str) -> Result<i64, ValidationError> {
    match raw.parse::<i64>() {
        Ok(v) if v != 0 => Ok(v),
        _ => Err(ValidationError::InvalidEpoch {
            field,
            value: raw.to_string(),
        }),
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

fn require<'a>(value: &'a Option<String>, field: &'static str) -> Result<&'a str, ValidationError> {
    present(value).ok_or(ValidationError::Missing { field })
}

impl QueryOptions {
    /// Validate and freeze into a [`QueryRequest`].
    ///
    /// # Errors
    /// The first [`ValidationError`] encountered, in the order documented at
    /// the top of this module.
    pub fn build(&self) -> Result<QueryRequest, ValidationError> {
        let metric = match self.mode {
            Mode::Legacy => MetricKind::Buckets,
            Mode::Generic => self.metric.as_deref().unwrap_or_default().parse()?,
        };

        let host = require(&self.host, "host")?;
        let port = self.port.ok_or(ValidationError::Missing { field: "port" })?;
        let access_key = require(&self.access_key, "access-key")?;
        let secret_key = require(&self.secret_key, "secret-key")?;
        let resources = match metric {
            MetricKind::Buckets => require(&self.buckets, "buckets")?,
            MetricKind::Accounts => require(&self.accounts, "accounts")?,
        };

        let time_range = if self.recent {
            None
        } else {
            let start = parse_epoch("start", require(&self.start, "start")?)?;
            let end = present(&self.end)
                .map(|raw| parse_epoch("end", raw))
                .transpose()?;
            if let Some(end) = end {
                if end < start {
                    return Err(ValidationError::EndBeforeStart { start, end });
                }
            }
            Some(TimeRange { start, end })
        };

        Ok(QueryRequest {
            host: host.to_string(),
            port,
            metric,
            resources: split_resources(resources),
            time_range,
            credentials: Credentials {
                access_key: access_key.to_string(),
                secret_key: secret_key.to_string(),
            },
            verbose: self.verbose,
            recent: self.recent,
            ssl: self.ssl,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
