//! Signed metrics queries against the metering service.
//!
//! One [`QueryRequest`] becomes one [`RequestDescriptor`], which is signed,
//! sent once, and resolved into a [`QueryOutcome`]. There is no retry and no
//! timeout: a hung connection blocks until the process is killed.
//!
//! TLS certificate validation is turned off. The tool targets operator-chosen
//! hosts on a private network; do not reuse this client for anything else.

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::Value;
use std::fmt;
use std::io::Write;
use tokio_stream::StreamExt;
use tracing::{error, info, warn};

use crate::error::ClientError;
use crate::query::{Credentials, MetricKind, QueryRequest, TimeRange};
use crate::signing::{RequestSigner, SigV4Signer, SigningInput};

// ---------------------------------------------------------------------------
// Request shape
// ---------------------------------------------------------------------------

/// Service action selected by the `recent` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    ListMetrics,
    ListRecentMetrics,
}

impl Action {
    pub fn for_recent(recent: bool) -> Self {
        if recent {
            Action::ListRecentMetrics
        } else {
            Action::ListMetrics
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::ListMetrics => "ListMetrics",
            Action::ListRecentMetrics => "ListRecentMetrics",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// JSON body: `{ "<metric>": [resources], "timeRange": [start, end?] }`.
///
/// `timeRange` is only emitted for non-recent queries. Key order is fixed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryBody<'a> {
    pub metric: MetricKind,
    pub resources: &'a [String],
    pub time_range: Option<TimeRange>,
}

impl Serialize for QueryBody<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = if self.time_range.is_some() { 2 } else { 1 };
        let mut map = serializer.serialize_map(Some(len))?;
        map.serialize_entry(self.metric.as_str(), self.resources)?;
        if let Some(range) = &self.time_range {
            map.serialize_entry("timeRange", range)?;
        }
        map.end()
    }
}

impl<'a> QueryBody<'a> {
    pub fn from_request(request: &'a QueryRequest) -> Self {
        Self {
            metric: request.metric,
            resources: &request.resources,
            time_range: if request.recent { None } else { request.time_range },
        }
    }
}

/// Everything needed to put one request on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
    pub method: &'static str,
    pub ssl: bool,
    pub host: String,
    pub port: u16,
    /// Path plus query, `/{metric}?Action={action}`.
    pub path: String,
    /// Lowercase header names, in insertion order.
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl RequestDescriptor {
    /// Build the unsigned descriptor for `request`.
    pub fn from_request(request: &QueryRequest) -> Result<Self, ClientError> {
        let action = Action::for_recent(request.recent);
        let body = serde_json::to_string(&QueryBody::from_request(request))?;
        Ok(Self {
            method: "POST",
            ssl: request.ssl,
            host: request.host.clone(),
            port: request.port,
            path: format!("/{}?Action={}", request.metric, action),
            headers: vec![
                ("host".to_string(), format!("{}:{}", request.host, request.port)),
                ("content-type".to_string(), "application/json".to_string()),
                ("cache-control".to_string(), "no-cache".to_string()),
            ],
            body,
        })
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn url(&self) -> String {
        let scheme = if self.ssl { "https" } else { "http" };
        format!("{scheme}://{}:{}{}", self.host, self.port, self.path)
    }

    /// Append signing headers. The canonical payload is the empty string; the
    /// body bytes are not part of the signature.
    pub fn sign<S: RequestSigner + ?Sized>(
        &mut self,
        signer: &S,
        credentials: &Credentials,
        now: DateTime<Utc>,
    ) -> Result<(), ClientError> {
        let host = self.header("host").unwrap_or_default().to_string();
        let input = SigningInput {
            method: self.method,
            path: &self.path,
            host: &host,
        };
        let signed = signer.sign(&input, "", credentials, now)?;
        self.headers.extend(signed);
        Ok(())
    }

    fn header_map(&self) -> Result<HeaderMap, ClientError> {
        let mut map = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            let header_err = |detail: String| ClientError::Header {
                name: name.clone(),
                detail,
            };
            let name_h = HeaderName::from_bytes(name.as_bytes()).map_err(|e| header_err(e.to_string()))?;
            let value_h = HeaderValue::from_str(value).map_err(|e| header_err(e.to_string()))?;
            map.insert(name_h, value_h);
        }
        Ok(map)
    }
}

// ---------------------------------------------------------------------------
// Response shape
// ---------------------------------------------------------------------------

/// Response body after the stream ends.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Json(Value),
    /// Text that is not valid JSON, kept verbatim.
    Raw(String),
}

impl ResponseBody {
    /// An empty (or whitespace-only) body is JSON `null`.
    pub fn parse(text: &str) -> Self {
        if text.trim().is_empty() {
            return ResponseBody::Json(Value::Null);
        }
        match serde_json::from_str(text) {
            Ok(value) => ResponseBody::Json(value),
            Err(_) => ResponseBody::Raw(text.to_string()),
        }
    }
}

impl fmt::Display for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseBody::Json(v) => write!(f, "{v}"),
            ResponseBody::Raw(s) => f.write_str(s),
        }
    }
}

/// Final status and body of the one request this process sends.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOutcome {
    pub status: u16,
    pub body: ResponseBody,
}

impl QueryOutcome {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Write the result and return the process exit code.
    ///
    /// 2xx: pretty JSON (two-space indent) plus newline to `out`, exit 0.
    /// Anything else: an error log entry carrying status and body, exit 1.
    pub fn report<W: Write>(&self, out: &mut W) -> std::io::Result<i32> {
        if !self.is_success() {
            error!(status = self.status, body = %self.body, "metrics query failed");
            return Ok(1);
        }
        match &self.body {
            ResponseBody::Json(value) => {
                let pretty = serde_json::to_string_pretty(value).map_err(std::io::Error::other)?;
                writeln!(out, "{pretty}")?;
            }
            ResponseBody::Raw(text) => {
                warn!(status = self.status, "response body is not JSON, printing raw text");
                writeln!(out, "{text}")?;
            }
        }
        out.flush()?;
        Ok(0)
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Signs and sends metrics queries.
pub struct MetricsQueryClient<S = SigV4Signer> {
    http: reqwest::Client,
    signer: S,
}

impl MetricsQueryClient<SigV4Signer> {
    pub fn new() -> Result<Self, ClientError> {
        Self::with_signer(SigV4Signer::default())
    }
}

impl<S: RequestSigner> MetricsQueryClient<S> {
    pub fn with_signer(signer: S) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(ClientError::Build)?;
        Ok(Self { http, signer })
    }

    /// Build and sign the descriptor for `request` as of `now`.
    pub fn prepare(
        &self,
        request: &QueryRequest,
        now: DateTime<Utc>,
    ) -> Result<RequestDescriptor, ClientError> {
        let mut descriptor = RequestDescriptor::from_request(request)?;
        descriptor.sign(&self.signer, &request.credentials, now)?;
        Ok(descriptor)
    }

    /// Prepare, send, and collect the outcome of `request`.
    pub async fn execute(&self, request: &QueryRequest) -> Result<QueryOutcome, ClientError> {
        let descriptor = self.prepare(request, Utc::now())?;
        self.send(descriptor, request.verbose).await
    }

    /// Send a signed descriptor, consuming it, and read the body to the end.
    pub async fn send(
        &self,
        descriptor: RequestDescriptor,
        verbose: bool,
    ) -> Result<QueryOutcome, ClientError> {
        let url = descriptor.url();
        let headers = descriptor.header_map()?;

        let resp = self
            .http
            .post(&url)
            .headers(headers)
            .body(descriptor.body.clone())
            .send()
            .await
            .map_err(|source| ClientError::Connect {
                url: url.clone(),
                source,
            })?;

        let status = resp.status().as_u16();
        if verbose {
            info!(status, "response status");
            info!(headers = ?resp.headers(), "response headers");
            info!(headers = ?descriptor.headers, "request headers");
        }

        let mut stream = resp.bytes_stream();
        let mut buf = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|source| ClientError::Body {
                url: url.clone(),
                source,
            })?;
            buf.extend_from_slice(&chunk);
        }

        let text = String::from_utf8_lossy(&buf);
        Ok(QueryOutcome {
            status,
            body: ResponseBody::parse(&text),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
