//! Request signing.
//!
//! The query client only depends on [`RequestSigner`]; [`SigV4Signer`] is the
//! scheme the metering service accepts. It signs method, path, query and the
//! `host` / `x-amz-*` headers. The body is not covered: callers pass an empty
//! canonical payload and its SHA-256 goes into `x-amz-content-sha256`.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::error::SigningError;
use crate::query::Credentials;

type HmacSha256 = Hmac<Sha256>;

/// Service identifier the metering endpoint validates signatures against.
pub const SERVICE: &str = "s3";
/// Region baked into the credential scope.
pub const REGION: &str = "us-east-1";
pub const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// The parts of an outgoing request a signer gets to see.
#[derive(Debug, Clone, Copy)]
pub struct SigningInput<'a> {
    pub method: &'a str,
    /// Path including the query string, e.g. `/buckets?Action=ListMetrics`.
    pub path: &'a str,
    /// Value of the `host` header, `host:port`.
    pub host: &'a str,
}

/// Computes authentication headers for a request.
///
/// Returned headers are added to the request verbatim, lowercase names.
pub trait RequestSigner: Send + Sync {
    fn sign(
        &self,
        input: &SigningInput<'_>,
        payload: &str,
        credentials: &Credentials,
        now: DateTime<Utc>,
    ) -> Result<Vec<(String, String)>, SigningError>;
}

/// AWS Signature Version 4.
#[derive(Debug, Clone)]
pub struct SigV4Signer {
    pub service: String,
    pub region: String,
}

impl Default for SigV4Signer {
    fn default() -> Self {
        Self {
            service: SERVICE.to_string(),
            region: REGION.to_string(),
        }
    }
}

fn hmac(key: &[u8], data: &str) -> Result<Vec<u8>, SigningError> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| SigningError::InvalidKey)?;
    mac.update(data.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

pub fn sha256_hex(data: &str) -> String {
    hex::encode(Sha256::digest(data.as_bytes()))
}

/// RFC 3986 encoding; unreserved characters pass through.
fn uri_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

/// Sorted, encoded `k=v&k=v` form of a raw query string.
pub fn canonical_query(query: &str) -> String {
    let mut pairs: Vec<(String, String)> = query
        .split('&')
        .filter(|p| !p.is_empty())
        .map(|p| match p.split_once('=') {
            Some((k, v)) => (uri_encode(k), uri_encode(v)),
            None => (uri_encode(p), String::new()),
        })
        .collect();
    pairs.sort();
    pairs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

impl SigV4Signer {
    /// `kSigning = HMAC(HMAC(HMAC(HMAC("AWS4" + secret, date), region), service), "aws4_request")`
    pub fn signing_key(&self, secret: &str, date: &str) -> Result<Vec<u8>, SigningError> {
        let k_date = hmac(format!("AWS4{secret}").as_bytes(), date)?;
        let k_region = hmac(&k_date, &self.region)?;
        let k_service = hmac(&k_region, &self.service)?;
        hmac(&k_service, "aws4_request")
    }
}

impl RequestSigner for SigV4Signer {
    fn sign(
        &self,
        input: &SigningInput<'_>,
        payload: &str,
        credentials: &Credentials,
        now: DateTime<Utc>,
    ) -> Result<Vec<(String, String)>, SigningError> {
        if input.host.is_empty() {
            return Err(SigningError::MissingHost);
        }
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date = now.format("%Y%m%d").to_string();
        let payload_hash = sha256_hex(payload);

        let (uri, query) = input.path.split_once('?').unwrap_or((input.path, ""));
        let signed_headers = "host;x-amz-content-sha256;x-amz-date";
        let canonical_headers = format!(
            "host:{}\nx-amz-content-sha256:{}\nx-amz-date:{}\n",
            input.host.trim(),
            payload_hash,
            amz_date
        );
        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            input.method,
            uri,
            canonical_query(query),
            canonical_headers,
            signed_headers,
            payload_hash
        );

        let scope = format!("{date}/{}/{}/aws4_request", self.region, self.service);
        let string_to_sign = format!(
            "{ALGORITHM}\n{amz_date}\n{scope}\n{}",
            sha256_hex(&canonical_request)
        );
        let key = self.signing_key(&credentials.secret_key, &date)?;
        let signature = hex::encode(hmac(&key, &string_to_sign)?);

        let authorization = format!(
            "{ALGORITHM} Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
            credentials.access_key
        );

        Ok(vec![
            ("x-amz-date".to_string(), amz_date),
            ("x-amz-content-sha256".to_string(), payload_hash),
            ("authorization".to_string(), authorization),
        ])
    }
}
