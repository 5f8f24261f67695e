//! Usage-event push path.
//!
//! [`MetricPusher`] is the process-wide handle: build it once at startup and
//! clone it into whatever needs to report usage. Each call translates one
//! [`UsageEvent`] into a [`PushPayload`] and makes exactly one call on the
//! underlying [`PushClient`]. The client's outcome is returned untouched.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::error::PushError;

/// An authenticated requester.
pub trait Identity {
    fn canonical_id(&self) -> String;
}

/// Minimal identity carrying just the canonical id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthInfo {
    pub canonical_id: String,
}

impl AuthInfo {
    pub fn new(canonical_id: impl Into<String>) -> Self {
        Self {
            canonical_id: canonical_id.into(),
        }
    }
}

impl Identity for AuthInfo {
    fn canonical_id(&self) -> String {
        self.canonical_id.clone()
    }
}

/// Per-request log context. Uids accumulate as the request crosses services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLog {
    uids: Vec<String>,
}

impl RequestLog {
    pub fn new() -> Self {
        Self {
            uids: vec![Uuid::new_v4().simple().to_string()],
        }
    }

    /// Continue a request whose upstream uids are already known.
    pub fn with_uids<I, T>(uids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            uids: uids.into_iter().map(Into::into).collect(),
        }
    }

    /// A child context: same uids plus a fresh one.
    pub fn child(&self) -> Self {
        let mut uids = self.uids.clone();
        uids.push(Uuid::new_v4().simple().to_string());
        Self { uids }
    }

    /// Uids joined with `:`.
    pub fn serialized_uids(&self) -> String {
        self.uids.join(":")
    }
}

impl Default for RequestLog {
    fn default() -> Self {
        Self::new()
    }
}

/// One usage-changing occurrence, as seen by the caller.
#[derive(Clone, Copy, Default)]
pub struct UsageEvent<'a> {
    pub bucket: Option<&'a str>,
    pub identity: Option<&'a dyn Identity>,
    pub byte_length: Option<u64>,
    pub new_byte_length: Option<u64>,
    pub old_byte_length: Option<u64>,
    pub number_of_objects: Option<u64>,
}

/// What the push client receives. Absent fields stay absent on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub byte_length: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_byte_length: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_byte_length: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number_of_objects: Option<u64>,
}

impl From<&UsageEvent<'_>> for PushPayload {
    fn from(event: &UsageEvent<'_>) -> Self {
        Self {
            bucket: event.bucket.map(str::to_string),
            account_id: event.identity.map(|id| id.canonical_id()),
            byte_length: event.byte_length,
            new_byte_length: event.new_byte_length,
            old_byte_length: event.old_byte_length,
            number_of_objects: event.number_of_objects,
        }
    }
}

/// The external push client contract. Implementations own their own
/// concurrency; the pusher calls them through a shared reference.
pub trait PushClient: Send + Sync {
    type Outcome;

    fn push_metric(&self, action: &str, request_uids: &str, payload: PushPayload) -> Self::Outcome;
}

/// Shared handle to a push client.
pub struct MetricPusher<C> {
    client: Arc<C>,
}

impl<C> Clone for MetricPusher<C> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
        }
    }
}

impl<C: PushClient> MetricPusher<C> {
    pub fn new(client: C) -> Self {
        Self {
            client: Arc::new(client),
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Translate `event` and forward it. Exactly one client call per invocation.
    pub fn push_metric(&self, action: &str, log: &RequestLog, event: &UsageEvent<'_>) -> C::Outcome {
        let payload = PushPayload::from(event);
        let uids = log.serialized_uids();
        debug!(action, request_uids = %uids, "pushing usage event");
        self.client.push_metric(action, &uids, payload)
    }
}

/// A pushed event as delivered to the consumer of a [`ChannelPushClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushRecord {
    pub action: String,
    pub request_uids: String,
    pub payload: PushPayload,
}

/// In-process push client feeding an unbounded tokio channel.
///
/// Sending never blocks; it only fails once the receiver is dropped.
#[derive(Debug, Clone)]
pub struct ChannelPushClient {
    tx: mpsc::UnboundedSender<PushRecord>,
}

impl ChannelPushClient {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PushRecord>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl PushClient for ChannelPushClient {
    type Outcome = Result<(), PushError>;

    fn push_metric(&self, action: &str, request_uids: &str, payload: PushPayload) -> Self::Outcome {
        self.tx
            .send(PushRecord {
                action: action.to_string(),
                request_uids: request_uids.to_string(),
                payload,
            })
            .map_err(|_| PushError::Closed {
                action: action.to_string(),
            })
    }
}
