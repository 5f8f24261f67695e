//! Client-side tooling for a usage-metering service.
//!
//! Two independent paths:
//!
//! - **Query**: [`QueryOptions`] → [`QueryRequest`] (validated) →
//!   [`MetricsQueryClient`] (signed POST) → [`QueryOutcome`] → stdout / exit code.
//! - **Push**: [`UsageEvent`] → [`PushPayload`] → one call on a [`PushClient`]
//!   through a shared [`MetricPusher`] handle.

pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod push;
pub mod query;
pub mod signing;

pub use client::{Action, MetricsQueryClient, QueryBody, QueryOutcome, RequestDescriptor, ResponseBody};
pub use error::{ClientError, ConfigError, MetricsError, PushError, SigningError, ValidationError};
pub use push::{
    AuthInfo, ChannelPushClient, Identity, MetricPusher, PushClient, PushPayload, PushRecord,
    RequestLog, UsageEvent,
};
pub use query::{Credentials, MetricKind, Mode, QueryOptions, QueryRequest, TimeRange};
pub use signing::{RequestSigner, SigV4Signer, SigningInput};
