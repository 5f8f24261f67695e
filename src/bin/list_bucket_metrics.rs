//! Bucket-only variant: metric is always `buckets`, selected with `-b`.

use std::process::ExitCode;

use usage_metrics::cli::{self, LegacyArgs};

#[tokio::main]
async fn main() -> ExitCode {
    ExitCode::from(cli::main_for::<LegacyArgs>().await as u8)
}
