use std::process::ExitCode;

use usage_metrics::cli::{self, Args};

#[tokio::main]
async fn main() -> ExitCode {
    ExitCode::from(cli::main_for::<Args>().await as u8)
}
