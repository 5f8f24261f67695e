//! Command-line surface and the single exit-code decision point.
//!
//! Both binaries call [`main_for`], which parses, installs logging and hands
//! the arguments to [`dispatch`]. `dispatch` loads the profile, validates,
//! queries, prints, and returns the exit code. Nothing below it terminates
//! the process.

use clap::error::ErrorKind;
use clap::{Args as ClapArgs, CommandFactory, Parser};
use colored::*;
use std::io::Write;
use std::path::PathBuf;
use tracing::error;
use tracing_subscriber::EnvFilter;

use crate::client::MetricsQueryClient;
use crate::config::Profile;
use crate::error::{ClientError, ConfigError, MetricsError, ValidationError};
use crate::query::{Mode, QueryOptions};
use crate::signing::{RequestSigner, SigV4Signer};

/// Options shared by the generic and legacy commands.
///
/// `-h` is the host, so clap's short help flag is disabled; `--help` stays.
#[derive(ClapArgs, Debug, Clone, Default)]
pub struct CommonArgs {
    /// Access key id
    #[arg(short = 'a', long)]
    pub access_key: Option<String>,

    /// Secret access key
    #[arg(short = 'k', long)]
    pub secret_key: Option<String>,

    /// Start of the range, epoch timestamp
    #[arg(short = 's', long)]
    pub start: Option<String>,

    /// End of the range, epoch timestamp
    #[arg(short = 'e', long)]
    pub end: Option<String>,

    /// Metering service host
    #[arg(short = 'h', long)]
    pub host: Option<String>,

    /// Metering service port
    #[arg(short = 'p', long)]
    pub port: Option<u16>,

    /// Use TLS
    #[arg(long)]
    pub ssl: bool,

    /// Use plain HTTP even when the profile enables TLS
    #[arg(long, conflicts_with = "ssl")]
    pub no_ssl: bool,

    /// Log request and response headers
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Query the latest 15-minute window; start and end are ignored
    #[arg(short = 'r', long)]
    pub recent: bool,

    /// TOML profile with connection defaults
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Print help
    #[arg(long, action = clap::ArgAction::Help)]
    pub help: Option<bool>,
}

/// `list-metrics`: query bucket or account metrics.
#[derive(Parser, Debug, Clone)]
#[command(name = "list-metrics", version)]
#[command(about = "List usage metrics for buckets or accounts from the metering service")]
#[command(disable_help_flag = true)]
pub struct Args {
    /// Metric type: buckets or accounts
    #[arg(short = 'm', long)]
    pub metric: Option<String>,

    /// Comma-separated bucket names
    #[arg(long)]
    pub buckets: Option<String>,

    /// Comma-separated account names
    #[arg(long)]
    pub accounts: Option<String>,

    #[command(flatten)]
    pub common: CommonArgs,
}

/// `list-bucket-metrics`: the older bucket-only command.
#[derive(Parser, Debug, Clone)]
#[command(name = "list-bucket-metrics", version)]
#[command(about = "List usage metrics for buckets from the metering service")]
#[command(disable_help_flag = true)]
pub struct LegacyArgs {
    /// Comma-separated bucket names
    #[arg(short = 'b', long)]
    pub buckets: Option<String>,

    #[command(flatten)]
    pub common: CommonArgs,
}

impl CommonArgs {
    fn into_options(self, mode: Mode) -> Result<QueryOptions, ConfigError> {
        let profile = match &self.config {
            Some(path) => Profile::load(path)?,
            None => Profile::default(),
        };
        Ok(QueryOptions {
            mode,
            start: self.start,
            end: self.end,
            host: self.host.or(profile.host),
            port: self.port.or(profile.port),
            access_key: self.access_key.or(profile.access_key),
            secret_key: self.secret_key.or(profile.secret_key),
            ssl: !self.no_ssl && (self.ssl || profile.ssl.unwrap_or(false)),
            verbose: self.verbose,
            recent: self.recent,
            ..Default::default()
        })
    }
}

impl Args {
    pub fn into_options(self) -> Result<QueryOptions, ConfigError> {
        Ok(QueryOptions {
            metric: self.metric,
            buckets: self.buckets,
            accounts: self.accounts,
            ..self.common.into_options(Mode::Generic)?
        })
    }
}

impl LegacyArgs {
    pub fn into_options(self) -> Result<QueryOptions, ConfigError> {
        Ok(QueryOptions {
            buckets: self.buckets,
            ..self.common.into_options(Mode::Legacy)?
        })
    }
}

/// Anything [`dispatch`] can turn into a [`QueryOptions`].
pub trait QuerySource {
    /// Which help text to print on a validation failure.
    fn mode(&self) -> Mode;

    fn verbose(&self) -> bool;

    fn into_options(self) -> Result<QueryOptions, ConfigError>;
}

impl QuerySource for Args {
    fn mode(&self) -> Mode {
        Mode::Generic
    }

    fn verbose(&self) -> bool {
        self.common.verbose
    }

    fn into_options(self) -> Result<QueryOptions, ConfigError> {
        Args::into_options(self)
    }
}

impl QuerySource for LegacyArgs {
    fn mode(&self) -> Mode {
        Mode::Legacy
    }

    fn verbose(&self) -> bool {
        self.common.verbose
    }

    fn into_options(self) -> Result<QueryOptions, ConfigError> {
        LegacyArgs::into_options(self)
    }
}

impl QuerySource for QueryOptions {
    fn mode(&self) -> Mode {
        self.mode
    }

    fn verbose(&self) -> bool {
        self.verbose
    }

    fn into_options(self) -> Result<QueryOptions, ConfigError> {
        Ok(self)
    }
}

/// Help and version requests exit 0; every other parse failure exits 1.
pub fn clap_exit_code(err: &clap::Error) -> i32 {
    match err.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
        _ => 1,
    }
}

/// Default filter directives when `RUST_LOG` is unset. Verbose mode only
/// raises this crate to `debug`; dependencies stay at `info`.
pub fn default_log_directives(verbose: bool) -> &'static str {
    if verbose {
        "usage_metrics=debug,info"
    } else {
        "info"
    }
}

/// Install the stderr log subscriber. `RUST_LOG` overrides the default level.
pub fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_log_directives(verbose)));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

pub fn write_usage<E: Write>(mode: Mode, diag: &mut E) -> std::io::Result<()> {
    let mut cmd = match mode {
        Mode::Generic => Args::command(),
        Mode::Legacy => LegacyArgs::command(),
    };
    cmd.write_help(diag)?;
    diag.flush()
}

fn report_validation<E: Write>(mode: Mode, err: &ValidationError, diag: &mut E) {
    error!(field = err.field(), error = %err, "invalid query option");
    let _ = writeln!(
        diag,
        "{} {}",
        format!("--{}:", err.field()).bright_red().bold(),
        err.to_string().bright_red()
    );
    let _ = write_usage(mode, diag);
}

/// Validate `options`, run the query through `client`, print the result.
///
/// Returns the exit code on a completed exchange; validation and transport
/// failures come back as errors for [`dispatch`] to report.
pub async fn run<S: RequestSigner, W: Write>(
    options: &QueryOptions,
    client: &MetricsQueryClient<S>,
    out: &mut W,
) -> Result<i32, MetricsError> {
    let request = options.build()?;
    let outcome = client.execute(&request).await?;
    Ok(outcome.report(out)?)
}

/// Load, validate, then build the client through `make_client` and query.
/// The client is only constructed once the options are known to be valid.
pub async fn execute_with<Q, S, F, W>(
    source: Q,
    make_client: F,
    out: &mut W,
) -> Result<i32, MetricsError>
where
    Q: QuerySource,
    S: RequestSigner,
    F: FnOnce() -> Result<MetricsQueryClient<S>, ClientError>,
    W: Write,
{
    let options = source.into_options()?;
    options.build()?;
    let client = make_client()?;
    run(&options, &client, out).await
}

fn decide<E: Write>(mode: Mode, result: Result<i32, MetricsError>, diag: &mut E) -> i32 {
    match result {
        Ok(code) => code,
        Err(MetricsError::Validation(err)) => {
            report_validation(mode, &err, diag);
            1
        }
        Err(err @ MetricsError::Config(_)) => {
            error!(error = %err, "cannot load profile");
            err.exit_code()
        }
        Err(err) => {
            error!(error = %err, "metrics query failed");
            err.exit_code()
        }
    }
}

/// Top-level entry: the one place an exit code is decided.
///
/// Results go to `out`; the validation diagnostic and usage help go to `diag`.
pub async fn dispatch<Q: QuerySource, W: Write, E: Write>(source: Q, out: &mut W, diag: &mut E) -> i32 {
    let mode = source.mode();
    let result = execute_with(source, MetricsQueryClient::<SigV4Signer>::new, out).await;
    decide(mode, result, diag)
}

/// Whole-process entry for a binary: parse `A`, set up logging, dispatch.
pub async fn main_for<A: Parser + QuerySource>() -> i32 {
    let args = match A::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return clap_exit_code(&e);
        }
    };
    init_tracing(args.verbose());
    dispatch(args, &mut std::io::stdout(), &mut std::io::stderr()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn args_parse_generic_full() {
        let args = Args::parse_from([
            "list-metrics",
            "-a", "AK",
            "-k", "SK",
            "-m", "accounts",
            "--accounts", "a1,a2",
            "-s", "100",
            "-e", "200",
            "-h", "127.0.0.1",
            "-p", "8100",
            "--ssl",
            "-v",
        ]);
        assert_eq!(args.metric.as_deref(), Some("accounts"));
        assert_eq!(args.accounts.as_deref(), Some("a1,a2"));
        assert_eq!(args.common.host.as_deref(), Some("127.0.0.1"));
        assert_eq!(args.common.port, Some(8100));
        assert!(args.common.ssl);
        assert!(args.common.verbose);
        assert!(!args.common.recent);
    }

    #[test]
    fn args_parse_long_forms() {
        let args = Args::parse_from([
            "list-metrics",
            "--access-key", "AK",
            "--secret-key", "SK",
            "--metric", "buckets",
            "--buckets", "b",
            "--host", "h",
            "--port", "1",
            "--recent",
        ]);
        assert_eq!(args.common.access_key.as_deref(), Some("AK"));
        assert_eq!(args.common.secret_key.as_deref(), Some("SK"));
        assert!(args.common.recent);
    }

    #[test]
    fn args_defaults_are_off() {
        let args = Args::parse_from(["list-metrics"]);
        assert!(args.metric.is_none());
        assert!(!args.common.ssl);
        assert!(!args.common.verbose);
        assert!(!args.common.recent);
    }

    #[test]
    fn legacy_args_short_buckets() {
        let args = LegacyArgs::parse_from(["list-bucket-metrics", "-b", "x,y", "-r"]);
        assert_eq!(args.buckets.as_deref(), Some("x,y"));
        let opts = args.into_options().unwrap();
        assert_eq!(opts.mode, Mode::Legacy);
        assert_eq!(opts.buckets.as_deref(), Some("x,y"));
        assert!(opts.recent);
    }

    #[test]
    fn legacy_rejects_metric_flag() {
        let err = LegacyArgs::try_parse_from(["list-bucket-metrics", "--metric", "buckets"]).unwrap_err();
        assert_eq!(clap_exit_code(&err), 1);
    }

    #[test]
    fn bad_port_is_exit_one() {
        let err = Args::try_parse_from(["list-metrics", "-p", "http"]).unwrap_err();
        assert_eq!(clap_exit_code(&err), 1);
    }

    #[test]
    fn help_and_version_exit_zero() {
        let err = Args::try_parse_from(["list-metrics", "--help"]).unwrap_err();
        assert_eq!(clap_exit_code(&err), 0);
        let err = Args::try_parse_from(["list-metrics", "--version"]).unwrap_err();
        assert_eq!(clap_exit_code(&err), 0);
    }

    #[test]
    fn command_definitions_are_consistent() {
        Args::command().debug_assert();
        LegacyArgs::command().debug_assert();
    }

    #[test]
    fn into_options_generic() {
        let args = Args::parse_from(["list-metrics", "-m", "buckets", "--buckets", "b1", "-s", "5"]);
        let opts = args.into_options().unwrap();
        assert_eq!(opts.mode, Mode::Generic);
        assert_eq!(opts.metric.as_deref(), Some("buckets"));
        assert_eq!(opts.start.as_deref(), Some("5"));
        assert_eq!(opts.end, None);
    }

    #[test]
    fn profile_fills_missing_connection_fields() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            f,
            "host = \"profile-host\"\nport = 9000\naccess_key = \"PAK\"\nsecret_key = \"PSK\"\nssl = true"
        )
        .unwrap();
        let path = f.path().to_str().unwrap().to_string();
        let args = Args::parse_from(["list-metrics", "-c", &path, "-h", "cli-host"]);
        let opts = args.into_options().unwrap();
        assert_eq!(opts.host.as_deref(), Some("cli-host"));
        assert_eq!(opts.port, Some(9000));
        assert_eq!(opts.access_key.as_deref(), Some("PAK"));
        assert_eq!(opts.secret_key.as_deref(), Some("PSK"));
        assert!(opts.ssl);
    }

    #[test]
    fn missing_profile_is_config_error() {
        let args = Args::parse_from(["list-metrics", "-c", "/definitely/not/here.toml"]);
        assert!(matches!(args.into_options(), Err(ConfigError::Read { .. })));
    }

    #[tokio::test]
    async fn dispatch_invalid_metric_exits_one_without_output() {
        let opts = QueryOptions {
            metric: Some("users".into()),
            host: Some("127.0.0.1".into()),
            port: Some(1),
            ..Default::default()
        };
        let mut out = Vec::new();
        let mut diag = Vec::new();
        assert_eq!(dispatch(opts, &mut out, &mut diag).await, 1);
        assert!(out.is_empty());
        assert!(!diag.is_empty());
    }

    #[tokio::test]
    async fn dispatch_connection_refused_exits_one() {
        // Bind then drop to get a port nobody is listening on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let opts = QueryOptions {
            metric: Some("buckets".into()),
            buckets: Some("b1".into()),
            host: Some("127.0.0.1".into()),
            port: Some(port),
            access_key: Some("AK".into()),
            secret_key: Some("SK".into()),
            recent: true,
            ..Default::default()
        };
        let mut out = Vec::new();
        let mut diag = Vec::new();
        assert_eq!(dispatch(opts, &mut out, &mut diag).await, 1);
        assert!(out.is_empty());
        assert!(diag.is_empty(), "transport failures are logged, not shown as usage");
    }

    // -- diagnostics ---------------------------------------------------------

    #[derive(Clone, Default)]
    struct LogBuf(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuf {
        fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(data);
            Ok(data.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl LogBuf {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    fn capture_logs() -> (LogBuf, tracing::subscriber::DefaultGuard) {
        let buf = LogBuf::default();
        let writer = buf.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        (buf, tracing::subscriber::set_default(subscriber))
    }

    fn valid_options() -> QueryOptions {
        QueryOptions {
            metric: Some("buckets".into()),
            buckets: Some("b1".into()),
            start: Some("100".into()),
            host: Some("127.0.0.1".into()),
            port: Some(1),
            access_key: Some("AK".into()),
            secret_key: Some("SK".into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn validation_failure_logs_field_and_prints_usage() {
        let (logs, _guard) = capture_logs();
        let opts = QueryOptions {
            start: Some("abc".into()),
            ..valid_options()
        };
        let mut out = Vec::new();
        let mut diag = Vec::new();

        assert_eq!(dispatch(opts, &mut out, &mut diag).await, 1);
        assert!(out.is_empty());

        let logged = logs.contents();
        assert!(logged.contains("ERROR"), "logs: {logged}");
        assert!(logged.contains(r#"field="start""#), "logs: {logged}");

        let diag = String::from_utf8(diag).unwrap();
        assert!(diag.contains("--start:"), "diag: {diag}");
        assert!(diag.contains("--access-key"), "usage should list options: {diag}");
        assert!(diag.contains("--accounts"), "generic usage expected: {diag}");
    }

    #[tokio::test]
    async fn legacy_validation_failure_prints_legacy_usage() {
        let args = LegacyArgs::parse_from(["list-bucket-metrics", "-h", "127.0.0.1", "-p", "1"]);
        let mut out = Vec::new();
        let mut diag = Vec::new();

        assert_eq!(dispatch(args, &mut out, &mut diag).await, 1);
        let diag = String::from_utf8(diag).unwrap();
        assert!(diag.contains("--buckets"), "diag: {diag}");
        assert!(!diag.contains("--accounts"), "legacy usage has no accounts flag: {diag}");
    }

    #[test]
    fn write_usage_names_options() {
        let mut buf = Vec::new();
        write_usage(Mode::Generic, &mut buf).unwrap();
        let help = String::from_utf8(buf).unwrap();
        assert!(help.contains("--access-key"));
        assert!(help.contains("--no-ssl"));
    }

    #[tokio::test]
    async fn missing_profile_goes_through_dispatch() {
        let (logs, _guard) = capture_logs();
        let args = Args::parse_from(["list-metrics", "-c", "/definitely/not/here.toml"]);
        let mut out = Vec::new();
        let mut diag = Vec::new();

        assert_eq!(dispatch(args, &mut out, &mut diag).await, 1);
        assert!(out.is_empty());
        assert!(logs.contents().contains("cannot load profile"));
    }

    #[tokio::test]
    async fn missing_profile_is_config_metrics_error() {
        let args = Args::parse_from(["list-metrics", "-c", "/definitely/not/here.toml"]);
        let mut out = Vec::new();
        let err = execute_with(args, MetricsQueryClient::new, &mut out)
            .await
            .unwrap_err();
        assert!(matches!(err, MetricsError::Config(ConfigError::Read { .. })));
        assert_eq!(err.exit_code(), 1);
    }

    #[tokio::test]
    async fn client_not_built_for_invalid_options() {
        let built = std::cell::Cell::new(false);
        let opts = QueryOptions {
            host: None,
            ..valid_options()
        };
        let mut out = Vec::new();
        let err = execute_with(
            opts,
            || {
                built.set(true);
                MetricsQueryClient::new()
            },
            &mut out,
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            MetricsError::Validation(ValidationError::Missing { field: "host" })
        ));
        assert!(!built.get(), "client must not be constructed before validation passes");
    }

    // -- ssl override and log filter -----------------------------------------

    fn ssl_profile() -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "ssl = true").unwrap();
        f
    }

    #[test]
    fn profile_ssl_applies_without_flags() {
        let f = ssl_profile();
        let path = f.path().to_str().unwrap().to_string();
        let opts = Args::parse_from(["list-metrics", "-c", &path]).into_options().unwrap();
        assert!(opts.ssl);
    }

    #[test]
    fn no_ssl_overrides_profile() {
        let f = ssl_profile();
        let path = f.path().to_str().unwrap().to_string();
        let opts = Args::parse_from(["list-metrics", "-c", &path, "--no-ssl"])
            .into_options()
            .unwrap();
        assert!(!opts.ssl);
    }

    #[test]
    fn ssl_and_no_ssl_conflict() {
        let err = Args::try_parse_from(["list-metrics", "--ssl", "--no-ssl"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ArgumentConflict);
        assert_eq!(clap_exit_code(&err), 1);
    }

    #[test]
    fn verbose_filter_is_scoped_to_this_crate() {
        assert_eq!(default_log_directives(false), "info");
        let verbose = default_log_directives(true);
        assert_eq!(verbose, "usage_metrics=debug,info");
        assert!(EnvFilter::try_new(verbose).is_ok());
    }
}
