use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};
use uuid::Uuid;

/// Command-line arguments for the evidentia binary.
#[derive(Debug, Parser)]
#[command(
    name = "evidentia",
    version,
    about = "Write-once web page captures with digest re-verification"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "EVIDENTIA_CONFIG_FILE",
        value_name = "PATH",
        value_hint = ValueHint::FilePath
    )]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the capture HTTP service.
    Serve(Box<ServeArgs>),
    /// Capture one URL in the foreground and print the resulting record.
    Capture(CaptureArgs),
    /// Re-hash a stored capture and compare it with the ledger.
    Verify(VerifyArgs),
    /// List in-flight captures past their staleness deadline.
    Stale(StaleArgs),
    /// Resume or fail stale captures.
    Reconcile(ReconcileArgs),
}

/// Overrides shared by every command that touches the ledger or the store.
#[derive(Debug, Args, Default, Clone)]
pub struct BackendOverrides {
    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,

    /// Override the object store directory.
    #[arg(long = "storage-directory", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub storage_directory: Option<PathBuf>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub backend: BackendOverrides,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the renderer engine (http|static).
    #[arg(long = "render-engine", value_name = "ENGINE")]
    pub render_engine: Option<String>,

    /// Override the render service endpoint.
    #[arg(long = "render-endpoint", value_name = "URL")]
    pub render_endpoint: Option<String>,

    /// Override the number of captures processed concurrently.
    #[arg(long = "pipeline-max-concurrency", value_name = "COUNT")]
    pub max_concurrency: Option<u32>,
}

#[derive(Debug, Args, Clone)]
pub struct CaptureArgs {
    #[command(flatten)]
    pub backend: BackendOverrides,

    /// Page to capture.
    #[arg(value_name = "URL", value_hint = ValueHint::Url)]
    pub url: String,

    /// Tenant the capture belongs to.
    #[arg(long, value_name = "OWNER")]
    pub owner: String,

    /// Artifact format (pdf|png).
    #[arg(long, value_name = "FORMAT")]
    pub format: Option<String>,

    /// Caller-supplied idempotency token.
    #[arg(long = "request-id", value_name = "ID")]
    pub request_id: Option<String>,

    /// Retention tier name; the configured default when omitted.
    #[arg(long = "retention-tier", value_name = "TIER")]
    pub retention_tier: Option<String>,

    /// Override the renderer engine (http|static).
    #[arg(long = "render-engine", value_name = "ENGINE")]
    pub render_engine: Option<String>,
}

#[derive(Debug, Args, Clone)]
pub struct VerifyArgs {
    #[command(flatten)]
    pub backend: BackendOverrides,

    /// Capture to verify.
    #[arg(value_name = "ID")]
    pub id: Uuid,

    /// Tenant the capture belongs to.
    #[arg(long, value_name = "OWNER")]
    pub owner: String,
}

#[derive(Debug, Args, Clone)]
pub struct StaleArgs {
    #[command(flatten)]
    pub backend: BackendOverrides,

    /// Maximum number of records to list.
    #[arg(long, default_value_t = 100)]
    pub limit: u32,
}

#[derive(Debug, Args, Clone)]
pub struct ReconcileArgs {
    #[command(flatten)]
    pub backend: BackendOverrides,

    /// Maximum number of records to settle in this pass.
    #[arg(long, default_value_t = 100)]
    pub limit: u32,

    /// Fail stale records instead of re-driving them.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub abandon: bool,
}

impl Command {
    pub fn backend(&self) -> &BackendOverrides {
        match self {
            Command::Serve(args) => &args.backend,
            Command::Capture(args) => &args.backend,
            Command::Verify(args) => &args.backend,
            Command::Stale(args) => &args.backend,
            Command::Reconcile(args) => &args.backend,
        }
    }
}
