//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{
    collections::BTreeMap,
    net::SocketAddr,
    num::{NonZeroU32, NonZeroU64},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

pub use cli::{
    BackendOverrides, CaptureArgs, CliArgs, Command, ReconcileArgs, ServeArgs, StaleArgs,
    VerifyArgs,
};

use crate::{
    application::{
        captures::MAX_LINK_TTL,
        pipeline::{PipelineSettings, RetryPolicy},
        renderer::{DEFAULT_VIEWPORT_HEIGHT, DEFAULT_VIEWPORT_WIDTH, Viewport},
    },
    domain::{
        dedupe::{BucketWidth, DEFAULT_BUCKET_SECONDS},
        retention::{DEFAULT_RETENTION_DAYS, DEFAULT_TIER, RetentionPolicy, TierEffect},
        types::WaitStrategy,
    },
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "evidentia";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_STORAGE_DIR: &str = "evidence";
const DEFAULT_LINK_TTL_SECS: u64 = 300;
const MIN_LINK_SECRET_LEN: usize = 32;
const DEFAULT_RENDER_TIMEOUT_SECS: u64 = 30;
const MAX_VIEWPORT_EDGE: u32 = 16_384;
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_INITIAL_BACKOFF_MS: u64 = 500;
const DEFAULT_MAX_BACKOFF_MS: u64 = 30_000;
const DEFAULT_IO_TIMEOUT_SECS: u64 = 10;
const DEFAULT_STALE_AFTER_SECS: u64 = 900;
const DEFAULT_MAX_CONCURRENCY: u32 = 4;

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub storage: StorageSettings,
    pub render: RenderSettings,
    pub pipeline: PipelineTuning,
    pub dedupe: DedupeSettings,
    pub retention: RetentionPolicy,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
    /// Prefix for signed download links; empty yields relative links.
    pub public_base_url: String,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    /// `None` keeps the ledger in process memory.
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    Filesystem { directory: PathBuf },
    Memory,
}

#[derive(Clone)]
pub struct StorageSettings {
    pub backend: StorageBackend,
    /// `None` makes the process mint an ephemeral secret at startup.
    pub link_secret: Option<String>,
    pub link_ttl: time::Duration,
}

impl std::fmt::Debug for StorageSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageSettings")
            .field("backend", &self.backend)
            .field("link_secret", &self.link_secret.as_ref().map(|_| "<redacted>"))
            .field("link_ttl", &self.link_ttl)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderEngine {
    Http { endpoint: Url },
    Static,
}

#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub engine: RenderEngine,
    pub viewport: Viewport,
    pub wait_until: WaitStrategy,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct PipelineTuning {
    pub retry: RetryPolicy,
    pub io_timeout: Duration,
    pub stale_after: time::Duration,
    pub max_concurrency: NonZeroU32,
}

#[derive(Debug, Clone, Copy)]
pub struct DedupeSettings {
    pub bucket: BucketWidth,
}

impl Settings {
    /// Orchestrator tunables assembled from the render and pipeline sections.
    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            retry: self.pipeline.retry,
            io_timeout: self.pipeline.io_timeout,
            stale_after: self.pipeline.stale_after,
            viewport: self.render.viewport,
            wait_until: self.render.wait_until,
            render_timeout: self.render.timeout,
        }
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("EVIDENTIA").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(args),
        Some(Command::Capture(args)) => {
            raw.apply_backend_overrides(&args.backend);
            if let Some(engine) = args.render_engine.as_ref() {
                raw.render.engine = Some(engine.clone());
            }
        }
        Some(command) => raw.apply_backend_overrides(command.backend()),
        None => raw.apply_serve_overrides(&ServeArgs::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    storage: RawStorageSettings,
    render: RawRenderSettings,
    pipeline: RawPipelineSettings,
    dedupe: RawDedupeSettings,
    retention: RawRetentionSettings,
}

impl RawSettings {
    fn apply_backend_overrides(&mut self, overrides: &BackendOverrides) {
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
        if let Some(directory) = overrides.storage_directory.as_ref() {
            self.storage.backend = Some("filesystem".to_string());
            self.storage.directory = Some(directory.clone());
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
    }

    fn apply_serve_overrides(&mut self, args: &ServeArgs) {
        self.apply_backend_overrides(&args.backend);
        if let Some(host) = args.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = args.server_port {
            self.server.port = Some(port);
        }
        if let Some(json) = args.log_json {
            self.logging.json = Some(json);
        }
        if let Some(engine) = args.render_engine.as_ref() {
            self.render.engine = Some(engine.clone());
        }
        if let Some(endpoint) = args.render_endpoint.as_ref() {
            self.render.endpoint = Some(endpoint.clone());
        }
        if let Some(max) = args.max_concurrency {
            self.pipeline.max_concurrency = Some(max);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            database,
            storage,
            render,
            pipeline,
            dedupe,
            retention,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            database: build_database_settings(database)?,
            storage: build_storage_settings(storage)?,
            render: build_render_settings(render)?,
            pipeline: build_pipeline_settings(pipeline)?,
            dedupe: build_dedupe_settings(dedupe)?,
            retention: build_retention_policy(retention)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }
    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    let public_base_url = match server.public_base_url.map(|value| value.trim().to_string()) {
        Some(value) if !value.is_empty() => {
            Url::parse(&value).map_err(|err| {
                LoadError::invalid("server.public_base_url", format!("failed to parse: {err}"))
            })?;
            value
        }
        _ => String::new(),
    };

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
        public_base_url,
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = database.url.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    let max_connections = non_zero_u32(
        database
            .max_connections
            .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS)
            .into(),
        "database.max_connections",
    )?;

    Ok(DatabaseSettings {
        url,
        max_connections,
    })
}

fn build_storage_settings(storage: RawStorageSettings) -> Result<StorageSettings, LoadError> {
    let backend = match storage.backend.as_deref().map(str::trim) {
        None | Some("") | Some("filesystem") => {
            let directory = storage
                .directory
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STORAGE_DIR));
            if directory.as_os_str().is_empty() {
                return Err(LoadError::invalid(
                    "storage.directory",
                    "path must not be empty",
                ));
            }
            StorageBackend::Filesystem { directory }
        }
        Some("memory") => StorageBackend::Memory,
        Some(other) => {
            return Err(LoadError::invalid(
                "storage.backend",
                format!("unknown backend `{other}` (expected filesystem|memory)"),
            ));
        }
    };

    let link_secret = storage
        .link_secret
        .filter(|value| !value.trim().is_empty());
    if let Some(secret) = link_secret.as_ref()
        && secret.len() < MIN_LINK_SECRET_LEN
    {
        return Err(LoadError::invalid(
            "storage.link_secret",
            format!("must be at least {MIN_LINK_SECRET_LEN} bytes"),
        ));
    }

    let ttl_secs = storage.link_ttl_seconds.unwrap_or(DEFAULT_LINK_TTL_SECS);
    let max_ttl_secs = u64::try_from(MAX_LINK_TTL.whole_seconds()).unwrap_or(u64::MAX);
    if ttl_secs == 0 || ttl_secs > max_ttl_secs {
        return Err(LoadError::invalid(
            "storage.link_ttl_seconds",
            format!("must be between 1 and {max_ttl_secs}"),
        ));
    }

    Ok(StorageSettings {
        backend,
        link_secret,
        link_ttl: time::Duration::seconds(i64::try_from(ttl_secs).unwrap_or(i64::MAX)),
    })
}

fn build_render_settings(render: RawRenderSettings) -> Result<RenderSettings, LoadError> {
    let engine = match render.engine.as_deref().map(str::trim) {
        None | Some("") | Some("static") => RenderEngine::Static,
        Some("http") => {
            let raw = render.endpoint.ok_or_else(|| {
                LoadError::invalid("render.endpoint", "required when render.engine = http")
            })?;
            let endpoint = Url::parse(raw.trim()).map_err(|err| {
                LoadError::invalid("render.endpoint", format!("failed to parse: {err}"))
            })?;
            RenderEngine::Http { endpoint }
        }
        Some(other) => {
            return Err(LoadError::invalid(
                "render.engine",
                format!("unknown engine `{other}` (expected http|static)"),
            ));
        }
    };

    let width = render.viewport_width.unwrap_or(DEFAULT_VIEWPORT_WIDTH);
    let height = render.viewport_height.unwrap_or(DEFAULT_VIEWPORT_HEIGHT);
    for (key, value) in [
        ("render.viewport_width", width),
        ("render.viewport_height", height),
    ] {
        if value == 0 || value > MAX_VIEWPORT_EDGE {
            return Err(LoadError::invalid(
                key,
                format!("must be between 1 and {MAX_VIEWPORT_EDGE}"),
            ));
        }
    }

    let wait_until = match render.wait_until.as_deref() {
        Some(raw) => WaitStrategy::try_from(raw.trim()).map_err(|()| {
            LoadError::invalid(
                "render.wait_until",
                format!("unknown strategy `{raw}` (expected load|dom_content_loaded|network_idle)"),
            )
        })?,
        None => WaitStrategy::default(),
    };

    let timeout_secs = render
        .timeout_seconds
        .unwrap_or(DEFAULT_RENDER_TIMEOUT_SECS);
    if timeout_secs == 0 {
        return Err(LoadError::invalid(
            "render.timeout_seconds",
            "must be greater than zero",
        ));
    }

    Ok(RenderSettings {
        engine,
        viewport: Viewport { width, height },
        wait_until,
        timeout: Duration::from_secs(timeout_secs),
    })
}

fn build_pipeline_settings(pipeline: RawPipelineSettings) -> Result<PipelineTuning, LoadError> {
    let max_attempts = non_zero_u32(
        pipeline
            .max_attempts
            .unwrap_or(DEFAULT_MAX_ATTEMPTS)
            .into(),
        "pipeline.max_attempts",
    )?;

    let initial_backoff_ms = pipeline
        .initial_backoff_ms
        .unwrap_or(DEFAULT_INITIAL_BACKOFF_MS);
    let max_backoff_ms = pipeline.max_backoff_ms.unwrap_or(DEFAULT_MAX_BACKOFF_MS);
    if max_backoff_ms < initial_backoff_ms {
        return Err(LoadError::invalid(
            "pipeline.max_backoff_ms",
            "must not be smaller than pipeline.initial_backoff_ms",
        ));
    }

    let io_timeout_secs = pipeline
        .io_timeout_seconds
        .unwrap_or(DEFAULT_IO_TIMEOUT_SECS);
    if io_timeout_secs == 0 {
        return Err(LoadError::invalid(
            "pipeline.io_timeout_seconds",
            "must be greater than zero",
        ));
    }

    let stale_after_secs = pipeline
        .stale_after_seconds
        .unwrap_or(DEFAULT_STALE_AFTER_SECS);
    if stale_after_secs == 0 {
        return Err(LoadError::invalid(
            "pipeline.stale_after_seconds",
            "must be greater than zero",
        ));
    }
    let stale_after = i64::try_from(stale_after_secs)
        .map(time::Duration::seconds)
        .map_err(|_| LoadError::invalid("pipeline.stale_after_seconds", "value is too large"))?;

    let max_concurrency = non_zero_u32(
        pipeline
            .max_concurrency
            .unwrap_or(DEFAULT_MAX_CONCURRENCY)
            .into(),
        "pipeline.max_concurrency",
    )?;

    Ok(PipelineTuning {
        retry: RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(initial_backoff_ms),
            max_backoff: Duration::from_millis(max_backoff_ms),
            multiplier: 2,
        },
        io_timeout: Duration::from_secs(io_timeout_secs),
        stale_after,
        max_concurrency,
    })
}

fn build_dedupe_settings(dedupe: RawDedupeSettings) -> Result<DedupeSettings, LoadError> {
    let seconds = dedupe.bucket_seconds.unwrap_or(DEFAULT_BUCKET_SECONDS);
    let seconds = NonZeroU64::new(seconds)
        .ok_or_else(|| LoadError::invalid("dedupe.bucket_seconds", "must be greater than zero"))?;
    Ok(DedupeSettings {
        bucket: BucketWidth::from_seconds(seconds),
    })
}

fn build_retention_policy(retention: RawRetentionSettings) -> Result<RetentionPolicy, LoadError> {
    let default_tier = retention
        .default_tier
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_TIER.to_string());

    let raw_tiers = retention
        .tiers
        .filter(|tiers| !tiers.is_empty())
        .unwrap_or_else(|| BTreeMap::from([(DEFAULT_TIER.to_string(), DEFAULT_RETENTION_DAYS)]));

    let mut tiers = BTreeMap::new();
    for (name, days) in raw_tiers {
        let retain_days = NonZeroU32::new(days).ok_or_else(|| {
            LoadError::invalid(
                "retention.tiers",
                format!("tier `{name}` must retain for at least one day"),
            )
        })?;
        tiers.insert(name, TierEffect { retain_days });
    }

    RetentionPolicy::new(default_tier, tiers)
        .map_err(|err| LoadError::invalid("retention.default_tier", err.to_string()))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
    public_base_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStorageSettings {
    backend: Option<String>,
    directory: Option<PathBuf>,
    link_secret: Option<String>,
    link_ttl_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRenderSettings {
    engine: Option<String>,
    endpoint: Option<String>,
    viewport_width: Option<u32>,
    viewport_height: Option<u32>,
    wait_until: Option<String>,
    timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPipelineSettings {
    max_attempts: Option<u32>,
    initial_backoff_ms: Option<u64>,
    max_backoff_ms: Option<u64>,
    io_timeout_seconds: Option<u64>,
    stale_after_seconds: Option<u64>,
    max_concurrency: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDedupeSettings {
    bucket_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRetentionSettings {
    default_tier: Option<String>,
    tiers: Option<BTreeMap<String, u32>>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}
