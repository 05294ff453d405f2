use std::{process, sync::Arc, time::Duration};

use evidentia::{
    application::{
        captures::{CaptureService, ReconcileMode},
        error::AppError,
        idempotency::{CaptureRequest, IdempotencyCoordinator},
        pipeline::CaptureOrchestrator,
        renderer::Renderer,
        repos::{CaptureLedger, DeadLetterRepo},
        storage::ObjectStore,
        verify::Verifier,
    },
    config::{self, RenderEngine, StorageBackend},
    infra::{
        db::PostgresRepositories,
        error::InfraError,
        http::{self, ApiState, api::models},
        links::LinkSigner,
        memory::{MemoryDeadLetters, MemoryLedger, MemoryObjectStore},
        object_store::FilesystemObjectStore,
        render::{HttpRenderer, StaticRenderer},
        telemetry,
    },
};
use serde::Serialize;
use time::OffsetDateTime;
use tokio::time::{Instant, sleep};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;
use uuid::Uuid;

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Capture(args) => run_capture(settings, args).await,
        config::Command::Verify(args) => run_verify(settings, args).await,
        config::Command::Stale(args) => run_stale(settings, args).await,
        config::Command::Reconcile(args) => run_reconcile(settings, args).await,
    }
}

/// Everything a command needs once the backends are chosen.
struct ApplicationContext {
    captures: Arc<CaptureService>,
    store: Arc<dyn ObjectStore>,
    signer: LinkSigner,
}

struct Backends {
    ledger: Arc<dyn CaptureLedger>,
    dead_letters: Arc<dyn DeadLetterRepo>,
}

async fn init_repositories(settings: &config::Settings) -> Result<Backends, AppError> {
    let Some(database_url) = settings.database.url.as_deref() else {
        warn!(
            target = "evidentia::startup",
            "no database url configured; the capture ledger lives in process memory"
        );
        return Ok(Backends {
            ledger: Arc::new(MemoryLedger::new()),
            dead_letters: Arc::new(MemoryDeadLetters::new()),
        });
    };

    let pool = PostgresRepositories::connect(
        database_url,
        settings.database.max_connections.get(),
        settings.pipeline.io_timeout,
    )
    .await
    .map_err(InfraError::database)?;

    PostgresRepositories::run_migrations(&pool)
        .await
        .map_err(InfraError::migration)?;

    let repositories = Arc::new(PostgresRepositories::new(pool));
    Ok(Backends {
        ledger: repositories.clone(),
        dead_letters: repositories,
    })
}

fn init_signer(settings: &config::Settings) -> Result<LinkSigner, AppError> {
    let secret = match settings.storage.link_secret.as_ref() {
        Some(secret) => secret.clone(),
        None => {
            warn!(
                target = "evidentia::startup",
                "storage.link_secret is not set; download links will not survive a restart"
            );
            format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
        }
    };
    LinkSigner::new(secret, settings.server.public_base_url.clone())
        .map_err(|err| AppError::from(InfraError::configuration("link signer", err.to_string())))
}

fn init_store(
    settings: &config::Settings,
    signer: LinkSigner,
) -> Result<Arc<dyn ObjectStore>, AppError> {
    match &settings.storage.backend {
        StorageBackend::Filesystem { directory } => {
            let store = FilesystemObjectStore::new(directory.clone(), signer).map_err(|source| {
                InfraError::StoreRoot {
                    path: directory.clone(),
                    source,
                }
            })?;
            info!(
                target = "evidentia::startup",
                directory = %store.root().display(),
                "using filesystem object store"
            );
            Ok(Arc::new(store))
        }
        StorageBackend::Memory => {
            warn!(
                target = "evidentia::startup",
                "object store is in process memory; artifacts are lost on exit"
            );
            Ok(Arc::new(MemoryObjectStore::new(signer)))
        }
    }
}

fn init_renderer(settings: &config::Settings) -> Result<Arc<dyn Renderer>, AppError> {
    match &settings.render.engine {
        RenderEngine::Http { endpoint } => {
            let renderer = HttpRenderer::new(endpoint.clone()).map_err(|err| {
                AppError::from(InfraError::configuration(
                    "renderer",
                    format!("failed to build render client: {err}"),
                ))
            })?;
            Ok(Arc::new(renderer))
        }
        RenderEngine::Static => {
            warn!(
                target = "evidentia::startup",
                "static renderer selected; artifacts are placeholders, not page renders"
            );
            Ok(Arc::new(StaticRenderer))
        }
    }
}

async fn build_application_context(
    settings: &config::Settings,
) -> Result<ApplicationContext, AppError> {
    let Backends {
        ledger,
        dead_letters,
    } = init_repositories(settings).await?;
    let signer = init_signer(settings)?;
    let store = init_store(settings, signer.clone())?;
    let renderer = init_renderer(settings)?;

    let pipeline = settings.pipeline_settings();
    let coordinator = IdempotencyCoordinator::new(
        ledger.clone(),
        settings.dedupe.bucket,
        settings.retention.clone(),
        pipeline.stale_after,
        pipeline.io_timeout,
    );
    let orchestrator = Arc::new(CaptureOrchestrator::new(
        ledger.clone(),
        store.clone(),
        renderer,
        dead_letters,
        settings.retention.clone(),
        pipeline.clone(),
    ));
    let verifier = Verifier::new(ledger.clone(), store.clone(), pipeline.io_timeout);

    let captures = Arc::new(CaptureService::new(
        ledger,
        store.clone(),
        coordinator,
        orchestrator,
        verifier,
        settings.pipeline.max_concurrency.get() as usize,
        settings.storage.link_ttl,
    ));

    Ok(ApplicationContext {
        captures,
        store,
        signer,
    })
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let app = build_application_context(&settings).await?;

    let state = ApiState {
        captures: app.captures.clone(),
        store: app.store,
        signer: app.signer,
        health_timeout: settings.pipeline.io_timeout,
    };
    let router = http::build_router(state);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|source| InfraError::Bind {
            addr: settings.server.addr,
            source,
        })?;
    info!(
        target = "evidentia::startup",
        addr = %settings.server.addr,
        "capture service listening"
    );

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))?;

    drain_in_flight(&app.captures, settings.server.graceful_shutdown).await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
        return;
    }
    info!(target = "evidentia::shutdown", "shutdown signal received");
}

/// Give background pipelines a bounded window to settle before exit.
async fn drain_in_flight(captures: &CaptureService, window: Duration) {
    let deadline = Instant::now() + window;
    loop {
        let remaining = captures.orchestrator().in_flight().len();
        if remaining == 0 {
            return;
        }
        if Instant::now() >= deadline {
            warn!(
                target = "evidentia::shutdown",
                remaining,
                "exiting with captures in flight; reconcile will pick them up"
            );
            return;
        }
        sleep(DRAIN_POLL_INTERVAL).await;
    }
}

async fn run_capture(
    settings: config::Settings,
    args: config::CaptureArgs,
) -> Result<(), AppError> {
    let app = build_application_context(&settings).await?;
    let outcome = app
        .captures
        .capture_now(CaptureRequest {
            owner_id: args.owner,
            target_url: args.url,
            format: args.format,
            request_id: args.request_id,
            schedule_id: None,
            retention_tier: args.retention_tier,
        })
        .await?;
    print_json(&models::trigger_to_api(outcome))
}

async fn run_verify(settings: config::Settings, args: config::VerifyArgs) -> Result<(), AppError> {
    let app = build_application_context(&settings).await?;
    let report = app.captures.verify(&args.owner, args.id).await?;
    print_json(&models::verify_to_api(&report))?;
    if report.ok() {
        Ok(())
    } else {
        Err(AppError::unexpected(format!(
            "capture {} failed verification: {}",
            args.id,
            report.outcome.as_str()
        )))
    }
}

async fn run_stale(settings: config::Settings, args: config::StaleArgs) -> Result<(), AppError> {
    let app = build_application_context(&settings).await?;
    let stale = app
        .captures
        .list_stale(OffsetDateTime::now_utc(), args.limit)
        .await?;
    let items: Vec<_> = stale.into_iter().map(models::capture_to_api).collect();
    print_json(&items)
}

async fn run_reconcile(
    settings: config::Settings,
    args: config::ReconcileArgs,
) -> Result<(), AppError> {
    let app = build_application_context(&settings).await?;
    let mode = if args.abandon {
        ReconcileMode::Abandon
    } else {
        ReconcileMode::Resume
    };
    let settled = app
        .captures
        .reconcile(OffsetDateTime::now_utc(), args.limit, mode)
        .await?;
    let items: Vec<_> = settled.into_iter().map(models::capture_to_api).collect();
    print_json(&items)
}

fn print_json<T: Serialize>(value: &T) -> Result<(), AppError> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|err| AppError::unexpected(format!("failed to encode output: {err}")))?;
    println!("{rendered}");
    Ok(())
}
