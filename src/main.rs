use std::{process, sync::Arc};

use apalis::{
    layers::WorkerBuilderExt,
    prelude::{Monitor, WorkerBuilder, WorkerFactoryFn},
};
use apalis_cron::CronStream;
use crunevo::{
    application::{
        error::AppError,
        jobs::{CacheSweeper, RescoreContext, process_rescore_job, process_sweep_job},
        services::{Adapters, CoreServices},
    },
    cache::system_clock,
    config,
    infra::{
        db::PostgresRepositories,
        error::InfraError,
        fetch::{HttpPreviewFetcher, OpenMeteoProvider},
        http::{self, OpsState},
        telemetry,
    },
};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

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
    for key in &settings.defaulted {
        warn!(key = *key, "Configuration key not set; using default");
    }

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Rescore(_) => run_rescore(settings).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let repositories = init_repositories(&settings).await?;
    let services = build_services(&settings, repositories.clone())?;

    let monitor_handle = spawn_job_monitor(
        services.rescore_context(),
        services.sweeper(),
        &settings.scheduler,
    );

    let ops_state = OpsState {
        health: repositories,
        queries: services.queries.clone(),
        presence: services.presence.clone(),
        login: services.login.clone(),
    };
    let result = serve_ops(&settings, ops_state).await;

    monitor_handle.abort();
    let _ = monitor_handle.await;

    result
}

async fn run_rescore(settings: config::Settings) -> Result<(), AppError> {
    let repositories = init_repositories(&settings).await?;
    let services = build_services(&settings, repositories)?;

    let summary = services.feed.rescore().await?;
    info!(
        target = "crunevo::rescore",
        rescored = summary.rescored,
        pruned = summary.pruned,
        "Rescore completed"
    );
    Ok(())
}

async fn init_repositories(
    settings: &config::Settings,
) -> Result<Arc<PostgresRepositories>, AppError> {
    let database_url = settings
        .database
        .url
        .as_ref()
        .ok_or_else(|| InfraError::configuration("database url is not configured"))
        .map_err(AppError::from)?;

    let pool = PostgresRepositories::connect(database_url, settings.database.max_connections.get())
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    PostgresRepositories::run_migrations(&pool)
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    Ok(Arc::new(PostgresRepositories::new(pool)))
}

fn build_services(
    settings: &config::Settings,
    repositories: Arc<PostgresRepositories>,
) -> Result<CoreServices, AppError> {
    let previews = Arc::new(HttpPreviewFetcher::new(&settings.link_preview)?);
    let weather = Arc::new(OpenMeteoProvider::new(&settings.weather)?);

    Ok(CoreServices::build(
        settings,
        Adapters {
            repos: repositories,
            previews,
            weather,
        },
        system_clock(),
    ))
}

fn spawn_job_monitor(
    rescore: RescoreContext,
    sweeper: CacheSweeper,
    scheduler: &config::SchedulerSettings,
) -> tokio::task::JoinHandle<()> {
    let rescore_worker = WorkerBuilder::new("feed-rescore-worker")
        .concurrency(1)
        .data(rescore)
        .backend(CronStream::new(scheduler.rescore.clone()))
        .build_fn(process_rescore_job);
    let sweep_worker = WorkerBuilder::new("cache-sweep-worker")
        .concurrency(1)
        .data(sweeper)
        .backend(CronStream::new(scheduler.sweep.clone()))
        .build_fn(process_sweep_job);

    let monitor = Monitor::new()
        .register(rescore_worker)
        .register(sweep_worker);

    tokio::spawn(async move {
        if let Err(err) = monitor.run().await {
            error!(error = %err, "job monitor stopped");
        }
    })
}

async fn serve_ops(settings: &config::Settings, state: OpsState) -> Result<(), AppError> {
    let router = http::build_ops_router(state);

    let listener = tokio::net::TcpListener::bind(settings.server.ops_addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(addr = %settings.server.ops_addr, "Ops listener started");

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))?;

    info!("Ops listener stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
