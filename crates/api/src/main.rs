use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use unplugd_api::config::ServerConfig;
use unplugd_api::router::build_app_router;
use unplugd_api::state::AppState;
use unplugd_api::{background, ws};
use unplugd_db::{
    ConnectionRegistry, DbPool, JobStore, MemoryConnectionRegistry, MemoryJobStore,
    PgConnectionRegistry, PgJobStore,
};
use unplugd_events::{
    ConnectionGateway, EventBus, HttpConnectionGateway, NotificationDispatcher, ProgressRelay,
};
use unplugd_pipeline::runners::{CommandTaskRunner, ScriptedTaskRunner};
use unplugd_pipeline::{
    JobService, MemoryObjectStore, ObjectStore, Orchestrator, PipelineConfig, S3ObjectStore,
    TaskRunner,
};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "unplugd_api=debug,unplugd_pipeline=debug,unplugd_events=debug,tower_http=debug".into()
    });
    let registry = tracing_subscriber::registry().with(filter);
    if std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json")) {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    // --- Configuration ---
    let config = ServerConfig::from_env();
    let pipeline_config = PipelineConfig::from_env();
    tracing::info!(
        host = %config.host,
        port = %config.port,
        upload_bucket = %pipeline_config.upload_bucket,
        output_bucket = %pipeline_config.output_bucket,
        max_concurrent_runs = pipeline_config.max_concurrent_runs,
        "Loaded configuration",
    );

    // --- Stores ---
    let pool: Option<DbPool>;
    let jobs_store: Arc<dyn JobStore>;
    let connections: Arc<dyn ConnectionRegistry>;
    let objects: Arc<dyn ObjectStore>;

    match &config.database_url {
        Some(database_url) => {
            let db = unplugd_db::create_pool(database_url)
                .await
                .expect("Failed to connect to database");
            tracing::info!("Database connection pool created");

            unplugd_db::health_check(&db)
                .await
                .expect("Database health check failed");
            unplugd_db::run_migrations(&db)
                .await
                .expect("Failed to run database migrations");
            tracing::info!("Database migrations applied");

            jobs_store = Arc::new(PgJobStore::new(db.clone()));
            connections = Arc::new(PgConnectionRegistry::new(db.clone()));
            objects = Arc::new(S3ObjectStore::from_env().await);
            pool = Some(db);
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory stores");
            jobs_store = Arc::new(MemoryJobStore::new());
            connections = Arc::new(MemoryConnectionRegistry::new());
            objects = Arc::new(MemoryObjectStore::new());
            pool = None;
        }
    }

    assert!(
        config.local_delivery_allowed(),
        "CONNECTION_GATEWAY_URL is required with DATABASE_URL unless SINGLE_REPLICA=true"
    );

    // --- WebSocket manager ---
    let ws_manager = Arc::new(ws::WsManager::new());
    let background_cancel = CancellationToken::new();
    let heartbeat_handle = ws::start_heartbeat(Arc::clone(&ws_manager), background_cancel.clone());

    // --- Notifications ---
    let gateway: Arc<dyn ConnectionGateway> = match &config.connection_gateway_url {
        Some(url) => {
            tracing::info!(url = %url, "Delivering notifications through external gateway");
            Arc::new(HttpConnectionGateway::new(url.clone()).expect("Failed to build gateway client"))
        }
        None => Arc::new(ws::WsGateway::new(Arc::clone(&ws_manager))),
    };
    let dispatcher = Arc::new(NotificationDispatcher::new(Arc::clone(&connections), gateway));

    let event_bus = Arc::new(EventBus::default());
    let relay_handle = tokio::spawn(ProgressRelay::run(
        Arc::clone(&dispatcher),
        event_bus.subscribe(),
        background_cancel.clone(),
    ));

    // --- Orchestration ---
    let runner: Arc<dyn TaskRunner> = if pipeline_config.stage_commands.is_empty() {
        assert!(
            pipeline_config.scripted_runner_allowed(config.database_url.is_some()),
            "Stage commands are required with DATABASE_URL unless ALLOW_SCRIPTED_RUNNER=true"
        );
        tracing::warn!("No stage commands configured, using scripted stage runner");
        Arc::new(ScriptedTaskRunner::new(Arc::clone(&objects)))
    } else {
        Arc::new(CommandTaskRunner::new(pipeline_config.stage_commands.clone()))
    };
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&jobs_store),
        Arc::clone(&objects),
        runner,
        Arc::clone(&dispatcher),
        Arc::clone(&event_bus),
        pipeline_config.orchestrator_settings(),
    ));
    let jobs = Arc::new(JobService::new(
        jobs_store,
        objects,
        orchestrator,
        dispatcher,
        pipeline_config.max_concurrent_runs,
    ));

    // --- Connection sweeper ---
    let sweeper_handle = tokio::spawn(background::connection_sweeper::run(
        Arc::clone(&connections),
        Duration::from_secs(config.connection_sweep_interval_secs),
        background_cancel.clone(),
    ));

    // --- App state ---
    let state = AppState {
        config: Arc::new(config.clone()),
        pool,
        jobs: Arc::clone(&jobs),
        connections,
        ws_manager: Arc::clone(&ws_manager),
        event_bus,
    };
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    let drained = jobs
        .shutdown(Duration::from_secs(config.shutdown_timeout_secs))
        .await;
    if drained {
        tracing::info!("Orchestration runs drained");
    } else {
        tracing::warn!(in_flight = jobs.in_flight(), "Shutdown timeout reached with runs in flight");
    }

    background_cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), relay_handle).await;
    let _ = tokio::time::timeout(Duration::from_secs(5), sweeper_handle).await;
    let _ = tokio::time::timeout(Duration::from_secs(5), heartbeat_handle).await;
    tracing::info!("Background tasks stopped");

    ws_manager.shutdown_all().await;

    tracing::info!("Graceful shutdown complete");
}

/// Wait for SIGINT (Ctrl-C) or SIGTERM to initiate graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl-C, starting graceful shutdown"),
        _ = terminate => tracing::info!("Received SIGTERM, starting graceful shutdown"),
    }
}
