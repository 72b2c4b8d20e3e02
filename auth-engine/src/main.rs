use auth_engine::{
    build_router,
    config::AuthConfig,
    services::{EmailProvider, EmailService, MockEmailService, MongoDb, RevocationSweeper},
    utils::SystemClock,
    AppState, EngineSettings,
};
use service_core::observability::init_tracing;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::trace::TraceLayer;

#[tokio::main]
async fn main() -> Result<(), service_core::error::AppError> {
    // Fail fast on invalid configuration
    let config = AuthConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    )?;
    auth_engine::services::metrics::init_metrics()?;

    tracing::info!(
        service = %config.service_name,
        environment = ?config.environment,
        "Starting auth engine"
    );

    let db = MongoDb::connect(&config.mongodb.uri, &config.mongodb.database).await?;
    db.initialize_indexes().await?;
    tracing::info!("Database initialized successfully");

    let email: Arc<dyn EmailProvider> = match &config.smtp {
        Some(smtp) => Arc::new(EmailService::new(smtp)?),
        None => {
            tracing::warn!("SMTP_HOST not set, link emails will be recorded but not delivered");
            Arc::new(MockEmailService::new())
        }
    };

    let state = AppState::new(
        Arc::new(db.clone()),
        email,
        Arc::new(SystemClock),
        EngineSettings::from(&config),
    )
    .with_database(db);

    let seeded = state.roles.seed_defaults().await?;
    tracing::info!(seeded, "Default roles checked");

    let sweeper = RevocationSweeper::new(
        state.revocations.clone(),
        Duration::from_secs(config.revocation_sweep_interval_seconds),
    );
    let sweeper_token = sweeper.shutdown_token();
    let sweeper_handle = sweeper.start();

    let app = build_router(state).layer(TraceLayer::new_for_http());

    let addr = config.common.socket_addr();
    tracing::info!(address = %addr, "Listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper_token.cancel();
    if let Err(e) = sweeper_handle.await {
        tracing::error!(error = %e, "Revocation sweeper task failed");
    }

    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
