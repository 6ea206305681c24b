use auth_core::{
    build_router,
    config::AuthConfig,
    db,
    services::{KeyRing, RedisSessionStore, SessionStore},
    utils::Password,
    AppState, Backends,
};
use secrecy::ExposeSecret;
use service_core::error::AppError;
use service_core::middleware::install_prometheus_recorder;
use service_core::observability::{init_tracing, shutdown_tracing};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Load configuration - fail fast if invalid
    let config = AuthConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    )?;
    let metrics = install_prometheus_recorder()?;

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting auth-core"
    );

    let keys = KeyRing::from_config(&config.jwt).map_err(AppError::ConfigError)?;
    tracing::info!(kid = %config.jwt.key_id, "Signing keys loaded");

    let sessions: Option<Arc<dyn SessionStore>> = match &config.redis {
        Some(redis) => Some(Arc::new(
            RedisSessionStore::new(redis, config.session_policy())
                .await
                .map_err(AppError::InternalError)?,
        )),
        None => None,
    };

    let backends = match &config.database {
        Some(database) => {
            let pool = db::create_pool(database, config.backend_timeout())
                .await
                .map_err(|e| AppError::InternalError(e.into()))?;
            db::run_migrations(&pool)
                .await
                .map_err(|e| AppError::InternalError(e.into()))?;
            let sessions = sessions.ok_or_else(|| {
                AppError::ConfigError(anyhow::anyhow!("REDIS_URL is required with DATABASE_URL"))
            })?;
            Backends::postgres(pool, sessions)
        }
        None => {
            tracing::warn!("No DATABASE_URL configured, keeping all state in memory");
            let mut backends = Backends::in_memory(&config);
            if let Some(sessions) = sessions {
                backends.sessions = sessions;
            }
            backends
        }
    };

    let state = AppState::new(config.clone(), backends, keys, Some(metrics))?;

    if let Some(bootstrap) = &config.bootstrap {
        let created = state
            .auth_service
            .bootstrap_superadmin(
                bootstrap.tenant_id,
                &bootstrap.username,
                Password::new(bootstrap.password.expose_secret().clone()),
            )
            .await?;
        if created.is_none() {
            tracing::info!(username = %bootstrap.username, "Bootstrap superadmin already exists");
        }
    }

    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Service shutdown complete");
    shutdown_tracing();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
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
