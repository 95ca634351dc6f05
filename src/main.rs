use anyhow::{Context, Result};
use axum::Router;
use std::{io::ErrorKind, net::SocketAddr, sync::Arc};
use tempdrop::{
    config, db,
    routes::routes::routes,
    services::{
        burn_scheduler::BurnScheduler,
        file_repository::FileRepository,
        reaper::ExpiryReaper,
        scanner::{ClamdScanner, Scanner},
    },
    state::AppState,
    storage,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tower_http=info")),
        )
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;
    tracing::info!("Starting tempdrop with config: {:?}", cfg);

    // --- Initialize SQLite connection ---
    let pool = db::connect(&cfg.database_url).await?;
    db::migrate(&pool).await?;
    if migrate {
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }
    let repo = FileRepository::new(Arc::new(pool));

    // --- Storage backend and scanner ---
    let storage = storage::from_config(&cfg.storage)
        .await
        .context("initializing storage backend")?;

    let scanner: Option<Arc<dyn Scanner>> = match ClamdScanner::connect(&cfg.scanner).await {
        Ok(Some(scanner)) => Some(Arc::new(scanner)),
        Ok(None) => None,
        Err(err) => {
            tracing::warn!(error = %err, "clamd unavailable, virus scanning disabled");
            None
        }
    };

    // --- Background workers ---
    let shutdown = CancellationToken::new();
    let (burn, burn_handle) =
        BurnScheduler::spawn(storage.clone(), repo.clone(), cfg.burn_grace, shutdown.clone());
    let reaper_handle = ExpiryReaper::new(storage.clone(), repo.clone(), &cfg.reaper)
        .spawn(cfg.reaper.interval, shutdown.clone());

    // --- Build router ---
    let addr = cfg.addr();
    let public_host = cfg.public_host.clone();
    let state = AppState::new(cfg, repo, storage, scanner, burn);
    let port = state.config.port;
    let wildcard_host = matches!(state.config.host.as_str(), "0.0.0.0" | "::");
    let app: Router = routes(state);

    // --- Start server ---
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err) if err.kind() == ErrorKind::PermissionDenied && wildcard_host => {
            let fallback_addr = format!("127.0.0.1:{}", port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    if !public_host.is_empty() {
        tracing::info!("Public URL: {}", public_host);
    }

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
    .await?;

    // Stop workers; the burn scheduler flushes what is queued.
    shutdown.cancel();
    let _ = tokio::join!(burn_handle, reaper_handle);
    tracing::info!("Server stopped");

    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
        _ = shutdown.cancelled() => {},
    }
    tracing::info!("Shutdown signal received");
}
