use clap::Parser;
use rota_server::auth::keys::{
    HttpJwksSource, KeyCache, KeyResolver, KeyResolverSettings, DEFAULT_FETCH_TIMEOUT,
    DEFAULT_KEY_TTL,
};
use rota_server::auth::TokenVerifier;
use rota_server::config::AppConfig;
use rota_server::db::connection::{close_pool, create_pool};
use rota_server::db::migrate::migrate;
use rota_server::metrics::Metrics;
use rota_server::routes;
use rota_server::services::backup_scheduler::BackupScheduler;
use rota_server::state::AppState;
use rota_server::store::SqliteDocumentStore;
use rota_server::utils::{self, clock::Clock, clock::SystemClock};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on (overrides PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut config = AppConfig::from_env()?;
    if let Some(port) = args.port {
        config.port = port;
    }

    let log_level = args.log_level.as_deref().unwrap_or(&config.log_level);
    utils::logger::init(log_level)?;
    tracing::info!("Starting helper-rota v{} on port {}", env!("CARGO_PKG_VERSION"), config.port);

    // Document store
    let pool = create_pool(&config.document_store_path)?;
    migrate(&pool)?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = Arc::new(SqliteDocumentStore::new(pool.clone(), clock.clone()));

    // Token verification
    let jwks = HttpJwksSource::new(config.auth.jwks_uri(), DEFAULT_FETCH_TIMEOUT)?;
    let keys = KeyResolver::new(
        Arc::new(jwks),
        Arc::new(KeyCache::new(DEFAULT_KEY_TTL)),
        clock.clone(),
        KeyResolverSettings::default(),
    );
    let verifier = TokenVerifier::new(
        Arc::new(keys),
        clock.clone(),
        config.auth.issuer(),
        config.auth.client_id.clone(),
    );

    let metrics = Arc::new(Metrics::new()?);
    let state = Arc::new(AppState::new(
        config.clone(),
        store,
        Arc::new(verifier),
        clock,
        metrics,
    ));

    // Cancelled on the first shutdown signal; scheduled jobs check it before running.
    let cancel = CancellationToken::new();
    let scheduler = match BackupScheduler::new(state.clone(), cancel.clone()).await {
        Ok(s) => {
            if let Err(e) = s.init_schedules().await {
                tracing::warn!("Failed to initialize schedules: {}", e);
            }
            if let Err(e) = s.start().await {
                tracing::warn!("Failed to start scheduler: {}", e);
            }
            Some(s)
        }
        Err(e) => {
            tracing::warn!("Failed to create scheduler: {}", e);
            None
        }
    };

    let app = routes::create_router(state.clone());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await?;

    tracing::info!("Shutting down...");
    if let Some(s) = scheduler {
        if let Err(e) = s.shutdown().await {
            tracing::warn!("Scheduler shutdown error: {}", e);
        }
    }

    close_pool(&pool);
    tracing::info!("Server stopped");

    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl+c: {}", e);
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
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }

    cancel.cancel();
}
