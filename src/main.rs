use clap::Parser; // for cli
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

mod config;
mod error;
mod handlers;
mod metrics;
mod models;
mod rate_limit;
mod sinks;
mod state;
mod store;

use config::{Args, StoreBackend};
use rate_limit::counter_reaper;
use state::AppState;
use store::{DocumentStore, MemoryStore, SqliteStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // parse cli arguments / environment
    let args = Args::parse();

    // one store client for the whole process, handed to everything that needs it
    let store: Arc<dyn DocumentStore> = match args.store {
        StoreBackend::Memory => {
            warn!("memory store selected: leads and counters are lost on restart and not shared between instances");
            Arc::new(MemoryStore::new())
        }
        StoreBackend::Sqlite => Arc::new(SqliteStore::open(&args.sqlite_path)?),
    };

    let state = Arc::new(AppState::from_args(&args, Arc::clone(&store))?);

    if let Some(every) = args.reap_interval() {
        tokio::spawn(counter_reaper(
            Arc::clone(&store),
            args.rate_limit_collection.clone(),
            every,
        ));
    }

    let app = handlers::router(state);

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("Lead gateway running on http://localhost:{}", args.port);
    info!("Store backend: {:?}", args.store);
    info!(
        "Rate limit: {} requests per {} ms",
        args.rate_limit_max, args.rate_limit_window_ms
    );

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Lead gateway shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
