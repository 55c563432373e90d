//! CRM access-control API server binary.
//!
//! Connects to PostgreSQL, applies migrations, serves the REST API and runs
//! the archival job in the background until Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use crm_api::config::ApiConfig;
use crm_core::lifecycle::MAX_RETENTION_DAYS;
use crm_core::store::PgStore;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// CLI arguments for the API server. Flags override the environment read
/// by [`ApiConfig::from_env`].
#[derive(Parser, Debug)]
#[command(name = "crm_api_server", about = "CRM access-control API server")]
struct Args {
    /// Address to listen on [default: $BIND_ADDR or 127.0.0.1:3100].
    #[arg(long)]
    bind: Option<String>,

    /// PostgreSQL connection URL [default: $DATABASE_URL].
    #[arg(long)]
    database_url: Option<String>,

    /// Maximum number of database connections in the pool.
    #[arg(long, default_value_t = 5)]
    max_connections: u32,

    /// Days a deactivated user is kept before archival
    /// [default: $ARCHIVE_RETENTION_DAYS or 60].
    #[arg(long, value_parser = clap::value_parser!(i64).range(1..=MAX_RETENTION_DAYS))]
    retention_days: Option<i64>,

    /// Seconds between scheduled archival runs
    /// [default: $ARCHIVE_INTERVAL_SECS or 86400].
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    archive_interval_secs: Option<u64>,

    /// Do not run the archival job; archive only via the admin endpoint.
    #[arg(long, default_value_t = false)]
    no_archival: bool,

    /// Mark the session cookie `Secure` [default: $COOKIE_SECURE].
    #[arg(long, default_value_t = false)]
    cookie_secure: bool,
}

impl Args {
    fn into_config(self, mut config: ApiConfig) -> ApiConfig {
        if let Some(bind) = self.bind {
            config.bind_addr = bind;
        }
        if let Some(url) = self.database_url {
            config.database_url = url;
        }
        if let Some(days) = self.retention_days {
            config.retention_days = days;
        }
        if let Some(secs) = self.archive_interval_secs {
            config.archive_interval = Duration::from_secs(secs);
        }
        config.cookie_secure |= self.cookie_secure;
        config
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,crm_api=debug,crm_core=debug")),
        )
        .init();

    let args = Args::parse();

    let max_connections = args.max_connections;
    let no_archival = args.no_archival;
    let config = args.into_config(ApiConfig::from_env());

    info!(
        bind = %config.bind_addr,
        max_connections,
        retention_days = config.retention_days,
        "starting crm_api_server"
    );

    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(30))
        .connect(&config.database_url)
        .await?;

    info!("running database migrations");
    crm_api::migrate(&pool).await?;

    let state = crm_api::AppState::new(Arc::new(PgStore::new(pool)), config.clone());

    let cancel = CancellationToken::new();
    let archival = if no_archival {
        warn!("archival job disabled");
        None
    } else {
        Some(
            state
                .archival_job()
                .spawn(config.archive_interval, cancel.clone()),
        )
    };

    let app = crm_api::router(state);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %listener.local_addr()?, "REST API listening");

    let serve_result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await;

    // The API may also exit on error; stop the archival job either way.
    cancel.cancel();
    if let Some(handle) = archival {
        let _ = handle.await;
    }

    serve_result?;
    info!("crm_api_server stopped");
    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("ctrl-c received, shutting down"),
        _ = cancel.cancelled() => {}
    }
}
