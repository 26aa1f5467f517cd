//! Palisade gateway - main entry point.

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use palisade::config::Config;
use palisade::detect::standard_payload_detectors;
use palisade::error::ConfigError;
use palisade::events::writer::EventSink;
use palisade::gateway::{self, GatewayState};
use palisade::service::{GuardService, ServiceConfig};
use palisade::store::memory::MemoryStore;
use palisade::store::{EventStore, ProjectStore, ToolStore};

#[derive(Debug, Parser)]
#[command(name = "palisade", about = "AI-safety gateway", version)]
struct Cli {
    /// Override GUARD_HTTP_PORT.
    #[arg(long)]
    port: Option<u16>,
}

/// The trait-object views of whichever backend is configured.
struct Stores {
    projects: Arc<dyn ProjectStore>,
    tools: Arc<dyn ToolStore>,
    events: Arc<dyn EventStore>,
    sink: Arc<dyn EventSink>,
}

async fn connect_stores(config: &Config) -> anyhow::Result<Stores> {
    #[cfg(feature = "postgres")]
    if let Some(url) = config.database_url() {
        let pg =
            Arc::new(palisade::store::postgres::PgStore::connect(url, config.pool_size).await?);
        pg.run_migrations().await?;
        tracing::info!("connected to PostgreSQL store");
        return Ok(Stores {
            projects: pg.clone(),
            tools: pg.clone(),
            events: pg.clone(),
            sink: pg,
        });
    }

    if config.database_url().is_some() {
        anyhow::bail!("DATABASE_URL is set but the 'postgres' feature is disabled");
    }
    tracing::warn!("DATABASE_URL not set, running on in-memory stores (all state is lost on exit)");
    let memory = Arc::new(MemoryStore::new());
    Ok(Stores {
        projects: memory.clone(),
        tools: memory.clone(),
        events: memory.clone(),
        sink: memory,
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => tracing::warn!(%error, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _ = dotenvy::dotenv();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(ConfigError::MissingRequired { key, hint }) => {
            eprintln!("Configuration error: missing required setting '{key}'");
            eprintln!("  {hint}");
            std::process::exit(1);
        }
        Err(e) => return Err(e.into()),
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("palisade=info,tower_http=info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let stores = connect_stores(&config).await?;

    let detectors = standard_payload_detectors(config.classifier_url.as_deref());
    tracing::info!(
        detectors = detectors.len(),
        timeout_ms = config.detector_timeout.as_millis() as u64,
        "payload detector set ready"
    );

    let service = GuardService::new(
        ServiceConfig::from(&config),
        detectors,
        stores.projects.clone(),
        stores.tools.clone(),
        stores.sink.clone(),
    );

    let state = Arc::new(GatewayState {
        service,
        projects: stores.projects,
        events: stores.events,
        admin_token: config.admin_token.clone(),
    });

    let port = cli.port.unwrap_or(config.http_port);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "palisade gateway listening");

    axum::serve(listener, gateway::router(state.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Drain buffered events before exiting.
    state.service.close().await;
    tracing::info!("shutdown complete");
    Ok(())
}
