use anyhow::Result;
use sensor_history::config::{SampleSourceKind, StoreBackend};
use sensor_history::history_repo::{MemoryTierStore, SharedStore, SqliteTierStore};
use sensor_history::service::{HistoryService, ServiceConfig};
use sensor_history::sysinfo_repo::{SampleSource, SysinfoSource};
use sensor_history::*;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::FormatTime;

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(
            w,
            "{}",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z")
        )
    }
}

async fn open_store(config: &config::DatabaseConfig) -> Result<SharedStore> {
    Ok(match config.backend {
        StoreBackend::Sqlite => {
            let store = SqliteTierStore::connect(&config.path, config.max_pool_size).await?;
            store.init().await?;
            tracing::info!(path = %config.path, "SQLite tier store ready");
            Arc::new(store)
        }
        StoreBackend::Memory => {
            tracing::info!("in-memory tier store ready; history is lost on exit");
            Arc::new(MemoryTierStore::new())
        }
    })
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(s) => s,
                Err(_) => {
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_timer(LocalTimer)
        .with_env_filter(filter)
        .init();

    let app_config = config::AppConfig::load()?;
    tracing::info!(name = routes::NAME, version = routes::VERSION, "starting");

    let store = open_store(&app_config.database).await?;
    let source: Arc<dyn SampleSource> = match app_config.sensor.sample_source {
        SampleSourceKind::Sysinfo => Arc::new(SysinfoSource::new()),
    };
    let service = Arc::new(HistoryService::new(
        store,
        source,
        ServiceConfig::from(&app_config),
    ));
    service.start().await;

    let app = routes::app(service.clone());
    let addr = format!("{}:{}", app_config.server.host, app_config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on http://{}", addr);

    tokio::select! {
        result = axum::serve(listener, app) => {
            result?;
        }
        _ = shutdown_signal() => {
            tracing::info!("Received shutdown signal");
        }
    }
    service.stop().await;

    Ok(())
}
