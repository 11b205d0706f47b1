// History service: owns the store, the sample source and the sampling worker.
// Built once at startup and shared with the routes.

use std::sync::Arc;
use tokio::sync::{Mutex, oneshot, watch};
use tokio::task::JoinHandle;

use crate::aggregation_worker::CascadePolicy;
use crate::config::AppConfig;
use crate::history_reader::ReadoutOutcome;
use crate::history_repo::SharedStore;
use crate::models::Field;
use crate::readout::{ReadoutRequest, read_sensor};
use crate::sysinfo_repo::SampleSource;
use crate::worker::{self, WorkerConfig, WorkerDeps};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub device_id: String,
    pub policy: CascadePolicy,
    pub field_batch_size: usize,
    pub vacuum_schedule: Option<String>,
    pub vacuum_interval_secs: u64,
}

impl From<&AppConfig> for ServiceConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            device_id: config.sensor.device_id.clone(),
            policy: CascadePolicy {
                retention: config.history.retention_policy(),
                week_start: config.history.week_start,
            },
            field_batch_size: config.history.field_batch_size,
            vacuum_schedule: config.maintenance.vacuum_schedule.clone(),
            vacuum_interval_secs: config.maintenance.vacuum_interval_secs,
        }
    }
}

struct Running {
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

pub struct HistoryService {
    store: SharedStore,
    source: Arc<dyn SampleSource>,
    config: ServiceConfig,
    latest_tx: Arc<watch::Sender<Arc<Vec<Field>>>>,
    running: Mutex<Option<Running>>,
}

impl HistoryService {
    pub fn new(store: SharedStore, source: Arc<dyn SampleSource>, config: ServiceConfig) -> Self {
        let (latest_tx, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            store,
            source,
            config,
            latest_tx: Arc::new(latest_tx),
            running: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Takes a sample so readouts have momentary values before the first tick,
    /// then starts the sampling worker. Returns false if it was already running.
    pub async fn start(&self) -> bool {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return false;
        }
        if let Err(e) = self.refresh_latest().await {
            tracing::warn!(error = %e, operation = "sample", "initial sample failed");
        }
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = worker::spawn(
            WorkerDeps {
                store: self.store.clone(),
                source: self.source.clone(),
                latest_tx: self.latest_tx.clone(),
                shutdown_rx,
            },
            WorkerConfig {
                policy: self.config.policy,
                vacuum_schedule: self.config.vacuum_schedule.clone(),
                vacuum_interval_secs: self.config.vacuum_interval_secs,
            },
        );
        *running = Some(Running {
            shutdown_tx,
            handle,
        });
        tracing::info!(device_id = %self.config.device_id, "history service started");
        true
    }

    /// Stops the worker after its current tick. Returns false if it was not running.
    pub async fn stop(&self) -> bool {
        let Some(Running {
            shutdown_tx,
            handle,
        }) = self.running.lock().await.take()
        else {
            return false;
        };
        let _ = shutdown_tx.send(());
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, "worker task ended abnormally");
        }
        tracing::info!("history service stopped");
        true
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    pub fn latest_fields(&self) -> Arc<Vec<Field>> {
        self.latest_tx.borrow().clone()
    }

    /// Samples the source now and replaces the latest-sample cache.
    pub async fn refresh_latest(&self) -> anyhow::Result<Arc<Vec<Field>>> {
        let fields = Arc::new(self.source.sample(chrono::Utc::now()).await?);
        self.latest_tx.send_replace(fields.clone());
        Ok(fields)
    }

    pub async fn readout(&self, request: &dyn ReadoutRequest) -> ReadoutOutcome {
        let latest = self.latest_fields();
        read_sensor(
            request,
            &self.config.device_id,
            &latest,
            self.store.as_ref(),
            self.config.field_batch_size,
        )
        .await
    }
}
