// Sample sources: where the per-minute field values come from.
// The host source reads CPU, memory and temperatures via sysinfo.

mod linux;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use sysinfo::{Components, System};
use tracing::instrument;

use crate::models::{Field, FieldKind, FieldQoS};

pub const CPU_USAGE: &str = "CPU Usage";
pub const MEMORY_USED: &str = "Memory Used";
pub const MEMORY_USAGE: &str = "Memory Usage";
pub const UPTIME: &str = "Uptime";
pub const HOST_NAME: &str = "Host Name";
pub const PROCESSOR: &str = "Processor";

/// Produces one set of typed field values per sampling tick.
#[async_trait]
pub trait SampleSource: Send + Sync {
    async fn sample(&self, timestamp: DateTime<Utc>) -> anyhow::Result<Vec<Field>>;
}

pub struct SysinfoSource {
    sys: Arc<std::sync::Mutex<System>>,
    components: Arc<std::sync::Mutex<Components>>,
    last_cpu_refresh: Arc<std::sync::Mutex<Option<Instant>>>,
}

impl Default for SysinfoSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SysinfoSource {
    pub fn new() -> Self {
        let mut sys = System::new();
        sys.refresh_cpu_all();
        sys.refresh_memory();
        Self {
            sys: Arc::new(std::sync::Mutex::new(sys)),
            components: Arc::new(std::sync::Mutex::new(
                Components::new_with_refreshed_list(),
            )),
            last_cpu_refresh: Arc::new(std::sync::Mutex::new(None)),
        }
    }
}

#[async_trait]
impl SampleSource for SysinfoSource {
    #[instrument(skip(self), fields(repo = "sysinfo", operation = "sample"))]
    async fn sample(&self, timestamp: DateTime<Utc>) -> anyhow::Result<Vec<Field>> {
        let sys = self.sys.clone();
        let components = self.components.clone();
        let last_cpu_refresh = self.last_cpu_refresh.clone();
        tokio::task::spawn_blocking(move || {
            let mut sys = sys
                .lock()
                .map_err(|e| anyhow::anyhow!("sysinfo lock poisoned: {}", e))?;
            let qos = FieldQoS::AUTOMATIC_READOUT;
            let mut fields = Vec::new();

            // The first refresh only establishes the baseline for the usage delta.
            let now = Instant::now();
            let cpu_ready = match last_cpu_refresh.lock() {
                Ok(mut guard) => {
                    let ready = guard.is_some_and(|prev| {
                        now.duration_since(prev) >= sysinfo::MINIMUM_CPU_UPDATE_INTERVAL
                    });
                    if ready || guard.is_none() {
                        sys.refresh_cpu_all();
                        *guard = Some(now);
                    }
                    ready
                }
                Err(_) => false,
            };
            if cpu_ready {
                fields.push(Field::quantity(
                    CPU_USAGE,
                    timestamp,
                    f64::from(sys.global_cpu_usage()).clamp(0.0, 100.0),
                    1,
                    "%",
                    FieldKind::MOMENTARY,
                    qos,
                ));
            }

            sys.refresh_memory();
            let total = sys.total_memory();
            let used = total.saturating_sub(sys.available_memory());
            fields.push(Field::quantity(
                MEMORY_USED,
                timestamp,
                used as f64 / (1024.0 * 1024.0),
                0,
                "MB",
                FieldKind::MOMENTARY,
                qos,
            ));
            if total > 0 {
                fields.push(Field::quantity(
                    MEMORY_USAGE,
                    timestamp,
                    used as f64 / total as f64 * 100.0,
                    1,
                    "%",
                    FieldKind::MOMENTARY,
                    qos,
                ));
            }

            let mut temperatures: Vec<(String, f64)> = match components.lock() {
                Ok(mut components) => {
                    components.refresh(true);
                    components
                        .list()
                        .iter()
                        .filter_map(|c| Some((c.label().to_string(), f64::from(c.temperature()?))))
                        .filter(|(_, t)| t.is_finite())
                        .collect()
                }
                Err(_) => Vec::new(),
            };
            if temperatures.is_empty() {
                temperatures = linux::read_thermal_zones();
            }
            for (label, celsius) in temperatures {
                fields.push(Field::quantity(
                    format!("Temperature, {label}"),
                    timestamp,
                    celsius,
                    1,
                    "°C",
                    FieldKind::MOMENTARY,
                    qos,
                ));
            }

            fields.push(Field::int(
                UPTIME,
                timestamp,
                i64::try_from(System::uptime()).unwrap_or(i64::MAX),
                FieldKind::STATUS,
                qos,
            ));
            if let Some(host) = System::host_name() {
                fields.push(Field::string(
                    HOST_NAME,
                    timestamp,
                    host,
                    FieldKind::IDENTITY,
                    qos,
                ));
            }
            let processor = linux::read_cpu_model_linux().or_else(|| {
                sys.cpus()
                    .first()
                    .map(|c| c.brand().trim().to_string())
                    .filter(|s| !s.is_empty())
            });
            if let Some(processor) = processor {
                fields.push(Field::string(
                    PROCESSOR,
                    timestamp,
                    processor,
                    FieldKind::IDENTITY,
                    qos,
                ));
            }

            Ok(fields)
        })
        .await
        .map_err(|e| anyhow::anyhow!("sysinfo task join: {}", e))?
    }
}
