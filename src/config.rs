use chrono::Weekday;
use serde::Deserialize;

use crate::tier::{RetentionPolicy, Tier};

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub sensor: SensorConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub maintenance: MaintenanceConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default)]
    pub path: String,
    #[serde(default = "default_max_pool_size")]
    pub max_pool_size: u32,
}

fn default_max_pool_size() -> u32 {
    4
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleSourceKind {
    #[default]
    Sysinfo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SensorConfig {
    /// Identity reported in readouts and error reports.
    pub device_id: String,
    #[serde(default)]
    pub sample_source: SampleSourceKind,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryConfig {
    /// Records kept per field in every tier unless overridden below.
    #[serde(default = "default_records_in_memory")]
    pub records_in_memory: u32,
    /// Day the weekly rollup fires on ("Mon", "Sunday", ...).
    #[serde(default = "default_week_start")]
    pub week_start: Weekday,
    /// Field values per partial readout report.
    #[serde(default = "default_field_batch_size")]
    pub field_batch_size: usize,
    #[serde(default)]
    pub retention: RetentionOverrides,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            records_in_memory: default_records_in_memory(),
            week_start: default_week_start(),
            field_batch_size: default_field_batch_size(),
            retention: RetentionOverrides::default(),
        }
    }
}

fn default_records_in_memory() -> u32 {
    250
}

fn default_week_start() -> Weekday {
    Weekday::Mon
}

fn default_field_batch_size() -> usize {
    50
}

/// Per-tier record counts replacing `records_in_memory`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RetentionOverrides {
    pub minute: Option<u32>,
    pub quarter: Option<u32>,
    pub hour: Option<u32>,
    pub day: Option<u32>,
    pub week: Option<u32>,
    pub month: Option<u32>,
}

impl RetentionOverrides {
    fn get(&self, tier: Tier) -> Option<u32> {
        match tier {
            Tier::Minute => self.minute,
            Tier::Quarter => self.quarter,
            Tier::Hour => self.hour,
            Tier::Day => self.day,
            Tier::Week => self.week,
            Tier::Month => self.month,
        }
    }
}

impl HistoryConfig {
    pub fn retention_policy(&self) -> RetentionPolicy {
        Tier::ALL.iter().fold(
            RetentionPolicy::uniform(self.records_in_memory),
            |policy, &tier| match self.retention.get(tier) {
                Some(count) => policy.with(tier, count),
                None => policy,
            },
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MaintenanceConfig {
    /// Cron expression (local time) for VACUUM. Falls back to the interval when unset.
    #[serde(default)]
    pub vacuum_schedule: Option<String>,
    #[serde(default = "default_vacuum_interval_secs")]
    pub vacuum_interval_secs: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            vacuum_schedule: None,
            vacuum_interval_secs: default_vacuum_interval_secs(),
        }
    }
}

fn default_vacuum_interval_secs() -> u64 {
    86_400
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".into());
        let s = std::fs::read_to_string(&path)?;
        Self::load_from_str(&s)
    }

    /// Parse and validate config from a string (e.g. for tests).
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.server.port > 0,
            "server.port must be between 1 and 65535, got {}",
            self.server.port
        );
        if self.database.backend == StoreBackend::Sqlite {
            anyhow::ensure!(
                !self.database.path.is_empty(),
                "database.path must be non-empty for the sqlite backend"
            );
        }
        anyhow::ensure!(
            self.database.max_pool_size > 0,
            "database.max_pool_size must be > 0, got {}",
            self.database.max_pool_size
        );
        anyhow::ensure!(
            !self.sensor.device_id.trim().is_empty(),
            "sensor.device_id must be non-empty"
        );
        anyhow::ensure!(
            self.history.field_batch_size > 0,
            "history.field_batch_size must be > 0, got {}",
            self.history.field_batch_size
        );
        for tier in Tier::ALL {
            let count = self.history.retention_policy().count(tier);
            anyhow::ensure!(
                count > 0,
                "history.retention.{} must be > 0, got {}",
                tier,
                count
            );
        }
        self.history
            .retention_policy()
            .check_coverage()
            .map_err(|gap| anyhow::anyhow!("history.retention.{}: {}", gap.source_tier, gap))?;
        if let Some(schedule) = &self.maintenance.vacuum_schedule {
            anyhow::ensure!(
                schedule.parse::<cron::Schedule>().is_ok(),
                "maintenance.vacuum_schedule is not a valid cron expression: {}",
                schedule
            );
        } else {
            anyhow::ensure!(
                self.maintenance.vacuum_interval_secs > 0,
                "maintenance.vacuum_interval_secs must be > 0, got {}",
                self.maintenance.vacuum_interval_secs
            );
        }
        Ok(())
    }
}
