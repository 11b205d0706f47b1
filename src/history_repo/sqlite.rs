// SQLite tier store: one table per tier, indexed by (field_name, timestamp)
// and (timestamp, field_name). Timestamps are stored as epoch milliseconds.
// A bulk scope is one transaction; dropping it uncommitted rolls back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::TryStreamExt;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use sqlx::{Row, Sqlite, Transaction};
use std::ops::Bound;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::instrument;

use super::{BulkScope, RecordFilter, SortOrder, StoreError, TierStore};
use crate::models::{FieldQoS, HistoricRecord, HistoricRecordWithPeaks, Peak, TierRecord};
use crate::tier::{TIERS, Tier};

const BASE_COLUMNS: &str = "field_name, timestamp, qos, magnitude, nr_decimals, unit";
const PEAK_COLUMNS: &str = "min_magnitude, min_nr_decimals, min_unit, min_timestamp, \
     max_magnitude, max_nr_decimals, max_unit, max_timestamp, nr_records, nr_samples";

pub struct SqliteTierStore {
    pool: SqlitePool,
    bulk_lock: Arc<Mutex<()>>,
}

impl SqliteTierStore {
    pub async fn connect(path: &str, max_pool_size: u32) -> anyhow::Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", path))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5))
            .synchronous(SqliteSynchronous::Normal);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_pool_size)
            .connect_with(opts)
            .await?;
        Ok(Self {
            pool,
            bulk_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Creates the six tier tables and their indexes if not present.
    pub async fn init(&self) -> anyhow::Result<()> {
        for spec in TIERS.iter() {
            let peak_columns = if spec.has_peaks {
                r#",
                min_magnitude REAL NOT NULL,
                min_nr_decimals INTEGER NOT NULL,
                min_unit TEXT NOT NULL,
                min_timestamp INTEGER NOT NULL,
                max_magnitude REAL NOT NULL,
                max_nr_decimals INTEGER NOT NULL,
                max_unit TEXT NOT NULL,
                max_timestamp INTEGER NOT NULL,
                nr_records INTEGER NOT NULL,
                nr_samples INTEGER NOT NULL"#
            } else {
                ""
            };
            sqlx::query(&format!(
                r#"
                CREATE TABLE IF NOT EXISTS {table} (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    field_name TEXT NOT NULL,
                    timestamp INTEGER NOT NULL,
                    qos INTEGER NOT NULL,
                    magnitude REAL NOT NULL DEFAULT 0,
                    nr_decimals INTEGER NOT NULL DEFAULT 0,
                    unit TEXT NOT NULL DEFAULT ''{peak_columns}
                )
                "#,
                table = spec.table,
            ))
            .execute(&self.pool)
            .await?;

            sqlx::query(&format!(
                "CREATE INDEX IF NOT EXISTS idx_{t}_field_ts ON {t}(field_name, timestamp)",
                t = spec.table
            ))
            .execute(&self.pool)
            .await?;
            sqlx::query(&format!(
                "CREATE INDEX IF NOT EXISTS idx_{t}_ts_field ON {t}(timestamp, field_name)",
                t = spec.table
            ))
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl TierStore for SqliteTierStore {
    #[instrument(skip(self, filter), fields(repo = "history", operation = "find", tier = %tier))]
    async fn find(
        &self,
        tier: Tier,
        filter: &RecordFilter,
        order: SortOrder,
    ) -> Result<Vec<TierRecord>, StoreError> {
        find_in(&self.pool, tier, filter, order).await
    }

    async fn start_bulk(&self) -> Result<Box<dyn BulkScope + '_>, StoreError> {
        let guard = self.bulk_lock.clone().lock_owned().await;
        let tx = self.pool.begin().await?;
        Ok(Box::new(SqliteBulk { tx, _guard: guard }))
    }

    #[instrument(skip(self), fields(repo = "history", operation = "vacuum"))]
    async fn vacuum(&self) -> Result<(), StoreError> {
        sqlx::query("VACUUM").execute(&self.pool).await?;
        Ok(())
    }
}

struct SqliteBulk {
    tx: Transaction<'static, Sqlite>,
    _guard: OwnedMutexGuard<()>,
}

#[async_trait]
impl BulkScope for SqliteBulk {
    async fn find(
        &mut self,
        tier: Tier,
        filter: &RecordFilter,
        order: SortOrder,
    ) -> Result<Vec<TierRecord>, StoreError> {
        find_in(&mut *self.tx, tier, filter, order).await
    }

    #[instrument(skip(self, records), fields(repo = "history", operation = "insert", tier = %tier, records_count = records.len()))]
    async fn insert(&mut self, tier: Tier, records: &[TierRecord]) -> Result<(), StoreError> {
        let table = tier.spec().table;
        for record in records {
            match record {
                TierRecord::Raw(r) => {
                    sqlx::query(&format!(
                        "INSERT INTO {table} ({BASE_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6)"
                    ))
                    .bind(&r.field_name)
                    .bind(r.timestamp.timestamp_millis())
                    .bind(i64::from(r.qos.bits()))
                    .bind(r.magnitude)
                    .bind(i64::from(r.nr_decimals))
                    .bind(&r.unit)
                    .execute(&mut *self.tx)
                    .await?;
                }
                TierRecord::WithPeaks(p) => {
                    let r = &p.record;
                    let nr_samples = i64::try_from(p.nr_samples).map_err(|_| StoreError::Corrupt {
                        tier,
                        reason: format!("nr_samples out of range: {}", p.nr_samples),
                    })?;
                    sqlx::query(&format!(
                        "INSERT INTO {table} ({BASE_COLUMNS}, {PEAK_COLUMNS}) VALUES \
                         ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)"
                    ))
                    .bind(&r.field_name)
                    .bind(r.timestamp.timestamp_millis())
                    .bind(i64::from(r.qos.bits()))
                    .bind(r.magnitude)
                    .bind(i64::from(r.nr_decimals))
                    .bind(&r.unit)
                    .bind(p.min.magnitude)
                    .bind(i64::from(p.min.nr_decimals))
                    .bind(&p.min.unit)
                    .bind(p.min.timestamp.timestamp_millis())
                    .bind(p.max.magnitude)
                    .bind(i64::from(p.max.nr_decimals))
                    .bind(&p.max.unit)
                    .bind(p.max.timestamp.timestamp_millis())
                    .bind(i64::from(p.nr_records))
                    .bind(nr_samples)
                    .execute(&mut *self.tx)
                    .await?;
                }
            }
        }
        Ok(())
    }

    #[instrument(skip(self, filter), fields(repo = "history", operation = "find_delete", tier = %tier))]
    async fn find_delete(&mut self, tier: Tier, filter: &RecordFilter) -> Result<u64, StoreError> {
        let (clause, args) = where_clause(filter);
        let sql = format!("DELETE FROM {}{}", tier.spec().table, clause);
        let r = bind_all(sqlx::query(&sql), args)
            .execute(&mut *self.tx)
            .await?;
        Ok(r.rows_affected())
    }

    async fn end(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }
}

enum SqlArg {
    Int(i64),
    Text(String),
}

fn where_clause(filter: &RecordFilter) -> (String, Vec<SqlArg>) {
    let mut conds = Vec::new();
    let mut args = Vec::new();
    match filter.start {
        Bound::Included(t) => {
            conds.push("timestamp >= ?");
            args.push(SqlArg::Int(t.timestamp_millis()));
        }
        Bound::Excluded(t) => {
            conds.push("timestamp > ?");
            args.push(SqlArg::Int(t.timestamp_millis()));
        }
        Bound::Unbounded => {}
    }
    match filter.end {
        Bound::Included(t) => {
            conds.push("timestamp <= ?");
            args.push(SqlArg::Int(t.timestamp_millis()));
        }
        Bound::Excluded(t) => {
            conds.push("timestamp < ?");
            args.push(SqlArg::Int(t.timestamp_millis()));
        }
        Bound::Unbounded => {}
    }
    if let Some(name) = &filter.field_name {
        conds.push("field_name = ?");
        args.push(SqlArg::Text(name.clone()));
    }
    if conds.is_empty() {
        (String::new(), args)
    } else {
        (format!(" WHERE {}", conds.join(" AND ")), args)
    }
}

fn bind_all<'q>(
    mut q: sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    args: Vec<SqlArg>,
) -> sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    for arg in args {
        q = match arg {
            SqlArg::Int(v) => q.bind(v),
            SqlArg::Text(s) => q.bind(s),
        };
    }
    q
}

async fn find_in<'c, E>(
    executor: E,
    tier: Tier,
    filter: &RecordFilter,
    order: SortOrder,
) -> Result<Vec<TierRecord>, StoreError>
where
    E: sqlx::Executor<'c, Database = Sqlite>,
{
    let spec = tier.spec();
    let columns = if spec.has_peaks {
        format!("{BASE_COLUMNS}, {PEAK_COLUMNS}")
    } else {
        BASE_COLUMNS.to_string()
    };
    let direction = match order {
        SortOrder::Ascending => "ASC",
        SortOrder::Descending => "DESC",
    };
    let (clause, args) = where_clause(filter);
    let sql = format!(
        "SELECT {columns} FROM {table}{clause} ORDER BY timestamp {direction}, field_name {direction}",
        table = spec.table,
    );

    let mut rows = bind_all(sqlx::query(&sql), args).fetch(executor);
    let mut out = Vec::new();
    while let Some(row) = rows.try_next().await? {
        out.push(parse_row(tier, &row)?);
    }
    Ok(out)
}

fn millis_to_utc(tier: Tier, ms: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| StoreError::Corrupt {
        tier,
        reason: format!("timestamp out of range: {}", ms),
    })
}

fn decimals(tier: Tier, v: i64) -> Result<u8, StoreError> {
    u8::try_from(v).map_err(|_| StoreError::Corrupt {
        tier,
        reason: format!("nr_decimals out of range: {}", v),
    })
}

fn count<T: TryFrom<i64>>(tier: Tier, column: &str, v: i64) -> Result<T, StoreError> {
    T::try_from(v).map_err(|_| StoreError::Corrupt {
        tier,
        reason: format!("{} out of range: {}", column, v),
    })
}

fn parse_row(tier: Tier, row: &SqliteRow) -> Result<TierRecord, StoreError> {
    let qos: i64 = row.try_get("qos")?;
    let record = HistoricRecord {
        field_name: row.try_get("field_name")?,
        timestamp: millis_to_utc(tier, row.try_get("timestamp")?)?,
        qos: FieldQoS::from_bits(u32::try_from(qos).map_err(|_| StoreError::Corrupt {
            tier,
            reason: format!("qos out of range: {}", qos),
        })?),
        magnitude: row.try_get("magnitude")?,
        nr_decimals: decimals(tier, row.try_get("nr_decimals")?)?,
        unit: row.try_get("unit")?,
    };
    if !tier.has_peaks() {
        return Ok(TierRecord::Raw(record));
    }

    let nr_records: i64 = row.try_get("nr_records")?;
    let nr_samples: i64 = row.try_get("nr_samples")?;
    Ok(TierRecord::WithPeaks(HistoricRecordWithPeaks {
        record,
        min: Peak {
            magnitude: row.try_get("min_magnitude")?,
            nr_decimals: decimals(tier, row.try_get("min_nr_decimals")?)?,
            unit: row.try_get("min_unit")?,
            timestamp: millis_to_utc(tier, row.try_get("min_timestamp")?)?,
        },
        max: Peak {
            magnitude: row.try_get("max_magnitude")?,
            nr_decimals: decimals(tier, row.try_get("max_nr_decimals")?)?,
            unit: row.try_get("max_unit")?,
            timestamp: millis_to_utc(tier, row.try_get("max_timestamp")?)?,
        },
        nr_records: count(tier, "nr_records", nr_records)?,
        nr_samples: count(tier, "nr_samples", nr_samples)?,
    }))
}
